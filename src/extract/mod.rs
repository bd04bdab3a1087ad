//! C3: Text Extractor.
//!
//! Format-specific extraction to plain text + page count, with per-format
//! fallback (§4.3). Dispatch is extension-based, one module per format.

mod docx;
mod pdf;
mod text;

use std::path::Path;

use crate::errors::{CoreError, CoreResult};
use crate::types::FileType;

/// `per_page_breaks[i]` is the character offset where page `i` begins,
/// when the format and parser path can report it.
pub struct Extraction {
    pub text: String,
    pub page_count: usize,
    pub per_page_breaks: Option<Vec<usize>>,
}

/// Shared with the chunker's DOCX page-number estimation so both use the
/// same characters-per-page assumption.
pub const CHARS_PER_ESTIMATED_PAGE: usize = 1800;

/// Extracts `path` (named `filename` for error messages) according to
/// `file_type`, then enforces the page limit before returning text (§4.3:
/// "`PageLimitExceeded` is raised before returning text if `page_count >
/// MaxPages`").
pub fn extract(path: &Path, filename: &str, file_type: FileType, max_pages: usize) -> CoreResult<Extraction> {
    let extraction = match file_type {
        FileType::Pdf => pdf::extract(path, filename)?,
        FileType::Docx => docx::extract(path, filename)?,
        FileType::Txt | FileType::Md => text::extract(path, filename)?,
    };

    if extraction.page_count > max_pages {
        return Err(CoreError::PageLimitExceeded {
            actual: extraction.page_count,
            limit: max_pages,
        });
    }

    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn txt_extraction_reports_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello world")
            .unwrap();
        let extraction = extract(&path, "note.txt", FileType::Txt, 1000).unwrap();
        assert_eq!(extraction.page_count, 1);
        assert_eq!(extraction.text, "hello world");
    }

    #[test]
    fn md_extraction_reports_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"# Title\n\nBody text")
            .unwrap();
        let extraction = extract(&path, "note.md", FileType::Md, 1000).unwrap();
        assert_eq!(extraction.page_count, 1);
    }

    #[test]
    fn page_limit_exceeded_before_returning_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::File::create(&path).unwrap().write_all(b"x").unwrap();
        let err = extract(&path, "note.txt", FileType::Txt, 0).unwrap_err();
        assert!(matches!(err, CoreError::PageLimitExceeded { .. }));
    }
}
