//! Plain-text and Markdown extraction: direct read with encoding detection.
//! Page count is always 1 (§4.3 table); no per_page_breaks needed since
//! there is exactly one page.

use std::path::Path;

use encoding_rs::Encoding;

use crate::errors::{CoreError, CoreResult};

use super::Extraction;

pub fn extract(path: &Path, filename: &str) -> CoreResult<Extraction> {
    let bytes = std::fs::read(path)?;
    let (encoding, _) = Encoding::for_bom(&bytes).unwrap_or((encoding_rs::UTF_8, 0));
    let (text, _, had_errors) = encoding.decode(&bytes);
    if had_errors && encoding != encoding_rs::UTF_8 {
        // Retry assuming UTF-8 before giving up; most txt/md in the wild is
        // UTF-8 without a BOM, which `for_bom` can't detect.
        let (utf8_text, _, utf8_errors) = encoding_rs::UTF_8.decode(&bytes);
        if !utf8_errors {
            return Ok(Extraction {
                text: utf8_text.into_owned(),
                page_count: 1,
                per_page_breaks: None,
            });
        }
    }
    if had_errors {
        return Err(CoreError::ExtractionFailed {
            filename: filename.to_string(),
            reason: "could not decode text with a supported encoding".to_string(),
        });
    }
    Ok(Extraction {
        text: text.into_owned(),
        page_count: 1,
        per_page_breaks: None,
    })
}
