//! PDF extraction: `pdf_oxide` primary path, `lopdf` fallback when the
//! primary parser fails on corrupt or unusual input.

use std::path::Path;

use crate::errors::{CoreError, CoreResult};

use super::Extraction;

const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Opens via `pdf_oxide`, walks pages, and joins them with a page
/// separator that doubles as the `per_page_breaks` marker.
fn extract_primary(path: &Path) -> anyhow::Result<Extraction> {
    let doc = pdf_oxide::PdfDocument::open(path)?;
    let page_count = doc.page_count();
    let mut text = String::new();
    let mut per_page_breaks = Vec::with_capacity(page_count);

    for page_index in 0..page_count {
        per_page_breaks.push(text.chars().count());
        let page_text = doc.page(page_index)?.to_markdown()?;
        if page_index > 0 {
            text.push_str(PAGE_SEPARATOR);
        }
        text.push_str(&page_text);
    }

    Ok(Extraction {
        text,
        page_count,
        per_page_breaks: Some(per_page_breaks),
    })
}

/// Fallback path using `lopdf` directly: walks the page tree and extracts
/// text operators. Page attribution from this path is unreliable (no
/// layout reconstruction), so `per_page_breaks` is left `None` per §4.4's
/// "null when breaks are unavailable" rule.
fn extract_fallback(path: &Path) -> anyhow::Result<Extraction> {
    let doc = lopdf::Document::load(path)?;
    let pages = doc.get_pages();
    let page_count = pages.len();
    let mut text = String::new();
    for (i, (page_num, _)) in pages.iter().enumerate() {
        if i > 0 {
            text.push_str(PAGE_SEPARATOR);
        }
        if let Ok(page_text) = doc.extract_text(&[*page_num]) {
            text.push_str(&page_text);
        }
    }
    Ok(Extraction {
        text,
        page_count,
        per_page_breaks: None,
    })
}

pub fn extract(path: &Path, filename: &str) -> CoreResult<Extraction> {
    match extract_primary(path) {
        Ok(extraction) => Ok(extraction),
        Err(primary_err) => extract_fallback(path).map_err(|fallback_err| CoreError::ExtractionFailed {
            filename: filename.to_string(),
            reason: format!("primary: {primary_err}; fallback: {fallback_err}"),
        }),
    }
}
