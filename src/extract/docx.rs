//! DOCX extraction via `docx-rs`. No fallback parser is specified for this
//! format (§4.3); page count is estimated since DOCX has no intrinsic page
//! boundaries without running a layout engine.

use std::path::Path;

use crate::errors::{CoreError, CoreResult};

use super::{Extraction, CHARS_PER_ESTIMATED_PAGE};

pub fn extract(path: &Path, filename: &str) -> CoreResult<Extraction> {
    let bytes = std::fs::read(path)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| CoreError::ExtractionFailed {
        filename: filename.to_string(),
        reason: format!("{e:?}"),
    })?;

    let mut text = String::new();
    for child in &docx.document.children {
        collect_paragraph_text(child, &mut text);
    }

    let char_count = text.chars().count();
    let page_count = ((char_count as f64) / CHARS_PER_ESTIMATED_PAGE as f64).ceil() as usize;
    let page_count = page_count.max(1);

    Ok(Extraction {
        text,
        page_count,
        // Estimated page counts have no real character-offset breaks to
        // anchor chunk attribution to.
        per_page_breaks: None,
    })
}

fn collect_paragraph_text(node: &docx_rs::DocumentChild, out: &mut String) {
    if let docx_rs::DocumentChild::Paragraph(p) = node {
        for run_child in &p.children {
            if let docx_rs::ParagraphChild::Run(run) = run_child {
                for rc in &run.children {
                    if let docx_rs::RunChild::Text(t) = rc {
                        out.push_str(&t.text);
                    }
                }
            }
        }
        out.push('\n');
        out.push('\n');
    }
}
