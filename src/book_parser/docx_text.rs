//! Word (.docx) text extraction.

use std::path::Path;

use docx_rs::{DocumentChild, ParagraphChild, RunChild, read_docx};

use super::ExtractError;

// Rough words-per-page used to map Word files onto the page gate.
const WORDS_PER_PAGE: usize = 250;

fn paragraphs(path: &Path) -> Result<Vec<String>, ExtractError> {
    let data = std::fs::read(path)?;
    let docx = read_docx(&data).map_err(|e| ExtractError::Open {
        kind: "Word document",
        detail: e.to_string(),
    })?;

    let mut out = Vec::new();
    for child in &docx.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };
        let mut text = String::new();
        for content in &paragraph.children {
            let ParagraphChild::Run(run) = content else {
                continue;
            };
            for piece in &run.children {
                if let RunChild::Text(t) = piece {
                    text.push_str(&t.text);
                }
            }
        }
        let text = text.trim().to_string();
        if !text.is_empty() {
            out.push(text);
        }
    }
    Ok(out)
}

pub fn extract_docx_text(path: &Path) -> Result<String, ExtractError> {
    let paragraphs = paragraphs(path)?;
    if paragraphs.is_empty() {
        return Err(ExtractError::NoText("Word document"));
    }
    Ok(paragraphs.join("\n\n"))
}

/// Estimated page count: one page per 250 words, at least one.
pub fn estimate_page_count(path: &Path) -> Result<usize, ExtractError> {
    let paragraphs = paragraphs(path)?;
    let words: usize = paragraphs
        .iter()
        .map(|p| p.split_whitespace().count())
        .sum();
    let pages = (words as f64 / WORDS_PER_PAGE as f64).round() as usize;
    Ok(pages.max(1))
}
