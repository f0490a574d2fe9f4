//! EPUB text extraction over the spine, in reading order.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use epub::doc::EpubDoc;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use super::ExtractError;

/// Tags whose text is narrated. Everything else (nav, tables of links,
/// scripts) is ignored.
static TEXT_TAGS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("p, h1, h2, h3, h4, h5, h6, li, blockquote, div").expect("static selector")
});

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("static selector"));

pub(crate) type Epub = EpubDoc<BufReader<File>>;

pub(crate) fn open(path: &Path) -> Result<Epub, ExtractError> {
    EpubDoc::new(path).map_err(|e| ExtractError::Open {
        kind: "EPUB",
        detail: e.to_string(),
    })
}

/// True for navigation/TOC spine documents, which should not be narrated.
pub(crate) fn is_nav_document(html: &Html) -> bool {
    html.select(&BODY)
        .next()
        .and_then(|body| body.value().attr("class"))
        .map(|classes| {
            let classes = classes.to_ascii_lowercase();
            classes.contains("nav") || classes.contains("toc")
        })
        .unwrap_or(false)
}

/// Text of one spine document: each matching tag becomes a paragraph.
pub(crate) fn document_text(html: &Html) -> String {
    let mut paragraphs = Vec::new();
    for element in html.select(&TEXT_TAGS) {
        let text = element
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs.join("\n\n")
}

/// Whole-book text for single-file conversion.
pub fn extract_epub_text(path: &Path) -> Result<String, ExtractError> {
    let mut doc = open(path)?;
    let mut chapters = Vec::new();

    let count = doc.spine.len();
    for index in 0..count {
        let _ = doc.set_current_page(index);
        let Some((content, _mime)) = doc.get_current_str() else {
            continue;
        };
        let html = Html::parse_document(&content);
        if is_nav_document(&html) {
            continue;
        }
        let text = document_text(&html);
        if !text.is_empty() {
            chapters.push(text);
        }
    }

    if chapters.is_empty() {
        return Err(ExtractError::NoText("EPUB"));
    }
    Ok(chapters.join("\n\n"))
}

/// Spine document count, used as the EPUB "page count" for the free tier.
pub fn spine_document_count(path: &Path) -> Result<usize, ExtractError> {
    let doc = open(path)?;
    Ok(doc.spine.len())
}
