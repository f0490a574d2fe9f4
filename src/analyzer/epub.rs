//! EPUB chapters along the spine, titled from the TOC nav map.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::info;

use super::numbers::parse_number;
use super::{Chapter, SectionType, finish, keyword_kind, normalize_ws};
use crate::book_parser::epub_text;
use crate::book_parser::ExtractError;

const MIN_EPUB_CHAPTER_WORDS: usize = 50;
// Chapter markers rarely appear past the opening of a document body.
const BODY_NUMBER_SCAN_CHARS: usize = 500;

static TITLE_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static H2_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());

static CHAPTER_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^chapter\s+(\d+|[IVXLCDM]+|\w+)").unwrap());
static CHAPTER_IN_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bchapter\s+(\d+|[IVXLCDM]+)\b").unwrap());

/// Recover a chapter number from the document title, else from the first
/// 500 characters of body text.
pub(crate) fn recover_chapter_number(title: &str, body: &str) -> Option<u32> {
    if let Some(caps) = CHAPTER_TITLE.captures(title)
        && let Some(number) = caps.get(1).and_then(|m| parse_number(m.as_str()))
    {
        return Some(number);
    }
    let head: String = body.chars().take(BODY_NUMBER_SCAN_CHARS).collect();
    CHAPTER_IN_BODY
        .captures(&head)
        .and_then(|caps| caps.get(1).and_then(|m| parse_number(m.as_str())))
}

/// Classify a title as front or back matter; anything else is a chapter.
pub(crate) fn classify_title(title: &str) -> SectionType {
    keyword_kind(&title.to_lowercase(), true).unwrap_or(SectionType::Chapter)
}

fn first_tag_text(html: &Html, selector: &Selector) -> Option<String> {
    html.select(selector).next().and_then(|el| {
        let text = el
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!text.is_empty()).then_some(text)
    })
}

fn toc_title_for(toc_map: &HashMap<String, String>, path: &str) -> Option<String> {
    if let Some(title) = toc_map.get(path) {
        return Some(title.clone());
    }
    // The nav map and the spine sometimes disagree on directory prefixes;
    // fall back to matching the file name alone.
    let name = path.rsplit('/').next()?;
    toc_map
        .iter()
        .find(|(href, _)| href.rsplit('/').next() == Some(name))
        .map(|(_, title)| title.clone())
}

fn collect_nav_titles(
    points: &[epub::doc::NavPoint],
    map: &mut HashMap<String, String>,
) {
    for point in points {
        let content = point.content.to_string_lossy().to_string();
        if let Some(base) = content.split('#').next()
            && !base.is_empty()
        {
            map.entry(base.to_string())
                .or_insert_with(|| point.label.trim().to_string());
        }
        collect_nav_titles(&point.children, map);
    }
}

/// Spine-driven chapter extraction. Skips navigation documents and anything
/// with fewer than 50 words; titles come from the TOC map, the `<title>`
/// tag, the first `h1`/`h2`, or a positional fallback, in that order.
pub fn analyze_epub(
    path: &Path,
    max_chapters: usize,
) -> Result<(Vec<Chapter>, &'static str), ExtractError> {
    let mut doc = epub_text::open(path)?;

    let mut toc_map: HashMap<String, String> = HashMap::new();
    let nav_points = doc.toc.clone();
    collect_nav_titles(&nav_points, &mut toc_map);

    let mut chapters: Vec<Chapter> = Vec::new();
    let spine_len = doc.spine.len();
    for index in 0..spine_len {
        let _ = doc.set_current_page(index);
        let Some((content, _mime)) = doc.get_current_str() else {
            continue;
        };
        let current_path = doc
            .get_current_path()
            .map(|p| p.to_string_lossy().to_string());

        let html = Html::parse_document(&content);
        if epub_text::is_nav_document(&html) {
            continue;
        }
        let full_text = epub_text::document_text(&html);
        let word_count = full_text.split_whitespace().count();
        if word_count < MIN_EPUB_CHAPTER_WORDS {
            continue;
        }

        let title = current_path
            .as_deref()
            .and_then(|p| toc_title_for(&toc_map, p))
            .or_else(|| first_tag_text(&html, &TITLE_TAG))
            .or_else(|| first_tag_text(&html, &H1_TAG))
            .or_else(|| first_tag_text(&html, &H2_TAG))
            .unwrap_or_else(|| format!("Chapter {}", chapters.len() + 1));

        let title_clean = normalize_ws(&title);
        let chapter_number = recover_chapter_number(&title_clean, &full_text);
        let section_type = classify_title(&title_clean);

        chapters.push(Chapter {
            index: chapters.len(),
            section_type,
            chapter_number,
            title: title_clean,
            chapter_label: String::new(),
            page_start: None,
            page_end: None,
            word_count,
            text: full_text,
            text_clean: String::new(),
        });
    }

    if chapters.is_empty() {
        return Err(ExtractError::NoText("EPUB"));
    }
    info!(target: "analyzer", chapters = chapters.len(), "epub spine split");
    Ok(finish(chapters, "epub_spine", max_chapters))
}
