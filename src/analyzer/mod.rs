//! Chapter structure detection.
//!
//! PDFs go through a multi-pass pipeline: parse the printed contents pages,
//! detect in-body headings by font size, then align the two. Books without a
//! usable printed TOC fall back to the embedded outline, to headings alone,
//! and finally to fixed page chunks. EPUBs are split along the spine.
//!
//! Submodules:
//! - `numbers`  — digit / roman / written-out number parsing
//! - `toc`      — printed contents discovery and entry parsing
//! - `headings` — font-size heading boundary detection
//! - `align`    — TOC-to-boundary alignment and page calibration
//! - `fallback` — outline, headings-only and page-chunk paths
//! - `epub`     — spine-driven EPUB chapters

pub mod align;
pub mod epub;
pub mod fallback;
pub mod headings;
pub mod numbers;
pub mod toc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::book_parser::normalizer::clean_for_tts;
use crate::book_parser::pdf_reader::BookScan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Chapter,
    Part,
    FrontMatter,
    BackMatter,
    /// Large heading with no recognizable marker. Never survives labeling:
    /// [`finish`] turns it into `Chapter`.
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    pub index: usize,
    pub section_type: SectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    pub title: String,
    pub chapter_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_end: Option<usize>,
    pub word_count: usize,
    #[serde(skip)]
    pub text: String,
    #[serde(skip)]
    pub text_clean: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualSegment {
    pub name: String,
    pub start_page: usize,
    pub end_page: usize,
}

pub(crate) const FRONT_MATTER_WORDS: &[&str] = &[
    "preface",
    "introduction",
    "prologue",
    "foreword",
    "acknowledgments",
    "acknowledgements",
    "dedication",
];

pub(crate) const BACK_MATTER_WORDS: &[&str] = &[
    "epilogue",
    "afterword",
    "conclusion",
    "bibliography",
    "glossary",
    "index",
    "notes",
    "appendix",
    "about the author",
    "about the authors",
    "further reading",
];

/// Classify a lowercased line as front or back matter. The printed-TOC and
/// outline paths also accept `word ` prefixes (`allow_space`); the heading
/// detector only accepts the bare word or a `word:` prefix.
pub(crate) fn keyword_kind(low: &str, allow_space: bool) -> Option<SectionType> {
    let matches_word = |word: &str| {
        low == word
            || low.starts_with(&format!("{word}:"))
            || (allow_space && low.starts_with(&format!("{word} ")))
    };
    if FRONT_MATTER_WORDS.iter().any(|w| matches_word(w)) {
        return Some(SectionType::FrontMatter);
    }
    if BACK_MATTER_WORDS.iter().any(|w| matches_word(w)) {
        return Some(SectionType::BackMatter);
    }
    None
}

static QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{2018}\u{2019}\u{201C}\u{201D}]").unwrap());
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{2012}\u{2013}\u{2014}]").unwrap());
static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace and fold typographic quote/dash variants, which PDF
/// extraction renders inconsistently.
pub(crate) fn normalize_ws(s: &str) -> String {
    let s = QUOTES.replace_all(s, "'");
    let s = DASHES.replace_all(&s, "-");
    let s = WS_RUN.replace_all(&s, " ");
    s.trim().to_string()
}

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// Fuzzy title comparison, ignoring punctuation and case.
///
/// PDF extraction can mangle ligatures (fi, fl) and drop characters, so a
/// plain equality check misses real matches. Compares the alphanumeric
/// skeletons: exact substring first, then a similarity ratio.
pub(crate) fn titles_match(a: &str, b: &str) -> bool {
    let na = NON_ALNUM.replace_all(&a.to_lowercase(), "").to_string();
    let nb = NON_ALNUM.replace_all(&b.to_lowercase(), "").to_string();
    if na.len() < 4 || nb.len() < 4 {
        return false;
    }
    if na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    strsim::normalized_levenshtein(&na, &nb) >= 0.75
}

pub(crate) fn median_f32(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

pub(crate) fn median_i64(values: &mut [i64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2
    }
}

/// Multi-pass PDF chapter detection. The first path yielding at least two
/// chapters wins and names the detection method; page chunking always
/// succeeds as the last resort.
pub fn analyze_pdf_scan(scan: &BookScan, max_chapters: usize) -> (Vec<Chapter>, &'static str) {
    let boundaries = headings::detect_boundaries(scan);

    if let Some(entries) = toc::parse_printed_toc(scan)
        && entries.len() >= 3
    {
        let chapters = align::align_toc_to_boundaries(&entries, &boundaries, scan);
        if chapters.len() >= 2 {
            info!(target: "analyzer", chapters = chapters.len(), "printed contents aligned");
            return finish(chapters, "toc", max_chapters);
        }
    }

    if let Some(chapters) = fallback::from_outline(scan, &boundaries) {
        info!(target: "analyzer", chapters = chapters.len(), "embedded outline used");
        return finish(chapters, "toc", max_chapters);
    }

    if let Some(chapters) = fallback::from_headings(scan, &boundaries) {
        info!(target: "analyzer", chapters = chapters.len(), "heading boundaries used");
        return finish(chapters, "headings", max_chapters);
    }

    let chapters = fallback::page_chunks(scan);
    info!(target: "analyzer", sections = chapters.len(), "no structure found, page chunking");
    finish(chapters, "auto_sections", max_chapters)
}

/// Chapters built from caller-supplied page segments (premium manual mode).
pub fn chapters_from_segments(
    scan: &BookScan,
    segments: &[ManualSegment],
    max_chapters: usize,
) -> Result<(Vec<Chapter>, &'static str), String> {
    if segments.is_empty() {
        return Err("At least one segment is required.".to_string());
    }
    let total = scan.page_count();
    let mut chapters = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        if segment.start_page < 1 || segment.end_page < segment.start_page {
            return Err(format!(
                "Segment {} has an invalid page range {}-{}.",
                i + 1,
                segment.start_page,
                segment.end_page
            ));
        }
        if segment.end_page > total {
            return Err(format!(
                "Segment {} ends at page {} but the document has {} pages.",
                i + 1,
                segment.end_page,
                total
            ));
        }
        let title = {
            let trimmed = segment.name.trim();
            if trimmed.is_empty() {
                format!("Segment {}", i + 1)
            } else {
                trimmed.to_string()
            }
        };
        let text = scan.range_text(segment.start_page - 1, segment.end_page);
        let word_count = text.split_whitespace().count();
        chapters.push(Chapter {
            index: chapters.len(),
            section_type: SectionType::Chapter,
            chapter_number: None,
            title,
            chapter_label: String::new(),
            page_start: Some(segment.start_page),
            page_end: Some(segment.end_page),
            word_count,
            text,
            text_clean: String::new(),
        });
    }
    Ok(finish(chapters, "manual", max_chapters))
}

/// Final pass for every detection path: cap the chapter count, densify
/// indices, resolve labels, and normalize narration text.
pub(crate) fn finish(
    mut chapters: Vec<Chapter>,
    method: &'static str,
    max_chapters: usize,
) -> (Vec<Chapter>, &'static str) {
    if chapters.len() > max_chapters {
        warn!(
            target: "analyzer",
            detected = chapters.len(),
            cap = max_chapters,
            "chapter cap reached, truncating"
        );
        chapters.truncate(max_chapters);
    }
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = i;
        if chapter.section_type == SectionType::Unknown {
            chapter.section_type = SectionType::Chapter;
        }
        chapter.chapter_label = match (chapter.section_type, chapter.chapter_number) {
            (SectionType::Chapter, Some(n)) => format!("Ch. {n}"),
            _ => String::new(),
        };
        chapter.text_clean = clean_for_tts(&chapter.text);
    }
    (chapters, method)
}
