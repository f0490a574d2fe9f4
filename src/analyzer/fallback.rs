//! Detection paths for books without a usable printed TOC: the embedded
//! outline, bare heading boundaries, and fixed page chunks.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::headings::Boundary;
use super::numbers::parse_number;
use super::{Chapter, SectionType, keyword_kind, normalize_ws};
use crate::book_parser::pdf_reader::BookScan;

const MIN_OUTLINE_WORDS: usize = 50;
const MIN_HEADING_WORDS: usize = 100;
const PAGE_CHUNK_SIZE: usize = 20;
// A boundary this close to an outline entry can lend it a chapter number.
const NUMBER_INHERIT_WINDOW: i64 = 2;

static PART_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^part\s+(\d+|[IVXLCDM]+|\w+)").unwrap());
static CHAPTER_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^chapter\s+(\d+|[IVXLCDM]+|\w+)").unwrap());

/// Build chapters from the embedded outline, using the deepest level that
/// yields at least three entries (ties go to the larger entry set).
pub(crate) fn from_outline(scan: &BookScan, boundaries: &[Boundary]) -> Option<Vec<Chapter>> {
    if scan.outline.is_empty() {
        return None;
    }

    let levels: BTreeSet<u32> = scan.outline.iter().map(|e| e.level).collect();
    let mut best: Option<Vec<&crate::book_parser::pdf_reader::OutlineEntry>> = None;
    for try_level in levels.iter().rev() {
        let entries: Vec<_> = scan
            .outline
            .iter()
            .filter(|e| e.level <= *try_level)
            .collect();
        if entries.len() >= 3 && best.as_ref().map(|b| entries.len() > b.len()).unwrap_or(true) {
            best = Some(entries);
        }
    }
    let best = best?;
    if best.len() < 2 {
        return None;
    }
    info!(target: "analyzer", entries = best.len(), "selected outline entries");

    let total = scan.page_count();
    let mut chapters: Vec<Chapter> = Vec::new();
    for (i, entry) in best.iter().enumerate() {
        let start = entry.page.min(total.saturating_sub(1));
        let end = best.get(i + 1).map(|next| next.page).unwrap_or(total);
        let text = scan.range_text(start, end.max(start));
        let word_count = text.split_whitespace().count();
        if word_count < 30 {
            continue;
        }

        let title = normalize_ws(&entry.title);
        let mut section_type = SectionType::Chapter;
        let mut chapter_number = None;

        if let Some(caps) = PART_TITLE.captures(&title) {
            section_type = SectionType::Part;
            chapter_number = caps.get(1).and_then(|m| parse_number(m.as_str()));
        }
        if let Some(caps) = CHAPTER_TITLE.captures(&title) {
            section_type = SectionType::Chapter;
            chapter_number = caps.get(1).and_then(|m| parse_number(m.as_str()));
        }
        if let Some(kind) = keyword_kind(&title.to_lowercase(), true) {
            section_type = kind;
        }

        // A numberless chapter can inherit its number from a heading
        // boundary detected on (or next to) the same page.
        if chapter_number.is_none() && section_type == SectionType::Chapter {
            chapter_number = boundaries
                .iter()
                .find(|b| {
                    (b.page as i64 - start as i64).abs() <= NUMBER_INHERIT_WINDOW
                        && b.chapter_number.is_some()
                })
                .and_then(|b| b.chapter_number);
        }

        chapters.push(Chapter {
            index: chapters.len(),
            section_type,
            chapter_number,
            title,
            chapter_label: String::new(),
            page_start: Some(start + 1),
            page_end: Some(end.min(total).max(start + 1)),
            word_count,
            text,
            text_clean: String::new(),
        });
    }

    chapters.retain(|c| c.word_count >= MIN_OUTLINE_WORDS);
    if chapters.len() < 2 {
        debug!(target: "analyzer", "outline produced too few usable chapters");
        return None;
    }
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = i;
    }
    Some(chapters)
}

/// Build chapters from heading boundaries alone. Requires at least two
/// non-part boundaries and a real amount of text per chapter.
pub(crate) fn from_headings(scan: &BookScan, boundaries: &[Boundary]) -> Option<Vec<Chapter>> {
    if boundaries.len() < 2 {
        return None;
    }
    let significant: Vec<&Boundary> = boundaries
        .iter()
        .filter(|b| b.kind != SectionType::Part)
        .collect();
    if significant.len() < 2 {
        return None;
    }

    let total = scan.page_count();
    let mut chapters: Vec<Chapter> = Vec::new();
    for (i, boundary) in significant.iter().enumerate() {
        let start = boundary.page;
        let end = significant
            .get(i + 1)
            .map(|next| next.page)
            .unwrap_or(total);
        let text = scan.range_text(start, end);
        let word_count = text.split_whitespace().count();
        if word_count < MIN_HEADING_WORDS {
            continue;
        }
        chapters.push(Chapter {
            index: chapters.len(),
            section_type: boundary.kind,
            chapter_number: boundary.chapter_number,
            title: boundary.heading_text.clone(),
            chapter_label: String::new(),
            page_start: Some(start + 1),
            page_end: Some(end.min(total).max(start + 1)),
            word_count,
            text,
            text_clean: String::new(),
        });
    }

    if chapters.len() < 2 {
        return None;
    }
    for (i, chapter) in chapters.iter_mut().enumerate() {
        chapter.index = i;
    }
    Some(chapters)
}

/// Last resort: fixed 20-page sections.
pub(crate) fn page_chunks(scan: &BookScan) -> Vec<Chapter> {
    let total = scan.page_count();
    let mut chapters = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + PAGE_CHUNK_SIZE).min(total);
        let text = scan.range_text(start, end);
        let word_count = text.split_whitespace().count();
        chapters.push(Chapter {
            index: chapters.len(),
            section_type: SectionType::Chapter,
            chapter_number: None,
            title: format!("Section {} (Pages {}-{})", chapters.len() + 1, start + 1, end),
            chapter_label: String::new(),
            page_start: Some(start + 1),
            page_end: Some(end),
            word_count,
            text,
            text_clean: String::new(),
        });
        start = end;
    }
    chapters
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{body_page, heading_page, scan_of};
    use super::*;
    use crate::book_parser::pdf_reader::OutlineEntry;

    fn outline(entries: &[(u32, &str, usize)]) -> Vec<OutlineEntry> {
        entries
            .iter()
            .map(|(level, title, page)| OutlineEntry {
                level: *level,
                title: (*title).to_string(),
                page: *page,
            })
            .collect()
    }

    #[test]
    fn outline_builds_classified_chapters() {
        let mut scan = scan_of((0..40).map(|_| body_page(40)).collect());
        scan.outline = outline(&[
            (1, "Introduction", 0),
            (1, "Chapter 1: Old Ways", 5),
            (1, "Chapter 2: New Ways", 20),
            (1, "Appendix", 35),
        ]);
        let chapters = from_outline(&scan, &[]).unwrap();
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[0].section_type, SectionType::FrontMatter);
        assert_eq!(chapters[1].chapter_number, Some(1));
        assert_eq!(chapters[1].page_start, Some(6));
        assert_eq!(chapters[1].page_end, Some(20));
        assert_eq!(chapters[3].section_type, SectionType::BackMatter);
        assert_eq!(chapters[3].page_end, Some(40));
    }

    #[test]
    fn outline_number_inheritance_from_boundaries() {
        let mut scan = scan_of((0..30).map(|_| body_page(40)).collect());
        scan.outline = outline(&[
            (1, "The Quiet Opening", 0),
            (1, "A Storm Gathers", 10),
            (1, "Landfall", 20),
        ]);
        let boundaries = vec![Boundary {
            page: 11,
            heading_text: "A Storm Gathers".into(),
            font_size: 24.0,
            chapter_number: Some(2),
            kind: SectionType::Chapter,
        }];
        let chapters = from_outline(&scan, &boundaries).unwrap();
        assert_eq!(chapters[1].chapter_number, Some(2));
        assert_eq!(chapters[0].chapter_number, None);
    }

    #[test]
    fn outline_with_too_few_entries_is_rejected() {
        let mut scan = scan_of((0..10).map(|_| body_page(40)).collect());
        scan.outline = outline(&[(1, "Only", 0), (1, "Two", 5)]);
        assert!(from_outline(&scan, &[]).is_none());
    }

    #[test]
    fn outline_short_entries_are_dropped() {
        let mut scan = scan_of((0..30).map(|_| body_page(40)).collect());
        // middle entry spans zero pages → no words
        scan.outline = outline(&[
            (1, "One", 0),
            (1, "Ghost", 10),
            (1, "Ghost Twin", 10),
            (1, "Two", 20),
        ]);
        let chapters = from_outline(&scan, &[]).unwrap();
        assert_eq!(chapters.len(), 3);
        assert!(chapters.iter().all(|c| c.word_count >= 50));
        assert_eq!(
            chapters.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn headings_only_builds_chapters() {
        let pages = vec![
            heading_page(&[("CHAPTER 1", 24.0)], 120),
            body_page(120),
            heading_page(&[("CHAPTER 2", 24.0)], 120),
            body_page(120),
        ];
        let scan = scan_of(pages);
        let boundaries = vec![
            Boundary {
                page: 0,
                heading_text: "First".into(),
                font_size: 24.0,
                chapter_number: Some(1),
                kind: SectionType::Chapter,
            },
            Boundary {
                page: 2,
                heading_text: "Second".into(),
                font_size: 24.0,
                chapter_number: Some(2),
                kind: SectionType::Chapter,
            },
        ];
        let chapters = from_headings(&scan, &boundaries).unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "First");
        assert_eq!(chapters[0].page_start, Some(1));
        assert_eq!(chapters[0].page_end, Some(2));
        assert_eq!(chapters[1].page_start, Some(3));
        assert_eq!(chapters[1].page_end, Some(4));
    }

    #[test]
    fn headings_only_requires_two_significant_boundaries() {
        let scan = scan_of(vec![body_page(200), body_page(200)]);
        let part = Boundary {
            page: 0,
            heading_text: "PART ONE".into(),
            font_size: 24.0,
            chapter_number: Some(1),
            kind: SectionType::Part,
        };
        let chapter = Boundary {
            page: 1,
            heading_text: "One".into(),
            font_size: 24.0,
            chapter_number: Some(1),
            kind: SectionType::Chapter,
        };
        assert!(from_headings(&scan, &[part.clone(), chapter]).is_none());
        assert!(from_headings(&scan, &[part]).is_none());
    }

    #[test]
    fn headings_only_enforces_word_floor() {
        let pages = vec![body_page(30), body_page(30), body_page(30)];
        let scan = scan_of(pages);
        let mk = |page| Boundary {
            page,
            heading_text: format!("H{page}"),
            font_size: 24.0,
            chapter_number: None,
            kind: SectionType::Unknown,
        };
        // each span carries well under 100 words
        assert!(from_headings(&scan, &[mk(0), mk(1), mk(2)]).is_none());
    }

    #[test]
    fn page_chunks_cover_the_book() {
        let scan = scan_of((0..83).map(|_| body_page(40)).collect());
        let chapters = page_chunks(&scan);
        assert_eq!(chapters.len(), 5);
        let ranges: Vec<(usize, usize)> = chapters
            .iter()
            .map(|c| (c.page_start.unwrap(), c.page_end.unwrap()))
            .collect();
        assert_eq!(ranges, vec![(1, 20), (21, 40), (41, 60), (61, 80), (81, 83)]);
        assert_eq!(chapters[0].title, "Section 1 (Pages 1-20)");
        assert_eq!(chapters[4].title, "Section 5 (Pages 81-83)");
    }
}
