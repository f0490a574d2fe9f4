//! Pass 2: font-size heading boundaries.
//!
//! The median body font size anchors a heading threshold; any line in the
//! top half of a page whose biggest span clears it is a heading candidate.
//! At most one boundary is recorded per page.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::numbers::parse_number;
use super::{SectionType, keyword_kind, median_f32, normalize_ws};
use crate::book_parser::pdf_reader::BookScan;

// Headings are at least this much bigger than body text.
const HEADING_RATIO: f32 = 1.25;
// Unmarked headings need a stronger size signal to count.
const UNKNOWN_RATIO: f32 = 1.4;

#[derive(Debug, Clone)]
pub(crate) struct Boundary {
    /// 0-based page index.
    pub page: usize,
    pub heading_text: String,
    pub font_size: f32,
    pub chapter_number: Option<u32>,
    pub kind: SectionType,
}

static CHAPTER_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^chapter\s+(\d+|[IVXLCDM]+|\w+)\s*$").unwrap());

static PART_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^part\s+(\d+|[IVXLCDM]+|\w+)\s*$").unwrap());

/// Scan every page for heading-sized lines marking chapter or part starts.
/// Returns boundaries sorted by page.
pub(crate) fn detect_boundaries(scan: &BookScan) -> Vec<Boundary> {
    // Survey font sizes of substantive spans to find the body size.
    let mut sizes: Vec<f32> = Vec::new();
    for page in &scan.pages {
        for line in &page.lines {
            for span in &line.spans {
                if span.font_size > 0.0 && span.text.trim().chars().count() > 2 {
                    sizes.push(span.font_size);
                }
            }
        }
    }
    if sizes.is_empty() {
        return Vec::new();
    }
    let median_size = median_f32(&mut sizes);
    let threshold = median_size * HEADING_RATIO;
    debug!(
        target: "analyzer",
        median = median_size,
        threshold,
        "font size survey"
    );

    let mut boundaries = Vec::new();
    for (page_index, page) in scan.pages.iter().enumerate() {
        let top_half = page.height * 0.5;

        let mut large: Vec<(f32, String, f32)> = page
            .lines
            .iter()
            .filter(|line| line.y <= top_half)
            .filter_map(|line| {
                let text = line.joined_text();
                let size = line.max_font_size();
                (!text.is_empty() && size >= threshold).then(|| (line.y, text, size))
            })
            .collect();
        if large.is_empty() {
            continue;
        }
        large.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut found: Option<(SectionType, Option<u32>, String)> = None;
        for (index, (_, raw, size)) in large.iter().enumerate() {
            let text = normalize_ws(raw);

            if let Some(caps) = CHAPTER_HEADING.captures(&text)
                && let Some(number) = caps.get(1).and_then(|m| parse_number(m.as_str()))
            {
                // The chapter title usually sits on the next large line.
                let heading = large
                    .get(index + 1)
                    .map(|(_, t, _)| normalize_ws(t))
                    .unwrap_or_else(|| format!("Chapter {number}"));
                found = Some((SectionType::Chapter, Some(number), heading));
                break;
            }

            if let Some(caps) = PART_HEADING.captures(&text) {
                let number = caps.get(1).and_then(|m| parse_number(m.as_str()));
                let heading = large
                    .get(index + 1)
                    .map(|(_, t, _)| normalize_ws(t))
                    .unwrap_or_else(|| text.clone());
                found = Some((SectionType::Part, number, heading));
                break;
            }

            if let Some(kind) = keyword_kind(&text.to_lowercase(), false) {
                found = Some((kind, None, text));
                break;
            }

            let len = text.chars().count();
            if *size >= median_size * UNKNOWN_RATIO && len > 2 && len <= 80 {
                found = Some((SectionType::Unknown, None, text));
                break;
            }
        }

        if let Some((kind, chapter_number, heading_text)) = found {
            boundaries.push(Boundary {
                page: page_index,
                heading_text,
                font_size: large[0].2,
                chapter_number,
                kind,
            });
        }
    }

    debug!(target: "analyzer", boundaries = boundaries.len(), "heading boundaries detected");
    boundaries
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{body_page, heading_page, scan_of};
    use super::*;

    #[test]
    fn chapter_heading_with_title_line() {
        let mut pages = vec![body_page(60), body_page(60), body_page(60)];
        pages.insert(
            1,
            heading_page(&[("CHAPTER 3", 24.0), ("The Reckoning", 20.0)], 80),
        );
        let scan = scan_of(pages);
        let boundaries = detect_boundaries(&scan);
        assert_eq!(boundaries.len(), 1);
        let b = &boundaries[0];
        assert_eq!(b.page, 1);
        assert_eq!(b.kind, SectionType::Chapter);
        assert_eq!(b.chapter_number, Some(3));
        assert_eq!(b.heading_text, "The Reckoning");
    }

    #[test]
    fn part_heading_detected() {
        let pages = vec![
            body_page(60),
            heading_page(&[("PART TWO", 26.0)], 80),
            body_page(60),
        ];
        let boundaries = detect_boundaries(&scan_of(pages));
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, SectionType::Part);
        assert_eq!(boundaries[0].chapter_number, Some(2));
    }

    #[test]
    fn front_matter_keyword_heading() {
        let pages = vec![
            heading_page(&[("INTRODUCTION", 22.0)], 80),
            body_page(60),
        ];
        let boundaries = detect_boundaries(&scan_of(pages));
        assert_eq!(boundaries[0].kind, SectionType::FrontMatter);
        assert_eq!(boundaries[0].heading_text, "INTRODUCTION");
    }

    #[test]
    fn unmarked_heading_needs_stronger_signal() {
        // 1.3x the median: over the 1.25 heading bar, under the 1.4 unknown bar.
        let weak = vec![
            heading_page(&[("A Mild Heading", 15.6)], 80),
            body_page(60),
            body_page(60),
        ];
        assert!(detect_boundaries(&scan_of(weak)).is_empty());

        let strong = vec![
            heading_page(&[("A Loud Heading", 18.0)], 80),
            body_page(60),
            body_page(60),
        ];
        let boundaries = detect_boundaries(&scan_of(strong));
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].kind, SectionType::Unknown);
        assert_eq!(boundaries[0].heading_text, "A Loud Heading");
    }

    #[test]
    fn lower_half_headings_are_ignored() {
        let mut page = heading_page(&[("CHAPTER 1", 24.0)], 80);
        for line in &mut page.lines {
            line.y += 500.0; // push everything below the fold
        }
        let scan = scan_of(vec![page, body_page(60)]);
        assert!(detect_boundaries(&scan).is_empty());
    }

    #[test]
    fn one_boundary_per_page() {
        let pages = vec![
            heading_page(&[("PART ONE", 26.0), ("CHAPTER 1", 24.0)], 80),
            body_page(60),
        ];
        let boundaries = detect_boundaries(&scan_of(pages));
        assert_eq!(boundaries.len(), 1);
        // topmost qualifying line wins
        assert_eq!(boundaries[0].kind, SectionType::Part);
    }

    #[test]
    fn no_spans_no_boundaries() {
        let scan = scan_of(vec![]);
        assert!(detect_boundaries(&scan).is_empty());
    }
}
