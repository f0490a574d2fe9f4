//! Pass 3: align printed-TOC entries to detected heading boundaries.

use std::collections::HashSet;

use tracing::{debug, info};

use super::headings::Boundary;
use super::toc::TocEntry;
use super::{Chapter, SectionType, median_i64, titles_match};
use crate::book_parser::pdf_reader::BookScan;

// A calibrated page guess is trusted within this window.
const PAGE_WINDOW: i64 = 3;
const MIN_CHAPTER_WORDS: usize = 30;

struct AlignedEntry {
    start_page: usize,
    chapter_number: Option<u32>,
    kind: SectionType,
    title: String,
}

/// Derive the offset between printed page numbers and PDF page indices, then
/// pin every TOC entry to a boundary (by chapter number, page proximity, or
/// fuzzy title) and cut the book at the resulting start pages.
pub(crate) fn align_toc_to_boundaries(
    entries: &[TocEntry],
    boundaries: &[Boundary],
    scan: &BookScan,
) -> Vec<Chapter> {
    let total_pages = scan.page_count();

    // Calibrate: books usually start printed page 1 after the front matter,
    // so printed "page 7" may be PDF page 10.
    let mut offsets: Vec<i64> = Vec::new();
    for entry in entries {
        let (Some(toc_page), Some(number)) = (entry.toc_page, entry.chapter_number) else {
            continue;
        };
        if let Some(boundary) = boundaries
            .iter()
            .find(|b| b.chapter_number == Some(number) && b.kind == SectionType::Chapter)
        {
            offsets.push(boundary.page as i64 - (toc_page as i64 - 1));
        }
    }
    if offsets.is_empty() {
        for entry in entries {
            let Some(toc_page) = entry.toc_page else {
                continue;
            };
            if entry.kind != SectionType::FrontMatter {
                continue;
            }
            let entry_low = entry.title.to_lowercase();
            if let Some(boundary) = boundaries.iter().find(|b| {
                if b.kind != SectionType::FrontMatter {
                    return false;
                }
                let b_low = b.heading_text.to_lowercase();
                !b_low.is_empty() && (b_low.contains(&entry_low) || entry_low.contains(&b_low))
            }) {
                offsets.push(boundary.page as i64 - (toc_page as i64 - 1));
            }
        }
    }
    let page_offset = median_i64(&mut offsets);
    info!(target: "analyzer", offset = page_offset, "calibrated page offset");

    let mut used: HashSet<usize> = HashSet::new();
    let mut aligned: Vec<AlignedEntry> = Vec::new();

    for entry in entries {
        if entry.kind == SectionType::Part {
            // Structural dividers, not content chapters.
            continue;
        }

        let expected = entry.toc_page.map(|p| p as i64 - 1 + page_offset);
        let mut best: Option<&Boundary> = None;

        // Chapter-number match has the highest priority.
        if let Some(number) = entry.chapter_number {
            let mut candidates: Vec<&Boundary> = boundaries
                .iter()
                .filter(|b| b.chapter_number == Some(number) && !used.contains(&b.page))
                .collect();
            if !candidates.is_empty() {
                if let Some(expected) = expected {
                    candidates.sort_by_key(|b| (b.page as i64 - expected).abs());
                }
                best = Some(candidates[0]);
            }
        }

        // Calibrated page proximity.
        if best.is_none()
            && let Some(expected) = expected
        {
            best = boundaries
                .iter()
                .filter(|b| {
                    !used.contains(&b.page) && (b.page as i64 - expected).abs() <= PAGE_WINDOW
                })
                .min_by_key(|b| (b.page as i64 - expected).abs());
        }

        // Fuzzy title match last; survives ligature drops in extraction.
        if best.is_none() {
            best = boundaries.iter().find(|b| {
                !used.contains(&b.page)
                    && !b.heading_text.is_empty()
                    && titles_match(&entry.title, &b.heading_text)
            });
        }

        let (start_page, chapter_number, kind) = match best {
            Some(boundary) => {
                used.insert(boundary.page);
                let number = entry.chapter_number.or(boundary.chapter_number);
                let kind = if entry.kind == SectionType::Chapter
                    && matches!(
                        boundary.kind,
                        SectionType::FrontMatter | SectionType::BackMatter
                    ) {
                    boundary.kind
                } else {
                    entry.kind
                };
                (boundary.page, number, kind)
            }
            None => match expected {
                Some(expected) => (expected.max(0) as usize, entry.chapter_number, entry.kind),
                None => {
                    debug!(target: "analyzer", title = %entry.title, "entry has no locatable page");
                    continue;
                }
            },
        };

        aligned.push(AlignedEntry {
            start_page,
            chapter_number,
            kind,
            title: entry.title.clone(),
        });
    }

    aligned.sort_by_key(|a| a.start_page);
    aligned.dedup_by_key(|a| a.start_page);

    let mut chapters: Vec<Chapter> = Vec::new();
    for (i, item) in aligned.iter().enumerate() {
        let start = item.start_page;
        let end = aligned
            .get(i + 1)
            .map(|next| next.start_page)
            .unwrap_or(total_pages);
        let text = scan.range_text(start, end);
        let word_count = text.split_whitespace().count();
        if word_count < MIN_CHAPTER_WORDS {
            continue;
        }
        chapters.push(Chapter {
            index: chapters.len(),
            section_type: item.kind,
            chapter_number: item.chapter_number,
            title: item.title.clone(),
            chapter_label: String::new(),
            page_start: Some(start + 1),
            page_end: Some(end.min(total_pages).max(start + 1)),
            word_count,
            text,
            text_clean: String::new(),
        });
    }
    chapters
}

#[cfg(test)]
mod tests {
    use super::super::headings::Boundary;
    use super::super::toc::TocEntry;
    use super::super::testutil::{body_page, scan_of};
    use super::*;

    fn entry(kind: SectionType, number: Option<u32>, title: &str, page: Option<u32>) -> TocEntry {
        TocEntry {
            kind,
            chapter_number: number,
            title: title.to_string(),
            toc_page: page,
        }
    }

    fn boundary(page: usize, kind: SectionType, number: Option<u32>, text: &str) -> Boundary {
        Boundary {
            page,
            heading_text: text.to_string(),
            font_size: 24.0,
            chapter_number: number,
            kind,
        }
    }

    fn fifty_page_scan() -> crate::book_parser::pdf_reader::BookScan {
        scan_of((0..52).map(|_| body_page(40)).collect())
    }

    #[test]
    fn number_match_with_offset_calibration() {
        // Printed pages 7/23/45, PDF pages 10/26/48 → offset +4.
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "Beginnings", Some(7)),
            entry(SectionType::Chapter, Some(2), "Middles", Some(23)),
            entry(SectionType::Chapter, Some(3), "Ends", Some(45)),
        ];
        let boundaries = vec![
            boundary(10, SectionType::Chapter, Some(1), "Beginnings"),
            boundary(26, SectionType::Chapter, Some(2), "Middles"),
            boundary(48, SectionType::Chapter, Some(3), "Ends"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 3);
        assert_eq!(
            chapters.iter().map(|c| c.page_start).collect::<Vec<_>>(),
            vec![Some(11), Some(27), Some(49)]
        );
        assert_eq!(chapters[0].page_end, Some(26));
        assert_eq!(chapters[2].page_end, Some(52));
    }

    #[test]
    fn proximity_assignment_for_unnumbered_entries() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "One", Some(5)),
            entry(SectionType::Chapter, None, "The Nameless Middle", Some(20)),
            entry(SectionType::Chapter, Some(3), "Three", Some(40)),
        ];
        let boundaries = vec![
            boundary(4, SectionType::Chapter, Some(1), "One"),
            boundary(21, SectionType::Unknown, None, "Something Else Entirely"),
            boundary(39, SectionType::Chapter, Some(3), "Three"),
        ];
        // offset = 0 from the numbered matches
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 3);
        // expected page 19, boundary at 21 is within the ±3 window
        assert_eq!(chapters[1].page_start, Some(22));
    }

    #[test]
    fn fuzzy_title_match_rescues_mangled_extraction() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, None, "The Final Frontier", None),
            entry(SectionType::Chapter, None, "Afterward Thoughts", Some(40)),
        ];
        // the "fi" ligature was dropped by extraction
        let boundaries = vec![
            boundary(12, SectionType::Unknown, None, "The nal Frontier"),
            boundary(40, SectionType::Unknown, None, "Afterward Thoughts"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].page_start, Some(13));
    }

    #[test]
    fn unmatched_entry_falls_back_to_expected_page() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "One", Some(11)),
            entry(SectionType::Chapter, Some(2), "Two", Some(31)),
        ];
        let boundaries = vec![boundary(10, SectionType::Chapter, Some(1), "One")];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 2);
        // offset 0; entry two placed at printed page 31 → index 30
        assert_eq!(chapters[1].page_start, Some(31));
    }

    #[test]
    fn boundary_kind_upgrades_chapter_to_front_matter() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, None, "Preface to the Storm", Some(2)),
            entry(SectionType::Chapter, Some(1), "One", Some(10)),
            entry(SectionType::Chapter, Some(2), "Two", Some(30)),
        ];
        let boundaries = vec![
            boundary(1, SectionType::FrontMatter, None, "Preface to the Storm"),
            boundary(9, SectionType::Chapter, Some(1), "One"),
            boundary(29, SectionType::Chapter, Some(2), "Two"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters[0].section_type, SectionType::FrontMatter);
    }

    #[test]
    fn entries_without_pages_or_matches_are_dropped() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "One", Some(5)),
            entry(SectionType::Chapter, None, "Phantom Entry", None),
            entry(SectionType::Chapter, Some(2), "Two", Some(25)),
        ];
        let boundaries = vec![
            boundary(4, SectionType::Chapter, Some(1), "One"),
            boundary(24, SectionType::Chapter, Some(2), "Two"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 2);
    }

    #[test]
    fn duplicate_start_pages_keep_the_first_entry() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "One", Some(5)),
            entry(SectionType::Chapter, None, "Shadow", Some(5)),
            entry(SectionType::Chapter, Some(2), "Two", Some(25)),
        ];
        let boundaries = vec![
            boundary(4, SectionType::Chapter, Some(1), "One"),
            boundary(24, SectionType::Chapter, Some(2), "Two"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "One");
        // strictly increasing page starts
        let starts: Vec<_> = chapters.iter().map(|c| c.page_start.unwrap()).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn parts_never_become_chapters() {
        let scan = fifty_page_scan();
        let entries = vec![
            entry(SectionType::Part, Some(1), "Part I", Some(3)),
            entry(SectionType::Chapter, Some(1), "One", Some(5)),
            entry(SectionType::Chapter, Some(2), "Two", Some(25)),
        ];
        let boundaries = vec![
            boundary(4, SectionType::Chapter, Some(1), "One"),
            boundary(24, SectionType::Chapter, Some(2), "Two"),
        ];
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert!(chapters.iter().all(|c| c.section_type != SectionType::Part));
    }

    #[test]
    fn short_chapters_are_filtered() {
        // Body pages carry 40 words; a 0-page span yields nothing.
        let scan = scan_of(vec![body_page(10); 4]);
        let entries = vec![
            entry(SectionType::Chapter, Some(1), "One", Some(1)),
            entry(SectionType::Chapter, Some(2), "Two", Some(3)),
        ];
        let boundaries = vec![
            boundary(0, SectionType::Chapter, Some(1), "One"),
            boundary(2, SectionType::Chapter, Some(2), "Two"),
        ];
        // each chapter spans two 10-word pages → 20 words < 30
        let chapters = align_toc_to_boundaries(&entries, &boundaries, &scan);
        assert!(chapters.is_empty());
    }
}
