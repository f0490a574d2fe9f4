//! Pass 1: find and parse the printed table of contents.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use super::numbers::parse_number;
use super::{SectionType, keyword_kind, normalize_ws};
use crate::book_parser::pdf_reader::BookScan;

// Contents pages live near the front of the book.
const TOC_SCAN_PAGES: usize = 30;
// A printed TOC rarely spans more than a handful of pages.
const TOC_MAX_SPAN: usize = 7;
// Share of TOC-looking lines required to treat a page as a continuation.
const TOC_SIGNAL_RATIO: f32 = 0.25;

#[derive(Debug, Clone)]
pub(crate) struct TocEntry {
    pub kind: SectionType,
    pub chapter_number: Option<u32>,
    pub title: String,
    /// Printed page number, as it appears in the book body.
    pub toc_page: Option<u32>,
}

static TOC_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:table\s+of\s+)?contents\s*$").unwrap());

// Trailing page number after dot leaders or whitespace.
static PAGE_NUM_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s.]+(\d{1,4})\s*$").unwrap());

static NUMBERED_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}\s*[.):]").unwrap());

static TOC_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:chapter|part|appendix|introduction|preface|epilogue|conclusion|bibliography|acknowledgment|index|glossary|notes)\b",
    )
    .unwrap()
});

static PART_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*part\s+(\d+|[IVXLCDM]+|\w+)\s*[.:)_\-\s]*(.*)$").unwrap());

static CHAPTER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*chapter\s+(\d+|[IVXLCDM]+|\w+)\s*[.:)_\-\s]*(.*)$").unwrap());

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3})\s*[.):]\s+(.+)$").unwrap());

static DOT_LEADERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3,}").unwrap());

static LEADING_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^a-zA-Z0-9]+").unwrap());

static APPENDIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^appendix").unwrap());

fn is_bare_number(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
}

fn is_toc_signal(line: &str) -> bool {
    PAGE_NUM_TAIL.is_match(line)
        || (is_bare_number(line)
            && line
                .parse::<u32>()
                .map(|n| (1..=999).contains(&n))
                .unwrap_or(false))
        || NUMBERED_PREFIX.is_match(line)
        || TOC_KEYWORD.is_match(line)
}

/// Locate the printed-TOC page range, 0-based `[start, end)`.
///
/// A page begins the TOC when one of its first five non-empty lines is a
/// CONTENTS header. Following pages count as continuations while at least a
/// quarter of their lines look like TOC entries.
pub(crate) fn find_toc_pages(scan: &BookScan) -> Option<(usize, usize)> {
    let limit = scan.pages.len().min(TOC_SCAN_PAGES);
    for pg in 0..limit {
        let mut anchored = false;
        let mut checked = 0;
        for line in scan.pages[pg].text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if TOC_ANCHOR.is_match(line) {
                anchored = true;
                break;
            }
            checked += 1;
            if checked >= 5 {
                break;
            }
        }
        if !anchored {
            continue;
        }

        let mut end = pg + 1;
        let span_limit = scan.pages.len().min(pg + 1 + TOC_MAX_SPAN);
        for candidate in (pg + 1)..span_limit {
            let lines: Vec<&str> = scan.pages[candidate]
                .text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            if lines.is_empty() {
                break;
            }
            let signals = lines.iter().filter(|l| is_toc_signal(l)).count();
            if signals as f32 / lines.len() as f32 >= TOC_SIGNAL_RATIO {
                end = candidate + 1;
            } else {
                break;
            }
        }
        return Some((pg, end));
    }
    None
}

/// Find and parse the printed TOC. `None` when the book has none worth using.
pub(crate) fn parse_printed_toc(scan: &BookScan) -> Option<Vec<TocEntry>> {
    let (start, end) = find_toc_pages(scan)?;
    info!(
        target: "analyzer",
        first_page = start + 1,
        last_page = end,
        "found printed contents"
    );

    let mut toc_text = String::new();
    for pg in start..end {
        toc_text.push_str(&scan.pages[pg].text);
        toc_text.push('\n');
    }

    let entries = parse_toc_text(&toc_text);
    if entries.len() < 2 {
        debug!(target: "analyzer", parsed = entries.len(), "too few contents entries");
        return None;
    }
    info!(target: "analyzer", parsed = entries.len(), "parsed contents entries");
    Some(entries)
}

/// Parse raw contents text into structured entries.
pub(crate) fn parse_toc_text(toc_text: &str) -> Vec<TocEntry> {
    let lines: Vec<&str> = toc_text.split('\n').collect();
    let mut entries: Vec<TocEntry> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let mut line = normalize_ws(lines[i]);
        i += 1;

        if line.is_empty() || TOC_ANCHOR.is_match(&line) {
            continue;
        }

        // Trailing page number, if any.
        let mut page_num: Option<u32> = None;
        if let Some(caps) = PAGE_NUM_TAIL.captures(&line)
            && let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1))
        {
            page_num = digits.as_str().parse().ok();
            line = line[..whole.start()].trim().to_string();
        }

        // A line that is just a number is the page of the previous entry,
        // wrapped onto its own line.
        if is_bare_number(&line) {
            if let Ok(page) = line.parse::<u32>()
                && let Some(last) = entries.last_mut()
                && last.toc_page.is_none()
            {
                last.toc_page = Some(page);
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }

        line = normalize_ws(&DOT_LEADERS.replace_all(&line, " "));
        if line.is_empty() {
            continue;
        }

        let mut entry: Option<TocEntry> = None;

        if let Some(caps) = PART_LINE.captures(&line) {
            let num_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let full_title = if title.is_empty() {
                format!("Part {num_str}")
            } else {
                format!("Part {num_str}: {title}")
            };
            entry = Some(TocEntry {
                kind: SectionType::Part,
                chapter_number: parse_number(num_str),
                title: full_title,
                toc_page: page_num,
            });
        }

        if entry.is_none()
            && let Some(caps) = CHAPTER_LINE.captures(&line)
        {
            let num_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let number = parse_number(num_str);
            let mut title = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            title = LEADING_JUNK.replace(&title, "").to_string();
            if title.is_empty() {
                title = format!("Chapter {num_str}");
            }
            // A repeated chapter number is a subtitle line, not a new entry.
            if number.is_some() && entries.last().and_then(|e| e.chapter_number) == number {
                continue;
            }
            entry = Some(TocEntry {
                kind: SectionType::Chapter,
                chapter_number: number,
                title,
                toc_page: page_num,
            });
        }

        if entry.is_none()
            && let Some(caps) = NUMBERED_LINE.captures(&line)
        {
            let number: Option<u32> = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok());
            if number.is_some() && entries.last().and_then(|e| e.chapter_number) == number {
                continue;
            }
            entry = Some(TocEntry {
                kind: SectionType::Chapter,
                chapter_number: number,
                title: caps
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                toc_page: page_num,
            });
        }

        if entry.is_none()
            && let Some(kind) = keyword_kind(&line.to_lowercase(), true)
        {
            entry = Some(TocEntry {
                kind,
                chapter_number: None,
                title: line.clone(),
                toc_page: page_num,
            });
        }

        if entry.is_none() && line.chars().count() > 2 {
            if APPENDIX.is_match(&line) {
                entry = Some(TocEntry {
                    kind: SectionType::BackMatter,
                    chapter_number: None,
                    title: line.clone(),
                    toc_page: page_num,
                });
            } else if let Some(next) = lines.get(i).map(|l| l.trim())
                && is_bare_number(next)
                && let Ok(page) = next.parse::<u32>()
            {
                // Title-only line whose page number sits on the next line.
                entry = Some(TocEntry {
                    kind: SectionType::Chapter,
                    chapter_number: None,
                    title: line.clone(),
                    toc_page: Some(page),
                });
                i += 1;
            }
        }

        if let Some(entry) = entry {
            entries.push(entry);
        }
    }

    entries
}
