//! PDFium-backed PDF reader.
//!
//! Everything above this module consumes only the facade: plain page text,
//! typed span lines (text + font size + vertical position), the embedded
//! outline, and page counts. The chapter analyzer works on a [`BookScan`]
//! snapshot so it never touches the native library directly.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use super::ExtractError;

// Chars on the same visual line rarely drift more than this many points.
const LINE_Y_TOLERANCE: f32 = 2.0;
const FONT_SIZE_TOLERANCE: f32 = 0.1;

static PDFIUM: OnceLock<Pdfium> = OnceLock::new();

fn bind_from_env() -> Option<Box<dyn PdfiumLibraryBindings>> {
    if let Ok(raw) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(raw);
        let lib_path = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            return Some(bindings);
        }
        warn!(target: "pdf", "PDFIUM_LIB_PATH set but binding failed, trying system library");
    }
    None
}

fn pdfium() -> Result<&'static Pdfium, ExtractError> {
    if let Some(instance) = PDFIUM.get() {
        return Ok(instance);
    }
    let bindings = match bind_from_env() {
        Some(b) => b,
        None => Pdfium::bind_to_system_library().map_err(|e| ExtractError::Open {
            kind: "PDF",
            detail: format!("pdfium library not available: {e}"),
        })?,
    };
    Ok(PDFIUM.get_or_init(|| Pdfium::new(bindings)))
}

/// One text run with a uniform font size.
#[derive(Debug, Clone)]
pub struct TextSpan {
    pub text: String,
    pub font_size: f32,
}

/// All spans sharing a visual line. `y` is the distance from the page top.
#[derive(Debug, Clone)]
pub struct SpanLine {
    pub y: f32,
    pub spans: Vec<TextSpan>,
}

impl SpanLine {
    pub fn joined_text(&self) -> String {
        let parts: Vec<&str> = self
            .spans
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect();
        parts.join(" ")
    }

    pub fn max_font_size(&self) -> f32 {
        self.spans
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| s.font_size)
            .fold(0.0, f32::max)
    }
}

#[derive(Debug, Clone)]
pub struct PageScan {
    /// Raw page text with one entry per visual line.
    pub text: String,
    pub lines: Vec<SpanLine>,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct OutlineEntry {
    pub level: u32,
    pub title: String,
    /// 0-based page index.
    pub page: usize,
}

/// In-memory snapshot of a whole document, consumed by the chapter analyzer.
#[derive(Debug, Clone, Default)]
pub struct BookScan {
    pub pages: Vec<PageScan>,
    pub outline: Vec<OutlineEntry>,
}

impl BookScan {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Paragraph-joined text of the 0-based page range `[start, end)`.
    pub fn range_text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.pages.len());
        let mut parts = Vec::new();
        for page in &self.pages[start.min(end)..end] {
            let trimmed = page.text.trim();
            if trimmed.is_empty() {
                continue;
            }
            parts.push(rejoin_lines(trimmed));
        }
        parts.join("\n\n")
    }
}

pub struct PdfReader {
    document: PdfDocument<'static>,
}

impl PdfReader {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let document = pdfium()?.load_pdf_from_file(path, None).map_err(|e| {
            let detail = e.to_string();
            if detail.to_ascii_lowercase().contains("password") {
                ExtractError::EncryptedPdf
            } else {
                ExtractError::Open {
                    kind: "PDF",
                    detail,
                }
            }
        })?;
        if document.pages().len() == 0 {
            return Err(ExtractError::EmptyPdf);
        }
        Ok(Self { document })
    }

    pub fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    /// Plain text of a page with visual line breaks preserved.
    pub fn page_text(&self, index: usize) -> Result<String, ExtractError> {
        let page = self.page(index)?;
        let text = page.text().map_err(pdf_error)?.all();
        Ok(text.replace("\r\n", "\n").replace('\r', "\n"))
    }

    pub fn page_height(&self, index: usize) -> Result<f32, ExtractError> {
        Ok(self.page(index)?.height().value)
    }

    /// Typed span lines of a page, top to bottom, whitespace preserved.
    pub fn page_spans(&self, index: usize) -> Result<Vec<SpanLine>, ExtractError> {
        let page = self.page(index)?;
        let height = page.height().value;
        let text = page.text().map_err(pdf_error)?;

        let mut lines: Vec<SpanLine> = Vec::new();
        for ch in text.chars().iter() {
            let Some(glyph) = ch.unicode_char() else {
                continue;
            };
            if glyph == '\r' || glyph == '\n' {
                continue;
            }
            let Ok(bounds) = ch.loose_bounds() else {
                continue;
            };
            let y = height - bounds.top.value;
            let size = ch.unscaled_font_size().value;

            let start_new_line = match lines.last() {
                Some(line) => (line.y - y).abs() > LINE_Y_TOLERANCE,
                None => true,
            };
            if start_new_line {
                lines.push(SpanLine {
                    y,
                    spans: vec![TextSpan {
                        text: glyph.to_string(),
                        font_size: size,
                    }],
                });
                continue;
            }
            if let Some(line) = lines.last_mut() {
                match line.spans.last_mut() {
                    Some(span) if (span.font_size - size).abs() <= FONT_SIZE_TOLERANCE => {
                        span.text.push(glyph);
                    }
                    _ => line.spans.push(TextSpan {
                        text: glyph.to_string(),
                        font_size: size,
                    }),
                }
            }
        }

        lines.sort_by(|a, b| a.y.total_cmp(&b.y));
        Ok(lines)
    }

    /// Flattened embedded outline (bookmarks), depth first.
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut entries = Vec::new();
        if let Some(root) = self.document.bookmarks().root() {
            // The root node itself is a container; its siblings are the
            // top-level entries in most documents.
            collect_bookmark(&root, 1, &mut entries);
            let mut sibling = root.next_sibling();
            while let Some(node) = sibling {
                collect_bookmark(&node, 1, &mut entries);
                sibling = node.next_sibling();
            }
        }
        entries
    }

    /// Snapshot of the whole document for the chapter analyzer.
    pub fn scan(&self) -> Result<BookScan, ExtractError> {
        let count = self.page_count();
        let mut pages = Vec::with_capacity(count);
        for index in 0..count {
            let text = self.page_text(index)?;
            let lines = self.page_spans(index)?;
            let height = self.page_height(index)?;
            pages.push(PageScan {
                text,
                lines,
                height,
            });
        }
        let outline = self.outline();
        debug!(
            target: "pdf",
            pages = count,
            outline_entries = outline.len(),
            "scanned document"
        );
        Ok(BookScan { pages, outline })
    }

    fn page(&self, index: usize) -> Result<PdfPage<'_>, ExtractError> {
        self.document
            .pages()
            .get(index as u16)
            .map_err(pdf_error)
    }
}

fn collect_bookmark(node: &PdfBookmark, level: u32, out: &mut Vec<OutlineEntry>) {
    let title = node.title().unwrap_or_default();
    let page = node
        .destination()
        .and_then(|dest| dest.page_index().ok())
        .map(|index| index as usize);
    if let Some(page) = page
        && !title.trim().is_empty()
    {
        out.push(OutlineEntry {
            level,
            title: title.trim().to_string(),
            page,
        });
    }
    let mut child = node.first_child();
    while let Some(node) = child {
        collect_bookmark(&node, level + 1, out);
        child = node.next_sibling();
    }
}

fn pdf_error(e: PdfiumError) -> ExtractError {
    ExtractError::Open {
        kind: "PDF",
        detail: e.to_string(),
    }
}

static DOUBLE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());

/// Join hard-wrapped lines into flowing paragraphs.
///
/// Page text carries a newline at the end of every visual line. Blank lines
/// mark real paragraph breaks; single newlines are wraps and become spaces.
pub fn rejoin_lines(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let stripped = line.trim();
        if stripped.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        current.push(stripped);
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs
        .iter()
        .map(|p| DOUBLE_SPACE.replace_all(p, " ").to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Full-document text for single-file conversion: rejoined page texts,
/// pages separated by blank lines.
pub fn extract_pdf_text(path: &Path) -> Result<String, ExtractError> {
    let reader = PdfReader::open(path)?;
    let mut pages = Vec::new();
    for index in 0..reader.page_count() {
        let raw = reader.page_text(index)?;
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            pages.push(rejoin_lines(trimmed));
        }
    }
    if pages.is_empty() {
        return Err(ExtractError::NoText("PDF"));
    }
    Ok(pages.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejoin_merges_wrapped_lines() {
        let text = "The quick brown\nfox jumps over\nthe lazy dog.";
        assert_eq!(rejoin_lines(text), "The quick brown fox jumps over the lazy dog.");
    }

    #[test]
    fn rejoin_keeps_paragraph_breaks() {
        let text = "First line\nstill first.\n\nSecond paragraph\nhere.";
        assert_eq!(
            rejoin_lines(text),
            "First line still first.\n\nSecond paragraph here."
        );
    }

    #[test]
    fn rejoin_collapses_double_spaces() {
        assert_eq!(rejoin_lines("a  b\nc"), "a b c");
    }

    #[test]
    fn range_text_joins_pages() {
        let scan = BookScan {
            pages: vec![
                PageScan {
                    text: "page one\ncontinues".into(),
                    lines: vec![],
                    height: 800.0,
                },
                PageScan {
                    text: String::new(),
                    lines: vec![],
                    height: 800.0,
                },
                PageScan {
                    text: "page three".into(),
                    lines: vec![],
                    height: 800.0,
                },
            ],
            outline: vec![],
        };
        assert_eq!(scan.range_text(0, 3), "page one continues\n\npage three");
        assert_eq!(scan.range_text(2, 99), "page three");
    }

    #[test]
    fn span_line_helpers() {
        let line = SpanLine {
            y: 10.0,
            spans: vec![
                TextSpan {
                    text: "CHAPTER".into(),
                    font_size: 24.0,
                },
                TextSpan {
                    text: "  ".into(),
                    font_size: 30.0,
                },
                TextSpan {
                    text: "1".into(),
                    font_size: 24.0,
                },
            ],
        };
        assert_eq!(line.joined_text(), "CHAPTER 1");
        // whitespace-only spans do not contribute a size
        assert_eq!(line.max_font_size(), 24.0);
    }
}
