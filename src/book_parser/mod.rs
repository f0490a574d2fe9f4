//! Text extraction from uploaded documents.
//!
//! Submodules:
//! - `pdf_reader`  — pdfium facade (page text, typed spans, outline)
//! - `epub_text`   — EPUB spine text extraction
//! - `docx_text`   — Word document text extraction
//! - `normalizer`  — narration cleanup and paragraph pause markers

pub mod docx_text;
pub mod epub_text;
pub mod normalizer;
pub mod pdf_reader;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: .{0}")]
    Unsupported(String),
    #[error("PDF is password-protected and cannot be read.")]
    EncryptedPdf,
    #[error("PDF has no pages.")]
    EmptyPdf,
    #[error("{0} contains no extractable text (may be scanned/image-based).")]
    NoText(&'static str),
    #[error("Could not open {kind}: {detail}")]
    Open { kind: &'static str, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Epub,
    Docx,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "epub" => Some(Self::Epub),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Extract the raw text of a document, paragraphs separated by blank lines.
/// The result still needs [`normalizer::clean_for_tts`] before synthesis.
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    match kind_of(path)? {
        FileKind::Pdf => pdf_reader::extract_pdf_text(path),
        FileKind::Epub => epub_text::extract_epub_text(path),
        FileKind::Docx => docx_text::extract_docx_text(path),
    }
}

/// Page count used by the free-tier gate. Cheap: never extracts full text.
/// PDFs report real pages, EPUBs the number of spine documents, and Word
/// files an estimate of one page per 250 words.
pub fn get_page_count(path: &Path) -> Result<usize, ExtractError> {
    match kind_of(path)? {
        FileKind::Pdf => {
            let reader = pdf_reader::PdfReader::open(path)?;
            Ok(reader.page_count())
        }
        FileKind::Epub => epub_text::spine_document_count(path),
        FileKind::Docx => docx_text::estimate_page_count(path),
    }
}

fn kind_of(path: &Path) -> Result<FileKind, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    FileKind::from_extension(ext).ok_or_else(|| ExtractError::Unsupported(ext.to_string()))
}
