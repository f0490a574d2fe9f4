//! Analyzed-book registry and on-disk chapter cache.
//!
//! A book record owns a directory under `uploads/<book_id>/` holding one
//! cleaned text file per chapter (`chapter_NN.txt`) and a `book.json`
//! manifest. The registry itself is process-local; records age out together
//! with their directories.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Identity;
use crate::analyzer::Chapter;

// Narration pace used for the minutes estimate shown next to chapters.
const WORDS_PER_MINUTE: f32 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterState {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookChapter {
    pub index: usize,
    pub title: String,
    pub chapter_label: String,
    pub word_count: usize,
    pub estimated_minutes: f32,
    pub page_start: Option<usize>,
    pub page_end: Option<usize>,
    pub job_id: Option<String>,
    pub status: ChapterState,
}

impl BookChapter {
    pub fn from_chapter(chapter: &Chapter) -> Self {
        let minutes = chapter.word_count as f32 / WORDS_PER_MINUTE;
        Self {
            index: chapter.index,
            title: chapter.title.clone(),
            chapter_label: chapter.chapter_label.clone(),
            word_count: chapter.word_count,
            estimated_minutes: (minutes * 10.0).round() / 10.0,
            page_start: chapter.page_start,
            page_end: chapter.page_end,
            job_id: None,
            status: ChapterState::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub filename: String,
    pub cache_dir: PathBuf,
    pub detection_method: String,
    pub chapters: Vec<BookChapter>,
    pub voice: String,
    pub rate: String,
    pub created_at: SystemTime,
}

impl BookRecord {
    pub fn chapter_text_path(&self, index: usize) -> PathBuf {
        self.cache_dir.join(format!("chapter_{index:02}.txt"))
    }
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    filename: &'a str,
    detection_method: &'a str,
    chapters: &'a [BookChapter],
}

/// Write the chapter cache and `book.json` manifest for a fresh record.
pub fn write_cache(record: &BookRecord, chapters: &[Chapter]) -> io::Result<()> {
    fs::create_dir_all(&record.cache_dir)?;
    for chapter in chapters {
        fs::write(
            record.chapter_text_path(chapter.index),
            &chapter.text_clean,
        )?;
    }
    let manifest = Manifest {
        filename: &record.filename,
        detection_method: &record.detection_method,
        chapters: &record.chapters,
    };
    let json = serde_json::to_vec_pretty(&manifest)?;
    fs::write(record.cache_dir.join("book.json"), json)?;
    debug!(
        target: "books",
        book = %record.id,
        chapters = chapters.len(),
        dir = %record.cache_dir.display(),
        "chapter cache written"
    );
    Ok(())
}

#[derive(Debug, Default)]
pub struct BookStore {
    inner: Mutex<HashMap<String, BookRecord>>,
}

impl BookStore {
    pub fn insert(&self, record: BookRecord) {
        let mut books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        books.insert(record.id.clone(), record);
    }

    pub fn snapshot(&self, id: &str) -> Option<BookRecord> {
        let books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        books.get(id).cloned()
    }

    /// Fetch a record, enforcing ownership: when the record has an owner the
    /// caller must be that user. Records without an owner are open.
    pub fn authorized(&self, id: &str, user: Option<&Identity>) -> Result<BookRecord, BookAccess> {
        let books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = books.get(id).ok_or(BookAccess::NotFound)?;
        if let Some(owner) = &record.user_id {
            match user {
                Some(caller) if &caller.user_id == owner => {}
                _ => return Err(BookAccess::Unauthorized),
            }
        }
        Ok(record.clone())
    }

    pub fn set_chapter_job(&self, id: &str, index: usize, job_id: &str, state: ChapterState) {
        self.update_chapter(id, index, |chapter| {
            chapter.job_id = Some(job_id.to_string());
            chapter.status = state;
        });
    }

    pub fn set_chapter_state(&self, id: &str, index: usize, state: ChapterState) {
        self.update_chapter(id, index, |chapter| chapter.status = state);
    }

    /// Drop records older than `age`, returning their cache directories so
    /// the caller can delete them outside the lock.
    pub fn evict_older_than(&self, age: Duration) -> Vec<PathBuf> {
        let now = SystemTime::now();
        let mut evicted = Vec::new();
        let mut books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        books.retain(|_, record| {
            let keep = now
                .duration_since(record.created_at)
                .map(|elapsed| elapsed <= age)
                .unwrap_or(true);
            if !keep {
                evicted.push(record.cache_dir.clone());
            }
            keep
        });
        evicted
    }

    /// Ids of live books; used to protect their directories from cleanup.
    pub fn live_ids(&self) -> Vec<String> {
        let books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        books.keys().cloned().collect()
    }

    fn update_chapter<F: FnOnce(&mut BookChapter)>(&self, id: &str, index: usize, f: F) {
        let mut books = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = books.get_mut(id)
            && let Some(chapter) = record.chapters.get_mut(index)
        {
            f(chapter);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookAccess {
    NotFound,
    Unauthorized,
}

/// Read a cached chapter's cleaned text back from disk.
pub fn read_chapter_text(record: &BookRecord, index: usize) -> io::Result<String> {
    fs::read_to_string(record.chapter_text_path(index))
}
