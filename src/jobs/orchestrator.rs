//! Conversion entry points and worker lifecycles.
//!
//! Submission-time gates (file type, size, free-tier pages, quotas,
//! ownership) refuse requests before any job exists. Accepted work runs on
//! its own worker thread; chapter workers additionally queue on the shared
//! [`WorkerGate`] so at most three synthesize concurrently. Workers always
//! delete their upload and any partial output on the way out, and never
//! overwrite a terminal job state they did not produce.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::Identity;
use super::book_store::{
    BookAccess, BookChapter, BookRecord, BookStore, ChapterState, read_chapter_text, write_cache,
};
use super::gate::WorkerGate;
use super::job_store::JobStore;
use crate::analyzer::{self, Chapter, ManualSegment};
use crate::base_system::config::{Config, safe_fs_name};
use crate::base_system::file_cleaner::{remove_dir_quiet, remove_stale_dirs, remove_stale_files};
use crate::book_parser::normalizer::clean_for_tts;
use crate::book_parser::pdf_reader::PdfReader;
use crate::book_parser::{self, ExtractError, FileKind};
use crate::tts::{EngineFactory, TtsError, convert_to_speech};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Only PDF, EPUB, and Word documents are supported.")]
    UnsupportedFileType,
    #[error("File exceeds the maximum size of {0} MB.")]
    TooLarge(u64),
    #[error("{message}")]
    QuotaExceeded {
        message: String,
        requires_premium: bool,
    },
    #[error("Premium subscription required.")]
    PremiumRequired,
    #[error("Unauthorized.")]
    Unauthorized,
    #[error("Book not found.")]
    BookNotFound,
    #[error("Chapter not found.")]
    ChapterNotFound,
    #[error("Job not found.")]
    JobNotFound,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct AnalyzeOutcome {
    pub book_id: String,
    pub filename: String,
    pub detection_method: String,
    pub chapters: Vec<BookChapter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterJobRef {
    pub index: usize,
    pub job_id: String,
    pub status: ChapterState,
}

pub struct Orchestrator {
    config: Config,
    jobs: Arc<JobStore>,
    books: Arc<BookStore>,
    gate: Arc<WorkerGate>,
    engines: Arc<dyn EngineFactory>,
}

impl Orchestrator {
    pub fn new(config: Config, engines: Arc<dyn EngineFactory>) -> std::io::Result<Self> {
        fs::create_dir_all(config.upload_dir())?;
        fs::create_dir_all(config.output_dir())?;
        let gate = Arc::new(WorkerGate::new(config.chapter_workers));
        Ok(Self {
            config,
            jobs: Arc::new(JobStore::default()),
            books: Arc::new(BookStore::default()),
            gate,
            engines,
        })
    }

    pub fn jobs(&self) -> Arc<JobStore> {
        self.jobs.clone()
    }

    pub fn books(&self) -> Arc<BookStore> {
        self.books.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opportunistic cleanup, run at the head of every conversion request:
    /// stale uploads and outputs, aged-out books with their cache dirs,
    /// aged-out job records, and orphaned book directories.
    fn cleanup(&self) {
        let age = self.config.cleanup_age();
        remove_stale_files(&self.config.upload_dir(), age);
        remove_stale_files(&self.config.output_dir(), age);
        for dir in self.books.evict_older_than(age) {
            remove_dir_quiet(&dir);
        }
        self.jobs.evict_older_than(age);
        let keep: HashSet<String> = self.books.live_ids().into_iter().collect();
        remove_stale_dirs(&self.config.upload_dir(), age, &keep);
    }

    fn save_upload(
        &self,
        id: &str,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<PathBuf, SubmitError> {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if FileKind::from_extension(&ext).is_none() {
            return Err(SubmitError::UnsupportedFileType);
        }
        if bytes.len() as u64 > self.config.max_upload_bytes() {
            return Err(SubmitError::TooLarge(self.config.max_upload_mb));
        }
        let path = self.config.upload_dir().join(format!("{id}.{ext}"));
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Whole-file conversion. Validates, enforces the free-tier page cap
    /// (page count only, never full extraction), then hands off to a worker.
    pub fn convert_single(
        &self,
        bytes: &[u8],
        original_name: &str,
        voice: &str,
        rate: &str,
        user: Option<&Identity>,
    ) -> Result<String, SubmitError> {
        self.cleanup();

        let job_id = Uuid::new_v4().to_string();
        let upload_path = self.save_upload(&job_id, bytes, original_name)?;

        let premium = user.map(|u| u.is_premium).unwrap_or(false);
        if !premium {
            match book_parser::get_page_count(&upload_path) {
                Ok(pages) if pages > self.config.free_page_limit => {
                    let _ = fs::remove_file(&upload_path);
                    return Err(SubmitError::QuotaExceeded {
                        message: format!(
                            "This file has {pages} pages, which exceeds the free limit of {} pages.",
                            self.config.free_page_limit
                        ),
                        requires_premium: true,
                    });
                }
                Ok(_) => {}
                // Counting failures never block a conversion; extraction
                // will surface a real error if the file is unusable.
                Err(err) => {
                    warn!(target: "jobs", error = %err, "page count failed, continuing")
                }
            }
        }

        self.jobs.create(&job_id, user);
        info!(target: "jobs", job = %job_id, file = original_name, "conversion accepted");

        let jobs = self.jobs.clone();
        let engines = self.engines.clone();
        let output_dir = self.config.output_dir();
        let id = job_id.clone();
        let original_name = original_name.to_string();
        let voice = voice.to_string();
        let rate = rate.to_string();
        thread::spawn(move || {
            run_single_conversion(
                jobs,
                engines,
                id,
                upload_path,
                original_name,
                voice,
                rate,
                output_dir,
            );
        });

        Ok(job_id)
    }

    /// Premium analysis: detect chapters (or honor explicit segments for
    /// PDFs), cache cleaned chapter text, and register the book.
    pub fn analyze(
        &self,
        bytes: &[u8],
        original_name: &str,
        voice: &str,
        rate: &str,
        user: &Identity,
        segments: Option<Vec<ManualSegment>>,
    ) -> Result<AnalyzeOutcome, SubmitError> {
        if !user.is_premium {
            return Err(SubmitError::PremiumRequired);
        }
        self.cleanup();

        let book_id = Uuid::new_v4().to_string();
        let upload_path = self.save_upload(&book_id, bytes, original_name)?;

        let analysis: Result<(Vec<Chapter>, &'static str), SubmitError> =
            match FileKind::from_path(&upload_path) {
                Some(FileKind::Pdf) => PdfReader::open(&upload_path)
                    .and_then(|reader| reader.scan())
                    .map_err(SubmitError::from)
                    .and_then(|scan| match &segments {
                        Some(segments) => {
                            analyzer::chapters_from_segments(&scan, segments, self.config.max_chapters)
                                .map_err(SubmitError::Invalid)
                        }
                        None => Ok(analyzer::analyze_pdf_scan(&scan, self.config.max_chapters)),
                    }),
                Some(FileKind::Epub) => {
                    if segments.is_some() {
                        Err(SubmitError::Invalid(
                            "Manual segments are only supported for PDF files.".to_string(),
                        ))
                    } else {
                        analyzer::epub::analyze_epub(&upload_path, self.config.max_chapters)
                            .map_err(SubmitError::from)
                    }
                }
                _ => Err(SubmitError::Invalid(
                    "Chapter analysis supports PDF and EPUB files.".to_string(),
                )),
            };

        // The upload is owned by this request; it is consumed either way.
        let _ = fs::remove_file(&upload_path);
        let (chapters, method) = analysis?;

        let record = BookRecord {
            id: book_id.clone(),
            user_id: Some(user.user_id.clone()),
            filename: original_name.to_string(),
            cache_dir: self.config.upload_dir().join(&book_id),
            detection_method: method.to_string(),
            chapters: chapters.iter().map(BookChapter::from_chapter).collect(),
            voice: voice.to_string(),
            rate: rate.to_string(),
            created_at: SystemTime::now(),
        };
        write_cache(&record, &chapters)?;
        self.books.insert(record.clone());
        info!(
            target: "jobs",
            book = %book_id,
            method,
            chapters = record.chapters.len(),
            "book analyzed"
        );

        Ok(AnalyzeOutcome {
            book_id,
            filename: record.filename,
            detection_method: record.detection_method,
            chapters: record.chapters,
        })
    }

    /// Convert one cached chapter. Already running or finished chapters are
    /// not restarted; their existing job id is reported instead.
    pub fn convert_chapter(
        &self,
        book_id: &str,
        index: usize,
        user: Option<&Identity>,
    ) -> Result<String, SubmitError> {
        if !user.map(|u| u.is_premium).unwrap_or(false) {
            return Err(SubmitError::PremiumRequired);
        }
        self.cleanup();
        let book = self.authorized_book(book_id, user)?;
        let chapter = book
            .chapters
            .get(index)
            .ok_or(SubmitError::ChapterNotFound)?;
        if matches!(
            chapter.status,
            ChapterState::Processing | ChapterState::Completed
        ) && let Some(job_id) = &chapter.job_id
        {
            return Ok(job_id.clone());
        }
        Ok(self.spawn_chapter_worker(&book, index, user))
    }

    /// Convert every pending chapter of a book under the shared worker
    /// gate. Refused outright when the book exceeds the word cap.
    pub fn convert_all(
        &self,
        book_id: &str,
        user: Option<&Identity>,
    ) -> Result<Vec<ChapterJobRef>, SubmitError> {
        if !user.map(|u| u.is_premium).unwrap_or(false) {
            return Err(SubmitError::PremiumRequired);
        }
        self.cleanup();
        let book = self.authorized_book(book_id, user)?;

        let total_words: usize = book.chapters.iter().map(|c| c.word_count).sum();
        if total_words > self.config.max_convert_all_words {
            return Err(SubmitError::QuotaExceeded {
                message: format!(
                    "This book has {total_words} words, which exceeds the limit of {} words for converting all chapters at once.",
                    self.config.max_convert_all_words
                ),
                requires_premium: false,
            });
        }

        let mut refs = Vec::with_capacity(book.chapters.len());
        for chapter in &book.chapters {
            if matches!(
                chapter.status,
                ChapterState::Processing | ChapterState::Completed
            ) && let Some(job_id) = &chapter.job_id
            {
                refs.push(ChapterJobRef {
                    index: chapter.index,
                    job_id: job_id.clone(),
                    status: chapter.status,
                });
                continue;
            }
            let job_id = self.spawn_chapter_worker(&book, chapter.index, user);
            refs.push(ChapterJobRef {
                index: chapter.index,
                job_id,
                status: ChapterState::Processing,
            });
        }
        info!(target: "jobs", book = %book_id, workers = refs.len(), "convert-all dispatched");
        Ok(refs)
    }

    /// Flag a job cancelled. Workers pick the signal up between audio
    /// chunks, while queueing, and right after acquiring a slot.
    pub fn cancel_job(&self, job_id: &str, user: Option<&Identity>) -> Result<(), SubmitError> {
        let job = self.jobs.snapshot(job_id).ok_or(SubmitError::JobNotFound)?;
        if let Some(owner) = &job.user_id {
            match user {
                Some(caller) if &caller.user_id == owner => {}
                _ => return Err(SubmitError::Unauthorized),
            }
        }
        self.jobs.mark_cancelled(job_id);
        Ok(())
    }

    fn authorized_book(
        &self,
        book_id: &str,
        user: Option<&Identity>,
    ) -> Result<BookRecord, SubmitError> {
        self.books.authorized(book_id, user).map_err(|e| match e {
            BookAccess::NotFound => SubmitError::BookNotFound,
            BookAccess::Unauthorized => SubmitError::Unauthorized,
        })
    }

    fn spawn_chapter_worker(
        &self,
        book: &BookRecord,
        index: usize,
        user: Option<&Identity>,
    ) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.create(&job_id, user);
        self.books
            .set_chapter_job(&book.id, index, &job_id, ChapterState::Processing);

        let jobs = self.jobs.clone();
        let books = self.books.clone();
        let gate = self.gate.clone();
        let engines = self.engines.clone();
        let output_dir = self.config.output_dir();
        let book = book.clone();
        let id = job_id.clone();
        thread::spawn(move || {
            run_chapter_conversion(jobs, books, gate, engines, id, book, index, output_dir);
        });
        job_id
    }
}

enum WorkerExit {
    Done {
        output_file: String,
        download_name: String,
    },
    Cancelled,
    Failed(String),
}

fn file_base_name(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    safe_fs_name(stem, 120)
}

#[allow(clippy::too_many_arguments)]
fn run_single_conversion(
    jobs: Arc<JobStore>,
    engines: Arc<dyn EngineFactory>,
    job_id: String,
    upload_path: PathBuf,
    original_name: String,
    voice: String,
    rate: String,
    output_dir: PathBuf,
) {
    jobs.set_progress(&job_id, 5.0, "Extracting text...");

    let exit = (|| {
        let raw = match book_parser::extract_text(&upload_path) {
            Ok(raw) => raw,
            Err(err) => return WorkerExit::Failed(err.to_string()),
        };
        let text = clean_for_tts(&raw);
        if text.trim().is_empty() {
            return WorkerExit::Failed("No text could be extracted from the file.".to_string());
        }
        jobs.set_progress(&job_id, 20.0, "Text extracted. Starting conversion...");

        let base = file_base_name(&original_name);
        let output_file = format!("{job_id}_{base}.mp3");
        let output_path = output_dir.join(&output_file);
        match synthesize(&jobs, &engines, &job_id, &text, &output_path, &voice, &rate) {
            Ok(()) => WorkerExit::Done {
                output_file,
                download_name: format!("{base}.mp3"),
            },
            Err(exit) => exit,
        }
    })();

    settle_job(&jobs, &job_id, exit);
    // The upload belongs to this request alone; remove it on every exit.
    let _ = fs::remove_file(&upload_path);
}

#[allow(clippy::too_many_arguments)]
fn run_chapter_conversion(
    jobs: Arc<JobStore>,
    books: Arc<BookStore>,
    gate: Arc<WorkerGate>,
    engines: Arc<dyn EngineFactory>,
    job_id: String,
    book: BookRecord,
    index: usize,
    output_dir: PathBuf,
) {
    jobs.set_progress(&job_id, 2.0, "Waiting for a conversion slot...");

    // Poll the gate so a cancel while queueing never reaches synthesis.
    let cancelled = || jobs.is_cancelled(&job_id);
    let Some(_permit) = gate.acquire(&cancelled) else {
        jobs.mark_cancelled(&job_id);
        books.set_chapter_state(&book.id, index, ChapterState::Cancelled);
        return;
    };
    if cancelled() {
        books.set_chapter_state(&book.id, index, ChapterState::Cancelled);
        return;
    }

    jobs.set_progress(&job_id, 5.0, "Loading chapter text...");
    let exit = (|| {
        let text = match read_chapter_text(&book, index) {
            Ok(text) => text,
            Err(err) => return WorkerExit::Failed(format!("Chapter text unavailable: {err}")),
        };
        if text.trim().is_empty() {
            return WorkerExit::Failed("Chapter text is empty.".to_string());
        }
        jobs.set_progress(&job_id, 20.0, "Starting conversion...");

        let title = book
            .chapters
            .get(index)
            .map(|c| c.title.clone())
            .unwrap_or_else(|| format!("Chapter {}", index + 1));
        let base = safe_fs_name(&title, 120);
        let output_file = format!("{job_id}_{base}.mp3");
        let output_path = output_dir.join(&output_file);
        match synthesize(
            &jobs,
            &engines,
            &job_id,
            &text,
            &output_path,
            &book.voice,
            &book.rate,
        ) {
            Ok(()) => WorkerExit::Done {
                output_file,
                download_name: format!("{base}.mp3"),
            },
            Err(exit) => exit,
        }
    })();

    let chapter_state = match &exit {
        WorkerExit::Done { .. } => ChapterState::Completed,
        WorkerExit::Cancelled => ChapterState::Cancelled,
        WorkerExit::Failed(_) => {
            if jobs.is_cancelled(&job_id) {
                ChapterState::Cancelled
            } else {
                ChapterState::Error
            }
        }
    };
    settle_job(&jobs, &job_id, exit);
    books.set_chapter_state(&book.id, index, chapter_state);
}

/// Run the streamer with a progress callback that checks the cancel flag
/// before reporting. Partial output is removed on every failing path.
fn synthesize(
    jobs: &Arc<JobStore>,
    engines: &Arc<dyn EngineFactory>,
    job_id: &str,
    text: &str,
    output_path: &Path,
    voice: &str,
    rate: &str,
) -> Result<(), WorkerExit> {
    let mut engine = engines.create();
    let jobs_cb = jobs.clone();
    let id = job_id.to_string();
    let mut on_progress = move |percent: f32, message: &str| -> bool {
        if jobs_cb.is_cancelled(&id) {
            return false;
        }
        jobs_cb.set_progress(&id, percent, message);
        true
    };
    match convert_to_speech(
        engine.as_mut(),
        text,
        output_path,
        voice,
        rate,
        Some(&mut on_progress),
    ) {
        Ok(()) => Ok(()),
        Err(TtsError::Cancelled) => {
            let _ = fs::remove_file(output_path);
            Err(WorkerExit::Cancelled)
        }
        Err(err) => {
            let _ = fs::remove_file(output_path);
            Err(WorkerExit::Failed(err.to_string()))
        }
    }
}

fn settle_job(jobs: &Arc<JobStore>, job_id: &str, exit: WorkerExit) {
    match exit {
        WorkerExit::Done {
            output_file,
            download_name,
        } => jobs.mark_completed(job_id, &output_file, &download_name),
        WorkerExit::Cancelled => {
            jobs.mark_cancelled(job_id);
        }
        WorkerExit::Failed(message) => {
            // Never clobber a cancellation that landed while we were failing.
            if !jobs.is_cancelled(job_id) {
                jobs.mark_error(job_id, &message);
            }
            warn!(target: "jobs", job = %job_id, error = %message, "conversion failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::SectionType;
    use crate::jobs::job_store::JobStatus;
    use crate::tts::testutil::FakeFactory;
    use std::time::{Duration, Instant};

    fn test_config(dir: &Path) -> Config {
        Config {
            data_dir: dir.to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    fn orchestrator(dir: &Path, chunks: usize, delay_ms: u64) -> Orchestrator {
        Orchestrator::new(
            test_config(dir),
            Arc::new(FakeFactory {
                chunks_per_segment: chunks,
                delay: Duration::from_millis(delay_ms),
            }),
        )
        .unwrap()
    }

    fn premium() -> Identity {
        Identity {
            user_id: "u-premium".into(),
            is_premium: true,
        }
    }

    fn make_chapter(index: usize, words: usize) -> Chapter {
        Chapter {
            index,
            section_type: SectionType::Chapter,
            chapter_number: Some(index as u32 + 1),
            title: format!("Chapter {}", index + 1),
            chapter_label: format!("Ch. {}", index + 1),
            page_start: Some(index * 10 + 1),
            page_end: Some(index * 10 + 10),
            word_count: words,
            text: "Some chapter text for narration.".into(),
            text_clean: "Some chapter text for narration.".into(),
        }
    }

    fn install_book(orch: &Orchestrator, id: &str, chapter_count: usize, words: usize) {
        let chapters: Vec<Chapter> = (0..chapter_count)
            .map(|i| make_chapter(i, words))
            .collect();
        let record = BookRecord {
            id: id.to_string(),
            user_id: Some("u-premium".into()),
            filename: "book.pdf".into(),
            cache_dir: orch.config().upload_dir().join(id),
            detection_method: "toc".into(),
            chapters: chapters.iter().map(BookChapter::from_chapter).collect(),
            voice: "en-US-AriaNeural".into(),
            rate: "+0%".into(),
            created_at: SystemTime::now(),
        };
        write_cache(&record, &chapters).unwrap();
        orch.books.insert(record);
    }

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn submission_gates_refuse_without_creating_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 1, 0);

        let err = orch
            .convert_single(b"x", "notes.txt", "v", "+0%", None)
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedFileType));

        let mut config = test_config(dir.path());
        config.max_upload_mb = 0;
        let orch = Orchestrator::new(
            config,
            Arc::new(FakeFactory {
                chunks_per_segment: 1,
                delay: Duration::ZERO,
            }),
        )
        .unwrap();
        let err = orch
            .convert_single(b"too big", "book.pdf", "v", "+0%", None)
            .unwrap_err();
        assert!(matches!(err, SubmitError::TooLarge(0)));
    }

    #[test]
    fn premium_gates() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 1, 0);
        install_book(&orch, "b1", 2, 100);

        let free = Identity {
            user_id: "u-free".into(),
            is_premium: false,
        };
        assert!(matches!(
            orch.convert_chapter("b1", 0, Some(&free)),
            Err(SubmitError::PremiumRequired)
        ));
        assert!(matches!(
            orch.convert_all("b1", None),
            Err(SubmitError::PremiumRequired)
        ));
        assert!(matches!(
            orch.analyze(b"%PDF", "x.pdf", "v", "+0%", &free, None),
            Err(SubmitError::PremiumRequired)
        ));
    }

    #[test]
    fn ownership_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 1, 0);
        install_book(&orch, "b1", 2, 100);

        let stranger = Identity {
            user_id: "u-other".into(),
            is_premium: true,
        };
        assert!(matches!(
            orch.convert_chapter("b1", 0, Some(&stranger)),
            Err(SubmitError::Unauthorized)
        ));
        assert!(matches!(
            orch.convert_chapter("missing", 0, Some(&premium())),
            Err(SubmitError::BookNotFound)
        ));
        assert!(matches!(
            orch.convert_chapter("b1", 99, Some(&premium())),
            Err(SubmitError::ChapterNotFound)
        ));
    }

    #[test]
    fn chapter_conversion_completes_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 3, 0);
        install_book(&orch, "b1", 2, 100);

        let user = premium();
        let job_id = orch.convert_chapter("b1", 0, Some(&user)).unwrap();
        assert!(wait_until(Duration::from_secs(10), || {
            orch.jobs
                .snapshot(&job_id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(false)
        }));

        let job = orch.jobs.snapshot(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let output = orch
            .config()
            .output_dir()
            .join(job.output_file.as_deref().unwrap());
        let meta = fs::metadata(&output).unwrap();
        assert!(meta.len() > 0, "completed job must leave a non-empty file");

        // chapter state settles just after the job does
        assert!(wait_until(Duration::from_secs(5), || {
            orch.books
                .snapshot("b1")
                .map(|b| b.chapters[0].status == ChapterState::Completed)
                .unwrap_or(false)
        }));
        let book = orch.books.snapshot("b1").unwrap();
        assert_eq!(book.chapters[0].job_id.as_deref(), Some(job_id.as_str()));

        // converting again reports the same job instead of restarting
        let again = orch.convert_chapter("b1", 0, Some(&user)).unwrap();
        assert_eq!(again, job_id);
    }

    #[test]
    fn convert_all_word_cap_refuses_without_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 1, 0);
        // 6 chapters of 83,334 words each → 500,004 > 500,000
        install_book(&orch, "b1", 6, 83_334);

        let err = orch.convert_all("b1", Some(&premium())).unwrap_err();
        assert!(matches!(
            err,
            SubmitError::QuotaExceeded {
                requires_premium: false,
                ..
            }
        ));

        let book = orch.books.snapshot("b1").unwrap();
        assert!(
            book.chapters
                .iter()
                .all(|c| c.status == ChapterState::Pending && c.job_id.is_none()),
            "no chapter may gain a job after a refused convert-all"
        );
    }

    #[test]
    fn convert_all_cancellation_settles_every_chapter() {
        let dir = tempfile::tempdir().unwrap();
        // slow enough that cancellation lands mid-flight
        let orch = orchestrator(dir.path(), 40, 5);
        install_book(&orch, "b1", 10, 100);

        let user = premium();
        let refs = orch.convert_all("b1", Some(&user)).unwrap();
        assert_eq!(refs.len(), 10);

        // wait for the first completion, then cancel everything
        assert!(wait_until(Duration::from_secs(20), || {
            refs.iter().any(|r| {
                orch.jobs
                    .snapshot(&r.job_id)
                    .map(|j| j.status == JobStatus::Completed)
                    .unwrap_or(false)
            })
        }));
        for r in &refs {
            let _ = orch.cancel_job(&r.job_id, Some(&user));
        }

        assert!(
            wait_until(Duration::from_secs(20), || {
                refs.iter().all(|r| {
                    orch.jobs
                        .snapshot(&r.job_id)
                        .map(|j| j.status.is_terminal())
                        .unwrap_or(true)
                })
            }),
            "all jobs must settle after cancellation"
        );
        // chapter states need a beat to catch up with job settlement
        assert!(wait_until(Duration::from_secs(5), || {
            let book = orch.books.snapshot("b1").unwrap();
            book.chapters.iter().all(|c| {
                matches!(c.status, ChapterState::Completed | ChapterState::Cancelled)
            })
        }));

        let book = orch.books.snapshot("b1").unwrap();
        let output_dir = orch.config().output_dir();
        for (chapter, job_ref) in book.chapters.iter().zip(&refs) {
            let job = orch.jobs.snapshot(&job_ref.job_id).unwrap();
            match chapter.status {
                ChapterState::Completed => {
                    let path = output_dir.join(job.output_file.as_deref().unwrap());
                    assert!(path.exists());
                    assert!(fs::metadata(path).unwrap().len() > 0);
                }
                ChapterState::Cancelled => {
                    assert_eq!(job.status, JobStatus::Cancelled);
                    // no stray partials for cancelled chapters
                    let prefix = format!("{}_", job_ref.job_id);
                    let stray = fs::read_dir(&output_dir)
                        .unwrap()
                        .filter_map(|e| e.ok())
                        .any(|e| e.file_name().to_string_lossy().starts_with(&prefix));
                    assert!(!stray, "partial output left for cancelled chapter");
                }
                other => panic!("chapter ended in unexpected state {other:?}"),
            }
        }
    }

    #[test]
    fn failed_extraction_marks_job_error_and_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 1, 0);

        // Garbage PDF bytes: either the pdfium binding is absent or the file
        // fails to parse; both must surface as a job error.
        let job_id = orch
            .convert_single(b"not a real pdf", "broken.pdf", "v", "+0%", Some(&premium()))
            .unwrap();
        assert!(wait_until(Duration::from_secs(10), || {
            orch.jobs
                .snapshot(&job_id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(false)
        }));
        let job = orch.jobs.snapshot(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(!job.message.is_empty());

        let upload = orch.config().upload_dir().join(format!("{job_id}.pdf"));
        assert!(!upload.exists(), "upload must be removed on error");
    }

    #[test]
    fn cancel_respects_job_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), 400, 5);
        install_book(&orch, "b1", 1, 50);

        let user = premium();
        let job_id = orch.convert_chapter("b1", 0, Some(&user)).unwrap();

        let stranger = Identity {
            user_id: "u-other".into(),
            is_premium: true,
        };
        assert!(matches!(
            orch.cancel_job(&job_id, Some(&stranger)),
            Err(SubmitError::Unauthorized)
        ));
        assert!(matches!(
            orch.cancel_job("missing", Some(&user)),
            Err(SubmitError::JobNotFound)
        ));
        orch.cancel_job(&job_id, Some(&user)).unwrap();

        assert!(wait_until(Duration::from_secs(10), || {
            orch.books
                .snapshot("b1")
                .map(|b| b.chapters[0].status != ChapterState::Processing)
                .unwrap_or(false)
        }));
        let book = orch.books.snapshot("b1").unwrap();
        assert_eq!(book.chapters[0].status, ChapterState::Cancelled);
    }
}
