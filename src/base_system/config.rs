//! Server configuration (`config.yml`) with commented defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base directory for `uploads/`, `output/` and `logs/`.
    /// Empty means the current working directory.
    #[serde(default)]
    pub data_dir: String,

    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_rate")]
    pub default_rate: String,
    #[serde(default = "default_voice_language")]
    pub voice_language: String,

    #[serde(default = "default_cleanup_age_secs")]
    pub cleanup_age_secs: u64,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    #[serde(default = "default_free_page_limit")]
    pub free_page_limit: usize,
    #[serde(default = "default_max_chapters")]
    pub max_chapters: usize,
    #[serde(default = "default_max_convert_all_words")]
    pub max_convert_all_words: usize,
    #[serde(default = "default_chapter_workers")]
    pub chapter_workers: usize,

    /// Identity endpoint queried with the caller's bearer token.
    /// Empty disables authentication (every request is anonymous).
    #[serde(default)]
    pub identity_endpoint: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8090".to_string()
}
fn default_voice() -> String {
    "en-US-AriaNeural".to_string()
}
fn default_rate() -> String {
    "+0%".to_string()
}
fn default_voice_language() -> String {
    "en".to_string()
}
fn default_cleanup_age_secs() -> u64 {
    3600
}
fn default_max_upload_mb() -> u64 {
    50
}
fn default_free_page_limit() -> usize {
    50
}
fn default_max_chapters() -> usize {
    60
}
fn default_max_convert_all_words() -> usize {
    500_000
}
fn default_chapter_workers() -> usize {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: String::new(),
            default_voice: default_voice(),
            default_rate: default_rate(),
            voice_language: default_voice_language(),
            cleanup_age_secs: default_cleanup_age_secs(),
            max_upload_mb: default_max_upload_mb(),
            free_page_limit: default_free_page_limit(),
            max_chapters: default_max_chapters(),
            max_convert_all_words: default_max_convert_all_words(),
            chapter_workers: default_chapter_workers(),
            identity_endpoint: String::new(),
        }
    }
}

const FILE_NAME: &str = "config.yml";

const TEMPLATE: &str = "\
# Address the web server binds to.
bind_addr: \"127.0.0.1:8090\"
# Base directory for uploads/, output/ and logs/ (empty = current directory).
data_dir: \"\"
# Default Edge Read-Aloud voice.
default_voice: \"en-US-AriaNeural\"
# Default speaking rate (e.g. \"+0%\", \"-10%\").
default_rate: \"+0%\"
# Language prefix used to filter the voice list.
voice_language: \"en\"
# Files and records older than this many seconds are removed on new requests.
cleanup_age_secs: 3600
# Maximum upload size in MB.
max_upload_mb: 50
# Page cap for non-premium conversions.
free_page_limit: 50
# Maximum number of detected chapters per book.
max_chapters: 60
# Word cap for converting all chapters of a book at once.
max_convert_all_words: 500000
# Concurrent chapter conversion workers.
chapter_workers: 3
# Identity endpoint resolving bearer tokens to {user_id, is_premium}.
# Empty disables authentication.
identity_endpoint: \"\"
";

impl Config {
    /// Load `config.yml` from `base_dir` (or the working directory), writing a
    /// commented default file on first run. Unknown fields are ignored and
    /// missing fields fall back to defaults, so old config files keep working.
    pub fn load_or_create(base_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match base_dir {
            Some(dir) => dir.join(FILE_NAME),
            None => PathBuf::from(FILE_NAME),
        };

        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, TEMPLATE).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let mut config = Self::default();
            if let Some(dir) = base_dir {
                config.data_dir = dir.to_string_lossy().to_string();
            }
            return Ok(config);
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        if config.data_dir.is_empty()
            && let Some(dir) = base_dir
        {
            config.data_dir = dir.to_string_lossy().to_string();
        }
        Ok(config)
    }

    pub fn base_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.base_dir().join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.base_dir().join("output")
    }

    pub fn cleanup_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_age_secs)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

/// Replace characters that are unsafe in file names and trim to `max_len`
/// characters. Used for output file names derived from titles.
pub fn safe_fs_name(name: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' | '"' | '<' | '>' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 32 => '_',
            _ => ch,
        })
        .collect();
    cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.chars().count() > max_len {
        cleaned = cleaned.chars().take(max_len).collect();
    }
    if cleaned.is_empty() {
        cleaned.push('_');
    }
    cleaned
}
