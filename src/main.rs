//! Narrio — document-to-audiobook server.
//!
//! Module map (reading entry points):
//! - `base_system`: config, logging, file cleanup
//! - `book_parser`: PDF/EPUB/DOCX text extraction and narration cleanup
//! - `analyzer`: multi-pass chapter structure detection
//! - `tts`: streaming speech synthesis and MP3 assembly
//! - `jobs`: registries, worker gate, orchestration, progress stream
//! - `web`: HTTP surface (axum)

use std::path::Path;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::info;

mod analyzer;
mod base_system;
mod book_parser;
mod jobs;
mod tts;
mod web;

use base_system::config::Config;
use base_system::logging::{LogOptions, LogSystem};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "narrio")]
#[command(about = "Narrio — narrate PDF, EPUB and Word documents as MP3 audiobooks")]
struct Cli {
    /// Enable debug logging on the console
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Data directory for config.yml, uploads/, output/ and logs/
    #[arg(long)]
    data_dir: Option<String>,

    /// Bind address, overriding config.yml (e.g. 0.0.0.0:8090)
    #[arg(long)]
    addr: Option<String>,

    /// Print version information and exit
    #[arg(long, default_value_t = false)]
    version: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Narrio v{VERSION}");
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let _log = LogSystem::init(
        LogOptions {
            debug: cli.debug,
            ..LogOptions::default()
        },
        data_dir,
    )
    .map_err(|e| anyhow!(e))?;

    let mut config = Config::load_or_create(data_dir)?;
    if let Some(addr) = cli.addr {
        config.bind_addr = addr;
    }

    info!(target: "startup", version = VERSION, bind = %config.bind_addr, "starting narrio");
    web::run(config)
}
