//! Streaming text-to-speech assembly.
//!
//! Synthesized audio arrives as opaque MP3 chunks from the speech engine and
//! is appended straight to the output file. Between paragraph segments a
//! fixed block of silent MPEG frames is spliced in, so the final file is one
//! continuous, valid MP3 with audible pauses at paragraph breaks.

pub mod edge_client;

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::book_parser::normalizer::TTS_PAUSE;

// Silent MPEG2 Layer III frame: 24 kHz, 64 kbps, mono. Must match the codec
// parameters of the engine's stream or concatenation breaks playback.
const SILENT_FRAME_HEADER: [u8; 4] = [0xFF, 0xF3, 0x64, 0xC4];
const SILENT_FRAME_LEN: usize = 192;
// 63 frames at ~24 ms each ≈ 1.5 s of silence between paragraphs.
const SILENT_FRAMES_PER_PAUSE: usize = 63;

// Rough output bytes per input character, used to seed the progress
// denominator before any audio arrives.
const BYTES_PER_CHAR_ESTIMATE: usize = 150;

#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("conversion cancelled")]
    Cancelled,
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Streaming synthesizer: calls `on_audio` for every MP3 chunk as it
/// arrives. Implementations may connect per call; the Edge client does.
pub trait SpeechEngine: Send {
    fn stream(
        &mut self,
        text: &str,
        voice: &str,
        rate: &str,
        on_audio: &mut dyn FnMut(&[u8]) -> Result<(), TtsError>,
    ) -> Result<(), TtsError>;
}

/// Creates one engine per worker. Shared across worker threads.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn SpeechEngine>;
}

pub struct EdgeEngineFactory;

impl EngineFactory for EdgeEngineFactory {
    fn create(&self) -> Box<dyn SpeechEngine> {
        Box::new(edge_client::EdgeSpeechEngine)
    }
}

/// The block of silent frames written between paragraph segments.
pub(crate) fn paragraph_silence() -> Vec<u8> {
    let mut frame = vec![0u8; SILENT_FRAME_LEN];
    frame[..4].copy_from_slice(&SILENT_FRAME_HEADER);
    frame.repeat(SILENT_FRAMES_PER_PAUSE)
}

/// Progress callback: receives `(percent, message)` and returns `false` to
/// cancel. The streamer checks the result after every audio chunk, so
/// cancellation latency is bounded by one chunk.
pub type ProgressFn<'a> = &'a mut dyn FnMut(f32, &str) -> bool;

/// Convert cleaned text (containing pause markers) to a single MP3 file.
///
/// The caller owns cleanup of `output_path` on error or cancellation.
pub fn convert_to_speech(
    engine: &mut dyn SpeechEngine,
    text: &str,
    output_path: &Path,
    voice: &str,
    rate: &str,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<(), TtsError> {
    let segments: Vec<&str> = text
        .split(TTS_PAUSE)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let estimated_size = (text.len() * BYTES_PER_CHAR_ESTIMATE).max(1);
    let silence = paragraph_silence();

    let mut file = fs::File::create(output_path)?;
    let mut total_bytes: usize = 0;

    debug!(
        target: "tts",
        segments = segments.len(),
        voice,
        rate,
        output = %output_path.display(),
        "starting synthesis"
    );

    let segment_count = segments.len();
    for (index, segment) in segments.into_iter().enumerate() {
        let mut write_chunk = |chunk: &[u8]| -> Result<(), TtsError> {
            file.write_all(chunk)?;
            total_bytes += chunk.len();
            if let Some(report) = progress.as_deref_mut() {
                let ratio = (total_bytes as f32 / estimated_size as f32).min(1.0);
                let percent = 20.0 + ratio * 75.0;
                if !report(percent, "Converting to speech...") {
                    return Err(TtsError::Cancelled);
                }
            }
            Ok(())
        };
        engine.stream(segment, voice, rate, &mut write_chunk)?;

        if index + 1 < segment_count {
            file.write_all(&silence)?;
        }
    }

    file.flush()?;
    if let Some(report) = progress.as_deref_mut()
        && !report(95.0, "Finalizing audio...")
    {
        return Err(TtsError::Cancelled);
    }

    info!(
        target: "tts",
        bytes = total_bytes,
        output = %output_path.display(),
        "synthesis finished"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Engine emitting fixed chunks per segment, optionally with delay.
    pub(crate) struct FakeEngine {
        pub chunk: Vec<u8>,
        pub chunks_per_segment: usize,
        pub delay: Duration,
        pub fail_after: Option<usize>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeEngine {
        pub(crate) fn new(chunks_per_segment: usize) -> Self {
            Self {
                chunk: vec![0xAB; 64],
                chunks_per_segment,
                delay: Duration::ZERO,
                fail_after: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SpeechEngine for FakeEngine {
        fn stream(
            &mut self,
            _text: &str,
            _voice: &str,
            _rate: &str,
            on_audio: &mut dyn FnMut(&[u8]) -> Result<(), TtsError>,
        ) -> Result<(), TtsError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after
                && call >= limit
            {
                return Err(TtsError::Synthesis("upstream hiccup".into()));
            }
            for _ in 0..self.chunks_per_segment {
                if !self.delay.is_zero() {
                    std::thread::sleep(self.delay);
                }
                on_audio(&self.chunk)?;
            }
            Ok(())
        }
    }

    pub(crate) struct FakeFactory {
        pub chunks_per_segment: usize,
        pub delay: Duration,
    }

    impl EngineFactory for FakeFactory {
        fn create(&self) -> Box<dyn SpeechEngine> {
            let mut engine = FakeEngine::new(self.chunks_per_segment);
            engine.delay = self.delay;
            Box::new(engine)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::FakeEngine;
    use super::*;

    #[test]
    fn silence_block_shape() {
        let silence = paragraph_silence();
        assert_eq!(silence.len(), 63 * 192);
        assert_eq!(&silence[..4], &[0xFF, 0xF3, 0x64, 0xC4]);
        assert!(silence[4..192].iter().all(|&b| b == 0));
        // every frame starts with the same header
        assert_eq!(&silence[192..196], &[0xFF, 0xF3, 0x64, 0xC4]);
    }

    #[test]
    fn segments_are_joined_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let mut engine = FakeEngine::new(2);
        let text = format!("Hello there. {TTS_PAUSE} Second paragraph. {TTS_PAUSE} Third.");
        convert_to_speech(&mut engine, &text, &out, "voice", "+0%", None).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        let audio = 3 * 2 * 64; // three segments, two chunks each
        let silence = 2 * 63 * 192; // between segments only
        assert_eq!(bytes.len(), audio + silence);
        // first silent frame sits right after the first segment's audio
        assert_eq!(&bytes[128..132], &[0xFF, 0xF3, 0x64, 0xC4]);
    }

    #[test]
    fn empty_segments_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let mut engine = FakeEngine::new(1);
        let text = format!("{TTS_PAUSE}  {TTS_PAUSE} Only one. {TTS_PAUSE} ");
        convert_to_speech(&mut engine, &text, &out, "v", "+0%", None).unwrap();
        let bytes = std::fs::read(&out).unwrap();
        // single real segment → no silence blocks at all
        assert_eq!(bytes.len(), 64);
    }

    #[test]
    fn progress_is_monotone_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let mut engine = FakeEngine::new(5);
        let mut seen: Vec<f32> = Vec::new();
        let mut cb = |pct: f32, _msg: &str| {
            seen.push(pct);
            true
        };
        let text = format!("One paragraph. {TTS_PAUSE} Two.");
        convert_to_speech(&mut engine, &text, &out, "v", "+0%", Some(&mut cb)).unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().all(|p| (20.0..=95.0).contains(p)), "{seen:?}");
        assert_eq!(*seen.last().unwrap(), 95.0);
    }

    #[test]
    fn callback_false_cancels_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let mut engine = FakeEngine::new(10);
        let mut calls = 0;
        let mut cb = |_pct: f32, _msg: &str| {
            calls += 1;
            calls < 3
        };
        let err = convert_to_speech(&mut engine, "Some text.", &out, "v", "+0%", Some(&mut cb))
            .unwrap_err();
        assert!(matches!(err, TtsError::Cancelled));
        // the partial file exists; deleting it is the caller's job
        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(bytes.len(), 3 * 64);
    }

    #[test]
    fn synthesis_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp3");
        let mut engine = FakeEngine::new(1);
        engine.fail_after = Some(1);
        let text = format!("One. {TTS_PAUSE} Two.");
        let err = convert_to_speech(&mut engine, &text, &out, "v", "+0%", None).unwrap_err();
        assert!(matches!(err, TtsError::Synthesis(_)));
    }
}
