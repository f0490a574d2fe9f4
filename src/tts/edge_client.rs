//! Edge Read-Aloud streaming client.
//!
//! Speaks the public Read-Aloud websocket protocol directly over
//! tungstenite + rustls, so the server runs on musl/containers without
//! native TLS. Audio chunks are handed to the caller as they arrive instead
//! of being buffered, which is what keeps cancellation latency down to a
//! single chunk.

use std::net::TcpStream;
use std::sync::OnceLock;

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use tungstenite::Message;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header;
use tungstenite::stream::MaybeTlsStream;

use super::{SpeechEngine, TtsError};

// Constants of the public Edge Read-Aloud endpoint. Kept in sync with the
// values current browser builds send; Microsoft is sensitive to UA/Origin.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0";
const ORIGIN: &str = "chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold";
const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const WSS_URL_PREFIX: &str = "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1?TrustedClientToken=6A5AA1D4EAFF4E9FB37E23D68491D6F4&ConnectionId=";
const VOICES_URL: &str = "https://speech.platform.bing.com/consumer/speech/synthesize/readaloud/voices/list?trustedclienttoken=6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const SEC_MS_GEC_VERSION: &str = "1-130.0.2849.68";

// Must stay in sync with the silent-frame parameters in the streamer:
// 24 kHz, 64 kbps, mono MP3.
const AUDIO_FORMAT: &str = "audio-24khz-64kbitrate-mono-mp3";

/// Parse a rate like "+0%", "-10%" or "15" into a signed percent.
pub(crate) fn parse_percent(input: &str) -> i32 {
    let s = input.trim();
    let s = s.strip_suffix('%').unwrap_or(s).trim();
    if s.is_empty() {
        return 0;
    }
    if let Ok(v) = s.parse::<i32>() {
        return v;
    }
    if let Ok(v) = s.parse::<f64>() {
        return v.round() as i32;
    }
    0
}

pub struct EdgeTtsClient {
    websocket: tungstenite::WebSocket<MaybeTlsStream<TcpStream>>,
}

impl EdgeTtsClient {
    pub fn connect() -> Result<Self, TtsError> {
        let request = build_websocket_request()?;
        let (websocket, _) = tungstenite::connect(request)
            .map_err(|e| TtsError::Synthesis(format!("connect read-aloud websocket: {e}")))?;
        Ok(Self { websocket })
    }

    /// Synthesize `text`, invoking `on_audio` for each audio payload as it
    /// arrives. Returns after the service signals turn end.
    pub fn stream_synthesize(
        &mut self,
        text: &str,
        voice: &str,
        rate_percent: i32,
        on_audio: &mut dyn FnMut(&[u8]) -> Result<(), TtsError>,
    ) -> Result<(), TtsError> {
        self.websocket
            .send(build_config_message())
            .map_err(|e| TtsError::Synthesis(format!("send speech.config: {e}")))?;
        self.websocket
            .send(build_ssml_message(text, voice, rate_percent))
            .map_err(|e| TtsError::Synthesis(format!("send ssml: {e}")))?;

        let mut in_turn = false;
        loop {
            let message = self
                .websocket
                .read()
                .map_err(|e| TtsError::Synthesis(format!("read websocket: {e}")))?;
            match message {
                Message::Text(text) => {
                    if text.contains("turn.start") || text.contains("response") {
                        in_turn = true;
                    } else if text.contains("turn.end") {
                        return Ok(());
                    } else if !text.contains("audio.metadata") {
                        return Err(TtsError::Synthesis(format!(
                            "unexpected text message: {text}"
                        )));
                    }
                }
                Message::Binary(bytes) => {
                    if !in_turn || bytes.len() < 2 {
                        continue;
                    }
                    let header_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
                    let start = header_len + 2;
                    if start >= bytes.len() {
                        continue;
                    }
                    on_audio(&bytes[start..])?;
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
    }
}

/// Engine adapter: one websocket connection per segment, matching the
/// per-utterance connection model of the Read-Aloud service.
pub struct EdgeSpeechEngine;

impl SpeechEngine for EdgeSpeechEngine {
    fn stream(
        &mut self,
        text: &str,
        voice: &str,
        rate: &str,
        on_audio: &mut dyn FnMut(&[u8]) -> Result<(), TtsError>,
    ) -> Result<(), TtsError> {
        let mut client = EdgeTtsClient::connect()?;
        client.stream_synthesize(text, voice, parse_percent(rate), on_audio)
    }
}

// Clock-derived handshake token; see the public edge-tts discussion of the
// Sec-MS-GEC requirement.
fn gen_sec_ms_gec() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        + std::time::Duration::from_secs(11_644_473_600); // epoch 1601-01-01

    // 100 ns ticks, aligned to 5 minutes
    let ticks = duration.as_nanos() / 100;
    let ticks = ticks - ticks % 3_000_000_000;

    let mut hasher = Sha256::new();
    hasher.update(format!("{ticks}{TRUSTED_CLIENT_TOKEN}"));
    let hash = hasher.finalize();

    let mut hex = String::with_capacity(hash.len() * 2);
    for byte in hash.iter() {
        hex.push_str(&format!("{byte:02X}"));
    }
    hex
}

fn build_websocket_request() -> Result<tungstenite::handshake::client::Request, TtsError> {
    let connection_id = uuid::Uuid::new_v4().simple().to_string();
    let mut request = format!(
        "{}{}&Sec-MS-GEC={}&Sec-MS-GEC-Version={}",
        WSS_URL_PREFIX,
        connection_id,
        gen_sec_ms_gec(),
        SEC_MS_GEC_VERSION
    )
    .into_client_request()
    .map_err(|e| TtsError::Synthesis(format!("build websocket request: {e}")))?;

    let headers = request.headers_mut();
    headers.insert(header::PRAGMA, "no-cache".parse().expect("static header"));
    headers.insert(
        header::CACHE_CONTROL,
        "no-cache".parse().expect("static header"),
    );
    headers.insert(
        header::USER_AGENT,
        USER_AGENT.parse().expect("static header"),
    );
    headers.insert(header::ORIGIN, ORIGIN.parse().expect("static header"));

    Ok(request)
}

fn build_config_message() -> Message {
    static CONFIG_HEAD: &str = r#"{"context":{"synthesis":{"audio":{"metadataoptions":{"sentenceBoundaryEnabled":"false","wordBoundaryEnabled":"false"},"outputFormat":""#;
    static CONFIG_TAIL: &str = r#""}}}}"#;

    let ts = rfc2822_now();
    Message::Text(format!(
        "X-Timestamp:{ts}\r\nContent-Type:application/json; charset=utf-8\r\nPath:speech.config\r\n\r\n{CONFIG_HEAD}{AUDIO_FORMAT}{CONFIG_TAIL}"
    ))
}

fn build_ssml_message(text: &str, voice: &str, rate_percent: i32) -> Message {
    let ssml = format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'><voice name='{}'><prosody pitch='+0Hz' rate='{:+}%' volume='+0%'>{}</prosody></voice></speak>",
        voice,
        rate_percent,
        xml_escape(text),
    );

    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let ts = rfc2822_now();
    Message::Text(format!(
        "X-RequestId:{request_id}\r\nContent-Type:application/ssml+xml\r\nX-Timestamp:{ts}\r\nPath:ssml\r\n\r\n{ssml}"
    ))
}

fn rfc2822_now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc2822)
        .unwrap_or_default()
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

// ── Voice listing ────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct Voice {
    pub name: String,
    pub friendly_name: String,
    pub gender: String,
}

#[derive(Debug, Deserialize)]
struct RawVoice {
    #[serde(rename = "ShortName")]
    short_name: String,
    #[serde(rename = "FriendlyName", default)]
    friendly_name: String,
    #[serde(rename = "Gender", default)]
    gender: String,
}

static VOICES_CACHE: OnceLock<Vec<Voice>> = OnceLock::new();

/// Fetch the Read-Aloud voice list, cached after the first call, filtered by
/// language prefix (e.g. "en").
pub fn list_voices(language_prefix: &str) -> Result<Vec<Voice>, TtsError> {
    if VOICES_CACHE.get().is_none() {
        let url = format!(
            "{VOICES_URL}&Sec-MS-GEC={}&Sec-MS-GEC-Version={SEC_MS_GEC_VERSION}",
            gen_sec_ms_gec()
        );
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Origin", ORIGIN)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| TtsError::Synthesis(format!("fetch voice list: {e}")))?;
        let raw: Vec<RawVoice> = response
            .json::<Vec<Value>>()
            .map_err(|e| TtsError::Synthesis(format!("parse voice list: {e}")))?
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        let voices: Vec<Voice> = raw
            .into_iter()
            .map(|v| Voice {
                name: v.short_name,
                friendly_name: v.friendly_name,
                gender: v.gender,
            })
            .collect();
        debug!(target: "tts", voices = voices.len(), "voice list fetched");
        let _ = VOICES_CACHE.set(voices);
    }

    Ok(VOICES_CACHE
        .get()
        .map(|all| {
            all.iter()
                .filter(|v| v.name.starts_with(language_prefix))
                .cloned()
                .collect()
        })
        .unwrap_or_default())
}
