//! Wire protocol for the transcription service
//!
//! The duplex connection carries three kinds of frames:
//!
//! 1. Outbound text: a single JSON config message, sent exactly once per
//!    recording before any audio.
//! 2. Outbound binary: raw little-endian int16 PCM, mono at 16 kHz, no
//!    envelope. Frame boundaries are whatever the capture callback delivers.
//! 3. Inbound text: JSON transcript events with optional per-word detail.
//!
//! There is no sequence numbering or acknowledgment; ordering relies on the
//! WebSocket in-order delivery guarantee, and the config-before-audio rule is
//! enforced by the session controller, not by the codec.

use serde::{Deserialize, Serialize};

/// The stream is always mono; multi-channel capture is downmixed before it
/// reaches the wire.
pub const CHANNELS: u32 = 1;

/// Errors raised by the protocol codec.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Inbound text frame was not valid JSON or had wrong field types.
    MalformedMessage(String),
    /// Outbound message could not be serialized.
    EncodeFailed(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::MalformedMessage(e) => write!(f, "Malformed server message: {}", e),
            ProtocolError::EncodeFailed(e) => write!(f, "Failed to encode message: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// How the server should slice the incoming stream for recognition.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferingStrategy {
    /// Process audio as soon as it arrives.
    Immediate,
    /// Accumulate `chunk_length_seconds` of audio, then look for a silence
    /// in the trailing `chunk_offset_seconds` to cut the chunk at.
    SilenceAtEndOfChunk {
        chunk_length_seconds: f64,
        chunk_offset_seconds: f64,
    },
}

/// Per-recording session configuration.
///
/// Built once when recording starts (the sample rate comes from the capture
/// device) and sent as the first message on the connection. Immutable after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub language: Option<String>,
    pub strategy: BufferingStrategy,
}

impl SessionConfig {
    pub fn new(sample_rate: u32, language: Option<String>, strategy: BufferingStrategy) -> Self {
        Self {
            sample_rate,
            channels: CHANNELS,
            language,
            strategy,
        }
    }
}

// ============================================================================
// Outbound messages
// ============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "config")]
    Config { data: ConfigData },
}

/// Flattened config fields as the server expects them.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigData {
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u32,
    pub language: Option<String>,
    pub processing_strategy: StrategyName,
    pub processing_args: ProcessingArgs,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    Immediate,
    SilenceAtEndOfChunk,
}

/// `processing_args` is `{}` for the immediate strategy and carries the chunk
/// parameters otherwise.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProcessingArgs {
    Chunked {
        chunk_length_seconds: f64,
        chunk_offset_seconds: f64,
    },
    Empty {},
}

/// Build the JSON config message for a session.
pub fn build_config_message(config: &SessionConfig) -> Result<String, ProtocolError> {
    let (processing_strategy, processing_args) = match config.strategy {
        BufferingStrategy::Immediate => (StrategyName::Immediate, ProcessingArgs::Empty {}),
        BufferingStrategy::SilenceAtEndOfChunk {
            chunk_length_seconds,
            chunk_offset_seconds,
        } => (
            StrategyName::SilenceAtEndOfChunk,
            ProcessingArgs::Chunked {
                chunk_length_seconds,
                chunk_offset_seconds,
            },
        ),
    };

    let msg = ClientMessage::Config {
        data: ConfigData {
            sample_rate: config.sample_rate,
            channels: config.channels,
            language: config.language.clone(),
            processing_strategy,
            processing_args,
        },
    };

    serde_json::to_string(&msg).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))
}

/// Serialize PCM samples into a binary audio frame: raw little-endian int16,
/// no header.
pub fn encode_frame(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

// ============================================================================
// Inbound messages
// ============================================================================

/// A transcript event received from the server.
///
/// Only `text` is required; everything else depends on what the recognition
/// backend reports. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordScore>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

/// One recognized word with its confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    pub word: String,
    pub probability: f64,
}

/// Parse an inbound text frame into a [`TranscriptEvent`].
pub fn parse_server_message(text: &str) -> Result<TranscriptEvent, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
}
