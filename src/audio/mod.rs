//! Audio capture and processing for streamscribe
//!
//! This module handles microphone input capture via CPAL plus the two pure
//! conversion steps every captured block goes through: box-filter
//! downsampling to the wire rate and f32 → int16 PCM encoding.

mod capture;
mod encoder;
mod resampler;

pub use capture::{start_capture, CaptureHandle};
pub use encoder::encode;
pub use resampler::downsample;

/// Sample rate of the PCM stream on the wire. ASR and VAD models on the
/// server side expect mono 16 kHz int16 audio.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Errors that can occur during audio capture and processing.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    UnsupportedRate { input: u32, output: u32 },
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::UnsupportedRate { input, output } => {
                write!(
                    f,
                    "Cannot resample {} Hz to {} Hz (downsampling only)",
                    input, output
                )
            }
        }
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoInputDevice;
        assert!(err.to_string().contains("input device"));

        let err = AudioError::UnsupportedRate {
            input: 8000,
            output: 16000,
        };
        assert!(err.to_string().contains("8000"));
        assert!(err.to_string().contains("16000"));
    }
}
