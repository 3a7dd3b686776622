use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::BufferingStrategy;
use crate::state_machine::RecordingOptions;

const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_DIR_NAME: &str = "streamscribe";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// WebSocket address of the transcription server.
    pub server_address: String,

    /// ISO language code, or None for automatic detection.
    pub language: Option<String>,

    /// Server-side buffering strategy: "immediate" or "silence_at_end_of_chunk".
    pub buffering_strategy: String,

    /// Chunk length used by the silence_at_end_of_chunk strategy.
    pub chunk_length_seconds: f64,

    /// Trailing window the server inspects for silence before cutting a chunk.
    pub chunk_offset_seconds: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            server_address: "ws://127.0.0.1:8765".to_string(),
            language: None,
            buffering_strategy: "immediate".to_string(),
            chunk_length_seconds: 5.0,
            chunk_offset_seconds: 1.0,
        }
    }
}

impl AppSettings {
    /// Turn the persisted settings into per-recording options. Unknown
    /// strategy names fall back to immediate with a warning.
    pub fn recording_options(&self) -> RecordingOptions {
        let strategy = match self.buffering_strategy.as_str() {
            "immediate" => BufferingStrategy::Immediate,
            "silence_at_end_of_chunk" => BufferingStrategy::SilenceAtEndOfChunk {
                chunk_length_seconds: self.chunk_length_seconds,
                chunk_offset_seconds: self.chunk_offset_seconds,
            },
            other => {
                log::warn!(
                    "Settings: unknown buffering strategy {:?}, using immediate",
                    other
                );
                BufferingStrategy::Immediate
            }
        };

        RecordingOptions {
            language: self.language.clone(),
            strategy,
        }
    }
}

fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };
    load_settings_from(&path)
}

fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let path = settings_path()?;
    save_settings_to(settings, &path)
}

fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write atomically: write to a temp file in the same directory, then rename.
    // This prevents partial/corrupt settings.json if the process dies mid-write.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Unix, rename atomically replaces the destination. On Windows, rename
    // fails if the destination exists, so remove it first (ignoring NotFound).
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!(
                    "Remove existing settings file {:?}: {}",
                    path, e
                ));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Replace settings file {:?}: {}", path, e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.server_address, "ws://127.0.0.1:8765");
        assert!(settings.language.is_none());
        assert_eq!(settings.buffering_strategy, "immediate");
        assert_eq!(settings.chunk_length_seconds, 5.0);
        assert_eq!(settings.chunk_offset_seconds, 1.0);
    }

    #[test]
    fn test_recording_options_immediate() {
        let settings = AppSettings::default();
        let options = settings.recording_options();
        assert_eq!(options.strategy, BufferingStrategy::Immediate);
        assert!(options.language.is_none());
    }

    #[test]
    fn test_recording_options_silence_strategy() {
        let settings = AppSettings {
            language: Some("en".to_string()),
            buffering_strategy: "silence_at_end_of_chunk".to_string(),
            chunk_length_seconds: 3.0,
            chunk_offset_seconds: 0.5,
            ..Default::default()
        };
        let options = settings.recording_options();
        assert_eq!(
            options.strategy,
            BufferingStrategy::SilenceAtEndOfChunk {
                chunk_length_seconds: 3.0,
                chunk_offset_seconds: 0.5,
            }
        );
        assert_eq!(options.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_unknown_strategy_falls_back_to_immediate() {
        let settings = AppSettings {
            buffering_strategy: "mystery".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.recording_options().strategy,
            BufferingStrategy::Immediate
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = AppSettings {
            server_address: "ws://example.com:9000".to_string(),
            language: Some("de".to_string()),
            ..Default::default()
        };

        save_settings_to(&settings, &path).unwrap();
        let loaded = load_settings_from(&path);

        assert_eq!(loaded.server_address, "ws://example.com:9000");
        assert_eq!(loaded.language.as_deref(), Some("de"));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&dir.path().join("nope.json"));
        assert_eq!(loaded.server_address, AppSettings::default().server_address);
    }

    #[test]
    fn test_load_corrupt_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.buffering_strategy, "immediate");
    }
}
