//! TOML configuration file loading
//!
//! Supports `~/.config/tutor-live/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TutorConfigFile {
    /// Live session configuration
    #[serde(default)]
    pub live: LiveFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// Websocket endpoint of the streaming API
    pub endpoint: Option<String>,

    /// API key (prefer the environment for this)
    pub api_key: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-09-2025")
    pub model: Option<String>,

    /// Prebuilt voice (e.g. "Kore")
    pub voice_name: Option<String>,

    /// System instruction for voice conversations
    pub system_instruction: Option<String>,

    /// Seconds to wait for the setup handshake
    pub connect_timeout_secs: Option<u64>,

    /// Transcribe the user's speech
    pub input_transcription: Option<bool>,

    /// Transcribe the model's speech
    pub output_transcription: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TutorConfigFile {
    config_file_path().map_or_else(TutorConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Falls back to defaults (with a warning) when the file is unreadable or invalid.
pub fn load_config_file_from(path: &Path) -> TutorConfigFile {
    if !path.exists() {
        return TutorConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            TutorConfigFile::default()
        }
    }
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the file can't be read, or
/// [`Error::Toml`](crate::Error::Toml) if it
/// isn't valid TOML for this schema
pub fn read_config_file(path: &Path) -> Result<TutorConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/tutor-live/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tutor-live").join("config.toml"))
}
