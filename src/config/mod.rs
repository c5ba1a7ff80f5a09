//! Configuration management for the voice session

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use self::file::TutorConfigFile;
use crate::live::SessionSetup;

/// Default websocket endpoint of the bidirectional streaming API
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice
pub const DEFAULT_VOICE: &str = "Kore";

/// Default system instruction for voice conversations
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and helpful teaching assistant. \
When asked a question, provide accurate, concise answers suitable for a university student. \
Be conversational and engaging.";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Tutor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Live session configuration
    pub live: LiveConfig,
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Websocket endpoint
    pub endpoint: String,

    /// API key (`GEMINI_API_KEY` or `GOOGLE_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Model identifier
    pub model: String,

    /// Prebuilt voice name
    pub voice_name: String,

    /// System instruction sent at setup
    pub system_instruction: String,

    /// How long to wait for the setup handshake
    pub connect_timeout: Duration,

    /// Request transcription of the user's speech
    pub input_transcription: bool,

    /// Request transcription of the model's speech
    pub output_transcription: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

impl LiveConfig {
    /// Session parameters for the setup handshake
    #[must_use]
    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.model.clone(),
            voice_name: self.voice_name.clone(),
            system_instruction: self.system_instruction.clone(),
            input_transcription: self.input_transcription,
            output_transcription: self.output_transcription,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    pub fn resolve(fc: TutorConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = LiveConfig::default();
        let fl = fc.live;

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("GOOGLE_API_KEY"))
            .or(fl.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let connect_timeout = env("TUTOR_LIVE_CONNECT_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .or(fl.connect_timeout_secs)
            .map_or(defaults.connect_timeout, Duration::from_secs);

        let live = LiveConfig {
            endpoint: env("TUTOR_LIVE_ENDPOINT")
                .or(fl.endpoint)
                .unwrap_or(defaults.endpoint),
            api_key,
            model: env("TUTOR_LIVE_MODEL")
                .or(fl.model)
                .unwrap_or(defaults.model),
            voice_name: env("TUTOR_LIVE_VOICE")
                .or(fl.voice_name)
                .unwrap_or(defaults.voice_name),
            system_instruction: env("TUTOR_LIVE_INSTRUCTION")
                .or(fl.system_instruction)
                .unwrap_or(defaults.system_instruction),
            connect_timeout,
            input_transcription: fl
                .input_transcription
                .unwrap_or(defaults.input_transcription),
            output_transcription: fl
                .output_transcription
                .unwrap_or(defaults.output_transcription),
        };

        tracing::debug!(
            endpoint = %live.endpoint,
            model = %live.model,
            voice = %live.voice_name,
            has_api_key = live.api_key.is_some(),
            "live config resolved"
        );

        Self { live }
    }
}
