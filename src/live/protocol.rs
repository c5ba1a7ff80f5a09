//! Wire messages for the bidirectional streaming API
//!
//! Every frame is one JSON object keyed by its message kind, e.g.
//! `{"setup": {...}}` or `{"serverContent": {...}}`.

use serde::{Deserialize, Serialize};

use super::{ServerEvent, SessionSetup};
use crate::voice::TransportBlob;

/// Modality requested for model responses
const AUDIO_MODALITY: &str = "AUDIO";

/// Empty JSON object (`{}`), used for flag-like config sections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Message sent by the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build the setup handshake for `setup`
    #[must_use]
    pub fn setup(setup: &SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        let system_instruction = (!setup.system_instruction.is_empty()).then(|| Content {
            parts: vec![TextPart {
                text: setup.system_instruction.clone(),
            }],
        });

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![AUDIO_MODALITY.to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction,
            input_audio_transcription: setup.input_transcription.then_some(Empty {}),
            output_audio_transcription: setup.output_transcription.then_some(Empty {}),
        })
    }

    /// Wrap one captured audio blob
    #[must_use]
    pub fn audio(blob: TransportBlob) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<TransportBlob>,
}

/// Message received from the server
///
/// Unknown message kinds deserialize to an all-`None` value and are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Empty>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<TransportBlob>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Whether this acknowledges the setup handshake
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into pipeline events
    ///
    /// Order: audio, input transcript, output transcript, turn complete,
    /// interrupted.
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if let Some(go_away) = self.go_away {
            tracing::warn!(time_left = ?go_away.time_left, "server will close the session soon");
        }

        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|p| p.inline_data)
                    .map(ServerEvent::Audio),
            );
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::InputTranscript(text));
        }
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            events.push(ServerEvent::OutputTranscript(text));
        }
        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice_name: "Kore".to_string(),
            system_instruction: "You are a teaching assistant.".to_string(),
            input_transcription: true,
            output_transcription: false,
        }
    }

    #[test]
    fn test_setup_shape() {
        let json = serde_json::to_value(ClientMessage::setup(&setup())).unwrap();
        let setup = &json["setup"];

        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            setup["systemInstruction"]["parts"][0]["text"],
            "You are a teaching assistant."
        );
        assert_eq!(setup["inputAudioTranscription"], serde_json::json!({}));
        assert!(setup.get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_model_prefix_not_doubled() {
        let mut s = setup();
        s.model = "models/custom".to_string();
        let json = serde_json::to_value(ClientMessage::setup(&s)).unwrap();
        assert_eq!(json["setup"]["model"], "models/custom");
    }

    #[test]
    fn test_audio_shape() {
        let blob = TransportBlob::new("AAAA", "audio/pcm;rate=16000");
        let json = serde_json::to_value(ClientMessage::audio(blob)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "realtimeInput": {
                    "mediaChunks": [{ "data": "AAAA", "mimeType": "audio/pcm;rate=16000" }]
                }
            })
        );
    }

    #[test]
    fn test_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_server_content_event_order() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}]},
                "inputTranscription": {"text": "hello"},
                "outputTranscription": {"text": "hi there"},
                "turnComplete": true,
                "interrupted": true
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();

        assert_eq!(
            msg.into_events(),
            vec![
                ServerEvent::Audio(TransportBlob::new("AAAA", "audio/pcm;rate=24000")),
                ServerEvent::InputTranscript("hello".to_string()),
                ServerEvent::OutputTranscript("hi there".to_string()),
                ServerEvent::TurnComplete,
                ServerEvent::Interrupted,
            ]
        );
    }

    #[test]
    fn test_unknown_message_ignored() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"toolCall":{"functionCalls":[]}}"#).unwrap();
        assert!(!msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }
}
