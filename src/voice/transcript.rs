//! Transcript messages and per-turn transcription aggregation

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Model,
}

/// A web citation attached to a model answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    pub title: String,
}

/// Grounding source wrapper as delivered by the API
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroundingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSource>,
}

/// Reference to an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// One part of a transcript message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<GroundingSource>>,
}

impl MessagePart {
    /// A plain text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// A message in the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub parts: Vec<MessagePart>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only chat transcript owned by the UI
pub trait TranscriptStore: Send + Sync {
    /// Append a message; ordering is call order
    fn add_message(&self, sender: Sender, parts: Vec<MessagePart>);
}

/// In-memory transcript
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscript {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemoryTranscript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all messages so far
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// `(sender, text)` pairs for messages whose first part is text
    #[must_use]
    pub fn texts(&self) -> Vec<(Sender, String)> {
        self.messages()
            .into_iter()
            .filter_map(|m| {
                let text = m.parts.first()?.text.clone()?;
                Some((m.sender, text))
            })
            .collect()
    }
}

impl TranscriptStore for MemoryTranscript {
    fn add_message(&self, sender: Sender, parts: Vec<MessagePart>) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(Message {
                sender,
                parts,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Transcription text collected for the turn in progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum TurnState {
    /// Nothing heard since the last turn boundary
    #[default]
    Empty,
    /// At least one non-empty delta arrived this turn
    Accumulating { input: String, output: String },
}

/// Collects streamed speech-to-text deltas until the turn completes
#[derive(Debug, Clone, Default)]
pub struct TranscriptionAccumulator {
    state: TurnState,
}

impl TranscriptionAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta of the user's speech
    pub fn push_input(&mut self, delta: &str) {
        if let Some((input, _)) = self.buffers(delta) {
            input.push_str(delta);
        }
    }

    /// Append a delta of the model's speech
    pub fn push_output(&mut self, delta: &str) {
        if let Some((_, output)) = self.buffers(delta) {
            output.push_str(delta);
        }
    }

    fn buffers(&mut self, delta: &str) -> Option<(&mut String, &mut String)> {
        if delta.is_empty() {
            return None;
        }
        if self.state == TurnState::Empty {
            self.state = TurnState::Accumulating {
                input: String::new(),
                output: String::new(),
            };
        }
        match &mut self.state {
            TurnState::Accumulating { input, output } => Some((input, output)),
            TurnState::Empty => None,
        }
    }

    /// Close the turn, returning messages to emit and resetting to empty
    ///
    /// User text comes before model text; empty buffers produce nothing.
    pub fn complete_turn(&mut self) -> Vec<(Sender, String)> {
        match std::mem::take(&mut self.state) {
            TurnState::Empty => Vec::new(),
            TurnState::Accumulating { input, output } => [(Sender::User, input), (Sender::Model, output)]
                .into_iter()
                .filter(|(_, text)| !text.is_empty())
                .collect(),
        }
    }

    /// Whether no text has arrived this turn
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state == TurnState::Empty
    }

    /// User text so far this turn
    #[must_use]
    pub fn input(&self) -> &str {
        match &self.state {
            TurnState::Accumulating { input, .. } => input,
            TurnState::Empty => "",
        }
    }

    /// Model text so far this turn
    #[must_use]
    pub fn output(&self) -> &str {
        match &self.state {
            TurnState::Accumulating { output, .. } => output,
            TurnState::Empty => "",
        }
    }
}
