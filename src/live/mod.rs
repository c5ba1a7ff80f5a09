//! Live streaming session with the hosted speech model
//!
//! A [`LiveConnector`] opens one bidirectional session. Outbound audio goes
//! through a non-blocking [`LiveSession::send`]; inbound traffic arrives as
//! [`ServerEvent`]s on an unbounded channel.

mod gemini;
pub mod protocol;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::voice::{BlobSender, TransportBlob};

pub use gemini::{GeminiConnector, GeminiSession};

/// Inbound event from the live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Synthesized speech chunk
    Audio(TransportBlob),
    /// Speech-to-text delta of the user's speech
    InputTranscript(String),
    /// Speech-to-text delta of the model's speech
    OutputTranscript(String),
    /// The model finished its turn
    TurnComplete,
    /// The user barged in over the model's speech
    Interrupted,
    /// Transport-level failure
    Error(String),
    /// The remote side closed the session
    Closed,
}

/// Session parameters sent during the setup handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier (e.g. `gemini-2.5-flash-native-audio-preview-09-2025`)
    pub model: String,
    /// Prebuilt voice name (e.g. "Kore")
    pub voice_name: String,
    /// System instruction for the conversation
    pub system_instruction: String,
    /// Ask the server to transcribe the user's speech
    pub input_transcription: bool,
    /// Ask the server to transcribe the model's speech
    pub output_transcription: bool,
}

/// An open live session
pub trait LiveSession {
    /// Queue an audio blob without waiting for the network
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the session is closed
    fn send(&self, blob: TransportBlob) -> Result<()>;

    /// Clonable outbound handle for the capture path
    fn sender(&self) -> BlobSender;

    /// Close the session; safe to call more than once
    fn close(&mut self);
}

/// A freshly established session and its inbound events
pub struct LiveLink {
    pub session: Box<dyn LiveSession>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Opens live sessions
#[async_trait(?Send)]
pub trait LiveConnector {
    /// Connect and complete the setup handshake
    ///
    /// Returns once the remote side acknowledged the setup.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connect`] if the session cannot be established
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink>;
}
