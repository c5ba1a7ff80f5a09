//! Tutor Live - real-time voice conversations with a tutoring assistant
//!
//! This library provides the voice session pipeline:
//! - Microphone capture framed into fixed PCM blocks
//! - Streaming to and from a hosted speech model over a websocket
//! - Gapless, interruptible playback of synthesized speech
//! - Turn-level transcripts and avatar status signals
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  blocks   ┌─────────────┐  blobs   ┌──────────────────┐
//! │  Microphone  ├──────────►│ CapturePipe ├─────────►│                  │
//! └──────────────┘           └─────────────┘          │   Live session   │
//!                                                     │   (websocket)    │
//! ┌──────────────┐  chunks   ┌─────────────┐  events  │                  │
//! │   Speaker    │◄──────────┤ VoiceSession│◄─────────┤                  │
//! └──────────────┘           └──────┬──────┘          └──────────────────┘
//!                                   │
//!                     status, notices, transcript
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod voice;

pub use config::{Config, LiveConfig};
pub use error::{DecodeError, Error, Result};
pub use live::{GeminiConnector, LiveConnector, LiveSession, ServerEvent, SessionSetup};
pub use voice::{AvatarStatus, CpalBackend, Notice, VoiceSession};
