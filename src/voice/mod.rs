//! Voice pipeline
//!
//! Microphone capture, PCM transport encoding, gapless playback scheduling
//! and the session controller tying them to a live streaming session.

mod capture;
pub mod codec;
mod playback;
mod scheduler;
mod session;
mod status;
mod transcript;

pub use capture::{
    BLOCK_SIZE, BlobSender, BlockFramer, CapturePipe, CaptureStats, FrameSink, LinearResampler,
    Microphone, MicrophoneInput, SAMPLE_RATE,
};
pub use codec::{AudioBuffer, MimeType, TransportBlob};
pub use playback::{PLAYBACK_SAMPLE_RATE, SpeakerOutput};
pub use scheduler::{
    ChunkId, CompletionSender, OutputClock, OutputSink, PlaybackChunk, PlaybackScheduler,
};
pub use session::{AudioBackend, CpalBackend, SessionState, VoiceSession};
pub use status::{AvatarStatus, Notice, Signals};
pub use transcript::{
    FileData, GroundingSource, MemoryTranscript, Message, MessagePart, Sender, TranscriptStore,
    TranscriptionAccumulator, WebSource,
};
