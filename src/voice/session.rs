//! Voice session controller
//!
//! Owns every resource of one conversation (output device, microphone, live
//! session) and drives the `Idle → Connecting → Open → Closing → Idle`
//! lifecycle. Inbound events are handled on a single task; audio callbacks
//! only ever hand data over through channels.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::capture::{BLOCK_SIZE, CapturePipe, CaptureStats, Microphone, MicrophoneInput};
use super::codec::{self, TransportBlob};
use super::playback::{PLAYBACK_SAMPLE_RATE, SpeakerOutput};
use super::scheduler::{CompletionSender, OutputSink, PlaybackScheduler};
use super::status::{AvatarStatus, Notice, Signals};
use super::transcript::{MessagePart, TranscriptStore, TranscriptionAccumulator};
use crate::Result;
use crate::live::{LiveConnector, LiveSession, ServerEvent, SessionSetup};

/// Lifecycle state of a [`VoiceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
}

/// Opens the audio devices a session needs
pub trait AudioBackend {
    /// Open the output device, reporting finished chunks on `completions`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Audio`] if no output device can be opened
    fn open_output(&mut self, completions: CompletionSender) -> Result<Box<dyn OutputSink>>;

    /// Open the microphone, delivering blocks of `block_size` samples
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Permission`] if the microphone is unavailable
    fn open_microphone(&mut self, block_size: usize) -> Result<Box<dyn Microphone>>;
}

/// Default host audio devices via cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_output(&mut self, completions: CompletionSender) -> Result<Box<dyn OutputSink>> {
        Ok(Box::new(SpeakerOutput::open(completions)?))
    }

    fn open_microphone(&mut self, block_size: usize) -> Result<Box<dyn Microphone>> {
        Ok(Box::new(MicrophoneInput::open(block_size)?))
    }
}

/// The remote half of an open conversation
struct Link {
    id: Uuid,
    session: Box<dyn LiveSession>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// One real-time voice conversation
pub struct VoiceSession<B: AudioBackend, C: LiveConnector> {
    backend: B,
    connector: C,
    setup: SessionSetup,
    transcript: Arc<dyn TranscriptStore>,
    signals: Signals,
    state: SessionState,
    scheduler: PlaybackScheduler,
    accumulator: TranscriptionAccumulator,
    microphone: Option<Box<dyn Microphone>>,
    link: Option<Link>,
    capture_stats: Option<Arc<CaptureStats>>,
}

impl<B: AudioBackend, C: LiveConnector> VoiceSession<B, C> {
    /// Create an idle session
    pub fn new(
        backend: B,
        connector: C,
        setup: SessionSetup,
        transcript: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            backend,
            connector,
            setup,
            transcript,
            signals: Signals::new(),
            state: SessionState::Idle,
            scheduler: PlaybackScheduler::new(),
            accumulator: TranscriptionAccumulator::new(),
            microphone: None,
            link: None,
            capture_stats: None,
        }
    }

    /// Status and notice signals for the UI
    #[must_use]
    pub const fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current avatar status
    #[must_use]
    pub fn status(&self) -> AvatarStatus {
        self.signals.status()
    }

    /// Playback scheduler (active chunks and output clock)
    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Transcription collected for the current turn
    #[must_use]
    pub const fn accumulator(&self) -> &TranscriptionAccumulator {
        &self.accumulator
    }

    /// Capture counters of the current (or last) conversation
    #[must_use]
    pub fn capture_stats(&self) -> Option<Arc<CaptureStats>> {
        self.capture_stats.clone()
    }

    /// Identifier of the open conversation
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        self.link.as_ref().map(|l| l.id)
    }

    /// Whether any device or remote resource is still held
    #[must_use]
    pub const fn holds_resources(&self) -> bool {
        self.link.is_some() || self.microphone.is_some() || self.scheduler.is_attached()
    }

    /// Start a conversation
    ///
    /// Does nothing unless the session is idle. On failure every resource
    /// acquired so far is released, the microphone notice is raised and the
    /// session is idle again.
    ///
    /// # Errors
    ///
    /// Returns the device or connection error that stopped the start
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            tracing::debug!(state = ?self.state, "start ignored, session not idle");
            return Ok(());
        }

        self.scheduler.stop_all();
        self.signals.clear_notice();
        self.state = SessionState::Connecting;

        if let Err(e) = self.open().await {
            tracing::error!(error = %e, "failed to start voice session");
            self.signals.set_notice(Notice::MicrophoneUnavailable);
            self.teardown();
            return Err(e);
        }
        Ok(())
    }

    async fn open(&mut self) -> Result<()> {
        let output = self
            .backend
            .open_output(self.scheduler.completion_sender())?;
        self.scheduler.attach(output);

        self.microphone = Some(self.backend.open_microphone(BLOCK_SIZE)?);

        let link = self.connector.connect(&self.setup).await?;

        let pipe = CapturePipe::new(link.session.sender());
        self.capture_stats = Some(pipe.stats());
        if let Some(microphone) = self.microphone.as_mut() {
            microphone.connect(pipe.into_sink());
        }

        let id = Uuid::new_v4();
        self.link = Some(Link {
            id,
            session: link.session,
            events: link.events,
        });
        self.state = SessionState::Open;
        self.signals.set_status(AvatarStatus::Listening);

        tracing::info!(session_id = %id, "voice session open");
        Ok(())
    }

    /// Wait for the next inbound event
    ///
    /// Returns `None` when no conversation is open. A remote side that went
    /// away without a close frame is reported as [`ServerEvent::Closed`].
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        let link = self.link.as_mut()?;
        Some(link.events.recv().await.unwrap_or(ServerEvent::Closed))
    }

    /// React to one inbound event
    pub fn handle_event(&mut self, event: ServerEvent) {
        if self.state != SessionState::Open {
            tracing::debug!(state = ?self.state, "event ignored, session not open");
            return;
        }

        match event {
            ServerEvent::Audio(blob) => self.play(&blob),
            ServerEvent::InputTranscript(delta) => self.accumulator.push_input(&delta),
            ServerEvent::OutputTranscript(delta) => self.accumulator.push_output(&delta),
            ServerEvent::TurnComplete => {
                for (sender, text) in self.accumulator.complete_turn() {
                    self.transcript
                        .add_message(sender, vec![MessagePart::text(text)]);
                }
                self.signals.set_status(AvatarStatus::Listening);
            }
            ServerEvent::Interrupted => {
                self.scheduler.stop_all();
                self.signals.set_status(AvatarStatus::Listening);
            }
            ServerEvent::Error(message) => {
                tracing::error!(error = %message, "live session error");
                self.signals.set_notice(Notice::ConnectionLost);
                self.teardown();
            }
            ServerEvent::Closed => {
                tracing::info!("live session closed by remote");
                self.teardown();
            }
        }
    }

    fn play(&mut self, blob: &TransportBlob) {
        self.scheduler.reap();

        match codec::decode(blob, PLAYBACK_SAMPLE_RATE, 1) {
            Ok(buffer) => {
                if self.scheduler.schedule(buffer).is_some() {
                    self.signals.set_status(AvatarStatus::Speaking);
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    mime_type = blob.mime_type(),
                    "dropping undecodable audio chunk"
                );
            }
        }
    }

    /// Remove finished chunks; back to listening once playback drained
    pub fn reap_playback(&mut self) {
        self.scheduler.reap();
        self.playback_drained();
    }

    fn playback_drained(&self) {
        if self.scheduler.is_idle() && self.signals.status() == AvatarStatus::Speaking {
            self.signals.set_status(AvatarStatus::Listening);
        }
    }

    /// Drive the conversation until `shutdown` resolves or it ends
    ///
    /// The session is stopped before returning.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        while self.state == SessionState::Open {
            let Some(link) = self.link.as_mut() else {
                break;
            };

            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                event = link.events.recv() => {
                    self.handle_event(event.unwrap_or(ServerEvent::Closed));
                }
                Some(_) = self.scheduler.next_completion() => {
                    self.playback_drained();
                }
            }
        }

        self.stop();
    }

    /// End the conversation and release everything; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.state != SessionState::Idle || self.holds_resources() {
            tracing::info!("stopping voice session");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.state = SessionState::Closing;

        if let Some(mut link) = self.link.take() {
            link.session.close();
            tracing::debug!(session_id = %link.id, "remote session released");
        }

        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop_tracks();
            microphone.disconnect();
            drop(microphone);
        }

        drop(self.scheduler.detach());
        self.scheduler.stop_all();
        self.accumulator = TranscriptionAccumulator::new();

        if let Some(stats) = &self.capture_stats {
            tracing::debug!(
                frames_sent = stats.sent(),
                frames_dropped = stats.dropped(),
                "capture summary"
            );
        }

        self.signals.set_status(AvatarStatus::Idle);
        self.state = SessionState::Idle;
    }
}

impl<B: AudioBackend, C: LiveConnector> Drop for VoiceSession<B, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::Error;
    use crate::live::LiveLink;
    use crate::voice::transcript::MemoryTranscript;

    struct NoDevices;

    impl AudioBackend for NoDevices {
        fn open_output(&mut self, _: CompletionSender) -> Result<Box<dyn OutputSink>> {
            Err(Error::Audio("no output device available".to_string()))
        }

        fn open_microphone(&mut self, _: usize) -> Result<Box<dyn Microphone>> {
            Err(Error::Permission("denied".to_string()))
        }
    }

    struct Unreachable;

    #[async_trait(?Send)]
    impl LiveConnector for Unreachable {
        async fn connect(&self, _: &SessionSetup) -> Result<LiveLink> {
            Err(Error::Connect("unreachable".to_string()))
        }
    }

    fn session() -> VoiceSession<NoDevices, Unreachable> {
        let setup = SessionSetup {
            model: "m".to_string(),
            voice_name: "Kore".to_string(),
            system_instruction: String::new(),
            input_transcription: true,
            output_transcription: true,
        };
        VoiceSession::new(
            NoDevices,
            Unreachable,
            setup,
            Arc::new(MemoryTranscript::new()),
        )
    }

    #[tokio::test]
    async fn test_start_failure_returns_to_idle() {
        let mut session = session();
        let err = session.start().await.unwrap_err();

        assert!(matches!(err, Error::Audio(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.status(), AvatarStatus::Idle);
        assert_eq!(
            session.signals().notice(),
            Some(Notice::MicrophoneUnavailable)
        );
        assert!(!session.holds_resources());
    }

    #[test]
    fn test_events_ignored_when_idle() {
        let mut session = session();
        session.handle_event(ServerEvent::OutputTranscript("hello".to_string()));
        session.handle_event(ServerEvent::TurnComplete);

        assert!(session.accumulator().is_empty());
        assert_eq!(session.status(), AvatarStatus::Idle);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut session = session();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.signals().notice().is_none());
    }

    #[tokio::test]
    async fn test_next_event_without_link() {
        let mut session = session();
        assert!(session.next_event().await.is_none());
    }
}
