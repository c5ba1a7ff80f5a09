//! Shared test utilities
//!
//! Fake audio devices and a fake live connector that record everything the
//! session does to them into one shared [`Probe`].

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tutor_live::live::LiveLink;
use tutor_live::voice::codec;
use tutor_live::voice::{
    AudioBackend, AudioBuffer, ChunkId, CompletionSender, FrameSink, MemoryTranscript,
    Microphone, OutputSink, PLAYBACK_SAMPLE_RATE, TransportBlob, VoiceSession,
};
use tutor_live::{Error, LiveConnector, LiveSession, Result, ServerEvent, SessionSetup};

/// Everything the fakes observed
#[derive(Default)]
pub struct ProbeState {
    pub now: f64,
    pub started: Vec<(ChunkId, f64)>,
    pub stopped: Vec<ChunkId>,
    pub output_open: bool,
    pub mic_open: bool,
    pub remote_open: bool,
    pub fail_output: bool,
    pub fail_mic: bool,
    pub fail_connect: bool,
    pub setups: Vec<SessionSetup>,
    pub teardown_log: Vec<&'static str>,
    completions: Option<CompletionSender>,
    mic_sink: Option<FrameSink>,
    server: Option<mpsc::UnboundedSender<ServerEvent>>,
    uplink: Option<mpsc::UnboundedReceiver<TransportBlob>>,
}

/// Shared handle onto the fakes
#[derive(Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.0.lock().unwrap()
    }

    pub fn set_now(&self, now: f64) {
        self.state().now = now;
    }

    pub fn starts(&self) -> Vec<f64> {
        self.state().started.iter().map(|(_, at)| *at).collect()
    }

    pub fn started_ids(&self) -> Vec<ChunkId> {
        self.state().started.iter().map(|(id, _)| *id).collect()
    }

    pub fn stopped(&self) -> usize {
        self.state().stopped.len()
    }

    /// Report a chunk as finished, as the render callback would
    pub fn finish(&self, id: ChunkId) {
        let tx = self.state().completions.clone();
        tx.expect("output not open").send(id).unwrap();
    }

    /// Deliver samples through the microphone callback
    pub fn feed_mic(&self, samples: &[f32]) {
        let mut state = self.state();
        if let Some(sink) = state.mic_sink.as_mut() {
            sink(samples);
        }
    }

    /// Queue an inbound event from the remote side
    pub fn emit(&self, event: ServerEvent) {
        let tx = self.state().server.clone();
        tx.expect("not connected").send(event).unwrap();
    }

    /// Drain blobs the session sent to the remote side
    pub fn uplink(&self) -> Vec<TransportBlob> {
        let mut state = self.state();
        let mut blobs = Vec::new();
        if let Some(rx) = state.uplink.as_mut() {
            while let Ok(blob) = rx.try_recv() {
                blobs.push(blob);
            }
        }
        blobs
    }

    pub fn teardown_log(&self) -> Vec<&'static str> {
        self.state().teardown_log.clone()
    }

    /// No device or remote resource is held
    pub fn all_released(&self) -> bool {
        let state = self.state();
        !state.output_open && !state.mic_open && !state.remote_open
    }
}

pub struct FakeBackend(pub Probe);

impl AudioBackend for FakeBackend {
    fn open_output(&mut self, completions: CompletionSender) -> Result<Box<dyn OutputSink>> {
        let mut state = self.0.state();
        if state.fail_output {
            return Err(Error::Audio("no output device available".to_string()));
        }
        state.output_open = true;
        state.completions = Some(completions);
        Ok(Box::new(FakeOutput(self.0.clone())))
    }

    fn open_microphone(&mut self, _block_size: usize) -> Result<Box<dyn Microphone>> {
        let mut state = self.0.state();
        if state.fail_mic {
            return Err(Error::Permission("microphone access denied".to_string()));
        }
        state.mic_open = true;
        Ok(Box::new(FakeMicrophone(self.0.clone())))
    }
}

pub struct FakeOutput(Probe);

impl OutputSink for FakeOutput {
    fn current_time(&self) -> f64 {
        self.0.state().now
    }

    fn start(&mut self, id: ChunkId, _buffer: &AudioBuffer, at: f64) {
        self.0.state().started.push((id, at));
    }

    fn stop(&mut self, id: ChunkId) {
        self.0.state().stopped.push(id);
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.output_open = false;
        state.teardown_log.push("output released");
    }
}

pub struct FakeMicrophone(Probe);

impl Microphone for FakeMicrophone {
    fn connect(&mut self, sink: FrameSink) {
        self.0.state().mic_sink = Some(sink);
    }

    fn disconnect(&mut self) {
        let mut state = self.0.state();
        state.mic_sink = None;
        state.teardown_log.push("capture disconnected");
    }

    fn stop_tracks(&mut self) {
        self.0.state().teardown_log.push("tracks stopped");
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.mic_open = false;
        state.teardown_log.push("input released");
    }
}

pub struct FakeConnector(pub Probe);

#[async_trait(?Send)]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: &SessionSetup) -> Result<LiveLink> {
        let mut state = self.0.state();
        if state.fail_connect {
            return Err(Error::Connect("connection refused".to_string()));
        }

        let (event_tx, events) = mpsc::unbounded_channel();
        let (outbound, uplink) = mpsc::unbounded_channel();
        state.setups.push(setup.clone());
        state.server = Some(event_tx);
        state.uplink = Some(uplink);
        state.remote_open = true;

        Ok(LiveLink {
            session: Box::new(FakeSession {
                probe: self.0.clone(),
                outbound,
                closed: false,
            }),
            events,
        })
    }
}

pub struct FakeSession {
    probe: Probe,
    outbound: mpsc::UnboundedSender<TransportBlob>,
    closed: bool,
}

impl LiveSession for FakeSession {
    fn send(&self, blob: TransportBlob) -> Result<()> {
        self.outbound
            .send(blob)
            .map_err(|_| Error::Transport("closed".to_string()))
    }

    fn sender(&self) -> mpsc::UnboundedSender<TransportBlob> {
        self.outbound.clone()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.probe.state();
            state.remote_open = false;
            state.teardown_log.push("remote closed");
        }
    }
}

pub type TestSession = VoiceSession<FakeBackend, FakeConnector>;

pub fn setup() -> SessionSetup {
    SessionSetup {
        model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
        voice_name: "Kore".to_string(),
        system_instruction: "You are a teaching assistant.".to_string(),
        input_transcription: true,
        output_transcription: true,
    }
}

/// A session wired to fresh fakes
pub fn session() -> (TestSession, Probe, MemoryTranscript) {
    let probe = Probe::new();
    let transcript = MemoryTranscript::new();
    let session = VoiceSession::new(
        FakeBackend(probe.clone()),
        FakeConnector(probe.clone()),
        setup(),
        Arc::new(transcript.clone()),
    );
    (session, probe, transcript)
}

/// Silent speech chunk of `seconds` at the playback rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn speech(seconds: f64) -> TransportBlob {
    let frames = (seconds * f64::from(PLAYBACK_SAMPLE_RATE)).round() as usize;
    codec::encode(&vec![0.0; frames], PLAYBACK_SAMPLE_RATE)
}

/// Receive and handle `n` queued events
pub async fn pump(session: &mut TestSession, n: usize) {
    for _ in 0..n {
        let event = session.next_event().await.expect("session not open");
        session.handle_event(event);
    }
}
