//! Gapless playback scheduling
//!
//! Inbound speech arrives as a stream of short buffers whose arrival timing
//! has nothing to do with their playback length. The scheduler lays them end
//! to end on the output device's clock so they play back-to-back, and can
//! cut everything off at once when the user barges in.
//!
//! The scheduler is the only owner of the [`OutputClock`] and the active
//! chunk set. Sinks report finished chunks over a channel and the scheduler
//! removes them when it drains that channel.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use super::codec::AudioBuffer;

/// Identifier of a scheduled chunk, unique per scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(u64);

impl ChunkId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Sender a sink uses to report naturally finished chunks
pub type CompletionSender = mpsc::UnboundedSender<ChunkId>;

/// An output device that can start and stop buffers on its own clock
pub trait OutputSink {
    /// Current position of the device's output clock, in seconds
    fn current_time(&self) -> f64;

    /// Begin playing `buffer` when the output clock reaches `at`
    ///
    /// When the buffer finishes on its own the sink reports `id` through the
    /// completion sender it was created with.
    fn start(&mut self, id: ChunkId, buffer: &AudioBuffer, at: f64);

    /// Stop a chunk immediately, even mid-playback
    fn stop(&mut self, id: ChunkId);
}

/// Next available start time on the shared output timeline
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputClock {
    next_start: f64,
}

impl OutputClock {
    /// Reserve `duration` seconds starting no earlier than `now`
    ///
    /// Returns the start time and advances the cursor past the reservation.
    pub fn reserve(&mut self, now: f64, duration: f64) -> f64 {
        let start = self.next_start.max(now);
        self.next_start = start + duration;
        start
    }

    /// Rewind to zero
    pub const fn reset(&mut self) {
        self.next_start = 0.0;
    }

    /// Current cursor value
    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }
}

/// A decoded buffer placed on the output timeline
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    id: ChunkId,
    start_at: f64,
    buffer: AudioBuffer,
}

impl PlaybackChunk {
    /// Chunk identifier
    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    /// Scheduled start on the output clock, in seconds
    #[must_use]
    pub const fn start_at(&self) -> f64 {
        self.start_at
    }

    /// Playback duration in seconds
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    /// End time on the output clock
    #[must_use]
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration()
    }
}

/// Schedules decoded chunks back-to-back on an output sink
pub struct PlaybackScheduler {
    sink: Option<Box<dyn OutputSink>>,
    clock: OutputClock,
    active: BTreeMap<ChunkId, PlaybackChunk>,
    next_id: u64,
    completions_tx: CompletionSender,
    completions_rx: mpsc::UnboundedReceiver<ChunkId>,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    /// Create a scheduler with no sink attached
    #[must_use]
    pub fn new() -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            sink: None,
            clock: OutputClock::default(),
            active: BTreeMap::new(),
            next_id: 0,
            completions_tx,
            completions_rx,
        }
    }

    /// Sender to hand to a sink so it can report finished chunks
    #[must_use]
    pub fn completion_sender(&self) -> CompletionSender {
        self.completions_tx.clone()
    }

    /// Attach the output device for a session
    pub fn attach(&mut self, sink: Box<dyn OutputSink>) {
        self.sink = Some(sink);
    }

    /// Detach the output device, returning it so the caller can release it
    pub fn detach(&mut self) -> Option<Box<dyn OutputSink>> {
        self.sink.take()
    }

    /// Whether an output device is attached
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Schedule a buffer directly after everything already queued
    ///
    /// If the queue has run dry (or was reset by [`stop_all`](Self::stop_all))
    /// the chunk is anchored to the device's current time instead. Returns
    /// `None` when no sink is attached and the buffer is discarded.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Option<&PlaybackChunk> {
        let Some(sink) = self.sink.as_mut() else {
            tracing::debug!(
                duration = buffer.duration(),
                "no output attached, discarding audio"
            );
            return None;
        };

        let now = sink.current_time();
        let queued_until = self.clock.next_start();
        if queued_until > 0.0 && now > queued_until {
            tracing::debug!(
                gap = now - queued_until,
                "playback underrun, re-anchoring to device time"
            );
        }

        let start_at = self.clock.reserve(now, buffer.duration());
        let id = ChunkId(self.next_id);
        self.next_id += 1;

        sink.start(id, &buffer, start_at);
        tracing::trace!(
            chunk = id.get(),
            start_at,
            duration = buffer.duration(),
            "chunk scheduled"
        );

        let chunk = self.active.entry(id).or_insert(PlaybackChunk {
            id,
            start_at,
            buffer,
        });
        Some(&*chunk)
    }

    /// Halt every active chunk, clear the active set and rewind the clock
    ///
    /// Safe to call with nothing playing and with no sink attached.
    pub fn stop_all(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            for id in self.active.keys() {
                sink.stop(*id);
            }
        }
        if !self.active.is_empty() {
            tracing::debug!(stopped = self.active.len(), "playback stopped");
        }
        self.active.clear();
        self.clock.reset();
    }

    /// Remove a chunk that finished on its own
    ///
    /// Returns false for chunks that are no longer active, such as ones
    /// already cleared by [`stop_all`](Self::stop_all).
    pub fn complete(&mut self, id: ChunkId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Drain pending completion reports without waiting
    ///
    /// Returns how many active chunks were removed.
    pub fn reap(&mut self) -> usize {
        let mut removed = 0;
        while let Ok(id) = self.completions_rx.try_recv() {
            if self.complete(id) {
                removed += 1;
            }
        }
        removed
    }

    /// Wait for the next active chunk to finish and remove it
    ///
    /// Stale reports for chunks that were already stopped are skipped.
    pub async fn next_completion(&mut self) -> Option<ChunkId> {
        while let Some(id) = self.completions_rx.recv().await {
            if self.complete(id) {
                return Some(id);
            }
        }
        None
    }

    /// Chunks currently scheduled or playing
    pub fn active(&self) -> impl Iterator<Item = &PlaybackChunk> {
        self.active.values()
    }

    /// Number of chunks currently scheduled or playing
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is scheduled or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    /// Current output clock cursor
    #[must_use]
    pub const fn clock(&self) -> f64 {
        self.clock.next_start()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct SinkLog {
        now: f64,
        started: Vec<(ChunkId, f64)>,
        stopped: Vec<ChunkId>,
    }

    struct FakeSink(Rc<RefCell<SinkLog>>);

    impl OutputSink for FakeSink {
        fn current_time(&self) -> f64 {
            self.0.borrow().now
        }

        fn start(&mut self, id: ChunkId, _buffer: &AudioBuffer, at: f64) {
            self.0.borrow_mut().started.push((id, at));
        }

        fn stop(&mut self, id: ChunkId) {
            self.0.borrow_mut().stopped.push(id);
        }
    }

    fn seconds(duration: f64) -> AudioBuffer {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (duration * 24000.0) as usize;
        AudioBuffer::new(vec![0.0; frames], 24000, 1)
    }

    fn scheduler() -> (PlaybackScheduler, Rc<RefCell<SinkLog>>) {
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let mut scheduler = PlaybackScheduler::new();
        scheduler.attach(Box::new(FakeSink(Rc::clone(&log))));
        (scheduler, log)
    }

    #[test]
    fn test_clock_reserve() {
        let mut clock = OutputClock::default();
        assert!((clock.reserve(0.0, 1.0) - 0.0).abs() < f64::EPSILON);
        assert!((clock.reserve(0.2, 0.5) - 1.0).abs() < f64::EPSILON);
        assert!((clock.next_start() - 1.5).abs() < f64::EPSILON);

        // Fell behind real time
        assert!((clock.reserve(3.0, 0.5) - 3.0).abs() < f64::EPSILON);
        clock.reset();
        assert!(clock.next_start().abs() < f64::EPSILON);
    }

    #[test]
    fn test_back_to_back() {
        let (mut scheduler, log) = scheduler();
        let durations = [0.25, 1.0, 0.5, 0.125];

        for d in durations {
            scheduler.schedule(seconds(d)).unwrap();
        }

        let starts: Vec<f64> = log.borrow().started.iter().map(|(_, at)| *at).collect();
        for i in 0..durations.len() - 1 {
            assert!((starts[i + 1] - (starts[i] + durations[i])).abs() < 1e-12);
        }
        assert_eq!(scheduler.active_len(), 4);
    }

    #[test]
    fn test_cold_start_anchors_to_now() {
        let (mut scheduler, log) = scheduler();
        log.borrow_mut().now = 7.5;

        let chunk = scheduler.schedule(seconds(1.0)).unwrap();
        assert!((chunk.start_at() - 7.5).abs() < f64::EPSILON);
        assert!((scheduler.clock() - 8.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stop_all_clears_and_rewinds() {
        let (mut scheduler, log) = scheduler();
        scheduler.schedule(seconds(1.0));
        scheduler.schedule(seconds(1.0));

        scheduler.stop_all();
        assert!(scheduler.is_idle());
        assert!(scheduler.clock().abs() < f64::EPSILON);
        assert_eq!(log.borrow().stopped.len(), 2);

        // Idempotent
        scheduler.stop_all();
        assert_eq!(log.borrow().stopped.len(), 2);

        log.borrow_mut().now = 1.25;
        let chunk = scheduler.schedule(seconds(0.5)).unwrap();
        assert!((chunk.start_at() - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_completion_removes_chunk() {
        let (mut scheduler, _log) = scheduler();
        let first = scheduler.schedule(seconds(0.5)).unwrap().id();
        let second = scheduler.schedule(seconds(0.5)).unwrap().id();

        let tx = scheduler.completion_sender();
        tx.send(first).unwrap();
        assert_eq!(scheduler.reap(), 1);
        assert_eq!(scheduler.active().map(PlaybackChunk::id).collect::<Vec<_>>(), vec![second]);
    }

    #[test]
    fn test_stale_completion_ignored() {
        let (mut scheduler, _log) = scheduler();
        let id = scheduler.schedule(seconds(0.5)).unwrap().id();
        scheduler.stop_all();

        scheduler.completion_sender().send(id).unwrap();
        assert_eq!(scheduler.reap(), 0);
        assert!(!scheduler.complete(id));
    }

    #[test]
    fn test_detached_discards() {
        let (mut scheduler, _log) = scheduler();
        let sink = scheduler.detach();
        assert!(sink.is_some());
        assert!(scheduler.schedule(seconds(0.5)).is_none());
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn test_next_completion_skips_stale() {
        let (mut scheduler, _log) = scheduler();
        let stale = scheduler.schedule(seconds(0.5)).unwrap().id();
        scheduler.stop_all();
        let live = scheduler.schedule(seconds(0.5)).unwrap().id();

        let tx = scheduler.completion_sender();
        tx.send(stale).unwrap();
        tx.send(live).unwrap();

        assert_eq!(scheduler.next_completion().await, Some(live));
        assert!(scheduler.is_idle());
    }
}
