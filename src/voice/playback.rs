//! Audio playback to speakers
//!
//! The output device runs one long-lived stream. Scheduled buffers become
//! voices in a small mixer; the device clock is the number of frames the
//! render callback has produced so far.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use super::codec::AudioBuffer;
use super::scheduler::{ChunkId, CompletionSender, OutputSink};
use crate::{Error, Result};

/// Sample rate for playback (matches the live API's speech output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// A buffer placed at a fixed frame on the output clock
struct Voice {
    id: ChunkId,
    start_frame: u64,
    frames: u64,
    channels: usize,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.frames
    }

    /// Mono sample for absolute output frame `frame`, if this voice covers it
    #[allow(clippy::cast_precision_loss)]
    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame || frame >= self.end_frame() {
            return None;
        }
        let offset = usize::try_from(frame - self.start_frame).ok()? * self.channels;
        let samples = self.samples.get(offset..offset + self.channels)?;
        Some(samples.iter().sum::<f32>() / self.channels as f32)
    }
}

/// Render state shared between the device callback and the scheduler side
pub(crate) struct Mixer {
    sample_rate: u32,
    frame: u64,
    voices: Vec<Voice>,
    completions: CompletionSender,
}

impl Mixer {
    pub(crate) const fn new(sample_rate: u32, completions: CompletionSender) -> Self {
        Self {
            sample_rate,
            frame: 0,
            voices: Vec::new(),
            completions,
        }
    }

    /// Seconds of audio rendered so far
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn current_time(&self) -> f64 {
        self.frame as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn add(&mut self, id: ChunkId, buffer: &AudioBuffer, at: f64) {
        let start_frame = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame,
            frames: buffer.frames() as u64,
            channels: usize::from(buffer.channels()),
            samples: buffer.shared_samples(),
        });
    }

    pub(crate) fn remove(&mut self, id: ChunkId) {
        self.voices.retain(|v| v.id != id);
    }

    /// Fill an interleaved output block and retire finished voices
    pub(crate) fn render(&mut self, data: &mut [f32], channels: usize) {
        for out in data.chunks_mut(channels.max(1)) {
            let mixed: f32 = self
                .voices
                .iter()
                .filter_map(|v| v.sample_at(self.frame))
                .sum();
            out.fill(mixed.clamp(-1.0, 1.0));
            self.frame += 1;
        }

        self.retire();
    }

    /// Advance the clock over frames the device played without the mixer
    pub(crate) fn skip(&mut self, frames: u64) {
        if frames == 0 {
            return;
        }
        self.frame += frames;
        self.retire();
    }

    fn retire(&mut self) {
        let now = self.frame;
        let completions = &self.completions;
        self.voices.retain(|voice| {
            let finished = voice.end_frame() <= now;
            if finished {
                // Receiver gone means the scheduler was dropped
                let _ = completions.send(voice.id);
            }
            !finished
        });
    }
}

/// Render one device block without waiting on the control side
///
/// A contended block plays silence and its frames are credited to the clock
/// by the next block that gets the lock.
#[allow(clippy::cast_possible_truncation)]
fn render_block(mixer: &Mutex<Mixer>, skipped: &mut u64, data: &mut [f32], channels: usize) {
    match mixer.try_lock() {
        Ok(mut mixer) => {
            mixer.skip(std::mem::take(skipped));
            mixer.render(data, channels);
        }
        Err(_) => {
            data.fill(0.0);
            *skipped += (data.len() / channels.max(1)) as u64;
        }
    }
}

/// Default output device driven as an [`OutputSink`]
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    _stream: Stream,
}

impl SpeakerOutput {
    /// Open the default output device at [`PLAYBACK_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(completions: CompletionSender) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = usize::from(config.channels);

        let mixer = Arc::new(Mutex::new(Mixer::new(PLAYBACK_SAMPLE_RATE, completions)));
        let render_mixer = Arc::clone(&mixer);
        let mut skipped = 0;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_block(&render_mixer, &mut skipped, data, channels);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels,
            "audio output opened"
        );

        Ok(Self {
            mixer,
            _stream: stream,
        })
    }
}

impl OutputSink for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.mixer.lock().map_or(0.0, |m| m.current_time())
    }

    fn start(&mut self, id: ChunkId, buffer: &AudioBuffer, at: f64) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.add(id, buffer, at);
        }
    }

    fn stop(&mut self, id: ChunkId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(id);
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        tracing::debug!("audio output released");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::voice::PlaybackScheduler;

    /// Mixer wired to a scheduler's completion channel through a test sink
    struct MixerSink(Mixer);

    impl OutputSink for MixerSink {
        fn current_time(&self) -> f64 {
            self.0.current_time()
        }

        fn start(&mut self, id: ChunkId, buffer: &AudioBuffer, at: f64) {
            self.0.add(id, buffer, at);
        }

        fn stop(&mut self, id: ChunkId) {
            self.0.remove(id);
        }
    }

    #[test]
    fn test_mixer_plays_in_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(4, tx);

        let ids = [ChunkId::from_raw(0), ChunkId::from_raw(1)];
        mixer.add(ids[0], &AudioBuffer::new(vec![0.5; 4], 4, 1), 0.0);
        mixer.add(ids[1], &AudioBuffer::new(vec![-0.25; 2], 4, 1), 1.0);

        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5, -0.25, -0.25, 0.0, 0.0]);
        assert!((mixer.current_time() - 2.0).abs() < f64::EPSILON);
        assert_eq!(rx.try_recv().unwrap(), ids[0]);
        assert_eq!(rx.try_recv().unwrap(), ids[1]);
    }

    #[test]
    fn test_mixer_duplicates_to_output_channels() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(4, tx);
        mixer.add(ChunkId::from_raw(0), &AudioBuffer::new(vec![0.5, 0.25], 4, 1), 0.0);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_mixer_stop_mid_playback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mixer = Mixer::new(4, tx);
        mixer.add(ChunkId::from_raw(0), &AudioBuffer::new(vec![0.5; 8], 4, 1), 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out, 1);
        mixer.remove(ChunkId::from_raw(0));
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_contended_render_plays_silence_and_keeps_clock() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mixer = Mutex::new(Mixer::new(4, tx));
        mixer
            .lock()
            .unwrap()
            .add(ChunkId::from_raw(0), &AudioBuffer::new(vec![0.5; 6], 4, 1), 0.0);

        let mut skipped = 0;
        let mut out = vec![1.0; 4];
        {
            let _control = mixer.lock().unwrap();
            render_block(&mixer, &mut skipped, &mut out, 1);
        }
        assert_eq!(out, vec![0.0; 4]);
        assert_eq!(skipped, 4);

        render_block(&mixer, &mut skipped, &mut out, 1);
        assert_eq!(skipped, 0);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);

        let mixer = mixer.lock().unwrap();
        assert!((mixer.current_time() - 2.0).abs() < f64::EPSILON);
        assert_eq!(rx.try_recv().unwrap(), ChunkId::from_raw(0));
    }

    #[test]
    fn test_scheduler_drives_mixer_gaplessly() {
        let mut scheduler = PlaybackScheduler::new();
        let mixer = Mixer::new(4, scheduler.completion_sender());
        scheduler.attach(Box::new(MixerSink(mixer)));

        scheduler.schedule(AudioBuffer::new(vec![0.5; 4], 4, 1));
        scheduler.schedule(AudioBuffer::new(vec![0.25; 2], 4, 1));
        let starts: Vec<f64> = scheduler.active().map(|c| c.start_at()).collect();
        assert_eq!(starts, vec![0.0, 1.0]);
    }
}
