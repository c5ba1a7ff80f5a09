//! Audio capture from microphone
//!
//! The device callback runs on a real-time thread. Everything it does is
//! non-blocking: samples are regrouped into fixed blocks, encoded, and
//! pushed onto an unbounded channel that the live session drains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::sync::mpsc;

use super::codec::{self, TransportBlob};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per captured block (256ms at 16kHz)
pub const BLOCK_SIZE: usize = 4096;

/// Fire-and-forget outbound path to the live session
pub type BlobSender = mpsc::UnboundedSender<TransportBlob>;

/// Receives each complete block of mono samples
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send>;

/// Regroups arbitrarily sized callback slices into fixed-size blocks
#[derive(Debug)]
pub struct BlockFramer {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockFramer {
    /// Create a framer emitting blocks of `block_size` samples
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Feed samples, calling `on_block` for every completed block
    ///
    /// Leftover samples are kept for the next call.
    pub fn push(&mut self, mut samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let wanted = self.block_size - self.pending.len();
            let take = wanted.min(samples.len());
            let (head, rest) = samples.split_at(take);

            if self.pending.is_empty() && take == self.block_size {
                on_block(head);
            } else {
                self.pending.extend_from_slice(head);
                if self.pending.len() == self.block_size {
                    on_block(&self.pending);
                    self.pending.clear();
                }
            }
            samples = rest;
        }
    }

    /// Samples waiting for the next block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial block
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Streaming linear-interpolation resampler for the capture path
///
/// Keeps the last input sample and the fractional read position between
/// calls, so splitting the input differently yields the same output.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    position: f64,
    previous: f32,
}

impl LinearResampler {
    /// Convert from `from_rate` to `to_rate`
    #[must_use]
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: f64::from(from_rate.max(1)) / f64::from(to_rate.max(1)),
            position: 0.0,
            previous: 0.0,
        }
    }

    /// Resample `input`, appending to `out`
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        let last = (input.len() - 1) as f64;
        let previous = self.previous;
        let sample = |i: isize| -> f32 { usize::try_from(i).map_or(previous, |i| input[i]) };

        while self.position <= last {
            let index = self.position.floor();
            let frac = (self.position - index) as f32;
            let a = sample(index as isize);
            let value = if frac > 0.0 {
                let b = sample(index as isize + 1);
                a + (b - a) * frac
            } else {
                a
            };
            out.push(value);
            self.position += self.step;
        }

        self.position -= input.len() as f64;
        self.previous = input[input.len() - 1];
    }
}

/// Counters for frames handed to the session
#[derive(Debug, Default)]
pub struct CaptureStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureStats {
    /// Blocks queued for sending
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Blocks skipped because the session was gone
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Encodes captured blocks and forwards them to the session
#[derive(Debug)]
pub struct CapturePipe {
    outbound: BlobSender,
    sample_rate: u32,
    stats: Arc<CaptureStats>,
}

impl CapturePipe {
    /// Create a pipe sending 16kHz PCM blobs to `outbound`
    #[must_use]
    pub fn new(outbound: BlobSender) -> Self {
        Self {
            outbound,
            sample_rate: SAMPLE_RATE,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    /// Shared counters for this pipe
    #[must_use]
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Encode one block and queue it without waiting
    ///
    /// A closed session skips the frame; capture keeps running until torn
    /// down by its owner.
    pub fn forward(&self, block: &[f32]) {
        let blob = codec::encode(block, self.sample_rate);
        if self.outbound.send(blob).is_ok() {
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(samples = block.len(), "session closed, capture frame skipped");
        }
    }

    /// Turn the pipe into a sink a microphone can deliver blocks to
    #[must_use]
    pub fn into_sink(self) -> FrameSink {
        Box::new(move |block| self.forward(block))
    }
}

/// An open input device context
///
/// Dropping the value releases the device.
pub trait Microphone {
    /// Start delivering complete blocks to `sink`
    fn connect(&mut self, sink: FrameSink);

    /// Stop delivering blocks; captured audio is discarded afterwards
    fn disconnect(&mut self);

    /// Stop the device's capture tracks
    fn stop_tracks(&mut self);
}

/// Framing state shared with the device callback
struct Tap {
    framer: BlockFramer,
    resampler: Option<LinearResampler>,
    resampled: Vec<f32>,
    sink: Option<FrameSink>,
}

impl Tap {
    fn feed(&mut self, samples: &[f32]) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(samples, &mut self.resampled);
                self.framer.push(&self.resampled, |block| sink(block));
            }
            None => self.framer.push(samples, |block| sink(block)),
        }
    }
}

/// Captures audio from the default input device
pub struct MicrophoneInput {
    tap: Arc<Mutex<Tap>>,
    stream: Option<Stream>,
}

impl MicrophoneInput {
    /// Open the default input device and start its tracks
    ///
    /// Prefers a native 16kHz mode. Devices without one capture at their
    /// default rate and are resampled before framing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if no input device can be opened
    pub fn open(block_size: usize) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Permission("no input device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        };

        let native = device
            .supported_input_configs()
            .map_err(|e| Error::Permission(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                // Fallback: any channel layout, downmixed in the callback
                device
                    .supported_input_configs()
                    .ok()?
                    .find(|c| supports_rate(c))
            });

        let config = match native {
            Some(supported) => supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
            // No 16kHz mode: capture at the device default and resample
            None => device
                .default_input_config()
                .map_err(|e| Error::Permission(e.to_string()))?
                .config(),
        };
        let channels = usize::from(config.channels).max(1);
        let device_rate = config.sample_rate.0;

        let resampler = (device_rate != SAMPLE_RATE).then(|| {
            tracing::debug!(device_rate, "resampling capture to {SAMPLE_RATE} Hz");
            LinearResampler::new(device_rate, SAMPLE_RATE)
        });

        let tap = Arc::new(Mutex::new(Tap {
            framer: BlockFramer::new(block_size),
            resampler,
            resampled: Vec::new(),
            sink: None,
        }));
        let callback_tap = Arc::clone(&tap);
        let mut mono = Vec::new();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Never wait on the audio thread
                    let Ok(mut tap) = callback_tap.try_lock() else {
                        return;
                    };
                    if channels == 1 {
                        tap.feed(data);
                    } else {
                        mono.clear();
                        mono.extend(data.chunks(channels).map(downmix));
                        tap.feed(&mono);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Permission(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::Permission(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate,
            channels,
            block_size,
            "audio capture opened"
        );

        Ok(Self {
            tap,
            stream: Some(stream),
        })
    }

    /// Check if the device tracks are running
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

#[allow(clippy::cast_precision_loss)]
fn downmix(frame: &[f32]) -> f32 {
    frame.iter().sum::<f32>() / frame.len() as f32
}

impl Microphone for MicrophoneInput {
    fn connect(&mut self, sink: FrameSink) {
        if let Ok(mut tap) = self.tap.lock() {
            tap.framer.clear();
            tap.sink = Some(sink);
        }
        tracing::debug!("capture connected");
    }

    fn disconnect(&mut self) {
        if let Ok(mut tap) = self.tap.lock() {
            tap.sink = None;
            tap.framer.clear();
        }
        tracing::debug!("capture disconnected");
    }

    fn stop_tracks(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "failed to pause capture stream");
            }
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

impl Drop for MicrophoneInput {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}
