//! PCM transport codec
//!
//! Float samples travel to and from the live session as 16-bit signed
//! little-endian PCM, base64-wrapped inside a [`TransportBlob`].

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::{Error, Result};

/// Full-scale magnitude of a 16-bit sample
const PCM_SCALE: f32 = 32767.0;

/// Declared source rates accepted for inbound audio
const SOURCE_RATES: std::ops::RangeInclusive<u32> = 8000..=192_000;

/// Most channels an inbound blob may declare
const MAX_CHANNELS: u16 = 8;

/// Input block size handed to the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Build the mime type for raw mono PCM at `sample_rate`
#[must_use]
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Wire unit exchanged with the live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportBlob {
    data: String,
    mime_type: String,
}

impl TransportBlob {
    /// Wrap already-encoded base64 data
    #[must_use]
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Base64 payload
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Declared mime type (e.g. `audio/pcm;rate=16000`)
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Parsed mime type
    #[must_use]
    pub fn mime(&self) -> MimeType {
        MimeType::parse(&self.mime_type)
    }
}

/// A parsed audio mime type with its `rate` and `channels` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    essence: String,
    rate: Option<u32>,
    channels: Option<u16>,
}

impl MimeType {
    /// Parse `type/subtype; key=value; ...`
    ///
    /// Unknown parameters are ignored, as are values that fail to parse.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let mut rate = None;
        let mut channels = None;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "rate" => rate = value.trim().parse().ok(),
                "channels" => channels = value.trim().parse().ok(),
                _ => {}
            }
        }

        Self {
            essence,
            rate,
            channels,
        }
    }

    /// `type/subtype` without parameters, lowercased
    #[must_use]
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// Declared sample rate
    #[must_use]
    pub const fn rate(&self) -> Option<u32> {
        self.rate
    }

    /// Declared channel count
    #[must_use]
    pub const fn channels(&self) -> Option<u16> {
        self.channels
    }

    /// Whether this is raw 16-bit PCM
    #[must_use]
    pub fn is_pcm(&self) -> bool {
        matches!(self.essence.as_str(), "audio/pcm" | "audio/l16")
    }
}

/// Decoded, interleaved float audio
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Create a buffer from interleaved samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the samples, for handing to a render thread
    #[must_use]
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Whether the buffer holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode float samples as a base64 PCM blob
///
/// Samples are clamped to `[-1.0, 1.0]` before quantization, so the output
/// never wraps around.
#[must_use]
pub fn encode(samples: &[f32], sample_rate: u32) -> TransportBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    TransportBlob::new(STANDARD.encode(bytes), pcm_mime(sample_rate))
}

/// Write mono float samples as a 16-bit WAV file image
///
/// # Errors
///
/// Returns [`Error::Audio`] if the WAV writer fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(quantize(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode a PCM blob into float samples at `target_rate`
///
/// The blob's mime parameters win over `target_rate`/`channels` when they
/// declare the source format; a differing source rate is resampled.
///
/// # Errors
///
/// Returns [`DecodeError`] for empty or truncated payloads, invalid base64,
/// non-PCM mime types, declared rates or channel counts outside the supported
/// range, or resampler failures
pub fn decode(
    blob: &TransportBlob,
    target_rate: u32,
    channels: u16,
) -> std::result::Result<AudioBuffer, DecodeError> {
    let mime = blob.mime();
    if !mime.is_pcm() {
        return Err(DecodeError::UnsupportedFormat(blob.mime_type().to_string()));
    }

    let channels = mime.channels().unwrap_or(channels);
    if !(1..=MAX_CHANNELS).contains(&channels) {
        return Err(DecodeError::UnsupportedFormat(blob.mime_type().to_string()));
    }
    let source_rate = mime.rate().unwrap_or(target_rate);
    if source_rate != target_rate && !SOURCE_RATES.contains(&source_rate) {
        return Err(DecodeError::UnsupportedFormat(blob.mime_type().to_string()));
    }

    let bytes = STANDARD.decode(blob.data())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let frame_bytes = 2 * usize::from(channels);
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::IncompleteSample(bytes.len()));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| dequantize(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    let samples = if source_rate == target_rate {
        samples
    } else {
        tracing::trace!(source_rate, target_rate, "resampling inbound audio");
        resample(&samples, channels, source_rate, target_rate)?
    };

    Ok(AudioBuffer::new(samples, target_rate, channels))
}

#[allow(clippy::cast_possible_truncation)]
fn quantize(sample: f32) -> i16 {
    // NaN survives clamp and casts to 0
    (sample.clamp(-1.0, 1.0) * PCM_SCALE).round() as i16
}

fn dequantize(value: i16) -> f32 {
    (f32::from(value) / PCM_SCALE).max(-1.0)
}

/// Frames a chunk of `frames` at `from_rate` spans at `to_rate`
#[allow(clippy::cast_possible_truncation)]
fn resampled_len(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    let from = u64::from(from_rate);
    ((frames as u64 * u64::from(to_rate) + from / 2) / from) as usize
}

/// Resample interleaved audio with rubato
///
/// The filter delay is trimmed from the front and the tail is flushed, so the
/// output covers exactly the input's duration and chunks stay gapless when
/// played back to back.
#[allow(clippy::cast_possible_truncation)]
fn resample(
    samples: &[f32],
    channels: u16,
    from_rate: u32,
    to_rate: u32,
) -> std::result::Result<Vec<f32>, DecodeError> {
    use rubato::{FftFixedIn, Resampler};

    let channels = usize::from(channels);
    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        2,
        channels,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let planar: Vec<Vec<f64>> = (0..channels)
        .map(|c| {
            samples
                .iter()
                .skip(c)
                .step_by(channels)
                .map(|&s| f64::from(s))
                .collect()
        })
        .collect();
    let frames = planar.first().map_or(0, Vec::len);

    let delay = resampler.output_delay();
    let expected = resampled_len(frames, from_rate, to_rate);
    let wanted = delay + expected;

    let mut output: Vec<Vec<f64>> = vec![Vec::with_capacity(wanted); channels];
    let mut pos = 0;

    while output.first().map_or(0, Vec::len) < wanted {
        let needed = resampler.input_frames_next();
        let result = if pos + needed <= frames {
            let block: Vec<&[f64]> = planar.iter().map(|c| &c[pos..pos + needed]).collect();
            pos += needed;
            resampler.process(&block, None)
        } else if pos < frames {
            let block: Vec<&[f64]> = planar.iter().map(|c| &c[pos..]).collect();
            pos = frames;
            resampler.process_partial(Some(block.as_slice()), None)
        } else {
            // Flush the filter tail
            resampler.process_partial(None::<&[Vec<f64>]>, None)
        }
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        if result.first().is_none_or(Vec::is_empty) {
            break;
        }
        for (out, chunk) in output.iter_mut().zip(result) {
            out.extend(chunk);
        }
    }

    let end = output.first().map_or(0, Vec::len).min(wanted);
    let mut interleaved = Vec::with_capacity(end.saturating_sub(delay) * channels);
    for frame in delay..end {
        for channel in &output {
            interleaved.push(channel[frame] as f32);
        }
    }
    Ok(interleaved)
}
