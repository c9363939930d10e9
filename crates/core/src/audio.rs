//! Audio frame types and the canonical PCM representation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supported audio sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - canonical broker representation
    #[default]
    Hz16000,
    Hz22050,
    Hz44100,
    Hz48000,
}

impl SampleRate {
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    pub fn frame_size_20ms(&self) -> usize {
        (self.as_u32() as usize * 20) / 1000
    }

    pub fn frame_size_10ms(&self) -> usize {
        (self.as_u32() as usize * 10) / 1000
    }
}

/// Audio channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channels {
    #[default]
    Mono,
    Stereo,
}

impl Channels {
    pub fn count(&self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Codecs the ingress framing (§4.3) is willing to decode. Anything else is
/// `UnsupportedCodec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    WebmOpus,
    OggOpus,
    WavPcm,
    Mp3,
}

impl Codec {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "webm-opus" => Some(Codec::WebmOpus),
            "ogg-opus" => Some(Codec::OggOpus),
            "wav-pcm" => Some(Codec::WavPcm),
            "mp3" => Some(Codec::Mp3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::WebmOpus => "webm-opus",
            Codec::OggOpus => "ogg-opus",
            Codec::WavPcm => "wav-pcm",
            Codec::Mp3 => "mp3",
        }
    }
}

/// An inbound audio envelope, before normalisation. Never retained past the
/// normaliser (spec §3).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub codec: Codec,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

/// Audio frame with metadata. Samples are stored as f32 in [-1.0, 1.0].
#[derive(Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    /// Frame sequence number for ordering.
    pub sequence: u64,
    pub timestamp: Instant,
    pub duration: Duration,
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, channels: Channels, sequence: u64) -> Self {
        let duration = Duration::from_secs_f64(
            samples.len() as f64 / (sample_rate.as_u32() as f64 * channels.count() as f64),
        );
        let energy_db = Self::calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            channels,
            sequence,
            timestamp: Instant::now(),
            duration,
            energy_db,
        }
    }

    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0;
        }
        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();
        if rms > 0.0 {
            20.0 * rms.log10()
        } else {
            -96.0
        }
    }

    /// Decode little-endian PCM16 bytes into a frame.
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate, channels: Channels, sequence: u64) -> Self {
        const PCM16_NORMALIZE: f32 = 32768.0;
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / PCM16_NORMALIZE)
            .collect();
        Self::new(samples, sample_rate, channels, sequence)
    }

    /// Encode to little-endian PCM16 bytes — the wire format for `audio`
    /// envelopes and for the canonical normaliser output (spec §4.3).
    pub fn to_pcm16(&self) -> Vec<u8> {
        const PCM16_SCALE: f32 = 32767.0;
        self.samples
            .iter()
            .flat_map(|&sample| {
                let clamped = sample.clamp(-1.0, 1.0);
                (clamped * PCM16_SCALE) as i16
            }.to_le_bytes())
            .collect()
    }

    /// Resample using sinc interpolation (Rubato), with a linear fallback
    /// for short frames. Spec §4.3 requires resampling that doesn't
    /// introduce >±2% pitch distortion — FFT-based resampling stays well
    /// under that for voice-band content.
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        use rubato::{FftFixedIn, Resampler};

        if self.sample_rate == target_rate {
            return self.clone();
        }

        let from_rate = self.sample_rate.as_u32() as usize;
        let to_rate = target_rate.as_u32() as usize;

        if self.samples.len() < 64 {
            return self.resample_linear(target_rate);
        }

        let samples_f64: Vec<f64> = self.samples.iter().map(|&s| s as f64).collect();
        let chunk_size = self.samples.len().min(1024);

        match FftFixedIn::<f64>::new(from_rate, to_rate, chunk_size, 2, 1) {
            Ok(mut resampler) => match resampler.process(&[samples_f64], None) {
                Ok(output_frames) => {
                    let resampled: Vec<f32> = output_frames[0].iter().map(|&s| s as f32).collect();
                    Self::new(resampled, target_rate, self.channels, self.sequence)
                },
                Err(e) => {
                    tracing::warn!("resampler process failed, using linear fallback: {}", e);
                    self.resample_linear(target_rate)
                },
            },
            Err(e) => {
                tracing::warn!("resampler init failed, using linear fallback: {}", e);
                self.resample_linear(target_rate)
            },
        }
    }

    fn resample_linear(&self, target_rate: SampleRate) -> Self {
        let ratio = target_rate.as_u32() as f64 / self.sample_rate.as_u32() as f64;
        let new_len = (self.samples.len() as f64 * ratio) as usize;

        let mut resampled = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = src_idx.floor() as usize;
            let idx_ceil = (idx_floor + 1).min(self.samples.len().saturating_sub(1));
            let frac = src_idx - idx_floor as f64;

            let sample = self.samples[idx_floor] * (1.0 - frac as f32) + self.samples[idx_ceil] * frac as f32;
            resampled.push(sample);
        }

        Self::new(resampled, target_rate, self.channels, self.sequence)
    }

    /// Downmix stereo to mono by arithmetic average (spec §4.3).
    pub fn to_mono(&self) -> Self {
        if self.channels == Channels::Mono {
            return self.clone();
        }
        let mono_samples: Vec<f32> = self
            .samples
            .chunks_exact(2)
            .map(|chunk| (chunk[0] + chunk[1]) / 2.0)
            .collect();
        Self::new(mono_samples, self.sample_rate, Channels::Mono, self.sequence)
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }
}

/// Append-only buffer of canonical PCM samples, used by the streaming
/// transcriber to accumulate a window before handing it to STT.
#[derive(Debug)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: SampleRate,
    channels: Channels,
}

impl AudioBuffer {
    pub fn new(sample_rate: SampleRate, channels: Channels) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        // Downmix before resampling: `resample` operates on a single
        // interleaved channel stream, so stereo content must be collapsed
        // to mono first or the resampler scrambles L/R samples together.
        let frame = if frame.channels != self.channels {
            frame.to_mono()
        } else {
            frame.clone()
        };
        let frame = if frame.sample_rate != self.sample_rate {
            frame.resample(self.sample_rate)
        } else {
            frame
        };
        self.samples.extend(frame.samples.iter());
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Remove and return the first `count` samples.
    pub fn drain_front(&mut self, count: usize) -> Vec<f32> {
        let count = count.min(self.samples.len());
        self.samples.drain(0..count).collect()
    }

    /// Take everything, leaving the buffer empty.
    pub fn take_all(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.frame_size_10ms(), 160);
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
    }

    #[test]
    fn pcm16_round_trip_preserves_sign() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0];
        let frame = AudioFrame::from_pcm16(&pcm16, SampleRate::Hz16000, Channels::Mono, 0);
        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);
    }

    #[test]
    fn resample_changes_sample_count_proportionally() {
        let samples = vec![0.0f32; 1600];
        let frame = AudioFrame::new(samples, SampleRate::Hz16000, Channels::Mono, 0);
        let resampled = frame.resample(SampleRate::Hz8000);
        assert_eq!(resampled.samples.len(), 800);
    }

    #[test]
    fn stereo_downmix_averages_channels() {
        let frame = AudioFrame::new(vec![1.0, -1.0, 0.5, 0.5], SampleRate::Hz16000, Channels::Stereo, 0);
        let mono = frame.to_mono();
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.0).abs() < 1e-6);
        assert!((mono.samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn energy_distinguishes_silence_from_speech() {
        let silent = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(silent.is_likely_silence(-40.0));

        let loud = AudioFrame::new(vec![0.5; 160], SampleRate::Hz16000, Channels::Mono, 0);
        assert!(!loud.is_likely_silence(-40.0));
    }

    #[test]
    fn audio_buffer_accumulates_and_drains() {
        let mut buffer = AudioBuffer::new(SampleRate::Hz16000, Channels::Mono);
        let frame = AudioFrame::new(vec![0.1; 1600], SampleRate::Hz16000, Channels::Mono, 0);
        buffer.push(&frame);
        assert_eq!(buffer.duration(), Duration::from_millis(100));

        let drained = buffer.drain_front(800);
        assert_eq!(drained.len(), 800);
        assert_eq!(buffer.samples().len(), 800);
    }
}
