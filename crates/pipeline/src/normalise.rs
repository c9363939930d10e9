//! Audio Normaliser (spec §4.3): decode an inbound codec-framed chunk to the
//! canonical 16 kHz, mono, 16-bit little-endian PCM representation. Stereo
//! is downmixed by arithmetic average; non-16 kHz input is resampled with
//! `rubato`'s FFT-based resampler (`callbroker_core::AudioFrame::resample`).
//!
//! `webm-opus`/`ogg-opus` chunks are treated as raw Opus frames (one ingress
//! chunk = one encoded frame) rather than full container demuxing — the
//! same simplification the teacher's (dropped) transport crate made for
//! WebRTC's RTP-carried Opus, and the natural shape for a low-latency voice
//! stream where chunks already arrive frame-aligned.

use crate::PipelineError;
use callbroker_core::{AudioFrame, Channels, Codec, SampleRate};

const OPUS_SAMPLE_RATE: u32 = 48_000;
/// Max Opus frame duration is 120ms; at 48kHz that's 5760 samples/channel.
const OPUS_MAX_FRAME_SAMPLES: usize = 5_760;

/// Decode `payload` (encoded per `codec`) and return canonical PCM16 bytes
/// at 16kHz mono.
pub fn normalise(codec: Codec, payload: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let frame = decode(codec, payload)?;
    let frame = frame.to_mono().resample(SampleRate::Hz16000);
    Ok(frame.to_pcm16())
}

fn decode(codec: Codec, payload: &[u8]) -> Result<AudioFrame, PipelineError> {
    match codec {
        Codec::WavPcm => decode_wav(payload),
        Codec::WebmOpus | Codec::OggOpus => decode_opus(payload),
        Codec::Mp3 => decode_mp3(payload),
    }
}

fn decode_wav(payload: &[u8]) -> Result<AudioFrame, PipelineError> {
    let cursor = std::io::Cursor::new(payload);
    let mut reader =
        hound::WavReader::new(cursor).map_err(|e| PipelineError::Resample(e.to_string()))?;
    let spec = reader.spec();

    let sample_rate = sample_rate_from_hz(spec.sample_rate)?;
    let channels = if spec.channels == 1 {
        Channels::Mono
    } else {
        Channels::Stereo
    };

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PipelineError::Resample(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PipelineError::Resample(e.to_string()))?
        },
    };

    Ok(AudioFrame::new(samples, sample_rate, channels, 0))
}

fn decode_opus(payload: &[u8]) -> Result<AudioFrame, PipelineError> {
    use audiopus::{coder::Decoder, Channels as OpusChannels, SampleRate as OpusSampleRate};

    let mut decoder = Decoder::new(OpusSampleRate::Hz48000, OpusChannels::Mono)
        .map_err(|e| PipelineError::Resample(e.to_string()))?;

    let mut output = vec![0i16; OPUS_MAX_FRAME_SAMPLES];
    let decoded = decoder
        .decode(Some(payload), &mut output, false)
        .map_err(|e| PipelineError::Resample(e.to_string()))?;
    output.truncate(decoded);

    let samples: Vec<f32> = output.iter().map(|&s| s as f32 / 32_768.0).collect();
    Ok(AudioFrame::new(samples, SampleRate::Hz48000, Channels::Mono, 0))
}

fn decode_mp3(payload: &[u8]) -> Result<AudioFrame, PipelineError> {
    use symphonia::core::audio::Signal;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = std::io::Cursor::new(payload.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| PipelineError::UnsupportedCodec(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .first()
        .ok_or_else(|| PipelineError::UnsupportedCodec("mp3 stream has no tracks".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PipelineError::UnsupportedCodec("mp3 track has no sample rate".into()))?;
    let channel_count = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::UnsupportedCodec(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(buf) => {
                let mut sample_buf = symphonia::core::audio::SampleBuffer::<f32>::new(
                    buf.capacity() as u64,
                    *buf.spec(),
                );
                sample_buf.copy_interleaved_ref(buf);
                samples.extend_from_slice(sample_buf.samples());
            },
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(_) => break,
        }
    }

    let sample_rate = sample_rate_from_hz(sample_rate)?;
    let channels = if channel_count <= 1 {
        Channels::Mono
    } else {
        Channels::Stereo
    };
    Ok(AudioFrame::new(samples, sample_rate, channels, 0))
}

fn sample_rate_from_hz(hz: u32) -> Result<SampleRate, PipelineError> {
    match hz {
        8_000 => Ok(SampleRate::Hz8000),
        16_000 => Ok(SampleRate::Hz16000),
        22_050 => Ok(SampleRate::Hz22050),
        44_100 => Ok(SampleRate::Hz44100),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(PipelineError::UnsupportedCodec(format!("sample rate {other}Hz"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_wav(sample_rate: u32, channels: u16, n: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..n {
                let value = ((i as f32 * 0.1).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(value).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn wav_pcm_at_canonical_rate_passes_through_mono() {
        let wav = sine_wav(16_000, 1, 1600);
        let pcm = normalise(Codec::WavPcm, &wav).unwrap();
        assert_eq!(pcm.len(), 1600 * 2);
    }

    #[test]
    fn wav_pcm_stereo_is_downmixed_and_resampled() {
        let wav = sine_wav(48_000, 2, 4800);
        let pcm = normalise(Codec::WavPcm, &wav).unwrap();
        // 4800 frames @ 48kHz -> ~1600 frames @ 16kHz, mono, 2 bytes/sample.
        let approx_frames = pcm.len() / 2;
        assert!((1400..1800).contains(&approx_frames), "got {approx_frames} frames");
    }

    #[test]
    fn unsupported_wav_sample_rate_errors() {
        let wav = sine_wav(11_025, 1, 100);
        assert!(normalise(Codec::WavPcm, &wav).is_err());
    }
}
