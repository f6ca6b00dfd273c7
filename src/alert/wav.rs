// src/alert/wav.rs
// Minimal RIFF/WAVE codec: decode for native playback, 16-bit PCM encode for recordings

use super::PlaybackError;
use std::time::Duration;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Interleaved samples normalized to [-1.0, 1.0]
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn sample(&self, frame: usize, channel: usize) -> Option<f32> {
        self.samples
            .get(frame * self.channels.max(1) as usize + channel)
            .copied()
    }
}

struct Format {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

pub fn decode(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(PlaybackError::Decode("not a RIFF/WAVE file".to_string()));
    }

    let mut format: Option<Format> = None;
    let mut data: Option<&[u8]> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4) as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(PlaybackError::Decode("fmt chunk too short".to_string()));
                }
                let mut audio_format = read_u16(body, 0);
                if audio_format == FORMAT_EXTENSIBLE && body.len() >= 26 {
                    audio_format = read_u16(body, 24);
                }
                format = Some(Format {
                    audio_format,
                    channels: read_u16(body, 2),
                    sample_rate: read_u32(body, 4),
                    bits_per_sample: read_u16(body, 14),
                });
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are padded to an even length.
        offset = body_start.saturating_add(size).saturating_add(size & 1);
    }

    let format = format.ok_or_else(|| PlaybackError::Decode("missing fmt chunk".to_string()))?;
    let data = data.ok_or_else(|| PlaybackError::Decode("missing data chunk".to_string()))?;

    if format.channels == 0 || format.sample_rate == 0 {
        return Err(PlaybackError::Decode("zero channels or sample rate".to_string()));
    }

    let samples = match (format.audio_format, format.bits_per_sample) {
        (FORMAT_PCM, 8) => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        (FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
            .collect(),
        (FORMAT_PCM, 24) => data
            .chunks_exact(3)
            .map(|c| {
                let value = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                value as f32 / 8_388_607.0
            })
            .collect(),
        (FORMAT_PCM, 32) => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / i32::MAX as f32)
            .collect(),
        (FORMAT_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (fmt, bits) => {
            return Err(PlaybackError::Unsupported(format!(
                "WAV format {} with {} bits per sample",
                fmt, bits
            )))
        }
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: format.sample_rate,
        channels: format.channels,
    })
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Interleaved 16-bit PCM into a canonical 44-byte-header WAV file
pub fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut wav = Vec::with_capacity(44 + samples.len() * 2);

    wav.extend_from_slice(b"RIFF");
    let file_size = (36 + samples.len() * 2) as u32;
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * channels as u32 * 2;
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&(channels * 2).to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());

    wav.extend_from_slice(b"data");
    let data_size = (samples.len() * 2) as u32;
    wav.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}
