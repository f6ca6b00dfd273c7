// src/alert/native.rs
// Native playback of WAV clips on the default output device

use super::output::{AudioOutput, PlaybackError, Voice};
use super::wav::{self, DecodedAudio};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::oneshot;

const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
pub struct NativeOutput;

impl NativeOutput {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioOutput for NativeOutput {
    async fn open(&self, path: &Path) -> Result<Box<dyn Voice>, PlaybackError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PlaybackError::Io(format!("{}: {}", path.display(), e)))?;
        let audio = wav::decode(&bytes)?;
        let duration = audio.duration();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_stop = stop.clone();

        // cpal streams stay on the thread that built them.
        std::thread::Builder::new()
            .name("alert-playback".to_string())
            .spawn(move || play_blocking(audio, thread_stop, ready_tx))
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| PlaybackError::Device("playback thread exited".to_string()))??;

        tracing::debug!("Native playback started: {} ({:.1}s)", path.display(), duration.as_secs_f32());

        Ok(Box::new(NativeVoice {
            stop,
            duration: Some(duration),
        }))
    }

    fn name(&self) -> &str {
        "Native (cpal)"
    }
}

struct NativeVoice {
    stop: Arc<AtomicBool>,
    duration: Option<Duration>,
}

impl Voice for NativeVoice {
    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for NativeVoice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn play_blocking(
    audio: DecodedAudio,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), PlaybackError>>,
) {
    let finished = Arc::new(AtomicBool::new(false));
    let stream = match build_stream(&audio, finished.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(PlaybackError::Device(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::Relaxed) && !finished.load(Ordering::Relaxed) {
        std::thread::sleep(STOP_POLL);
    }
    drop(stream);
}

fn build_stream(audio: &DecodedAudio, finished: Arc<AtomicBool>) -> Result<cpal::Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Device("No output device available".to_string()))?;
    let config = device
        .default_output_config()
        .map_err(|e| PlaybackError::Device(e.to_string()))?;

    let samples = remix(audio, config.sample_rate(), config.channels() as usize);
    let mut position = 0usize;
    let err_fn = |err| tracing::error!("an error occurred on output stream: {}", err);

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &_| {
                write_output(data, &samples, &mut position, &finished, |s| s)
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config.into(),
            move |data: &mut [i16], _: &_| {
                write_output(data, &samples, &mut position, &finished, |s| {
                    (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                })
            },
            err_fn,
            None,
        ),
        other => {
            return Err(PlaybackError::Unsupported(format!(
                "output sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| PlaybackError::Device(e.to_string()))?;

    Ok(stream)
}

fn write_output<T: Copy>(
    data: &mut [T],
    samples: &[f32],
    position: &mut usize,
    finished: &AtomicBool,
    convert: impl Fn(f32) -> T,
) {
    for slot in data.iter_mut() {
        let sample = samples.get(*position).copied().unwrap_or(0.0);
        *slot = convert(sample);
        *position = position.saturating_add(1);
    }
    if *position >= samples.len() {
        finished.store(true, Ordering::Relaxed);
    }
}

/// Linear resample and channel map to the device layout
fn remix(audio: &DecodedAudio, out_rate: u32, out_channels: usize) -> Vec<f32> {
    let in_channels = audio.channels.max(1) as usize;
    let out_channels = out_channels.max(1);
    let frames = audio.frames();
    if frames == 0 || out_rate == 0 {
        return Vec::new();
    }

    let ratio = audio.sample_rate as f64 / out_rate as f64;
    let out_frames = (frames as f64 / ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_frames * out_channels);

    for i in 0..out_frames {
        let src_pos = i as f64 * ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        for c in 0..out_channels {
            let channel = c.min(in_channels - 1);
            let s0 = audio.sample(idx, channel).unwrap_or(0.0);
            let s1 = audio.sample(idx + 1, channel).unwrap_or(s0);
            out.push(s0 + (s1 - s0) * frac);
        }
    }

    out
}
