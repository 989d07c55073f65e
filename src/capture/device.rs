//! Microphone access for voice turns.
//!
//! A [`CaptureHandle`] is the exclusive owner of the input device for one
//! recording. Finishing the handle releases the device and hands back every
//! buffered chunk, so nothing downstream ever holds the microphone.

use crate::config::AudioConfig;
use crate::error::{Result, ShellError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest wait for the input stream to start before the open is abandoned.
pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// A chunk of mono samples captured from the microphone.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub captured_at: Instant,
}

/// Something that can open the capture device.
pub trait AudioSource: Send + Sync + 'static {
    /// Acquire the device and start buffering.
    ///
    /// Called inline by the toggle handler, so implementations must return
    /// within [`DEVICE_OPEN_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// [`ShellError::Device`] when the device is missing, busy or denied.
    fn open(&self) -> Result<Box<dyn CaptureHandle>>;
}

/// An open recording.
pub trait CaptureHandle: Send {
    /// Stop, release the device, and return the buffered chunks in capture order.
    ///
    /// May block while the device shuts down; async callers run it on the
    /// blocking pool.
    fn finish(self: Box<Self>) -> Vec<AudioChunk>;
}

/// Audio source backed by cpal.
///
/// The cpal stream is not `Send`, so each recording runs on its own thread
/// that owns the stream from build to drop.
pub struct CpalAudioSource {
    input_device: Option<String>,
    target_sample_rate: u32,
}

impl CpalAudioSource {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            target_sample_rate: config.sample_rate,
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| ShellError::Device(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioSource for CpalAudioSource {
    fn open(&self) -> Result<Box<dyn CaptureHandle>> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (chunk_tx, chunk_rx) = unbounded::<AudioChunk>();

        let device_name = self.input_device.clone();
        let target_rate = self.target_sample_rate;

        let thread = std::thread::Builder::new()
            .name("aide-capture".into())
            .spawn(move || {
                run_capture_thread(device_name, target_rate, chunk_tx, ready_tx, stop_rx);
            })
            .map_err(|e| ShellError::Device(format!("cannot spawn capture thread: {e}")))?;

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Box::new(CpalCaptureHandle {
                stop_tx,
                chunk_rx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                // Detached: the thread sees `ready_rx` gone and drops the stream.
                drop(thread);
                Err(ShellError::Device(format!(
                    "input device did not start within {}s",
                    DEVICE_OPEN_TIMEOUT.as_secs()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                Err(ShellError::Device(
                    "capture thread exited before the device was ready".into(),
                ))
            }
        }
    }
}

struct CpalCaptureHandle {
    stop_tx: Sender<()>,
    chunk_rx: Receiver<AudioChunk>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle for CpalCaptureHandle {
    fn finish(mut self: Box<Self>) -> Vec<AudioChunk> {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("capture thread panicked");
        }
        self.chunk_rx.try_iter().collect()
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        // A handle dropped without `finish` must still free the device.
        if let Some(thread) = self.thread.take() {
            let _ = self.stop_tx.send(());
            let _ = thread.join();
        }
    }
}

fn run_capture_thread(
    device_name: Option<String>,
    target_rate: u32,
    chunk_tx: Sender<AudioChunk>,
    ready_tx: Sender<Result<()>>,
    stop_rx: Receiver<()>,
) {
    let stream = match build_stream(device_name.as_deref(), target_rate, chunk_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(ShellError::Device(format!(
            "failed to start input stream: {e}"
        ))));
        return;
    }

    if ready_tx.send(Ok(())).is_err() {
        warn!("capture requester went away before the stream started");
        return;
    }
    info!("audio capture started");

    // Hold the stream until stopped (or the handle is gone).
    let _ = stop_rx.recv();
    drop(stream);
    info!("audio capture stopped; device released");
}

fn build_stream(
    device_name: Option<&str>,
    target_rate: u32,
    chunk_tx: Sender<AudioChunk>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| ShellError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ShellError::Device(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| ShellError::Device("no default input device".into()))?
    };

    let default_config = device
        .default_input_config()
        .map_err(|e| ShellError::Device(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();
    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    debug!(
        "native input config: {}Hz, {} channels -> {}Hz mono",
        native_rate, native_channels, target_rate
    );

    device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = downsample(&mono, native_rate, target_rate);
                let chunk = AudioChunk {
                    samples,
                    sample_rate: target_rate,
                    captured_at: Instant::now(),
                };
                if chunk_tx.send(chunk).is_err() {
                    debug!("capture buffer closed, dropping chunk");
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| ShellError::Device(format!("failed to build input stream: {e}")))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler; speech energy sits well below the
/// Nyquist limit of the 16kHz target.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}
