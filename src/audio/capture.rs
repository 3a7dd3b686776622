//! Microphone capture using CPAL
//!
//! The capture stream lives on a dedicated OS thread because `cpal::Stream`
//! is not `Send`. The thread owns the stream and parks until it is told to
//! stop; the callback pushes mono f32 blocks into a bounded tokio channel
//! with `try_send` so it can never block inside the audio callback.
//!
//! ```text
//! Audio Thread (sync)                 Tokio Runtime (async)
//! ┌──────────────────────┐            ┌─────────────────────────┐
//! │ CPAL callback        │──channel──▶│ session loop            │
//! │  downmix to mono f32 │            │   downsample → encode   │
//! │  try_send(block)     │            │   → WebSocket send      │
//! └──────────────────────┘            └─────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::AudioError;

/// Handle to an active microphone capture.
///
/// Stopping is idempotent; dropping the handle stops the stream.
pub struct CaptureHandle {
    sample_rate: u32,
    is_capturing: Arc<AtomicBool>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Native sample rate of the capture device. This is the source of truth
    /// for the `sampleRate` field in the session config.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop capturing and release the device. Calling this twice is a no-op.
    pub fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("Capture: audio thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Acquire the default input device and start capturing.
///
/// Blocks until the device is acquired and the stream is running (or has
/// failed); call it through `spawn_blocking` from async code. Captured blocks
/// arrive on `blocks_tx` as mono f32 at the device's native rate, one block
/// per hardware callback.
pub fn start_capture(blocks_tx: mpsc::Sender<Vec<f32>>) -> Result<CaptureHandle, AudioError> {
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, AudioError>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let is_capturing = Arc::new(AtomicBool::new(true));

    let thread_flag = is_capturing.clone();
    let thread = thread::Builder::new()
        .name("streamscribe-capture".into())
        .spawn(move || run_capture(blocks_tx, ready_tx, stop_rx, thread_flag))
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(sample_rate)) => Ok(CaptureHandle {
            sample_rate,
            is_capturing,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(AudioError::StreamCreationFailed(
                "capture thread exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Body of the capture thread: open the device, run the stream, park until
/// stopped. The stream is dropped here, on the thread that created it.
fn run_capture(
    blocks_tx: mpsc::Sender<Vec<f32>>,
    ready_tx: std_mpsc::Sender<Result<u32, AudioError>>,
    stop_rx: std_mpsc::Receiver<()>,
    is_capturing: Arc<AtomicBool>,
) {
    let host = cpal::default_host();

    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(AudioError::NoInputDevice));
            return;
        }
    };

    log::info!("Capture: using input device {:?}", device.name());

    let supported_config = match device.default_input_config() {
        Ok(c) => c,
        Err(_) => {
            let _ = ready_tx.send(Err(AudioError::NoSupportedConfig));
            return;
        }
    };

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    log::info!(
        "Capture: {} Hz, {} channels, {:?}",
        sample_rate,
        channels,
        sample_format
    );

    let stream = match build_stream(
        &device,
        &config,
        sample_format,
        channels,
        blocks_tx,
        is_capturing,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
            "Failed to start stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(sample_rate));

    // Park until stop() is called or the handle is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    log::info!("Capture: stream stopped");
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: usize,
    blocks_tx: mpsc::Sender<Vec<f32>>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    match sample_format {
        SampleFormat::I16 => {
            build_stream_typed::<i16>(device, config, channels, blocks_tx, is_capturing)
        }
        SampleFormat::U16 => {
            build_stream_typed::<u16>(device, config, channels, blocks_tx, is_capturing)
        }
        SampleFormat::F32 => {
            build_stream_typed::<f32>(device, config, channels, blocks_tx, is_capturing)
        }
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    channels: usize,
    blocks_tx: mpsc::Sender<Vec<f32>>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_capturing.load(Ordering::SeqCst) {
                    return;
                }

                let block = downmix_to_mono(data, channels);

                // Never block the audio callback. If the session loop falls
                // behind, the block is dropped (there is no retry queue).
                if blocks_tx.try_send(block).is_err() {
                    log::debug!("Capture: block channel full, dropping block");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Downmix interleaved samples to mono f32 by averaging across channels.
fn downmix_to_mono<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| f32::from_sample(s)).collect();
    }

    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
            sum / frame.len() as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_mono_passthrough() {
        let data = vec![0.1f32, -0.2, 0.3];
        let out = downmix_to_mono(&data, 1);
        assert_eq!(out, data);
    }

    #[test]
    fn test_downmix_stereo_averages_pairs() {
        let data = vec![0.2f32, 0.4, -0.6, -0.2];
        let out = downmix_to_mono(&data, 2);

        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - (-0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_i16_normalizes() {
        let data = vec![i16::MAX, 0];
        let out = downmix_to_mono(&data, 1);

        assert!((out[0] - 1.0).abs() < 1e-3);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_downmix_partial_trailing_frame() {
        // A truncated final frame still averages over what is there
        let data = vec![0.2f32, 0.4, 0.6];
        let out = downmix_to_mono(&data, 2);

        assert_eq!(out.len(), 2);
        assert!((out[1] - 0.6).abs() < 1e-6);
    }
}
