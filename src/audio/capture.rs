use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{f32_to_i16, AudioParams, AudioSource, DeviceError};

/// How often a blocked read re-checks the ring
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// List available input devices
pub fn list_input_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| DeviceError::Stream(format!("Failed to enumerate input devices: {}", e)))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Select input device by name (None for default)
fn select_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        Some(device_name) => host
            .input_devices()
            .map_err(|e| DeviceError::Stream(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(device_name.to_string())),
        None => host.default_input_device().ok_or(DeviceError::NoDevice("input")),
    }
}

/// Microphone stream feeding a ring buffer.
///
/// The cpal stream is not `Send` on every platform, so this stays on the thread
/// that opened it; the paired [`CaptureReader`] moves to the capture pipeline.
pub struct CpalCapture {
    stream: Stream,
    device_name: String,
}

impl CpalCapture {
    pub fn open(
        device_name: Option<&str>,
        params: AudioParams,
        ring_frames: usize,
    ) -> Result<(Self, CaptureReader), DeviceError> {
        let device = select_device(device_name)?;
        let name = device.name().unwrap_or_default();

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Stream(format!("Failed to get input config: {}", e)))?;

        let config = StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<i16>::new(params.frame_len() * ring_frames.max(2));
        let (mut producer, consumer) = ring.split();
        let overruns = Arc::new(AtomicU64::new(0));
        let callback_overruns = overruns.clone();

        let err_fn = |err| {
            tracing::error!("Audio input error: {}", err);
        };

        let stream = match supported.sample_format() {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    push_samples(&mut producer, data.iter().copied(), &callback_overruns);
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push_samples(
                        &mut producer,
                        data.iter().map(|&s| f32_to_i16(s)),
                        &callback_overruns,
                    );
                },
                err_fn,
                None,
            ),
            format => return Err(DeviceError::UnsupportedFormat(format!("{:?}", format))),
        }
        .map_err(|e| DeviceError::Stream(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| DeviceError::Stream(format!("Failed to start stream: {}", e)))?;

        let reader = CaptureReader {
            consumer,
            overruns,
            timeout: params.frame_duration() * 4,
        };

        Ok((
            Self {
                stream,
                device_name: name,
            },
            reader,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capturing
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!("Failed to pause input stream: {}", e);
        }
        drop(self.stream);
    }
}

fn push_samples(
    producer: &mut HeapProd<i16>,
    samples: impl Iterator<Item = i16>,
    overruns: &AtomicU64,
) {
    let mut dropped = false;
    for sample in samples {
        if producer.try_push(sample).is_err() {
            dropped = true;
        }
    }
    if dropped {
        overruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Blocking frame reader over the capture ring.
pub struct CaptureReader {
    consumer: HeapCons<i16>,
    overruns: Arc<AtomicU64>,
    timeout: Duration,
}

impl CaptureReader {
    fn fill(&mut self, frame: &mut [i16]) -> Result<(), DeviceError> {
        let deadline = Instant::now() + self.timeout;
        let mut filled = 0;

        while filled < frame.len() {
            if self.overruns.load(Ordering::Relaxed) > 0 {
                return Err(DeviceError::Overrun);
            }
            filled += self.consumer.pop_slice(&mut frame[filled..]);
            if filled == frame.len() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout("capture"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        Ok(())
    }

    /// Drop whatever is buffered so the next frame starts on fresh samples
    fn recover(&mut self) {
        let overruns = self.overruns.swap(0, Ordering::Relaxed);
        let stale = self.consumer.occupied_len();
        self.consumer.clear();
        tracing::warn!(
            "Capture overrun ({} callbacks), discarded {} stale samples",
            overruns,
            stale
        );
    }
}

impl AudioSource for CaptureReader {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError> {
        match self.fill(frame) {
            Err(DeviceError::Overrun) => {
                self.recover();
                self.fill(frame)
            }
            result => result,
        }
    }
}
