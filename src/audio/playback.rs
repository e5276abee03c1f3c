use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{i16_to_f32, AudioParams, AudioSink, DeviceError};

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// List available output devices
pub fn list_output_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Stream(format!("Failed to enumerate output devices: {}", e)))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Select output device by name (None for default)
fn select_device(name: Option<&str>) -> Result<Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        Some(device_name) => host
            .output_devices()
            .map_err(|e| DeviceError::Stream(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(device_name.to_string())),
        None => host.default_output_device().ok_or(DeviceError::NoDevice("output")),
    }
}

/// Speaker stream draining a ring buffer, paired with a [`PlaybackWriter`].
pub struct CpalPlayback {
    stream: Stream,
    device_name: String,
}

impl CpalPlayback {
    pub fn open(
        device_name: Option<&str>,
        params: AudioParams,
        ring_frames: usize,
    ) -> Result<(Self, PlaybackWriter), DeviceError> {
        let device = select_device(device_name)?;
        let name = device.name().unwrap_or_default();

        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::Stream(format!("Failed to get output config: {}", e)))?;

        let config = StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<i16>::new(params.frame_len() * ring_frames.max(2));
        let (producer, mut consumer) = ring.split();
        let underruns = Arc::new(AtomicU64::new(0));
        let callback_underruns = underruns.clone();

        let err_fn = |err| {
            tracing::error!("Audio output error: {}", err);
        };

        let stream = match supported.sample_format() {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let copied = consumer.pop_slice(data);
                    if copied < data.len() {
                        // Silence the rest
                        data[copied..].fill(0);
                        callback_underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill_f32(&mut consumer, data, &callback_underruns);
                },
                err_fn,
                None,
            ),
            format => return Err(DeviceError::UnsupportedFormat(format!("{:?}", format))),
        }
        .map_err(|e| DeviceError::Stream(format!("Failed to build output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| DeviceError::Stream(format!("Failed to start stream: {}", e)))?;

        let writer = PlaybackWriter {
            producer,
            underruns,
            timeout: params.frame_duration() * 4,
        };

        Ok((
            Self {
                stream,
                device_name: name,
            },
            writer,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop playback
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            tracing::debug!("Failed to pause output stream: {}", e);
        }
        drop(self.stream);
    }
}

fn fill_f32(consumer: &mut HeapCons<i16>, data: &mut [f32], underruns: &AtomicU64) {
    let mut starved = false;
    for sample in data.iter_mut() {
        *sample = match consumer.try_pop() {
            Some(s) => i16_to_f32(s),
            None => {
                starved = true;
                0.0
            }
        };
    }
    if starved {
        underruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Blocking frame writer into the playback ring.
///
/// A full ring makes `write` wait, which paces the playback pipeline at the
/// device's own rate.
pub struct PlaybackWriter {
    producer: HeapProd<i16>,
    underruns: Arc<AtomicU64>,
    timeout: Duration,
}

impl AudioSink for PlaybackWriter {
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError> {
        let starved = self.underruns.swap(0, Ordering::Relaxed);
        if starved > 0 {
            tracing::debug!("Playback underrun in {} callbacks", starved);
        }

        let deadline = Instant::now() + self.timeout;
        let mut written = 0;

        while written < frame.len() {
            written += self.producer.push_slice(&frame[written..]);
            if written == frame.len() {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Playback stalled, {} of {} samples queued ({} free)",
                    written,
                    frame.len(),
                    self.producer.vacant_len()
                );
                return Err(DeviceError::Timeout("playback"));
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(capacity: usize, timeout: Duration) -> (HeapCons<i16>, Arc<AtomicU64>, PlaybackWriter) {
        let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
        let underruns = Arc::new(AtomicU64::new(0));
        let writer = PlaybackWriter {
            producer,
            underruns: underruns.clone(),
            timeout,
        };
        (consumer, underruns, writer)
    }

    #[test]
    fn test_write_fills_ring() {
        let (mut consumer, _underruns, mut writer) = writer(8, Duration::from_millis(100));
        writer.write(&[1, 2, 3, 4]).unwrap();

        let mut out = [0i16; 4];
        assert_eq!(consumer.pop_slice(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_full_ring_times_out() {
        let (consumer, _underruns, mut writer) = writer(8, Duration::from_millis(20));
        assert!(matches!(
            writer.write(&[1; 12]),
            Err(DeviceError::Timeout("playback"))
        ));
        assert_eq!(consumer.occupied_len(), 8);
    }

    #[test]
    fn test_write_waits_for_device_to_drain() {
        let (mut consumer, _underruns, mut writer) = writer(8, Duration::from_millis(500));
        let device = std::thread::spawn(move || {
            let mut drained = Vec::new();
            let mut buf = [0i16; 4];
            while drained.len() < 12 {
                std::thread::sleep(Duration::from_millis(5));
                let n = consumer.pop_slice(&mut buf);
                drained.extend_from_slice(&buf[..n]);
            }
            drained
        });

        let frame: Vec<i16> = (1..=12).collect();
        writer.write(&frame).unwrap();
        assert_eq!(device.join().unwrap(), frame);
    }

    #[test]
    fn test_f32_callback_zero_fills_and_counts_underrun() {
        let (mut producer, mut consumer) = HeapRb::<i16>::new(8).split();
        let underruns = AtomicU64::new(0);
        producer.push_slice(&[i16::MAX, i16::MAX]);

        let mut data = [0.5f32; 4];
        fill_f32(&mut consumer, &mut data, &underruns);
        assert!((data[0] - 1.0).abs() < f32::EPSILON);
        assert!((data[1] - 1.0).abs() < f32::EPSILON);
        assert_eq!(&data[2..], &[0.0, 0.0]);
        assert_eq!(underruns.load(Ordering::Relaxed), 1);

        // A full buffer is not an underrun
        producer.push_slice(&[0; 4]);
        fill_f32(&mut consumer, &mut data, &underruns);
        assert_eq!(underruns.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_write_clears_underrun_count() {
        let (_consumer, underruns, mut writer) = writer(8, Duration::from_millis(100));
        underruns.store(3, Ordering::Relaxed);
        writer.write(&[0; 4]).unwrap();
        assert_eq!(underruns.load(Ordering::Relaxed), 0);
    }
}
