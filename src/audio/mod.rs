mod capture;
mod encoder;
mod playback;
mod queue;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{list_input_devices, CpalCapture, CaptureReader};
pub use encoder::{CodecError, OpusDecoder, OpusEncoder};
pub use playback::{list_output_devices, CpalPlayback, PlaybackWriter};
pub use queue::{OverflowPolicy, PlaybackQueue, PushOutcome};

/// Sample rate for all audio operations (16kHz is what the assistant expects)
pub const SAMPLE_RATE: u32 = 16000;
/// Channels (mono for voice)
pub const CHANNELS: u16 = 1;
/// Frame duration in ms (60ms frames, matching the hello we advertise)
pub const FRAME_DURATION_MS: u32 = 60;
/// Codec name advertised in the hello message
pub const CODEC_NAME: &str = "opus";

/// One block of interleaved signed 16-bit samples.
///
/// Moved, never shared, between pipeline stages.
pub type AudioFrame = Vec<i16>;

/// Fixed audio format shared by the devices, the codec and the hello message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl AudioParams {
    /// Samples per channel in one frame (16000 * 60 / 1000 = 960)
    pub fn samples_per_channel(&self) -> usize {
        (self.sample_rate * self.frame_duration_ms / 1000) as usize
    }

    /// Interleaved samples in one frame
    pub fn frame_len(&self) -> usize {
        self.samples_per_channel() * self.channels as usize
    }

    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// A frame of silence of the configured length
    pub fn silence(&self) -> AudioFrame {
        vec![0; self.frame_len()]
    }
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_duration_ms: FRAME_DURATION_MS,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No {0} device available")]
    NoDevice(&'static str),
    #[error("Device '{0}' not found")]
    NotFound(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Device {0} timed out")]
    Timeout(&'static str),
    #[error("Capture overrun")]
    Overrun,
}

/// Blocking source of fixed-size PCM frames (the microphone side).
pub trait AudioSource: Send {
    /// Fill `frame` completely or report why it could not be filled.
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError>;
}

/// Blocking sink for PCM frames (the speaker side).
pub trait AudioSink: Send {
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError>;
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_frame_geometry() {
        let params = AudioParams::default();
        assert_eq!(params.samples_per_channel(), 960);
        assert_eq!(params.frame_len(), 960);
        assert_eq!(params.silence().len(), 960);
        assert!(params.silence().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_stereo_frame_len() {
        let params = AudioParams {
            sample_rate: 48000,
            channels: 2,
            frame_duration_ms: 20,
        };
        assert_eq!(params.samples_per_channel(), 960);
        assert_eq!(params.frame_len(), 1920);
    }

    #[test]
    fn test_sample_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert!((i16_to_f32(i16::MAX) - 1.0).abs() < f32::EPSILON);
    }
}
