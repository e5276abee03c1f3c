//! In-process stand-ins for the microphone, the speaker and the network.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::{AudioParams, AudioSink, AudioSource, DeviceError};
use crate::session::RunningFlag;
use crate::transport::{Frame, FrameSink};

/// Records every frame handed to the network
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }
}

impl FrameSink for RecordingSink {
    fn send(&self, frame: Frame) {
        self.frames.lock().push(frame);
    }
}

/// Produces a 440 Hz tone; optionally clears the running flag after `limit` frames
pub struct ToneSource {
    params: AudioParams,
    limit: Option<u64>,
    produced: u64,
    running: RunningFlag,
    pace: Duration,
}

impl ToneSource {
    pub fn new(params: AudioParams, limit: Option<u64>, running: RunningFlag) -> Self {
        Self {
            params,
            limit,
            produced: 0,
            running,
            pace: Duration::from_millis(2),
        }
    }
}

impl AudioSource for ToneSource {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), DeviceError> {
        std::thread::sleep(self.pace);
        let offset = self.produced as usize * frame.len();
        for (i, sample) in frame.iter_mut().enumerate() {
            let t = (offset + i) as f32 / self.params.sample_rate as f32;
            *sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        }
        self.produced += 1;
        if self.limit == Some(self.produced) {
            self.running.stop();
        }
        Ok(())
    }
}

/// Speaker that keeps what it was given
pub struct RecordingOutput {
    written: Arc<Mutex<Vec<Vec<i16>>>>,
    limit: Option<usize>,
    running: RunningFlag,
}

impl RecordingOutput {
    pub fn new(running: RunningFlag) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            limit: None,
            running,
        }
    }

    /// Clear the running flag once `limit` frames were written
    pub fn stop_after(limit: usize, running: RunningFlag) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(running)
        }
    }

    pub fn written(&self) -> Arc<Mutex<Vec<Vec<i16>>>> {
        self.written.clone()
    }
}

impl AudioSink for RecordingOutput {
    fn write(&mut self, frame: &[i16]) -> Result<(), DeviceError> {
        let mut written = self.written.lock();
        written.push(frame.to_vec());
        if self.limit == Some(written.len()) {
            self.running.stop();
        }
        Ok(())
    }
}
