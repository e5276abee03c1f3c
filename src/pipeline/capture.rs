use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioParams, AudioSource, CodecError, DeviceError, OpusEncoder};
use crate::session::{RunningFlag, SessionView};
use crate::transport::{Frame, FrameSink};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_read: u64,
    pub frames_sent: u64,
    /// Frames read while not listening
    pub frames_gated: u64,
    pub read_errors: u64,
    pub encode_errors: u64,
}

/// Microphone -> encoder -> network, gated on the session listening.
pub struct CapturePipeline<S: AudioSource> {
    source: S,
    encoder: OpusEncoder,
    sink: Arc<dyn FrameSink>,
    session: SessionView,
    running: RunningFlag,
    params: AudioParams,
    idle_interval: Duration,
}

impl<S: AudioSource + 'static> CapturePipeline<S> {
    pub fn new(
        source: S,
        params: AudioParams,
        sink: Arc<dyn FrameSink>,
        session: SessionView,
        running: RunningFlag,
        idle_interval: Duration,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            source,
            encoder: OpusEncoder::new(params)?,
            sink,
            session,
            running,
            params,
            idle_interval,
        })
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<CaptureStats>> {
        std::thread::Builder::new()
            .name("voxlink-capture".into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> CaptureStats {
        let mut stats = CaptureStats::default();
        let mut frame = self.params.silence();

        tracing::info!("Audio capture started");
        while self.running.is_running() {
            match self.source.read(&mut frame) {
                Ok(()) => stats.frames_read += 1,
                Err(DeviceError::Timeout(_)) => {
                    stats.read_errors += 1;
                    tracing::debug!("Capture read timed out");
                    continue;
                }
                Err(e) => {
                    stats.read_errors += 1;
                    tracing::warn!("Capture read failed: {}", e);
                    std::thread::sleep(self.idle_interval);
                    continue;
                }
            }

            if !self.session.is_listening() {
                stats.frames_gated += 1;
                std::thread::sleep(self.idle_interval);
                continue;
            }

            match self.encoder.encode(&frame) {
                Ok(packet) => {
                    self.sink.send(Frame::Binary(packet));
                    stats.frames_sent += 1;
                }
                Err(e) => {
                    if stats.encode_errors == 0 {
                        tracing::warn!("Dropping capture frame: {}", e);
                    }
                    stats.encode_errors += 1;
                }
            }
        }

        tracing::info!("Audio capture stopped");
        stats
    }
}
