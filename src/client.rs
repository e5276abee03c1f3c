//! Wires devices, pipelines and the connection into one running client.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::audio::{
    AudioSink, AudioSource, CodecError, CpalCapture, CpalPlayback, DeviceError, PlaybackQueue,
};
use crate::config::{ClientConfig, ConfigError};
use crate::pipeline::{
    CapturePipeline, CaptureStats, DispatchStats, Dispatcher, PlaybackPipeline, PlaybackStats,
};
use crate::session::{RunningFlag, SessionView};
use crate::transport::{FrameSink, TransportError, WsTransport};

const WAIT_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Connection error: {0}")]
    Transport(#[from] TransportError),
    #[error("Failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Counters collected from every worker at shutdown
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientReport {
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
    pub dispatch: DispatchStats,
    /// Frames the playback queue threw away when full
    pub dropped_frames: u64,
}

struct Workers {
    dispatcher: JoinHandle<DispatchStats>,
    capture: JoinHandle<CaptureStats>,
    playback: JoinHandle<PlaybackStats>,
}

/// Streams are tied to the thread that opened them, so they stay here
struct Devices {
    capture: CpalCapture,
    playback: CpalPlayback,
}

pub struct VoiceClient {
    running: RunningFlag,
    view: SessionView,
    queue: PlaybackQueue,
    transport: Option<WsTransport>,
    workers: Option<Workers>,
    devices: Option<Devices>,
}

impl VoiceClient {
    /// Open the configured microphone and speaker, then start streaming
    pub fn start(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let params = config.audio.params();
        let (capture, reader) = CpalCapture::open(
            config.audio.input_device.as_deref(),
            params,
            config.audio.ring_frames,
        )?;
        let (playback, writer) = CpalPlayback::open(
            config.audio.output_device.as_deref(),
            params,
            config.audio.ring_frames,
        )?;
        tracing::info!(
            "Audio devices: input '{}', output '{}'",
            capture.device_name(),
            playback.device_name()
        );

        let mut client = Self::start_with(config, reader, writer)?;
        client.devices = Some(Devices { capture, playback });
        Ok(client)
    }

    /// Start streaming with caller-provided audio endpoints
    pub fn start_with<S, W>(config: &ClientConfig, source: S, output: W) -> Result<Self, ClientError>
    where
        S: AudioSource + 'static,
        W: AudioSink + 'static,
    {
        config.validate()?;
        let params = config.audio.params();
        let running = RunningFlag::new();
        let view = SessionView::new();
        let queue =
            PlaybackQueue::with_limit(config.playback.max_queued_frames, config.playback.overflow);

        let (events_tx, events_rx) = mpsc::channel();
        let transport = WsTransport::connect(config.connect_options(), events_tx, running.clone())?;
        let sink: Arc<dyn FrameSink> = Arc::new(transport.handle());

        let spawned = (|| -> Result<Workers, ClientError> {
            let dispatcher = Dispatcher::new(
                params,
                config.endpoint.listen_mode,
                sink.clone(),
                view.clone(),
                queue.clone(),
                running.clone(),
            )?;
            let capture = CapturePipeline::new(
                source,
                params,
                sink.clone(),
                view.clone(),
                running.clone(),
                config.audio.capture_idle(),
            )?;
            let playback = PlaybackPipeline::new(
                output,
                params,
                queue.clone(),
                running.clone(),
                config.audio.underrun_sleep(),
            );
            Ok(Workers {
                dispatcher: dispatcher.spawn(events_rx)?,
                capture: capture.spawn()?,
                playback: playback.spawn()?,
            })
        })();

        let workers = match spawned {
            Ok(workers) => workers,
            Err(e) => {
                running.stop();
                transport.join();
                return Err(e);
            }
        };

        Ok(Self {
            running,
            view,
            queue,
            transport: Some(transport),
            workers: Some(workers),
            devices: None,
        })
    }

    pub fn running(&self) -> RunningFlag {
        self.running.clone()
    }

    pub fn session(&self) -> SessionView {
        self.view.clone()
    }

    /// Block until the session ends
    pub fn wait(&self) {
        while self.running.is_running() {
            std::thread::sleep(WAIT_INTERVAL);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. Returns true if the session ended.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.running.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(WAIT_INTERVAL);
        }
        true
    }

    /// Stop everything and join all threads
    pub fn shutdown(mut self) -> ClientReport {
        self.running.stop();
        let mut report = ClientReport::default();

        if let Some(workers) = self.workers.take() {
            report.capture = join_worker("capture", workers.capture);
            report.playback = join_worker("playback", workers.playback);
            report.dispatch = join_worker("session", workers.dispatcher);
        }
        if let Some(transport) = self.transport.take() {
            transport.join();
        }
        if let Some(devices) = self.devices.take() {
            devices.capture.stop();
            devices.playback.stop();
        }
        report.dropped_frames = self.queue.dropped();

        tracing::info!("Client stopped: {}", report);
        report
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        // Lets detached workers wind down if shutdown() was never called
        self.running.stop();
    }
}

fn join_worker<T: Default>(name: &str, handle: JoinHandle<T>) -> T {
    match handle.join() {
        Ok(stats) => stats,
        Err(_) => {
            tracing::error!("{} thread panicked", name);
            T::default()
        }
    }
}

impl std::fmt::Display for ClientReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "captured {} (sent {}, gated {}, read errors {}, encode errors {}), \
             played {} (silence {}, write errors {}), \
             received text {} / audio {} (malformed {}, decode errors {}), dropped {}",
            self.capture.frames_read,
            self.capture.frames_sent,
            self.capture.frames_gated,
            self.capture.read_errors,
            self.capture.encode_errors,
            self.playback.frames_played,
            self.playback.silence_frames,
            self.playback.write_errors,
            self.dispatch.text_frames,
            self.dispatch.binary_frames,
            self.dispatch.malformed_frames,
            self.dispatch.decode_errors,
            self.dropped_frames,
        )
    }
}
