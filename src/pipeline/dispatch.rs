use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioParams, CodecError, OpusDecoder, PlaybackQueue, PushOutcome};
use crate::session::{
    preview, ControlMessage, ListenMode, OutboundMessage, RunningFlag, SessionMachine,
    SessionView,
};
use crate::transport::{Frame, FrameSink, TransportEvent};

/// How long a blocked receive waits before re-checking the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub text_frames: u64,
    pub binary_frames: u64,
    pub malformed_frames: u64,
    pub decode_errors: u64,
    pub frames_queued: u64,
}

/// Sole owner of the session state.
///
/// Consumes transport events strictly in arrival order: control text goes
/// through the state machine, audio goes through the decoder into the
/// playback queue.
pub struct Dispatcher {
    machine: SessionMachine,
    view: SessionView,
    sink: Arc<dyn FrameSink>,
    decoder: OpusDecoder,
    queue: PlaybackQueue,
    running: RunningFlag,
    params: AudioParams,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        params: AudioParams,
        mode: ListenMode,
        sink: Arc<dyn FrameSink>,
        view: SessionView,
        queue: PlaybackQueue,
        running: RunningFlag,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            machine: SessionMachine::new(mode),
            view,
            sink,
            decoder: OpusDecoder::new(params)?,
            queue,
            running,
            params,
            stats: DispatchStats::default(),
        })
    }

    pub fn spawn(self, events: Receiver<TransportEvent>) -> std::io::Result<JoinHandle<DispatchStats>> {
        std::thread::Builder::new()
            .name("voxlink-session".into())
            .spawn(move || self.run(events))
    }

    pub fn run(mut self, events: Receiver<TransportEvent>) -> DispatchStats {
        while self.running.is_running() {
            match events.recv_timeout(POLL_INTERVAL) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("Transport event channel closed");
                    break;
                }
            }
        }
        self.stats
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(Frame::Binary(data)) => self.on_audio(&data),
            TransportEvent::Message(Frame::Text(text)) => self.on_text(&text),
            TransportEvent::Closed => {
                tracing::info!("WebSocket disconnected");
                self.stop();
            }
            TransportEvent::Failed(reason) => {
                tracing::error!("WebSocket connection failed: {}", reason);
                self.stop();
            }
        }
    }

    fn on_open(&mut self) {
        // A (re)opened connection starts a fresh conversation
        self.machine.reset();
        self.view.publish(self.machine.state());
        self.queue.clear();
        self.send(OutboundMessage::hello(self.params));
    }

    fn on_audio(&mut self, packet: &[u8]) {
        self.stats.binary_frames += 1;
        tracing::trace!("<< binary {} bytes", packet.len());

        match self.decoder.decode(packet) {
            Ok(frame) => match self.queue.push(frame) {
                PushOutcome::Queued => self.stats.frames_queued += 1,
                PushOutcome::EvictedOldest => {
                    self.stats.frames_queued += 1;
                    tracing::debug!("Playback queue full, dropped oldest frame");
                }
                PushOutcome::Rejected => {
                    tracing::debug!("Playback queue full, dropped incoming frame");
                }
            },
            Err(e) => {
                if self.stats.decode_errors == 0 {
                    tracing::warn!("Dropping undecodable audio frame: {}", e);
                }
                self.stats.decode_errors += 1;
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        self.stats.text_frames += 1;
        tracing::info!("<< {}", text);

        let msg = ControlMessage::parse(text);
        if let ControlMessage::Malformed { raw } = &msg {
            self.stats.malformed_frames += 1;
            let (shown, hex) = preview(raw.as_bytes());
            tracing::warn!("Ignoring malformed message: {}", shown);
            tracing::debug!("Message hex dump: {}", hex);
            return;
        }

        let had_session = self.machine.state().session_id.is_some();
        let outbound = self.machine.handle(&msg);
        if matches!(msg, ControlMessage::Goodbye { .. })
            && had_session
            && self.machine.state().session_id.is_none()
        {
            tracing::info!("<< Goodbye");
        }

        self.view.publish(self.machine.state());
        if let Some(outbound) = outbound {
            self.send(outbound);
        }
    }

    fn send(&self, msg: OutboundMessage) {
        match msg.encode() {
            Ok(text) => self.sink.send(Frame::Text(text)),
            Err(e) => tracing::error!("Failed to encode {:?}: {}", msg, e),
        }
    }

    fn stop(&mut self) {
        let mut state = self.machine.state().clone();
        state.listening = false;
        self.view.publish(&state);
        self.running.stop();
    }
}
