//! Websocket connection serviced on its own thread.
//!
//! The thread runs a single-threaded tokio runtime that owns the socket. Inbound
//! frames and lifecycle changes go out on a std channel as [`TransportEvent`]s;
//! outbound frames come in through [`TransportHandle`].

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Frame, FrameSink, ReconnectPolicy, TransportError, TransportEvent};
use crate::session::RunningFlag;

/// How often the loop wakes up to check the running flag
const SERVICE_INTERVAL: Duration = Duration::from_millis(50);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub url: String,
    /// Extra handshake headers (authorization, device ids, ...)
    pub headers: Vec<(String, String)>,
    pub reconnect: ReconnectPolicy,
}

impl ConnectOptions {
    fn request(&self) -> Result<Request, TransportError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TransportError::Url(self.url.clone()));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Url(format!("{}: {}", self.url, e)))?;

        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Header(name.clone(), e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Header(name.clone(), e.to_string()))?;
            request.headers_mut().insert(header, value);
        }

        Ok(request)
    }
}

/// Cloneable sender side of the connection
#[derive(Clone)]
pub struct TransportHandle {
    outbound: UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl FrameSink for TransportHandle {
    fn send(&self, frame: Frame) {
        if !self.is_open() {
            tracing::trace!("Dropping frame, connection not open");
            return;
        }
        match &frame {
            Frame::Text(text) => tracing::info!(">> {}", text),
            Frame::Binary(data) => tracing::trace!(">> binary {} bytes", data.len()),
        }
        if self.outbound.send(frame).is_err() {
            tracing::trace!("Dropping frame, network thread gone");
        }
    }
}

/// Why a connected session ended
enum SessionEnd {
    Shutdown,
    Closed,
    Error(String),
}

pub struct WsTransport {
    handle: TransportHandle,
    thread: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Start connecting in the background. Only option errors are reported
    /// here; connection failures arrive as [`TransportEvent::Failed`].
    pub fn connect(
        options: ConnectOptions,
        events: Sender<TransportEvent>,
        running: RunningFlag,
    ) -> Result<Self, TransportError> {
        // Validate once up front so the network thread cannot fail on it
        options.request()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let handle = TransportHandle {
            outbound: outbound_tx,
            open: open.clone(),
        };

        let thread = std::thread::Builder::new()
            .name("voxlink-ws".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to build network runtime: {}", e);
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                };
                runtime.block_on(event_loop(options, events, outbound_rx, open, running));
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Wait for the network thread; it exits once the running flag is cleared
    /// or the connection is gone for good.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Network thread panicked");
            }
        }
    }
}

async fn event_loop(
    options: ConnectOptions,
    events: Sender<TransportEvent>,
    mut outbound: UnboundedReceiver<Frame>,
    open: Arc<AtomicBool>,
    running: RunningFlag,
) {
    let mut attempt = 0u32;

    while running.is_running() {
        let request = match options.request() {
            Ok(request) => request,
            Err(e) => {
                let _ = events.send(TransportEvent::Failed(e.to_string()));
                return;
            }
        };

        tracing::info!("Connecting to {}", options.url);
        let failure = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request)).await
        {
            Ok(Ok((socket, _response))) => {
                tracing::info!("WebSocket connection established");
                attempt = 0;

                // Anything queued while we were down belongs to the old session
                while outbound.try_recv().is_ok() {}
                open.store(true, Ordering::SeqCst);
                if events.send(TransportEvent::Opened).is_err() {
                    open.store(false, Ordering::SeqCst);
                    return;
                }

                let end = serve(socket, &events, &mut outbound, &running).await;
                open.store(false, Ordering::SeqCst);

                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Closed => {
                        tracing::info!("WebSocket connection closed");
                        TransportEvent::Closed
                    }
                    SessionEnd::Error(reason) => {
                        tracing::error!("WebSocket connection error: {}", reason);
                        TransportEvent::Closed
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!("WebSocket connection failed: {}", e);
                TransportEvent::Failed(e.to_string())
            }
            Err(_) => {
                tracing::error!("WebSocket handshake timed out");
                TransportEvent::Failed("handshake timed out".into())
            }
        };

        attempt += 1;
        if !options.reconnect.allows(attempt) || !running.is_running() {
            let _ = events.send(failure);
            return;
        }

        let delay = options.reconnect.delay(attempt);
        tracing::warn!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt,
            options.reconnect.max_attempts
        );
        wait_while_running(delay, &running).await;
    }
}

async fn wait_while_running(delay: Duration, running: &RunningFlag) {
    let deadline = tokio::time::Instant::now() + delay;
    while running.is_running() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(SERVICE_INTERVAL).await;
    }
}

async fn serve(
    socket: Socket,
    events: &Sender<TransportEvent>,
    outbound: &mut UnboundedReceiver<Frame>,
    running: &RunningFlag,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    let mut tick = tokio::time::interval(SERVICE_INTERVAL);

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let frame = match inbound {
                    Some(Ok(Message::Text(text))) => Frame::Text(text),
                    Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                    Some(Ok(Message::Close(close))) => {
                        tracing::debug!("Close frame: {:?}", close);
                        return SessionEnd::Closed;
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Error(e.to_string()),
                    None => return SessionEnd::Closed,
                };
                if events.send(TransportEvent::Message(frame)).is_err() {
                    // Nobody is listening any more
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
            queued = outbound.recv() => {
                let message = match queued {
                    Some(Frame::Text(text)) => Message::Text(text),
                    Some(Frame::Binary(data)) => Message::Binary(data),
                    None => return SessionEnd::Shutdown,
                };
                if let Err(e) = sink.send(message).await {
                    return SessionEnd::Error(e.to_string());
                }
            }
            _ = tick.tick() => {
                if !running.is_running() {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
