//! WebSocket client transport.
//!
//! Each opened link spawns one task that owns the socket and runs a
//! `select!` loop over:
//!
//! - Incoming frames from the gateway, forwarded to the sink
//! - Outgoing commands from the [`TransportHandle`]
//!
//! Dropping the handle closes the command channel, which ends the task and
//! closes the socket.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::close_code;

use super::{Transport, TransportHandle, TransportSink};

// ============================================================================
// Constants
// ============================================================================

/// Default upper bound on the TCP + handshake phase.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// LinkCommand
// ============================================================================

/// Commands from the handle to the link task.
enum LinkCommand {
    /// Write a text frame.
    Send(String),
    /// Send a close frame and stop.
    Close { code: u16, reason: String },
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Opens `ws://` and `wss://` links with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WebSocketTransport {
    /// Creates a transport with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Checks that a URL can be dialled by this transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for any scheme other than `ws`/`wss`
    /// or a URL without a host.
    pub fn check_url(url: &Url) -> Result<()> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::invalid_url(
                    url.as_str(),
                    format!("unsupported scheme '{other}', expected ws or wss"),
                ));
            }
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::invalid_url(url.as_str(), "missing host"));
        }

        Ok(())
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn TransportHandle>> {
        Self::check_url(url)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));

        debug!(transport = %sink.id(), url = %url, "Opening WebSocket link");

        sink.spawn(run_link(
            url.to_string(),
            self.connect_timeout,
            command_rx,
            sink.clone(),
            Arc::clone(&open),
        ));

        Ok(Box::new(WebSocketHandle { command_tx, open }))
    }
}

// ============================================================================
// WebSocketHandle
// ============================================================================

/// Write side of a WebSocket link.
struct WebSocketHandle {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    open: Arc<AtomicBool>,
}

impl TransportHandle for WebSocketHandle {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_writable() {
            return Err(Error::ConnectionClosed);
        }
        self.command_tx
            .send(LinkCommand::Send(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn is_writable(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.command_tx.is_closed()
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.command_tx.send(LinkCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

// ============================================================================
// Link Task
// ============================================================================

/// Connects, then pumps frames until either side closes.
async fn run_link(
    url: String,
    connect_timeout: Duration,
    mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    sink: TransportSink,
    open: Arc<AtomicBool>,
) {
    let id = sink.id();

    // The handle refuses writes until open, so any command here is a close
    // or a dropped handle.
    let connected = tokio::select! {
        result = timeout(connect_timeout, connect_async(url.as_str())) => result,
        _ = command_rx.recv() => {
            debug!(transport = %id, "Link abandoned while connecting");
            return;
        }
    };

    let ws_stream = match connected {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            warn!(transport = %id, error = %e, "WebSocket connect failed");
            fail(&sink, &Error::WebSocket(e));
            return;
        }
        Err(_) => {
            let err = Error::connection(format!(
                "connect timed out after {}ms",
                connect_timeout.as_millis()
            ));
            warn!(transport = %id, error = %err, "WebSocket connect failed");
            fail(&sink, &err);
            return;
        }
    };

    open.store(true, Ordering::Release);
    sink.opened();

    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        sink.frame(text.as_str());
                    }

                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((close_code::NO_STATUS_RECEIVED, String::new()));
                        debug!(transport = %id, code, %reason, "WebSocket closed by remote");
                        sink.closed(code, reason);
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(transport = %id, error = %e, "WebSocket error");
                        fail(&sink, &Error::WebSocket(e));
                        break;
                    }

                    None => {
                        debug!(transport = %id, "WebSocket stream ended");
                        sink.closed(close_code::ABNORMAL_CLOSURE, "stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(LinkCommand::Send(text)) => {
                        trace!(transport = %id, len = text.len(), "Writing frame");
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(transport = %id, error = %e, "Failed to write frame");
                            fail(&sink, &Error::WebSocket(e));
                            break;
                        }
                    }

                    Some(LinkCommand::Close { code, reason }) => {
                        debug!(transport = %id, code, %reason, "Closing WebSocket");
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        let _ = ws_write.close().await;
                        sink.closed(code, reason);
                        break;
                    }

                    None => {
                        debug!(transport = %id, "Handle dropped, closing WebSocket");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    open.store(false, Ordering::Release);
    debug!(transport = %id, "Link task terminated");
}

/// Reports a fault followed by an abnormal closure.
fn fail(sink: &TransportSink, err: &Error) {
    let message = err.to_string();
    sink.error(message.clone());
    sink.closed(close_code::ABNORMAL_CLOSURE, message);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;
    use tokio::runtime::Handle;
    use tokio_tungstenite::accept_async;

    use crate::client::event_loop::LoopEvent;
    use crate::identifiers::TransportId;
    use crate::transport::TransportEvent;

    fn parse(url: &str) -> Url {
        Url::parse(url).expect("valid url")
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LoopEvent>) -> TransportEvent {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        match event {
            LoopEvent::Transport { event, .. } => event,
            LoopEvent::Timer { .. } => panic!("unexpected timer event"),
        }
    }

    #[test]
    fn test_check_url_accepts_ws_and_wss() {
        assert!(WebSocketTransport::check_url(&parse("ws://localhost:9000/ws")).is_ok());
        assert!(WebSocketTransport::check_url(&parse("wss://gw.example/ws")).is_ok());
    }

    #[test]
    fn test_check_url_rejects_other_schemes() {
        let err = WebSocketTransport::check_url(&parse("http://localhost/ws"))
            .expect_err("http rejected");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_open_send_receive_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        // Echo server that closes after one frame.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.expect("echo");
            }
            let _ = ws.next().await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportSink::new(TransportId::new(1), tx, Handle::current());
        let url = parse(&format!("ws://{addr}/ws"));

        let handle = WebSocketTransport::new()
            .open(&url, sink)
            .expect("open");

        assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
        assert!(handle.is_writable());

        handle
            .send_text(r#"{"type":"heartbeat"}"#.to_string())
            .expect("send");
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Frame(r#"{"type":"heartbeat"}"#.to_string())
        );

        handle.close(close_code::NORMAL_CLOSURE, "bye");
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Close {
                code: close_code::NORMAL_CLOSURE,
                reason: "bye".to_string()
            }
        );

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_connect_refused_reports_close() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportSink::new(TransportId::new(2), tx, Handle::current());
        let handle = WebSocketTransport::new()
            .open(&parse(&format!("ws://{addr}/ws")), sink)
            .expect("open");

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close {
                code: close_code::ABNORMAL_CLOSURE,
                ..
            }
        ));
        assert!(!handle.is_writable());
        assert!(handle.send_text("x".to_string()).is_err());
    }
}
