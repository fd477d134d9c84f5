//! In-memory transport for driving the manager from tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

use super::{Transport, TransportHandle, TransportSink};

// ============================================================================
// FakeTransport
// ============================================================================

/// Records every opened link; tests script the gateway side through them.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    links: Arc<Mutex<Vec<FakeLink>>>,
    fail_open: Arc<AtomicBool>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `open` calls fail synchronously.
    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    pub(crate) fn link(&self, index: usize) -> FakeLink {
        self.links.lock()[index].clone()
    }

    pub(crate) fn last_link(&self) -> FakeLink {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("at least one link opened")
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn TransportHandle>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("refused: {url}")));
        }

        let link = FakeLink {
            sink,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(None)),
            writable: Arc::new(AtomicBool::new(false)),
        };
        let handle = FakeHandle {
            sent: Arc::clone(&link.sent),
            closed: Arc::clone(&link.closed),
            writable: Arc::clone(&link.writable),
        };
        self.links.lock().push(link);

        Ok(Box::new(handle))
    }
}

// ============================================================================
// FakeLink
// ============================================================================

/// Gateway side of one fake link.
#[derive(Clone)]
pub(crate) struct FakeLink {
    sink: TransportSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    writable: Arc<AtomicBool>,
}

impl FakeLink {
    /// Completes the connect.
    pub(crate) fn open(&self) {
        self.writable.store(true, Ordering::SeqCst);
        self.sink.opened();
    }

    /// Delivers an inbound JSON frame.
    pub(crate) fn push(&self, frame: Value) {
        self.sink.frame(frame.to_string());
    }

    /// Delivers raw inbound text.
    pub(crate) fn push_text(&self, text: &str) {
        self.sink.frame(text);
    }

    /// Reports a transport error.
    pub(crate) fn fail(&self, message: &str) {
        self.sink.error(message);
    }

    /// Closes the link from the gateway side.
    pub(crate) fn drop_with(&self, code: u16, reason: &str) {
        self.writable.store(false, Ordering::SeqCst);
        self.sink.closed(code, reason);
    }

    /// Frames the client wrote, parsed.
    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).expect("client sent valid JSON"))
            .collect()
    }

    /// Frames the client wrote with a given `type`.
    pub(crate) fn sent_of_type(&self, frame_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|v| v["type"] == frame_type)
            .collect()
    }

    /// Close code and reason the client used, if it closed the link.
    pub(crate) fn closed_with(&self) -> Option<(u16, String)> {
        self.closed.lock().clone()
    }
}

// ============================================================================
// FakeHandle
// ============================================================================

struct FakeHandle {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
    writable: Arc<AtomicBool>,
}

impl TransportHandle for FakeHandle {
    fn send_text(&self, text: String) -> Result<()> {
        if !self.is_writable() {
            return Err(Error::ConnectionClosed);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn close(&self, code: u16, reason: &str) {
        self.writable.store(false, Ordering::SeqCst);
        *self.closed.lock() = Some((code, reason.to_string()));
    }
}
