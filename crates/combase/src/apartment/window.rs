//! Message-routing surface of a single-threaded apartment
//!
//! Calls destined for an STA are posted from any thread into the apartment's
//! queue and run only when the owning thread pumps its messages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use crate::types::{ComError, Oxid, Result};

/// A unit of work queued for an apartment
pub type WindowMessage = Box<dyn FnOnce() + Send>;

/// Identity of an apartment window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

impl WindowHandle {
    fn generate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Posting side of an apartment's message queue
#[derive(Clone)]
pub struct ApartmentWindow {
    handle: WindowHandle,
    oxid: Oxid,
    sender: mpsc::UnboundedSender<WindowMessage>,
}

impl ApartmentWindow {
    /// Create a window and the queue it posts into
    pub(crate) fn create(oxid: Oxid) -> (Self, MessageQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let window = Self {
            handle: WindowHandle::generate(),
            oxid,
            sender,
        };
        (window, MessageQueue { receiver })
    }

    /// Window identity
    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    /// Apartment this window routes to
    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    /// Queue `message` for the owning thread
    pub fn post<F>(&self, message: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Box::new(message))
            .map_err(|_| ComError::Disconnected(format!("apartment {} is gone", self.oxid)))
    }

    /// Queue `call` and return a receiver for its result
    pub fn call<F, R>(&self, call: F) -> Result<oneshot::Receiver<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.post(move || {
            let _ = response_tx.send(call());
        })?;
        Ok(response_rx)
    }

    /// Whether the apartment behind this window still exists
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl fmt::Debug for ApartmentWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApartmentWindow")
            .field("handle", &self.handle)
            .field("oxid", &self.oxid)
            .finish()
    }
}

/// Receiving side, owned by the apartment
pub(crate) struct MessageQueue {
    receiver: mpsc::UnboundedReceiver<WindowMessage>,
}

impl MessageQueue {
    /// Take everything queued so far without blocking
    pub(crate) fn drain(&mut self) -> Vec<WindowMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            messages.push(message);
        }
        messages
    }
}
