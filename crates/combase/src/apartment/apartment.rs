//! Apartment record
//!
//! An apartment is the threading context a thread joins with `Initialize`.
//! Single-threaded apartments belong to one thread and own a message window;
//! multithreaded ones share the process-wide apartment's exporter identity.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use parking_lot::Mutex;
use tracing::trace;
use crate::types::{current_thread_ordinal, ComError, Oxid, Result, ThreadingModel};
use super::window::{ApartmentWindow, MessageQueue};

struct ApartmentState {
    /// Net `Initialize` calls from the owning thread
    inits: u32,
    window: Option<ApartmentWindow>,
    queue: Option<MessageQueue>,
}

/// A threading context
pub struct Apartment {
    oxid: Oxid,
    model: ThreadingModel,
    /// `None` for the shared multithreaded apartment
    owner: Option<ThreadId>,
    parent: Option<Arc<Apartment>>,
    state: Mutex<ApartmentState>,
}

impl Apartment {
    /// The process-wide multithreaded apartment
    pub(crate) fn new_shared() -> Self {
        Self {
            oxid: Oxid::for_mta(),
            model: ThreadingModel::Multithreaded,
            owner: None,
            parent: None,
            state: Mutex::new(ApartmentState {
                inits: 0,
                window: None,
                queue: None,
            }),
        }
    }

    /// An apartment for the calling thread, with an initialization count of 1
    pub(crate) fn new_for_current_thread(model: ThreadingModel, shared: Arc<Apartment>) -> Self {
        let (oxid, window, queue) = match model {
            ThreadingModel::ApartmentThreaded => {
                let oxid = Oxid::for_sta(current_thread_ordinal());
                let (window, queue) = ApartmentWindow::create(oxid);
                (oxid, Some(window), Some(queue))
            }
            ThreadingModel::Multithreaded => (shared.oxid, None, None),
        };

        Self {
            oxid,
            model,
            owner: Some(thread::current().id()),
            parent: Some(shared),
            state: Mutex::new(ApartmentState {
                inits: 1,
                window,
                queue,
            }),
        }
    }

    /// Exporter identity
    pub fn oxid(&self) -> Oxid {
        self.oxid
    }

    /// Threading model, fixed at creation
    pub fn model(&self) -> ThreadingModel {
        self.model
    }

    /// Owning thread, `None` for the shared apartment
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// The shared apartment this one hangs off
    pub fn parent(&self) -> Option<&Arc<Apartment>> {
        self.parent.as_ref()
    }

    /// Whether this is the process-wide shared apartment
    pub fn is_shared(&self) -> bool {
        self.owner.is_none()
    }

    /// Current initialization count
    pub fn inits(&self) -> u32 {
        self.state.lock().inits
    }

    pub(crate) fn add_init(&self) -> u32 {
        let mut state = self.state.lock();
        state.inits += 1;
        state.inits
    }

    pub(crate) fn release_init(&self) -> u32 {
        let mut state = self.state.lock();
        state.inits = state.inits.saturating_sub(1);
        state.inits
    }

    /// Message window, present for live single-threaded apartments
    pub fn window(&self) -> Option<ApartmentWindow> {
        self.state.lock().window.clone()
    }

    /// Run every queued message; only the owning thread may pump
    pub fn pump_messages(&self) -> Result<usize> {
        if self.owner != Some(thread::current().id()) {
            return Err(ComError::WrongThread);
        }

        // Run outside the lock: a message may post back into this apartment
        let messages = match self.state.lock().queue.as_mut() {
            Some(queue) => queue.drain(),
            None => return Ok(0),
        };

        let count = messages.len();
        for message in messages {
            message();
        }
        trace!("Apartment {} pumped {} messages", self.oxid, count);
        Ok(count)
    }

    /// Tear down the window and queue; posts made after this fail
    pub(crate) fn destroy(&self) {
        let mut state = self.state.lock();
        state.window = None;
        state.queue = None;
    }
}

impl fmt::Debug for Apartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apartment")
            .field("oxid", &self.oxid)
            .field("model", &self.model)
            .field("owner", &self.owner)
            .finish()
    }
}
