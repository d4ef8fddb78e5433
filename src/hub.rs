//! Unified position cache and listener fan-out

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::errors::TrackerError;
use crate::models::{Mmsi, PositionRecord};

/// Listener invoked for every position update
pub type Listener = Arc<dyn Fn(&PositionRecord) -> Result<(), TrackerError> + Send + Sync>;

pub type ListenerId = u64;

/// Process-wide position cache shared by all providers
///
/// Holds at most one record per MMSI, always the most recently received one.
/// Nothing is evicted unless asked for explicitly.
#[derive(Default)]
pub struct PositionHub {
    positions: RwLock<HashMap<String, PositionRecord>>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

impl PositionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a record and hand it to every listener.
    ///
    /// Listeners are called outside of the lock, so a listener may register
    /// or remove listeners itself. A failing or panicking listener is logged
    /// and does not keep the record from reaching the others.
    pub fn publish(&self, record: PositionRecord) {
        self.positions
            .write()
            .insert(record.mmsi.clone(), record.clone());

        let listeners: Vec<(ListenerId, Listener)> = self.listeners.read().clone();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&record))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Error in position listener {}: {}", id, e),
                Err(_) => error!("Position listener {} panicked", id),
            }
        }
    }

    /// Register a listener for every subsequent update.
    ///
    /// The listener stays registered until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(&PositionRecord) -> Result<(), TrackerError> + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        debug!("Registered position listener {}", id);

        ListenerHandle {
            id,
            hub: Arc::downgrade(self),
        }
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
        debug!("Removed position listener {}", id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn get(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.positions.read().get(&mmsi.to_string()).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, PositionRecord> {
        self.positions.read().clone()
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    pub fn remove(&self, mmsi: &Mmsi) -> Option<PositionRecord> {
        self.positions.write().remove(&mmsi.to_string())
    }

    pub fn clear(&self) {
        self.positions.write().clear();
    }
}

/// Registration of a position listener
///
/// Dropping the handle removes the listener.
#[must_use = "dropping the handle removes the listener"]
pub struct ListenerHandle {
    id: ListenerId,
    hub: Weak<PositionHub>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Stop delivering updates to this listener
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_listener(self.id);
        }
    }
}
