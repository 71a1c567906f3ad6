//! Shared queue of updates emitted by scene-host entities.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::network::wire::EntityUpdate;

/// Shared queue of updates emitted by authoritative entities.
///
/// Entities and the node hooks they install each hold a clone; the scene
/// controller drains it once per tick and hands the updates to the transport.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Arc<Mutex<VecDeque<EntityUpdate>>>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update.
    pub fn push(&self, update: EntityUpdate) {
        self.queue.lock().push_back(update);
    }

    /// Takes every queued update in emission order.
    #[must_use]
    pub fn drain(&self) -> Vec<EntityUpdate> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of queued updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Drops everything queued.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}
