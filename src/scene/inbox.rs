//! Hand-over of network events to the main thread.
//!
//! The network side holds an [`InboxSender`]; the engine drains the [`Inbox`]
//! once per frame with [`SceneController::pump`](super::SceneController::pump).

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::scene::SceneEvent;

/// Main-thread end of the network hand-off queue.
///
/// The network side decodes datagrams into [`SceneEvent`]s and pushes them
/// through an [`InboxSender`]; the engine's main loop drains the inbox once per
/// frame and feeds the events to the [`SceneController`], so entity state is
/// only ever touched from the main loop.
///
/// [`SceneController`]: crate::scene::SceneController
#[derive(Debug, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<SceneEvent>>>,
}

/// Network-thread end of an [`Inbox`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InboxSender {
    queue: Arc<Mutex<VecDeque<SceneEvent>>>,
}

impl Inbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender feeding this inbox.
    #[must_use]
    pub fn sender(&self) -> InboxSender {
        InboxSender {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Takes every queued event in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<SceneEvent> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl InboxSender {
    /// Queues one event.
    pub fn send(&self, event: SceneEvent) {
        self.queue.lock().push_back(event);
    }

    /// Queues events in order, under a single lock so they are never
    /// interleaved with another sender's batch.
    pub fn send_all(&self, events: impl IntoIterator<Item = SceneEvent>) {
        self.queue.lock().extend(events);
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn events_cross_threads_in_order() {
        let inbox = Inbox::new();
        let sender = inbox.sender();

        let handle = std::thread::spawn(move || {
            sender.send(SceneEvent::HostLeft);
            sender.send_all(vec![
                SceneEvent::EnterScene {
                    scene_host: true,
                    batch: Vec::new(),
                },
                SceneEvent::HostLeft,
            ]);
        });
        handle.join().unwrap();

        assert_eq!(inbox.len(), 3);
        let events = inbox.drain();
        assert_eq!(events[0], SceneEvent::HostLeft);
        assert!(matches!(
            events[1],
            SceneEvent::EnterScene {
                scene_host: true,
                ..
            }
        ));
        assert!(inbox.is_empty());
    }
}
