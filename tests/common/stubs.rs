//! Engine and transport stand-ins for integration tests.
//!
//! - [`FakeGraph`] records every call the crate makes into the engine and lets
//!   a test "enter" a node to fire the hooks installed there.
//! - [`LoopbackNet`] connects any number of [`LoopbackSocket`]s in memory, with
//!   deterministic drop and reorder controls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use scene_sync::entity::NodeHook;
use scene_sync::{BehaviorGraph, Message, NonBlockingSocket, Vec2};

/// One call made into a [`FakeGraph`].
#[derive(Debug, Clone, PartialEq)]
pub enum GraphCall {
    Driver(bool),
    Force(String),
    Execute(String, Vec<u8>),
    PlayClip(String),
    Active(bool),
    Position(Vec2),
    Scale(bool),
}

#[derive(Default)]
struct GraphState {
    calls: Vec<GraphCall>,
    hooks: BTreeMap<String, Vec<NodeHook>>,
}

/// A behavior graph that records what it is told to do.
pub struct FakeGraph {
    state: Arc<Mutex<GraphState>>,
}

/// Test-side view of a [`FakeGraph`] after it was handed to the crate.
#[derive(Clone)]
pub struct GraphProbe {
    state: Arc<Mutex<GraphState>>,
}

impl FakeGraph {
    /// Creates a graph and the probe that observes it.
    pub fn new() -> (Self, GraphProbe) {
        let state = Arc::new(Mutex::new(GraphState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            GraphProbe { state },
        )
    }

    /// Creates a boxed graph ready for registration.
    pub fn boxed() -> (Box<dyn BehaviorGraph>, GraphProbe) {
        let (graph, probe) = Self::new();
        (Box::new(graph), probe)
    }

    fn record(&self, call: GraphCall) {
        self.state.lock().calls.push(call);
    }
}

impl BehaviorGraph for FakeGraph {
    fn set_driver_enabled(&mut self, enabled: bool) {
        self.record(GraphCall::Driver(enabled));
    }

    fn force_node(&mut self, node: &str) {
        self.record(GraphCall::Force(node.to_owned()));
    }

    fn execute_actions(&mut self, node: &str, actions: &[u8]) {
        self.record(GraphCall::Execute(node.to_owned(), actions.to_vec()));
    }

    fn play_clip(&mut self, clip: &str) {
        self.record(GraphCall::PlayClip(clip.to_owned()));
    }

    fn set_active(&mut self, active: bool) {
        self.record(GraphCall::Active(active));
    }

    fn set_position(&mut self, position: Vec2) {
        self.record(GraphCall::Position(position));
    }

    fn set_scale(&mut self, flipped: bool) {
        self.record(GraphCall::Scale(flipped));
    }

    fn insert_hook(&mut self, node: &str, hook: NodeHook) {
        self.state
            .lock()
            .hooks
            .entry(node.to_owned())
            .or_default()
            .push(hook);
    }
}

impl GraphProbe {
    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<GraphCall> {
        self.state.lock().calls.clone()
    }

    /// Forgets the recorded calls; hooks stay installed.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// The most recent driver toggle.
    pub fn driver_enabled(&self) -> Option<bool> {
        self.last(|call| match call {
            GraphCall::Driver(enabled) => Some(*enabled),
            _ => None,
        })
    }

    /// The most recent visibility toggle.
    pub fn active(&self) -> Option<bool> {
        self.last(|call| match call {
            GraphCall::Active(active) => Some(*active),
            _ => None,
        })
    }

    /// Every node the graph was forced into, in order.
    pub fn forced_nodes(&self) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GraphCall::Force(node) => Some(node.clone()),
                _ => None,
            })
            .collect()
    }

    /// Nodes with at least one installed hook.
    pub fn hooked_nodes(&self) -> Vec<String> {
        self.state.lock().hooks.keys().cloned().collect()
    }

    /// Simulates the engine entering `node`: runs every hook installed there.
    /// Returns how many ran.
    pub fn enter(&self, node: &str) -> usize {
        // Taken out of the lock so a hook may touch the graph again.
        let mut hooks = self.state.lock().hooks.remove(node).unwrap_or_default();
        for hook in &mut hooks {
            hook();
        }
        let count = hooks.len();
        self.state
            .lock()
            .hooks
            .entry(node.to_owned())
            .or_default()
            .extend(hooks);
        count
    }

    fn last<T>(&self, pick: impl Fn(&GraphCall) -> Option<T>) -> Option<T> {
        self.state.lock().calls.iter().rev().find_map(pick)
    }
}

/// Address of a [`LoopbackSocket`].
pub type Addr = u16;

#[derive(Default)]
struct NetState {
    queues: BTreeMap<Addr, VecDeque<(Addr, Message)>>,
    drop_next: usize,
    sent: usize,
    dropped: usize,
}

/// An in-memory network shared by several sockets.
#[derive(Clone, Default)]
pub struct LoopbackNet {
    state: Arc<Mutex<NetState>>,
}

impl LoopbackNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A socket bound to `addr` on this network.
    pub fn socket(&self, addr: Addr) -> LoopbackSocket {
        self.state.lock().queues.entry(addr).or_default();
        LoopbackSocket {
            addr,
            net: self.clone(),
        }
    }

    /// Silently drops the next `count` datagrams sent by anyone.
    pub fn drop_next(&self, count: usize) {
        self.state.lock().drop_next = count;
    }

    /// Reverses the order of everything waiting for `addr`.
    pub fn reverse_pending(&self, addr: Addr) {
        if let Some(queue) = self.state.lock().queues.get_mut(&addr) {
            let reversed: VecDeque<_> = queue.drain(..).rev().collect();
            *queue = reversed;
        }
    }

    /// Takes everything waiting for `addr` without delivering it.
    pub fn intercept(&self, addr: Addr) -> Vec<(Addr, Message)> {
        self.state
            .lock()
            .queues
            .get_mut(&addr)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Puts a datagram into `to`'s queue as if `from` had sent it.
    pub fn inject(&self, from: Addr, to: Addr, message: Message) {
        self.state
            .lock()
            .queues
            .entry(to)
            .or_default()
            .push_back((from, message));
    }

    /// Datagrams waiting for `addr`.
    pub fn pending(&self, addr: Addr) -> usize {
        self.state.lock().queues.get(&addr).map_or(0, VecDeque::len)
    }

    /// Datagrams sent and dropped so far.
    pub fn counters(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.sent, state.dropped)
    }
}

/// A [`NonBlockingSocket`] over a [`LoopbackNet`].
pub struct LoopbackSocket {
    addr: Addr,
    net: LoopbackNet,
}

impl LoopbackSocket {
    pub fn addr(&self) -> Addr {
        self.addr
    }
}

impl NonBlockingSocket<Addr> for LoopbackSocket {
    fn send_to(&mut self, msg: &Message, addr: &Addr) {
        let mut state = self.net.state.lock();
        state.sent += 1;
        if state.drop_next > 0 {
            state.drop_next -= 1;
            state.dropped += 1;
            return;
        }
        state
            .queues
            .entry(*addr)
            .or_default()
            .push_back((self.addr, msg.clone()));
    }

    fn receive_all_messages(&mut self) -> Vec<(Addr, Message)> {
        self.net
            .state
            .lock()
            .queues
            .get_mut(&self.addr)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }
}
