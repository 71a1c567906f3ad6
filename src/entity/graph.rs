//! The narrow interface to the engine's behavior graph.
//!
//! The crate never sees the engine's object model. Each networked entity is
//! handed a [`BehaviorGraph`] at registration, and everything it does to the
//! engine (enabling the driver, forcing a node, replaying a node's actions,
//! moving the visual) goes through it.

use crate::network::wire::Vec2;

/// Callback inserted at a behavior-graph node; the engine invokes it each time
/// the graph enters that node.
#[cfg(feature = "sync-send")]
pub type NodeHook = Box<dyn FnMut() + Send>;

/// Callback inserted at a behavior-graph node; the engine invokes it each time
/// the graph enters that node.
#[cfg(not(feature = "sync-send"))]
pub type NodeHook = Box<dyn FnMut()>;

/// Engine-side handle to one entity's behavior graph and visual.
///
/// Node and clip names are opaque strings taken from the entity profile. An
/// adapter should treat an unknown name as a no-op rather than panicking.
#[cfg(feature = "sync-send")]
pub trait BehaviorGraph: Send {
    /// Enables or disables autonomous graph evaluation (the "driver").
    fn set_driver_enabled(&mut self, enabled: bool);
    /// Jumps directly to `node`, skipping the nodes that would lead there.
    fn force_node(&mut self, node: &str);
    /// Runs the listed actions of `node` without evaluating the graph.
    fn execute_actions(&mut self, node: &str, actions: &[u8]);
    /// Starts an animator clip that the graph does not own.
    fn play_clip(&mut self, clip: &str);
    /// Shows or hides the visual representation.
    fn set_active(&mut self, active: bool);
    /// Moves the visual representation.
    fn set_position(&mut self, position: Vec2);
    /// Flips the visual representation horizontally.
    fn set_scale(&mut self, flipped: bool);
    /// Registers `hook` to run whenever the graph enters `node`.
    fn insert_hook(&mut self, node: &str, hook: NodeHook);
}

/// Engine-side handle to one entity's behavior graph and visual.
///
/// Node and clip names are opaque strings taken from the entity profile. An
/// adapter should treat an unknown name as a no-op rather than panicking.
#[cfg(not(feature = "sync-send"))]
pub trait BehaviorGraph {
    /// Enables or disables autonomous graph evaluation (the "driver").
    fn set_driver_enabled(&mut self, enabled: bool);
    /// Jumps directly to `node`, skipping the nodes that would lead there.
    fn force_node(&mut self, node: &str);
    /// Runs the listed actions of `node` without evaluating the graph.
    fn execute_actions(&mut self, node: &str, actions: &[u8]);
    /// Starts an animator clip that the graph does not own.
    fn play_clip(&mut self, clip: &str);
    /// Shows or hides the visual representation.
    fn set_active(&mut self, active: bool);
    /// Moves the visual representation.
    fn set_position(&mut self, position: Vec2);
    /// Flips the visual representation horizontally.
    fn set_scale(&mut self, flipped: bool);
    /// Registers `hook` to run whenever the graph enters `node`.
    fn insert_hook(&mut self, node: &str, hook: NodeHook);
}
