//! Configuration for scene synchronization.
//!
//! | Field | Default | Purpose |
//! |-------|---------|---------|
//! | `entity_sync_enabled` | `true` | Whether entities are synchronized at all |
//! | `resend_interval` | 100 ms | Retransmission period for unacknowledged reliable updates |
//! | `keepalive_interval` | 1 s | Idle time after which a keep-alive is sent |
//! | `max_pending_reliable` | 1024 | Bound on reliable slots awaiting ack, per peer |
//! | `max_packet_updates` | 64 | Updates packed into one datagram |
//! | `magic` | `0x5C5E` | Session identifier stamped on every packet |
//! | `deactivate_unmatched` | `false` | Hide client entities the host does not know |
//!
//! # Example
//!
//! ```
//! use scene_sync::SyncConfig;
//! use web_time::Duration;
//!
//! let config = SyncConfig {
//!     resend_interval: Duration::from_millis(250),
//!     ..SyncConfig::lossy()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::{SyncError, SyncResult};

/// Serializes a [`Duration`] as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use web_time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Configuration for entity synchronization and its transport.
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always construct
/// it with the `..SyncConfig::default()` pattern.
///
/// # Example
///
/// Configuration can be loaded from JSON; missing fields take their defaults.
///
/// ```
/// use scene_sync::SyncConfig;
///
/// let config: SyncConfig =
///     serde_json::from_str(r#"{ "resend_interval": 50, "deactivate_unmatched": true }"#).unwrap();
/// assert_eq!(config.resend_interval.as_millis(), 50);
/// assert!(config.deactivate_unmatched);
/// assert!(config.entity_sync_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[must_use = "SyncConfig has no effect unless passed to a SceneController or SyncProtocol"]
pub struct SyncConfig {
    /// Whether entities are synchronized. Changing it at runtime takes effect at
    /// the next scene load.
    ///
    /// Default: `true`
    pub entity_sync_enabled: bool,

    /// Time between retransmissions of an unacknowledged reliable update.
    ///
    /// Default: 100ms
    #[serde(with = "duration_millis")]
    pub resend_interval: Duration,

    /// Time without outgoing traffic after which a keep-alive is sent to a peer.
    ///
    /// Default: 1s
    #[serde(with = "duration_millis")]
    pub keepalive_interval: Duration,

    /// Maximum number of reliable slots awaiting acknowledgement per peer.
    /// When exceeded, the oldest slot is dropped.
    ///
    /// Default: 1024
    pub max_pending_reliable: usize,

    /// Maximum number of updates packed into one datagram.
    ///
    /// Default: 64
    pub max_packet_updates: usize,

    /// Session identifier; packets carrying another value are dropped.
    ///
    /// Default: `0x5C5E`
    pub magic: u16,

    /// Whether a client deactivates entities that have no counterpart in the
    /// host's scene-entry batch.
    ///
    /// Default: `false`
    pub deactivate_unmatched: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            entity_sync_enabled: true,
            resend_interval: Duration::from_millis(100),
            keepalive_interval: Duration::from_secs(1),
            max_pending_reliable: 1024,
            max_packet_updates: 64,
            magic: 0x5C5E,
            deactivate_unmatched: false,
        }
    }
}

impl SyncConfig {
    /// Creates a new `SyncConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for local networks: fast retransmission, larger packets.
    pub fn lan() -> Self {
        Self {
            resend_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_millis(500),
            max_packet_updates: 128,
            ..Self::default()
        }
    }

    /// Preset for lossy links: slower retransmission so resends do not add to
    /// congestion, smaller packets so one loss costs less.
    pub fn lossy() -> Self {
        Self {
            resend_interval: Duration::from_millis(200),
            keepalive_interval: Duration::from_millis(500),
            max_packet_updates: 32,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first field that is out
    /// of range.
    pub fn validate(&self) -> SyncResult<()> {
        if self.resend_interval.is_zero() {
            return Err(invalid("resend_interval", "must be greater than zero"));
        }
        if self.keepalive_interval.is_zero() {
            return Err(invalid("keepalive_interval", "must be greater than zero"));
        }
        if self.max_pending_reliable == 0 {
            return Err(invalid("max_pending_reliable", "must be at least 1"));
        }
        if self.max_packet_updates == 0 {
            return Err(invalid("max_packet_updates", "must be at least 1"));
        }
        if self.magic == 0 {
            return Err(invalid("magic", "must be nonzero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> SyncError {
    SyncError::InvalidConfig {
        field,
        reason: reason.to_owned(),
    }
}
