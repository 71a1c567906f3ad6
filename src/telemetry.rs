//! Structured diagnostics for recoverable synchronization faults.
//!
//! Nothing in this crate is allowed to take a connection down because of a bad
//! packet or an entity that looks slightly wrong. Instead every degraded path
//! (a malformed message, an update for an entity that does not exist yet, an
//! animation index missing from a reconciliation table) is reported as a
//! [`SyncViolation`] to a [`ViolationObserver`]. By default violations are
//! logged through `tracing`; tests swap in a [`CollectingObserver`] to assert
//! on them.
//!
//! # Example
//!
//! ```
//! use scene_sync::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! let observer = Arc::new(CollectingObserver::new());
//! assert!(!observer.has_violation(ViolationKind::MissingEntity));
//! ```

use crate::entity::EntityKey;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serializes an optional entity key as `"Baldur#2"` or `null`.
mod entity_serializer {
    use crate::entity::EntityKey;
    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(key: &Option<EntityKey>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            None => serializer.serialize_none(),
            Some(key) => serializer.collect_str(key),
        }
    }
}

/// Severity of a synchronization violation.
///
/// Severities are ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Recoverable; the affected message or entity fell back to a safe default.
    Warning,
    /// Degraded behavior that will not self-correct until the next scene.
    Error,
    /// An invariant the caller must uphold was broken (e.g. dispatch during a
    /// host hand-off).
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of synchronization violations.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`; always include a wildcard arm when
/// matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// A packet or entity update could not be decoded.
    MalformedMessage,
    /// An update targeted an entity that is not registered in this scene.
    MissingEntity,
    /// An animation index has no entry in the entity's reconciliation or
    /// replay table.
    UnmappedAnimation,
    /// An entity was asked to act outside its authority (a client sending, a
    /// host receiving, a forbidden transition).
    Authority,
    /// Scene transition sequencing was violated, or an update arrived before
    /// the scene status was known.
    SceneTransition,
    /// An update was superseded by a newer one for the same slot.
    StaleUpdate,
    /// The entity profile catalog could not be loaded or is inconsistent.
    Catalog,
    /// Configuration constraint violated.
    Configuration,
    /// A datagram could not be sent or received, or a peer misbehaved at the
    /// transport level (wrong magic, unknown address).
    Transport,
    /// Internal logic error (should never happen).
    InternalError,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed_message",
            Self::MissingEntity => "missing_entity",
            Self::UnmappedAnimation => "unmapped_animation",
            Self::Authority => "authority",
            Self::SceneTransition => "scene_transition",
            Self::StaleUpdate => "stale_update",
            Self::Catalog => "catalog",
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded synchronization violation.
///
/// # Example
///
/// ```
/// use scene_sync::telemetry::{SyncViolation, ViolationSeverity, ViolationKind};
/// use scene_sync::{EntityKey, EntityType, InstanceId};
///
/// let violation = SyncViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::MissingEntity,
///     "no such entity",
///     "registry.rs:42",
/// )
/// .with_entity(EntityKey::new(EntityType::Baldur, InstanceId::new(2)))
/// .with_context("kinds", "animation");
///
/// let json = violation.to_json().unwrap();
/// assert!(json.contains(r#""kind":"missing_entity""#));
/// assert!(json.contains(r#""entity":"Baldur#2""#));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncViolation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The category of the violation.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The entity involved, if any.
    #[serde(serialize_with = "entity_serializer::serialize")]
    pub entity: Option<EntityKey>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl SyncViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            entity: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the entity this violation concerns.
    #[must_use]
    pub fn with_entity(mut self, key: EntityKey) -> Self {
        self.entity = Some(key);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    ///
    /// Returns `None` if serialization fails, which does not happen for
    /// well-formed violations.
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for SyncViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(entity) = self.entity {
            write!(f, ", entity={entity}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", {}", ContextDisplay(&self.context))?;
        }
        write!(f, ")")
    }
}

/// Trait for observing synchronization violations.
///
/// # Example
///
/// ```
/// use scene_sync::telemetry::{ViolationObserver, SyncViolation};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountingObserver(AtomicUsize);
///
/// impl ViolationObserver for CountingObserver {
///     fn on_violation(&self, _violation: &SyncViolation) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected. Runs on the caller's thread, so
    /// it should return quickly.
    fn on_violation(&self, violation: &SyncViolation);
}

#[cfg(not(feature = "sync-send"))]
/// Trait for observing synchronization violations.
pub trait ViolationObserver {
    /// Called when a violation is detected.
    fn on_violation(&self, violation: &SyncViolation);
}

/// Shared observer handle held by registries, controllers and protocols.
pub type ObserverHandle = Arc<dyn ViolationObserver>;

/// Default observer: logs warnings with `tracing::warn!` and everything more
/// severe with `tracing::error!`, with the entity and context as fields.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &SyncViolation) {
        let SyncViolation {
            severity,
            kind,
            message,
            location,
            entity,
            context,
        } = violation;
        let entity = entity.map_or_else(|| "-".to_owned(), |key| key.to_string());
        let context = ContextDisplay(context);
        if *severity == ViolationSeverity::Warning {
            tracing::warn!(
                kind = kind.as_str(),
                %entity,
                %context,
                location = *location,
                "{message}"
            );
        } else {
            tracing::error!(
                severity = severity.as_str(),
                kind = kind.as_str(),
                %entity,
                %context,
                location = *location,
                "{message}"
            );
        }
    }
}

/// Renders violation context as `key=value` pairs separated by spaces.
struct ContextDisplay<'a>(&'a BTreeMap<String, String>);

impl std::fmt::Display for ContextDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Observer that keeps every violation in memory, for tests and for hosts
/// that surface diagnostics in their own UI.
///
/// # Example
///
/// ```
/// use scene_sync::telemetry::{
///     CollectingObserver, SyncViolation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&SyncViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::MalformedMessage,
///     "truncated",
///     "test.rs:1",
/// ));
///
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::MalformedMessage));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<SyncViolation>>,
}

impl CollectingObserver {
    /// An observer that has seen nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Everything reported so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<SyncViolation> {
        self.violations.lock().clone()
    }

    /// Number of violations reported.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Whether nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Whether a violation of `kind` was reported.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Whether a violation of exactly `severity` was reported.
    #[must_use]
    pub fn has_severity(&self, severity: ViolationSeverity) -> bool {
        self.violations
            .lock()
            .iter()
            .any(|v| v.severity == severity)
    }

    /// The reported violations of `kind`.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<SyncViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns all violations concerning `key`.
    #[must_use]
    pub fn for_entity(&self, key: EntityKey) -> Vec<SyncViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.entity == Some(key))
            .cloned()
            .collect()
    }

    /// Forgets everything reported.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &SyncViolation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Reports a violation to an optional observer, falling back to
/// [`TracingObserver`] if `None`.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &SyncViolation,
) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Reports a violation through the default [`TracingObserver`].
///
/// # Syntax
///
/// ```text
/// report_violation!(severity, kind, "message");
/// report_violation!(severity, kind, "message with {}", format_args);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Reports a violation concerning one entity through an optional observer.
///
/// The observer expression must evaluate to an `Option<Arc<_>>`; `None` falls
/// back to the [`TracingObserver`].
///
/// # Syntax
///
/// ```text
/// report_violation_to!(observer, entity_key, severity, kind, "message");
/// report_violation_to!(observer, entity_key, severity, kind, "message with {}", args);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $entity:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        )
        .with_entity($entity);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $entity:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::SyncViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        )
        .with_entity($entity);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}
