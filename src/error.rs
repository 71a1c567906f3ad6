//! Error types returned by the public API.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;
use crate::network::wire::WireError;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), SyncError>`].
///
/// Recoverable per-message faults (a malformed update, an update for an unknown
/// entity) are not errors at this level; they are reported as diagnostics through
/// [`crate::telemetry`] and the offending message is dropped.
///
/// [`Result<(), SyncError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// An entity update or batch could not be decoded from its packed form.
    Wire(WireError),
    /// The packet envelope could not be encoded or decoded.
    Codec(CodecError),
    /// A configuration value is outside its valid range.
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// Profile data could not be parsed or is internally inconsistent.
    Catalog {
        /// A description of what is wrong with the data.
        reason: String,
    },
    /// A network socket operation failed.
    Socket {
        /// A description of the socket error.
        context: String,
    },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Wire(err) => write!(f, "Malformed update: {}", err),
            SyncError::Codec(err) => write!(f, "Packet codec error: {}", err),
            SyncError::InvalidConfig { field, reason } => {
                write!(f, "Invalid configuration for `{}`: {}", field, reason)
            },
            SyncError::Catalog { reason } => write!(f, "Invalid entity catalog: {}", reason),
            SyncError::Socket { context } => write!(f, "Socket error: {}", context),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Wire(err) => Some(err),
            SyncError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WireError> for SyncError {
    fn from(err: WireError) -> Self {
        SyncError::Wire(err)
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        SyncError::Codec(err)
    }
}

/// Convenience alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;
