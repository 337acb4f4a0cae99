//! Transport Session registry contract.
//!
//! The registry owns per-session template state. The parser plugin only
//! drives it through this trait; template bookkeeping itself lives in the
//! implementation.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dictionary::IeDictionary;
use crate::garbage::GarbageMessage;
use crate::message::IpfixMessage;
use crate::session::TransportSession;

/// Successful parse of an IPFIX Message.
#[derive(Debug)]
pub struct Parsed {
    /// The parsed message, to be forwarded.
    pub message: IpfixMessage,
    /// Templates replaced while parsing, to be forwarded right after.
    pub garbage: Option<GarbageMessage>,
}

/// Why the registry refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The session is blocked after an earlier fatal error.
    Denied,
    /// The message is malformed.
    Format,
    /// Template state could not be allocated.
    NoMemory,
    /// Any other internal fault.
    Internal,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Denied => "denied",
            Self::Format => "malformed message",
            Self::NoMemory => "out of memory",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Refused message, handed back so the caller can inspect its session.
#[derive(Debug)]
pub struct Rejected {
    /// Reason of the refusal.
    pub reason: RejectReason,
    /// The refused message.
    pub message: IpfixMessage,
}

/// Registry operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The session is not known.
    #[error("session not found")]
    NotFound,
    /// Template state could not be allocated.
    #[error("out of memory")]
    NoMemory,
    /// Any other internal fault.
    #[error("internal registry error: {0}")]
    Internal(String),
}

/// Per-session template bookkeeping driven by the parser plugin.
pub trait SessionRegistry: Send {
    /// Parses `msg` against the templates of its session.
    ///
    /// Creates the session on first traffic.
    fn process(&mut self, msg: IpfixMessage) -> Result<Parsed, Rejected>;

    /// Removes all state of `session`.
    ///
    /// Returns the released templates wrapped for deferred destruction.
    fn session_remove(
        &mut self,
        session: &TransportSession,
    ) -> Result<Option<GarbageMessage>, RegistryError>;

    /// Blocks `session`: its further messages are rejected as denied while
    /// the state is kept until the session is closed.
    fn session_block(&mut self, session: &TransportSession);

    /// Calls `f` once for every known session.
    fn session_for(&self, f: &mut dyn FnMut(&Arc<TransportSession>));

    /// Rebinds every session's templates to `dictionary`.
    ///
    /// All replaced templates are released through one garbage message.
    fn ie_source(
        &mut self,
        dictionary: Arc<IeDictionary>,
    ) -> Result<Option<GarbageMessage>, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(RejectReason::Denied.to_string(), "denied");
        assert_eq!(RejectReason::Format.to_string(), "malformed message");
    }

    #[test]
    fn test_registry_error_display() {
        assert_eq!(RegistryError::NotFound.to_string(), "session not found");
        assert_eq!(
            RegistryError::Internal("broken template".into()).to_string(),
            "internal registry error: broken template"
        );
    }
}
