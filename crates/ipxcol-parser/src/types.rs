//! Parser plugin types.

use ipxcol_core::{PluginError, PluginResult, UpdateMask};

/// Parser plugin statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// IPFIX Messages parsed and forwarded.
    pub ipfix_forwarded: u64,
    /// Garbage messages forwarded.
    pub garbage_forwarded: u64,
    /// Messages dropped because their session is blocked.
    pub denied_dropped: u64,
    /// Malformed messages dropped on unreliable transports.
    pub format_dropped: u64,
    /// Session close events that removed session state.
    pub sessions_closed: u64,
    /// Session close events for sessions that were never seen.
    pub unknown_session_closes: u64,
    /// Sessions removed without asking the input stage.
    pub sessions_removed: u64,
    /// Sessions blocked while a close request is outstanding.
    pub sessions_blocked: u64,
    /// Close requests written to the feedback channel.
    pub close_requests: u64,
    /// Successful dictionary rebinds.
    pub dictionary_updates: u64,
    /// Dictionary rebinds that fell back to closing every session.
    pub update_fallbacks: u64,
}

/// Pending update of the parser plugin.
///
/// Created by prepare, consumed by exactly one of commit or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserUpdate {
    what: UpdateMask,
    prepared_revision: u64,
}

impl ParserUpdate {
    /// Creates an update for the change set `what`.
    pub fn new(what: UpdateMask, prepared_revision: u64) -> Self {
        Self {
            what,
            prepared_revision,
        }
    }

    /// Returns the change set.
    pub fn what(&self) -> UpdateMask {
        self.what
    }

    /// Returns the dictionary revision in use when the update was prepared.
    pub fn prepared_revision(&self) -> u64 {
        self.prepared_revision
    }
}

/// Status shared by every closure while closing all sessions.
///
/// Once a closure fails the instance is lost, so later closures are
/// skipped.
#[derive(Debug, Default)]
pub struct CloseAllStatus {
    error: Option<PluginError>,
    closed: usize,
    skipped: usize,
}

impl CloseAllStatus {
    /// Creates a successful status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a closure has failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Runs `close` unless an earlier closure failed.
    pub fn run(&mut self, close: impl FnOnce() -> PluginResult<()>) {
        if self.error.is_some() {
            self.skipped += 1;
            return;
        }
        match close() {
            Ok(()) => self.closed += 1,
            Err(e) => self.error = Some(e),
        }
    }

    /// Returns the number of sessions closed.
    pub fn closed(&self) -> usize {
        self.closed
    }

    /// Returns the number of sessions skipped after a failure.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Converts into the commit result: `Denied` if any closure failed.
    pub fn into_result(self) -> PluginResult<()> {
        match self.error {
            None => Ok(()),
            Some(e) => Err(PluginError::denied(format!(
                "failed to close all sessions after dictionary update failure: {}",
                e
            ))),
        }
    }
}
