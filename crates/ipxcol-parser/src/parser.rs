//! ParserPlugin implementation.

use std::fmt;
use std::sync::Arc;

use ipxcol_core::{
    GarbageMessage, IpfixMessage, Message, MessageMask, Parsed, Plugin, PluginContext, PluginError,
    PluginResult, Prepared, RegistryError, RejectReason, Rejected, SessionEvent, SessionMessage,
    SessionRegistry, TransportSession, UpdateMask,
};
use tracing::{debug, error, info, warn};

use crate::types::{CloseAllStatus, ParserStats, ParserUpdate};

/// Parser of IPFIX Messages and owner of the session registry.
pub struct ParserPlugin<R: SessionRegistry> {
    /// Template bookkeeping of every Transport Session.
    registry: R,
    /// Statistics.
    stats: ParserStats,
}

impl<R: SessionRegistry> fmt::Debug for ParserPlugin<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserPlugin")
            .field("stats", &self.stats)
            .finish()
    }
}

impl<R: SessionRegistry + 'static> ParserPlugin<R> {
    /// Creates a parser driving `registry`.
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            stats: ParserStats::default(),
        }
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    fn pass_garbage(&mut self, ctx: &mut PluginContext, garbage: Option<GarbageMessage>) {
        if let Some(garbage) = garbage {
            ctx.pass(garbage);
            self.stats.garbage_forwarded += 1;
        }
    }

    /// Stops a Transport Session the parser can no longer process.
    ///
    /// Without feedback the session is removed at once. With feedback it is
    /// blocked and the input stage is asked to close it; its state is
    /// released by the close event that follows. Only a failed close request
    /// is an error.
    fn remove_session(
        &mut self,
        ctx: &mut PluginContext,
        session: &Arc<TransportSession>,
    ) -> PluginResult<()> {
        let Some(feedback) = ctx.feedback().cloned() else {
            warn!(
                plugin = %ctx.name(),
                session = %session,
                "input does not support close requests, removing all session state"
            );
            match self.registry.session_remove(session) {
                Ok(garbage) => {
                    self.stats.sessions_removed += 1;
                    self.pass_garbage(ctx, garbage);
                }
                Err(e) => debug!(session = %session, error = %e, "hard remove found nothing"),
            }
            return Ok(());
        };

        self.registry.session_block(session);
        self.stats.sessions_blocked += 1;
        if let Err(e) = feedback.write(Arc::clone(session)) {
            error!(
                plugin = %ctx.name(),
                session = %session,
                error = %e,
                "failed to request session close, the parser can not continue"
            );
            return Err(PluginError::fatal(format!(
                "failed to request close of '{}': {}",
                session, e
            )));
        }
        self.stats.close_requests += 1;
        info!(plugin = %ctx.name(), session = %session, "session blocked, close requested");
        Ok(())
    }

    fn process_ipfix(&mut self, ctx: &mut PluginContext, msg: IpfixMessage) -> PluginResult<()> {
        let Rejected { reason, message } = match self.registry.process(msg) {
            Ok(Parsed { message, garbage }) => {
                // Garbage goes last: the message may reference its templates.
                ctx.pass(message);
                self.stats.ipfix_forwarded += 1;
                self.pass_garbage(ctx, garbage);
                return Ok(());
            }
            Err(rejected) => rejected,
        };

        let session = Arc::clone(message.session());
        drop(message);
        match reason {
            RejectReason::Denied => {
                self.stats.denied_dropped += 1;
                debug!(session = %session, "message of blocked session dropped");
                Ok(())
            }
            RejectReason::Format if !session.is_reliable() => {
                self.stats.format_dropped += 1;
                warn!(
                    plugin = %ctx.name(),
                    session = %session,
                    "malformed message dropped"
                );
                Ok(())
            }
            reason => {
                warn!(
                    plugin = %ctx.name(),
                    session = %session,
                    reason = %reason,
                    "unable to process message, stopping session"
                );
                self.remove_session(ctx, &session)
            }
        }
    }

    fn process_session(&mut self, ctx: &mut PluginContext, msg: SessionMessage) {
        if msg.event() == SessionEvent::Close {
            match self.registry.session_remove(msg.session()) {
                Ok(garbage) => {
                    self.stats.sessions_closed += 1;
                    debug!(session = %msg.session(), "session closed");
                    self.pass_garbage(ctx, garbage);
                }
                Err(RegistryError::NotFound) => {
                    self.stats.unknown_session_closes += 1;
                    warn!(
                        plugin = %ctx.name(),
                        session = %msg.session(),
                        "received a request to close unknown session"
                    );
                }
                Err(e) => {
                    error!(
                        plugin = %ctx.name(),
                        session = %msg.session(),
                        error = %e,
                        "session removal failed"
                    );
                }
            }
        }
        ctx.pass(msg);
    }

    fn close_all_sessions(&mut self, ctx: &mut PluginContext) -> PluginResult<()> {
        let mut sessions = Vec::new();
        self.registry
            .session_for(&mut |session| sessions.push(Arc::clone(session)));

        let mut status = CloseAllStatus::new();
        for session in &sessions {
            status.run(|| self.remove_session(ctx, session));
        }
        if status.is_failed() {
            error!(
                plugin = %ctx.name(),
                closed = status.closed(),
                skipped = status.skipped(),
                "failed to close all sessions"
            );
        } else {
            info!(plugin = %ctx.name(), closed = status.closed(), "all sessions closed");
        }
        status.into_result()
    }
}

impl<R: SessionRegistry + 'static> Plugin for ParserPlugin<R> {
    type Update = ParserUpdate;

    fn name(&self) -> &str {
        "parser"
    }

    fn init(&mut self, ctx: &mut PluginContext, params: &str) -> PluginResult<()> {
        if !params.trim().is_empty() {
            return Err(PluginError::invalid_argument(format!(
                "parser takes no parameters, got '{}'",
                params.trim()
            )));
        }
        // Templates are bound to the dictionary the host installed.
        let dictionary = Arc::clone(ctx.dictionary());
        let garbage = self.registry.ie_source(Arc::clone(&dictionary)).map_err(|e| {
            PluginError::no_memory(format!(
                "failed to bind registry to dictionary revision {}: {}",
                dictionary.revision(),
                e
            ))
        })?;
        self.pass_garbage(ctx, garbage);
        ctx.subscribe(MessageMask::IPFIX | MessageMask::SESSION)?;
        info!(
            plugin = %ctx.name(),
            revision = dictionary.revision(),
            "parser initialized"
        );
        Ok(())
    }

    fn process(&mut self, ctx: &mut PluginContext, msg: Message) -> PluginResult<()> {
        match msg {
            Message::Ipfix(ipfix) => self.process_ipfix(ctx, ipfix),
            Message::Session(session) => {
                self.process_session(ctx, session);
                Ok(())
            }
            other => {
                warn!(
                    plugin = %ctx.name(),
                    msg_type = %other.msg_type(),
                    "unexpected message type, passing it on"
                );
                ctx.pass(other);
                Ok(())
            }
        }
    }

    fn update_prepare(
        &self,
        ctx: &PluginContext,
        what: UpdateMask,
        _params: &str,
    ) -> PluginResult<Prepared<ParserUpdate>> {
        if !what.contains(UpdateMask::DICTIONARY) {
            return Ok(Prepared::NothingToDo);
        }
        // Templates are rebound at commit, messages keep using the old
        // dictionary until then.
        debug!(plugin = %ctx.name(), "dictionary update prepared");
        Ok(Prepared::Ready(ParserUpdate::new(
            what,
            ctx.dictionary().revision(),
        )))
    }

    fn update_commit(&mut self, ctx: &mut PluginContext, update: ParserUpdate) -> PluginResult<()> {
        let dictionary = Arc::clone(ctx.dictionary());
        match self.registry.ie_source(Arc::clone(&dictionary)) {
            Ok(garbage) => {
                self.stats.dictionary_updates += 1;
                info!(
                    plugin = %ctx.name(),
                    from = update.prepared_revision(),
                    to = dictionary.revision(),
                    "templates rebound to new dictionary"
                );
                self.pass_garbage(ctx, garbage);
                Ok(())
            }
            Err(e) => {
                self.stats.update_fallbacks += 1;
                warn!(
                    plugin = %ctx.name(),
                    error = %e,
                    "failed to rebind templates, closing all sessions"
                );
                self.close_all_sessions(ctx)
            }
        }
    }

    fn update_abort(&mut self, ctx: &mut PluginContext, _update: ParserUpdate) {
        debug!(plugin = %ctx.name(), "dictionary update aborted");
    }

    fn destroy(self, ctx: &mut PluginContext) {
        // Earlier messages may still reference templates of the registry.
        info!(plugin = %ctx.name(), stats = ?self.stats, "parser destroyed");
        ctx.pass(GarbageMessage::from_owned(self.registry));
    }
}
