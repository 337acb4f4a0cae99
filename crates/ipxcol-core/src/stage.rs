//! Single-stage host runtime.
//!
//! A [`Stage`] drives one plugin instance: it reads the inbound channel one
//! message at a time, hands subscribed messages to the plugin, and flushes
//! everything the plugin passed onto the outbound channel in order before
//! reading the next message. Update requests arrive on a separate control
//! channel and are served between messages.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StageConfig;
use crate::context::PluginContext;
use crate::dictionary::IeDictionary;
use crate::error::{PluginError, PluginResult};
use crate::message::Message;
use crate::plugin::{Plugin, Prepared, UpdateMask};

/// Update request served between two messages.
#[derive(Debug)]
pub enum Control {
    /// First phase of an update; the reply is `true` if the plugin is ready.
    Prepare {
        /// What changed.
        what: UpdateMask,
        /// New plugin parameters.
        params: String,
        /// Reply channel.
        reply: oneshot::Sender<PluginResult<bool>>,
    },
    /// Second phase: install the dictionary and commit the pending update.
    Commit {
        /// New dictionary, if it changed.
        dictionary: Option<Arc<IeDictionary>>,
        /// Reply channel.
        reply: oneshot::Sender<PluginResult<()>>,
    },
    /// Drop the pending update.
    Abort {
        /// Reply channel.
        reply: oneshot::Sender<()>,
    },
}

/// Stage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Messages read from the inbound channel.
    pub received: u64,
    /// Messages handed to the plugin.
    pub processed: u64,
    /// Unsubscribed messages forwarded without calling the plugin.
    pub passed_through: u64,
    /// Messages written to the outbound channel.
    pub forwarded: u64,
    /// Garbage messages leaked because the outbound channel was closed.
    pub garbage_leaked: u64,
}

fn destroyed() -> PluginError {
    PluginError::fatal("plugin instance already destroyed")
}

/// Host of one plugin instance.
pub struct Stage<P: Plugin> {
    /// `None` once destroyed.
    plugin: Option<P>,
    ctx: PluginContext,
    pending: Option<P::Update>,
    output: mpsc::Sender<Message>,
    stats: StageStats,
}

impl<P: Plugin> Stage<P> {
    /// Creates a stage writing to `output`.
    pub fn new(plugin: P, ctx: PluginContext, output: mpsc::Sender<Message>) -> Self {
        Self {
            plugin: Some(plugin),
            ctx,
            pending: None,
            output,
            stats: StageStats::default(),
        }
    }

    /// Returns the plugin context.
    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Returns the plugin, `None` once destroyed.
    pub fn plugin(&self) -> Option<&P> {
        self.plugin.as_ref()
    }

    /// Returns the stage counters.
    pub fn stats(&self) -> StageStats {
        self.stats
    }

    /// Returns true if an update is prepared and not yet committed or aborted.
    pub fn has_pending_update(&self) -> bool {
        self.pending.is_some()
    }

    /// Initializes the plugin with `params`.
    pub fn init(&mut self, params: &str) -> PluginResult<()> {
        let plugin = self.plugin.as_mut().ok_or_else(destroyed)?;
        plugin.init(&mut self.ctx, params)?;
        info!(
            stage = %self.ctx.name(),
            plugin = plugin.name(),
            subscription = ?self.ctx.subscription(),
            "plugin initialized"
        );
        Ok(())
    }

    /// Handles one inbound message. Outputs stay in the outbox until flushed.
    pub fn handle_message(&mut self, msg: Message) -> PluginResult<()> {
        self.stats.received += 1;
        if !self.ctx.is_subscribed(msg.msg_type()) {
            self.stats.passed_through += 1;
            self.ctx.pass(msg);
            return Ok(());
        }

        self.stats.processed += 1;
        let plugin = self.plugin.as_mut().ok_or_else(destroyed)?;
        plugin.process(&mut self.ctx, msg)
    }

    /// First phase of an update. Returns true if the plugin has work to do.
    ///
    /// An update still pending from an earlier prepare is aborted first.
    pub fn prepare_update(&mut self, what: UpdateMask, params: &str) -> PluginResult<bool> {
        if self.pending.is_some() {
            warn!(stage = %self.ctx.name(), "new update prepared, aborting the pending one");
            self.abort_update();
        }

        let plugin = self.plugin.as_ref().ok_or_else(destroyed)?;
        match plugin.update_prepare(&self.ctx, what, params)? {
            Prepared::NothingToDo => {
                debug!(stage = %self.ctx.name(), ?what, "update does not concern the plugin");
                Ok(false)
            }
            Prepared::Ready(update) => {
                debug!(stage = %self.ctx.name(), ?what, "update prepared");
                self.pending = Some(update);
                Ok(true)
            }
        }
    }

    /// Second phase of an update.
    ///
    /// Installs `dictionary` into the context, then commits the pending
    /// update. With nothing pending the dictionary is ignored, so the
    /// context never holds one the plugin has not bound to.
    pub fn commit_update(&mut self, dictionary: Option<Arc<IeDictionary>>) -> PluginResult<()> {
        let Some(update) = self.pending.take() else {
            if let Some(dictionary) = dictionary {
                warn!(
                    stage = %self.ctx.name(),
                    current = self.ctx.dictionary().revision(),
                    offered = dictionary.revision(),
                    "no update pending, dictionary not installed"
                );
            }
            return Ok(());
        };

        if let Some(dictionary) = dictionary {
            info!(
                stage = %self.ctx.name(),
                revision = dictionary.revision(),
                "installing information-element dictionary"
            );
            self.ctx.set_dictionary(dictionary);
        }
        let plugin = self.plugin.as_mut().ok_or_else(destroyed)?;
        plugin.update_commit(&mut self.ctx, update)
    }

    /// Drops the pending update, if any.
    pub fn abort_update(&mut self) {
        if let Some(update) = self.pending.take() {
            if let Some(plugin) = self.plugin.as_mut() {
                plugin.update_abort(&mut self.ctx, update);
            }
        }
    }

    fn handle_control(&mut self, control: Control) -> PluginResult<()> {
        match control {
            Control::Prepare {
                what,
                params,
                reply,
            } => {
                let result = self.prepare_update(what, &params);
                let _ = reply.send(result);
                Ok(())
            }
            Control::Commit { dictionary, reply } => {
                let result = self.commit_update(dictionary);
                let _ = reply.send(result.clone());
                result
            }
            Control::Abort { reply } => {
                self.abort_update();
                let _ = reply.send(());
                Ok(())
            }
        }
    }

    /// Writes the outbox to the outbound channel, in order.
    ///
    /// With the channel closed, garbage is leaked: its object may still be
    /// referenced by messages that were already forwarded.
    pub async fn flush(&mut self) {
        for msg in self.ctx.take_outbox() {
            match self.output.send(msg).await {
                Ok(()) => self.stats.forwarded += 1,
                Err(mpsc::error::SendError(Message::Garbage(garbage))) => {
                    warn!(
                        stage = %self.ctx.name(),
                        object = garbage.type_name(),
                        "outbound channel closed, leaking garbage"
                    );
                    garbage.leak();
                    self.stats.garbage_leaked += 1;
                }
                Err(mpsc::error::SendError(msg)) => {
                    debug!(
                        stage = %self.ctx.name(),
                        msg_type = %msg.msg_type(),
                        "outbound channel closed, dropping message"
                    );
                }
            }
        }
    }

    /// Destroys the plugin and flushes its final messages.
    pub async fn shutdown(&mut self) {
        self.abort_update();
        if let Some(plugin) = self.plugin.take() {
            info!(stage = %self.ctx.name(), plugin = plugin.name(), "destroying plugin");
            plugin.destroy(&mut self.ctx);
        }
        self.flush().await;
    }

    /// Runs the stage until the inbound channel closes or the plugin fails.
    ///
    /// A plugin error is instance-fatal: the plugin is destroyed and the
    /// error returned.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<Message>,
        mut control: mpsc::Receiver<Control>,
    ) -> PluginResult<StageStats> {
        info!(stage = %self.ctx.name(), "stage started");
        self.flush().await;

        let mut control_open = true;
        let result = loop {
            tokio::select! {
                biased;

                ctrl = control.recv(), if control_open => {
                    match ctrl {
                        Some(ctrl) => {
                            if let Err(e) = self.handle_control(ctrl) {
                                break Err(e);
                            }
                        }
                        None => control_open = false,
                    }
                }
                msg = input.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.handle_message(msg) {
                                break Err(e);
                            }
                        }
                        None => break Ok(()),
                    }
                }
            }
            self.flush().await;
        };

        if let Err(e) = &result {
            error!(stage = %self.ctx.name(), error = %e, "plugin failed, stopping stage");
        }
        self.shutdown().await;
        info!(stage = %self.ctx.name(), stats = ?self.stats, "stage stopped");
        result.map(|()| self.stats)
    }

    /// Spawns the stage on the tokio runtime.
    pub fn spawn(self, config: &StageConfig) -> StageHandle
    where
        P: 'static,
        P::Update: 'static,
    {
        let (input_tx, input_rx) = mpsc::channel(config.queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(config.control_capacity);
        let task = tokio::spawn(self.run(input_rx, control_rx));
        StageHandle {
            input: input_tx,
            control: control_tx,
            task,
        }
    }
}

impl<P: Plugin> Drop for Stage<P> {
    fn drop(&mut self) {
        // Dropped without shutdown: the plugin is destroyed and its final
        // garbage leaked, since the outbox can not be flushed from here.
        if let Some(update) = self.pending.take() {
            if let Some(plugin) = self.plugin.as_mut() {
                plugin.update_abort(&mut self.ctx, update);
            }
        }
        if let Some(plugin) = self.plugin.take() {
            plugin.destroy(&mut self.ctx);
        }
        for msg in self.ctx.take_outbox() {
            if let Message::Garbage(garbage) = msg {
                garbage.leak();
            }
        }
    }
}

/// Handle to a spawned [`Stage`].
#[derive(Debug)]
pub struct StageHandle {
    input: mpsc::Sender<Message>,
    control: mpsc::Sender<Control>,
    task: JoinHandle<PluginResult<StageStats>>,
}

fn stage_stopped() -> PluginError {
    PluginError::fatal("stage is no longer running")
}

impl StageHandle {
    /// Returns the inbound channel; clone it to feed the stage.
    pub fn input(&self) -> &mpsc::Sender<Message> {
        &self.input
    }

    /// Sends one message to the stage.
    pub async fn send(&self, msg: impl Into<Message>) -> PluginResult<()> {
        self.input
            .send(msg.into())
            .await
            .map_err(|_| stage_stopped())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Control,
    ) -> PluginResult<T> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(make(reply))
            .await
            .map_err(|_| stage_stopped())?;
        rx.await.map_err(|_| stage_stopped())
    }

    /// Prepares an update. Returns true if the plugin is ready to commit.
    pub async fn prepare(&self, what: UpdateMask, params: impl Into<String>) -> PluginResult<bool> {
        let params = params.into();
        self.request(|reply| Control::Prepare {
            what,
            params,
            reply,
        })
        .await?
    }

    /// Commits the prepared update, installing `dictionary` first.
    pub async fn commit(&self, dictionary: Option<Arc<IeDictionary>>) -> PluginResult<()> {
        self.request(|reply| Control::Commit { dictionary, reply })
            .await?
    }

    /// Aborts the prepared update.
    pub async fn abort(&self) -> PluginResult<()> {
        self.request(|reply| Control::Abort { reply }).await
    }

    /// Closes the inbound channel and waits for the stage to stop.
    ///
    /// Clones of [`StageHandle::input`] must be dropped first.
    pub async fn shutdown(self) -> PluginResult<StageStats> {
        let StageHandle {
            input,
            control,
            task,
        } = self;
        drop(input);
        drop(control);
        task.await
            .map_err(|e| PluginError::fatal(format!("stage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::garbage::GarbageMessage;
    use crate::message::{IpfixMessage, MessageContext, MessageMask, MessageType, SessionMessage};
    use crate::session::TransportSession;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Forwards IPFIX messages, each followed by a garbage message; fails on
    /// messages whose first byte is 0xff.
    struct Tagger {
        committed_revision: Arc<AtomicU64>,
        destroyed: Arc<AtomicUsize>,
    }

    impl Plugin for Tagger {
        type Update = u64;

        fn name(&self) -> &str {
            "tagger"
        }

        fn init(&mut self, ctx: &mut PluginContext, _params: &str) -> PluginResult<()> {
            ctx.subscribe(MessageMask::IPFIX)
        }

        fn process(&mut self, ctx: &mut PluginContext, msg: Message) -> PluginResult<()> {
            if let Some(ipfix) = msg.as_ipfix() {
                if ipfix.raw().first() == Some(&0xff) {
                    return Err(PluginError::fatal("poisoned message"));
                }
            }
            ctx.pass(msg);
            ctx.pass(GarbageMessage::from_owned(vec![0u8; 4]));
            Ok(())
        }

        fn update_prepare(
            &self,
            ctx: &PluginContext,
            what: UpdateMask,
            _params: &str,
        ) -> PluginResult<Prepared<u64>> {
            if what.contains(UpdateMask::DICTIONARY) {
                Ok(Prepared::Ready(ctx.dictionary().revision()))
            } else {
                Ok(Prepared::NothingToDo)
            }
        }

        fn update_commit(&mut self, ctx: &mut PluginContext, _old: u64) -> PluginResult<()> {
            self.committed_revision
                .store(ctx.dictionary().revision(), Ordering::SeqCst);
            Ok(())
        }

        fn destroy(self, ctx: &mut PluginContext) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            ctx.pass(GarbageMessage::from_owned(String::from("state")));
        }
    }

    fn tagger() -> (Tagger, Arc<AtomicU64>, Arc<AtomicUsize>) {
        let revision = Arc::new(AtomicU64::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let plugin = Tagger {
            committed_revision: Arc::clone(&revision),
            destroyed: Arc::clone(&destroyed),
        };
        (plugin, revision, destroyed)
    }

    fn ipfix(first: u8) -> Message {
        let ts = Arc::new(TransportSession::file("flows.ipfix"));
        IpfixMessage::new(MessageContext::new(ts, 1), vec![first]).into()
    }

    fn stage(plugin: Tagger, output: mpsc::Sender<Message>) -> Stage<Tagger> {
        let ctx = PluginContext::new("test", Arc::new(IeDictionary::new(1)));
        let mut stage = Stage::new(plugin, ctx, output);
        stage.init("").unwrap();
        stage
    }

    async fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<MessageType> {
        let mut types = Vec::new();
        while let Some(msg) = rx.recv().await {
            types.push(msg.msg_type());
        }
        types
    }

    #[tokio::test]
    async fn test_order_and_passthrough() {
        let (plugin, _, destroyed) = tagger();
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = stage(plugin, out_tx).spawn(&StageConfig::default());

        handle.send(ipfix(1)).await.unwrap();
        let ts = Arc::new(TransportSession::file("flows.ipfix"));
        handle.send(SessionMessage::close(ts)).await.unwrap();

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(
            drain(&mut out_rx).await,
            vec![
                MessageType::Ipfix,
                MessageType::Garbage,
                MessageType::Session,
                MessageType::Garbage,
            ]
        );
        assert_eq!(stats.received, 2);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.passed_through, 1);
        assert_eq!(stats.forwarded, 4);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_phase_update() {
        let (plugin, revision, _) = tagger();
        let (out_tx, _out_rx) = mpsc::channel(16);
        let handle = stage(plugin, out_tx).spawn(&StageConfig::default());

        assert!(!handle.prepare(UpdateMask::PARAMS, "").await.unwrap());
        assert!(handle.prepare(UpdateMask::DICTIONARY, "").await.unwrap());
        handle.send(ipfix(1)).await.unwrap();
        assert_eq!(revision.load(Ordering::SeqCst), 0);

        handle
            .commit(Some(Arc::new(IeDictionary::new(7))))
            .await
            .unwrap();
        assert_eq!(revision.load(Ordering::SeqCst), 7);

        // Nothing pending any more: the dictionary is not installed.
        handle
            .commit(Some(Arc::new(IeDictionary::new(8))))
            .await
            .unwrap();
        assert_eq!(revision.load(Ordering::SeqCst), 7);
        handle.abort().await.unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_plugin_error_stops_stage() {
        let (plugin, _, destroyed) = tagger();
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = stage(plugin, out_tx).spawn(&StageConfig::default());

        handle.send(ipfix(1)).await.unwrap();
        handle.send(ipfix(0xff)).await.unwrap();

        let err = handle.shutdown().await.unwrap_err();
        assert_eq!(err, PluginError::fatal("poisoned message"));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(
            drain(&mut out_rx).await,
            vec![MessageType::Ipfix, MessageType::Garbage, MessageType::Garbage]
        );
    }

    #[tokio::test]
    async fn test_closed_output_leaks_garbage() {
        let (plugin, _, _) = tagger();
        let (out_tx, out_rx) = mpsc::channel(16);
        drop(out_rx);
        let mut stage = stage(plugin, out_tx);

        stage.handle_message(ipfix(1)).unwrap();
        stage.flush().await;
        let stats = stage.stats();
        assert_eq!(stats.forwarded, 0);
        assert_eq!(stats.garbage_leaked, 1);
    }

    #[tokio::test]
    async fn test_commit_without_pending_update_keeps_dictionary() {
        let (plugin, revision, _) = tagger();
        let (out_tx, _out_rx) = mpsc::channel(16);
        let mut stage = stage(plugin, out_tx);

        assert!(!stage.prepare_update(UpdateMask::PARAMS, "").unwrap());
        stage
            .commit_update(Some(Arc::new(IeDictionary::new(8))))
            .unwrap();
        assert_eq!(stage.context().dictionary().revision(), 1);
        assert_eq!(revision.load(Ordering::SeqCst), 0);

        assert!(stage.prepare_update(UpdateMask::DICTIONARY, "").unwrap());
        stage
            .commit_update(Some(Arc::new(IeDictionary::new(8))))
            .unwrap();
        assert_eq!(stage.context().dictionary().revision(), 8);
        assert_eq!(revision.load(Ordering::SeqCst), 8);
        stage.shutdown().await;
    }

    #[tokio::test]
    async fn test_prepare_replaces_pending_update() {
        let (plugin, _, _) = tagger();
        let (out_tx, _out_rx) = mpsc::channel(16);
        let mut stage = stage(plugin, out_tx);

        assert!(stage.prepare_update(UpdateMask::DICTIONARY, "").unwrap());
        assert!(stage.prepare_update(UpdateMask::DICTIONARY, "").unwrap());
        assert!(stage.has_pending_update());
        stage.abort_update();
        assert!(!stage.has_pending_update());
        stage.shutdown().await;
        assert!(stage.plugin().is_none());
    }
}
