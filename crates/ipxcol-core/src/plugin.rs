//! Plugin contract between the host runtime and a processing stage.

use std::ops::BitOr;

use crate::context::PluginContext;
use crate::error::PluginResult;
use crate::message::Message;

/// What changed in a configuration update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UpdateMask(u16);

impl UpdateMask {
    /// Nothing changed.
    pub const EMPTY: Self = Self(0);
    /// The information-element dictionary was reloaded.
    pub const DICTIONARY: Self = Self(1 << 0);
    /// The plugin parameters changed.
    pub const PARAMS: Self = Self(1 << 1);

    /// Returns true if every flag of `other` is set.
    pub fn contains(&self, other: UpdateMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for UpdateMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Answer of [`Plugin::update_prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared<U> {
    /// The update does not concern this plugin.
    NothingToDo,
    /// The plugin is ready; `U` is handed back at commit or abort.
    Ready(U),
}

impl<U> Prepared<U> {
    /// Returns true for [`Prepared::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, Prepared::Ready(_))
    }
}

/// Base trait of every processing plugin.
///
/// # Lifecycle
///
/// 1. `init()`: subscribe to message types, validate parameters
/// 2. `process()`: called once per subscribed message, strictly in order
/// 3. `update_prepare()` / `update_commit()` / `update_abort()`: two-phase
///    reconfiguration; ordinary messages keep flowing between prepare and
///    commit
/// 4. `destroy()`: release everything, deferring frees through garbage
///    messages where earlier messages may still hold references
///
/// All callbacks of one instance run on a single logical thread.
pub trait Plugin: Send {
    /// Pending update transaction created by `update_prepare`.
    type Update: Send;

    /// Returns the plugin name (for logging).
    fn name(&self) -> &str;

    /// Initializes the instance.
    fn init(&mut self, ctx: &mut PluginContext, params: &str) -> PluginResult<()>;

    /// Processes one message; results are passed through `ctx`.
    ///
    /// `Err` means the instance can no longer run safely.
    fn process(&mut self, ctx: &mut PluginContext, msg: Message) -> PluginResult<()>;

    /// Decides whether a configuration change concerns this instance.
    ///
    /// Must not change any observable state.
    fn update_prepare(
        &self,
        _ctx: &PluginContext,
        _what: UpdateMask,
        _params: &str,
    ) -> PluginResult<Prepared<Self::Update>> {
        Ok(Prepared::NothingToDo)
    }

    /// Applies a prepared update. The context already holds the new
    /// dictionary.
    fn update_commit(&mut self, ctx: &mut PluginContext, update: Self::Update) -> PluginResult<()>;

    /// Drops a prepared update.
    fn update_abort(&mut self, _ctx: &mut PluginContext, _update: Self::Update) {}

    /// Destroys the instance.
    fn destroy(self, ctx: &mut PluginContext)
    where
        Self: Sized;
}
