//! Common pipeline abstractions for the IPFIX collector.
//!
//! This crate provides the types shared by every stage of the collector
//! pipeline:
//!
//! - [`Message`]: Tagged envelope for everything flowing between stages
//! - [`GarbageMessage`]: Deferred, ordered destruction of shared objects
//! - [`TransportSession`]: Identity of one exporter connection/association
//! - [`Plugin`]: Contract between the host runtime and a plugin instance
//! - [`SessionRegistry`]: Contract of the per-session template bookkeeping
//! - [`Stage`]: Single-stage host runtime driving one plugin on tokio channels
//!
//! # Architecture
//!
//! Stages are connected exclusively by FIFO channels:
//!
//! 1. An input stage produces IPFIX and Transport Session messages
//! 2. Each stage consumes its inbound channel one message at a time
//! 3. Outputs are passed, in order, onto the outbound channel
//! 4. Objects that may still be referenced by messages in flight are freed
//!    by a [`GarbageMessage`] travelling behind those messages
//!
//! Because every consumer finishes with a message before reading the next,
//! a garbage message is destroyed only after all earlier messages are done.
//!
//! # Example
//!
//! ```ignore
//! use ipxcol_core::{Message, MessageMask, Plugin, PluginContext, PluginResult};
//!
//! struct Passthrough;
//!
//! impl Plugin for Passthrough {
//!     type Update = ();
//!     fn name(&self) -> &str { "passthrough" }
//!     fn init(&mut self, ctx: &mut PluginContext, _params: &str) -> PluginResult<()> {
//!         ctx.subscribe(MessageMask::ALL)
//!     }
//!     fn process(&mut self, ctx: &mut PluginContext, msg: Message) -> PluginResult<()> {
//!         ctx.pass(msg);
//!         Ok(())
//!     }
//!     // ...
//! }
//! ```

pub mod config;
pub mod context;
pub mod dictionary;
pub mod error;
pub mod feedback;
pub mod garbage;
pub mod logging;
pub mod message;
pub mod plugin;
pub mod registry;
pub mod session;
pub mod stage;

pub use config::{CollectorConfig, StageConfig};
pub use context::PluginContext;
pub use dictionary::{ElementDef, ElementKey, IeDictionary};
pub use error::{ConfigError, ConfigResult, PluginError, PluginResult};
pub use feedback::{feedback_channel, ChannelFeedback, FeedbackError, FeedbackPipe};
pub use garbage::GarbageMessage;
pub use message::{
    IpfixMessage, Message, MessageContext, MessageMask, MessageType, RecordRef, SessionMessage,
};
pub use plugin::{Plugin, Prepared, UpdateMask};
pub use registry::{Parsed, RegistryError, RejectReason, Rejected, SessionRegistry};
pub use session::{SessionEndpoint, SessionEvent, SessionProto, TransportSession};
pub use stage::{Control, Stage, StageHandle, StageStats};
