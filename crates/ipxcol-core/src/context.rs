//! Plugin context: the plugin's view of the host runtime.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::dictionary::IeDictionary;
use crate::error::{PluginError, PluginResult};
use crate::feedback::FeedbackPipe;
use crate::message::{Message, MessageMask, MessageType};

/// Per-instance context handed to every plugin callback.
///
/// Messages passed through [`PluginContext::pass`] are collected in an
/// ordered outbox; the host flushes the outbox onto the outbound channel in
/// exactly the order of the `pass` calls.
pub struct PluginContext {
    /// Instance name (for logging).
    name: String,
    /// Message types delivered to `Plugin::process`.
    subscription: MessageMask,
    /// Messages passed but not yet flushed.
    outbox: Vec<Message>,
    /// Close-request channel to the input stage, if it supports one.
    feedback: Option<Arc<dyn FeedbackPipe>>,
    /// Current information-element dictionary.
    dictionary: Arc<IeDictionary>,
}

impl PluginContext {
    /// Creates a context without a feedback channel.
    pub fn new(name: impl Into<String>, dictionary: Arc<IeDictionary>) -> Self {
        Self {
            name: name.into(),
            subscription: MessageMask::EMPTY,
            outbox: Vec::new(),
            feedback: None,
            dictionary,
        }
    }

    /// Attaches a feedback channel.
    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackPipe>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Returns the instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Selects which message types are delivered to the plugin.
    ///
    /// Other types are passed through by the host without calling the plugin.
    pub fn subscribe(&mut self, mask: MessageMask) -> PluginResult<()> {
        if mask.is_empty() {
            return Err(PluginError::invalid_argument(
                "subscription mask must select at least one message type",
            ));
        }
        self.subscription = mask;
        Ok(())
    }

    /// Returns the current subscription.
    pub fn subscription(&self) -> MessageMask {
        self.subscription
    }

    /// Returns true if messages of `msg_type` are delivered to the plugin.
    pub fn is_subscribed(&self, msg_type: MessageType) -> bool {
        self.subscription.contains(msg_type)
    }

    /// Passes a message to the next stage.
    pub fn pass(&mut self, msg: impl Into<Message>) {
        self.outbox.push(msg.into());
    }

    /// Returns the messages passed since the last call, in order.
    pub fn take_outbox(&mut self) -> Vec<Message> {
        mem::take(&mut self.outbox)
    }

    /// Returns the number of messages waiting in the outbox.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Returns the feedback channel, if the input stage supports one.
    pub fn feedback(&self) -> Option<&Arc<dyn FeedbackPipe>> {
        self.feedback.as_ref()
    }

    /// Returns the current information-element dictionary.
    pub fn dictionary(&self) -> &Arc<IeDictionary> {
        &self.dictionary
    }

    /// Installs a new dictionary. Called by the host at update commit.
    pub fn set_dictionary(&mut self, dictionary: Arc<IeDictionary>) {
        self.dictionary = dictionary;
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("subscription", &self.subscription)
            .field("outbox_len", &self.outbox.len())
            .field("feedback", &self.feedback.is_some())
            .field("dictionary_revision", &self.dictionary.revision())
            .finish()
    }
}
