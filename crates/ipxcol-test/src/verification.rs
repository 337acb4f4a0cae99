//! Verification helpers for testing pipeline stages
//!
//! Provides assertion helpers over the outbound message sequence and
//! destructor accounting for garbage messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ipxcol_core::{GarbageMessage, Message, MessageType, SessionEvent};
use thiserror::Error;
use tokio::sync::mpsc;

/// Verification error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Expected message sequence {expected:?}, got {actual:?}")]
    SequenceMismatch {
        expected: Vec<MessageType>,
        actual: Vec<MessageType>,
    },

    #[error("Expected {expected} {msg_type} messages, found {actual}")]
    CountMismatch {
        msg_type: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("No garbage message right after IPFIX message at position {ipfix}")]
    MissingGarbage { ipfix: usize },

    #[error("Expected {expected} destructor calls, observed {actual}")]
    DestructorMismatch { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Returns the type of every message, in order
pub fn kinds(messages: &[Message]) -> Vec<MessageType> {
    messages.iter().map(Message::msg_type).collect()
}

/// Receives everything until the channel closes
pub async fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Some(msg) = rx.recv().await {
        out.push(msg);
    }
    out
}

/// Receives exactly `count` messages, or fewer if `timeout` elapses first
pub async fn recv_n(
    rx: &mut mpsc::Receiver<Message>,
    count: usize,
    timeout: Duration,
) -> Vec<Message> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(msg)) => out.push(msg),
            Ok(None) | Err(_) => break,
        }
    }
    out
}

/// Outbound sequence verifier
pub struct OutputVerifier {
    messages: Vec<Message>,
}

impl OutputVerifier {
    /// Create a new verifier over the observed messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Observed messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Observed message types
    pub fn kinds(&self) -> Vec<MessageType> {
        kinds(&self.messages)
    }

    /// Verify the exact sequence of message types
    pub fn assert_kinds(&self, expected: &[MessageType]) -> VerifyResult<()> {
        let actual = self.kinds();
        if actual != expected {
            return Err(VerificationError::SequenceMismatch {
                expected: expected.to_vec(),
                actual,
            });
        }
        Ok(())
    }

    /// Verify the number of messages of one type
    pub fn assert_count(&self, msg_type: MessageType, expected: usize) -> VerifyResult<()> {
        let actual = self
            .messages
            .iter()
            .filter(|m| m.msg_type() == msg_type)
            .count();
        if actual != expected {
            return Err(VerificationError::CountMismatch {
                msg_type,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify that the IPFIX message at `ipfix` is directly followed by the
    /// garbage message produced while parsing it
    pub fn assert_garbage_follows(&self, ipfix: usize) -> VerifyResult<()> {
        let at = |pos: usize| self.messages.get(pos).map(Message::msg_type);
        if at(ipfix) == Some(MessageType::Ipfix) && at(ipfix + 1) == Some(MessageType::Garbage) {
            Ok(())
        } else {
            Err(VerificationError::MissingGarbage { ipfix })
        }
    }

    /// Positions of the session close messages
    pub fn close_positions(&self) -> Vec<usize> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.as_session()
                    .map(|s| s.event() == SessionEvent::Close)
                    .unwrap_or(false)
            })
            .map(|(pos, _)| pos)
            .collect()
    }

    /// Destroy every garbage message, as the last stage of a pipeline does
    pub fn destroy_garbage(self) -> usize {
        let mut destroyed = 0;
        for msg in self.messages {
            if let Message::Garbage(garbage) = msg {
                garbage.destroy();
                destroyed += 1;
            }
        }
        destroyed
    }
}

/// Counts garbage messages created through it and their destructor calls
#[derive(Debug, Clone, Default)]
pub struct DestructorCounter {
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
}

impl DestructorCounter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `object` in a garbage message whose destructor is counted
    pub fn wrap<T: Send + 'static>(&self, object: T) -> GarbageMessage {
        self.created.fetch_add(1, Ordering::SeqCst);
        let destroyed = Arc::clone(&self.destroyed);
        GarbageMessage::new(object, move |object| {
            drop(object);
            destroyed.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Number of garbage messages created
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of destructor calls
    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of garbage messages still alive (or leaked)
    pub fn pending(&self) -> usize {
        self.created() - self.destroyed()
    }

    /// Verify the number of destructor calls
    pub fn assert_destroyed(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.destroyed();
        if actual != expected {
            return Err(VerificationError::DestructorMismatch { expected, actual });
        }
        Ok(())
    }
}
