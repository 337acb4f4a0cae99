//! Tagged message envelope.
//!
//! Every object travelling between stages is a [`Message`]. Generic
//! pipeline code dispatches on [`Message::msg_type`] and never needs to
//! know the payload shape.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::garbage::GarbageMessage;
use crate::session::{SessionEvent, TransportSession};

/// Discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// IPFIX Message from an exporter.
    Ipfix,
    /// Transport Session lifecycle event.
    Session,
    /// Deferred destruction request.
    Garbage,
}

impl MessageType {
    /// Returns the subscription bit of this type.
    pub fn bit(&self) -> u16 {
        match self {
            Self::Ipfix => 1 << 0,
            Self::Session => 1 << 1,
            Self::Garbage => 1 << 2,
        }
    }

    /// Returns the type name (for logging).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ipfix => "ipfix",
            Self::Session => "session",
            Self::Garbage => "garbage",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of message types a plugin wants to receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageMask(u16);

impl MessageMask {
    /// No message types.
    pub const EMPTY: Self = Self(0);
    /// IPFIX Messages.
    pub const IPFIX: Self = Self(1 << 0);
    /// Transport Session events.
    pub const SESSION: Self = Self(1 << 1);
    /// Garbage messages.
    pub const GARBAGE: Self = Self(1 << 2);
    /// Every message type.
    pub const ALL: Self = Self(0b111);

    /// Returns true if `msg_type` is in the set.
    pub fn contains(&self, msg_type: MessageType) -> bool {
        self.0 & msg_type.bit() != 0
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MessageMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<MessageType> for MessageMask {
    fn from(msg_type: MessageType) -> Self {
        Self(msg_type.bit())
    }
}

/// Origin of an IPFIX Message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Transport Session the message arrived on.
    pub session: Arc<TransportSession>,
    /// Observation Domain ID from the message header.
    pub odid: u32,
    /// Stream identifier (SCTP stream, 0 otherwise).
    pub stream: u16,
}

impl MessageContext {
    /// Creates a context for stream 0.
    pub fn new(session: Arc<TransportSession>, odid: u32) -> Self {
        Self {
            session,
            odid,
            stream: 0,
        }
    }
}

/// Location of one parsed set inside the raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    /// Set ID (template ID for data sets).
    pub set_id: u16,
    /// Byte offset of the set body inside the raw message.
    pub offset: usize,
    /// Length of the set body in bytes.
    pub length: usize,
}

/// IPFIX Message wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpfixMessage {
    ctx: MessageContext,
    raw: Vec<u8>,
    records: Vec<RecordRef>,
}

impl IpfixMessage {
    /// Wraps raw message bytes received on `ctx.session`.
    pub fn new(ctx: MessageContext, raw: Vec<u8>) -> Self {
        Self {
            ctx,
            raw,
            records: Vec::new(),
        }
    }

    /// Returns the message context.
    pub fn ctx(&self) -> &MessageContext {
        &self.ctx
    }

    /// Returns the Transport Session of the message.
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.ctx.session
    }

    /// Returns the raw message bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Returns the records found by the parser.
    pub fn records(&self) -> &[RecordRef] {
        &self.records
    }

    /// Appends a parsed record reference.
    pub fn add_record(&mut self, record: RecordRef) {
        self.records.push(record);
    }
}

/// Transport Session event message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    event: SessionEvent,
    session: Arc<TransportSession>,
}

impl SessionMessage {
    /// Creates a session event message.
    pub fn new(event: SessionEvent, session: Arc<TransportSession>) -> Self {
        Self { event, session }
    }

    /// Creates a session open message.
    pub fn open(session: Arc<TransportSession>) -> Self {
        Self::new(SessionEvent::Open, session)
    }

    /// Creates a session close message.
    pub fn close(session: Arc<TransportSession>) -> Self {
        Self::new(SessionEvent::Close, session)
    }

    /// Returns the event type.
    pub fn event(&self) -> SessionEvent {
        self.event
    }

    /// Returns the affected Transport Session.
    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }
}

/// Envelope of every object flowing through the pipeline.
#[derive(Debug)]
pub enum Message {
    /// IPFIX Message.
    Ipfix(IpfixMessage),
    /// Transport Session event.
    Session(SessionMessage),
    /// Deferred destruction request.
    Garbage(GarbageMessage),
}

impl Message {
    /// Returns the message type without inspecting the payload.
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Ipfix(_) => MessageType::Ipfix,
            Message::Session(_) => MessageType::Session,
            Message::Garbage(_) => MessageType::Garbage,
        }
    }

    /// Returns the IPFIX payload, if any.
    pub fn as_ipfix(&self) -> Option<&IpfixMessage> {
        match self {
            Message::Ipfix(msg) => Some(msg),
            _ => None,
        }
    }

    /// Returns the session event payload, if any.
    pub fn as_session(&self) -> Option<&SessionMessage> {
        match self {
            Message::Session(msg) => Some(msg),
            _ => None,
        }
    }

    /// Returns the garbage payload, if any.
    pub fn as_garbage(&self) -> Option<&GarbageMessage> {
        match self {
            Message::Garbage(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<IpfixMessage> for Message {
    fn from(msg: IpfixMessage) -> Self {
        Message::Ipfix(msg)
    }
}

impl From<SessionMessage> for Message {
    fn from(msg: SessionMessage) -> Self {
        Message::Session(msg)
    }
}

impl From<GarbageMessage> for Message {
    fn from(msg: GarbageMessage) -> Self {
        Message::Garbage(msg)
    }
}
