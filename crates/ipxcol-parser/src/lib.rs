//! IPFIX parser stage.
//!
//! The parser plugin sits right behind the input stage. It parses IPFIX
//! Messages against per-Transport-Session templates kept in a
//! [`SessionRegistry`](ipxcol_core::SessionRegistry), forwards parsed
//! messages and releases replaced templates through garbage messages that
//! travel behind every message that may still reference them.
//!
//! # Architecture
//!
//! ```text
//! input stage ──IPFIX / session events──> ParserPlugin ──> downstream stages
//!      ▲                                      │
//!      └──────────── close requests ──────────┘   (feedback channel)
//! ```
//!
//! # Failure handling
//!
//! - Malformed message on UDP: dropped, the session stays usable
//! - Malformed message on a reliable transport, or an internal fault: the
//!   session is blocked and a close request is sent, or, without feedback,
//!   removed at once
//! - Dictionary rebind failure: every session is closed
//!
//! Only a failure of those recovery paths is reported to the host.

mod parser;
mod types;

pub use parser::ParserPlugin;
pub use types::{CloseAllStatus, ParserStats, ParserUpdate};
