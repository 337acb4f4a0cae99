//! Test infrastructure for the IPFIX collector stages
//!
//! Provides:
//! - Transport Session and IPFIX Message fixtures
//! - A scripted in-memory `SessionRegistry` with fault injection
//! - A recording feedback channel
//! - Destructor counting and output-order verification helpers

pub mod feedback;
pub mod fixtures;
pub mod registry;
mod verification;

pub use feedback::RecordingFeedback;
pub use fixtures::*;
pub use registry::{FakeRegistry, RegistryProbe};
pub use verification::*;
