//! Recording feedback channel

use std::sync::Arc;

use ipxcol_core::{FeedbackError, FeedbackPipe, TransportSession};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct FeedbackState {
    requests: Vec<Arc<TransportSession>>,
    failure: Option<FeedbackError>,
}

/// Feedback channel that records close requests instead of delivering them
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingFeedback {
    state: Arc<Mutex<FeedbackState>>,
}

impl RecordingFeedback {
    /// Create a feedback channel that accepts every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a feedback channel that rejects every request with `error`
    pub fn failing(error: FeedbackError) -> Self {
        let feedback = Self::new();
        feedback.set_failure(Some(error));
        feedback
    }

    /// Make subsequent writes fail (or succeed again with `None`)
    pub fn set_failure(&self, failure: Option<FeedbackError>) {
        self.state.lock().failure = failure;
    }

    /// Close requests recorded so far
    pub fn requests(&self) -> Vec<Arc<TransportSession>> {
        self.state.lock().requests.clone()
    }

    /// Number of close requests recorded for `session`
    pub fn request_count(&self, session: &TransportSession) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|s| s.as_ref() == session)
            .count()
    }
}

impl FeedbackPipe for RecordingFeedback {
    fn write(&self, session: Arc<TransportSession>) -> Result<(), FeedbackError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        tracing::debug!(session = %session, "close request recorded");
        state.requests.push(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::session_fixtures;

    #[test]
    fn test_records_requests() {
        let feedback = RecordingFeedback::new();
        let ts = session_fixtures::tcp(7000);
        feedback.write(Arc::clone(&ts)).unwrap();
        assert_eq!(feedback.request_count(&ts), 1);
        assert_eq!(feedback.requests().len(), 1);
    }

    #[test]
    fn test_failing_feedback() {
        let feedback = RecordingFeedback::failing(FeedbackError::Closed);
        let ts = session_fixtures::sctp(7001);
        assert_eq!(feedback.write(Arc::clone(&ts)), Err(FeedbackError::Closed));
        assert_eq!(feedback.request_count(&ts), 0);

        feedback.set_failure(None);
        assert!(feedback.write(ts).is_ok());
    }
}
