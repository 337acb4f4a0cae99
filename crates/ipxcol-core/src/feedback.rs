//! Feedback channel to the input stage.
//!
//! Lets a processing stage ask the input to close a specific Transport
//! Session. Connectionless inputs have no feedback channel at all.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::session::TransportSession;

/// Failure to deliver a close request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    /// The channel buffer is full.
    #[error("feedback channel is full")]
    Full,
    /// The input stage has gone away.
    #[error("feedback channel is closed")]
    Closed,
}

/// Writer side of a feedback channel.
pub trait FeedbackPipe: Send + Sync {
    /// Requests the input stage to close `session`.
    ///
    /// Must not block; a request that can not be delivered immediately is
    /// reported as an error.
    fn write(&self, session: Arc<TransportSession>) -> Result<(), FeedbackError>;
}

/// Feedback channel backed by a bounded tokio mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelFeedback {
    tx: mpsc::Sender<Arc<TransportSession>>,
}

impl FeedbackPipe for ChannelFeedback {
    fn write(&self, session: Arc<TransportSession>) -> Result<(), FeedbackError> {
        self.tx.try_send(session).map_err(|e| match e {
            TrySendError::Full(_) => FeedbackError::Full,
            TrySendError::Closed(_) => FeedbackError::Closed,
        })
    }
}

/// Creates a feedback channel; the receiver belongs to the input stage.
pub fn feedback_channel(
    capacity: usize,
) -> (ChannelFeedback, mpsc::Receiver<Arc<TransportSession>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelFeedback { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(port: u16) -> Arc<TransportSession> {
        Arc::new(TransportSession::tcp(
            format!("10.0.0.1:{}", port).parse().unwrap(),
            "10.0.0.2:4739".parse().unwrap(),
        ))
    }

    #[test]
    fn test_write_and_receive() {
        let (pipe, mut rx) = feedback_channel(4);
        pipe.write(session(1000)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), session(1000));
    }

    #[test]
    fn test_write_full() {
        let (pipe, _rx) = feedback_channel(1);
        pipe.write(session(1000)).unwrap();
        assert_eq!(pipe.write(session(1001)), Err(FeedbackError::Full));
    }

    #[test]
    fn test_write_closed() {
        let (pipe, rx) = feedback_channel(1);
        drop(rx);
        assert_eq!(pipe.write(session(1000)), Err(FeedbackError::Closed));
    }
}
