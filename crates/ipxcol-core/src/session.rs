//! Transport Session identity.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Transport protocol of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionProto {
    /// Connectionless, no ordering or retransmission, no feedback.
    Udp,
    /// Stream oriented.
    Tcp,
    /// Association oriented.
    Sctp,
    /// Records replayed from a file.
    File,
}

impl SessionProto {
    /// Returns the protocol name used in session identifiers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Sctp => "sctp",
            Self::File => "file",
        }
    }

    /// Returns true if the transport guarantees ordered, complete delivery.
    ///
    /// An exporter on an unreliable transport can not tell a resend from
    /// new traffic, so a malformed message there is dropped rather than
    /// closing the whole session.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, Self::Udp)
    }
}

/// Where the session's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionEndpoint {
    /// Network transport tuple.
    Net {
        /// Exporter address and port.
        src: SocketAddr,
        /// Collector address and port.
        dst: SocketAddr,
    },
    /// Path of the replayed file.
    File(PathBuf),
}

/// One logical connection/association from an exporter.
///
/// Sessions are shared between messages as `Arc<TransportSession>` and
/// compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportSession {
    ident: String,
    proto: SessionProto,
    endpoint: SessionEndpoint,
}

impl TransportSession {
    fn net(proto: SessionProto, src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            ident: format!("{}:{}->{}", proto.as_str(), src, dst),
            proto,
            endpoint: SessionEndpoint::Net { src, dst },
        }
    }

    /// Creates a UDP session.
    pub fn udp(src: SocketAddr, dst: SocketAddr) -> Self {
        Self::net(SessionProto::Udp, src, dst)
    }

    /// Creates a TCP session.
    pub fn tcp(src: SocketAddr, dst: SocketAddr) -> Self {
        Self::net(SessionProto::Tcp, src, dst)
    }

    /// Creates an SCTP session.
    pub fn sctp(src: SocketAddr, dst: SocketAddr) -> Self {
        Self::net(SessionProto::Sctp, src, dst)
    }

    /// Creates a file session.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            ident: format!("file:{}", path.display()),
            proto: SessionProto::File,
            endpoint: SessionEndpoint::File(path),
        }
    }

    /// Returns the human readable identifier (for logging).
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Returns the transport protocol.
    pub fn proto(&self) -> SessionProto {
        self.proto
    }

    /// Returns the session endpoint.
    pub fn endpoint(&self) -> &SessionEndpoint {
        &self.endpoint
    }

    /// Returns true if the transport guarantees ordered, complete delivery.
    pub fn is_reliable(&self) -> bool {
        self.proto.is_reliable()
    }
}

impl fmt::Display for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ident)
    }
}

/// Lifecycle event of a Transport Session reported by an input stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    /// The session has been opened.
    Open,
    /// The session has been closed; no further messages will arrive.
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_session_ident() {
        let ts = TransportSession::udp(addr("10.0.0.1:5000"), addr("10.0.0.2:4739"));
        assert_eq!(ts.ident(), "udp:10.0.0.1:5000->10.0.0.2:4739");
        assert_eq!(ts.to_string(), ts.ident());

        let ts = TransportSession::file("/tmp/flows.ipfix");
        assert_eq!(ts.ident(), "file:/tmp/flows.ipfix");
    }

    #[test]
    fn test_reliability() {
        let src = addr("192.0.2.1:4000");
        let dst = addr("192.0.2.2:4739");
        assert!(!TransportSession::udp(src, dst).is_reliable());
        assert!(TransportSession::tcp(src, dst).is_reliable());
        assert!(TransportSession::sctp(src, dst).is_reliable());
        assert!(TransportSession::file("a.ipfix").is_reliable());
    }

    #[test]
    fn test_identity_includes_protocol() {
        let src = addr("192.0.2.1:4000");
        let dst = addr("192.0.2.2:4739");
        assert_ne!(TransportSession::udp(src, dst), TransportSession::tcp(src, dst));
        assert_eq!(TransportSession::tcp(src, dst), TransportSession::tcp(src, dst));
    }
}
