//! Test fixtures for IPFIX traffic
//!
//! Provides Transport Sessions and byte-exact IPFIX Messages for feeding a
//! parser stage.

use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use ipxcol_core::{IpfixMessage, MessageContext, TransportSession};

/// IPFIX protocol version
pub const IPFIX_VERSION: u16 = 10;

/// Length of the IPFIX message header
pub const HEADER_LEN: usize = 16;

/// Set ID of a template set
pub const TEMPLATE_SET_ID: u16 = 2;

/// Set ID of an options template set
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 3;

/// Lowest set ID of a data set
pub const MIN_DATA_SET_ID: u16 = 256;

/// Common Transport Session fixtures
pub mod session_fixtures {
    use super::*;

    fn addr(host: &str, port: u16) -> std::net::SocketAddr {
        std::net::SocketAddr::new(host.parse().unwrap_or([127, 0, 0, 1].into()), port)
    }

    /// UDP session from exporter port `port`
    pub fn udp(port: u16) -> Arc<TransportSession> {
        Arc::new(TransportSession::udp(
            addr("192.0.2.10", port),
            addr("192.0.2.1", 4739),
        ))
    }

    /// TCP session from exporter port `port`
    pub fn tcp(port: u16) -> Arc<TransportSession> {
        Arc::new(TransportSession::tcp(
            addr("192.0.2.20", port),
            addr("192.0.2.1", 4739),
        ))
    }

    /// SCTP session from exporter port `port`
    pub fn sctp(port: u16) -> Arc<TransportSession> {
        Arc::new(TransportSession::sctp(
            addr("192.0.2.30", port),
            addr("192.0.2.1", 4739),
        ))
    }

    /// File session replaying `name`
    pub fn file(name: &str) -> Arc<TransportSession> {
        Arc::new(TransportSession::file(name))
    }
}

/// One field specifier of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Element ID (without the enterprise bit)
    pub id: u16,
    /// Field length in bytes
    pub length: u16,
    /// Private enterprise number, if any
    pub pen: Option<u32>,
}

impl FieldSpec {
    /// IANA element
    pub fn iana(id: u16, length: u16) -> Self {
        Self {
            id,
            length,
            pen: None,
        }
    }

    /// Enterprise specific element
    pub fn enterprise(pen: u32, id: u16, length: u16) -> Self {
        Self {
            id,
            length,
            pen: Some(pen),
        }
    }
}

/// Builder of byte-exact IPFIX Messages
#[derive(Debug, Clone)]
pub struct IpfixBuilder {
    export_time: u32,
    sequence: u32,
    odid: u32,
    sets: Vec<(u16, Vec<u8>)>,
}

impl IpfixBuilder {
    /// Create an empty message for observation domain `odid`
    pub fn new(odid: u32) -> Self {
        Self {
            export_time: 1_700_000_000,
            sequence: 0,
            odid,
            sets: Vec::new(),
        }
    }

    /// Set the sequence number
    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Add a template set with one template
    pub fn template(mut self, template_id: u16, fields: &[FieldSpec]) -> Self {
        let mut body = Vec::new();
        write_u16(&mut body, template_id);
        write_u16(&mut body, fields.len() as u16);
        for field in fields {
            match field.pen {
                Some(pen) => {
                    write_u16(&mut body, field.id | 0x8000);
                    write_u16(&mut body, field.length);
                    write_u32(&mut body, pen);
                }
                None => {
                    write_u16(&mut body, field.id);
                    write_u16(&mut body, field.length);
                }
            }
        }
        self.sets.push((TEMPLATE_SET_ID, body));
        self
    }

    /// Add a data set for `template_id` with the given record bytes
    pub fn data(mut self, template_id: u16, records: &[u8]) -> Self {
        self.sets.push((template_id, records.to_vec()));
        self
    }

    /// Add a raw set with an arbitrary set ID
    pub fn raw_set(mut self, set_id: u16, body: &[u8]) -> Self {
        self.sets.push((set_id, body.to_vec()));
        self
    }

    /// Encode the message
    pub fn bytes(&self) -> Vec<u8> {
        let total: usize = HEADER_LEN + self.sets.iter().map(|(_, b)| 4 + b.len()).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        write_u16(&mut out, IPFIX_VERSION);
        write_u16(&mut out, total as u16);
        write_u32(&mut out, self.export_time);
        write_u32(&mut out, self.sequence);
        write_u32(&mut out, self.odid);
        for (set_id, body) in &self.sets {
            write_u16(&mut out, *set_id);
            write_u16(&mut out, (4 + body.len()) as u16);
            out.extend_from_slice(body);
        }
        out
    }

    /// Wrap the encoded message as received on `session`
    pub fn build(&self, session: &Arc<TransportSession>) -> IpfixMessage {
        IpfixMessage::new(
            MessageContext::new(Arc::clone(session), self.odid),
            self.bytes(),
        )
    }
}

// Writing into a Vec can not fail.
fn write_u16(out: &mut Vec<u8>, value: u16) {
    let _ = out.write_u16::<BigEndian>(value);
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    let _ = out.write_u32::<BigEndian>(value);
}

/// Common message fixtures
pub mod message_fixtures {
    use super::*;

    /// Template 256: sourceIPv4Address, destinationIPv4Address, octetDeltaCount
    pub fn flow_template() -> Vec<FieldSpec> {
        vec![
            FieldSpec::iana(8, 4),
            FieldSpec::iana(12, 4),
            FieldSpec::iana(1, 8),
        ]
    }

    /// Message defining template 256
    pub fn template_message(session: &Arc<TransportSession>, odid: u32) -> IpfixMessage {
        IpfixBuilder::new(odid)
            .template(256, &flow_template())
            .build(session)
    }

    /// Message with one data record for template 256
    pub fn data_message(session: &Arc<TransportSession>, odid: u32) -> IpfixMessage {
        let record = [
            192, 0, 2, 10, // source
            198, 51, 100, 7, // destination
            0, 0, 0, 0, 0, 0, 5, 220, // octets
        ];
        IpfixBuilder::new(odid).data(256, &record).build(session)
    }

    /// Message with a wrong version number
    pub fn malformed_message(session: &Arc<TransportSession>, odid: u32) -> IpfixMessage {
        let mut bytes = IpfixBuilder::new(odid)
            .template(256, &flow_template())
            .bytes();
        bytes[0] = 0;
        bytes[1] = 9;
        IpfixMessage::new(MessageContext::new(Arc::clone(session), odid), bytes)
    }

    /// Message whose header length does not match the payload
    pub fn truncated_message(session: &Arc<TransportSession>, odid: u32) -> IpfixMessage {
        let mut bytes = IpfixBuilder::new(odid)
            .template(256, &flow_template())
            .bytes();
        bytes.truncate(bytes.len() - 3);
        IpfixMessage::new(MessageContext::new(Arc::clone(session), odid), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = IpfixBuilder::new(42).sequence(7).bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..2], &[0, 10]);
        assert_eq!(&bytes[2..4], &[0, 16]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 7]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 42]);
    }

    #[test]
    fn test_template_set_layout() {
        let bytes = IpfixBuilder::new(1)
            .template(300, &[FieldSpec::enterprise(8057, 1000, 1)])
            .bytes();
        // header + set header + template header + enterprise field
        assert_eq!(bytes.len(), 16 + 4 + 4 + 8);
        assert_eq!(&bytes[16..18], &[0, 2]);
        assert_eq!(&bytes[20..22], &[1, 44]);
        assert_eq!(&bytes[24..26], &[0x83, 0xe8]);
    }

    #[test]
    fn test_malformed_fixtures() {
        let ts = session_fixtures::tcp(5000);
        let msg = message_fixtures::malformed_message(&ts, 1);
        assert_eq!(&msg.raw()[0..2], &[0, 9]);

        let msg = message_fixtures::truncated_message(&ts, 1);
        let declared = u16::from_be_bytes([msg.raw()[2], msg.raw()[3]]) as usize;
        assert_ne!(declared, msg.raw().len());
    }
}
