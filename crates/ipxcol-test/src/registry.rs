//! Scripted in-memory session registry
//!
//! A small but real template bookkeeper: it validates the IPFIX header and
//! set layout, keeps templates per (session, observation domain, template
//! id), releases redefined templates through counted garbage messages and
//! supports fault injection for every registry operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::mem;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use ipxcol_core::{
    GarbageMessage, IeDictionary, IpfixMessage, Parsed, RecordRef, RegistryError, RejectReason,
    Rejected, SessionRegistry, TransportSession,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::fixtures::{
    HEADER_LEN, IPFIX_VERSION, MIN_DATA_SET_ID, OPTIONS_TEMPLATE_SET_ID, TEMPLATE_SET_ID,
};
use crate::verification::DestructorCounter;

/// Field of a bound template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundField {
    pen: u32,
    id: u16,
    length: u16,
    /// Element is defined by the dictionary the template is bound to
    known: bool,
}

/// Template bound to a dictionary revision
#[derive(Debug)]
struct Template {
    fields: Vec<BoundField>,
    dictionary_revision: u64,
}

impl Template {
    fn bind(fields: &[(u32, u16, u16)], dictionary: &IeDictionary) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|&(pen, id, length)| BoundField {
                    pen,
                    id,
                    length,
                    known: dictionary.lookup(pen, id).is_some(),
                })
                .collect(),
            dictionary_revision: dictionary.revision(),
        }
    }

    fn rebind(&self, dictionary: &IeDictionary) -> Self {
        let fields: Vec<_> = self.fields.iter().map(|f| (f.pen, f.id, f.length)).collect();
        Self::bind(&fields, dictionary)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    blocked: bool,
    templates: BTreeMap<(u32, u16), Template>,
}

#[derive(Debug, Default)]
struct Faults {
    process_nomem: bool,
    ie_source_nomem: bool,
    remove_fail: HashSet<String>,
}

#[derive(Debug)]
struct RegistryState {
    sessions: HashMap<Arc<TransportSession>, SessionState>,
    dictionary: Arc<IeDictionary>,
    faults: Faults,
    remove_calls: usize,
    ie_source_calls: usize,
}

/// Template definition read from a template set: (template id, fields)
type TemplateDef = (u16, Vec<(u32, u16, u16)>);

/// In-memory `SessionRegistry`
#[derive(Debug)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
    counter: DestructorCounter,
}

impl FakeRegistry {
    /// Create a registry with an empty dictionary
    pub fn new() -> Self {
        Self::with_dictionary(Arc::new(IeDictionary::new(0)))
    }

    /// Create a registry bound to `dictionary`
    pub fn with_dictionary(dictionary: Arc<IeDictionary>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                sessions: HashMap::new(),
                dictionary,
                faults: Faults::default(),
                remove_calls: 0,
                ie_source_calls: 0,
            })),
            counter: DestructorCounter::new(),
        }
    }

    /// Handle for inspecting and scripting the registry after it has been
    /// moved into a plugin
    pub fn probe(&self) -> RegistryProbe {
        RegistryProbe {
            state: Arc::clone(&self.state),
            counter: self.counter.clone(),
        }
    }

    fn wrap_templates(&self, templates: Vec<Template>) -> Option<GarbageMessage> {
        if templates.is_empty() {
            None
        } else {
            Some(self.counter.wrap(templates))
        }
    }
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn short_read(_: std::io::Error) -> RejectReason {
    RejectReason::Format
}

fn parse_templates(body: &[u8]) -> Result<Vec<TemplateDef>, RejectReason> {
    let mut templates = Vec::new();
    let mut cur = Cursor::new(body);
    // Anything shorter than a template header is padding.
    while body.len() as u64 - cur.position() >= 4 {
        let id = cur.read_u16::<BigEndian>().map_err(short_read)?;
        let count = cur.read_u16::<BigEndian>().map_err(short_read)?;
        if id < MIN_DATA_SET_ID {
            return Err(RejectReason::Format);
        }
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw_id = cur.read_u16::<BigEndian>().map_err(short_read)?;
            let length = cur.read_u16::<BigEndian>().map_err(short_read)?;
            let pen = if raw_id & 0x8000 != 0 {
                cur.read_u32::<BigEndian>().map_err(short_read)?
            } else {
                0
            };
            fields.push((pen, raw_id & 0x7fff, length));
        }
        templates.push((id, fields));
    }
    Ok(templates)
}

/// Validates the message layout; returns template definitions and data sets
fn parse_message(raw: &[u8]) -> Result<(Vec<TemplateDef>, Vec<RecordRef>), RejectReason> {
    if raw.len() < HEADER_LEN {
        return Err(RejectReason::Format);
    }
    let version = BigEndian::read_u16(&raw[0..2]);
    let length = BigEndian::read_u16(&raw[2..4]) as usize;
    if version != IPFIX_VERSION || length != raw.len() {
        return Err(RejectReason::Format);
    }

    let mut templates = Vec::new();
    let mut data = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < raw.len() {
        if raw.len() - offset < 4 {
            return Err(RejectReason::Format);
        }
        let set_id = BigEndian::read_u16(&raw[offset..offset + 2]);
        let set_len = BigEndian::read_u16(&raw[offset + 2..offset + 4]) as usize;
        if set_len < 4 || offset + set_len > raw.len() {
            return Err(RejectReason::Format);
        }
        let body = &raw[offset + 4..offset + set_len];
        match set_id {
            TEMPLATE_SET_ID => templates.extend(parse_templates(body)?),
            OPTIONS_TEMPLATE_SET_ID => {}
            id if id >= MIN_DATA_SET_ID => data.push(RecordRef {
                set_id: id,
                offset: offset + 4,
                length: set_len - 4,
            }),
            _ => return Err(RejectReason::Format),
        }
        offset += set_len;
    }
    Ok((templates, data))
}

impl SessionRegistry for FakeRegistry {
    fn process(&mut self, mut msg: IpfixMessage) -> Result<Parsed, Rejected> {
        let mut state = self.state.lock();
        if state.faults.process_nomem {
            return Err(Rejected {
                reason: RejectReason::NoMemory,
                message: msg,
            });
        }

        let dictionary = Arc::clone(&state.dictionary);
        let odid = msg.ctx().odid;
        let entry = state
            .sessions
            .entry(Arc::clone(msg.session()))
            .or_default();
        if entry.blocked {
            return Err(Rejected {
                reason: RejectReason::Denied,
                message: msg,
            });
        }

        let (templates, data) = match parse_message(msg.raw()) {
            Ok(parsed) => parsed,
            Err(reason) => {
                return Err(Rejected {
                    reason,
                    message: msg,
                })
            }
        };

        let mut replaced = Vec::new();
        for (id, fields) in templates {
            let old = if fields.is_empty() {
                // Template withdrawal
                entry.templates.remove(&(odid, id))
            } else {
                entry
                    .templates
                    .insert((odid, id), Template::bind(&fields, &dictionary))
            };
            replaced.extend(old);
        }
        for record in data {
            if entry.templates.contains_key(&(odid, record.set_id)) {
                msg.add_record(record);
            } else {
                debug!(
                    session = %msg.session(),
                    template = record.set_id,
                    "data set without template skipped"
                );
            }
        }
        drop(state);

        Ok(Parsed {
            message: msg,
            garbage: self.wrap_templates(replaced),
        })
    }

    fn session_remove(
        &mut self,
        session: &TransportSession,
    ) -> Result<Option<GarbageMessage>, RegistryError> {
        let mut state = self.state.lock();
        state.remove_calls += 1;
        if state.faults.remove_fail.contains(session.ident()) {
            return Err(RegistryError::Internal(format!(
                "injected removal failure for {}",
                session
            )));
        }
        let entry = state
            .sessions
            .remove(session)
            .ok_or(RegistryError::NotFound)?;
        drop(state);
        Ok(self.wrap_templates(entry.templates.into_values().collect()))
    }

    fn session_block(&mut self, session: &TransportSession) {
        let mut state = self.state.lock();
        match state.sessions.get_mut(session) {
            Some(entry) => entry.blocked = true,
            None => {
                state.sessions.insert(
                    Arc::new(session.clone()),
                    SessionState {
                        blocked: true,
                        templates: BTreeMap::new(),
                    },
                );
            }
        }
    }

    fn session_for(&self, f: &mut dyn FnMut(&Arc<TransportSession>)) {
        let mut sessions: Vec<_> = self.state.lock().sessions.keys().cloned().collect();
        sessions.sort_by(|a, b| a.ident().cmp(b.ident()));
        for session in &sessions {
            f(session);
        }
    }

    fn ie_source(
        &mut self,
        dictionary: Arc<IeDictionary>,
    ) -> Result<Option<GarbageMessage>, RegistryError> {
        let mut state = self.state.lock();
        state.ie_source_calls += 1;
        if state.faults.ie_source_nomem {
            return Err(RegistryError::NoMemory);
        }

        let mut replaced = Vec::new();
        for entry in state.sessions.values_mut() {
            for template in entry.templates.values_mut() {
                let rebound = template.rebind(&dictionary);
                replaced.push(mem::replace(template, rebound));
            }
        }
        state.dictionary = dictionary;
        drop(state);
        Ok(self.wrap_templates(replaced))
    }
}

/// Inspection and fault-injection handle of a [`FakeRegistry`]
#[derive(Debug, Clone)]
pub struct RegistryProbe {
    state: Arc<Mutex<RegistryState>>,
    counter: DestructorCounter,
}

impl RegistryProbe {
    /// Whether the registry holds state for `session`
    pub fn is_known(&self, session: &TransportSession) -> bool {
        self.state.lock().sessions.contains_key(session)
    }

    /// Whether `session` is blocked
    pub fn is_blocked(&self, session: &TransportSession) -> bool {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| s.blocked)
            .unwrap_or(false)
    }

    /// Number of known sessions
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of templates held for `session`
    pub fn template_count(&self, session: &TransportSession) -> usize {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| s.templates.len())
            .unwrap_or(0)
    }

    /// Number of template fields of `session` unknown to the bound dictionary
    pub fn unknown_fields(&self, session: &TransportSession) -> usize {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| {
                s.templates
                    .values()
                    .flat_map(|t| t.fields.iter())
                    .filter(|f| !f.known)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Dictionary revision the templates of `session` are bound to
    pub fn template_revisions(&self, session: &TransportSession) -> Vec<u64> {
        self.state
            .lock()
            .sessions
            .get(session)
            .map(|s| s.templates.values().map(|t| t.dictionary_revision).collect())
            .unwrap_or_default()
    }

    /// Revision of the current dictionary
    pub fn dictionary_revision(&self) -> u64 {
        self.state.lock().dictionary.revision()
    }

    /// Number of `session_remove` calls
    pub fn remove_calls(&self) -> usize {
        self.state.lock().remove_calls
    }

    /// Number of `ie_source` calls
    pub fn ie_source_calls(&self) -> usize {
        self.state.lock().ie_source_calls
    }

    /// Make `process` fail with an allocation failure
    pub fn set_process_nomem(&self, enabled: bool) {
        self.state.lock().faults.process_nomem = enabled;
    }

    /// Make `ie_source` fail with an allocation failure
    pub fn set_ie_source_nomem(&self, enabled: bool) {
        self.state.lock().faults.ie_source_nomem = enabled;
    }

    /// Make `session_remove` fail for `session`
    pub fn fail_remove(&self, session: &TransportSession) {
        self.state
            .lock()
            .faults
            .remove_fail
            .insert(session.ident().to_string());
    }

    /// Counter of the garbage messages created by the registry
    pub fn counter(&self) -> &DestructorCounter {
        &self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{message_fixtures, session_fixtures, FieldSpec, IpfixBuilder};

    #[test]
    fn test_process_creates_session() {
        let mut registry = FakeRegistry::new();
        let probe = registry.probe();
        let ts = session_fixtures::tcp(9000);

        let parsed = registry
            .process(message_fixtures::template_message(&ts, 1))
            .unwrap();
        assert!(parsed.garbage.is_none());
        assert!(probe.is_known(&ts));
        assert_eq!(probe.template_count(&ts), 1);

        let parsed = registry
            .process(message_fixtures::data_message(&ts, 1))
            .unwrap();
        assert_eq!(parsed.message.records().len(), 1);
        assert_eq!(parsed.message.records()[0].set_id, 256);
    }

    #[test]
    fn test_redefinition_produces_garbage() {
        let mut registry = FakeRegistry::new();
        let probe = registry.probe();
        let ts = session_fixtures::udp(9001);

        registry
            .process(message_fixtures::template_message(&ts, 1))
            .unwrap();
        let parsed = registry
            .process(
                IpfixBuilder::new(1)
                    .template(256, &[FieldSpec::iana(1, 8)])
                    .build(&ts),
            )
            .unwrap();
        let garbage = parsed.garbage.unwrap();
        assert_eq!(probe.counter().created(), 1);
        garbage.destroy();
        assert_eq!(probe.counter().destroyed(), 1);
    }

    #[test]
    fn test_malformed_rejected() {
        let mut registry = FakeRegistry::new();
        let ts = session_fixtures::tcp(9002);
        let rejected = registry
            .process(message_fixtures::malformed_message(&ts, 1))
            .unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Format);
        assert_eq!(rejected.message.session(), &ts);

        let rejected = registry
            .process(message_fixtures::truncated_message(&ts, 1))
            .unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Format);

        let rejected = registry
            .process(IpfixBuilder::new(1).raw_set(5, &[]).build(&ts))
            .unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Format);
    }

    #[test]
    fn test_blocked_session_denied() {
        let mut registry = FakeRegistry::new();
        let probe = registry.probe();
        let ts = session_fixtures::sctp(9003);

        registry.session_block(&ts);
        assert!(probe.is_blocked(&ts));
        let rejected = registry
            .process(message_fixtures::template_message(&ts, 1))
            .unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Denied);
    }

    #[test]
    fn test_remove_and_faults() {
        let mut registry = FakeRegistry::new();
        let probe = registry.probe();
        let ts = session_fixtures::tcp(9004);

        assert_eq!(registry.session_remove(&ts).unwrap_err(), RegistryError::NotFound);

        registry
            .process(message_fixtures::template_message(&ts, 1))
            .unwrap();
        probe.fail_remove(&ts);
        assert!(matches!(
            registry.session_remove(&ts),
            Err(RegistryError::Internal(_))
        ));
        assert!(probe.is_known(&ts));
        assert_eq!(probe.remove_calls(), 2);

        probe.set_process_nomem(true);
        let rejected = registry
            .process(message_fixtures::data_message(&ts, 1))
            .unwrap_err();
        assert_eq!(rejected.reason, RejectReason::NoMemory);
    }

    #[test]
    fn test_ie_source_rebinds_all_templates() {
        let mut registry = FakeRegistry::new();
        let probe = registry.probe();
        let a = session_fixtures::tcp(9005);
        let b = session_fixtures::udp(9006);
        registry
            .process(message_fixtures::template_message(&a, 1))
            .unwrap();
        registry
            .process(message_fixtures::template_message(&b, 2))
            .unwrap();
        assert_eq!(probe.unknown_fields(&a), 3);

        let mut dictionary = IeDictionary::new(5);
        dictionary.insert(
            0,
            8,
            ipxcol_core::ElementDef {
                name: "sourceIPv4Address".into(),
                data_type: "ipv4Address".into(),
            },
        );
        let garbage = registry.ie_source(Arc::new(dictionary)).unwrap();
        assert!(garbage.is_some());
        assert_eq!(probe.counter().created(), 1);
        assert_eq!(probe.template_revisions(&a), vec![5]);
        assert_eq!(probe.unknown_fields(&a), 2);
        assert_eq!(probe.dictionary_revision(), 5);

        probe.set_ie_source_nomem(true);
        assert_eq!(
            registry.ie_source(Arc::new(IeDictionary::new(6))).unwrap_err(),
            RegistryError::NoMemory
        );
        assert_eq!(probe.dictionary_revision(), 5);
        assert_eq!(probe.ie_source_calls(), 2);
    }

    #[test]
    fn test_session_for_sorted() {
        let mut registry = FakeRegistry::new();
        let b = session_fixtures::udp(2);
        let a = session_fixtures::tcp(1);
        registry.session_block(&b);
        registry.session_block(&a);

        let mut seen = Vec::new();
        registry.session_for(&mut |s| seen.push(s.ident().to_string()));
        assert_eq!(seen, vec![a.ident().to_string(), b.ident().to_string()]);
    }
}
