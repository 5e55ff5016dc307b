//! In-memory native layer for testing and development.
//!
//! [`MockNative`] behaves like the libvirt test driver behind the
//! [`NativeApi`] seam. It also keeps the books a real library cannot: it
//! counts outstanding owned strings and live handles, panics on a double
//! release, and lets tests inject a failure into any call.

use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec::encode_fixed_str;
use crate::error::ErrorRecord;
use crate::native::{NativeApi, RawNodeInfo};
use crate::types::NodeInfo;

// libvirt error numbers (virErrorNumber) used by the mock
pub const VIR_ERR_INTERNAL_ERROR: i32 = 1;
pub const VIR_ERR_NO_CONNECT: i32 = 5;
pub const VIR_ERR_INVALID_CONN: i32 = 6;
pub const VIR_ERR_INVALID_ARG: i32 = 8;
pub const VIR_ERR_OPERATION_FAILED: i32 = 9;
pub const VIR_ERR_XML_ERROR: i32 = 27;
pub const VIR_ERR_SYSTEM_ERROR: i32 = 38;
pub const VIR_ERR_NO_DOMAIN: i32 = 42;
pub const VIR_ERR_OPERATION_INVALID: i32 = 55;

// libvirt error domains (virErrorDomain) used by the mock
pub const VIR_FROM_TEST: i32 = 12;
pub const VIR_FROM_REMOTE: i32 = 13;
pub const VIR_FROM_DOMAIN_SNAPSHOT: i32 = 35;

/// URI schemes the mock accepts.
const ACCEPTED_SCHEMES: &[&str] = &["test://", "mock://"];

/// Native calls that can be made to fail with [`MockNative::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Open,
    Close,
    GetCapabilities,
    GetHostname,
    GetNodeInfo,
    ListDomains,
    ListDefinedDomains,
    LookupById,
    LookupByName,
    LookupByUuid,
    Restore,
    GetName,
    GetUuid,
    SnapshotCreate,
    Save,
    SaveFlags,
}

/// Open session handle.
#[derive(Debug)]
pub struct MockSession {
    id: u64,
}

/// Domain handle. Owns the name string lent out by `domain_get_name`.
#[derive(Debug)]
pub struct MockDomainRef {
    uuid: Uuid,
    name: CString,
}

/// Snapshot handle.
#[derive(Debug)]
pub struct MockSnapshotRef {
    domain: Uuid,
    name: String,
}

/// Contents of a save image written by the mock.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SaveImage {
    uuid: Uuid,
    name: String,
    memory_kib: u64,
    vcpus: u32,
    xml: String,
    flags: u32,
}

struct MockDomain {
    uuid: Uuid,
    name: String,
    id: Option<u32>,
    memory_kib: u64,
    vcpus: u32,
    xml: String,
    snapshots: Vec<String>,
}

impl MockDomain {
    fn new(name: &str) -> Self {
        let uuid = Uuid::new_v4();
        Self {
            uuid,
            name: name.to_string(),
            id: None,
            memory_kib: 1024 * 1024,
            vcpus: 1,
            xml: format!(
                "<domain type='test'><name>{}</name><uuid>{}</uuid></domain>",
                name, uuid
            ),
            snapshots: Vec::new(),
        }
    }
}

struct MockState {
    hostname: String,
    capabilities: String,
    node: NodeInfo,
    domains: Vec<MockDomain>,
    next_id: u32,
    next_session: u64,
    sessions: HashSet<u64>,
    injected: HashSet<MockCall>,
    strings: HashSet<usize>,
    domain_refs: usize,
    snapshot_refs: usize,
    errors: HashMap<ThreadId, ErrorRecord>,
}

type MockResult<T> = std::result::Result<T, ErrorRecord>;

fn test_error(code: i32, message: impl Into<String>) -> ErrorRecord {
    ErrorRecord::new(code, VIR_FROM_TEST, message)
}

impl MockState {
    fn check_session(&self, session: &MockSession) -> MockResult<()> {
        if self.sessions.contains(&session.id) {
            Ok(())
        } else {
            Err(test_error(VIR_ERR_INVALID_CONN, "invalid connection pointer"))
        }
    }

    fn domain(&self, uuid: &Uuid) -> MockResult<&MockDomain> {
        self.domains
            .iter()
            .find(|d| d.uuid == *uuid)
            .ok_or_else(|| test_error(VIR_ERR_NO_DOMAIN, format!("no domain with matching uuid '{}'", uuid)))
    }

    fn domain_mut(&mut self, uuid: &Uuid) -> MockResult<&mut MockDomain> {
        self.domains
            .iter_mut()
            .find(|d| d.uuid == *uuid)
            .ok_or_else(|| test_error(VIR_ERR_NO_DOMAIN, format!("no domain with matching uuid '{}'", uuid)))
    }

    /// Hand out a new reference to a domain found by a lookup.
    fn found(&mut self, uuid: Option<Uuid>, key: String) -> MockResult<MockDomainRef> {
        let uuid = uuid.ok_or_else(|| test_error(VIR_ERR_NO_DOMAIN, format!("Domain not found: {}", key)))?;
        let name = CString::new(self.domain(&uuid)?.name.as_str())
            .map_err(|_| test_error(VIR_ERR_INTERNAL_ERROR, "domain name contains NUL"))?;
        self.domain_refs += 1;
        Ok(MockDomainRef { uuid, name })
    }

    fn hand_over(&mut self, s: CString) -> *mut c_char {
        let ptr = s.into_raw();
        self.strings.insert(ptr as usize);
        ptr
    }

    fn start(&mut self, uuid: &Uuid) -> MockResult<u32> {
        let id = self.next_id;
        let domain = self.domain_mut(uuid)?;
        if domain.id.is_some() {
            return Err(test_error(
                VIR_ERR_OPERATION_INVALID,
                format!("domain '{}' is already active", domain.name),
            ));
        }
        domain.id = Some(id);
        self.next_id += 1;
        Ok(id)
    }

    fn save(&mut self, uuid: &Uuid, path: &CStr, dxml: Option<&CStr>, flags: c_uint) -> MockResult<()> {
        let domain = self.domain(uuid)?;
        if domain.id.is_none() {
            return Err(test_error(
                VIR_ERR_OPERATION_INVALID,
                format!("domain '{}' is not running", domain.name),
            ));
        }

        let image = SaveImage {
            uuid: domain.uuid,
            name: domain.name.clone(),
            memory_kib: domain.memory_kib,
            vcpus: domain.vcpus,
            xml: dxml
                .map(|x| x.to_string_lossy().into_owned())
                .unwrap_or_else(|| domain.xml.clone()),
            flags,
        };

        let content = serde_json::to_vec_pretty(&image)
            .map_err(|e| test_error(VIR_ERR_INTERNAL_ERROR, e.to_string()))?;
        let path = path.to_string_lossy();
        std::fs::write(Path::new(path.as_ref()), content).map_err(|e| {
            test_error(VIR_ERR_SYSTEM_ERROR, format!("failed to write '{}': {}", path, e))
        })?;

        // Saving stops the domain
        self.domain_mut(uuid)?.id = None;
        Ok(())
    }

    fn restore(&mut self, path: &CStr) -> MockResult<()> {
        let path = path.to_string_lossy();
        let content = std::fs::read(Path::new(path.as_ref())).map_err(|e| {
            test_error(VIR_ERR_SYSTEM_ERROR, format!("failed to read '{}': {}", path, e))
        })?;
        let image: SaveImage = serde_json::from_slice(&content).map_err(|e| {
            test_error(VIR_ERR_OPERATION_FAILED, format!("'{}' is not a save image: {}", path, e))
        })?;

        if self.domain(&image.uuid).is_err() {
            let mut domain = MockDomain::new(&image.name);
            domain.uuid = image.uuid;
            self.domains.push(domain);
        }

        let domain = self.domain_mut(&image.uuid)?;
        domain.memory_kib = image.memory_kib;
        domain.vcpus = image.vcpus;
        domain.xml = image.xml;
        self.start(&image.uuid).map(|_| ())
    }
}

/// Mock native layer for testing.
///
/// Simulates a hypervisor host in memory without requiring libvirt.
/// Useful for:
/// - Unit and integration testing
/// - Development without libvirt installed
/// - Checking string and handle release discipline
pub struct MockNative {
    state: Mutex<MockState>,
}

impl MockNative {
    /// Create an empty mock host.
    pub fn new() -> Self {
        info!("Creating mock native layer");
        Self {
            state: Mutex::new(MockState {
                hostname: "mock-host".to_string(),
                capabilities: "<capabilities><host><cpu><arch>x86_64</arch></cpu></host></capabilities>"
                    .to_string(),
                node: NodeInfo {
                    model: "x86_64".to_string(),
                    memory_kib: 16 * 1024 * 1024,
                    cpus: 8,
                    mhz: 2400,
                    numa_nodes: 1,
                    sockets: 1,
                    cores: 4,
                    threads: 2,
                },
                domains: Vec::new(),
                next_id: 1,
                next_session: 1,
                sessions: HashSet::new(),
                injected: HashSet::new(),
                strings: HashSet::new(),
                domain_refs: 0,
                snapshot_refs: 0,
                errors: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock must not hide the books
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one native call: clear the caller's error slot, honour injected
    /// failures, and record the error on failure.
    fn call<T>(&self, call: MockCall, op: impl FnOnce(&mut MockState) -> MockResult<T>) -> Option<T> {
        let tid = thread::current().id();
        let mut state = self.lock();
        state.errors.remove(&tid);

        let result = if state.injected.remove(&call) {
            Err(test_error(
                VIR_ERR_OPERATION_FAILED,
                format!("injected failure in {:?}", call),
            ))
        } else {
            op(&mut state)
        };

        match result {
            Ok(value) => Some(value),
            Err(record) => {
                debug!(?call, error = %record, "Mock native call failed");
                state.errors.insert(tid, record);
                None
            }
        }
    }

    // =========================================================================
    // Host setup
    // =========================================================================

    /// Set the reported hostname.
    pub fn with_hostname(self, hostname: impl Into<String>) -> Self {
        self.lock().hostname = hostname.into();
        self
    }

    /// Set the reported capabilities document.
    pub fn with_capabilities(self, xml: impl Into<String>) -> Self {
        self.lock().capabilities = xml.into();
        self
    }

    /// Set the reported node information.
    pub fn with_node_info(self, node: NodeInfo) -> Self {
        self.lock().node = node;
        self
    }

    /// Define a domain, optionally starting it. Returns its UUID.
    pub fn add_domain(&self, name: &str, running: bool) -> Uuid {
        let mut state = self.lock();
        let domain = MockDomain::new(name);
        let uuid = domain.uuid;
        state.domains.push(domain);
        if running {
            // The domain was just pushed, so start cannot fail
            let _ = state.start(&uuid);
        }
        uuid
    }

    /// Define `count` domains named `<prefix>-<n>`.
    pub fn add_domains(&self, prefix: &str, count: usize, running: bool) {
        for n in 0..count {
            self.add_domain(&format!("{}-{}", prefix, n), running);
        }
    }

    /// Make the next call of `call` fail.
    pub fn fail_next(&self, call: MockCall) {
        self.lock().injected.insert(call);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Owned strings handed out and not yet released.
    pub fn outstanding_strings(&self) -> usize {
        self.lock().strings.len()
    }

    /// Domain handles looked up and not yet released.
    pub fn live_domain_handles(&self) -> usize {
        self.lock().domain_refs
    }

    /// Snapshot handles created and not yet released.
    pub fn live_snapshot_handles(&self) -> usize {
        self.lock().snapshot_refs
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Whether the named domain is running, or `None` if it does not exist.
    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.lock()
            .domains
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.id.is_some())
    }

    /// Names of the snapshots taken of the named domain.
    pub fn snapshots_of(&self, name: &str) -> Vec<String> {
        self.lock()
            .domains
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.snapshots.clone())
            .unwrap_or_default()
    }

    /// Hand out an owned string, as an owned-string call would.
    pub fn alloc_string(&self, s: &CStr) -> *mut c_char {
        self.lock().hand_over(s.to_owned())
    }
}

impl Default for MockNative {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a snapshot descriptor and pull out its `<name>`, if any.
fn parse_snapshot_xml(xml: &str) -> std::result::Result<Option<String>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut depth = 0usize;
    let mut root: Option<Vec<u8>> = None;
    let mut in_name = false;
    let mut name = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err("multiple root elements".to_string());
                    }
                    root = Some(e.name().as_ref().to_vec());
                }
                in_name = depth == 1 && e.name().as_ref() == b"name";
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if depth == 0 {
                    if root.is_some() {
                        return Err("multiple root elements".to_string());
                    }
                    root = Some(e.name().as_ref().to_vec());
                }
            }
            Ok(Event::End(_)) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unexpected closing tag".to_string())?;
                in_name = false;
            }
            Ok(Event::Text(t)) => {
                if depth == 0 {
                    return Err("text outside the root element".to_string());
                }
                if in_name {
                    let text = t.unescape().map_err(|e| e.to_string())?;
                    name = Some(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!("at position {}: {}", reader.buffer_position(), e));
            }
        }
    }

    if depth != 0 {
        return Err("unexpected end of document".to_string());
    }

    match root {
        Some(r) if r == b"domainsnapshot" => Ok(name),
        Some(r) => Err(format!(
            "unexpected root element <{}>, expecting <domainsnapshot>",
            String::from_utf8_lossy(&r)
        )),
        None => Err("document is empty".to_string()),
    }
}

unsafe impl NativeApi for MockNative {
    type Session = MockSession;
    type Domain = MockDomainRef;
    type Snapshot = MockSnapshotRef;

    fn open(&self, uri: &CStr) -> Option<MockSession> {
        self.call(MockCall::Open, |state| {
            let uri = uri.to_string_lossy();
            if !ACCEPTED_SCHEMES.iter().any(|s| uri.starts_with(s)) {
                return Err(ErrorRecord::new(
                    VIR_ERR_NO_CONNECT,
                    VIR_FROM_REMOTE,
                    format!("no connection driver available for {}", uri),
                ));
            }

            let id = state.next_session;
            state.next_session += 1;
            state.sessions.insert(id);
            Ok(MockSession { id })
        })
    }

    fn close(&self, session: MockSession) -> c_int {
        self.call(MockCall::Close, |state| {
            state.check_session(&session)?;
            state.sessions.remove(&session.id);
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn get_capabilities(&self, session: &MockSession) -> *mut c_char {
        self.call(MockCall::GetCapabilities, |state| {
            state.check_session(session)?;
            let caps = CString::new(state.capabilities.as_str())
                .map_err(|_| test_error(VIR_ERR_INTERNAL_ERROR, "capabilities contain NUL"))?;
            Ok(state.hand_over(caps))
        })
        .unwrap_or(std::ptr::null_mut())
    }

    fn get_hostname(&self, session: &MockSession) -> *mut c_char {
        self.call(MockCall::GetHostname, |state| {
            state.check_session(session)?;
            let hostname = CString::new(state.hostname.as_str())
                .map_err(|_| test_error(VIR_ERR_INTERNAL_ERROR, "hostname contains NUL"))?;
            Ok(state.hand_over(hostname))
        })
        .unwrap_or(std::ptr::null_mut())
    }

    fn get_node_info(&self, session: &MockSession, info: &mut RawNodeInfo) -> c_int {
        self.call(MockCall::GetNodeInfo, |state| {
            state.check_session(session)?;
            let node = &state.node;
            encode_fixed_str(&node.model, &mut info.model);
            info.memory = node.memory_kib;
            info.cpus = node.cpus;
            info.mhz = node.mhz;
            info.nodes = node.numa_nodes;
            info.sockets = node.sockets;
            info.cores = node.cores;
            info.threads = node.threads;
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn list_domains(&self, session: &MockSession, ids: &mut [c_int]) -> c_int {
        self.call(MockCall::ListDomains, |state| {
            state.check_session(session)?;
            let mut running: Vec<u32> = state.domains.iter().filter_map(|d| d.id).collect();
            running.sort_unstable();

            let mut written = 0;
            for (slot, id) in ids.iter_mut().zip(running) {
                *slot = c_int::try_from(id)
                    .map_err(|_| test_error(VIR_ERR_INTERNAL_ERROR, "domain id overflow"))?;
                written += 1;
            }
            Ok(written)
        })
        .unwrap_or(-1)
    }

    fn list_defined_domains(&self, session: &MockSession, names: &mut [*mut c_char]) -> c_int {
        self.call(MockCall::ListDefinedDomains, |state| {
            state.check_session(session)?;
            let inactive: Vec<CString> = state
                .domains
                .iter()
                .filter(|d| d.id.is_none())
                .take(names.len())
                .map(|d| CString::new(d.name.as_str()))
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| test_error(VIR_ERR_INTERNAL_ERROR, "domain name contains NUL"))?;

            let mut written = 0;
            for (slot, name) in names.iter_mut().zip(inactive) {
                *slot = state.hand_over(name);
                written += 1;
            }
            Ok(written)
        })
        .unwrap_or(-1)
    }

    fn lookup_domain_by_id(&self, session: &MockSession, id: c_int) -> Option<MockDomainRef> {
        self.call(MockCall::LookupById, |state| {
            state.check_session(session)?;
            let uuid = u32::try_from(id)
                .ok()
                .and_then(|id| state.domains.iter().find(|d| d.id == Some(id)))
                .map(|d| d.uuid);
            state.found(uuid, format!("no domain with matching id {}", id))
        })
    }

    fn lookup_domain_by_name(&self, session: &MockSession, name: &CStr) -> Option<MockDomainRef> {
        self.call(MockCall::LookupByName, |state| {
            state.check_session(session)?;
            let name = name.to_string_lossy();
            let uuid = state.domains.iter().find(|d| d.name == name).map(|d| d.uuid);
            state.found(uuid, format!("no domain with matching name '{}'", name))
        })
    }

    fn lookup_domain_by_uuid(&self, session: &MockSession, uuid: &CStr) -> Option<MockDomainRef> {
        self.call(MockCall::LookupByUuid, |state| {
            state.check_session(session)?;
            let text = uuid.to_string_lossy();
            let parsed = Uuid::parse_str(&text)
                .map_err(|_| test_error(VIR_ERR_INVALID_ARG, format!("invalid uuid '{}'", text)))?;
            let found = state.domains.iter().find(|d| d.uuid == parsed).map(|d| d.uuid);
            state.found(found, format!("no domain with matching uuid '{}'", text))
        })
    }

    fn domain_restore(&self, session: &MockSession, path: &CStr) -> c_int {
        self.call(MockCall::Restore, |state| {
            state.check_session(session)?;
            state.restore(path)?;
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn domain_get_name(&self, domain: &MockDomainRef) -> *const c_char {
        self.call(MockCall::GetName, |state| {
            state.domain(&domain.uuid)?;
            Ok(domain.name.as_ptr())
        })
        .unwrap_or(std::ptr::null())
    }

    fn domain_get_uuid(&self, domain: &MockDomainRef, buf: &mut [c_char]) -> c_int {
        self.call(MockCall::GetUuid, |state| {
            let uuid = state.domain(&domain.uuid)?.uuid.to_string();
            if buf.len() <= uuid.len() {
                return Err(test_error(VIR_ERR_INVALID_ARG, "uuid buffer too small"));
            }
            encode_fixed_str(&uuid, buf);
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn domain_snapshot_create_xml(
        &self,
        domain: &MockDomainRef,
        xml: &CStr,
        _flags: c_uint,
    ) -> Option<MockSnapshotRef> {
        self.call(MockCall::SnapshotCreate, |state| {
            let xml = xml.to_string_lossy();
            let parsed = parse_snapshot_xml(&xml).map_err(|e| {
                ErrorRecord::new(
                    VIR_ERR_XML_ERROR,
                    VIR_FROM_DOMAIN_SNAPSHOT,
                    format!("XML error: {}", e),
                )
            })?;

            let target = state.domain_mut(&domain.uuid)?;
            let name = parsed.unwrap_or_else(|| format!("snapshot-{}", target.snapshots.len() + 1));
            if target.snapshots.contains(&name) {
                return Err(ErrorRecord::new(
                    VIR_ERR_OPERATION_INVALID,
                    VIR_FROM_DOMAIN_SNAPSHOT,
                    format!("snapshot '{}' already exists", name),
                ));
            }
            target.snapshots.push(name.clone());
            state.snapshot_refs += 1;

            Ok(MockSnapshotRef {
                domain: domain.uuid,
                name,
            })
        })
    }

    fn domain_save(&self, domain: &MockDomainRef, path: &CStr) -> c_int {
        self.call(MockCall::Save, |state| {
            state.save(&domain.uuid, path, None, 0)?;
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn domain_save_flags(
        &self,
        domain: &MockDomainRef,
        path: &CStr,
        dxml: Option<&CStr>,
        flags: c_uint,
    ) -> c_int {
        self.call(MockCall::SaveFlags, |state| {
            state.save(&domain.uuid, path, dxml, flags)?;
            Ok(0)
        })
        .unwrap_or(-1)
    }

    fn domain_free(&self, domain: MockDomainRef) {
        let mut state = self.lock();
        state.domain_refs = state
            .domain_refs
            .checked_sub(1)
            .unwrap_or_else(|| panic!("domain handle {} released twice", domain.uuid));
    }

    fn snapshot_free(&self, snapshot: MockSnapshotRef) {
        let mut state = self.lock();
        state.snapshot_refs = state.snapshot_refs.checked_sub(1).unwrap_or_else(|| {
            panic!(
                "snapshot handle {} of {} released twice",
                snapshot.name, snapshot.domain
            )
        });
    }

    unsafe fn free_string(&self, s: *mut c_char) {
        let known = self.lock().strings.remove(&(s as usize));
        assert!(known, "string {:p} released twice or never handed out", s);
        drop(CString::from_raw(s));
    }

    fn last_error(&self) -> Option<ErrorRecord> {
        self.lock().errors.get(&thread::current().id()).cloned()
    }

    fn reset_error(&self) {
        self.lock().errors.remove(&thread::current().id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(api: &MockNative) -> MockSession {
        api.open(&CString::new("test:///default").unwrap()).unwrap()
    }

    #[test]
    fn test_snapshot_xml_validation() {
        assert_eq!(
            parse_snapshot_xml("<domainsnapshot><name>before-upgrade</name></domainsnapshot>"),
            Ok(Some("before-upgrade".to_string()))
        );
        assert_eq!(parse_snapshot_xml("<domainsnapshot/>"), Ok(None));
        assert!(parse_snapshot_xml("").is_err());
        assert!(parse_snapshot_xml("not xml at all").is_err());
        assert!(parse_snapshot_xml("<domainsnapshot><name>x</name>").is_err());
        assert!(parse_snapshot_xml("<domain><name>x</name></domain>").is_err());
        assert!(parse_snapshot_xml("<domainsnapshot></wrong>").is_err());
    }

    #[test]
    fn test_every_call_resets_error_slot() {
        let api = MockNative::new();
        assert!(api.open(&CString::new("bogus://").unwrap()).is_none());
        assert!(api.last_error().is_some());

        let session = open(&api);
        assert!(api.last_error().is_none());
        assert_eq!(api.close(session), 0);
    }

    #[test]
    fn test_error_slot_is_per_thread() {
        let api = std::sync::Arc::new(MockNative::new());
        api.fail_next(MockCall::Open);
        assert!(api.open(&CString::new("test:///default").unwrap()).is_none());

        let other = std::sync::Arc::clone(&api);
        let seen = thread::spawn(move || other.last_error()).join().unwrap();
        assert!(seen.is_none());
        assert!(api.last_error().is_some());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let api = MockNative::new();
        api.fail_next(MockCall::GetHostname);
        let session = open(&api);

        assert!(api.get_hostname(&session).is_null());
        let record = api.last_error().unwrap();
        assert_eq!(record.code, VIR_ERR_OPERATION_FAILED);
        assert_eq!(record.domain, VIR_FROM_TEST);

        let name = api.get_hostname(&session);
        assert!(!name.is_null());
        unsafe { api.free_string(name) };
        api.close(session);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_free_panics() {
        let api = MockNative::new();
        let s = api.alloc_string(&CString::new("x").unwrap());
        unsafe {
            api.free_string(s);
            api.free_string(s);
        }
    }

    #[test]
    fn test_close_releases_session() {
        let api = MockNative::new();
        let first = open(&api);
        let second = open(&api);
        assert_eq!(api.open_sessions(), 2);

        assert_eq!(api.close(first), 0);
        assert_eq!(api.open_sessions(), 1);
        let name = api.get_hostname(&second);
        assert!(!name.is_null());
        unsafe { api.free_string(name) };
        assert_eq!(api.close(second), 0);
        assert_eq!(api.open_sessions(), 0);
    }
}
