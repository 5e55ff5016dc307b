//! Integration tests for connections.
//!
//! These tests drive the public API against the in-memory native layer.

use std::sync::{Arc, Mutex};
use std::thread;

use limiquantix_virt::mock::{VIR_ERR_NO_CONNECT, VIR_ERR_NO_DOMAIN, VIR_FROM_REMOTE, VIR_FROM_TEST};
use limiquantix_virt::{
    Connection, DomainId, MockCall, MockNative, NativeApi, NodeInfo, VirtConfig, VirtError,
    LIST_CAPACITY,
};

const URI: &str = "test:///default";

fn setup() -> Arc<MockNative> {
    limiquantix_common::init_test_logging();
    Arc::new(MockNative::new())
}

/// Open then close leaves nothing behind in the error slot.
#[test]
fn test_open_close_leaves_no_stale_error() {
    let api = setup();

    // A failure from before the open must not survive it
    assert!(Connection::open(Arc::clone(&api), "bogus://nowhere").is_err());

    let conn = Connection::open(Arc::clone(&api), URI).unwrap();
    assert_eq!(conn.uri(), URI);
    assert_eq!(api.open_sessions(), 1);
    conn.close().unwrap();

    assert!(api.last_error().is_none());
    assert_eq!(api.open_sessions(), 0);
}

#[test]
fn test_open_failure_carries_native_record() {
    let api = setup();

    let err = Connection::open(Arc::clone(&api), "bogus://nowhere").unwrap_err();
    match &err {
        VirtError::OpenFailed { uri, record } => {
            assert_eq!(uri, "bogus://nowhere");
            assert_eq!(record.code, VIR_ERR_NO_CONNECT);
            assert_eq!(record.domain, VIR_FROM_REMOTE);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("[Code-5] [Domain-13]"));

    // The failure was drained
    assert!(api.last_error().is_none());
    assert_eq!(api.open_sessions(), 0);
}

#[test]
fn test_uri_with_nul_is_rejected_before_native_call() {
    let api = setup();
    let err = Connection::open(Arc::clone(&api), "test:///de\0fault").unwrap_err();
    assert!(matches!(err, VirtError::InvalidArgument(_)));
    assert_eq!(api.open_sessions(), 0);
}

#[test]
fn test_open_with_config() {
    let api = setup();
    let config = VirtConfig::default().with_uri("mock:///lab");

    let conn = Connection::open_with_config(api, &config).unwrap();
    assert_eq!(conn.uri(), "mock:///lab");
}

#[test]
fn test_drop_closes_connection() {
    let api = setup();
    {
        let _conn = Connection::open(Arc::clone(&api), URI).unwrap();
        assert_eq!(api.open_sessions(), 1);
    }
    assert_eq!(api.open_sessions(), 0);
}

#[test]
fn test_close_failure() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    api.fail_next(MockCall::Close);
    let err = conn.close().unwrap_err();
    assert!(matches!(err, VirtError::CloseFailed(ref r) if r.is_set()));
}

#[test]
fn test_drop_survives_close_failure() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    api.fail_next(MockCall::Close);
    drop(conn);

    // The failure was logged and drained, not left for the next call
    assert!(api.last_error().is_none());

    let conn = Connection::open(Arc::clone(&api), URI).unwrap();
    assert_eq!(conn.hostname().unwrap(), "mock-host");
}

#[test]
fn test_host_queries() {
    let node = NodeInfo {
        model: "Intel(R) Xeon(R) Gold 6338 CPU @ 2.00GHz".to_string(),
        memory_kib: 256 * 1024 * 1024,
        cpus: 64,
        mhz: 2000,
        numa_nodes: 2,
        sockets: 1,
        cores: 16,
        threads: 2,
    };
    let api = Arc::new(
        MockNative::new()
            .with_hostname("kvm-07.lab")
            .with_capabilities("<capabilities><host/></capabilities>")
            .with_node_info(node.clone()),
    );
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    assert_eq!(conn.hostname().unwrap(), "kvm-07.lab");
    assert_eq!(conn.capabilities().unwrap(), "<capabilities><host/></capabilities>");

    // The model field is 32 bytes wide and gets truncated
    let info = conn.node_info().unwrap();
    assert_eq!(info.model, "Intel(R) Xeon(R) Gold 6338 CPU ");
    assert_eq!(info.memory_kib, node.memory_kib);
    assert_eq!(info.cpus, 64);
    assert_eq!(info.topology_cpus(), 64);

    // Owned strings were released after copying
    assert_eq!(api.outstanding_strings(), 0);
}

#[test]
fn test_query_failures() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    api.fail_next(MockCall::GetCapabilities);
    assert!(matches!(
        conn.capabilities(),
        Err(VirtError::QueryFailed { what: "capabilities", .. })
    ));

    api.fail_next(MockCall::GetHostname);
    assert!(matches!(
        conn.hostname(),
        Err(VirtError::QueryFailed { what: "hostname", .. })
    ));

    api.fail_next(MockCall::GetNodeInfo);
    assert!(matches!(
        conn.node_info(),
        Err(VirtError::QueryFailed { what: "node info", .. })
    ));

    assert_eq!(api.outstanding_strings(), 0);
    assert!(api.last_error().is_none());
}

#[test]
fn test_list_domains_counts() {
    for k in [0usize, 1, 7, LIST_CAPACITY] {
        let api = setup();
        api.add_domains("vm", k, true);
        let conn = Connection::open(Arc::clone(&api), URI).unwrap();

        let ids = conn.list_domains().unwrap();
        assert_eq!(ids.len(), k);

        // IDs are assigned from 1 and reported in order
        let expected: Vec<DomainId> = (1..=k as u32).map(DomainId).collect();
        assert_eq!(ids, expected);
    }
}

#[test]
fn test_list_domains_truncates_at_capacity() {
    let api = setup();
    api.add_domains("vm", LIST_CAPACITY + 76, true);
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    let ids = conn.list_domains().unwrap();
    assert_eq!(ids.len(), LIST_CAPACITY);
    assert_eq!(ids.first(), Some(&DomainId(1)));
    assert_eq!(ids.last(), Some(&DomainId(LIST_CAPACITY as u32)));
}

#[test]
fn test_list_domains_skips_inactive() {
    let api = setup();
    api.add_domain("web-01", true);
    api.add_domain("db-01", false);
    api.add_domain("web-02", true);
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    assert_eq!(conn.list_domains().unwrap(), vec![DomainId(1), DomainId(2)]);
    assert_eq!(conn.list_defined_domains().unwrap(), vec!["db-01"]);
}

#[test]
fn test_list_defined_domains_releases_every_string() {
    for k in [0usize, 1, 100, LIST_CAPACITY, LIST_CAPACITY + 5] {
        let api = setup();
        api.add_domains("stopped", k, false);
        let conn = Connection::open(Arc::clone(&api), URI).unwrap();

        let names = conn.list_defined_domains().unwrap();
        assert_eq!(names.len(), k.min(LIST_CAPACITY));
        if k > 0 {
            assert_eq!(names[0], "stopped-0");
        }
        assert_eq!(api.outstanding_strings(), 0, "leaked strings for k = {}", k);
    }
}

#[test]
fn test_list_failures() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    api.fail_next(MockCall::ListDomains);
    let err = conn.list_domains().unwrap_err();
    assert!(matches!(err, VirtError::ListFailed { what: "active domains", .. }));

    api.fail_next(MockCall::ListDefinedDomains);
    let err = conn.list_defined_domains().unwrap_err();
    assert!(matches!(err, VirtError::ListFailed { what: "defined domains", .. }));
    assert_eq!(api.outstanding_strings(), 0);
}

#[test]
fn test_lookup_not_found() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    let err = conn.lookup_domain_by_name("missing").unwrap_err();
    match err {
        VirtError::NotFound { key, record } => {
            assert_eq!(key, "missing");
            assert_eq!(record.code, VIR_ERR_NO_DOMAIN);
            assert_eq!(record.domain, VIR_FROM_TEST);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(matches!(
        conn.lookup_domain_by_id(DomainId(99)),
        Err(VirtError::NotFound { .. })
    ));
    assert!(matches!(
        conn.lookup_domain_by_uuid(&uuid::Uuid::new_v4()),
        Err(VirtError::NotFound { .. })
    ));
    assert_eq!(api.live_domain_handles(), 0);
}

#[test]
fn test_lookup_id_out_of_native_range() {
    let api = setup();
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    let err = conn.lookup_domain_by_id(DomainId(u32::MAX)).unwrap_err();
    assert!(matches!(err, VirtError::InvalidArgument(_)));
}

/// Every injected native failure surfaces a record with real code and domain.
#[test]
fn test_every_failure_has_a_record() {
    let api = setup();
    api.add_domain("web-01", true);
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    let calls = [
        MockCall::GetCapabilities,
        MockCall::GetHostname,
        MockCall::GetNodeInfo,
        MockCall::ListDomains,
        MockCall::ListDefinedDomains,
        MockCall::LookupById,
        MockCall::LookupByName,
        MockCall::LookupByUuid,
        MockCall::Restore,
    ];

    for call in calls {
        api.fail_next(call);
        let err = match call {
            MockCall::GetCapabilities => conn.capabilities().map(|_| ()),
            MockCall::GetHostname => conn.hostname().map(|_| ()),
            MockCall::GetNodeInfo => conn.node_info().map(|_| ()),
            MockCall::ListDomains => conn.list_domains().map(|_| ()),
            MockCall::ListDefinedDomains => conn.list_defined_domains().map(|_| ()),
            MockCall::LookupById => conn.lookup_domain_by_id(DomainId(1)).map(|_| ()),
            MockCall::LookupByName => conn.lookup_domain_by_name("web-01").map(|_| ()),
            MockCall::LookupByUuid => conn.lookup_domain_by_uuid(&uuid::Uuid::nil()).map(|_| ()),
            _ => conn.restore("/nonexistent/web-01.save"),
        }
        .unwrap_err();

        let record = err.record().expect("native failure must carry a record");
        assert!(record.is_set(), "{:?} produced an empty record", call);
        assert!(api.last_error().is_none());
    }
}

#[test]
fn test_connection_moves_between_threads() {
    let api = setup();
    api.add_domain("web-01", true);
    let conn = Connection::open(Arc::clone(&api), URI).unwrap();

    let hostname = thread::spawn(move || conn.hostname().unwrap())
        .join()
        .unwrap();
    assert_eq!(hostname, "mock-host");
}

#[test]
fn test_connection_shared_behind_mutex() {
    let api = setup();
    api.add_domains("vm", 3, true);
    let conn = Arc::new(Mutex::new(Connection::open(Arc::clone(&api), URI).unwrap()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                let guard = conn.lock().unwrap();
                guard.list_domains().unwrap().len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
}

#[test]
fn test_libvirt_layer_matches_feature() {
    assert_eq!(limiquantix_virt::libvirt::is_available(), cfg!(feature = "libvirt"));
}
