//! Server-path scanner tests over a scripted remote session.

mod util;

use std::sync::Arc;

use util::{Script, ScriptedDialer};

use fleetmon::mib::{ScanError, scan_server_path};
use fleetmon::model::{MibFileStatus, MibSource, PathStatus, ServerPath};
use fleetmon::ops::CancelToken;
use fleetmon::remote::Dialer;
use fleetmon::store::{RecordStore, SqliteStore};

fn sample_path() -> ServerPath {
    ServerPath {
        id: None,
        name: "core-mibs".into(),
        host: "192.0.2.20".into(),
        path: "/opt/mibs".into(),
        ssh_port: 22,
        username: "ops".into(),
        password: "secret".into(),
        status: PathStatus::Disconnected,
        last_scan: None,
        file_count: 0,
    }
}

fn setup(dialer: ScriptedDialer) -> (Arc<dyn RecordStore>, Arc<dyn Dialer>, i64) {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let id = store.insert_server_path(&sample_path()).unwrap();
    (store, Arc::new(dialer) as Arc<dyn Dialer>, id)
}

#[test]
fn scan_records_discovered_files() {
    let script = Script::default()
        .respond("find", "/opt/mibs/CISCO-RTTMON.mib\n/opt/mibs/notes.txt\n\n")
        .respond("stat -c", "2048 1700000000\n");
    let (store, dialer, id) = setup(ScriptedDialer::new(script));

    let count = scan_server_path(&store, &dialer, id, &CancelToken::new()).unwrap();
    assert_eq!(count, 2);

    let record = store.get_server_path(id).unwrap();
    assert_eq!(record.status, PathStatus::Connected);
    assert_eq!(record.file_count, 2);
    assert!(record.last_scan.is_some());

    let mibs = store.list_mib_files().unwrap();
    assert_eq!(mibs.len(), 2);
    for mib in &mibs {
        assert_eq!(mib.source, MibSource::Server);
        // Content stays remote; classification is deferred.
        assert_eq!(mib.status, MibFileStatus::Pending);
        assert_eq!(mib.size, 2048);
        assert_eq!(mib.archive_id, None);
    }
    assert!(mibs.iter().any(|m| m.filename == "CISCO-RTTMON.mib"));
}

#[test]
fn stat_failures_skip_files_without_failing_the_scan() {
    let script = Script::default()
        .respond("find", "/opt/mibs/one.mib\n/opt/mibs/two.mib\n")
        .fail_on("stat");
    let (store, dialer, id) = setup(ScriptedDialer::new(script));

    let count = scan_server_path(&store, &dialer, id, &CancelToken::new()).unwrap();
    assert_eq!(count, 0, "all stats failed, all files skipped");
    assert_eq!(
        store.get_server_path(id).unwrap().status,
        PathStatus::Connected
    );
    assert!(store.list_mib_files().unwrap().is_empty());
}

#[test]
fn listing_failure_marks_path_error() {
    let script = Script::default().fail_on("find");
    let (store, dialer, id) = setup(ScriptedDialer::new(script));

    let err = scan_server_path(&store, &dialer, id, &CancelToken::new())
        .expect_err("listing fails");
    assert!(matches!(err, ScanError::Listing(_)));

    let record = store.get_server_path(id).unwrap();
    assert_eq!(record.status, PathStatus::Error);
    assert!(record.last_scan.is_none());
}

#[test]
fn connect_failure_marks_path_error() {
    let (store, dialer, id) = setup(ScriptedDialer::refusing());

    let err =
        scan_server_path(&store, &dialer, id, &CancelToken::new()).expect_err("unreachable");
    assert!(matches!(err, ScanError::Connect(_)));
    assert_eq!(store.get_server_path(id).unwrap().status, PathStatus::Error);
}

#[test]
fn cancelled_scan_marks_path_error() {
    let script = Script::default()
        .respond("find", "/opt/mibs/one.mib\n")
        .respond("stat -c", "10 1700000000\n");
    let (store, dialer, id) = setup(ScriptedDialer::new(script));

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = scan_server_path(&store, &dialer, id, &cancel).expect_err("cancelled");
    assert!(matches!(err, ScanError::Cancelled));
    assert_eq!(store.get_server_path(id).unwrap().status, PathStatus::Error);
}
