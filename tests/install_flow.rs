//! Install state-machine tests over a scripted remote session.
//!
//! The fake dialer plays canned command responses so the whole job lifecycle
//! runs without a network; a recording store wrapper captures every persisted
//! job transition so ordering and monotonicity can be asserted exactly.

mod util;

use std::sync::Arc;

use parking_lot::Mutex;
use util::{Script, ScriptedDialer};

use fleetmon::model::{
    AuthMethod, ComponentSpec, Host, HostStatus, InstallJob, JobStatus, MibArchive, MibFile,
    ServerPath,
};
use fleetmon::ops::CancelToken;
use fleetmon::provision::{InstallError, Installer, ServiceState, verify_host};
use fleetmon::remote::Dialer;
use fleetmon::store::{RecordStore, SqliteStore, StoreError};

// ---------------------------------------------------------------------------
// Recording store wrapper
// ---------------------------------------------------------------------------

/// Delegates to sqlite while recording every job (status, progress) write.
struct RecordingStore {
    inner: SqliteStore,
    job_updates: Mutex<Vec<(JobStatus, u8)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().expect("in-memory store"),
            job_updates: Mutex::new(Vec::new()),
        }
    }

    /// Distinct statuses in the order they were first persisted.
    fn observed_statuses(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = Vec::new();
        for (status, _) in self.job_updates.lock().iter() {
            if statuses.last() != Some(status) {
                statuses.push(*status);
            }
        }
        statuses
    }

    fn progress_was_monotonic(&self) -> bool {
        self.job_updates
            .lock()
            .windows(2)
            .all(|pair| pair[0].1 <= pair[1].1)
    }
}

impl RecordStore for RecordingStore {
    fn insert_host(&self, host: &Host) -> Result<i64, StoreError> {
        self.inner.insert_host(host)
    }
    fn get_host(&self, id: i64) -> Result<Host, StoreError> {
        self.inner.get_host(id)
    }
    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.inner.list_hosts()
    }
    fn update_host(&self, host: &Host) -> Result<(), StoreError> {
        self.inner.update_host(host)
    }
    fn set_host_status(
        &self,
        id: i64,
        status: HostStatus,
        last_seen: Option<i64>,
    ) -> Result<(), StoreError> {
        self.inner.set_host_status(id, status, last_seen)
    }
    fn insert_job(&self, job: &InstallJob) -> Result<i64, StoreError> {
        self.inner.insert_job(job)
    }
    fn get_job(&self, id: i64) -> Result<InstallJob, StoreError> {
        self.inner.get_job(id)
    }
    fn list_jobs(&self) -> Result<Vec<InstallJob>, StoreError> {
        self.inner.list_jobs()
    }
    fn update_job(&self, job: &InstallJob) -> Result<(), StoreError> {
        self.job_updates.lock().push((job.status, job.progress));
        self.inner.update_job(job)
    }
    fn insert_archive(&self, archive: &MibArchive) -> Result<i64, StoreError> {
        self.inner.insert_archive(archive)
    }
    fn get_archive(&self, id: i64) -> Result<MibArchive, StoreError> {
        self.inner.get_archive(id)
    }
    fn list_archives(&self) -> Result<Vec<MibArchive>, StoreError> {
        self.inner.list_archives()
    }
    fn update_archive(&self, archive: &MibArchive) -> Result<(), StoreError> {
        self.inner.update_archive(archive)
    }
    fn insert_mib_file(&self, file: &MibFile) -> Result<i64, StoreError> {
        self.inner.insert_mib_file(file)
    }
    fn list_mib_files(&self) -> Result<Vec<MibFile>, StoreError> {
        self.inner.list_mib_files()
    }
    fn list_mib_files_for_archive(&self, archive_id: i64) -> Result<Vec<MibFile>, StoreError> {
        self.inner.list_mib_files_for_archive(archive_id)
    }
    fn insert_server_path(&self, path: &ServerPath) -> Result<i64, StoreError> {
        self.inner.insert_server_path(path)
    }
    fn get_server_path(&self, id: i64) -> Result<ServerPath, StoreError> {
        self.inner.get_server_path(id)
    }
    fn list_server_paths(&self) -> Result<Vec<ServerPath>, StoreError> {
        self.inner.list_server_paths()
    }
    fn update_server_path(&self, path: &ServerPath) -> Result<(), StoreError> {
        self.inner.update_server_path(path)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn sample_host() -> Host {
    Host::new(
        "edge-1",
        "192.0.2.10",
        22,
        "ops",
        AuthMethod::Password {
            password: "secret".into(),
        },
    )
}

fn node_exporter() -> ComponentSpec {
    fleetmon::catalog::find("node_exporter")
        .expect("catalog entry")
        .clone()
}

fn happy_script() -> Script {
    Script::default().respond("uname -m", "x86_64\n")
}

struct Harness {
    store: Arc<RecordingStore>,
    dialer: Arc<ScriptedDialer>,
    installer: Installer,
    host_id: i64,
    job_id: i64,
}

impl Harness {
    fn store_dyn(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store) as Arc<dyn RecordStore>
    }

    fn dialer_dyn(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.dialer) as Arc<dyn Dialer>
    }
}

fn harness(dialer: ScriptedDialer) -> Harness {
    let store = Arc::new(RecordingStore::new());
    let dialer = Arc::new(dialer);
    let installer = Installer::new(
        Arc::clone(&dialer) as Arc<dyn Dialer>,
        Arc::clone(&store) as Arc<dyn RecordStore>,
    );

    let host_id = store.insert_host(&sample_host()).unwrap();
    let job_id = installer.create_job(host_id, &node_exporter()).unwrap();

    Harness {
        store,
        dialer,
        installer,
        host_id,
        job_id,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn successful_install_walks_every_stage_in_order() {
    let h = harness(ScriptedDialer::new(happy_script()));
    h.installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .expect("install succeeds");

    let job = h.store.get_job(h.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert!(job.finished_at.is_some());

    // Exactly the full sequence, nothing skipped.
    assert_eq!(
        h.store.observed_statuses(),
        vec![
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::Installing,
            JobStatus::Configuring,
            JobStatus::Starting,
            JobStatus::Completed,
        ]
    );
    assert!(h.store.progress_was_monotonic());
    assert!(h.dialer.saw_close());

    // Command sequence mirrors the lifecycle.
    let executed = h.dialer.executed();
    let expect_order = [
        "uname -m",
        "wget -O /tmp/node_exporter",
        "chmod +x /tmp/node_exporter",
        "sudo mv /tmp/node_exporter /usr/local/bin/",
        "sudo tee /etc/systemd/system/node_exporter.service",
        "sudo systemctl daemon-reload",
        "sudo systemctl enable node_exporter",
        "sudo systemctl start node_exporter",
    ];
    let mut cursor = 0;
    for needle in expect_order {
        let pos = executed[cursor..]
            .iter()
            .position(|cmd| cmd.contains(needle))
            .unwrap_or_else(|| panic!("missing `{needle}` after index {cursor}"));
        cursor += pos + 1;
    }
}

#[test]
fn install_records_architecture_on_host() {
    let h = harness(ScriptedDialer::new(happy_script()));
    h.installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .unwrap();
    let host = h.store.get_host(h.host_id).unwrap();
    assert_eq!(host.architecture, "x86_64");
}

#[test]
fn failed_download_freezes_job_below_starting() {
    let h = harness(ScriptedDialer::new(happy_script().fail_on("wget")));

    let err = h
        .installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .expect_err("download fails");
    assert!(matches!(err, InstallError::StepFailed(_)));

    let job = h.store.get_job(h.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.progress < 100);
    let error = job.error.expect("error message recorded");
    assert!(error.contains("wget"), "error should name the command: {error}");

    // Earlier log lines survive the failure.
    assert!(job.log.iter().any(|l| l.contains("queued")));
    assert!(job.log.iter().any(|l| l.contains("Connecting")));

    // Starting (and beyond) is never recorded.
    let statuses = h.store.observed_statuses();
    assert!(!statuses.contains(&JobStatus::Starting));
    assert!(!statuses.contains(&JobStatus::Completed));
    assert_eq!(statuses.last(), Some(&JobStatus::Failed));
}

#[test]
fn failure_is_reachable_from_configuring() {
    let h = harness(ScriptedDialer::new(happy_script().fail_on("tee")));
    h.installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .expect_err("unit install fails");

    let statuses = h.store.observed_statuses();
    assert!(statuses.contains(&JobStatus::Configuring));
    assert!(!statuses.contains(&JobStatus::Starting));
    assert_eq!(statuses.last(), Some(&JobStatus::Failed));
}

#[test]
fn connect_failure_fails_job_with_context() {
    let h = harness(ScriptedDialer::refusing());
    let err = h
        .installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .expect_err("connect fails");
    assert!(matches!(err, InstallError::StepFailed(_)));

    let job = h.store.get_job(h.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("connection failed"));
}

#[test]
fn cancelled_job_lands_on_failed() {
    let h = harness(ScriptedDialer::new(happy_script()));
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = h
        .installer
        .run_job(h.job_id, &node_exporter(), &cancel)
        .expect_err("cancelled");
    assert!(matches!(err, InstallError::Cancelled));

    let job = h.store.get_job(h.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("cancelled"));
}

#[test]
fn terminal_job_cannot_be_rerun() {
    let h = harness(ScriptedDialer::new(happy_script()));
    h.installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .unwrap();
    let err = h
        .installer
        .run_job(h.job_id, &node_exporter(), &CancelToken::new())
        .expect_err("terminal job");
    assert!(matches!(err, InstallError::JobNotPending { .. }));
}

#[test]
fn service_status_maps_supervisor_answers() {
    // Active answer.
    let h = harness(ScriptedDialer::new(
        Script::default().respond("is-active", "active\n"),
    ));
    let host = h.store.get_host(h.host_id).unwrap();
    assert_eq!(
        h.installer.service_status(&host, "node_exporter").unwrap(),
        ServiceState::Active
    );

    // Non-zero exit (stopped or unknown unit) is the normal value Inactive.
    let h = harness(ScriptedDialer::new(Script::default().fail_on("is-active")));
    let host = h.store.get_host(h.host_id).unwrap();
    assert_eq!(
        h.installer.service_status(&host, "ghost_service").unwrap(),
        ServiceState::Inactive
    );
}

#[test]
fn service_start_and_stop_issue_commands() {
    let h = harness(ScriptedDialer::new(happy_script()));
    let host = h.store.get_host(h.host_id).unwrap();
    h.installer.service_start(&host, "node_exporter").unwrap();
    h.installer.service_stop(&host, "node_exporter").unwrap();
    let executed = h.dialer.executed();
    assert!(executed.iter().any(|c| c == "sudo systemctl start node_exporter"));
    assert!(executed.iter().any(|c| c == "sudo systemctl stop node_exporter"));
}

#[test]
fn verify_host_records_observed_facts() {
    let h = harness(ScriptedDialer::new(
        Script::default()
            .respond("whoami", "ops\n")
            .respond("uname -s", "Linux\n")
            .respond("uname -m", "aarch64\n"),
    ));

    let host = verify_host(&h.store_dyn(), &h.dialer_dyn(), h.host_id).unwrap();
    assert_eq!(host.os, "Linux");
    assert_eq!(host.architecture, "aarch64");
    assert_eq!(host.status, HostStatus::Connected);
    assert!(host.last_seen.is_some());
}

#[test]
fn verify_failure_marks_host_error() {
    let h = harness(ScriptedDialer::refusing());
    verify_host(&h.store_dyn(), &h.dialer_dyn(), h.host_id).expect_err("unreachable");
    let host = h.store.get_host(h.host_id).unwrap();
    assert_eq!(host.status, HostStatus::Error);
}
