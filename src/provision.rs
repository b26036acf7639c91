//! Component provisioning over remote sessions.
//!
//! The installer drives one [`InstallJob`] through its fixed state machine:
//!
//! ```text
//! pending -> downloading -> installing -> configuring -> starting
//!                 |              |             |            |
//!                 +--------------+------+------+------------+
//!                                       v
//!                            failed  (completed on success)
//! ```
//!
//! A single session is held for the whole job; every step is one or more
//! remote commands. A failing step moves the job straight to `failed` with
//! the offending command's combined output preserved and all prior log lines
//! intact. The one-shot service operations (`status`/`start`/`stop`) each
//! open and tear down their own session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{ComponentSpec, Host, HostStatus, InstallJob, JobStatus, now_ts};
use crate::ops::CancelToken;
use crate::remote::{ConnectError, Dialer, ExecError, HostTarget, RemoteShell};
use crate::store::{RecordStore, StoreError};

/// Remote directory the binary is fetched into before relocation.
const REMOTE_TMP_DIR: &str = "/tmp";
/// Final binary location (privilege-escalated move).
const REMOTE_BIN_DIR: &str = "/usr/local/bin";
/// Where the supervision unit is installed.
const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// Errors from provisioning operations.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("remote command failed: {0}")]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {id} is {status:?}, not pending")]
    JobNotPending { id: i64, status: JobStatus },

    #[error("install step failed: {0}")]
    StepFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Supervisor-reported state of a managed service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Active,
    /// Also covers "service not found" - the supervisor not knowing the unit
    /// is a normal answer, not an error.
    Inactive,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Outcome of one drive attempt, before it is folded into the job record.
enum DriveError {
    Step(String),
    Store(StoreError),
    Cancelled,
}

impl From<StoreError> for DriveError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Orchestrates component installation and service control on fleet hosts.
pub struct Installer {
    dialer: Arc<dyn Dialer>,
    store: Arc<dyn RecordStore>,
}

impl Installer {
    pub fn new(dialer: Arc<dyn Dialer>, store: Arc<dyn RecordStore>) -> Self {
        Self { dialer, store }
    }

    /// Create the pending job record for one host+component pair.
    pub fn create_job(&self, host_id: i64, component: &ComponentSpec) -> Result<i64, InstallError> {
        let mut job = InstallJob::new(host_id, component.id.clone());
        job.log.push(format!("Installation of {} queued", component.name));
        let id = self.store.insert_job(&job)?;
        Ok(id)
    }

    /// Drive a pending job to a terminal state.
    ///
    /// The job's outcome is always recorded on the job record; the returned
    /// error exists so launchers can log it.
    pub fn run_job(
        &self,
        job_id: i64,
        component: &ComponentSpec,
        cancel: &CancelToken,
    ) -> Result<(), InstallError> {
        let mut job = self.store.get_job(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(InstallError::JobNotPending {
                id: job_id,
                status: job.status,
            });
        }
        let host = self.store.get_host(job.host_id)?;
        let target = HostTarget::from(&host);

        job.log.push(format!(
            "Connecting to {}@{}",
            target.username,
            target.addr()
        ));
        self.store.update_job(&job)?;

        let mut shell = match self.dialer.dial(&target) {
            Ok(shell) => shell,
            Err(e) => {
                let msg = format!("connection failed: {e}");
                self.fail_job(&mut job, msg.clone())?;
                return Err(InstallError::StepFailed(msg));
            }
        };

        let result = self.drive(shell.as_mut(), &mut job, &host, component, cancel);
        shell.close();

        match result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.finished_at = Some(now_ts());
                job.log.push("Installation completed successfully".into());
                self.store.update_job(&job)?;
                info!(job = job_id, component = %component.id, host = %host.name, "install completed");
                Ok(())
            }
            Err(DriveError::Step(msg)) => {
                self.fail_job(&mut job, msg.clone())?;
                warn!(job = job_id, component = %component.id, error = %msg, "install failed");
                Err(InstallError::StepFailed(msg))
            }
            Err(DriveError::Cancelled) => {
                self.fail_job(&mut job, "cancelled".into())?;
                Err(InstallError::Cancelled)
            }
            Err(DriveError::Store(e)) => Err(e.into()),
        }
    }

    /// The step sequence proper. Mutates and persists the job as it advances;
    /// returns the failure message on the first failing step.
    fn drive(
        &self,
        shell: &mut dyn RemoteShell,
        job: &mut InstallJob,
        host: &Host,
        component: &ComponentSpec,
        cancel: &CancelToken,
    ) -> Result<(), DriveError> {
        // Connectivity check doubles as architecture detection.
        let arch = self.step(shell, job, cancel, "uname -m", None)?;
        let arch = arch.trim().to_string();
        job.log.push(format!("Detected architecture: {arch}"));
        if !arch.is_empty() && arch != host.architecture {
            let mut updated = host.clone();
            updated.architecture = arch;
            self.store.update_host(&updated)?;
        }

        self.transition(job, JobStatus::Downloading, 10)?;
        job.log.push(format!("Downloading {}", component.download_url));
        let download_cmd = format!(
            "wget -O {REMOTE_TMP_DIR}/{} {}",
            component.service_name, component.download_url
        );
        self.step(shell, job, cancel, &download_cmd, Some(35))?;

        self.transition(job, JobStatus::Installing, 40)?;
        job.log.push(format!(
            "Installing binary to {REMOTE_BIN_DIR}/{}",
            component.service_name
        ));
        let chmod_cmd = format!("chmod +x {REMOTE_TMP_DIR}/{}", component.service_name);
        self.step(shell, job, cancel, &chmod_cmd, Some(50))?;
        let move_cmd = format!(
            "sudo mv {REMOTE_TMP_DIR}/{} {REMOTE_BIN_DIR}/",
            component.service_name
        );
        self.step(shell, job, cancel, &move_cmd, Some(60))?;

        self.transition(job, JobStatus::Configuring, 65)?;
        job.log.push(format!(
            "Writing service unit {SYSTEMD_UNIT_DIR}/{}.service",
            component.service_name
        ));
        let unit = render_unit(component);
        let unit_cmd = format!(
            "echo '{unit}' | sudo tee {SYSTEMD_UNIT_DIR}/{}.service",
            component.service_name
        );
        self.step(shell, job, cancel, &unit_cmd, Some(80))?;

        self.transition(job, JobStatus::Starting, 85)?;
        job.log.push(format!("Enabling and starting {}", component.service_name));
        self.step(shell, job, cancel, "sudo systemctl daemon-reload", Some(90))?;
        let enable_cmd = format!("sudo systemctl enable {}", component.service_name);
        self.step(shell, job, cancel, &enable_cmd, Some(95))?;
        let start_cmd = format!("sudo systemctl start {}", component.service_name);
        self.step(shell, job, cancel, &start_cmd, None)?;

        Ok(())
    }

    /// Run one remote command for `job`, bumping progress on success.
    fn step(
        &self,
        shell: &mut dyn RemoteShell,
        job: &mut InstallJob,
        cancel: &CancelToken,
        command: &str,
        progress_after: Option<u8>,
    ) -> Result<String, DriveError> {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        match shell.exec(command) {
            Ok(output) => {
                if let Some(progress) = progress_after {
                    job.progress = job.progress.max(progress);
                }
                self.store.update_job(job)?;
                Ok(output)
            }
            Err(ExecError::CommandFailed { status, output }) => {
                let trimmed = output.trim();
                let msg = if trimmed.is_empty() {
                    format!("`{command}` exited with status {status}")
                } else {
                    format!("`{command}` exited with status {status}: {trimmed}")
                };
                Err(DriveError::Step(msg))
            }
            Err(e) => Err(DriveError::Step(format!("`{command}`: {e}"))),
        }
    }

    fn transition(
        &self,
        job: &mut InstallJob,
        status: JobStatus,
        progress: u8,
    ) -> Result<(), DriveError> {
        job.status = status;
        job.progress = job.progress.max(progress);
        self.store.update_job(job)?;
        Ok(())
    }

    fn fail_job(&self, job: &mut InstallJob, message: String) -> Result<(), StoreError> {
        job.status = JobStatus::Failed;
        job.error = Some(message.clone());
        job.log.push(format!("ERROR: {message}"));
        job.finished_at = Some(now_ts());
        self.store.update_job(job)
    }

    /// Query the supervisor for a service's state.
    ///
    /// A non-zero `is-active` exit means the unit is inactive or unknown -
    /// that is the answer, not a failure.
    pub fn service_status(
        &self,
        host: &Host,
        service_name: &str,
    ) -> Result<ServiceState, InstallError> {
        let mut shell = self.dialer.dial(&HostTarget::from(host))?;
        let result = shell.exec(&format!("sudo systemctl is-active {service_name}"));
        shell.close();
        match result {
            Ok(output) => {
                if output.trim() == "active" {
                    Ok(ServiceState::Active)
                } else {
                    Ok(ServiceState::Inactive)
                }
            }
            Err(ExecError::CommandFailed { .. }) => Ok(ServiceState::Inactive),
            Err(e) => Err(e.into()),
        }
    }

    /// Start a managed service.
    pub fn service_start(&self, host: &Host, service_name: &str) -> Result<(), InstallError> {
        self.service_command(host, "start", service_name)
    }

    /// Stop a managed service.
    pub fn service_stop(&self, host: &Host, service_name: &str) -> Result<(), InstallError> {
        self.service_command(host, "stop", service_name)
    }

    fn service_command(
        &self,
        host: &Host,
        verb: &str,
        service_name: &str,
    ) -> Result<(), InstallError> {
        let mut shell = self.dialer.dial(&HostTarget::from(host))?;
        let result = shell.exec(&format!("sudo systemctl {verb} {service_name}"));
        shell.close();
        result?;
        Ok(())
    }
}

/// Verify a host end to end: open a session, sanity-check command execution,
/// and record the observed OS and architecture.
///
/// The host's status lands on `connected` or `error`; `last_seen` is bumped
/// only on success.
pub fn verify_host(
    store: &Arc<dyn RecordStore>,
    dialer: &Arc<dyn Dialer>,
    host_id: i64,
) -> Result<Host, InstallError> {
    let mut host = store.get_host(host_id)?;
    store.set_host_status(host_id, HostStatus::Connecting, None)?;

    let outcome = (|| -> Result<(String, String), InstallError> {
        let mut shell = dialer.dial(&HostTarget::from(&host))?;
        let result = (|| {
            shell.exec("whoami")?;
            let os = shell.exec("uname -s")?;
            let arch = shell.exec("uname -m")?;
            Ok::<_, ExecError>((os, arch))
        })();
        shell.close();
        Ok(result?)
    })();

    match outcome {
        Ok((os, arch)) => {
            host.os = os.trim().to_string();
            host.architecture = arch.trim().to_string();
            host.status = HostStatus::Connected;
            host.last_seen = Some(now_ts());
            store.update_host(&host)?;
            info!(host = %host.name, os = %host.os, arch = %host.architecture, "host verified");
            Ok(host)
        }
        Err(e) => {
            store.set_host_status(host_id, HostStatus::Error, None)?;
            warn!(host = %host.name, error = %e, "host verification failed");
            Err(e)
        }
    }
}

/// Render the systemd unit for a component: simple service, restart on
/// failure with a fixed backoff, enabled for boot via multi-user.target.
fn render_unit(component: &ComponentSpec) -> String {
    format!(
        "[Unit]\n\
         Description={name}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User=nobody\n\
         ExecStart={bin_dir}/{service}\n\
         Restart=always\n\
         RestartSec=5\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        name = component.name,
        bin_dir = REMOTE_BIN_DIR,
        service = component.service_name,
    )
}
