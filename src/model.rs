//! Persisted entity structs and their status enums.
//!
//! Records are owned by the record store; this crate's orchestration code
//! mutates them through [`crate::store::RecordStore`] and never holds them
//! across an operation boundary. Ids are `None` until first insert.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current unix timestamp in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// How a host authenticates its shell sessions.
///
/// Only password authentication is implemented; a key file is carried on the
/// record but attempting to dial with it fails with
/// [`crate::remote::ConnectError::AuthMethodUnsupported`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Password { password: String },
    KeyFile { path: PathBuf },
}

/// Lifecycle status of a registered host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl HostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(Self::Disconnected),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A remote host registered for component deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: Option<i64>,
    pub name: String,
    pub address: String,
    pub ssh_port: u16,
    pub username: String,
    pub auth: AuthMethod,
    /// Observed via `uname -s` during verification; empty until first verify.
    pub os: String,
    /// Observed via `uname -m`; empty until first verify.
    pub architecture: String,
    pub status: HostStatus,
    pub last_seen: Option<i64>,
}

impl Host {
    /// A freshly registered host, not yet probed.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        ssh_port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            address: address.into(),
            ssh_port,
            username: username.into(),
            auth,
            os: String::new(),
            architecture: String::new(),
            status: HostStatus::Disconnected,
            last_seen: None,
        }
    }
}

/// Static catalog entry describing an installable monitoring component.
///
/// Read-only input to the installer; the catalog itself lives in
/// [`crate::catalog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Stable slug, e.g. `node_exporter`.
    pub id: String,
    pub name: String,
    /// collector, storage, visualization or alerting.
    pub kind: String,
    pub version: String,
    pub download_url: String,
    pub config_path: String,
    pub service_name: String,
    pub ports: Vec<u16>,
}

/// Installation job state machine states.
///
/// Order matters: a job only ever advances rightwards through
/// `Pending -> Downloading -> Installing -> Configuring -> Starting`, then lands
/// on exactly one of the terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Installing,
    Configuring,
    Starting,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::Configuring => "configuring",
            Self::Starting => "starting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "installing" => Some(Self::Installing),
            "configuring" => Some(Self::Configuring),
            "starting" => Some(Self::Starting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Tracked state of one component-install attempt on one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallJob {
    pub id: Option<i64>,
    pub host_id: i64,
    pub component_id: String,
    pub status: JobStatus,
    /// 0-100, monotonically non-decreasing until a terminal state.
    pub progress: u8,
    /// Ordered log lines accumulated across stages; preserved on failure.
    pub log: Vec<String>,
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl InstallJob {
    pub fn new(host_id: i64, component_id: impl Into<String>) -> Self {
        Self {
            id: None,
            host_id,
            component_id: component_id.into(),
            status: JobStatus::Pending,
            progress: 0,
            log: Vec::new(),
            error: None,
            started_at: now_ts(),
            finished_at: None,
        }
    }
}

/// Extraction lifecycle of an uploaded MIB archive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    Uploaded,
    Extracting,
    Extracted,
    Error,
}

impl ArchiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "extracting" => Some(Self::Extracting),
            "extracted" => Some(Self::Extracted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Extracted | Self::Error)
    }
}

/// An uploaded container of vendor MIB files.
///
/// `extracted_files` never exceeds `total_files`; both are 0 until the
/// ingestor has enumerated the archive's entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MibArchive {
    pub id: Option<i64>,
    /// Stored filename under the uploads area.
    pub name: String,
    pub original_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub status: ArchiveStatus,
    pub extracted_files: u32,
    pub total_files: u32,
    pub progress: u8,
    pub error: Option<String>,
    pub uploaded_at: i64,
    pub extracted_at: Option<i64>,
}

/// Where a classified MIB file came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MibSource {
    Upload,
    Server,
    Archive,
}

impl MibSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Server => "server",
            Self::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "server" => Some(Self::Server),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }
}

/// Classification outcome for one MIB file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MibFileStatus {
    Pending,
    Validated,
    Error,
}

impl MibFileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One classified vendor metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MibFile {
    pub id: Option<i64>,
    /// Filename stem, e.g. `CISCO-SMI` for `CISCO-SMI.mib`.
    pub name: String,
    pub filename: String,
    pub vendor: String,
    pub category: String,
    pub description: String,
    /// Occurrences of the OBJECT-TYPE marker; a proxy, not a parsed count.
    pub oid_count: u32,
    pub size: u64,
    pub path: PathBuf,
    pub status: MibFileStatus,
    pub source: MibSource,
    /// Weak back-reference to the originating archive (lookup only - deleting
    /// the archive must not cascade here).
    pub archive_id: Option<i64>,
}

/// Scan lifecycle of a configured remote MIB directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Disconnected,
    Connected,
    Scanning,
    Error,
}

impl PathStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Scanning => "scanning",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(Self::Disconnected),
            "connected" => Some(Self::Connected),
            "scanning" => Some(Self::Scanning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A remote directory to scan for MIB files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerPath {
    pub id: Option<i64>,
    pub name: String,
    pub host: String,
    pub path: String,
    pub ssh_port: u16,
    pub username: String,
    pub password: String,
    pub status: PathStatus,
    pub last_scan: Option<i64>,
    pub file_count: u32,
}
