//! Record store interface and backends.
//!
//! The orchestration components (installer, ingestor, scanner, prober) never
//! reach a process-wide database handle; each receives an explicit
//! `Arc<dyn RecordStore>` at construction. [`sqlite::SqliteStore`] is the
//! default backend; tests and embedders may provide their own.
//!
//! Writes that represent a state transition (status plus progress plus
//! counters) are applied as a single record update so a poller never observes
//! a half-applied transition.

pub mod sqlite;

use thiserror::Error;

use crate::model::{Host, HostStatus, InstallJob, MibArchive, MibFile, ServerPath};

pub use sqlite::SqliteStore;

/// Errors surfaced by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt {entity} record {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: i64,
        reason: String,
    },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// CRUD surface this core consumes from the surrounding system.
///
/// Queries are by primary id or find-all; no transactions are required.
/// `update_*` methods persist the full record, which keeps each state
/// transition a single write.
pub trait RecordStore: Send + Sync {
    // Hosts
    fn insert_host(&self, host: &Host) -> Result<i64, StoreError>;
    fn get_host(&self, id: i64) -> Result<Host, StoreError>;
    fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;
    fn update_host(&self, host: &Host) -> Result<(), StoreError>;
    /// Cheap status refresh used by the liveness prober.
    fn set_host_status(
        &self,
        id: i64,
        status: HostStatus,
        last_seen: Option<i64>,
    ) -> Result<(), StoreError>;

    // Installation jobs
    fn insert_job(&self, job: &InstallJob) -> Result<i64, StoreError>;
    fn get_job(&self, id: i64) -> Result<InstallJob, StoreError>;
    fn list_jobs(&self) -> Result<Vec<InstallJob>, StoreError>;
    fn update_job(&self, job: &InstallJob) -> Result<(), StoreError>;

    // MIB archives
    fn insert_archive(&self, archive: &MibArchive) -> Result<i64, StoreError>;
    fn get_archive(&self, id: i64) -> Result<MibArchive, StoreError>;
    fn list_archives(&self) -> Result<Vec<MibArchive>, StoreError>;
    fn update_archive(&self, archive: &MibArchive) -> Result<(), StoreError>;

    // MIB files
    fn insert_mib_file(&self, file: &MibFile) -> Result<i64, StoreError>;
    fn list_mib_files(&self) -> Result<Vec<MibFile>, StoreError>;
    fn list_mib_files_for_archive(&self, archive_id: i64) -> Result<Vec<MibFile>, StoreError>;

    // Server paths
    fn insert_server_path(&self, path: &ServerPath) -> Result<i64, StoreError>;
    fn get_server_path(&self, id: i64) -> Result<ServerPath, StoreError>;
    fn list_server_paths(&self) -> Result<Vec<ServerPath>, StoreError>;
    fn update_server_path(&self, path: &ServerPath) -> Result<(), StoreError>;
}
