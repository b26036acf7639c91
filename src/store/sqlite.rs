//! `SQLite` backend: schema, pragmas, and record CRUD.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use super::{RecordStore, StoreError};
use crate::model::{
    ArchiveStatus, AuthMethod, Host, HostStatus, InstallJob, JobStatus, MibArchive, MibFile,
    MibFileStatus, MibSource, PathStatus, ServerPath,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hosts (
    id           INTEGER PRIMARY KEY,
    name         TEXT NOT NULL,
    address      TEXT NOT NULL,
    ssh_port     INTEGER NOT NULL DEFAULT 22,
    username     TEXT NOT NULL,
    auth_method  TEXT NOT NULL,
    password     TEXT,
    key_path     TEXT,
    os           TEXT NOT NULL DEFAULT '',
    architecture TEXT NOT NULL DEFAULT '',
    status       TEXT NOT NULL DEFAULT 'disconnected',
    last_seen    INTEGER
);

CREATE TABLE IF NOT EXISTS install_jobs (
    id           INTEGER PRIMARY KEY,
    host_id      INTEGER NOT NULL,
    component_id TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    progress     INTEGER NOT NULL DEFAULT 0,
    log_json     TEXT NOT NULL DEFAULT '[]',
    error        TEXT,
    started_at   INTEGER NOT NULL,
    finished_at  INTEGER
);

CREATE TABLE IF NOT EXISTS mib_archives (
    id              INTEGER PRIMARY KEY,
    name            TEXT NOT NULL,
    original_name   TEXT NOT NULL,
    path            TEXT NOT NULL,
    size            INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'uploaded',
    extracted_files INTEGER NOT NULL DEFAULT 0,
    total_files     INTEGER NOT NULL DEFAULT 0,
    progress        INTEGER NOT NULL DEFAULT 0,
    error           TEXT,
    uploaded_at     INTEGER NOT NULL,
    extracted_at    INTEGER
);

CREATE TABLE IF NOT EXISTS mib_files (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    filename    TEXT NOT NULL,
    vendor      TEXT NOT NULL DEFAULT '',
    category    TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    oid_count   INTEGER NOT NULL DEFAULT 0,
    size        INTEGER NOT NULL DEFAULT 0,
    path        TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    source      TEXT NOT NULL,
    archive_id  INTEGER
);

CREATE TABLE IF NOT EXISTS server_paths (
    id         INTEGER PRIMARY KEY,
    name       TEXT NOT NULL,
    host       TEXT NOT NULL,
    path       TEXT NOT NULL,
    ssh_port   INTEGER NOT NULL DEFAULT 22,
    username   TEXT NOT NULL,
    password   TEXT NOT NULL DEFAULT '',
    status     TEXT NOT NULL DEFAULT 'disconnected',
    last_scan  INTEGER,
    file_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// Thread-safe store over a single `rusqlite::Connection`.
///
/// The connection sits behind a `parking_lot::Mutex`; every method takes the
/// lock for the duration of one statement, which keeps each state transition
/// a single atomic write.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened record store");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn auth_columns(auth: &AuthMethod) -> (&'static str, Option<String>, Option<String>) {
    match auth {
        AuthMethod::Password { password } => ("password", Some(password.clone()), None),
        AuthMethod::KeyFile { path } => ("key", None, Some(path.display().to_string())),
    }
}

fn auth_from_columns(
    id: i64,
    method: &str,
    password: Option<String>,
    key_path: Option<String>,
) -> Result<AuthMethod, StoreError> {
    match method {
        "password" => Ok(AuthMethod::Password {
            password: password.unwrap_or_default(),
        }),
        "key" => Ok(AuthMethod::KeyFile {
            path: PathBuf::from(key_path.unwrap_or_default()),
        }),
        other => Err(StoreError::Corrupt {
            entity: "host",
            id,
            reason: format!("unknown auth method {other:?}"),
        }),
    }
}

fn parse_status<T>(
    entity: &'static str,
    id: i64,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Corrupt {
        entity,
        id,
        reason: format!("unknown status {raw:?}"),
    })
}

/// Intermediate row for hosts; converted outside the rusqlite closure so
/// enum-parse failures surface as `StoreError::Corrupt` rather than panics.
struct HostRow {
    id: i64,
    name: String,
    address: String,
    ssh_port: u16,
    username: String,
    auth_method: String,
    password: Option<String>,
    key_path: Option<String>,
    os: String,
    architecture: String,
    status: String,
    last_seen: Option<i64>,
}

impl HostRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            ssh_port: row.get(3)?,
            username: row.get(4)?,
            auth_method: row.get(5)?,
            password: row.get(6)?,
            key_path: row.get(7)?,
            os: row.get(8)?,
            architecture: row.get(9)?,
            status: row.get(10)?,
            last_seen: row.get(11)?,
        })
    }

    fn into_host(self) -> Result<Host, StoreError> {
        let status = parse_status("host", self.id, &self.status, HostStatus::parse)?;
        let auth = auth_from_columns(self.id, &self.auth_method, self.password, self.key_path)?;
        Ok(Host {
            id: Some(self.id),
            name: self.name,
            address: self.address,
            ssh_port: self.ssh_port,
            username: self.username,
            auth,
            os: self.os,
            architecture: self.architecture,
            status,
            last_seen: self.last_seen,
        })
    }
}

struct JobRow {
    id: i64,
    host_id: i64,
    component_id: String,
    status: String,
    progress: u8,
    log_json: String,
    error: Option<String>,
    started_at: i64,
    finished_at: Option<i64>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            host_id: row.get(1)?,
            component_id: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            log_json: row.get(5)?,
            error: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn into_job(self) -> Result<InstallJob, StoreError> {
        let status = parse_status("install_job", self.id, &self.status, JobStatus::parse)?;
        let log: Vec<String> =
            serde_json::from_str(&self.log_json).map_err(|e| StoreError::Corrupt {
                entity: "install_job",
                id: self.id,
                reason: format!("bad log json: {e}"),
            })?;
        Ok(InstallJob {
            id: Some(self.id),
            host_id: self.host_id,
            component_id: self.component_id,
            status,
            progress: self.progress,
            log,
            error: self.error,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

struct ArchiveRow {
    id: i64,
    name: String,
    original_name: String,
    path: String,
    size: u64,
    status: String,
    extracted_files: u32,
    total_files: u32,
    progress: u8,
    error: Option<String>,
    uploaded_at: i64,
    extracted_at: Option<i64>,
}

impl ArchiveRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            original_name: row.get(2)?,
            path: row.get(3)?,
            size: row.get::<_, i64>(4)? as u64,
            status: row.get(5)?,
            extracted_files: row.get(6)?,
            total_files: row.get(7)?,
            progress: row.get(8)?,
            error: row.get(9)?,
            uploaded_at: row.get(10)?,
            extracted_at: row.get(11)?,
        })
    }

    fn into_archive(self) -> Result<MibArchive, StoreError> {
        let status = parse_status("mib_archive", self.id, &self.status, ArchiveStatus::parse)?;
        Ok(MibArchive {
            id: Some(self.id),
            name: self.name,
            original_name: self.original_name,
            path: PathBuf::from(self.path),
            size: self.size,
            status,
            extracted_files: self.extracted_files,
            total_files: self.total_files,
            progress: self.progress,
            error: self.error,
            uploaded_at: self.uploaded_at,
            extracted_at: self.extracted_at,
        })
    }
}

struct MibFileRow {
    id: i64,
    name: String,
    filename: String,
    vendor: String,
    category: String,
    description: String,
    oid_count: u32,
    size: u64,
    path: String,
    status: String,
    source: String,
    archive_id: Option<i64>,
}

impl MibFileRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            filename: row.get(2)?,
            vendor: row.get(3)?,
            category: row.get(4)?,
            description: row.get(5)?,
            oid_count: row.get(6)?,
            size: row.get::<_, i64>(7)? as u64,
            path: row.get(8)?,
            status: row.get(9)?,
            source: row.get(10)?,
            archive_id: row.get(11)?,
        })
    }

    fn into_mib_file(self) -> Result<MibFile, StoreError> {
        let status = parse_status("mib_file", self.id, &self.status, MibFileStatus::parse)?;
        let source = parse_status("mib_file", self.id, &self.source, MibSource::parse)?;
        Ok(MibFile {
            id: Some(self.id),
            name: self.name,
            filename: self.filename,
            vendor: self.vendor,
            category: self.category,
            description: self.description,
            oid_count: self.oid_count,
            size: self.size,
            path: PathBuf::from(self.path),
            status,
            source,
            archive_id: self.archive_id,
        })
    }
}

struct ServerPathRow {
    id: i64,
    name: String,
    host: String,
    path: String,
    ssh_port: u16,
    username: String,
    password: String,
    status: String,
    last_scan: Option<i64>,
    file_count: u32,
}

impl ServerPathRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            host: row.get(2)?,
            path: row.get(3)?,
            ssh_port: row.get(4)?,
            username: row.get(5)?,
            password: row.get(6)?,
            status: row.get(7)?,
            last_scan: row.get(8)?,
            file_count: row.get(9)?,
        })
    }

    fn into_server_path(self) -> Result<ServerPath, StoreError> {
        let status = parse_status("server_path", self.id, &self.status, PathStatus::parse)?;
        Ok(ServerPath {
            id: Some(self.id),
            name: self.name,
            host: self.host,
            path: self.path,
            ssh_port: self.ssh_port,
            username: self.username,
            password: self.password,
            status,
            last_scan: self.last_scan,
            file_count: self.file_count,
        })
    }
}

const HOST_COLS: &str =
    "id, name, address, ssh_port, username, auth_method, password, key_path, os, architecture, status, last_seen";
const JOB_COLS: &str =
    "id, host_id, component_id, status, progress, log_json, error, started_at, finished_at";
const ARCHIVE_COLS: &str = "id, name, original_name, path, size, status, extracted_files, total_files, progress, error, uploaded_at, extracted_at";
const MIB_FILE_COLS: &str = "id, name, filename, vendor, category, description, oid_count, size, path, status, source, archive_id";
const SERVER_PATH_COLS: &str =
    "id, name, host, path, ssh_port, username, password, status, last_scan, file_count";

impl RecordStore for SqliteStore {
    fn insert_host(&self, host: &Host) -> Result<i64, StoreError> {
        let (method, password, key_path) = auth_columns(&host.auth);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hosts (name, address, ssh_port, username, auth_method, password, key_path, os, architecture, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                host.name,
                host.address,
                host.ssh_port,
                host.username,
                method,
                password,
                key_path,
                host.os,
                host.architecture,
                host.status.as_str(),
                host.last_seen,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_host(&self, id: i64) -> Result<Host, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {HOST_COLS} FROM hosts WHERE id = ?1"),
                params![id],
                HostRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("host", id))?;
        row.into_host()
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {HOST_COLS} FROM hosts ORDER BY id"))?;
        let rows = stmt.query_map([], HostRow::from_row)?;
        rows.map(|r| r?.into_host()).collect()
    }

    fn update_host(&self, host: &Host) -> Result<(), StoreError> {
        let id = host.id.ok_or_else(|| StoreError::not_found("host", 0))?;
        let (method, password, key_path) = auth_columns(&host.auth);
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE hosts SET name=?2, address=?3, ssh_port=?4, username=?5, auth_method=?6,
                    password=?7, key_path=?8, os=?9, architecture=?10, status=?11, last_seen=?12
             WHERE id=?1",
            params![
                id,
                host.name,
                host.address,
                host.ssh_port,
                host.username,
                method,
                password,
                key_path,
                host.os,
                host.architecture,
                host.status.as_str(),
                host.last_seen,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("host", id));
        }
        Ok(())
    }

    fn set_host_status(
        &self,
        id: i64,
        status: HostStatus,
        last_seen: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE hosts SET status=?2, last_seen=COALESCE(?3, last_seen) WHERE id=?1",
            params![id, status.as_str(), last_seen],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("host", id));
        }
        Ok(())
    }

    fn insert_job(&self, job: &InstallJob) -> Result<i64, StoreError> {
        let log_json = serde_json::to_string(&job.log).unwrap_or_else(|_| "[]".into());
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO install_jobs (host_id, component_id, status, progress, log_json, error, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.host_id,
                job.component_id,
                job.status.as_str(),
                job.progress,
                log_json,
                job.error,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_job(&self, id: i64) -> Result<InstallJob, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {JOB_COLS} FROM install_jobs WHERE id = ?1"),
                params![id],
                JobRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("install_job", id))?;
        row.into_job()
    }

    fn list_jobs(&self) -> Result<Vec<InstallJob>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {JOB_COLS} FROM install_jobs ORDER BY id"))?;
        let rows = stmt.query_map([], JobRow::from_row)?;
        rows.map(|r| r?.into_job()).collect()
    }

    fn update_job(&self, job: &InstallJob) -> Result<(), StoreError> {
        let id = job
            .id
            .ok_or_else(|| StoreError::not_found("install_job", 0))?;
        let log_json = serde_json::to_string(&job.log).unwrap_or_else(|_| "[]".into());
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE install_jobs SET status=?2, progress=?3, log_json=?4, error=?5, finished_at=?6
             WHERE id=?1",
            params![
                id,
                job.status.as_str(),
                job.progress,
                log_json,
                job.error,
                job.finished_at,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("install_job", id));
        }
        Ok(())
    }

    fn insert_archive(&self, archive: &MibArchive) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO mib_archives (name, original_name, path, size, status, extracted_files, total_files, progress, error, uploaded_at, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                archive.name,
                archive.original_name,
                archive.path.display().to_string(),
                archive.size as i64,
                archive.status.as_str(),
                archive.extracted_files,
                archive.total_files,
                archive.progress,
                archive.error,
                archive.uploaded_at,
                archive.extracted_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_archive(&self, id: i64) -> Result<MibArchive, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {ARCHIVE_COLS} FROM mib_archives WHERE id = ?1"),
                params![id],
                ArchiveRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("mib_archive", id))?;
        row.into_archive()
    }

    fn list_archives(&self) -> Result<Vec<MibArchive>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {ARCHIVE_COLS} FROM mib_archives ORDER BY id"))?;
        let rows = stmt.query_map([], ArchiveRow::from_row)?;
        rows.map(|r| r?.into_archive()).collect()
    }

    fn update_archive(&self, archive: &MibArchive) -> Result<(), StoreError> {
        let id = archive
            .id
            .ok_or_else(|| StoreError::not_found("mib_archive", 0))?;
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE mib_archives SET status=?2, extracted_files=?3, total_files=?4, progress=?5, error=?6, extracted_at=?7
             WHERE id=?1",
            params![
                id,
                archive.status.as_str(),
                archive.extracted_files,
                archive.total_files,
                archive.progress,
                archive.error,
                archive.extracted_at,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("mib_archive", id));
        }
        Ok(())
    }

    fn insert_mib_file(&self, file: &MibFile) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO mib_files (name, filename, vendor, category, description, oid_count, size, path, status, source, archive_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                file.name,
                file.filename,
                file.vendor,
                file.category,
                file.description,
                file.oid_count,
                file.size as i64,
                file.path.display().to_string(),
                file.status.as_str(),
                file.source.as_str(),
                file.archive_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_mib_files(&self) -> Result<Vec<MibFile>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {MIB_FILE_COLS} FROM mib_files ORDER BY id"))?;
        let rows = stmt.query_map([], MibFileRow::from_row)?;
        rows.map(|r| r?.into_mib_file()).collect()
    }

    fn list_mib_files_for_archive(&self, archive_id: i64) -> Result<Vec<MibFile>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MIB_FILE_COLS} FROM mib_files WHERE archive_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![archive_id], MibFileRow::from_row)?;
        rows.map(|r| r?.into_mib_file()).collect()
    }

    fn insert_server_path(&self, path: &ServerPath) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO server_paths (name, host, path, ssh_port, username, password, status, last_scan, file_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                path.name,
                path.host,
                path.path,
                path.ssh_port,
                path.username,
                path.password,
                path.status.as_str(),
                path.last_scan,
                path.file_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_server_path(&self, id: i64) -> Result<ServerPath, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {SERVER_PATH_COLS} FROM server_paths WHERE id = ?1"),
                params![id],
                ServerPathRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("server_path", id))?;
        row.into_server_path()
    }

    fn list_server_paths(&self) -> Result<Vec<ServerPath>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {SERVER_PATH_COLS} FROM server_paths ORDER BY id"))?;
        let rows = stmt.query_map([], ServerPathRow::from_row)?;
        rows.map(|r| r?.into_server_path()).collect()
    }

    fn update_server_path(&self, path: &ServerPath) -> Result<(), StoreError> {
        let id = path
            .id
            .ok_or_else(|| StoreError::not_found("server_path", 0))?;
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE server_paths SET status=?2, last_scan=?3, file_count=?4 WHERE id=?1",
            params![id, path.status.as_str(), path.last_scan, path.file_count],
        )?;
        if n == 0 {
            return Err(StoreError::not_found("server_path", id));
        }
        Ok(())
    }
}
