//! Fleet provisioning and MIB ingestion core.
//!
//! Two halves, sharing a record store and a session dialer:
//!
//! - **Provisioning** - authenticated remote-shell sessions to registered
//!   hosts ([`remote`]), liveness probing, and a multi-step install/start/stop
//!   lifecycle for monitoring components ([`provision`]).
//! - **Ingestion** - extraction of uploaded MIB archives into per-archive
//!   workspaces, content classification, and discovery scans of remote MIB
//!   directories ([`mib`]).
//!
//! Orchestration operations run as tracked background units of work with
//! per-key exclusivity ([`ops`]); their outcomes are always observable
//! through record status fields.

pub mod catalog;
pub mod config;
pub mod mib;
pub mod model;
pub mod ops;
pub mod provision;
pub mod remote;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use config::CoreConfig;
use mib::Ingestor;
use model::{ArchiveStatus, AuthMethod, Host};
use ops::{OpKey, OpRegistry};
use provision::Installer;
use remote::{Dialer, SshDialer};
use store::{RecordStore, SqliteStore};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "fleetmon",
    version,
    about = "Fleet provisioning and MIB ingestion for network monitoring"
)]
pub struct Cli {
    /// Override the data directory (defaults to ./data or FLEETMON_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a host for provisioning
    AddHost {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },
    /// List registered hosts with their last observed status
    Hosts,
    /// TCP liveness probe; refreshes the host's stored status
    Probe { host_id: i64 },
    /// Open a session, sanity-check it, and record the host's OS/architecture
    Verify { host_id: i64 },
    /// List the component catalog
    Components,
    /// Install a catalog component on a host as a supervised service
    Install {
        #[arg(long)]
        host: i64,
        #[arg(long)]
        component: String,
    },
    /// Query or change a managed service's state
    Service {
        #[arg(long)]
        host: i64,
        /// status, start or stop
        action: String,
        service_name: String,
    },
    /// List installation jobs
    Jobs,
    /// Copy an archive into the uploads area and register it
    Upload { path: PathBuf },
    /// Extract a registered archive and classify its contents
    Extract { archive_id: i64 },
    /// Re-arm a terminal archive for another extraction
    ResetArchive { archive_id: i64 },
    /// List registered archives
    Archives,
    /// List classified MIB files
    Mibs,
    /// Register a remote directory to scan for MIB files
    AddPath {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        path: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
    },
    /// Scan a registered server path (discovery only)
    Scan { path_id: i64 },
    /// List registered server paths
    Paths,
}

/// Wired-up core: one store, one dialer, one operation registry.
struct App {
    config: CoreConfig,
    store: Arc<dyn RecordStore>,
    dialer: Arc<dyn Dialer>,
    registry: OpRegistry,
}

impl App {
    fn open(config: CoreConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening store at {}", config.db_path.display()))?;
        let dialer = SshDialer::new(config.host_key_policy.clone())
            .with_connect_timeout(config.connect_timeout);
        Ok(Self {
            config,
            store: Arc::new(store),
            dialer: Arc::new(dialer),
            registry: OpRegistry::new(),
        })
    }

    fn installer(&self) -> Installer {
        Installer::new(Arc::clone(&self.dialer), Arc::clone(&self.store))
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(Arc::clone(&self.store), &self.config)
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.data_dir {
        Some(dir) => CoreConfig::with_data_dir(dir),
        None => CoreConfig::from_env(),
    };
    let app = App::open(config)?;

    match cli.command {
        Commands::AddHost {
            name,
            address,
            port,
            user,
            password,
        } => {
            let host = Host::new(name, address, port, user, AuthMethod::Password { password });
            let id = app.store.insert_host(&host)?;
            println!("registered host {id} ({})", host.name);
        }
        Commands::Hosts => {
            for host in app.store.list_hosts()? {
                println!(
                    "{:>4}  {:<20} {:<22} {:<12} arch={}",
                    host.id.unwrap_or_default(),
                    host.name,
                    format!("{}:{}", host.address, host.ssh_port),
                    host.status.as_str(),
                    if host.architecture.is_empty() {
                        "?"
                    } else {
                        host.architecture.as_str()
                    },
                );
            }
        }
        Commands::Probe { host_id } => {
            let reachable = remote::refresh_host(&app.store, host_id, app.config.probe_timeout)?;
            println!(
                "host {host_id}: {}",
                if reachable { "reachable" } else { "unreachable" }
            );
        }
        Commands::Verify { host_id } => {
            let host = provision::verify_host(&app.store, &app.dialer, host_id)?;
            println!(
                "host {} verified: os={} arch={}",
                host.name, host.os, host.architecture
            );
        }
        Commands::Components => {
            for c in catalog::all() {
                println!(
                    "{:<16} {:<20} {:<14} v{:<8} ports {:?}",
                    c.id, c.name, c.kind, c.version, c.ports
                );
            }
        }
        Commands::Install { host, component } => {
            install_command(&app, host, &component).await?;
        }
        Commands::Service {
            host,
            action,
            service_name,
        } => {
            let host = app.store.get_host(host)?;
            let installer = app.installer();
            match action.as_str() {
                "status" => {
                    let state = installer.service_status(&host, &service_name)?;
                    println!("{service_name}: {state}");
                }
                "start" => {
                    installer.service_start(&host, &service_name)?;
                    println!("{service_name}: started");
                }
                "stop" => {
                    installer.service_stop(&host, &service_name)?;
                    println!("{service_name}: stopped");
                }
                other => bail!("unknown service action {other:?} (use status/start/stop)"),
            }
        }
        Commands::Jobs => {
            for job in app.store.list_jobs()? {
                println!(
                    "{:>4}  host={:<4} {:<16} {:<12} {:>3}%  {}",
                    job.id.unwrap_or_default(),
                    job.host_id,
                    job.component_id,
                    job.status.as_str(),
                    job.progress,
                    job.error.as_deref().unwrap_or(""),
                );
            }
        }
        Commands::Upload { path } => {
            let id = app.ingestor().import_upload(&path)?;
            println!("registered archive {id}");
        }
        Commands::Extract { archive_id } => {
            extract_command(&app, archive_id).await?;
        }
        Commands::ResetArchive { archive_id } => {
            app.ingestor().reset(archive_id)?;
            println!("archive {archive_id} re-armed");
        }
        Commands::Archives => {
            for a in app.store.list_archives()? {
                println!(
                    "{:>4}  {:<28} {:<11} {:>3}%  {}/{} files  {}",
                    a.id.unwrap_or_default(),
                    a.original_name,
                    a.status.as_str(),
                    a.progress,
                    a.extracted_files,
                    a.total_files,
                    a.error.as_deref().unwrap_or(""),
                );
            }
        }
        Commands::Mibs => {
            for m in app.store.list_mib_files()? {
                println!(
                    "{:>4}  {:<28} {:<10} {:<20} oids={:<6} {}",
                    m.id.unwrap_or_default(),
                    m.filename,
                    m.status.as_str(),
                    m.vendor,
                    m.oid_count,
                    m.description,
                );
            }
        }
        Commands::AddPath {
            name,
            host,
            path,
            port,
            user,
            password,
        } => {
            let record = model::ServerPath {
                id: None,
                name,
                host,
                path,
                ssh_port: port,
                username: user,
                password,
                status: model::PathStatus::Disconnected,
                last_scan: None,
                file_count: 0,
            };
            let id = app.store.insert_server_path(&record)?;
            println!("registered server path {id}");
        }
        Commands::Scan { path_id } => {
            let store = Arc::clone(&app.store);
            let dialer = Arc::clone(&app.dialer);
            let count = tokio::task::spawn_blocking(move || {
                mib::scan_server_path(&store, &dialer, path_id, &ops::CancelToken::new())
            })
            .await??;
            println!("scan found {count} files");
        }
        Commands::Paths => {
            for p in app.store.list_server_paths()? {
                println!(
                    "{:>4}  {:<20} {:<22} {:<12} {} files",
                    p.id.unwrap_or_default(),
                    p.name,
                    format!("{}:{}", p.host, p.path),
                    p.status.as_str(),
                    p.file_count,
                );
            }
        }
    }

    Ok(())
}

/// Launch an install job through the operation registry and watch it finish.
async fn install_command(app: &App, host_id: i64, component_id: &str) -> Result<()> {
    let component = catalog::find(component_id)
        .with_context(|| format!("component {component_id:?} not in catalog"))?
        .clone();
    let installer = app.installer();
    let job_id = installer.create_job(host_id, &component)?;

    let store = Arc::clone(&app.store);
    let dialer = Arc::clone(&app.dialer);
    let handle = app
        .registry
        .spawn(
            OpKey::HostComponent(host_id, component.id.clone()),
            move |cancel| {
                let installer = Installer::new(dialer, store);
                // Outcome lands on the job record; the error is for launch logs only.
                let _ = installer.run_job(job_id, &component, &cancel);
            },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let bar = progress_bar("installing");
    loop {
        let job = app.store.get_job(job_id)?;
        bar.set_position(u64::from(job.progress));
        bar.set_message(job.status.as_str().to_string());
        if job.status.is_terminal() {
            bar.finish_with_message(job.status.as_str().to_string());
            for line in &job.log {
                println!("  {line}");
            }
            if let Some(error) = &job.error {
                bail!("install failed: {error}");
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    handle.join().await;
    Ok(())
}

/// Launch an extraction through the operation registry and watch it finish.
async fn extract_command(app: &App, archive_id: i64) -> Result<()> {
    let store = Arc::clone(&app.store);
    let config = app.config.clone();
    let handle = app
        .registry
        .spawn(OpKey::Archive(archive_id), move |cancel| {
            let ingestor = Ingestor::new(store, &config);
            let _ = ingestor.extract(archive_id, &cancel);
        })
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let bar = progress_bar("extracting");
    loop {
        let archive = app.store.get_archive(archive_id)?;
        bar.set_position(u64::from(archive.progress));
        bar.set_message(archive.status.as_str().to_string());
        if archive.status.is_terminal() {
            bar.finish_with_message(archive.status.as_str().to_string());
            if archive.status == ArchiveStatus::Error {
                bail!(
                    "extraction failed: {}",
                    archive.error.as_deref().unwrap_or("unknown error")
                );
            }
            println!(
                "extracted {}/{} files",
                archive.extracted_files, archive.total_files
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    handle.join().await;
    Ok(())
}

fn progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>12} [{bar:30}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_prefix(prefix.to_string());
    bar
}
