//! Drivestor CLI
//!
//! Drives a file-backed pool from the command line. A pool directory holds
//! one `drive_NNN.data` file per drive and a `pool.json` state file, so
//! successive invocations operate on the same pool.
//!
//! ```text
//! drivestor --dir ./pool init --preset dbox-484
//! drivestor --dir ./pool write a.txt b.bin
//! drivestor --dir ./pool offline 44 45 46
//! drivestor --dir ./pool check
//! drivestor --dir ./pool rebuild 44
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drivestor::adapters::{FileBlockStore, LoggingEventPublisher, PoolStateFile};
use drivestor::domain::ports::{BlockStore, ProgressReporter};
use drivestor::layout::DriveId;
use drivestor::{
    NamedBlob, PoolConfig, PoolMode, StoragePool, Topology, VulnerabilityPolicy,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Drivestor - multi-level erasure-coded drive pool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pool directory (drive files and state)
    #[arg(long, env = "DRIVESTOR_DIR", default_value = "./pool")]
    dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print pool metrics in Prometheus text format after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new pool
    Init {
        /// Layout preset (dbox-484, single-domain-156, dual-group-146, quad-domain-156)
        #[arg(long, default_value = "dbox-484", conflicts_with = "config")]
        preset: String,

        /// YAML or JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the striping mode (normal, ha)
        #[arg(long)]
        mode: Option<PoolMode>,

        /// Override the vulnerability policy
        #[arg(long)]
        policy: Option<VulnerabilityPolicy>,
    },

    /// Pack and stripe files onto the pool
    Write {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Mark drives offline
    Offline { drives: Vec<DriveId> },

    /// Mark drives online
    Online { drives: Vec<DriveId> },

    /// Mark a whole fault domain offline or online
    Domain {
        domain: usize,

        /// Bring the domain back online instead of failing it
        #[arg(long)]
        online: bool,
    },

    /// Switch the striping mode for subsequent writes
    Mode { mode: PoolMode },

    /// Rebuild drives from their peers
    Rebuild {
        #[arg(required = true)]
        drives: Vec<DriveId>,

        /// Leave rebuilt drives offline
        #[arg(long)]
        keep_offline: bool,
    },

    /// Recompute every parity drive
    Parity,

    /// Report whether the pool is recoverable
    Check {
        /// Policy to evaluate instead of the configured one
        #[arg(long)]
        policy: Option<VulnerabilityPolicy>,
    },

    /// Evaluate recoverability if a whole domain failed
    WhatIf { domain: usize },

    /// Show capacity statistics
    Stats,

    /// Extract the files of the last write
    ReadBack {
        /// Directory to write the files into
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },

    /// Show the layout, or one drive
    Layout {
        #[arg(long)]
        drive: Option<DriveId>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let state_file = PoolStateFile::in_dir(&args.dir);

    let pool = match args.command {
        Command::Init {
            ref preset,
            ref config,
            mode,
            policy,
        } => {
            let mut config = match config {
                Some(path) => PoolConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => PoolConfig::preset(preset)?,
            };
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(policy) = policy {
                config.vulnerability_policy = policy;
            }
            init_pool(&args.dir, config)?
        }
        _ => open_pool(&args.dir, &state_file)?,
    };
    let pool = Arc::new(pool);

    run_command(&args.command, pool.clone()).await?;

    state_file
        .save(&pool.export_state())
        .with_context(|| format!("saving {}", state_file.path().display()))?;

    if args.metrics {
        print!("{}", pool.metrics().encode_text()?);
    }
    Ok(())
}

fn init_pool(dir: &Path, config: PoolConfig) -> anyhow::Result<StoragePool> {
    let store = FileBlockStore::create(dir, config.total_drives, config.drive_capacity as u64)
        .with_context(|| format!("creating drives under {}", dir.display()))?;
    let pool = StoragePool::new(config, Arc::new(store))?
        .with_events(Arc::new(LoggingEventPublisher::info_level()));
    println!(
        "Initialized pool {} ({} drives) in {}",
        pool.id(),
        pool.topology().total_drives(),
        dir.display()
    );
    Ok(pool)
}

fn open_pool(dir: &Path, state_file: &PoolStateFile) -> anyhow::Result<StoragePool> {
    let state = state_file.load()?;
    let store: Arc<dyn BlockStore> = Arc::new(FileBlockStore::open(
        dir,
        state.config.total_drives,
        state.config.drive_capacity as u64,
    )?);
    let pool = StoragePool::restore(state, store)?
        .with_events(Arc::new(LoggingEventPublisher::info_level()));
    debug!("Opened pool {}", pool.id());
    Ok(pool)
}

// =============================================================================
// Commands
// =============================================================================

async fn run_command(command: &Command, pool: Arc<StoragePool>) -> anyhow::Result<()> {
    match command {
        Command::Init { .. } => {}

        Command::Write { files } => {
            let mut blobs = Vec::with_capacity(files.len());
            for path in files {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("{} has no usable file name", path.display()))?
                    .to_string();
                let data = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                blobs.push(NamedBlob::new(name, data));
            }

            let manifest =
                with_progress(pool, move |pool, progress| pool.write_files(&blobs, progress))
                    .await?;
            println!(
                "Wrote {} bytes ({} files) in {} mode across {} drives, {} slots each",
                manifest.payload_len,
                manifest.files.len(),
                manifest.mode(),
                manifest.plan.drives.len(),
                manifest.plan.slots_used
            );
        }

        Command::Offline { drives } => {
            for &drive_id in drives {
                pool.set_online(drive_id, false)?;
            }
            println!("{} drives offline", pool.snapshot().offline_count());
        }

        Command::Online { drives } => {
            for &drive_id in drives {
                pool.set_online(drive_id, true)?;
            }
            println!("{} drives offline", pool.snapshot().offline_count());
        }

        Command::Domain { domain, online } => {
            pool.set_domain_online(*domain, *online)?;
            println!(
                "Domain {} {}",
                domain,
                if *online { "online" } else { "offline" }
            );
        }

        Command::Mode { mode } => {
            pool.set_mode(*mode);
            println!("Mode set to {}", mode);
        }

        Command::Rebuild {
            drives,
            keep_offline,
        } => {
            let drives = drives.clone();
            let bring_online = !keep_offline;
            let report = with_progress(pool, move |pool, progress| {
                pool.rebuild(&drives, bring_online, progress)
            })
            .await?;
            for line in report.info_lines() {
                println!("{}", line);
            }
            println!("Read {} drives", report.drives_read.len());
        }

        Command::Parity => {
            let written =
                with_progress(pool, |pool, progress| pool.recompute_parity(progress)).await?;
            println!("Recomputed {} parity drives", written);
        }

        Command::Check { policy } => {
            let report = match policy {
                Some(policy) => pool.check_with_policy(*policy),
                None => pool.check(),
            };
            println!("{}", report.summary);
            for domain in report.domains.iter().filter(|d| d.vulnerable) {
                println!(
                    "  {}: {} offline, worst group has {} failed data drives (groups {:?})",
                    domain.name,
                    domain.offline_drives,
                    domain.max_group_failures,
                    domain.groups_at_risk
                );
            }
        }

        Command::WhatIf { domain } => {
            let report = pool.what_if_domain_failure(*domain)?;
            println!(
                "If domain {} failed: {} ({})",
                domain,
                if report.recoverable {
                    "recoverable"
                } else {
                    "NOT recoverable"
                },
                report.summary
            );
        }

        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&pool.stats())?);
        }

        Command::ReadBack { out } => {
            let files = tokio::task::spawn_blocking({
                let pool = pool.clone();
                move || pool.read_files()
            })
            .await??;
            if files.is_empty() {
                bail!("last write holds no packed files");
            }
            tokio::fs::create_dir_all(out).await?;
            for file in files {
                let path = out.join(&file.name);
                tokio::fs::write(&path, &file.data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("{} ({} bytes)", path.display(), file.data.len());
            }
        }

        Command::Layout { drive } => match drive {
            Some(drive_id) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&pool.drive_info(*drive_id)?)?
                );
            }
            None => print_layout(pool.topology()),
        },
    }
    Ok(())
}

/// Run a blocking pool pass off the runtime, logging drive progress.
async fn with_progress<T, F>(pool: Arc<StoragePool>, pass: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&StoragePool, &dyn ProgressReporter) -> drivestor::Result<T> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<(DriveId, usize)>();

    let reporter = tokio::spawn(async move {
        let mut processed = 0usize;
        while let Some((drive_id, total)) = rx.recv().await {
            processed += 1;
            debug!("Processed drive {} ({}/{})", drive_id, processed, total);
        }
        processed
    });

    let result = tokio::task::spawn_blocking(move || {
        let send = move |drive_id: DriveId, total: usize| {
            let _ = tx.send((drive_id, total));
        };
        let progress: &dyn ProgressReporter = &send;
        pass(pool.as_ref(), progress)
    })
    .await
    .context("pool task panicked")?;

    let processed = reporter.await.unwrap_or(0);
    info!("{} drive updates reported", processed);
    Ok(result?)
}

fn print_layout(topology: &Topology) {
    println!(
        "{} drives, {} domains, {} byte chunks, {} bytes per drive",
        topology.total_drives(),
        topology.domains().len(),
        topology.chunk_size(),
        topology.drive_capacity()
    );
    for domain in topology.domains() {
        println!(
            "{} [{}..{}): {} data, local parity {:?}, global parity {:?}, spares {:?}",
            domain.name,
            domain.drive_range.start,
            domain.drive_range.end,
            domain.data_drives.len(),
            domain.local_parity_drives,
            domain.global_parity_drives,
            domain.spare_drives
        );
        for group in &domain.groups {
            let parity = group
                .parity_drive
                .map_or_else(|| "none".to_string(), |id| id.to_string());
            println!(
                "  group {}: drives {}..={} parity {}",
                group.index,
                group.data_drives.first().copied().unwrap_or_default(),
                group.data_drives.last().copied().unwrap_or_default(),
                parity
            );
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
