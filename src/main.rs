//! Upload vacuum CLI
//!
//! Entry point for the `upload-vacuum` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kde_linux_vacuum::timeout::{validate_timeout, Watchdog, TIMEOUT_EXIT_CODE};
use kde_linux_vacuum::upload::upload_tree;
use kde_linux_vacuum::{
    deletion_mode_from_env, DeletionMode, FsStore, ObjectStore, RunReport, Vacuum, VacuumConfig,
    CONFIRM_ENV,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "upload-vacuum")]
#[command(about = "Retention and checksum manifests for published KDE Linux builds", version)]
struct Cli {
    /// Path to the run configuration (default: vacuum.toml if present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override the bucket directory from the configuration
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply retention to every prefix, write manifests and prune the chunk store
    Run {
        /// Output the run report as JSON
        #[arg(long)]
        json: bool,

        /// Terminate the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Compute what a run would do without deleting anything
    Plan {
        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List objects in the bucket
    List {
        /// Key prefix to list
        #[arg(long, default_value = "")]
        prefix: String,

        /// Include objects in nested prefixes
        #[arg(long)]
        recursive: bool,
    },

    /// Publish a local tree with checksum metadata
    Upload {
        /// Local directory to upload
        #[arg(long, default_value = "upload-tree")]
        dir: PathBuf,

        /// Key prefix to upload under
        #[arg(long)]
        prefix: String,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("upload_vacuum=info,kde_linux_vacuum=info,vacuum_core=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match load_config(cli.config, cli.store_root) {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Run { json, timeout } => {
            let _watchdog = timeout.map(arm_watchdog);
            run_vacuum(config, deletion_mode_from_env(), json);
        }
        Commands::Plan { json } => {
            run_vacuum(config, DeletionMode::DryRun, json);
        }
        Commands::List { prefix, recursive } => {
            run_list(&config, &prefix, recursive);
        }
        Commands::Upload { dir, prefix } => {
            run_upload(&config, &dir, &prefix);
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    store_root: Option<PathBuf>,
) -> Result<VacuumConfig, kde_linux_vacuum::config::ConfigError> {
    let overrides = store_root.map(|root| serde_json::json!({ "store_root": root }));
    VacuumConfig::build(path.as_deref(), overrides)
}

fn arm_watchdog(seconds: u64) -> Watchdog {
    let limit = match validate_timeout(seconds) {
        Ok(limit) => limit,
        Err(e) => {
            error!("Invalid timeout: {}", e);
            process::exit(1);
        }
    };
    Watchdog::arm(limit, move || {
        error!(seconds, "Vacuum run exceeded its deadline, terminating");
        process::exit(TIMEOUT_EXIT_CODE);
    })
}

fn open_store(config: &VacuumConfig) -> Arc<dyn ObjectStore> {
    Arc::new(FsStore::new(config.store_root.clone()))
}

fn run_vacuum(config: VacuumConfig, mode: DeletionMode, json: bool) {
    if mode.is_dry_run() {
        tracing::info!("Dry run: set {}=1 to really delete", CONFIRM_ENV);
    }

    let store = open_store(&config);
    let report = match Vacuum::new(store, config, mode).run() {
        Ok(report) => report,
        Err(e) => {
            error!("Vacuum failed: {}", e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                error!("  caused by: {}", cause);
                source = std::error::Error::source(cause);
            }
            process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                error!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }
}

fn print_report(report: &RunReport) {
    let mode = if report.mode.is_dry_run() { "dry-run" } else { "confirmed" };
    println!("Vacuum ({})", mode);
    if !report.protected.is_empty() {
        println!("  Protected: {}", report.protected.join(", "));
    }
    for prefix in &report.prefixes {
        println!();
        println!("  {}", prefix.prefix);
        println!("    Releases: {}", prefix.releases.len());
        println!("    Keep:     {}", prefix.decision.unique_keep().join(", "));
        println!("    Delete:   {}", prefix.decision.delete.join(", "));
        println!(
            "    Artifacts: {} deleted, {} skipped, {} failed",
            prefix.deletion.deleted,
            prefix.deletion.skipped,
            prefix.deletion.failures.len()
        );
        for failure in &prefix.deletion.failures {
            println!("      ! {}: {}", failure.path, failure.error);
        }
        if let Some(path) = &prefix.manifest_path {
            println!("    Manifest: {} ({} entries)", path.display(), prefix.manifest_entries);
        }
    }
    if let Some(count) = report.pruned_indexes {
        println!();
        println!("  Chunk store pruned with {} indexes", count);
    }
}

fn run_list(config: &VacuumConfig, prefix: &str, recursive: bool) {
    let store = open_store(config);
    match store.list(prefix, recursive) {
        Ok(objects) => {
            for object in objects {
                let sum = object
                    .metadata(&config.checksum_metadata_key)
                    .unwrap_or("-");
                println!("{:>12}  {}  {}", object.size, sum, object.key);
            }
        }
        Err(e) => {
            error!("Listing failed: {}", e);
            process::exit(1);
        }
    }
}

fn run_upload(config: &VacuumConfig, dir: &Path, prefix: &str) {
    let store = open_store(config);
    match upload_tree(store.as_ref(), dir, prefix) {
        Ok(report) => {
            println!(
                "Uploaded {} objects ({} bytes) to {}",
                report.objects.len(),
                report.total_bytes(),
                prefix
            );
        }
        Err(e) => {
            error!("Upload failed: {}", e);
            process::exit(1);
        }
    }
}
