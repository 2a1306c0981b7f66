//! DriveScope binary — thin CLI shell over the [`drivescope`] library crate.
//!
//! Exposes the offline subcommands that operate purely on the local index
//! and caches. Crawl and sync are library operations driven by an injected
//! remote client; they are not wired here because credential acquisition
//! lives outside the core.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use drivescope::cache::CacheStore;
use drivescope::config::DriveConfig;
use drivescope::health::{format_health_summary, run_all_health_checks};
use drivescope::queries;
use drivescope::store::IndexStore;
use drivescope::sync::last_sync_info;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Local metadata index and analytics engine for Google Drive.
#[derive(Parser)]
#[command(name = "drivescope", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a drivescope.toml config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory holding the index database
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print index statistics and the health summary
    Stats,
    /// Run detailed health checks over the index
    Health {
        /// Output the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report duplicate file groups (md5 + size)
    Dedupe {
        /// Maximum number of groups to show
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Minimum file size in bytes
        #[arg(long, default_value_t = 0)]
        min_size: i64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove cached snapshot/analytics payloads
    ClearCache {
        /// Cache to clear: quick_scan, full_scan, or full_scan_analytics.
        /// Clears all when omitted.
        kind: Option<String>,
    },
    /// Truncate the index tables (the schema version is preserved)
    ClearIndex,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drivescope=info".parse().expect("valid directive")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DriveConfig::load(path),
        None => DriveConfig::load(&PathBuf::from("drivescope.toml")),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let index = IndexStore::new(config.db_path());

    match cli.command {
        Commands::Stats => cmd_stats(&index),
        Commands::Health { json } => cmd_health(&index, json),
        Commands::Dedupe { limit, min_size, json } => cmd_dedupe(&index, &config, limit, min_size, json),
        Commands::ClearCache { kind } => cmd_clear_cache(&config, kind.as_deref()),
        Commands::ClearIndex => cmd_clear_index(&index),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn require_index(index: &IndexStore) -> bool {
    if !index.exists() {
        eprintln!("No index found at {}. Run a full crawl first.", index.path().display());
        return false;
    }
    true
}

fn cmd_stats(index: &IndexStore) -> ExitCode {
    if !require_index(index) {
        return ExitCode::FAILURE;
    }
    let report = run_all_health_checks(index);
    println!("{}", format_health_summary(&report));

    if let Some(info) = last_sync_info(index) {
        if let Some(last_crawl) = info.last_full_crawl_time {
            println!("Last full crawl: {last_crawl}");
        }
        if let Some(last_sync) = info.last_sync_time {
            println!("Last sync:       {last_sync}");
        }
    }
    if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_health(index: &IndexStore, json: bool) -> ExitCode {
    if !require_index(index) {
        return ExitCode::FAILURE;
    }
    let report = run_all_health_checks(index);

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                error!(error = %e, "Failed to serialize report");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", format_health_summary(&report));

        let edges = &report.dangling_edges;
        if !edges.missing_parents.is_empty() {
            println!("\nDangling edges (missing parents):");
            for (child_id, parent_id) in edges.missing_parents.iter().take(10) {
                println!("  Child {child_id} -> missing parent {parent_id}");
            }
            if edges.missing_parents.len() > 10 {
                println!("  ... and {} more", edges.missing_parents.len() - 10);
            }
        }
        if !report.shortcuts.unresolved.is_empty() {
            println!("\nUnresolved shortcuts:");
            for shortcut in report.shortcuts.unresolved.iter().take(10) {
                println!(
                    "  {} -> missing target {}",
                    shortcut.name.as_deref().unwrap_or(&shortcut.id),
                    shortcut.target_id.as_deref().unwrap_or("<none>")
                );
            }
            if report.shortcuts.unresolved.len() > 10 {
                println!("  ... and {} more", report.shortcuts.unresolved.len() - 10);
            }
        }
    }

    if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_dedupe(
    index: &IndexStore,
    config: &DriveConfig,
    limit: usize,
    min_size: i64,
    json: bool,
) -> ExitCode {
    if !require_index(index) {
        return ExitCode::FAILURE;
    }
    let conn = match index.connect() {
        Ok(conn) => conn,
        Err(e) => {
            error!(error = %e, "Could not open index");
            return ExitCode::FAILURE;
        }
    };

    let result = (|| -> drivescope::Result<ExitCode> {
        let savings = queries::total_duplicate_savings(&conn, min_size)?;
        let groups = queries::duplicate_groups(&conn, min_size, Some(limit))?;

        if json {
            let mut out_groups = Vec::new();
            for group in &groups {
                let files = queries::duplicate_files_detail(
                    &conn,
                    &group.file_ids,
                    config.path_max_paths,
                    config.path_max_depth,
                )?;
                out_groups.push(serde_json::json!({
                    "md5": group.md5,
                    "size": group.size,
                    "count": group.count,
                    "total_wasted": group.total_wasted,
                    "files": files,
                }));
            }
            let output = serde_json::json!({ "summary": savings, "groups": out_groups });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(ExitCode::SUCCESS);
        }

        println!("{}", "=".repeat(60));
        println!("DUPLICATE FILES REPORT");
        println!("{}", "=".repeat(60));
        println!();
        println!("Summary:");
        println!("  Total duplicate groups: {}", savings.total_groups);
        println!("  Total duplicate files:  {}", savings.total_duplicate_files);
        println!(
            "  Potential savings:      {:.2} GB",
            savings.total_wasted_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        );
        println!();

        for (i, group) in groups.iter().enumerate() {
            println!(
                "Group {}: {} files, {:.2} MB each",
                i + 1,
                group.count,
                group.size as f64 / (1024.0 * 1024.0)
            );
            println!(
                "         Potential savings: {:.2} MB",
                group.total_wasted as f64 / (1024.0 * 1024.0)
            );
            println!("         MD5: {}", group.md5);
            let files = queries::duplicate_files_detail(
                &conn,
                &group.file_ids,
                config.path_max_paths,
                config.path_max_depth,
            )?;
            for file in files {
                let owned = if file.owned_by_me { "*" } else { " " };
                println!(
                    "         [{owned}] {}/{}",
                    file.path,
                    file.name.as_deref().unwrap_or("<unnamed>")
                );
            }
            println!();
        }
        Ok(ExitCode::SUCCESS)
    })();

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Dedupe report failed");
            ExitCode::FAILURE
        }
    }
}

fn cmd_clear_cache(config: &DriveConfig, kind: Option<&str>) -> ExitCode {
    use drivescope::cache::CacheKind;

    let kind = match kind {
        Some(name) => match CacheKind::parse(name) {
            Some(kind) => Some(kind),
            None => {
                eprintln!("Unknown cache '{name}'. Expected quick_scan, full_scan, or full_scan_analytics.");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let cache = CacheStore::new(config.cache_dir.clone());
    match cache.clear(kind) {
        Ok(()) => {
            println!("Cache cleared.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to clear cache");
            ExitCode::FAILURE
        }
    }
}

fn cmd_clear_index(index: &IndexStore) -> ExitCode {
    if !require_index(index) {
        return ExitCode::FAILURE;
    }
    match index.clear() {
        Ok(()) => {
            println!("Index cleared.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to clear index");
            ExitCode::FAILURE
        }
    }
}
