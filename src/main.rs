use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpsync::config::AppConfig;
use mpsync::db::{Database, OpenOptions};
use mpsync::dedup::DuplicatePair;
use mpsync::probe::ToolProbe;
use mpsync::remote::YtDlpSource;
use mpsync::sync::{
    resolve_playlist_id, IndexResult, PullResult, Reconciler, SyncSettings, VerifyResult,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mpsync",
    version,
    about = "Keep a local music library in sync with a remote playlist"
)]
struct Cli {
    /// Path to the SQLite catalog
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Library directory (defaults to config library_dir)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Discard the existing catalog and start from an empty one
    #[arg(long, global = true)]
    overwrite: bool,

    /// Log every SQL statement
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove catalog entries whose file no longer exists
    Verify {
        /// Also re-read duration and rating of files that still exist
        #[arg(long)]
        refresh: bool,

        /// Number of parallel probe workers (0 = auto)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Add library files that are not yet catalogued
    Index {
        /// Number of parallel probe workers (0 = auto)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Download new playlist items, linking the ones already in the library
    Pull {
        /// Playlist id or URL (remembered in the catalog for later runs)
        #[arg(long)]
        playlist: Option<String>,

        /// Concurrent downloads (0 = config fetch_workers)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Run verify, index and pull in order
    Sync {
        /// Playlist id or URL (remembered in the catalog for later runs)
        #[arg(long)]
        playlist: Option<String>,

        /// Also re-read duration and rating of existing files
        #[arg(long)]
        refresh: bool,
    },

    /// Report near-duplicate pairs across the whole catalog
    Dedup {
        /// Fingerprint distance below which a pair is reported
        #[arg(long)]
        threshold: Option<usize>,

        /// Maximum duration gap in seconds
        #[arg(long)]
        tolerance: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Number of parallel comparison workers (0 = auto)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Show catalog statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger(env_logger::Env::default(), cli.verbose, cli.trace).init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(mpsync::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open_with(
        &db_path,
        OpenOptions {
            overwrite: cli.overwrite,
            trace: cli.trace,
        },
    )
    .context("Failed to open database")?;

    let library = cli.library.or(config.library_dir.clone());
    let probe = ToolProbe::new(&config.tools.fpcalc);
    let remote = YtDlpSource::new(&config.tools.yt_dlp, &config.tools.audio_format);

    match cli.command {
        Commands::Verify { refresh, jobs } => {
            let settings = sync_settings(library, &config, jobs, 0)?;
            let reconciler = Reconciler::new(&db, &probe, &remote, settings);
            let result = reconciler.verify(refresh).context("Verify failed")?;
            print_verify(&result);
        }

        Commands::Index { jobs } => {
            let settings = sync_settings(library, &config, jobs, 0)?;
            let reconciler = Reconciler::new(&db, &probe, &remote, settings);
            let result = reconciler.index().context("Index failed")?;
            print_index(&result);
        }

        Commands::Pull { playlist, jobs } => {
            let settings = sync_settings(library, &config, 0, jobs)?;
            let playlist_id = resolve_playlist_id(&db, playlist.or(config.playlist_id.clone()).as_deref())?;
            let reconciler = Reconciler::new(&db, &probe, &remote, settings);
            let result = reconciler.pull(&playlist_id).context("Pull failed")?;
            print_pull(&result);
        }

        Commands::Sync { playlist, refresh } => {
            let settings = sync_settings(library, &config, 0, 0)?;
            let playlist_id = resolve_playlist_id(&db, playlist.or(config.playlist_id.clone()).as_deref())?;
            let reconciler = Reconciler::new(&db, &probe, &remote, settings);
            let report = reconciler
                .sync(&playlist_id, refresh)
                .context("Sync failed")?;
            print_verify(&report.verify);
            print_index(&report.index);
            print_pull(&report.pull);
        }

        Commands::Dedup {
            threshold,
            tolerance,
            json,
            jobs,
        } => {
            let index = config
                .dedup
                .with_report_overrides(threshold, tolerance)
                .report_index();
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let report = index
                .catalog_report(&db, workers)
                .context("Failed to build duplicate report")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.pairs.is_empty() {
                println!(
                    "No near-duplicates among {} entries (threshold {}, tolerance {:.2}s)",
                    report.entries, report.threshold, report.tolerance_secs
                );
            } else {
                print_pair_table(&report.pairs);
                println!();
                println!(
                    "{} pairs among {} entries (threshold {}, tolerance {:.2}s)",
                    report.pairs.len(),
                    report.entries,
                    report.threshold,
                    report.tolerance_secs
                );
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Catalog Statistics");
            println!("==================");
            println!("Total entries:    {}", stats.total_entries);
            println!("Linked entries:   {}", stats.linked_entries);
            println!("Unlinked entries: {}", stats.unlinked_entries());
            println!("Rated entries:    {}", stats.rated_entries);
            println!("Remote aliases:   {}", stats.remote_aliases);
            println!(
                "Total duration:   {:.1} hours",
                stats.total_duration_hours
            );
            if let Some(playlist) = db.playlist_id()? {
                println!("Playlist:         {}", playlist);
            }
        }
    }

    Ok(())
}

/// Log level from `-v` count, with SQL statements always shown under `--trace`.
fn logger(env: env_logger::Env, verbose: u8, trace: bool) -> env_logger::Builder {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut builder = env_logger::Builder::from_env(env.default_filter_or(log_level));
    builder.format_timestamp(None);
    if trace {
        builder.filter_module(mpsync::db::SQL_LOG_TARGET, log::LevelFilter::Trace);
    }
    builder
}

/// Pass settings from CLI overrides and config. Worker counts of 0 defer to config.
fn sync_settings(
    library: Option<PathBuf>,
    config: &AppConfig,
    jobs: usize,
    fetch_jobs: usize,
) -> Result<SyncSettings> {
    let Some(library_dir) = library else {
        anyhow::bail!("No library directory. Pass --library or set library_dir in config.");
    };
    Ok(SyncSettings {
        workers: if jobs > 0 { jobs } else { config.resolve_workers() },
        fetch_workers: if fetch_jobs > 0 {
            fetch_jobs
        } else {
            config.tools.fetch_workers
        },
        temp_dir: config.tools.temp_dir.clone(),
        duplicates: config.dedup.link_index(),
        ..SyncSettings::new(library_dir)
    })
}

fn print_verify(result: &VerifyResult) {
    println!(
        "Verify complete: {} checked, {} deleted, {} refreshed, {} errors",
        result.checked, result.deleted, result.refreshed, result.errors
    );
}

fn print_index(result: &IndexResult) {
    println!(
        "Index complete: {} scanned, {} known, {} new, {} duplicates, {} skipped, {} errors",
        result.scanned,
        result.known,
        result.inserted,
        result.duplicates,
        result.skipped,
        result.errors
    );
}

fn print_pull(result: &PullResult) {
    println!(
        "Pull complete: {} listed, {} known, {} new, {} linked, {} aliased, {} skipped, {} errors",
        result.listed,
        result.known,
        result.inserted,
        result.linked,
        result.aliased,
        result.skipped,
        result.errors
    );
}

/// Print near-duplicate pairs, closest first.
fn print_pair_table(pairs: &[DuplicatePair]) {
    println!(
        "{:>5} {:>6}  {:>5} {:<36}  {:>5} {:<36}",
        "Dist", "Gap", "Id", "Left", "Id", "Right"
    );
    println!("{}", "-".repeat(100));

    for p in pairs {
        println!(
            "{:>5} {:>5.2}s  {:>5} {:<36}  {:>5} {:<36}",
            p.distance,
            p.duration_gap,
            p.left.id,
            truncate(&p.left.filepath, 36),
            p.right.id,
            truncate(&p.right.filepath, 36),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 3).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}
