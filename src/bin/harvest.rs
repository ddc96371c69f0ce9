#![forbid(unsafe_code)]

//! Command-line entry point: harvests every selected catalog target once and
//! exits non-zero only when no target completed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::error;
use tube_harvest::catalog::{ALL_TARGETS, TargetKind, TargetSelection, load_catalog};
use tube_harvest::checkpoint::FileCheckpointStore;
use tube_harvest::config::{SettingsOverrides, resolve_settings};
use tube_harvest::harvest::{HarvestContext, RunSummary, TargetOutcome, run_harvest};
use tube_harvest::logging::{DEFAULT_LOG_LEVEL, init_logging};
use tube_harvest::preflight::{ensure_extractor, ensure_not_root};
use tube_harvest::subtitles::YtDlp;
use tube_harvest::youtube::DataApiClient;

const PROCESS_NAME: &str = "harvest";

#[derive(Debug, Parser)]
#[command(
    name = "harvest",
    version,
    about = "Incrementally harvests subtitles and comments from YouTube channels, playlists and videos"
)]
struct Cli {
    /// Settings file with HARVEST_* keys.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Target catalog (JSON with `llave` and `campos`).
    #[arg(long, value_name = "PATH")]
    catalog: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    archive_root: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Kind assumed for descriptors without an explicit `kind`.
    #[arg(long, default_value = "channel")]
    kind: TargetKind,

    /// Target id to harvest; repeat for several. `All` selects every target.
    #[arg(long = "target", value_name = "ID", default_value = ALL_TARGETS)]
    targets: Vec<String>,

    /// Items processed concurrently within one discovery page.
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("{err:#}");
    }

    match run(cli).await {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunSummary> {
    ensure_not_root(PROCESS_NAME)?;

    let settings = resolve_settings(SettingsOverrides {
        env_path: cli.env_file,
        archive_root: cli.archive_root,
        catalog_path: cli.catalog,
        checkpoint_dir: cli.checkpoint_dir,
        workers: cli.workers,
    })
    .context("resolving settings")?;

    let extractor = YtDlp::new(&settings.yt_dlp);
    ensure_extractor(&extractor)?;

    let selection = TargetSelection::from_ids(&cli.targets).context("parsing --target")?;
    let catalog = load_catalog(&settings.catalog_path, &selection, cli.kind)
        .with_context(|| format!("loading catalog {}", settings.catalog_path.display()))?;

    println!("===================================");
    println!("YouTube Harvest");
    println!("===================================");
    println!("Catalog: {}", settings.catalog_path.display());
    println!("Archive root: {}", settings.archive_root.display());
    println!("Checkpoints: {}", settings.checkpoint_dir.display());
    println!("Subtitle language: {}", settings.language);
    println!("Targets selected: {}", catalog.targets.len());
    println!();

    let ctx = HarvestContext {
        api: Arc::new(DataApiClient::new(
            settings.api_base.clone(),
            settings.request_timeout,
        )),
        fetcher: Arc::new(extractor),
        checkpoints: Arc::new(FileCheckpointStore::new(settings.checkpoint_dir.clone())),
        key: catalog.credential.clone(),
        today: Utc::now().date_naive(),
        settings,
    };

    let summary = run_harvest(&ctx, &catalog.targets).await;
    print_summary(&summary);
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("===================================");
    println!("Harvest finished");
    println!("===================================");
    for (target, outcome) in &summary.outcomes {
        match outcome {
            TargetOutcome::Completed(report) => {
                let window = report
                    .window
                    .map(|window| format!("{} .. {}", window.start_iso(), window.end_iso()))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "[{}] {target}: window {window}, {} page(s), {}/{} item(s) harvested",
                    outcome.label(),
                    report.pages,
                    report.processed,
                    report.discovered
                );
                for failure in &report.failures {
                    println!("    - {failure}");
                }
            }
            TargetOutcome::Skipped(reason) => println!("[{}] {target}: {reason}", outcome.label()),
            TargetOutcome::Failed(err) => println!("[{}] {target}: {err}", outcome.label()),
        }
    }
    println!();
    println!(
        "Completed: {}  Skipped: {}  Failed: {}",
        summary.completed(),
        summary.skipped(),
        summary.failed()
    );
}
