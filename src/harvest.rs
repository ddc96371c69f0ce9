#![forbid(unsafe_code)]

//! Run orchestration. Targets are harvested one after another; inside a
//! target, pages are fetched strictly in sequence and each page's items go
//! through the pipeline on a bounded worker pool.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::archive::ArchiveLayout;
use crate::catalog::{HarvestTarget, TargetKind};
use crate::checkpoint::CheckpointStore;
use crate::config::HarvestSettings;
use crate::discovery::{CursorState, DiscoveredItem, DiscoveryCursor};
use crate::error::{HarvestError, StageError};
use crate::pipeline::{ItemPipeline, ItemReport, PipelineOptions};
use crate::subtitles::SubtitleFetcher;
use crate::window::{DateWindow, WindowRequest, parse_utc, resolve};
use crate::youtube::{ApiKey, VideoApi};

/// Everything a run needs, passed explicitly to every target.
#[derive(Clone)]
pub struct HarvestContext {
    pub api: Arc<dyn VideoApi>,
    pub fetcher: Arc<dyn SubtitleFetcher>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub key: ApiKey,
    pub settings: HarvestSettings,
    /// Anchor for the default "yesterday" window.
    pub today: NaiveDate,
}

#[derive(Debug, Default)]
pub struct TargetReport {
    pub window: Option<DateWindow>,
    pub pages: usize,
    pub discovered: usize,
    pub processed: usize,
    pub failures: Vec<StageError>,
}

#[derive(Debug)]
pub enum TargetOutcome {
    Completed(TargetReport),
    Skipped(String),
    Failed(HarvestError),
}

impl TargetOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TargetOutcome::Completed(_) => "completed",
            TargetOutcome::Skipped(_) => "skipped",
            TargetOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<(String, TargetOutcome)>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Completed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TargetOutcome::Failed(_)))
    }

    /// A run succeeds when at least one target completed.
    pub fn is_success(&self) -> bool {
        self.completed() > 0
    }

    fn count(&self, predicate: impl Fn(&TargetOutcome) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

pub async fn run_harvest(ctx: &HarvestContext, targets: &[HarvestTarget]) -> RunSummary {
    let mut summary = RunSummary::default();
    for target in targets {
        let key = target.checkpoint_key();
        info!(target_key = %key, name = %target.display_name, "harvesting target");
        let outcome = harvest_target(ctx, target).await;
        match &outcome {
            TargetOutcome::Completed(report) => info!(
                target_key = %key,
                pages = report.pages,
                discovered = report.discovered,
                processed = report.processed,
                failures = report.failures.len(),
                "target completed"
            ),
            TargetOutcome::Skipped(reason) => warn!(target_key = %key, "target skipped: {reason}"),
            TargetOutcome::Failed(err) => error!(target_key = %key, "{err}"),
        }
        summary.outcomes.push((key, outcome));
    }
    summary
}

pub async fn harvest_target(ctx: &HarvestContext, target: &HarvestTarget) -> TargetOutcome {
    let target_key = target.checkpoint_key();
    let source = target.listing_source();

    let window = match &source {
        Some(_) => match target_window(target, ctx.today) {
            Ok(Some(window)) => Some(window),
            Ok(None) => {
                return TargetOutcome::Skipped(format!(
                    "date range for {target_key} starts after it ends"
                ));
            }
            Err(err) => return TargetOutcome::Skipped(err.to_string()),
        },
        None => None,
    };

    let layout = match collection_layout(ctx, target).await {
        Ok(layout) => layout,
        Err(err) => return TargetOutcome::Failed(err),
    };
    let pipeline = ItemPipeline::new(
        ctx.api.clone(),
        ctx.fetcher.clone(),
        ctx.key.clone(),
        layout,
        target_key.clone(),
        PipelineOptions {
            language: ctx.settings.language.clone(),
            include_replies: ctx.settings.include_replies,
            comment_pages: ctx.settings.comment_pages,
        },
    );

    let mut report = TargetReport {
        window,
        ..TargetReport::default()
    };
    let result = match (source, window) {
        (Some(source), Some(window)) => {
            let cursor = DiscoveryCursor::new(
                ctx.api.clone(),
                ctx.checkpoints.clone(),
                ctx.key.clone(),
                target_key.clone(),
                source,
                window,
                ctx.settings.page_size,
            );
            harvest_pages(ctx, &target_key, cursor, &pipeline, &mut report).await
        }
        _ => harvest_single_video(ctx, target, &pipeline, &mut report).await,
    };

    match result {
        Ok(()) => TargetOutcome::Completed(report),
        Err(err) => TargetOutcome::Failed(err),
    }
}

fn target_window(
    target: &HarvestTarget,
    today: NaiveDate,
) -> Result<Option<DateWindow>, HarvestError> {
    let window_error = |source| HarvestError::Window {
        target: target.checkpoint_key(),
        source,
    };
    let request = WindowRequest::from_parts(
        target.dates.start.as_deref(),
        target.dates.end.as_deref(),
        target.dates.single.as_deref(),
    )
    .map_err(window_error)?;
    let window = resolve(&request, today).map_err(window_error)?;
    if let Some(window) = &window {
        info!(
            target_key = %target.checkpoint_key(),
            start = %window.start_iso(),
            end = %window.end_iso(),
            "resolved date window"
        );
    }
    Ok(window)
}

/// Looks up the collection names once per target and builds its layout.
async fn collection_layout(
    ctx: &HarvestContext,
    target: &HarvestTarget,
) -> Result<ArchiveLayout, HarvestError> {
    let root = ctx.settings.archive_root.clone();
    if target.kind == TargetKind::Video {
        return Ok(ArchiveLayout::new(&root, [target.display_name.as_str()]));
    }

    let api = ctx.api.clone();
    let key = ctx.key.clone();
    let kind = target.kind;
    let id = target.id.clone();
    let target_key = target.checkpoint_key();
    let worker_key = target_key.clone();

    tokio::task::spawn_blocking(move || -> Result<ArchiveLayout, HarvestError> {
        let collection_error = |source| HarvestError::Collection {
            target: worker_key.clone(),
            source,
        };
        let not_found = |kind| HarvestError::CollectionNotFound {
            target: worker_key.clone(),
            kind,
        };
        match kind {
            TargetKind::Playlist => {
                let playlist = api
                    .playlist(&key, &id)
                    .map_err(collection_error)?
                    .ok_or_else(|| not_found("playlist"))?;
                Ok(ArchiveLayout::new(
                    &root,
                    [playlist.channel_title.as_str(), playlist.title.as_str()],
                ))
            }
            _ => {
                let channel = api
                    .channel(&key, &id)
                    .map_err(collection_error)?
                    .ok_or_else(|| not_found("channel"))?;
                Ok(ArchiveLayout::new(&root, [channel.title.as_str()]))
            }
        }
    })
    .await
    .map_err(|err| HarvestError::Worker {
        target: target_key,
        detail: err.to_string(),
    })?
}

/// Fetches pages until the source is exhausted or the stored cursor runs out.
/// The checkpoint is written by the cursor before the page's items are
/// processed.
async fn harvest_pages(
    ctx: &HarvestContext,
    target_key: &str,
    mut cursor: DiscoveryCursor,
    pipeline: &ItemPipeline,
    report: &mut TargetReport,
) -> Result<(), HarvestError> {
    loop {
        let (returned, page) = tokio::task::spawn_blocking(move || {
            let page = cursor.fetch_page();
            (cursor, page)
        })
        .await
        .map_err(|err| HarvestError::Worker {
            target: target_key.to_string(),
            detail: err.to_string(),
        })?;
        cursor = returned;
        let page = page?;

        report.pages += 1;
        report.discovered += page.items.len();
        process_items(ctx, pipeline, page.items, report).await?;

        if page.state == CursorState::Exhausted || !cursor.has_stored_cursor()? {
            return Ok(());
        }
    }
}

async fn harvest_single_video(
    ctx: &HarvestContext,
    target: &HarvestTarget,
    pipeline: &ItemPipeline,
    report: &mut TargetReport,
) -> Result<(), HarvestError> {
    let api = ctx.api.clone();
    let key = ctx.key.clone();
    let id = target.id.clone();
    let target_key = target.checkpoint_key();

    let metadata = tokio::task::spawn_blocking(move || api.video(&key, &id))
        .await
        .map_err(|err| HarvestError::Worker {
            target: target_key.clone(),
            detail: err.to_string(),
        })?
        .map_err(|source| HarvestError::Collection {
            target: target_key.clone(),
            source,
        })?
        .ok_or_else(|| HarvestError::CollectionNotFound {
            target: target_key.clone(),
            kind: "video",
        })?;
    let published_at = parse_utc(&metadata.published_at).ok_or_else(|| {
        HarvestError::DiscoveryTimestamp {
            target: target_key.clone(),
            value: metadata.published_at.clone(),
        }
    })?;

    let item = DiscoveredItem {
        position: 0,
        published_at,
        item_id: target.id.clone(),
    };
    report.discovered = 1;
    process_items(ctx, pipeline, vec![item], report).await
}

async fn process_items(
    ctx: &HarvestContext,
    pipeline: &ItemPipeline,
    items: Vec<DiscoveredItem>,
    report: &mut TargetReport,
) -> Result<(), HarvestError> {
    if items.is_empty() {
        return Ok(());
    }
    let reports = pipeline.run_batch(items, ctx.settings.workers).await?;
    let (done, failed): (Vec<_>, Vec<_>) = reports.into_iter().partition(ItemReport::is_complete);
    report.processed += done.len();
    report.failures.extend(failed.into_iter().filter_map(|item| item.error));
    Ok(())
}
