#![forbid(unsafe_code)]

//! Per-item pipeline: subtitle fetch, subtitle normalize, comment fetch.
//!
//! Every stage looks the item's metadata up again so it can run on its own.
//! Paths are derived only from the collection, the date the item was
//! discovered with and the title/id; the metadata date only fills the record
//! header. A failing stage ends the item; the
//! remaining items of the page are unaffected.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveLayout, comments_file_name, subtitle_stem, write_json_atomic};
use crate::discovery::DiscoveredItem;
use crate::error::{HarvestError, Stage, StageError, StageFailure};
use crate::subtitles::{SubtitleFetcher, find_raw_files, ttml_to_text};
use crate::window::parse_utc;
use crate::youtube::{ApiKey, VideoApi};

/// Persisted JSON artifact of one stage for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRecord {
    pub collection_date: String,
    pub collection_time: String,
    pub publication_date: String,
    pub publication_time: String,
    pub channel_name: String,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RecordPayload {
    Subtitles { subtitles: String },
    /// `None` is written as `null`: fetched, and there were no comments.
    Comments { comments: Option<Vec<String>> },
}

/// Per-stage knobs that come from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub language: String,
    pub include_replies: bool,
    pub comment_pages: u32,
}

/// Outcome of one item; `error` holds the first failing stage, if any.
#[derive(Debug)]
pub struct ItemReport {
    pub position: usize,
    pub item_id: String,
    pub error: Option<StageError>,
}

impl ItemReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
struct ItemMetadata {
    published_at: DateTime<Utc>,
    title: String,
    channel_name: String,
}

/// Runs the three stages for items of one target. Cheap to clone; worker
/// tasks each get their own copy.
#[derive(Clone)]
pub struct ItemPipeline {
    api: Arc<dyn VideoApi>,
    fetcher: Arc<dyn SubtitleFetcher>,
    key: ApiKey,
    layout: ArchiveLayout,
    target: String,
    options: PipelineOptions,
}

impl ItemPipeline {
    pub fn new(
        api: Arc<dyn VideoApi>,
        fetcher: Arc<dyn SubtitleFetcher>,
        key: ApiKey,
        layout: ArchiveLayout,
        target: impl Into<String>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            api,
            fetcher,
            key,
            layout,
            target: target.into(),
            options,
        }
    }

    /// Runs every stage in order, stopping at the first failure.
    pub fn run(&self, item: &DiscoveredItem) -> ItemReport {
        let id = item.item_id.as_str();
        let result = self
            .fetch_subtitles(item)
            .and_then(|_| self.normalize_subtitles(item))
            .and_then(|_| self.fetch_comments(item));

        let error = match result {
            Ok(comments) => {
                info!(
                    target_key = %self.target,
                    item = %id,
                    comments = %comments.display(),
                    "item harvested"
                );
                None
            }
            Err(err) => {
                warn!(target_key = %self.target, item = %id, stage = %err.stage, "{err}");
                Some(err)
            }
        };
        ItemReport {
            position: item.position,
            item_id: item.item_id.clone(),
            error,
        }
    }

    /// Runs a page worth of items on the blocking pool, at most `workers` at a
    /// time. Reports come back ordered by position.
    pub async fn run_batch(
        &self,
        items: Vec<DiscoveredItem>,
        workers: usize,
    ) -> Result<Vec<ItemReport>, HarvestError> {
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let mut tasks = JoinSet::new();

        for item in items {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|err| self.worker_error(err.to_string()))?;
            let pipeline = self.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                pipeline.run(&item)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let report = joined.map_err(|err| self.worker_error(err.to_string()))?;
            reports.push(report);
        }
        reports.sort_by_key(|report| report.position);
        Ok(reports)
    }

    /// Downloads the raw auto-generated track into the dated `raw` directory
    /// and returns the file that was written.
    pub fn fetch_subtitles(&self, item: &DiscoveredItem) -> Result<PathBuf, StageError> {
        let stage = Stage::SubtitleFetch;
        let item_id = item.item_id.as_str();
        let meta = self.metadata(item_id, stage)?;
        let raw_dir = self.layout.raw_subtitles_dir(item.published_at.date_naive());
        create_dir(&raw_dir).map_err(|failure| self.stage_error(item_id, stage, failure))?;

        let template = raw_dir.join(format!("{}.%(ext)s", subtitle_stem(&meta.title, item_id)));
        debug!(item = %item_id, template = %template.display(), "requesting subtitle track");
        self.fetcher
            .download(item_id, &self.options.language, &template)
            .map_err(|detail| self.stage_error(item_id, stage, StageFailure::Download(detail)))?;

        find_raw_files(&raw_dir, item_id, &self.options.language)
            .pop()
            .ok_or_else(|| {
                self.stage_error(
                    item_id,
                    stage,
                    StageFailure::Download(format!(
                        "no '{}' auto-generated track was written",
                        self.options.language
                    )),
                )
            })
    }

    /// Flattens the single raw track of the item into a `clean` record with
    /// the same file stem.
    pub fn normalize_subtitles(&self, item: &DiscoveredItem) -> Result<PathBuf, StageError> {
        let stage = Stage::SubtitleNormalize;
        let item_id = item.item_id.as_str();
        let meta = self.metadata(item_id, stage)?;
        let published = item.published_at.date_naive();
        let raw_dir = self.layout.raw_subtitles_dir(published);

        let mut found = find_raw_files(&raw_dir, item_id, &self.options.language);
        if found.len() != 1 {
            return Err(self.stage_error(
                item_id,
                stage,
                StageFailure::AmbiguousRaw {
                    dir: raw_dir,
                    found: found.len(),
                },
            ));
        }
        let raw_path = found.remove(0);

        let document = fs::read_to_string(&raw_path).map_err(|source| {
            self.stage_error(
                item_id,
                stage,
                StageFailure::Io {
                    action: "reading",
                    path: raw_path.clone(),
                    source,
                },
            )
        })?;
        let subtitles = ttml_to_text(&document).map_err(|detail| {
            self.stage_error(
                item_id,
                stage,
                StageFailure::Markup {
                    path: raw_path.clone(),
                    detail,
                },
            )
        })?;

        let clean_dir = self.layout.clean_subtitles_dir(published);
        let stem = raw_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| subtitle_stem(&meta.title, item_id));
        let path = clean_dir.join(format!("{stem}.json"));
        let record = record_for(&meta, RecordPayload::Subtitles { subtitles });
        write_record(&path, &record).map_err(|failure| self.stage_error(item_id, stage, failure))?;
        Ok(path)
    }

    /// Fetches comment threads (up to the configured page count) and writes
    /// them as one flat list, or `null` when there are none.
    pub fn fetch_comments(&self, item: &DiscoveredItem) -> Result<PathBuf, StageError> {
        let stage = Stage::CommentFetch;
        let item_id = item.item_id.as_str();
        let meta = self.metadata(item_id, stage)?;

        let mut comments = Vec::new();
        let mut token = String::new();
        for _ in 0..self.options.comment_pages.max(1) {
            let page = self
                .api
                .comment_threads(&self.key, item_id, &token, self.options.include_replies)
                .map_err(|err| self.stage_error(item_id, stage, StageFailure::Api(err)))?;
            for thread in page.threads {
                comments.push(thread.text);
                comments.extend(thread.replies);
            }
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = next,
                _ => break,
            }
        }

        let comments = if comments.is_empty() {
            None
        } else {
            Some(comments)
        };
        let dir = self.layout.comments_dir(item.published_at.date_naive());
        let path = dir.join(comments_file_name(&meta.title, item_id));
        let record = record_for(&meta, RecordPayload::Comments { comments });
        write_record(&path, &record).map_err(|failure| self.stage_error(item_id, stage, failure))?;
        Ok(path)
    }

    fn metadata(&self, item_id: &str, stage: Stage) -> Result<ItemMetadata, StageError> {
        let meta = self
            .api
            .video(&self.key, item_id)
            .map_err(|err| self.stage_error(item_id, stage, StageFailure::Api(err)))?
            .ok_or_else(|| self.stage_error(item_id, stage, StageFailure::MissingMetadata))?;
        let published_at = parse_utc(&meta.published_at).ok_or_else(|| {
            self.stage_error(
                item_id,
                stage,
                StageFailure::Timestamp(meta.published_at.clone()),
            )
        })?;
        Ok(ItemMetadata {
            published_at,
            title: meta.title,
            channel_name: meta.channel_name,
        })
    }

    fn stage_error(&self, item_id: &str, stage: Stage, failure: StageFailure) -> StageError {
        StageError {
            target: self.target.clone(),
            item_id: item_id.to_string(),
            stage,
            failure,
        }
    }

    fn worker_error(&self, detail: String) -> HarvestError {
        HarvestError::Worker {
            target: self.target.clone(),
            detail,
        }
    }
}

fn record_for(meta: &ItemMetadata, payload: RecordPayload) -> PipelineRecord {
    let collected = Utc::now();
    PipelineRecord {
        collection_date: collected.format("%Y-%m-%d").to_string(),
        collection_time: collected.format("%H:%M:%S").to_string(),
        publication_date: meta.published_at.format("%Y-%m-%d").to_string(),
        publication_time: meta.published_at.format("%H:%M:%S").to_string(),
        channel_name: meta.channel_name.clone(),
        payload,
    }
}

fn create_dir(dir: &Path) -> Result<(), StageFailure> {
    fs::create_dir_all(dir).map_err(|source| StageFailure::Io {
        action: "creating",
        path: dir.to_path_buf(),
        source,
    })
}

fn write_record(path: &Path, record: &PipelineRecord) -> Result<(), StageFailure> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    write_json_atomic(path, record).map_err(|source| StageFailure::Io {
        action: "writing",
        path: path.to_path_buf(),
        source,
    })
}
