#![forbid(unsafe_code)]

//! Discovery cursor: pages through a channel or playlist listing, keeps the
//! items published inside the window and checkpoints the pagination token
//! after every page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::checkpoint::CheckpointStore;
use crate::error::{CheckpointError, HarvestError};
use crate::window::{DateWindow, parse_utc};
use crate::youtube::{ApiKey, ListingSource, VideoApi};

/// One in-window item. `position` counts items across pages within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredItem {
    pub position: usize,
    pub published_at: DateTime<Utc>,
    pub item_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Paging,
    Exhausted,
}

/// Result of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPage {
    pub items: Vec<DiscoveredItem>,
    /// Next position to assign; equals the number of items kept so far.
    pub position: usize,
    pub state: CursorState,
}

/// Owns its collaborators so a page fetch can be moved onto a blocking
/// worker and handed back afterwards.
pub struct DiscoveryCursor {
    api: Arc<dyn VideoApi>,
    checkpoints: Arc<dyn CheckpointStore>,
    key: ApiKey,
    checkpoint_key: String,
    source: ListingSource,
    window: DateWindow,
    page_size: u32,
    position: usize,
    state: CursorState,
}

impl DiscoveryCursor {
    pub fn new(
        api: Arc<dyn VideoApi>,
        checkpoints: Arc<dyn CheckpointStore>,
        key: ApiKey,
        checkpoint_key: impl Into<String>,
        source: ListingSource,
        window: DateWindow,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            checkpoints,
            key,
            checkpoint_key: checkpoint_key.into(),
            source,
            window,
            page_size,
            position: 0,
            state: CursorState::Paging,
        }
    }

    /// True while the checkpoint still holds a token for another page.
    pub fn has_stored_cursor(&self) -> Result<bool, HarvestError> {
        self.checkpoints
            .is_exhausted(&self.checkpoint_key)
            .map(|exhausted| !exhausted)
            .map_err(|source| self.checkpoint_error(source))
    }

    /// Fetches one page from the stored cursor, filters it to the window and
    /// records the next cursor.
    ///
    /// The stored cursor is cleared when the page is empty or holds an item
    /// older than the window start; otherwise the API's next-page token is
    /// stored as returned, absent tokens included.
    pub fn fetch_page(&mut self) -> Result<DiscoveryPage, HarvestError> {
        let token = self
            .checkpoints
            .read(&self.checkpoint_key)
            .map_err(|source| self.checkpoint_error(source))?;

        let page = self
            .api
            .list_page(&self.key, &self.source, &token, self.page_size)
            .map_err(|source| HarvestError::Discovery {
                target: self.checkpoint_key.clone(),
                source,
            })?;

        // Parse the whole page before touching the checkpoint so a bad entry
        // leaves the stored cursor untouched.
        let mut stamped = Vec::with_capacity(page.entries.len());
        for entry in page.entries {
            let published_at = parse_utc(&entry.published_at).ok_or_else(|| {
                HarvestError::DiscoveryTimestamp {
                    target: self.checkpoint_key.clone(),
                    value: entry.published_at.clone(),
                }
            })?;
            stamped.push((entry.item_id, published_at));
        }

        let reached_older = stamped
            .iter()
            .any(|(_, published_at)| self.window.is_before_start(*published_at));
        let exhausted = stamped.is_empty() || reached_older;

        let mut items = Vec::new();
        for (item_id, published_at) in stamped {
            if self.window.contains(published_at) {
                items.push(DiscoveredItem {
                    position: self.position,
                    published_at,
                    item_id,
                });
                self.position += 1;
            } else {
                debug!(target_key = %self.checkpoint_key, item = %item_id, "outside window");
            }
        }

        let next_cursor = if exhausted {
            String::new()
        } else {
            page.next_page_token.unwrap_or_default()
        };
        self.checkpoints
            .write(&self.checkpoint_key, &next_cursor)
            .map_err(|source| self.checkpoint_error(source))?;

        self.state = if exhausted {
            CursorState::Exhausted
        } else {
            CursorState::Paging
        };
        info!(
            target_key = %self.checkpoint_key,
            kept = items.len(),
            position = self.position,
            exhausted,
            "discovery page processed"
        );

        Ok(DiscoveryPage {
            items,
            position: self.position,
            state: self.state,
        })
    }

    fn checkpoint_error(&self, source: CheckpointError) -> HarvestError {
        HarvestError::Checkpoint {
            target: self.checkpoint_key.clone(),
            source,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::FileCheckpointStore;
    use crate::error::ApiError;
    use crate::window::clamp_range;
    use crate::youtube::{
        ChannelMetadata, CommentPage, ListingEntry, ListingPage, PlaylistMetadata, VideoMetadata,
    };
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Serves queued discovery pages and records the tokens it was asked for.
    #[derive(Default)]
    pub(crate) struct PagedApi {
        pub pages: Mutex<VecDeque<Result<ListingPage, ApiError>>>,
        pub requested_tokens: Mutex<Vec<String>>,
    }

    impl PagedApi {
        pub fn with_pages(pages: Vec<Result<ListingPage, ApiError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requested_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    impl VideoApi for PagedApi {
        fn list_page(
            &self,
            _key: &ApiKey,
            _source: &ListingSource,
            page_token: &str,
            _page_size: u32,
        ) -> Result<ListingPage, ApiError> {
            self.requested_tokens
                .lock()
                .unwrap()
                .push(page_token.to_string());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ListingPage::default()))
        }

        fn video(&self, _key: &ApiKey, _id: &str) -> Result<Option<VideoMetadata>, ApiError> {
            Ok(None)
        }

        fn channel(&self, _key: &ApiKey, _id: &str) -> Result<Option<ChannelMetadata>, ApiError> {
            Ok(None)
        }

        fn playlist(
            &self,
            _key: &ApiKey,
            _id: &str,
        ) -> Result<Option<PlaylistMetadata>, ApiError> {
            Ok(None)
        }

        fn comment_threads(
            &self,
            _key: &ApiKey,
            _id: &str,
            _page_token: &str,
            _include_replies: bool,
        ) -> Result<CommentPage, ApiError> {
            Ok(CommentPage::default())
        }
    }

    pub(crate) fn entry(id: &str, published_at: &str) -> ListingEntry {
        ListingEntry {
            item_id: id.into(),
            published_at: published_at.into(),
        }
    }

    pub(crate) fn page(entries: Vec<ListingEntry>, next: Option<&str>) -> ListingPage {
        ListingPage {
            entries,
            next_page_token: next.map(str::to_string),
        }
    }

    fn january_window() -> DateWindow {
        clamp_range(
            parse_utc("2024-01-01T00:00:00Z").unwrap(),
            parse_utc("2024-01-10T00:00:00Z").unwrap(),
        )
        .unwrap()
    }

    fn source() -> ListingSource {
        ListingSource::ChannelSearch {
            channel_id: "UC1".into(),
            query: None,
        }
    }

    fn cursor(api: &Arc<PagedApi>, store: &Arc<FileCheckpointStore>) -> DiscoveryCursor {
        DiscoveryCursor::new(
            api.clone(),
            store.clone(),
            ApiKey::new("K").unwrap(),
            "channel-UC1",
            source(),
            january_window(),
            20,
        )
    }

    #[test]
    fn in_window_page_stores_next_token_and_keeps_paging() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let api = Arc::new(PagedApi::with_pages(vec![Ok(page(
            vec![
                entry("a", "2024-01-07T12:00:00Z"),
                entry("b", "2024-01-05T08:00:00Z"),
            ],
            Some("NEXT1"),
        ))]));
        let mut cursor = cursor(&api, &store);

        let result = cursor.fetch_page().unwrap();
        assert_eq!(result.state, CursorState::Paging);
        assert_eq!(result.position, 2);
        let ids: Vec<_> = result.items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(result.items[1].position, 1);
        assert_eq!(store.read("channel-UC1").unwrap(), "NEXT1");
        assert!(cursor.has_stored_cursor().unwrap());
    }

    #[test]
    fn older_item_exhausts_even_with_next_token() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        store.write("channel-UC1", "RESUME").unwrap();
        let api = Arc::new(PagedApi::with_pages(vec![Ok(page(
            vec![
                entry("new", "2024-01-07T18:00:00Z"),
                entry("old", "2023-12-20T00:00:00Z"),
            ],
            Some("MORE"),
        ))]));
        let mut cursor = cursor(&api, &store);

        let result = cursor.fetch_page().unwrap();
        assert_eq!(result.state, CursorState::Exhausted);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].item_id, "new");
        assert!(january_window().contains(result.items[0].published_at));
        assert_eq!(store.read("channel-UC1").unwrap(), "");
        assert_eq!(*api.requested_tokens.lock().unwrap(), vec!["RESUME"]);
    }

    #[test]
    fn empty_page_exhausts() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let api = Arc::new(PagedApi::with_pages(vec![Ok(page(vec![], Some("IGNORED")))]));
        let mut cursor = cursor(&api, &store);
        let result = cursor.fetch_page().unwrap();
        assert_eq!(result.state, CursorState::Exhausted);
        assert!(!cursor.has_stored_cursor().unwrap());
    }

    #[test]
    fn newer_items_are_skipped_without_exhausting() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let api = Arc::new(PagedApi::with_pages(vec![Ok(page(
            vec![entry("future", "2024-02-01T00:00:00Z")],
            None,
        ))]));
        let mut cursor = cursor(&api, &store);
        let result = cursor.fetch_page().unwrap();
        assert!(result.items.is_empty());
        // A missing token is stored as returned; the state stays Paging.
        assert_eq!(result.state, CursorState::Paging);
        assert_eq!(store.read("channel-UC1").unwrap(), "");
    }

    #[test]
    fn positions_continue_across_pages() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        let api = Arc::new(PagedApi::with_pages(vec![
            Ok(page(vec![entry("a", "2024-01-08T00:00:00Z")], Some("P2"))),
            Ok(page(
                vec![
                    entry("b", "2024-01-04T00:00:00Z"),
                    entry("c", "2024-01-02T00:00:00Z"),
                ],
                Some("P3"),
            )),
        ]));
        let mut cursor = cursor(&api, &store);
        cursor.fetch_page().unwrap();
        let second = cursor.fetch_page().unwrap();
        let positions: Vec<_> = second.items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(
            *api.requested_tokens.lock().unwrap(),
            vec!["".to_string(), "P2".to_string()]
        );
    }

    #[test]
    fn api_error_leaves_checkpoint_untouched() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        store.write("channel-UC1", "KEEP").unwrap();
        let api = Arc::new(PagedApi::with_pages(vec![Err(ApiError::Status {
            status: 403,
            message: "quota".into(),
            reason: "quotaExceeded".into(),
        })]));
        let mut cursor = cursor(&api, &store);
        let err = cursor.fetch_page().unwrap_err();
        assert!(err.to_string().contains("quotaExceeded"));
        assert_eq!(store.read("channel-UC1").unwrap(), "KEEP");
    }

    #[test]
    fn bad_timestamp_fails_the_page_without_moving_the_cursor() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::new(dir.path()));
        store.write("channel-UC1", "KEEP").unwrap();
        let api = Arc::new(PagedApi::with_pages(vec![Ok(page(
            vec![entry("a", "not-a-date")],
            Some("NEXT"),
        ))]));
        let mut cursor = cursor(&api, &store);
        assert!(matches!(
            cursor.fetch_page(),
            Err(HarvestError::DiscoveryTimestamp { .. })
        ));
        assert_eq!(store.read("channel-UC1").unwrap(), "KEEP");
    }
}
