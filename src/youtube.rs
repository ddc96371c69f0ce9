#![forbid(unsafe_code)]

//! YouTube Data API v3 adapter.
//!
//! [`VideoApi`] is the seam every component talks to; [`DataApiClient`] is
//! the blocking `ureq` implementation used in production. The wire structs
//! below only model the handful of fields the harvester reads.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// API credential. Passed by reference into every call, never stored in
/// the client.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Where discovery pages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingSource {
    ChannelSearch {
        channel_id: String,
        query: Option<String>,
    },
    Playlist {
        playlist_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub item_id: String,
    pub published_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub published_at: String,
    pub title: String,
    pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistMetadata {
    pub title: String,
    pub channel_title: String,
}

/// A top-level comment and the replies delivered with it, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    pub text: String,
    pub replies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentPage {
    pub threads: Vec<CommentThread>,
    pub next_page_token: Option<String>,
}

pub trait VideoApi: Send + Sync {
    /// Fetches one discovery page. An empty `page_token` requests the first page.
    fn list_page(
        &self,
        key: &ApiKey,
        source: &ListingSource,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListingPage, ApiError>;

    fn video(&self, key: &ApiKey, video_id: &str) -> Result<Option<VideoMetadata>, ApiError>;

    fn channel(
        &self,
        key: &ApiKey,
        channel_id: &str,
    ) -> Result<Option<ChannelMetadata>, ApiError>;

    fn playlist(
        &self,
        key: &ApiKey,
        playlist_id: &str,
    ) -> Result<Option<PlaylistMetadata>, ApiError>;

    fn comment_threads(
        &self,
        key: &ApiKey,
        video_id: &str,
        page_token: &str,
        include_replies: bool,
    ) -> Result<CommentPage, ApiError>;
}

/// Blocking client for the public Data API.
#[derive(Debug, Clone)]
pub struct DataApiClient {
    agent: ureq::Agent,
    base_url: String,
}

impl DataApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        key: &ApiKey,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{endpoint}", self.base_url);
        debug!(endpoint, "calling video API");
        let mut request = self.agent.get(&url).query("key", key.as_str());
        for (name, value) in params {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(response) => response.into_json::<T>().map_err(|err| ApiError::Decode {
                endpoint: endpoint.to_string(),
                detail: err.to_string(),
            }),
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(status_error(status, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(ApiError::Transport {
                endpoint: endpoint.to_string(),
                detail: transport.to_string(),
            }),
        }
    }
}

impl VideoApi for DataApiClient {
    fn list_page(
        &self,
        key: &ApiKey,
        source: &ListingSource,
        page_token: &str,
        page_size: u32,
    ) -> Result<ListingPage, ApiError> {
        let page_size = page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![("maxResults", page_size.as_str())];
        if !page_token.is_empty() {
            params.push(("pageToken", page_token));
        }

        match source {
            ListingSource::ChannelSearch { channel_id, query } => {
                params.extend([
                    ("part", "snippet,id"),
                    ("channelId", channel_id.as_str()),
                    ("type", "video"),
                    ("order", "date"),
                ]);
                if let Some(query) = query.as_deref().filter(|q| !q.trim().is_empty()) {
                    params.push(("q", query));
                }
                let response: SearchResponse = self.get_json("search", key, &params)?;
                Ok(response.into_page())
            }
            ListingSource::Playlist { playlist_id } => {
                params.extend([("part", "snippet"), ("playlistId", playlist_id.as_str())]);
                let response: PlaylistItemsResponse =
                    self.get_json("playlistItems", key, &params)?;
                Ok(response.into_page())
            }
        }
    }

    fn video(&self, key: &ApiKey, video_id: &str) -> Result<Option<VideoMetadata>, ApiError> {
        let response: ListResponse<VideoResource> =
            self.get_json("videos", key, &[("part", "snippet"), ("id", video_id)])?;
        Ok(response.items.into_iter().next().map(|item| VideoMetadata {
            published_at: item.snippet.published_at,
            title: item.snippet.title,
            channel_name: item.snippet.channel_title,
        }))
    }

    fn channel(
        &self,
        key: &ApiKey,
        channel_id: &str,
    ) -> Result<Option<ChannelMetadata>, ApiError> {
        let response: ListResponse<ChannelResource> =
            self.get_json("channels", key, &[("part", "snippet"), ("id", channel_id)])?;
        Ok(response.items.into_iter().next().map(|item| ChannelMetadata {
            title: item.snippet.title,
        }))
    }

    fn playlist(
        &self,
        key: &ApiKey,
        playlist_id: &str,
    ) -> Result<Option<PlaylistMetadata>, ApiError> {
        let response: ListResponse<PlaylistResource> =
            self.get_json("playlists", key, &[("part", "snippet"), ("id", playlist_id)])?;
        Ok(response
            .items
            .into_iter()
            .next()
            .map(|item| PlaylistMetadata {
                title: item.snippet.title,
                channel_title: item.snippet.channel_title,
            }))
    }

    fn comment_threads(
        &self,
        key: &ApiKey,
        video_id: &str,
        page_token: &str,
        include_replies: bool,
    ) -> Result<CommentPage, ApiError> {
        let part = if include_replies {
            "snippet,replies"
        } else {
            "snippet"
        };
        let mut params = vec![("part", part), ("videoId", video_id)];
        if !page_token.is_empty() {
            params.push(("pageToken", page_token));
        }
        let response: CommentThreadsResponse = self.get_json("commentThreads", key, &params)?;
        Ok(response.into_page(include_replies))
    }
}

/// Builds an [`ApiError::Status`] from a non-success body of the shape
/// `{"error": {"errors": [{"message", "reason"}]}}`.
pub fn status_error(status: u16, body: &str) -> ApiError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| {
            let first = envelope.error.errors.into_iter().next();
            match first {
                Some(entry) => Some((
                    entry.message.or(envelope.error.message),
                    entry.reason.unwrap_or_default(),
                )),
                None => envelope.error.message.map(|message| (Some(message), String::new())),
            }
        });

    let (message, reason) = detail.unwrap_or((None, String::new()));
    ApiError::Status {
        status,
        message: message.unwrap_or_else(|| format!("HTTP {status}")),
        reason: if reason.is_empty() {
            "unknown".to_string()
        } else {
            reason
        },
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: PublishedSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishedSnippet {
    published_at: String,
}

impl SearchResponse {
    fn into_page(self) -> ListingPage {
        let entries = self
            .items
            .into_iter()
            .filter_map(|item| {
                item.id.video_id.map(|item_id| ListingEntry {
                    item_id,
                    published_at: item.snippet.published_at,
                })
            })
            .collect();
        ListingPage {
            entries,
            next_page_token: self.next_page_token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    published_at: String,
    resource_id: SearchId,
}

impl PlaylistItemsResponse {
    fn into_page(self) -> ListingPage {
        let entries = self
            .items
            .into_iter()
            .filter_map(|item| {
                let PlaylistItemSnippet {
                    published_at,
                    resource_id,
                } = item.snippet;
                resource_id.video_id.map(|item_id| ListingEntry {
                    item_id,
                    published_at,
                })
            })
            .collect();
        ListingPage {
            entries,
            next_page_token: self.next_page_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResource {
    snippet: ChannelSnippet,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadsResponse {
    #[serde(default)]
    items: Vec<CommentThreadResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentThreadResource {
    snippet: CommentThreadSnippet,
    #[serde(default)]
    replies: Option<CommentReplies>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    top_level_comment: CommentResource,
}

#[derive(Debug, Deserialize)]
struct CommentReplies {
    #[serde(default)]
    comments: Vec<CommentResource>,
}

#[derive(Debug, Deserialize)]
struct CommentResource {
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    #[serde(default)]
    text_original: String,
}

impl CommentThreadsResponse {
    fn into_page(self, include_replies: bool) -> CommentPage {
        let threads = self
            .items
            .into_iter()
            .map(|item| CommentThread {
                text: item.snippet.top_level_comment.snippet.text_original,
                replies: match item.replies {
                    Some(replies) if include_replies => replies
                        .comments
                        .into_iter()
                        .map(|reply| reply.snippet.text_original)
                        .collect(),
                    _ => Vec::new(),
                },
            })
            .collect();
        CommentPage {
            threads,
            next_page_token: self.next_page_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_rejects_blank_and_redacts_debug() {
        assert!(ApiKey::new("   ").is_none());
        let key = ApiKey::new(" secret ").unwrap();
        assert_eq!(key.as_str(), "secret");
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[test]
    fn search_response_maps_to_listing_page() {
        let body = r#"{
            "nextPageToken": "CBQQAA",
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "v1"},
                 "snippet": {"publishedAt": "2024-01-09T10:00:00Z", "title": "One"}},
                {"id": {"kind": "youtube#channel", "channelId": "UC1"},
                 "snippet": {"publishedAt": "2024-01-08T10:00:00Z"}}
            ]
        }"#;
        let page = serde_json::from_str::<SearchResponse>(body)
            .unwrap()
            .into_page();
        assert_eq!(page.next_page_token.as_deref(), Some("CBQQAA"));
        assert_eq!(
            page.entries,
            vec![ListingEntry {
                item_id: "v1".into(),
                published_at: "2024-01-09T10:00:00Z".into(),
            }]
        );
    }

    #[test]
    fn playlist_response_reads_resource_id() {
        let body = r#"{
            "items": [
                {"snippet": {"publishedAt": "2024-01-09T10:00:00Z", "position": 0,
                             "resourceId": {"kind": "youtube#video", "videoId": "p1"}}}
            ]
        }"#;
        let page = serde_json::from_str::<PlaylistItemsResponse>(body)
            .unwrap()
            .into_page();
        assert!(page.next_page_token.is_none());
        assert_eq!(page.entries[0].item_id, "p1");
    }

    #[test]
    fn comment_threads_keep_replies_after_their_parent() {
        let body = r#"{
            "items": [
                {"snippet": {"topLevelComment": {"snippet": {"textOriginal": "first"}}},
                 "replies": {"comments": [
                    {"snippet": {"textOriginal": "reply a"}},
                    {"snippet": {"textOriginal": "reply b"}}
                 ]}},
                {"snippet": {"topLevelComment": {"snippet": {"textOriginal": "second"}}}}
            ]
        }"#;
        let with_replies = serde_json::from_str::<CommentThreadsResponse>(body)
            .unwrap()
            .into_page(true);
        assert_eq!(with_replies.threads[0].replies, vec!["reply a", "reply b"]);
        assert!(with_replies.threads[1].replies.is_empty());

        let without = serde_json::from_str::<CommentThreadsResponse>(body)
            .unwrap()
            .into_page(false);
        assert!(without.threads[0].replies.is_empty());
    }

    #[test]
    fn status_error_uses_first_structured_error() {
        let body = r#"{"error": {"code": 403, "message": "outer",
            "errors": [{"message": "The request cannot be completed", "reason": "quotaExceeded"}]}}"#;
        match status_error(403, body) {
            ApiError::Status {
                status,
                message,
                reason,
            } => {
                assert_eq!(status, 403);
                assert_eq!(message, "The request cannot be completed");
                assert_eq!(reason, "quotaExceeded");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn status_error_tolerates_unstructured_bodies() {
        let err = status_error(502, "<html>bad gateway</html>");
        assert_eq!(
            err.to_string(),
            "API error: HTTP 502 (Reason: unknown, status 502)"
        );
    }
}
