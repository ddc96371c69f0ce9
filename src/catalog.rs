#![forbid(unsafe_code)]

//! Target catalog: the shared credential plus one descriptor per channel,
//! playlist or video to harvest.
//!
//! ```json
//! {"llave": "<api key>",
//!  "campos": [{"id": "UC...", "displayName": "Chan", "searchQuery": "news",
//!              "dateStart": "2024-01-01T00:00:00Z", "dateEnd": "2024-01-10T00:00:00Z"}]}
//! ```
//!
//! The Spanish descriptor keys (`idCanal`, `nombrePlaylist`,
//! `fechaUnica`, ...) are accepted as aliases.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use crate::error::CatalogError;
use crate::youtube::{ApiKey, ListingSource};

/// Sentinel selecting every configured target.
pub const ALL_TARGETS: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Channel,
    Playlist,
    Video,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Channel => "channel",
            TargetKind::Playlist => "playlist",
            TargetKind::Video => "video",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "channel" | "canal" => Ok(TargetKind::Channel),
            "playlist" => Ok(TargetKind::Playlist),
            "video" | "videos" => Ok(TargetKind::Video),
            other => Err(format!("unknown target kind: {other}")),
        }
    }
}

/// Raw per-target date parameters, validated later by the window resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateParams {
    pub start: Option<String>,
    pub end: Option<String>,
    pub single: Option<String>,
}

/// One configured harvesting target. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestTarget {
    pub kind: TargetKind,
    pub id: String,
    pub display_name: String,
    pub search_query: Option<String>,
    pub dates: DateParams,
}

impl HarvestTarget {
    /// Key under which this target's cursor is checkpointed.
    pub fn checkpoint_key(&self) -> String {
        format!("{}-{}", self.kind, self.id)
    }

    /// Discovery source, or `None` for explicit video targets.
    pub fn listing_source(&self) -> Option<ListingSource> {
        match self.kind {
            TargetKind::Channel => Some(ListingSource::ChannelSearch {
                channel_id: self.id.clone(),
                query: self.search_query.clone(),
            }),
            TargetKind::Playlist => Some(ListingSource::Playlist {
                playlist_id: self.id.clone(),
            }),
            TargetKind::Video => None,
        }
    }
}

/// Which targets a run should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    All,
    Ids(Vec<String>),
}

impl TargetSelection {
    /// `["All"]` selects everything; mixing the sentinel with ids is an error.
    pub fn from_ids<I, S>(ids: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Err(CatalogError::EmptySelection);
        }
        if ids.iter().any(|id| id == ALL_TARGETS) {
            if ids.len() == 1 {
                return Ok(TargetSelection::All);
            }
            return Err(CatalogError::MixedSelection {
                ids: ids.join(", "),
            });
        }
        Ok(TargetSelection::Ids(ids))
    }

    fn matches(&self, id: &str) -> bool {
        match self {
            TargetSelection::All => true,
            TargetSelection::Ids(ids) => ids.iter().any(|candidate| candidate == id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub credential: ApiKey,
    pub targets: Vec<HarvestTarget>,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default, alias = "key")]
    llave: Option<String>,
    #[serde(default, alias = "targets")]
    campos: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    #[serde(alias = "idCanal", alias = "idPlaylist", alias = "idVideo")]
    id: String,
    #[serde(default)]
    kind: Option<TargetKind>,
    #[serde(
        default,
        alias = "nombreCanal",
        alias = "nombrePlaylist",
        alias = "nombreVideo"
    )]
    display_name: Option<String>,
    #[serde(default, alias = "busqueda")]
    search_query: Option<String>,
    #[serde(default, alias = "fechaInicio")]
    date_start: Option<String>,
    #[serde(default, alias = "fechaFin")]
    date_end: Option<String>,
    #[serde(default, alias = "fechaUnica")]
    single_date: Option<String>,
}

impl RawTarget {
    fn into_target(self, default_kind: TargetKind) -> HarvestTarget {
        let id = self.id.trim().to_string();
        let display_name = self
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.clone());
        HarvestTarget {
            kind: self.kind.unwrap_or(default_kind),
            id,
            display_name,
            search_query: self.search_query.filter(|query| !query.trim().is_empty()),
            dates: DateParams {
                start: self.date_start,
                end: self.date_end,
                single: self.single_date,
            },
        }
    }
}

/// Reads the catalog at `path` and keeps the selected targets in file order.
pub fn load_catalog(
    path: &Path,
    selection: &TargetSelection,
    default_kind: TargetKind,
) -> Result<Catalog, CatalogError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&raw, path, selection, default_kind)
}

fn parse_catalog(
    raw: &str,
    path: &Path,
    selection: &TargetSelection,
    default_kind: TargetKind,
) -> Result<Catalog, CatalogError> {
    let parsed: RawCatalog = serde_json::from_str(raw).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let credential = parsed
        .llave
        .and_then(ApiKey::new)
        .ok_or_else(|| CatalogError::MissingCredential {
            path: path.to_path_buf(),
        })?;

    let targets: Vec<HarvestTarget> = parsed
        .campos
        .into_iter()
        .map(|raw| raw.into_target(default_kind))
        .filter(|target| selection.matches(&target.id))
        .collect();

    if let TargetSelection::Ids(ids) = selection {
        for id in ids {
            if !targets.iter().any(|target| &target.id == id) {
                warn!(target_id = %id, "requested target is not in the catalog");
            }
        }
    }

    Ok(Catalog {
        credential,
        targets,
    })
}
