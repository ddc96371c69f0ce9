#![forbid(unsafe_code)]

//! Incremental YouTube harvester: checkpointed discovery over channels and
//! playlists, a three-stage per-item pipeline (subtitle fetch, subtitle
//! normalize, comment fetch) and a date-partitioned JSON archive.

pub mod archive;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod subtitles;
pub mod window;
pub mod youtube;
