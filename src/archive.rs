#![forbid(unsafe_code)]

//! Archive layout: every output path is a pure function of the collection
//! name, the publication date and the item title/id. Re-running a stage for
//! the same item therefore overwrites the same file.
//!
//! ```text
//! <root>/<collection>/subtitulos/raw/<year>/<Month>/<YYYY-MM-DD>/<title>_ID:<id>.<lang>.ttml
//! <root>/<collection>/subtitulos/clean/<year>/<Month>/<YYYY-MM-DD>/<title>_ID:<id>.<lang>.json
//! <root>/<collection>/comentarios/<year>/<Month>/<YYYY-MM-DD>/<title>.json
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tempfile::NamedTempFile;

pub const SUBTITLES_SUBDIR: &str = "subtitulos";
pub const RAW_SUBDIR: &str = "raw";
pub const CLEAN_SUBDIR: &str = "clean";
pub const COMMENTS_SUBDIR: &str = "comentarios";
/// Separates the title from the item id in subtitle file names.
pub const ID_MARKER: &str = "_ID:";

/// Output directories for one collection (channel, playlist or video list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    collection_root: PathBuf,
}

impl ArchiveLayout {
    /// `segments` are display names; each is sanitized before use.
    pub fn new<'a>(root: &Path, segments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut collection_root = root.to_path_buf();
        for segment in segments {
            let clean = sanitize_name(segment);
            if !clean.is_empty() {
                collection_root.push(clean);
            }
        }
        Self { collection_root }
    }

    pub fn collection_root(&self) -> &Path {
        &self.collection_root
    }

    pub fn raw_subtitles_dir(&self, published: NaiveDate) -> PathBuf {
        date_dir(
            &self
                .collection_root
                .join(SUBTITLES_SUBDIR)
                .join(RAW_SUBDIR),
            published,
        )
    }

    pub fn clean_subtitles_dir(&self, published: NaiveDate) -> PathBuf {
        date_dir(
            &self
                .collection_root
                .join(SUBTITLES_SUBDIR)
                .join(CLEAN_SUBDIR),
            published,
        )
    }

    pub fn comments_dir(&self, published: NaiveDate) -> PathBuf {
        date_dir(&self.collection_root.join(COMMENTS_SUBDIR), published)
    }
}

/// `<base>/<year>/<full month name>/<YYYY-MM-DD>`.
pub fn date_dir(base: &Path, date: NaiveDate) -> PathBuf {
    base.join(date.format("%Y").to_string())
        .join(date.format("%B").to_string())
        .join(date.format("%Y-%m-%d").to_string())
}

/// Keeps alphanumerics, spaces, `-` and `_`, then trims trailing whitespace.
pub fn sanitize_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().to_string()
}

/// Title used in file names, falling back to the id when nothing survives
/// sanitizing.
pub fn file_title(title: &str, item_id: &str) -> String {
    let clean = sanitize_name(title);
    if clean.trim().is_empty() {
        sanitize_name(item_id)
    } else {
        clean
    }
}

/// `<title>_ID:<id>`; the extractor appends `.<lang>.<ext>`.
pub fn subtitle_stem(title: &str, item_id: &str) -> String {
    format!("{}{ID_MARKER}{item_id}", file_title(title, item_id))
}

pub fn comments_file_name(title: &str, item_id: &str) -> String {
    format!("{}.json", file_title(title, item_id))
}

/// Serializes `value` as pretty JSON and swaps it into place, so readers see
/// either the previous file or the complete new one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let mut payload = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    payload.push(b'\n');

    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_dir_uses_year_month_name_and_iso_date() {
        let dir = date_dir(Path::new("/base"), date(2024, 1, 9));
        assert_eq!(dir, PathBuf::from("/base/2024/January/2024-01-09"));
    }

    #[test]
    fn sanitize_drops_unsafe_characters() {
        assert_eq!(sanitize_name("Noticias: ¡Hoy! 24/7 "), "Noticias Hoy 247");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("Canal_Uno - Oficial"), "Canal_Uno - Oficial");
        assert_eq!(sanitize_name("Señal Año"), "Señal Año");
    }

    #[test]
    fn empty_titles_fall_back_to_the_item_id() {
        assert_eq!(subtitle_stem("???", "abc123"), "abc123_ID:abc123");
        assert_eq!(comments_file_name("", "abc123"), "abc123.json");
    }

    #[test]
    fn layout_sanitizes_collection_segments() {
        let layout = ArchiveLayout::new(Path::new("/root"), ["Chan: One", "Play/list"]);
        assert_eq!(
            layout.collection_root(),
            Path::new("/root/Chan One/Playlist")
        );
        assert_eq!(
            layout.comments_dir(date(2023, 12, 20)),
            PathBuf::from("/root/Chan One/Playlist/comentarios/2023/December/2023-12-20")
        );
    }

    #[test]
    fn same_date_items_differ_only_in_title_segment() {
        let layout = ArchiveLayout::new(Path::new("/root"), ["Chan"]);
        let day = date(2024, 1, 9);
        let first = layout
            .comments_dir(day)
            .join(comments_file_name("First video", "a1"));
        let second = layout
            .comments_dir(day)
            .join(comments_file_name("Second video", "b2"));
        assert_ne!(first, second);
        assert_eq!(first.parent(), second.parent());
        assert_eq!(
            layout.raw_subtitles_dir(day),
            PathBuf::from("/root/Chan/subtitulos/raw/2024/January/2024-01-09")
        );
        assert_eq!(
            layout.clean_subtitles_dir(day),
            PathBuf::from("/root/Chan/subtitulos/clean/2024/January/2024-01-09")
        );
    }

    #[test]
    fn atomic_write_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("record.json");
        write_json_atomic(&path, &json!({"value": 1})).unwrap();
        write_json_atomic(&path, &json!({"value": 2})).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["value"], 2);
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "temporary files must not be left behind");
    }
}
