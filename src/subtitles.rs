#![forbid(unsafe_code)]

//! Subtitle extraction and normalization.
//!
//! Raw timed-text tracks are downloaded by `yt-dlp` (auto-generated captions
//! only, TTML, one language) and later flattened to plain text with
//! `quick-xml`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Result, bail};
use quick_xml::Reader;
use quick_xml::events::Event;
use walkdir::WalkDir;

use crate::archive::ID_MARKER;

pub const DEFAULT_YT_DLP: &str = "yt-dlp";
pub const SUBTITLE_FORMAT: &str = "ttml";

/// Downloads the auto-generated subtitle track of one item.
pub trait SubtitleFetcher: Send + Sync {
    /// `output_template` is a yt-dlp style template ending in `.%(ext)s`.
    fn download(
        &self,
        item_id: &str,
        language: &str,
        output_template: &Path,
    ) -> Result<(), String>;
}

/// `yt-dlp` driven through `std::process::Command`.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `<program> --version` to fail loudly when the extractor is missing.
    pub fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => bail!(
                "{} is installed but returned a failure status",
                self.program.display()
            ),
            Err(err) => bail!(
                "{} is not installed or not in PATH: {}",
                self.program.display(),
                err
            ),
        }
    }
}

impl SubtitleFetcher for YtDlp {
    fn download(
        &self,
        item_id: &str,
        language: &str,
        output_template: &Path,
    ) -> Result<(), String> {
        let url = format!("https://www.youtube.com/watch?v={item_id}");
        let output = Command::new(&self.program)
            .arg("--skip-download")
            .arg("--write-auto-sub")
            .arg("--sub-format")
            .arg(SUBTITLE_FORMAT)
            .arg("--sub-langs")
            .arg(language)
            .arg("--force-overwrites")
            .arg("--no-progress")
            .arg("--output")
            .arg(output_template)
            .arg(&url)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| format!("could not run {}: {err}", self.program.display()))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no diagnostic output");
        Err(format!(
            "{} exited with {} for {url}: {detail}",
            self.program.display(),
            output.status
        ))
    }
}

/// File name suffix the extractor produces for `item_id`.
pub fn raw_file_suffix(item_id: &str, language: &str) -> String {
    format!("{ID_MARKER}{item_id}.{language}.{SUBTITLE_FORMAT}")
}

/// Lists raw subtitle files for `item_id` directly inside `dir`.
pub fn find_raw_files(dir: &Path, item_id: &str, language: &str) -> Vec<PathBuf> {
    let suffix = raw_file_suffix(item_id, language);
    let mut matches: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(&suffix))
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();
    matches
}

/// Concatenates every text node of a timed-text document in order and trims
/// the result.
pub fn ttml_to_text(document: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(document);
    reader.config_mut().trim_text(false);
    let mut out = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(text)) => {
                let unescaped = text.unescape().map_err(|err| {
                    format!("invalid text at byte {}: {err}", reader.buffer_position())
                })?;
                out.push_str(&unescaped);
            }
            Ok(Event::CData(data)) => {
                out.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(format!(
                    "malformed markup at byte {}: {err}",
                    reader.buffer_position()
                ));
            }
        }
    }

    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE_TTML: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<tt xml:lang="es" xmlns="http://www.w3.org/ns/ttml">
<body>
<div>
<p begin="00:00:00.000" end="00:00:02.000">hola a todos</p>
<p begin="00:00:02.000" end="00:00:04.000">bienvenidos &amp; gracias</p>
</div>
</body>
</tt>
"#;

    #[test]
    fn ttml_text_is_flattened_and_trimmed() {
        let text = ttml_to_text(SAMPLE_TTML).unwrap();
        assert!(text.starts_with("hola a todos"));
        assert!(text.ends_with("bienvenidos & gracias"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn ttml_with_cdata_keeps_content() {
        let text = ttml_to_text("<tt><p><![CDATA[a < b]]></p></tt>").unwrap();
        assert_eq!(text, "a < b");
    }

    #[test]
    fn broken_markup_is_rejected() {
        assert!(ttml_to_text("<tt><p>unclosed</x></tt>").is_err());
    }

    #[test]
    fn raw_lookup_matches_only_the_requested_item() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Title A_ID:abc.es.ttml"), "x").unwrap();
        fs::write(dir.path().join("Title B_ID:xabc.es.ttml"), "x").unwrap();
        fs::write(dir.path().join("Title A_ID:abc.en.ttml"), "x").unwrap();
        fs::write(dir.path().join("Title C_ID:def.es.ttml"), "x").unwrap();

        let found = find_raw_files(dir.path(), "abc", "es");
        assert_eq!(found, vec![dir.path().join("Title A_ID:abc.es.ttml")]);
        assert!(find_raw_files(&dir.path().join("missing"), "abc", "es").is_empty());
    }

    #[cfg(unix)]
    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("yt-dlp");
        fs::write(&path, format!("#!/usr/bin/env bash\nset -eu\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn yt_dlp_writes_into_the_template() {
        let dir = tempdir().unwrap();
        let stub = install_stub(
            dir.path(),
            r#"output=""; lang=""
while [[ $# -gt 0 ]]; do
  case "$1" in
    --output) shift; output="$1" ;;
    --sub-langs) shift; lang="$1" ;;
  esac
  shift
done
target="${output%.%(ext)s}.${lang}.ttml"
mkdir -p "$(dirname "$target")"
echo '<tt><p>hola</p></tt>' > "$target""#,
        );
        let fetcher = YtDlp::new(stub);
        let template = dir.path().join("out").join("Video_ID:abc.%(ext)s");
        fetcher.download("abc", "es", &template).unwrap();

        let found = find_raw_files(&dir.path().join("out"), "abc", "es");
        assert_eq!(found.len(), 1);
        let text = ttml_to_text(&fs::read_to_string(&found[0]).unwrap()).unwrap();
        assert_eq!(text, "hola");
    }

    #[cfg(unix)]
    #[test]
    fn yt_dlp_failure_reports_last_stderr_line() {
        let dir = tempdir().unwrap();
        let stub = install_stub(dir.path(), "echo 'ERROR: video unavailable' >&2\nexit 1");
        let err = YtDlp::new(stub)
            .download("gone", "es", &dir.path().join("x.%(ext)s"))
            .unwrap_err();
        assert!(err.contains("ERROR: video unavailable"));
        assert!(err.contains("gone"));
    }

    #[test]
    fn ensure_available_fails_for_missing_program() {
        let fetcher = YtDlp::new("/nonexistent/definitely-not-yt-dlp");
        let err = fetcher.ensure_available().unwrap_err();
        assert!(err.to_string().contains("not installed"));
    }
}
