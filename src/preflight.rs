#![forbid(unsafe_code)]

//! Checks run once before any target is touched.

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;

use crate::subtitles::YtDlp;

/// Refuses to run as root so archive and checkpoint files stay owned by the
/// operator.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user or a dedicated service account");
    }
    Ok(())
}

/// Verifies the subtitle extractor can be started.
pub fn ensure_extractor(extractor: &YtDlp) -> Result<()> {
    extractor
        .ensure_available()
        .with_context(|| format!("checking subtitle extractor {}", extractor.program().display()))
}
