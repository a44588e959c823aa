//! Utility functions.
use std::path::{Path, PathBuf};

/// This function searches upward from `start` for directories or files matching `item`. It returns
/// a `Vec<PathBuf>` to all found instances in order of closest to furthest away. The function only
/// searches up within subdirectories of `end`.
pub fn search_upward(
    start: impl AsRef<Path>,
    end: impl AsRef<Path>,
    item: impl AsRef<Path>,
) -> Vec<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .take_while(|p| p.starts_with(end.as_ref()))
        .map(|p| p.join(&item))
        .filter(|p| p.try_exists().is_ok_and(std::convert::identity))
        .collect()
}
