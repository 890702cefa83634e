//! Asset transforms. Each one reads sources from the theme and writes its
//! output into the staging directory.

pub mod access;
pub mod features;
pub mod images;
pub mod scripts;
pub mod styles;

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;

/// Expand globs in list order. Matches of one pattern are sorted, and a path
/// matched by several patterns keeps its first position.
pub(crate) fn expand<S: AsRef<str>>(
    root: &Utf8Path,
    patterns: &[S],
) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        let pattern = root.join(pattern.as_ref());

        let mut found = Vec::new();
        for path in glob(pattern.as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_file() {
                found.push(path);
            }
        }

        if found.is_empty() && !is_glob(pattern.as_str()) {
            tracing::warn!("{pattern} does not exist, skipping");
        }

        found.sort();
        for path in found {
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// The static directory part of a glob, matches are placed relative to it.
pub(crate) fn glob_base(pattern: &Utf8Path) -> Utf8PathBuf {
    pattern
        .components()
        .take_while(|c| !is_glob(c.as_str()))
        .collect()
}

/// Path shown in logs and source maps.
pub(crate) fn display_path(root: &Utf8Path, path: &Utf8Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string()
}
