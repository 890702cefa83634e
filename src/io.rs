use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static STYLE_BAR: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
});

pub(crate) static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Remove a file or a directory tree. Missing paths are fine.
pub fn remove(path: impl AsRef<Utf8Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Write a file, creating its parent directories first.
pub fn write(path: impl AsRef<Utf8Path>, contents: impl AsRef<[u8]>) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

/// Copy a file, creating the parent directories of the target first.
pub fn copy(from: impl AsRef<Utf8Path>, to: impl AsRef<Utf8Path>) -> std::io::Result<()> {
    let to = to.as_ref();
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from.as_ref(), to).map(|_| ())
}

/// Every file below `dir`, as sorted paths relative to it. A missing
/// directory has no files.
pub fn files(dir: impl AsRef<Utf8Path>) -> std::io::Result<Vec<Utf8PathBuf>> {
    let dir = dir.as_ref();
    let mut acc = Vec::new();

    match walk_rec(dir, Utf8Path::new(""), &mut acc) {
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        other => other?,
    }

    acc.sort();
    Ok(acc)
}

fn walk_rec(root: &Utf8Path, rel: &Utf8Path, acc: &mut Vec<Utf8PathBuf>) -> std::io::Result<()> {
    for entry in root.join(rel).read_dir_utf8()? {
        let entry = entry?;
        let path = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            walk_rec(root, &path, acc)?;
        } else {
            acc.push(path);
        }
    }
    Ok(())
}

/// Remove empty directories below `dir`, leaving `dir` itself.
pub fn prune_empty(dir: impl AsRef<Utf8Path>) -> std::io::Result<()> {
    fn rec(dir: &Utf8Path) -> std::io::Result<bool> {
        let mut empty = true;
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && rec(entry.path())? {
                fs::remove_dir(entry.path())?;
            } else {
                empty = false;
            }
        }
        Ok(empty)
    }

    match rec(dir.as_ref()) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other.map(|_| ()),
    }
}
