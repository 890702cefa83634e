//! Publishing staged assets.
//!
//! In distribution mode every staged file is fingerprinted
//! (`main.css` -> `main.1a2b3c4d.css`), references between text assets are
//! rewritten to the new names and a manifest mapping original to
//! fingerprinted paths is written for the templates.
//!
//! In development mode files keep their names and only changed files are
//! copied, which keeps reloads cheap.
//!
//! Both modes remove public files without a staged counterpart.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::core::{Environment, Hash32, Reload};
use crate::engine::{Outcome, TaskResult};
use crate::io;

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't encode the manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Original relative path to fingerprinted relative path, sorted.
pub type Manifest = BTreeMap<String, String>;

/// Files written to and removed from the public directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub copied: Vec<Utf8PathBuf>,
    pub pruned: Vec<Utf8PathBuf>,
}

const TEXT: &[&str] = &["css", "js", "svg", "json", "html", "txt"];

fn is_text(path: &Utf8Path) -> bool {
    path.extension().is_some_and(|ext| TEXT.contains(&ext))
}

/// Styles first, so scripts may reference fingerprinted stylesheets.
fn text_rank(path: &Utf8Path) -> u8 {
    match path.extension() {
        Some("css") => 0,
        Some("js") => 1,
        _ => 2,
    }
}

/// `styles/main.css` -> `styles/main.1a2b3c4d.css`
pub fn fingerprinted(path: &Utf8Path, hash: Hash32) -> Utf8PathBuf {
    let fingerprint = hash.fingerprint();
    let name = match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{stem}.{fingerprint}.{ext}"),
        _ => format!("{}.{fingerprint}", path.file_name().unwrap_or_default()),
    };
    path.with_file_name(name)
}

/// Path from the directory `from` to `to`, both relative to the same root.
fn relative(from: &Utf8Path, to: &Utf8Path) -> String {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(to[common..].iter().map(|c| c.as_str()));
    parts.join("/")
}

fn starts_ref(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => matches!(c, '"' | '\'' | '(' | '/' | '=' | ',' | ':') || c.is_whitespace(),
    }
}

fn ends_ref(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => matches!(c, '"' | '\'' | ')' | '?' | '#' | ',' | ';') || c.is_whitespace(),
    }
}

/// Replace whole-path occurrences of `from` with `to`.
fn replace_path(content: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = 0;

    for (at, _) in content.match_indices(from) {
        if at < rest {
            continue;
        }
        let before = content[..at].chars().next_back();
        let after = content[at + from.len()..].chars().next();
        if starts_ref(before) && ends_ref(after) {
            out.push_str(&content[rest..at]);
            out.push_str(to);
            rest = at + from.len();
        }
    }

    out.push_str(&content[rest..]);
    out
}

/// Rewrite references to already fingerprinted assets inside a text asset
/// located at `rel`. Both the root relative spelling (`images/a.png`, also
/// matching `/theme-assets/images/a.png`) and the spelling relative to the
/// file itself (`../images/a.png`) are recognised.
pub fn rewrite_refs(content: &str, rel: &Utf8Path, manifest: &Manifest) -> String {
    let dir = rel.parent().unwrap_or(Utf8Path::new(""));
    let mut content = content.to_string();

    for (original, revved) in manifest {
        let original = Utf8Path::new(original);
        let revved = Utf8Path::new(revved);
        if original == rel {
            continue;
        }

        let (Some(name), Some(revved_name)) = (original.file_name(), revved.file_name()) else {
            continue;
        };

        let mut spellings = vec![original.to_string(), relative(dir, original)];
        spellings.dedup();

        for spelling in spellings {
            if !content.contains(&spelling) {
                continue;
            }
            let target = format!("{}{revved_name}", &spelling[..spelling.len() - name.len()]);
            content = replace_path(&content, &spelling, &target);
        }
    }

    content
}

/// Fingerprint every staged file into the public directory.
pub fn publish(
    staging: &Utf8Path,
    public: &Utf8Path,
    exempt: &[&Utf8Path],
) -> Result<(Manifest, SyncReport), RevisionError> {
    let (mut text, binary): (Vec<_>, Vec<_>) =
        io::files(staging)?.into_iter().partition(|rel| is_text(rel));
    text.sort_by(|a, b| text_rank(a).cmp(&text_rank(b)).then_with(|| a.cmp(b)));

    let mut manifest = Manifest::new();
    let mut report = SyncReport::default();

    for rel in binary {
        let hash = Hash32::hash_file(staging.join(&rel))?;
        let revved = fingerprinted(&rel, hash);
        io::copy(staging.join(&rel), public.join(&revved))?;
        manifest.insert(rel.to_string(), revved.to_string());
        report.copied.push(revved);
    }

    for rel in text {
        let content = fs::read_to_string(staging.join(&rel))?;
        let content = rewrite_refs(&content, &rel, &manifest);
        let revved = fingerprinted(&rel, Hash32::hash(&content));
        io::write(public.join(&revved), content)?;
        manifest.insert(rel.to_string(), revved.to_string());
        report.copied.push(revved);
    }

    let keep: HashSet<_> = report.copied.iter().cloned().collect();
    report.pruned = prune(public, &keep, exempt)?;

    Ok((manifest, report))
}

/// Copy staged files whose content differs from the public copy.
pub fn sync(
    staging: &Utf8Path,
    public: &Utf8Path,
    exempt: &[&Utf8Path],
) -> Result<SyncReport, RevisionError> {
    let staged = io::files(staging)?;
    let mut report = SyncReport::default();

    for rel in &staged {
        let source = staging.join(rel);
        let target = public.join(rel);

        let unchanged = target.is_file() && Hash32::hash_file(&source)? == Hash32::hash_file(&target)?;
        if !unchanged {
            io::copy(&source, &target)?;
            report.copied.push(rel.clone());
        }
    }

    let keep: HashSet<_> = staged.into_iter().collect();
    report.pruned = prune(public, &keep, exempt)?;

    Ok(report)
}

fn prune(
    public: &Utf8Path,
    keep: &HashSet<Utf8PathBuf>,
    exempt: &[&Utf8Path],
) -> Result<Vec<Utf8PathBuf>, RevisionError> {
    let mut pruned = Vec::new();

    for rel in io::files(public)? {
        if keep.contains(&rel) || exempt.contains(&rel.as_path()) {
            continue;
        }
        io::remove(public.join(&rel))?;
        pruned.push(rel);
    }

    io::prune_empty(public)?;
    Ok(pruned)
}

/// Live-reload messages for a development sync: stylesheets are injected, any
/// other change reloads the page once.
pub fn reloads(report: &SyncReport) -> Vec<Reload> {
    let mut css = Vec::new();
    let mut full = false;

    for rel in &report.copied {
        match rel.extension() {
            Some("css") => css.push(Reload::Inject(rel.to_string())),
            _ => full = true,
        }
    }

    if full { vec![Reload::Full] } else { css }
}

/// Revision task.
pub fn build(env: &Environment) -> TaskResult {
    let config = &env.config;
    let staging = env.staging();
    let exempt = [Utf8Path::new(&config.access.name)];

    if env.is_dist() {
        let (manifest, report) = publish(&staging, env.assets(), &exempt)?;
        let path = config.resolve(&config.paths.manifest);
        io::write(&path, serde_json::to_string_pretty(&manifest).map_err(RevisionError::from)?)?;
        tracing::info!(
            files = report.copied.len(),
            pruned = report.pruned.len(),
            %path,
            "published fingerprinted assets"
        );
    } else {
        let report = sync(&staging, env.assets(), &exempt)?;
        tracing::info!(
            copied = report.copied.len(),
            pruned = report.pruned.len(),
            "synced public assets"
        );
        for reload in reloads(&report) {
            env.notify(reload);
        }
    }

    Ok(Outcome::Done)
}
