//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: `notify` monitors the static roots of the script,
//!    style, image and template patterns. Events are debounced so a burst of
//!    saves produces a single rebuild.
//! 2. **Keyboard**: single-key commands read in raw mode (see `keys`).
//! 3. **Live reload** (`serve` only): a websocket hub plus an HTTP proxy that
//!    injects the client script into every HTML page (see `reload`, `http`).
//!
//! ## The Loop
//!
//! Both sources feed one channel. For every debounced batch, the changed
//! paths are mapped to [`Trigger`]s, and each trigger re-runs its fixed task
//! chain as a strict sequence. Triggers hit by the same batch run in
//! declaration order. A chain that degraded or failed never reloads the
//! browser, so broken output is not pushed to open pages.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use super::keys::{self, Command};
use crate::config::Config;
use crate::core::{Environment, Reload};
use crate::engine::{RunReport, Step, TaskGraph};
use crate::error::{CanhamError, WatchError};

/// A class of source change, each bound to a task chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Trigger {
    Scripts,
    Styles,
    Images,
    Templates,
    /// Manual, from the keyboard only.
    Features,
}

impl Trigger {
    pub(crate) fn chain(self) -> &'static [&'static str] {
        match self {
            Trigger::Scripts => &["js", "rev"],
            Trigger::Styles => &["css", "rev"],
            Trigger::Images => &["img", "rev"],
            Trigger::Templates => &["rev"],
            Trigger::Features => &["modernizr", "rev"],
        }
    }

    /// Chains ending in an explicit full-page reload. Every other chain stages
    /// output, and the revision step announces what it copies.
    pub(crate) fn reloads(self) -> bool {
        matches!(self, Trigger::Templates)
    }
}

enum Event {
    Fs(DebounceEventResult),
    Key(Command),
}

/// Globs observed for each file-driven trigger.
fn watch_globs(config: &Config) -> [(Trigger, Utf8PathBuf); 4] {
    [
        (Trigger::Scripts, config.resolve(&config.scripts.watch)),
        (Trigger::Styles, config.resolve(&config.styles.watch)),
        (Trigger::Images, config.resolve(&config.images.source)),
        (Trigger::Templates, config.resolve(&config.paths.templates).join("**/*")),
    ]
}

/// Triggers hit by a batch of changed paths.
fn triggers<'a>(
    filters: &[(Trigger, Pattern)],
    paths: impl IntoIterator<Item = &'a Path>,
) -> BTreeSet<Trigger> {
    let mut hit = BTreeSet::new();
    for path in paths {
        for (trigger, pattern) in filters {
            if pattern.matches_path(path) {
                hit.insert(*trigger);
            }
        }
    }
    hit
}

fn run_chain(graph: &TaskGraph, env: &Environment, trigger: Trigger) -> Option<RunReport> {
    let start = Instant::now();
    let steps: Vec<Step> = trigger.chain().iter().map(|&name| Step::from(name)).collect();

    match graph.sequence(env, &steps) {
        Ok(report) if report.is_clean() => {
            if trigger.reloads() {
                env.notify(Reload::Full);
            }
            tracing::info!(
                "{trigger:?} rebuilt {}, watching for changes...",
                crate::io::as_overhead(start)
            );
            Some(report)
        }
        Ok(report) => {
            for (task, reason) in report.degraded() {
                tracing::warn!(task, "{reason}");
            }
            tracing::warn!("{trigger:?} rebuilt with errors, not reloading");
            Some(report)
        }
        Err(e) => {
            tracing::error!("{e}");
            None
        }
    }
}

/// Build everything, then rebuild on change until the process is quit.
pub fn watch(graph: &TaskGraph, env: &Environment) -> Result<(), CanhamError> {
    tracing::info!("running initial build...");
    let start = Instant::now();
    match graph.run(env, ["build"]) {
        Ok(report) => tracing::info!(
            tasks = report.runs.len(),
            "initial build completed {}",
            crate::io::as_overhead(start)
        ),
        // Keep watching, the next save gets another attempt.
        Err(e) => tracing::error!("initial build failed: {e}"),
    }

    let (tx, rx) = channel();

    let tx_fs = tx.clone();
    let mut debouncer = new_debouncer(
        Duration::from_millis(env.config.serve.debounce_ms),
        None,
        move |result: DebounceEventResult| {
            let _ = tx_fs.send(Event::Fs(result));
        },
    )
    .map_err(WatchError::Notify)?;

    let mut watched = HashSet::new();
    let mut filters = Vec::new();
    for (trigger, glob) in watch_globs(&env.config) {
        match resolve_watch_path(&glob) {
            Ok((path, pattern)) => {
                watched.insert(path);
                filters.push((trigger, pattern));
            }
            Err(e) => tracing::warn!("not watching {glob}: {e}"),
        }
    }

    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer
            .watch(&path, RecursiveMode::Recursive)
            .map_err(WatchError::Notify)?;
    }

    let tx_key = tx;
    let raw = keys::listen(move |command| tx_key.send(Event::Key(command)).is_ok());

    loop {
        match rx.recv().map_err(WatchError::Recv)? {
            Event::Fs(Ok(events)) => {
                tracing::debug!("{} events received", events.len());

                let paths = events
                    .iter()
                    .filter(|de| !de.event.kind.is_access())
                    .flat_map(|de| de.event.paths.iter().map(|p| p.as_path()));

                let hit = triggers(&filters, paths);
                if !hit.is_empty() {
                    tracing::info!("change detected, re-running {:?}...", hit);
                }
                for trigger in hit {
                    let _ = run_chain(graph, env, trigger);
                }
            }
            Event::Fs(Err(errors)) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
            }
            Event::Key(Command::Features) => {
                tracing::info!("rebuilding feature detection...");
                let _ = run_chain(graph, env, Trigger::Features);
            }
            Event::Key(Command::Quit) => {
                if let Some(raw) = &raw {
                    raw.restore();
                }
                tracing::info!("bye");
                std::process::exit(0);
            }
        }
    }
}

/// [`watch`] behind the live-reload hub and the development HTTP server.
#[cfg(feature = "server")]
pub fn serve(graph: &TaskGraph, env: Environment) -> Result<(), CanhamError> {
    use super::http::{self, Backend};
    use super::reload::{self, Hub};

    let config = env.config.clone();
    let hub = Hub::start(config.serve.ws_port, config.serve.ghost).map_err(WatchError::Io)?;
    let env = env.with_reload(hub.sender.clone());

    let script = reload::client_script(hub.port, config.serve.ghost);
    let backend = match config.load_env() {
        Some(upstream) => Backend::Proxy { upstream, script },
        None => {
            tracing::warn!(
                "no {} configured, serving the public directory instead",
                crate::config::UPSTREAM_VAR
            );
            let dir = env.assets().parent().unwrap_or(env.assets());
            Backend::Static {
                dir: dir.to_path_buf(),
                script,
            }
        }
    };

    let _http = http::start(config.serve.http_port, backend);

    watch(graph, &env)
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // Canonicalize the static root (must exist on disk)
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent so that atomic writes
    // (write to temp, rename over) are still caught.
    let (watch_root, pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, Pattern::escape(absolute_root.as_str()))
    } else if suffix_part.as_str().is_empty() {
        (absolute_root.clone(), Pattern::escape(absolute_root.as_str()))
    } else {
        let pattern = format!("{}/{}", Pattern::escape(absolute_root.as_str()), suffix_part);
        (absolute_root, pattern)
    };

    Ok((watch_root, Pattern::new(&pattern)?))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::mpsc::Receiver;

    use super::*;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        for sub in ["theme/js/lib", "theme/css", "theme/images", "templates"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("README.md"), "hi").unwrap();
        (dir, root)
    }

    #[test]
    fn test_concrete_file() {
        let (_dir, root) = project();
        let (watch, pattern) = resolve_watch_path(root.join("README.md")).unwrap();

        assert_eq!(watch, root);
        assert_eq!(pattern.as_str(), root.join("README.md"));
    }

    #[test]
    fn test_concrete_directory() {
        let (_dir, root) = project();
        let (watch, pattern) = resolve_watch_path(root.join("templates")).unwrap();

        assert_eq!(watch, root.join("templates"));
        assert_eq!(pattern.as_str(), root.join("templates"));
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, root) = project();
        let (watch, pattern) = resolve_watch_path(root.join("theme/js/**/*.js")).unwrap();

        assert_eq!(watch, root.join("theme/js"));
        assert_eq!(pattern.as_str(), root.join("theme/js/**/*.js"));
    }

    #[test]
    fn test_missing_root() {
        let (_dir, root) = project();
        assert!(matches!(
            resolve_watch_path(root.join("nope/**/*")),
            Err(WatchError::Io(_))
        ));
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_paths_map_to_triggers() {
        let (_dir, root) = project();
        let config = Config {
            root: root.clone(),
            ..Config::default()
        };

        let filters: Vec<_> = watch_globs(&config)
            .into_iter()
            .map(|(trigger, glob)| (trigger, resolve_watch_path(glob).unwrap().1))
            .collect();

        let changed = [
            root.join("templates/page.twig"),
            root.join("theme/js/lib/util.js"),
            root.join("theme/_tmp/scripts/main.js"),
        ];
        let hit = triggers(&filters, changed.iter().map(|p| p.as_std_path()));

        // Fixed order, staging output is ignored.
        assert_eq!(
            hit.into_iter().collect::<Vec<_>>(),
            vec![Trigger::Scripts, Trigger::Templates]
        );
    }

    #[test]
    fn test_chains() {
        assert_eq!(Trigger::Scripts.chain(), ["js", "rev"]);
        assert_eq!(Trigger::Styles.chain(), ["css", "rev"]);
        assert_eq!(Trigger::Images.chain(), ["img", "rev"]);
        assert_eq!(Trigger::Templates.chain(), ["rev"]);
        assert_eq!(Trigger::Features.chain(), ["modernizr", "rev"]);

        assert!(!Trigger::Scripts.reloads());
        assert!(Trigger::Templates.reloads());
        assert!(!Trigger::Styles.reloads());
        assert!(!Trigger::Images.reloads());
        assert!(!Trigger::Features.reloads());
    }

    /// A buildable theme whose environment reports reloads on a channel.
    fn live_project() -> (tempfile::TempDir, Environment, Receiver<Reload>) {
        let (dir, root) = project();
        fs::write(root.join("theme/css/main.scss"), ".row {\n  display: flex;\n}\n").unwrap();
        fs::write(root.join("theme/js/main.js"), "go();\n").unwrap();
        fs::write(root.join("theme/images/dot.svg"), "<svg/>").unwrap();
        fs::write(root.join("templates/page.twig"), "<html></html>").unwrap();

        let config = Config {
            root: root.clone(),
            assets: root.join("public/theme-assets"),
            ..Config::default()
        };
        let (tx, rx) = std::sync::mpsc::channel();
        let env = Environment::new(crate::core::Mode::Dev, config).with_reload(tx);

        let graph = crate::pipeline::pipeline().unwrap();
        assert!(graph.run(&env, ["build"]).unwrap().is_clean());
        let _: Vec<_> = rx.try_iter().collect();

        (dir, env, rx)
    }

    #[test]
    fn test_script_change_reloads_once() {
        let (_dir, env, rx) = live_project();
        let graph = crate::pipeline::pipeline().unwrap();
        fs::write(env.config.root.join("theme/js/main.js"), "go(1);\n").unwrap();

        let report = run_chain(&graph, &env, Trigger::Scripts).unwrap();
        assert!(report.ran("js") && report.ran("rev"));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [Reload::Full]);
    }

    #[test]
    fn test_style_change_is_injected() {
        let (_dir, env, rx) = live_project();
        let graph = crate::pipeline::pipeline().unwrap();
        fs::write(env.config.root.join("theme/css/main.scss"), ".row {\n  color: red;\n}\n").unwrap();

        run_chain(&graph, &env, Trigger::Styles).unwrap();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [Reload::Inject("styles/main.css".into())]
        );
    }

    #[test]
    fn test_template_change_reloads() {
        let (_dir, env, rx) = live_project();
        let graph = crate::pipeline::pipeline().unwrap();

        let report = run_chain(&graph, &env, Trigger::Templates).unwrap();
        assert!(report.ran("rev"));
        assert!(!report.ran("js"));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [Reload::Full]);
    }

    #[test]
    fn test_broken_style_does_not_reload() {
        let (_dir, env, rx) = live_project();
        let graph = crate::pipeline::pipeline().unwrap();
        fs::write(env.config.root.join("theme/css/main.scss"), "a { color: $nope; }\n").unwrap();

        let report = run_chain(&graph, &env, Trigger::Styles).unwrap();
        assert!(!report.is_clean());
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_feature_chain_skips_styles_and_scripts() {
        let (_dir, env, _rx) = live_project();
        let graph = crate::pipeline::pipeline().unwrap();

        let report = run_chain(&graph, &env, Trigger::Features).unwrap();
        assert!(report.ran("modernizr") && report.ran("rev"));
        assert!(!report.ran("css"));
        assert!(!report.ran("js"));
    }
}
