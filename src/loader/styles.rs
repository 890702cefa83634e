use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use thiserror::Error;

use crate::core::Environment;
use crate::engine::{Outcome, TaskResult};
use crate::io;
use crate::mapping::InlineMap;

use super::display_path;

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The compiled CSS could not be prefixed or minified.
    #[error("CSS processing error: {0}")]
    Css(String),

    #[error("Couldn't encode the source map: {0}")]
    SourceMap(#[from] sourcemap::Error),
}

/// File system seen by the compiler. Remembers every file it was asked to
/// read, in order, so the source map can point back into them.
#[derive(Debug, Default)]
struct RecordingFs {
    loaded: Mutex<Vec<(PathBuf, String)>>,
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let data = std::fs::read(path)?;
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((path.to_path_buf(), String::from_utf8_lossy(&data).into_owned()));
        Ok(data)
    }
}

impl RecordingFs {
    fn into_loaded(self) -> Vec<(PathBuf, String)> {
        self.loaded.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The compiled stylesheet and the files that went into it.
struct Compiled {
    css: String,
    loaded: Vec<(PathBuf, String)>,
}

fn compile(entry: &Utf8Path, include: &[Utf8PathBuf]) -> Result<Compiled, StyleError> {
    let fs = RecordingFs::default();

    let mut options = grass::Options::default()
        .style(grass::OutputStyle::Expanded)
        .fs(&fs);
    for path in include {
        options = options.load_path(path);
    }

    let css = grass::from_path(entry, &options)?;
    drop(options);

    Ok(Compiled {
        css,
        loaded: fs.into_loaded(),
    })
}

/// Oldest browsers the theme still supports, as `major << 16`.
fn targets() -> Targets {
    Targets::from(Browsers {
        android: Some(4 << 16),
        chrome: Some(49 << 16),
        firefox: Some(52 << 16),
        ie: Some(10 << 16),
        ios_saf: Some(8 << 16),
        safari: Some(8 << 16),
        ..Browsers::default()
    })
}

/// Add vendor prefixes for [`targets`], and compress when `minify` is set.
fn process(css: &str, minify: bool) -> Result<String, StyleError> {
    let mut sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| StyleError::Css(e.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets: targets(),
            ..MinifyOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let printed = sheet
        .to_css(PrinterOptions {
            minify,
            targets: targets(),
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    Ok(printed.code)
}

/// Map every selector and declaration line of the output back to the first
/// source line that spells it the same way.
fn source_map(root: &Utf8Path, file: &str, css: &str, loaded: &[(PathBuf, String)]) -> InlineMap {
    let mut map = InlineMap::new(file);

    let sources: Vec<(u32, Vec<&str>)> = loaded
        .iter()
        .map(|(path, content)| {
            let name = match Utf8Path::from_path(path) {
                Some(path) => display_path(root, path),
                None => path.to_string_lossy().into_owned(),
            };
            (map.add_source(&name, content), content.lines().collect())
        })
        .collect();

    for (line, text) in css.lines().enumerate() {
        let needle = text.trim().trim_end_matches(['{', ';']).trim();
        if needle.is_empty() || needle == "}" {
            continue;
        }

        // Fall back to the property name alone, values are often computed.
        let fallback = needle.split_once(':').map(|(property, _)| format!("{}:", property.trim()));

        let found = find(&sources, needle)
            .or_else(|| fallback.as_deref().and_then(|needle| find(&sources, needle)));

        if let Some((source, source_line, column)) = found {
            let indent = text.len() - text.trim_start().len();
            map.add(line as u32, indent as u32, source, source_line, column);
        }
    }

    map
}

fn find(sources: &[(u32, Vec<&str>)], needle: &str) -> Option<(u32, u32, u32)> {
    sources.iter().find_map(|(source, lines)| {
        lines.iter().enumerate().find_map(|(i, line)| {
            line.find(needle)
                .map(|column| (*source, i as u32, column as u32))
        })
    })
}

/// Compile the stylesheet entry into the staging directory.
///
/// A compilation error is reported and degrades the task; nothing is written.
pub fn build(env: &Environment) -> TaskResult {
    let config = &env.config;
    let entry = config.resolve(&config.styles.entry);
    let include: Vec<_> = config.styles.include.iter().map(|p| config.resolve(p)).collect();
    let output = env.staging().join(&config.styles.output);

    match render(env, &entry, &include, &output) {
        Ok(css) => {
            io::write(&output, css)?;
            tracing::debug!(%output, "compiled stylesheet");
            Ok(Outcome::Done)
        }
        Err(StyleError::Io(e)) => Err(e.into()),
        Err(e) => {
            // Terminal bell, the watcher keeps running.
            eprint!("\x07");
            tracing::error!("{e}");
            Ok(Outcome::Degraded(e.to_string()))
        }
    }
}

fn render(
    env: &Environment,
    entry: &Utf8Path,
    include: &[Utf8PathBuf],
    output: &Utf8Path,
) -> Result<String, StyleError> {
    let Compiled { css, loaded } = compile(entry, include)?;
    let css = process(&css, env.is_dist())?;

    if env.is_dist() {
        return Ok(css);
    }

    let file = output.file_name().unwrap_or("main.css");
    let map = source_map(&env.config.root, file, &css, &loaded);

    let mut css = css;
    if !css.ends_with('\n') {
        css.push('\n');
    }
    css.push_str(&map.css_comment()?);
    css.push('\n');
    Ok(css)
}
