use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::core::Environment;
use crate::engine::{Outcome, TaskResult};
use crate::io;
use crate::mapping::InlineMap;

use super::{display_path, expand};

/// Errors that can occur when bundling JavaScript files.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No minifier command configured")]
    NoMinifier,

    /// The minifier returned a non-zero exit code.
    #[error("Minifier `{0}` failed: {1}")]
    Minifier(String, String),

    /// Failed to parse minifier output as UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Couldn't encode the source map: {0}")]
    SourceMap(#[from] sourcemap::Error),
}

/// One input of the bundle.
#[derive(Debug)]
pub struct Source {
    /// Project relative path.
    pub name: String,
    pub content: String,
}

/// Read every input. Files are joined as they are: bytes that are not valid
/// UTF-8, common in old vendor files, are replaced rather than rejected.
pub fn read_sources(root: &Utf8Path, paths: &[Utf8PathBuf]) -> Result<Vec<Source>, ScriptError> {
    paths
        .iter()
        .map(|path| {
            let bytes = fs::read(path)?;
            let name = display_path(root, path);
            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("{name} is not valid UTF-8, replacing invalid bytes");
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            };
            Ok(Source { name, content })
        })
        .collect()
}

/// Join sources with a newline, in order, and map every generated line back
/// to its file and line.
pub fn concat(file: &str, sources: &[Source]) -> (String, InlineMap) {
    let mut map = InlineMap::new(file);
    let mut out = String::new();
    let mut line = 0u32;

    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&source.content);

        let index = map.add_source(&source.name, &source.content);
        let count = source.content.split('\n').count() as u32;
        for offset in 0..count {
            map.add(line + offset, 0, index, offset, 0);
        }
        line += count;
    }

    (out, map)
}

/// Pipe a script through the minifier command.
pub fn minify(command: &[String], script: String) -> Result<String, ScriptError> {
    let (program, args) = command.split_first().ok_or(ScriptError::NoMinifier)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ScriptError::Minifier(command.join(" "), e.to_string()))?;

    // Feed stdin from another thread so a large script can't deadlock
    // against a full stdout pipe.
    let stdin = child.stdin.take();
    let writer = std::thread::spawn(move || -> std::io::Result<()> {
        if let Some(mut stdin) = stdin {
            stdin.write_all(script.as_bytes())?;
        }
        Ok(())
    });

    let output = child.wait_with_output()?;
    let written = writer
        .join()
        .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ScriptError::Minifier(command.join(" "), stderr));
    }
    written?;

    Ok(String::from_utf8(output.stdout)?)
}

/// Bundle the configured scripts into the staging directory.
///
/// A failing minifier is reported and degrades the task.
pub fn build(env: &Environment) -> TaskResult {
    let config = &env.config;
    let output = env.staging().join(&config.scripts.output);

    let paths = expand(&config.root, &config.scripts.include)?;
    let sources = read_sources(&config.root, &paths)?;

    let file = output.file_name().unwrap_or("main.js");
    let (mut script, map) = concat(file, &sources);

    if env.is_dist() {
        script = match minify(&config.scripts.minifier, script) {
            Ok(script) => script,
            Err(e) => {
                // Terminal bell, the watcher keeps running.
                eprint!("\x07");
                tracing::error!("{e}");
                return Ok(Outcome::Degraded(e.to_string()));
            }
        };
    } else {
        if !script.ends_with('\n') {
            script.push('\n');
        }
        script.push_str(&map.js_comment()?);
        script.push('\n');
    }

    io::write(&output, script)?;
    tracing::debug!(%output, files = sources.len(), "bundled scripts");
    Ok(Outcome::Done)
}
