use std::sync::Arc;
use std::sync::mpsc::Sender;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;

/// A 32-byte BLAKE3 hash used for fingerprinting and change detection.
///
/// It serves two purposes in the pipeline:
/// 1. Its short hex form is embedded in distribution file names
///    (`main.css` -> `main.1a2b3c4d.css`) so browsers can cache forever.
/// 2. In development mode it decides whether a staged file differs from the
///    copy already present in the public assets directory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// The fingerprint embedded into revisioned file names.
    pub fn fingerprint(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Selects between fast, source-mapped output and minified, fingerprinted
/// output. Chosen once at startup and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Unminified output with inline source maps, incremental public sync.
    #[default]
    Dev,
    /// Minified output, fingerprinted file names and a revision manifest.
    Dist,
}

/// A message for the live-reload layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reload {
    /// Refresh every connected page.
    Full,
    /// Swap a single stylesheet in place, identified by its public path.
    Inject(String),
}

/// Everything a task action needs to know about the current run.
///
/// The environment is created once per process and handed to every task by
/// reference, so no task depends on ambient global state.
#[derive(Clone)]
pub struct Environment {
    /// The build mode selected on the command line.
    pub mode: Mode,
    /// Resolved project configuration.
    pub config: Arc<Config>,
    reload: Option<Sender<Reload>>,
}

impl Environment {
    pub fn new(mode: Mode, config: impl Into<Arc<Config>>) -> Self {
        Self {
            mode,
            config: config.into(),
            reload: None,
        }
    }

    /// Attach a live-reload channel. Without one, [`Environment::notify`] is a
    /// no-op, which is what plain `build` and `watch` runs want.
    pub fn with_reload(mut self, sender: Sender<Reload>) -> Self {
        self.reload = Some(sender);
        self
    }

    pub fn is_dist(&self) -> bool {
        self.mode == Mode::Dist
    }

    pub fn notify(&self, message: Reload) {
        if let Some(sender) = &self.reload
            && sender.send(message).is_err()
        {
            tracing::debug!("live-reload channel closed");
        }
    }

    /// Absolute path of the staging directory.
    pub fn staging(&self) -> Utf8PathBuf {
        self.config.resolve(&self.config.paths.staging)
    }

    /// Absolute path of the public assets directory.
    pub fn assets(&self) -> &Utf8Path {
        &self.config.assets
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("mode", &self.mode)
            .field("root", &self.config.root)
            .field("reload", &self.reload.is_some())
            .finish()
    }
}
