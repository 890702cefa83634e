//! Project configuration.
//!
//! Every setting has a default that matches the conventional theme layout, so
//! a project without a `Canham.toml` builds out of the box:
//!
//! ```text
//! composer.json            extra.bolt-web-dir -> public web root
//! templates/               page templates (watched only)
//! theme/.env               DEVELOPMENT_URL for the proxy
//! theme/css/main.scss      stylesheet entry
//! theme/js/...             scripts, concatenated in a fixed order
//! theme/images/...         images
//! theme/htaccess           access-control file (dist only)
//! theme/_tmp/              staging directory
//! theme/rev-manifest.json  revision manifest (dist only)
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::ConfigError;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE: &str = "Canham.toml";

/// Environment variable holding the upstream URL proxied by `serve`.
pub const UPSTREAM_VAR: &str = "DEVELOPMENT_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root. Every relative path is resolved against it.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    /// Resolved public assets directory.
    #[serde(skip)]
    pub assets: Utf8PathBuf,
    pub paths: Paths,
    pub styles: Styles,
    pub scripts: Scripts,
    pub images: Images,
    pub features: Features,
    pub access: Access,
    pub serve: Serve,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub staging: Utf8PathBuf,
    /// Overrides the `composer.json` derived public directory.
    pub assets: Option<Utf8PathBuf>,
    pub manifest: Utf8PathBuf,
    pub templates: Utf8PathBuf,
    pub env_file: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Styles {
    pub entry: Utf8PathBuf,
    pub include: Vec<Utf8PathBuf>,
    pub watch: String,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scripts {
    /// Load order matters: libraries first, the entry module last.
    pub include: Vec<String>,
    pub watch: String,
    pub output: Utf8PathBuf,
    /// Command reading a script on stdin and writing it minified to stdout.
    pub minifier: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Images {
    pub source: String,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Features {
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Access {
    pub source: Utf8PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Serve {
    pub upstream: Option<String>,
    pub http_port: u16,
    pub ws_port: u16,
    pub debounce_ms: u64,
    pub ghost: Ghost,
}

/// Which interactions are mirrored between connected browsers.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Ghost {
    pub clicks: bool,
    pub forms: bool,
    pub scroll: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            assets: Utf8PathBuf::from("./theme-assets"),
            paths: Paths::default(),
            styles: Styles::default(),
            scripts: Scripts::default(),
            images: Images::default(),
            features: Features::default(),
            access: Access::default(),
            serve: Serve::default(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            staging: "theme/_tmp".into(),
            assets: None,
            manifest: "theme/rev-manifest.json".into(),
            templates: "templates".into(),
            env_file: "theme/.env".into(),
        }
    }
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            entry: "theme/css/main.scss".into(),
            include: vec!["theme/node_modules".into()],
            watch: "theme/css/**/*".into(),
            output: "styles/main.css".into(),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            include: vec![
                "theme/node_modules/jquery/dist/jquery.js".into(),
                "theme/js/canham.js".into(),
                "theme/js/lib/**/*.js".into(),
                "theme/js/contexts/**/*.js".into(),
                "theme/js/main.js".into(),
            ],
            watch: "theme/js/**/*".into(),
            output: "scripts/main.js".into(),
            minifier: vec!["esbuild".into(), "--minify".into(), "--loader=js".into()],
        }
    }
}

impl Default for Images {
    fn default() -> Self {
        Self {
            source: "theme/images/**/*".into(),
            output: "images".into(),
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self {
            output: "scripts/modernizr.js".into(),
        }
    }
}

impl Default for Access {
    fn default() -> Self {
        Self {
            source: "theme/htaccess".into(),
            name: ".htaccess".into(),
        }
    }
}

impl Default for Serve {
    fn default() -> Self {
        Self {
            upstream: None,
            http_port: 3000,
            ws_port: 1337,
            debounce_ms: 250,
            ghost: Ghost::default(),
        }
    }
}

impl Default for Ghost {
    fn default() -> Self {
        Self {
            clicks: false,
            forms: false,
            scroll: true,
        }
    }
}

/// The subset of `composer.json` we care about.
#[derive(Debug, Default, Deserialize)]
struct Composer {
    #[serde(default)]
    extra: ComposerExtra,
}

#[derive(Debug, Default, Deserialize)]
struct ComposerExtra {
    #[serde(rename = "bolt-web-dir")]
    web_dir: Option<Utf8PathBuf>,
}

impl Config {
    /// Load the configuration for the project at `root`.
    ///
    /// `file` defaults to [`CONFIG_FILE`] inside the root; a missing default
    /// file is not an error, a missing explicit one is.
    pub fn load(root: impl AsRef<Utf8Path>, file: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref().to_path_buf();

        let mut config = match file {
            Some(file) => Self::from_file(&root.join(file))?,
            None => {
                let path = root.join(CONFIG_FILE);
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    debug!(%path, "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.assets = match &config.paths.assets {
            Some(assets) => root.join(assets),
            None => web_dir(&root)?.join("theme-assets"),
        };
        config.root = root;

        Ok(config)
    }

    fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let config = toml::from_str(&text).map_err(|e| ConfigError::Toml(path.to_owned(), e))?;
        info!(%path, "loaded config");
        Ok(config)
    }

    /// Resolve a project-relative path against the root.
    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Load the env file and determine the upstream URL for the proxy.
    ///
    /// A missing env file only produces a log line.
    pub fn load_env(&self) -> Option<String> {
        let path = self.resolve(&self.paths.env_file);
        if let Err(e) = dotenvy::from_path(&path) {
            error!(%path, "could not load env file: {e}");
        }

        self.serve
            .upstream
            .clone()
            .or_else(|| std::env::var(UPSTREAM_VAR).ok())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Web root declared by `composer.json`, or the project root.
fn web_dir(root: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let path = root.join("composer.json");
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(root.to_path_buf()),
        Err(e) => return Err(ConfigError::Read(path, e)),
    };

    let composer: Composer =
        serde_json::from_str(&text).map_err(|e| ConfigError::Composer(path, e))?;

    Ok(match composer.extra.web_dir {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    })
}
