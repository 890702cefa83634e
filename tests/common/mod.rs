//! A throw-away theme project for the integration tests.

#![allow(dead_code)]

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use canham::{Config, Environment, Mode, TaskGraph};
use tempfile::TempDir;

pub struct Project {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

const CONFIG: &str = r#"
[paths]
assets = "public/theme-assets"

[scripts]
include = [
    "theme/node_modules/jquery/dist/jquery.js",
    "theme/js/canham.js",
    "theme/js/lib/**/*.js",
    "theme/js/contexts/**/*.js",
    "theme/js/main.js",
]
minifier = ["cat"]
"#;

const STYLES: &str = r#"@import "vars";

.logo {
  background: url(../images/logo.png) no-repeat;
}

.no-flexbox .row {
  float: left;
}

.row {
  display: flex;
  color: $accent;
}
"#;

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let project = Self { _dir: dir, root };
        project.write("Canham.toml", CONFIG);
        project.write("theme/htaccess", "Options -Indexes\n");
        project.write("theme/css/_vars.scss", "$accent: #c0ffee;\n");
        project.write("theme/css/main.scss", STYLES);
        project.write("theme/node_modules/jquery/dist/jquery.js", "var jQuery = {};\n");
        project.write("theme/js/canham.js", "var canham = { common: function () {} };\n");
        project.write("theme/js/lib/slider.js", "var slider = function () {};\n");
        project.write(
            "theme/js/contexts/home.js",
            "canham.pageHome = function () { if (Modernizr.touchevents) { slider(); } };\n",
        );
        project.write("theme/js/main.js", "jQuery(canham.ready);\n");
        project.write("theme/images/logo.png", [0x89u8, b'P', b'N', b'G', 1, 2, 3]);
        project.write("theme/images/icons/arrow.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        project
    }

    pub fn write(&self, rel: &str, contents: impl AsRef<[u8]>) {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.root.join(rel)).unwrap();
    }

    pub fn read(&self, path: impl AsRef<Utf8Path>) -> String {
        fs::read_to_string(self.root.join(path.as_ref())).unwrap()
    }

    pub fn env(&self, mode: Mode) -> Environment {
        Environment::new(mode, Config::load(&self.root, None).unwrap())
    }

    pub fn public(&self) -> Utf8PathBuf {
        self.root.join("public/theme-assets")
    }

    pub fn manifest(&self) -> Utf8PathBuf {
        self.root.join("theme/rev-manifest.json")
    }
}

pub fn graph() -> TaskGraph {
    canham::pipeline::pipeline().unwrap()
}
