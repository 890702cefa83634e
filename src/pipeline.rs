//! The default task catalogue.
//!
//! | task              | after             | action                                  |
//! |-------------------|-------------------|-----------------------------------------|
//! | `clean:css`       |                   | remove staged (dist: public) styles     |
//! | `css`             | `clean:css`       | compile the stylesheet                  |
//! | `clean:js`        |                   | remove staged (dist: public) scripts    |
//! | `js`              | `clean:js`        | bundle the scripts                      |
//! | `clean:modernizr` |                   | remove the staged detection script      |
//! | `modernizr`       | `clean:modernizr` | build the detection script              |
//! | `clean:img`       |                   | remove staged (dist: public) images     |
//! | `img`             | `clean:img`       | copy images                             |
//! | `clean:rev`       |                   | delete the manifest                     |
//! | `rev`             | `clean:rev`       | publish to the public directory         |
//! | `htaccess`        |                   | copy the access file (dist only)        |
//! | `clean:build`     |                   | remove staging (dist: public) entirely  |
//! | `build`           | `clean:build`     | `[htaccess, js, css, img]`, `modernizr`, `rev` |
//!
//! Development cleans leave the public directory alone: `rev` syncs it by
//! content, so an unchanged rebuild copies nothing.

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Environment;
use crate::engine::{Outcome, Step, Task, TaskGraph, TaskResult};
use crate::error::GraphError;
use crate::loader::{access, features, images, scripts, styles};
use crate::{io, revision};

/// Directory holding the first component of an output path, e.g. `styles`
/// for `styles/main.css`. A bare file name stands for itself.
fn family(output: &Utf8Path) -> Utf8PathBuf {
    output
        .components()
        .next()
        .map(|c| Utf8PathBuf::from(c.as_str()))
        .unwrap_or_default()
}

fn clean_family(env: &Environment, output: &Utf8Path) -> TaskResult {
    let family = family(output);
    io::remove(env.staging().join(&family))?;
    if env.is_dist() {
        io::remove(env.assets().join(&family))?;
    }
    Ok(Outcome::Done)
}

/// Scripts share their directory with the detection script, which has its
/// own clean step and is left in place.
fn clean_scripts(env: &Environment) -> TaskResult {
    let config = &env.config;
    let keep = &config.features.output;
    let family = family(&config.scripts.output);

    let staging = env.staging();
    for rel in io::files(staging.join(&family))? {
        let rel = family.join(rel);
        if &rel != keep {
            io::remove(staging.join(&rel))?;
        }
    }

    if env.is_dist() {
        io::remove(env.assets().join(&family))?;
    }
    Ok(Outcome::Done)
}

fn clean_features(env: &Environment) -> TaskResult {
    io::remove(env.staging().join(&env.config.features.output))?;
    Ok(Outcome::Done)
}

fn clean_manifest(env: &Environment) -> TaskResult {
    io::remove(env.config.resolve(&env.config.paths.manifest))?;
    Ok(Outcome::Done)
}

fn clean_build(env: &Environment) -> TaskResult {
    io::remove(env.staging())?;
    if env.is_dist() {
        io::remove(env.assets())?;
    }
    Ok(Outcome::Done)
}

/// Every task of the theme pipeline.
pub fn tasks() -> Vec<Task> {
    vec![
        Task::new("clean:css").run(|env| clean_family(env, &env.config.styles.output)),
        Task::new("css").after(["clean:css"]).run(styles::build),
        Task::new("clean:js").run(clean_scripts),
        Task::new("js").after(["clean:js"]).run(scripts::build),
        Task::new("clean:modernizr").run(clean_features),
        Task::new("modernizr").after(["clean:modernizr"]).run(features::build),
        Task::new("clean:img").run(|env| clean_family(env, &env.config.images.output)),
        Task::new("img").after(["clean:img"]).run(images::build),
        Task::new("clean:rev").run(clean_manifest),
        Task::new("rev").after(["clean:rev"]).run(revision::build),
        Task::new("htaccess").run(access::build),
        Task::new("clean:build").run(clean_build),
        Task::new("build").after(["clean:build"]).sequence([
            Step::group(["htaccess", "js", "css", "img"]),
            Step::from("modernizr"),
            Step::from("rev"),
        ]),
    ]
}

/// The validated default graph.
pub fn pipeline() -> Result<TaskGraph, GraphError> {
    TaskGraph::new(tasks())
}
