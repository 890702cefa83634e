use crate::core::Environment;
use crate::engine::{Outcome, TaskResult};
use crate::io;

/// Copy the access-control file into the public directory, distribution
/// builds only.
pub fn build(env: &Environment) -> TaskResult {
    if !env.is_dist() {
        return Ok(Outcome::Done);
    }

    let config = &env.config;
    let source = config.resolve(&config.access.source);
    let target = env.assets().join(&config.access.name);

    if !source.is_file() {
        tracing::warn!("{source} not found, skipping");
        return Ok(Outcome::Done);
    }

    io::copy(&source, &target)?;
    tracing::debug!(%target, "copied access file");
    Ok(Outcome::Done)
}
