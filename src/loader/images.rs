use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::core::Environment;
use crate::engine::{Outcome, TaskResult};
use crate::io;

use super::{expand, glob_base};

/// Copy every matched image into the staging directory, keeping its path
/// relative to the static part of the glob.
pub fn build(env: &Environment) -> TaskResult {
    let config = &env.config;
    let pattern = config.resolve(&config.images.source);
    let base = glob_base(&pattern);
    let target = env.staging().join(&config.images.output);

    let paths = expand(&config.root, &[&config.images.source])?;

    paths.par_iter().try_for_each(|path| {
        let rel = path.strip_prefix(&base).unwrap_or(path);
        io::copy(path, target.join(rel))
    })?;

    tracing::debug!(count = paths.len(), "copied images");
    Ok(Outcome::Done)
}
