#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanhamError {
    #[error("Error while loading the configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Invalid task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Error while building the assets.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read {0}.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse {0}.\n{1}")]
    Toml(Utf8PathBuf, toml::de::Error),

    #[error("Couldn't parse {0}.\n{1}")]
    Composer(Utf8PathBuf, serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is registered more than once")]
    Duplicate(String),

    #[error("Task '{task}' depends on unknown task '{dep}'")]
    UnknownDependency { task: String, dep: String },

    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Task '{task}' sequences unknown task '{step}'")]
    UnknownStep { task: String, step: String },

    #[error("Task '{task}' sequences '{step}', which requires '{task}' itself")]
    SequenceLoop { task: String, step: String },

    #[error("Cycle detected in task graph involving '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}':\n{1:#}")]
    Task(String, anyhow::Error),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Recv(#[from] RecvError),
}
