//! Command-line arguments.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use crate::core::Mode;
use crate::engine::Step;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "canham",
    version,
    about = "Build, fingerprint and live-reload theme assets.",
    long_about = None
)]
pub struct Args {
    /// Minify, fingerprint and write the revision manifest.
    #[arg(long, global = true)]
    pub dist: bool,

    /// Project root.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: Utf8PathBuf,

    /// Configuration file, relative to the root. Defaults to `Canham.toml`.
    #[arg(long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CANHAM_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build every asset once.
    Build,
    /// Build, then rebuild on change.
    #[cfg(feature = "live")]
    Watch,
    /// Watch behind the live-reload proxy.
    #[cfg(feature = "server")]
    Serve,
    /// Run steps in order; commas join tasks into a concurrent group.
    Run {
        #[arg(value_name = "STEP", required = true)]
        steps: Vec<String>,
    },
    /// List the tasks and their prerequisites.
    Tasks,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.dist { Mode::Dist } else { Mode::Dev }
    }

    /// The requested command, `serve` when none was given and the server is
    /// compiled in, `build` otherwise.
    pub fn command(&self) -> Command {
        match &self.command {
            Some(command) => command.clone(),
            #[cfg(feature = "server")]
            None => Command::Serve,
            #[cfg(not(feature = "server"))]
            None => Command::Build,
        }
    }
}

impl Command {
    /// Steps of a `run` command.
    pub fn steps(&self) -> Vec<Step> {
        match self {
            Command::Run { steps } => steps.iter().map(|s| Step::parse(s)).collect(),
            _ => Vec::new(),
        }
    }
}

/// Convenience wrapper around `Args::parse()`.
pub fn parse() -> Args {
    Args::parse()
}
