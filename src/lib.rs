#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cli;
pub mod config;
mod core;
pub mod dispatch;
pub mod engine;
mod error;
pub mod io;
pub mod loader;
#[cfg(feature = "logging")]
pub mod logging;
pub mod mapping;
pub mod pipeline;
pub mod revision;

use std::time::Instant;

use console::style;

pub use crate::cli::{Args, Command};
pub use crate::config::Config;
pub use crate::core::{Environment, Hash32, Mode, Reload};
pub use crate::dispatch::{Dispatcher, Initializer};
pub use crate::engine::{Outcome, RunReport, Step, Task, TaskGraph, TaskResult};
pub use crate::error::*;

/// Execute a parsed command line against the project it points at.
pub fn run(args: &Args) -> Result<(), CanhamError> {
    let root = args
        .root
        .canonicalize_utf8()
        .map_err(|e| ConfigError::Read(args.root.clone(), e))?;

    let config = Config::load(&root, args.config.as_deref())?;
    let graph = pipeline::pipeline()?;
    let env = Environment::new(args.mode(), config);

    tracing::debug!(?env, "starting");

    match args.command() {
        Command::Build => {
            let start = Instant::now();
            print_report(&graph.run(&env, ["build"])?, start);
        }
        command @ Command::Run { .. } => {
            let start = Instant::now();
            print_report(&graph.sequence(&env, &command.steps())?, start);
        }
        #[cfg(feature = "live")]
        Command::Watch => engine::watch(&graph, &env)?,
        #[cfg(feature = "server")]
        Command::Serve => engine::serve(&graph, env)?,
        Command::Tasks => {
            for task in graph.tasks() {
                let after = graph.prerequisites(task.name());
                if after.is_empty() {
                    println!("{}", style(task.name()).bold());
                } else {
                    println!("{} {}", style(task.name()).bold(), style(after.join(", ")).dim());
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &RunReport, start: Instant) {
    eprint!("{report}");
    for (task, reason) in report.degraded() {
        tracing::warn!(task, "finished with errors: {reason}");
    }
    tracing::info!("done {}", io::as_overhead(start));
}
