use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::engine::Outcome;

/// Execution record of a single task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

/// Tasks executed by one invocation, in completion order.
///
/// Returned by [`TaskGraph::run`](crate::TaskGraph::run) and
/// [`TaskGraph::sequence`](crate::TaskGraph::sequence).
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub runs: Vec<TaskRun>,
}

impl RunReport {
    /// True when no task reported a degraded outcome.
    pub fn is_clean(&self) -> bool {
        self.degraded().next().is_none()
    }

    pub fn ran(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Completion rank of a task within this invocation.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.runs.iter().position(|run| run.name == name)
    }

    pub fn degraded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.runs.iter().filter_map(|run| match &run.outcome {
            Outcome::Degraded(reason) => Some((run.name.as_str(), reason.as_str())),
            Outcome::Done => None,
        })
    }
}

/// Human readable summary, slowest task first.
impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut runs: Vec<_> = self.runs.iter().collect();
        runs.sort_by(|a, b| b.duration.cmp(&a.duration));

        let width = runs.iter().map(|run| run.name.len()).max().unwrap_or(0);

        for run in runs {
            let status = match run.outcome {
                Outcome::Done => "ok",
                Outcome::Degraded(_) => "degraded",
            };
            writeln!(
                f,
                "{:<width$}  {:>9.2?}  {status}",
                run.name,
                run.duration,
                width = width
            )?;
        }

        Ok(())
    }
}
