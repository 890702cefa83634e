mod diagnostics;
#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod keys;
#[cfg(feature = "server")]
mod reload;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use rayon::Yield;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::engine::{Action, Outcome, Step, TaskGraph};
use crate::error::BuildError;

pub use diagnostics::{RunReport, TaskRun};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Running,
    Done,
    Failed,
}

enum Claim {
    Run,
    Done,
    Failed,
}

/// Shared state of one `run`/`sequence` call, including nested sequences
/// started by tasks of that call. It guarantees that every task runs at most
/// once per invocation.
#[derive(Default)]
struct Invocation {
    slots: Mutex<HashMap<NodeIndex, Slot>>,
    settled: Condvar,
    report: Mutex<RunReport>,
}

impl Invocation {
    fn is_done(&self, index: NodeIndex) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&index) == Some(&Slot::Done)
    }

    /// Reserve a task for execution. If another part of the invocation is
    /// already running it, block until it settles.
    fn claim(&self, index: NodeIndex) -> Claim {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if !slots.contains_key(&index) {
            slots.insert(index, Slot::Running);
            return Claim::Run;
        }

        let slots = self
            .settled
            .wait_while(slots, |slots| slots.get(&index) == Some(&Slot::Running))
            .unwrap_or_else(PoisonError::into_inner);

        match slots.get(&index) {
            Some(Slot::Done) => Claim::Done,
            _ => Claim::Failed,
        }
    }

    fn settle(&self, index: NodeIndex, ok: bool) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(index, if ok { Slot::Done } else { Slot::Failed });
        self.settled.notify_all();
    }

    fn record(&self, run: TaskRun) {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .runs
            .push(run);
    }

    fn into_report(self) -> RunReport {
        self.report.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wait for the next message without parking a pool thread. Nested
/// sequences coordinate from inside a worker, so while waiting the worker
/// helps with queued jobs instead.
fn next<T>(receiver: &Receiver<T>) -> Option<T> {
    loop {
        match receiver.try_recv() {
            Ok(msg) => return Some(msg),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            Some(Yield::Executed) => {}
            Some(Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(msg) => return Some(msg),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            },
            // Not on a pool thread, blocking is fine.
            None => return receiver.recv().ok(),
        }
    }
}

impl TaskGraph {
    /// Run the named tasks, concurrently where their prerequisites allow, after
    /// all of their transitive prerequisites. Every task runs exactly once.
    pub fn run<I, S>(&self, env: &Environment, names: I) -> Result<RunReport, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::borrow::Cow<'static, str>>,
    {
        self.sequence(env, &[Step::group(names)])
    }

    /// Run steps strictly left to right. A step starts only after the previous
    /// one, including all the prerequisites it pulled in, has completed.
    pub fn sequence(&self, env: &Environment, steps: &[Step]) -> Result<RunReport, BuildError> {
        let invocation = Invocation::default();
        self.run_steps(env, &invocation, steps)?;
        Ok(invocation.into_report())
    }

    fn run_steps(
        &self,
        env: &Environment,
        invocation: &Invocation,
        steps: &[Step],
    ) -> Result<(), BuildError> {
        for step in steps {
            let roots = step
                .names()
                .map(|name| {
                    self.lookup(name)
                        .ok_or_else(|| BuildError::UnknownTask(name.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let pending = self
                .closure(&roots)
                .into_iter()
                .filter(|&index| !invocation.is_done(index))
                .collect();

            self.run_pending(env, invocation, &pending)?;
        }

        Ok(())
    }

    /// Executes a set of tasks on the rayon pool. Tasks are dispatched as soon
    /// as their prerequisites within the set have completed.
    ///
    /// 1. Count, for every pending task, its prerequisites within the set.
    /// 2. Spawn every task whose count is zero.
    /// 3. Wait for any spawned task to report back over the channel.
    /// 4. On success, decrement the counts of its dependents and spawn those
    ///    reaching zero. On failure, stop spawning.
    /// 5. Repeat until nothing is in flight.
    fn run_pending(
        &self,
        env: &Environment,
        invocation: &Invocation,
        pending: &HashSet<NodeIndex>,
    ) -> Result<(), BuildError> {
        if pending.is_empty() {
            return Ok(());
        }

        let mut counts: HashMap<NodeIndex, usize> = pending
            .iter()
            .map(|&index| {
                let count = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .filter(|dep| pending.contains(dep))
                    .count();
                (index, count)
            })
            .collect();

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(pending.len() as u64);
        root_span.pb_set_style(&crate::io::STYLE_BAR);
        let _enter = root_span.enter();

        rayon::scope(|s| {
            let (sender, receiver) = channel::<(NodeIndex, anyhow::Result<()>)>();

            let spawn = |index: NodeIndex| {
                let sender = sender.clone();
                s.spawn(move |_| {
                    let result = self.execute(env, invocation, index);
                    // The receiver outlives every spawned task.
                    let _ = sender.send((index, result));
                });
            };

            let mut in_flight = 0usize;
            for (&index, _) in counts.iter().filter(|(_, count)| **count == 0) {
                spawn(index);
                in_flight += 1;
            }

            let mut failure = None;
            while in_flight > 0 {
                let Some((index, result)) = next(&receiver) else {
                    break;
                };
                in_flight -= 1;
                root_span.pb_inc(1);

                let name = self.graph[index].name();
                if let Err(err) = result {
                    tracing::error!(task = name, "task failed: {err:#}");
                    failure.get_or_insert(BuildError::Task(name.to_string(), err));
                    continue;
                }

                if failure.is_some() {
                    continue;
                }

                for dependent in self.graph.neighbors_directed(index, Direction::Outgoing) {
                    if let Some(count) = counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn(dependent);
                            in_flight += 1;
                        }
                    }
                }
            }

            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn execute(
        &self,
        env: &Environment,
        invocation: &Invocation,
        index: NodeIndex,
    ) -> anyhow::Result<()> {
        let task = &self.graph[index];

        match invocation.claim(index) {
            Claim::Run => {}
            Claim::Done => return Ok(()),
            Claim::Failed => return Err(anyhow!("'{}' failed earlier in this run", task.name)),
        }

        let span = tracing::span!(Level::INFO, "task", name = task.name());
        span.pb_set_style(&crate::io::STYLE_TASK);
        span.pb_set_message(&format!("Running {}", task.name()));
        let _enter = span.enter();

        let start = Instant::now();

        // Panics are contained to the task: everything it touches is either
        // owned by the task or only read through shared references.
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            match &task.action {
                Action::None => Ok(Outcome::Done),
                Action::Run(action) => action(env),
                Action::Sequence(steps) => self
                    .run_steps(env, invocation, steps)
                    .map(|_| Outcome::Done)
                    .map_err(anyhow::Error::from),
            }
        })) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    String::from("Task panicked with unknown payload")
                };

                Err(anyhow!(msg))
            }
        };

        let result = result.map(|outcome| {
            if let Outcome::Degraded(reason) = &outcome {
                tracing::warn!(task = task.name(), "{reason}");
            }
            invocation.record(TaskRun {
                name: task.name().to_string(),
                outcome,
                duration: start.elapsed(),
            });
        });

        invocation.settle(index, result.is_ok());
        tracing::debug!(task = task.name(), "finished {}", crate::io::as_overhead(start));

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::core::Mode;
    use crate::engine::Task;

    fn env() -> Environment {
        Environment::new(Mode::Dev, Config::default())
    }

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(name: &'static str, hits: &Arc<AtomicUsize>) -> Task {
        let hits = hits.clone();
        Task::new(name).run(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Done)
        })
    }

    #[test]
    fn test_prerequisites_complete_first() {
        let graph = TaskGraph::new([
            Task::new("clean:css").run(|_| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(Outcome::Done)
            }),
            Task::new("css").after(["clean:css"]).run(|_| Ok(Outcome::Done)),
        ])
        .unwrap();

        let report = graph.run(&env(), ["css"]).unwrap();
        assert!(report.position("clean:css").unwrap() < report.position("css").unwrap());
    }

    #[test]
    fn test_shared_prerequisite_runs_once() {
        let hits = counter();
        let graph = TaskGraph::new([
            counting("clean", &hits),
            Task::new("a").after(["clean"]),
            Task::new("b").after(["clean"]),
        ])
        .unwrap();

        let report = graph.run(&env(), ["a", "b"]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(report.runs.len(), 3);
    }

    #[test]
    fn test_sequence_is_strictly_ordered() {
        let graph = TaskGraph::new([
            Task::new("a").run(|_| {
                std::thread::sleep(Duration::from_millis(30));
                Ok(Outcome::Done)
            }),
            Task::new("b"),
            Task::new("c"),
        ])
        .unwrap();

        let report = graph
            .sequence(&env(), &[Step::group(["a", "b"]), "c".into()])
            .unwrap();

        let c = report.position("c").unwrap();
        assert!(report.position("a").unwrap() < c);
        assert!(report.position("b").unwrap() < c);
    }

    #[test]
    fn test_sequence_shares_completed_prerequisites() {
        let hits = counter();
        let graph = TaskGraph::new([
            counting("clean", &hits),
            Task::new("js").after(["clean"]),
            Task::new("rev").after(["clean"]),
        ])
        .unwrap();

        graph.sequence(&env(), &["js".into(), "rev".into()]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_separate_invocations_rerun() {
        let hits = counter();
        let graph = TaskGraph::new([counting("img", &hits)]).unwrap();

        graph.run(&env(), ["img"]).unwrap();
        graph.run(&env(), ["img"]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nested_sequence_action() {
        let hits = counter();
        let graph = TaskGraph::new([
            counting("clean", &hits),
            Task::new("js").after(["clean"]),
            Task::new("css").after(["clean"]),
            Task::new("modernizr"),
            Task::new("build").sequence([Step::group(["js", "css"]), "modernizr".into()]),
        ])
        .unwrap();

        let report = graph.run(&env(), ["build"]).unwrap();
        let modernizr = report.position("modernizr").unwrap();
        assert!(report.position("js").unwrap() < modernizr);
        assert!(report.position("css").unwrap() < modernizr);
        assert!(modernizr < report.position("build").unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_stops_dependents_but_siblings_finish() {
        let sibling = counter();
        let dependent = counter();

        let graph = TaskGraph::new([
            Task::new("broken").run(|_| Err(anyhow!("boom"))),
            {
                let sibling = sibling.clone();
                Task::new("slow").run(move |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    sibling.fetch_add(1, Ordering::SeqCst);
                    Ok(Outcome::Done)
                })
            },
            counting("after", &dependent).after(["broken"]),
        ])
        .unwrap();

        let result = graph.run(&env(), ["slow", "after"]);
        match result {
            Err(BuildError::Task(name, err)) => {
                assert_eq!(name, "broken");
                assert_eq!(err.to_string(), "boom");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(sibling.load(Ordering::SeqCst), 1);
        assert_eq!(dependent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_halts_later_steps() {
        let hits = counter();
        let graph = TaskGraph::new([
            Task::new("broken").run(|_| Err(anyhow!("boom"))),
            counting("next", &hits),
        ])
        .unwrap();

        assert!(graph.sequence(&env(), &["broken".into(), "next".into()]).is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_degraded_still_unlocks_dependents() {
        let graph = TaskGraph::new([
            Task::new("css").run(|_| Ok(Outcome::Degraded("syntax error".into()))),
            Task::new("rev").after(["css"]),
        ])
        .unwrap();

        let report = graph.run(&env(), ["rev"]).unwrap();
        assert!(report.ran("rev"));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_panic_is_contained() {
        let graph = TaskGraph::new([Task::new("panics").run(|_| panic!("oh no"))]).unwrap();

        match graph.run(&env(), ["panics"]) {
            Err(BuildError::Task(_, err)) => assert!(err.to_string().contains("oh no")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_task() {
        let graph = TaskGraph::new([Task::new("a")]).unwrap();
        assert!(matches!(
            graph.run(&env(), ["nope"]),
            Err(BuildError::UnknownTask(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_task_without_action_is_noop() {
        let graph = TaskGraph::new([Task::new("noop")]).unwrap();
        let report = graph.run(&env(), ["noop"]).unwrap();
        assert_eq!(report.runs[0].outcome, Outcome::Done);
    }
}
