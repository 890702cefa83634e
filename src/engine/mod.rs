//! The task graph.
//!
//! A [`Task`] is a named unit of work with an explicit list of prerequisites.
//! Tasks are stored in a Directed Acyclic Graph where an edge `A -> B` means
//! "A must complete before B starts". The graph is validated once, when it is
//! constructed, so the runner never has to deal with unknown names or cycles.
//!
//! ## Actions
//!
//! * no action: the task is a pure ordering point and completes as soon as
//!   its prerequisites do;
//! * [`Task::run`]: a function of the [`Environment`];
//! * [`Task::sequence`]: a nested, strictly ordered list of [`Step`]s, for
//!   orderings that cannot be expressed through static prerequisites.

mod runner;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::core::Environment;
use crate::error::GraphError;

#[cfg(feature = "server")]
pub use runner::watch::serve;
#[cfg(feature = "live")]
pub use runner::watch::watch;
pub use runner::{RunReport, TaskRun};

/// Result of a task that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The task hit a recoverable error, reported it and produced partial (or
    /// no) output. Dependents still run.
    Degraded(String),
}

/// Result from a single executed task action.
pub type TaskResult = anyhow::Result<Outcome>;

type ActionFn = Arc<dyn Fn(&Environment) -> TaskResult + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Action {
    None,
    Run(ActionFn),
    Sequence(Vec<Step>),
}

/// One step of a sequence: a single task, or a group of tasks that may run
/// concurrently and must all finish before the next step starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Task(Cow<'static, str>),
    Group(Vec<Cow<'static, str>>),
}

impl Step {
    pub fn group<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        Step::Group(names.into_iter().map(Into::into).collect())
    }

    /// Parse the CLI spelling: `css` is a task, `css,js` a group.
    pub fn parse(arg: &str) -> Self {
        let names: Vec<_> = arg
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Cow::Owned(name.to_string()))
            .collect();

        match <[_; 1]>::try_from(names) {
            Ok([name]) => Step::Task(name),
            Err(names) => Step::Group(names),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        let slice = match self {
            Step::Task(name) => std::slice::from_ref(name),
            Step::Group(names) => names.as_slice(),
        };
        slice.iter().map(|name| &**name)
    }
}

impl From<&'static str> for Step {
    fn from(name: &'static str) -> Self {
        Step::Task(Cow::Borrowed(name))
    }
}

impl From<String> for Step {
    fn from(name: String) -> Self {
        Step::Task(Cow::Owned(name))
    }
}

/// A named unit of work.
#[derive(Clone)]
pub struct Task {
    pub(crate) name: Cow<'static, str>,
    pub(crate) after: Vec<Cow<'static, str>>,
    pub(crate) action: Action,
}

impl Task {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            action: Action::None,
        }
    }

    /// Declare prerequisites which must complete before this task starts.
    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.after.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn run<F>(mut self, action: F) -> Self
    where
        F: Fn(&Environment) -> TaskResult + Send + Sync + 'static,
    {
        self.action = Action::Run(Arc::new(action));
        self
    }

    pub fn sequence<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        self.action = Action::Sequence(steps.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match &self.action {
            Action::None => "none".to_string(),
            Action::Run(_) => "run(*)".to_string(),
            Action::Sequence(steps) => format!("sequence({steps:?})"),
        };

        f.debug_struct("Task")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("action", &action)
            .finish()
    }
}

/// A validated set of tasks.
pub struct TaskGraph {
    pub(crate) graph: DiGraph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for task in tasks {
            let name = task.name.to_string();
            if index.contains_key(&name) {
                return Err(GraphError::Duplicate(name));
            }
            index.insert(name, graph.add_node(task));
        }

        let mut edges = Vec::new();
        for node in graph.node_indices() {
            let task = &graph[node];
            for dep in &task.after {
                if dep == &task.name {
                    return Err(GraphError::SelfDependency(task.name.to_string()));
                }
                let Some(&source) = index.get(&**dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.name.to_string(),
                        dep: dep.to_string(),
                    });
                };
                edges.push((source, node));
            }
        }
        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(GraphError::Cycle(graph[cycle.node_id()].name.to_string()));
        }

        let graph = Self { graph, index };
        graph.validate_sequences()?;
        Ok(graph)
    }

    /// A sequence action must not (transitively) wait for the task that owns
    /// it, otherwise the nested run would block forever.
    fn validate_sequences(&self) -> Result<(), GraphError> {
        for node in self.graph.node_indices() {
            let task = &self.graph[node];
            let Action::Sequence(steps) = &task.action else {
                continue;
            };

            for name in steps.iter().flat_map(Step::names) {
                let Some(&step) = self.index.get(name) else {
                    return Err(GraphError::UnknownStep {
                        task: task.name.to_string(),
                        step: name.to_string(),
                    });
                };

                if self.reach(step).contains(&node) {
                    return Err(GraphError::SequenceLoop {
                        task: task.name.to_string(),
                        step: name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<NodeIndex> {
        self.index.get(name).copied()
    }

    /// The given tasks plus all of their transitive prerequisites.
    pub(crate) fn closure(&self, roots: &[NodeIndex]) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut found = HashSet::new();

        for &root in roots {
            let mut dfs = Dfs::new(reversed, root);
            while let Some(node) = dfs.next(reversed) {
                found.insert(node);
            }
        }

        found
    }

    /// Every task that may run when `start` runs: its prerequisites and,
    /// through sequence actions, the tasks it sequences.
    fn reach(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut found = HashSet::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for dep in self.closure(&[node]) {
                if !found.insert(dep) {
                    continue;
                }
                if let Action::Sequence(steps) = &self.graph[dep].action {
                    stack.extend(steps.iter().flat_map(Step::names).filter_map(|n| self.lookup(n)));
                }
            }
        }

        found
    }

    /// Names of all registered tasks in a valid execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        // The graph was checked for cycles on construction.
        toposort(&self.graph, None)
            .unwrap_or_default()
            .into_iter()
            .map(|node| &self.graph[node])
    }

    /// Direct prerequisites of a task.
    pub fn prerequisites(&self, name: &str) -> Vec<&str> {
        let Some(node) = self.lookup(name) else {
            return Vec::new();
        };

        let mut deps: Vec<_> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|dep| self.graph[dep].name())
            .collect();
        deps.sort_unstable();
        deps
    }
}

impl Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.graph.node_weights()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &'static str) -> Task {
        Task::new(name)
    }

    #[test]
    fn test_unknown_dependency() {
        let result = TaskGraph::new([noop("css").after(["clean:css"])]);
        assert_eq!(
            result.err(),
            Some(GraphError::UnknownDependency {
                task: "css".into(),
                dep: "clean:css".into()
            })
        );
    }

    #[test]
    fn test_self_dependency() {
        let result = TaskGraph::new([noop("a").after(["a"])]);
        assert_eq!(result.err(), Some(GraphError::SelfDependency("a".into())));
    }

    #[test]
    fn test_duplicate() {
        let result = TaskGraph::new([noop("a"), noop("a")]);
        assert_eq!(result.err(), Some(GraphError::Duplicate("a".into())));
    }

    #[test]
    fn test_cycle() {
        let result = TaskGraph::new([noop("a").after(["b"]), noop("b").after(["a"])]);
        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_sequence_unknown_step() {
        let result = TaskGraph::new([noop("build").sequence(["missing"])]);
        assert_eq!(
            result.err(),
            Some(GraphError::UnknownStep {
                task: "build".into(),
                step: "missing".into()
            })
        );
    }

    #[test]
    fn test_sequence_waiting_on_itself() {
        let result = TaskGraph::new([
            noop("build").sequence(["rev"]),
            noop("rev").after(["build"]),
        ]);
        assert!(matches!(result, Err(GraphError::SequenceLoop { .. })));
    }

    #[test]
    fn test_mutual_sequences() {
        let result = TaskGraph::new([noop("a").sequence(["b"]), noop("b").sequence(["a"])]);
        assert!(matches!(result, Err(GraphError::SequenceLoop { .. })));
    }

    #[test]
    fn test_closure_is_transitive() {
        let graph = TaskGraph::new([
            noop("clean"),
            noop("js").after(["clean"]),
            noop("rev").after(["js"]),
            noop("img"),
        ])
        .unwrap();

        let rev = graph.lookup("rev").unwrap();
        let names: HashSet<_> = graph
            .closure(&[rev])
            .into_iter()
            .map(|node| graph.graph[node].name().to_string())
            .collect();

        assert_eq!(names, HashSet::from(["clean".into(), "js".into(), "rev".into()]));
    }

    #[test]
    fn test_step_parse() {
        assert_eq!(Step::parse("css"), Step::from("css"));
        assert_eq!(Step::parse("css,js"), Step::group(["css", "js"]));
        assert_eq!(Step::parse(" css , js ,"), Step::group(["css", "js"]));
    }

    #[test]
    fn test_prerequisites_listing() {
        let graph = TaskGraph::new([
            noop("clean:css"),
            noop("clean:js"),
            noop("x").after(["clean:js", "clean:css"]),
        ])
        .unwrap();

        assert_eq!(graph.prerequisites("x"), vec!["clean:css", "clean:js"]);
        assert!(graph.prerequisites("missing").is_empty());
    }
}
