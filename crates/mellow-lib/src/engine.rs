//! The task graph and its executor.
//!
//! Tasks enter an [`Engine<Building>`] together with their declared input
//! and output files. Outputs and inputs meet in a shared artifact namespace:
//! each filesystem path has at most one producing task and any number of
//! consumers, and `seal()` turns those relationships into graph edges (a
//! second producer for the same path is a construction-time error).
//!
//! The sealed engine executes by walking the graph with
//! [`mellow_graph_utils::Walker`], so a task only starts after its
//! dependencies finished, with a semaphore bounding how many runnables are
//! in flight. Edges live in petgraph, keyed by node index; there is no
//! shared-ownership cycle to tear down afterwards.

use std::{
    collections::{BTreeSet, HashMap},
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use camino::Utf8PathBuf;
use futures::{stream::FuturesUnordered, StreamExt};
use mellow_graph_utils::Walker;
use mellow_paths::PackagePath;
use mellow_ui::ProgressUI;
use petgraph::{graph::NodeIndex, Direction, Graph};
use thiserror::Error;
use tracing::debug;

use crate::{hash_checker::HashChecker, runnable::Runnable};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("two tasks declare the same output '{path}': '{first}' and '{second}'")]
    DuplicateProducer {
        path: Utf8PathBuf,
        first: PackagePath,
        second: PackagePath,
    },
    #[error("duplicate task key '{0}'")]
    DuplicateKey(PackagePath),
    #[error(transparent)]
    Validate(#[from] mellow_graph_utils::Error),
    #[error(transparent)]
    Path(#[from] mellow_paths::PathError),
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("task executor panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What [`Engine::create_task`] needs to know about one task.
pub struct TaskDef {
    /// Rule name plus a disambiguating suffix, e.g. `/a/lib.compile`.
    pub key: PackagePath,
    pub root_build_dir: Utf8PathBuf,
    pub runnable: Runnable,
    /// Files whose hashes gate re-running.
    pub inputs: BTreeSet<Utf8PathBuf>,
    /// Files this task writes. At most one task may produce a given path.
    pub outputs: BTreeSet<Utf8PathBuf>,
    /// Fingerprint of non-file inputs (compiler, flags).
    pub non_file_inputs_key: String,
}

#[derive(Debug)]
pub struct BuildTask {
    pub key: PackagePath,
    pub runnable: Runnable,
    pub inputs: BTreeSet<Utf8PathBuf>,
    pub outputs: BTreeSet<Utf8PathBuf>,
    pub non_file_inputs_key: String,
    hash_filename: Utf8PathBuf,
}

#[derive(Debug, Default)]
struct Artifact {
    producer: Option<NodeIndex>,
    consumers: Vec<NodeIndex>,
}

#[derive(Debug, Default)]
pub struct Building;
#[derive(Debug, Default)]
pub struct Built;

#[derive(Debug)]
pub struct Engine<S = Built> {
    marker: PhantomData<S>,
    // Edges point from consumer to producer, so Outgoing = dependencies.
    task_graph: Graph<PackagePath, ()>,
    tasks: HashMap<PackagePath, Arc<BuildTask>>,
    task_lookup: HashMap<PackagePath, NodeIndex>,
    artifacts: HashMap<Utf8PathBuf, Artifact>,
}

impl Default for Engine<Building> {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine<Building> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
            task_graph: Graph::new(),
            tasks: HashMap::new(),
            task_lookup: HashMap::new(),
            artifacts: HashMap::new(),
        }
    }

    pub fn create_task(&mut self, def: TaskDef) -> Result<(), GraphError> {
        if self.tasks.contains_key(&def.key) {
            return Err(GraphError::DuplicateKey(def.key));
        }
        let hash_filename = def
            .key
            .append_no_sep(".hash")?
            .to_filesystem(&def.root_build_dir);
        let node = self.task_graph.add_node(def.key.clone());
        self.task_lookup.insert(def.key.clone(), node);

        for input in &def.inputs {
            self.artifacts
                .entry(input.clone())
                .or_default()
                .consumers
                .push(node);
        }
        for output in &def.outputs {
            let artifact = self.artifacts.entry(output.clone()).or_default();
            if let Some(producer) = artifact.producer {
                return Err(GraphError::DuplicateProducer {
                    path: output.clone(),
                    first: self.task_graph[producer].clone(),
                    second: def.key,
                });
            }
            artifact.producer = Some(node);
        }

        self.tasks.insert(
            def.key.clone(),
            Arc::new(BuildTask {
                key: def.key,
                runnable: def.runnable,
                inputs: def.inputs,
                outputs: def.outputs,
                non_file_inputs_key: def.non_file_inputs_key,
                hash_filename,
            }),
        );
        Ok(())
    }

    /// Wires producer/consumer edges and freezes the graph.
    pub fn seal(self) -> Result<Engine<Built>, GraphError> {
        let Engine {
            mut task_graph,
            tasks,
            task_lookup,
            artifacts,
            ..
        } = self;

        for artifact in artifacts.values() {
            let Some(producer) = artifact.producer else {
                continue;
            };
            for &consumer in &artifact.consumers {
                if consumer != producer {
                    task_graph.update_edge(consumer, producer, ());
                }
            }
        }

        mellow_graph_utils::validate_graph(&task_graph)?;

        Ok(Engine {
            marker: PhantomData,
            task_graph,
            tasks,
            task_lookup,
            artifacts,
        })
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ExecutionOptions {
    pub concurrency: usize,
    pub force_build: bool,
    pub force_test: bool,
}

#[derive(Debug, Clone)]
enum Outcome {
    Ran,
    Cached,
    Failed(String),
    Skipped,
}

/// End-of-run accounting, in deterministic task-key order.
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    pub total: usize,
    pub ran: usize,
    pub cached: usize,
    pub failed: Vec<(PackagePath, String)>,
    /// Tasks whose dependencies failed, so they never ran.
    pub did_not_run: Vec<PackagePath>,
}

impl ExecutionSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.did_not_run.is_empty()
    }

    pub fn counts_line(&self) -> String {
        format!(
            "Total:{} Ran:{} Cached:{} Failed:{} Didn't run:{}",
            self.total,
            self.ran,
            self.cached,
            self.failed.len(),
            self.did_not_run.len()
        )
    }
}

impl Engine<Built> {
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn task(&self, key: &PackagePath) -> Option<&Arc<BuildTask>> {
        self.tasks.get(key)
    }

    /// Dependency keys of a task, for tests and graph dumps.
    pub fn dependencies(&self, key: &PackagePath) -> Option<Vec<PackagePath>> {
        let node = self.task_lookup.get(key)?;
        Some(
            self.task_graph
                .neighbors_directed(*node, Direction::Outgoing)
                .map(|ix| self.task_graph[ix].clone())
                .collect(),
        )
    }

    /// Runs every task, respecting dependency order and the concurrency
    /// limit. A failed task poisons its dependents (they are recorded as
    /// not-run), but unrelated subgraphs keep going.
    pub async fn execute(
        self: Arc<Self>,
        options: ExecutionOptions,
        ui: Arc<ProgressUI>,
    ) -> Result<ExecutionSummary, ExecuteError> {
        let sema = Arc::new(tokio::sync::Semaphore::new(options.concurrency.max(1)));
        let outcomes: Arc<Mutex<HashMap<NodeIndex, Outcome>>> =
            Arc::new(Mutex::new(HashMap::new()));

        // Register tasks with the progress display in name order so the
        // total is known before anything starts.
        let mut handles = HashMap::new();
        let mut keys: Vec<&PackagePath> = self.tasks.keys().collect();
        keys.sort();
        for key in keys {
            handles.insert(key.clone(), ui.add_task(key.to_string()));
        }
        let handles = Arc::new(handles);

        let (walker, mut nodes) = Walker::walk(&self.task_graph);
        let mut running = FuturesUnordered::new();

        while let Some((node, done)) = nodes.recv().await {
            let this = self.clone();
            let sema = sema.clone();
            let ui = ui.clone();
            let outcomes = outcomes.clone();
            let handles = handles.clone();

            running.push(tokio::spawn(async move {
                let key = &this.task_graph[node];
                let task = this
                    .tasks
                    .get(key)
                    .expect("every graph node has a task")
                    .clone();

                let blocked = {
                    let outcomes = outcomes.lock().expect("outcome mutex poisoned");
                    this.task_graph
                        .neighbors_directed(node, Direction::Outgoing)
                        .any(|dep| {
                            matches!(
                                outcomes.get(&dep),
                                Some(Outcome::Failed(_)) | Some(Outcome::Skipped)
                            )
                        })
                };
                let outcome = if blocked {
                    debug!("skipping {key}: a dependency failed");
                    Outcome::Skipped
                } else {
                    let _permit = sema
                        .acquire()
                        .await
                        .expect("semaphore lives as long as the walk");
                    run_task(&task, handles[key], &ui, options).await
                };

                outcomes
                    .lock()
                    .expect("outcome mutex poisoned")
                    .insert(node, outcome);
                // Unblocks dependents; their skip check sees our outcome.
                done.send(()).ok();
            }));
        }

        walker.wait().await?;
        while let Some(joined) = running.next().await {
            joined?;
        }

        let outcomes = outcomes.lock().expect("outcome mutex poisoned");
        let mut summary = ExecutionSummary {
            total: self.tasks.len(),
            ..Default::default()
        };
        let mut sorted: Vec<(&PackagePath, NodeIndex)> = self
            .task_lookup
            .iter()
            .map(|(key, ix)| (key, *ix))
            .collect();
        sorted.sort();
        for (key, node) in sorted {
            match outcomes.get(&node) {
                Some(Outcome::Ran) => summary.ran += 1,
                Some(Outcome::Cached) => summary.cached += 1,
                Some(Outcome::Failed(message)) => {
                    summary.failed.push((key.clone(), message.clone()))
                }
                Some(Outcome::Skipped) | None => summary.did_not_run.push(key.clone()),
            }
        }
        Ok(summary)
    }
}

async fn run_task(
    task: &Arc<BuildTask>,
    handle: mellow_ui::TaskHandle,
    ui: &ProgressUI,
    options: ExecutionOptions,
) -> Outcome {
    ui.task_started(handle);

    let checker = HashChecker::new(
        task.hash_filename.clone(),
        task.inputs.clone(),
        task.outputs.clone(),
        &task.non_file_inputs_key,
    );
    // Hashing is file IO plus sha256; keep it off the async workers.
    let (up_to_date, checker) = tokio::task::spawn_blocking(move || {
        let mut checker = checker;
        let up_to_date = checker.is_up_to_date();
        (up_to_date, checker)
    })
    .await
    .expect("hash check does not panic");

    let needs_to_run = options.force_build
        || (options.force_test && task.runnable.is_test())
        || !up_to_date;

    let outcome = if needs_to_run {
        match task.runnable.run().await {
            Ok(()) => Outcome::Ran,
            Err(err) => Outcome::Failed(format!("{} failed: {err}", task.key)),
        }
    } else {
        Outcome::Cached
    };

    // Fingerprints are only persisted after a success; a failed task must
    // re-run next time.
    if !matches!(outcome, Outcome::Failed(_)) {
        tokio::task::spawn_blocking(move || checker.write_updated_hashes())
            .await
            .expect("hash write does not panic");
    }

    ui.task_done(handle, matches!(outcome, Outcome::Cached));
    outcome
}

#[cfg(test)]
mod tests {
    use mellow_paths::PackagePath;

    use super::*;
    use crate::runnable::{CppCompileLink, Runnable};

    fn key(s: &str) -> PackagePath {
        PackagePath::from_str(s).unwrap()
    }

    fn noop_task(
        root: &Utf8PathBuf,
        name: &str,
        inputs: &[&Utf8PathBuf],
        outputs: &[&Utf8PathBuf],
    ) -> TaskDef {
        TaskDef {
            key: key(name),
            root_build_dir: root.clone(),
            runnable: Runnable::CppCompileLink(CppCompileLink {
                name: key(name),
                main_output: None,
                compiler: "true".into(),
                cpp_flags: Vec::new(),
                is_library: true,
                input_sources: BTreeSet::new(),
                input_objects: BTreeSet::new(),
                system_lib_configs: BTreeSet::new(),
            }),
            inputs: inputs.iter().map(|p| (*p).clone()).collect(),
            outputs: outputs.iter().map(|p| (*p).clone()).collect(),
            non_file_inputs_key: String::new(),
        }
    }

    fn tmp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, root)
    }

    #[test]
    fn duplicate_producer_is_fatal_before_running() {
        let (_tmp, root) = tmp_root();
        let out = root.join("x.o");
        let mut engine = Engine::new();
        engine.create_task(noop_task(&root, "/a.compile", &[], &[&out])).unwrap();
        let err = engine
            .create_task(noop_task(&root, "/b.compile", &[], &[&out]))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateProducer { .. }), "{err}");
    }

    #[test]
    fn duplicate_key_is_fatal() {
        let (_tmp, root) = tmp_root();
        let mut engine = Engine::new();
        engine.create_task(noop_task(&root, "/a.compile", &[], &[])).unwrap();
        let err = engine
            .create_task(noop_task(&root, "/a.compile", &[], &[]))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey(_)));
    }

    #[test]
    fn artifacts_wire_consumer_to_producer() {
        let (_tmp, root) = tmp_root();
        let obj = root.join("a.o");
        let mut engine = Engine::new();
        engine.create_task(noop_task(&root, "/a.compile", &[], &[&obj])).unwrap();
        engine.create_task(noop_task(&root, "/b.compile", &[&obj], &[])).unwrap();
        let engine = engine.seal().unwrap();
        assert_eq!(
            engine.dependencies(&key("/b.compile")),
            Some(vec![key("/a.compile")])
        );
        assert_eq!(engine.dependencies(&key("/a.compile")), Some(vec![]));
    }

    #[tokio::test]
    async fn executes_everything_once() {
        let (_tmp, root) = tmp_root();
        let obj = root.join("a.o");
        let mut engine = Engine::new();
        engine.create_task(noop_task(&root, "/a.compile", &[], &[&obj])).unwrap();
        engine.create_task(noop_task(&root, "/b.compile", &[&obj], &[])).unwrap();
        let engine = Arc::new(engine.seal().unwrap());
        let summary = engine
            .execute(
                ExecutionOptions {
                    concurrency: 2,
                    force_build: false,
                    force_test: false,
                },
                Arc::new(ProgressUI::new()),
            )
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.ran, 2);
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents_but_not_siblings() {
        let (_tmp, root) = tmp_root();
        let broken_out = root.join("broken");
        let ok_out = root.join("ok.o");

        let mut engine = Engine::new();
        // A runnable that must fail: its compiler does not exist.
        engine
            .create_task(TaskDef {
                key: key("/broken.compile"),
                root_build_dir: root.clone(),
                runnable: Runnable::CppCompileLink(CppCompileLink {
                    name: key("/broken"),
                    main_output: Some(broken_out.clone()),
                    compiler: "/definitely/not/a/compiler".into(),
                    cpp_flags: Vec::new(),
                    is_library: true,
                    input_sources: BTreeSet::new(),
                    input_objects: BTreeSet::new(),
                    system_lib_configs: BTreeSet::new(),
                }),
                inputs: BTreeSet::new(),
                outputs: [broken_out.clone()].into_iter().collect(),
                non_file_inputs_key: String::new(),
            })
            .unwrap();
        engine
            .create_task(noop_task(&root, "/dependent.compile", &[&broken_out], &[]))
            .unwrap();
        engine
            .create_task(noop_task(&root, "/sibling.compile", &[], &[&ok_out]))
            .unwrap();

        let engine = Arc::new(engine.seal().unwrap());
        let summary = engine
            .execute(
                ExecutionOptions {
                    concurrency: 4,
                    force_build: false,
                    force_test: false,
                },
                Arc::new(ProgressUI::new()),
            )
            .await
            .unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, key("/broken.compile"));
        assert_eq!(summary.did_not_run, vec![key("/dependent.compile")]);
        assert_eq!(summary.ran, 1);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn second_run_is_cached() {
        let (_tmp, root) = tmp_root();
        let input = root.join("in.txt");
        std::fs::write(&input, "data").unwrap();

        let opts = ExecutionOptions {
            concurrency: 1,
            force_build: false,
            force_test: false,
        };

        for expect_cached in [false, true] {
            let mut engine = Engine::new();
            engine
                .create_task(noop_task(&root, "/a.compile", &[&input], &[]))
                .unwrap();
            let engine = Arc::new(engine.seal().unwrap());
            let summary = engine
                .execute(opts, Arc::new(ProgressUI::new()))
                .await
                .unwrap();
            assert_eq!(summary.cached, usize::from(expect_cached));
        }
    }

    #[tokio::test]
    async fn force_build_ignores_the_cache() {
        let (_tmp, root) = tmp_root();
        let mut first = Engine::new();
        first.create_task(noop_task(&root, "/a.compile", &[], &[])).unwrap();
        Arc::new(first.seal().unwrap())
            .execute(
                ExecutionOptions {
                    concurrency: 1,
                    force_build: false,
                    force_test: false,
                },
                Arc::new(ProgressUI::new()),
            )
            .await
            .unwrap();

        let mut second = Engine::new();
        second.create_task(noop_task(&root, "/a.compile", &[], &[])).unwrap();
        let summary = Arc::new(second.seal().unwrap())
            .execute(
                ExecutionOptions {
                    concurrency: 1,
                    force_build: true,
                    force_test: false,
                },
                Arc::new(ProgressUI::new()),
            )
            .await
            .unwrap();
        assert_eq!(summary.ran, 1);
        assert_eq!(summary.cached, 0);
    }
}
