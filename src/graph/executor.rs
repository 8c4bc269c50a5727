//! Graph execution.
//!
//! Runs one instance of a [`PipelineGraph`] to completion: every ready
//! node executes concurrently, failures poison everything reachable
//! downstream, and cancellation stops new nodes from starting. Retry is
//! applied here, uniformly per node; from the graph's perspective a task
//! either eventually succeeds or fails after exhausting its attempts.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::emit;
use crate::error::TaskError;
use crate::metrics::events::{TaskFinished, TaskStatus};
use crate::tasks::{RunContext, TaskOutcome, TaskRef};

use super::{NodeKind, NodeState, PipelineGraph};

/// Uniform retry policy applied to every task node.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// Terminal record for one node of a finished run.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub name: String,
    pub state: NodeState,
    /// Rows affected, for task nodes that succeeded.
    pub rows: Option<u64>,
    /// Attempts consumed (0 for nodes that never ran).
    pub attempts: u32,
    /// Error message for failed or poisoned nodes.
    pub error: Option<String>,
}

/// Everything that happened in one run, per node.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    /// True if every node succeeded.
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| n.state == NodeState::Succeeded)
    }

    /// The first node that ended the run: a failed node if any, otherwise
    /// the first poisoned or cancelled one.
    pub fn first_failure(&self) -> Option<&NodeReport> {
        self.nodes
            .iter()
            .find(|n| n.state == NodeState::Failed)
            .or_else(|| {
                self.nodes
                    .iter()
                    .find(|n| n.state != NodeState::Succeeded)
            })
    }

    /// Look up one node's report by name.
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Completed node future output.
struct NodeDone {
    idx: usize,
    attempts: u32,
    result: Result<TaskOutcome, TaskError>,
}

type NodeFuture = Pin<Box<dyn Future<Output = NodeDone> + Send>>;

/// Per-run mutable node state, kept apart from the immutable graph.
struct RunState<'g> {
    graph: &'g PipelineGraph,
    states: Vec<NodeState>,
    rows: Vec<Option<u64>>,
    attempts: Vec<u32>,
    errors: Vec<Option<String>>,
    /// Upstreams not yet succeeded, per node.
    remaining: Vec<usize>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g PipelineGraph) -> Self {
        let n = graph.len();
        Self {
            graph,
            states: vec![NodeState::Pending; n],
            rows: vec![None; n],
            attempts: vec![0; n],
            errors: vec![None; n],
            remaining: (0..n).map(|i| graph.upstream(i).len()).collect(),
        }
    }

    /// Mark a node succeeded and return its now-ready downstreams.
    fn mark_succeeded(&mut self, idx: usize, rows: Option<u64>) -> Vec<usize> {
        self.states[idx] = NodeState::Succeeded;
        self.rows[idx] = rows;
        emit!(TaskFinished {
            node: self.graph.node(idx).name().to_string(),
            status: TaskStatus::Succeeded,
        });

        let mut ready = Vec::new();
        for &next in self.graph.downstream(idx) {
            self.remaining[next] -= 1;
            if self.remaining[next] == 0 && self.states[next] == NodeState::Pending {
                ready.push(next);
            }
        }
        ready
    }

    /// Mark a node failed and poison everything reachable from it.
    fn mark_failed(&mut self, idx: usize, message: String) {
        let name = self.graph.node(idx).name().to_string();
        self.states[idx] = NodeState::Failed;
        self.errors[idx] = Some(message);
        emit!(TaskFinished {
            node: name.clone(),
            status: TaskStatus::Failed,
        });

        for next in self.graph.reachable_from(idx) {
            if self.states[next] == NodeState::Pending {
                self.states[next] = NodeState::UpstreamFailed;
                self.errors[next] = Some(format!("upstream '{name}' did not succeed"));
                emit!(TaskFinished {
                    node: self.graph.node(next).name().to_string(),
                    status: TaskStatus::UpstreamFailed,
                });
            }
        }
    }

    /// Mark every still-pending node cancelled.
    fn cancel_pending(&mut self) {
        for idx in 0..self.states.len() {
            if self.states[idx] == NodeState::Pending {
                self.states[idx] = NodeState::Cancelled;
                emit!(TaskFinished {
                    node: self.graph.node(idx).name().to_string(),
                    status: TaskStatus::Cancelled,
                });
            }
        }
    }

    fn into_report(self) -> RunReport {
        let nodes = self
            .states
            .into_iter()
            .enumerate()
            .map(|(idx, state)| NodeReport {
                name: self.graph.node(idx).name().to_string(),
                state,
                rows: self.rows[idx],
                attempts: self.attempts[idx],
                error: self.errors[idx].clone(),
            })
            .collect();
        RunReport { nodes }
    }
}

/// Executes a pipeline graph with a uniform retry policy.
pub struct Executor {
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl Executor {
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_shutdown(retry, CancellationToken::new())
    }

    /// Create an executor wired to an external cancellation token.
    pub fn with_shutdown(retry: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self { retry, shutdown }
    }

    /// Run one instance of the graph to completion.
    ///
    /// At most one instance should execute concurrently against the same
    /// warehouse tables; the caller owns that invariant.
    pub async fn run(&self, graph: &PipelineGraph, ctx: Arc<RunContext>) -> RunReport {
        let mut state = RunState::new(graph);
        let mut running: FuturesUnordered<NodeFuture> = FuturesUnordered::new();
        let mut cancelled = self.shutdown.is_cancelled();

        if cancelled {
            warn!("Run cancelled before any node started");
            state.cancel_pending();
            return state.into_report();
        }

        self.launch(graph.roots(), &mut state, &ctx, &mut running);

        while !running.is_empty() {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled(), if !cancelled => {
                    cancelled = true;
                    warn!("Cancellation observed; no new nodes will start");
                    state.cancel_pending();
                }

                Some(done) = running.next() => {
                    state.attempts[done.idx] = done.attempts;
                    let name = graph.node(done.idx).name();

                    match done.result {
                        Ok(outcome) => {
                            info!(
                                "[{}] succeeded ({} rows, {} attempt(s))",
                                name, outcome.rows, done.attempts
                            );
                            let ready = state.mark_succeeded(done.idx, Some(outcome.rows));
                            if !cancelled {
                                self.launch(ready, &mut state, &ctx, &mut running);
                            }
                        }
                        Err(err) => {
                            let message = error_chain(&err);
                            error!("[{}] failed after {} attempt(s): {}", name, done.attempts, message);
                            state.mark_failed(done.idx, message);
                        }
                    }
                }
            }
        }

        state.into_report()
    }

    /// Start every node in `ready`, cascading through barriers.
    fn launch(
        &self,
        ready: Vec<usize>,
        state: &mut RunState<'_>,
        ctx: &Arc<RunContext>,
        running: &mut FuturesUnordered<NodeFuture>,
    ) {
        let mut stack = ready;
        while let Some(idx) = stack.pop() {
            let node = state.graph.node(idx);
            match node.kind() {
                NodeKind::Barrier => {
                    // Barriers do no work; pass through immediately.
                    debug!("[{}] barrier passed", node.name());
                    stack.extend(state.mark_succeeded(idx, None));
                }
                NodeKind::Task(task) => {
                    info!("[{}] starting", node.name());
                    state.states[idx] = NodeState::Running;
                    running.push(Box::pin(run_with_retry(
                        idx,
                        node.name().to_string(),
                        task.clone(),
                        ctx.clone(),
                        self.retry,
                        self.shutdown.clone(),
                    )));
                }
            }
        }
    }
}

/// Run one task, retrying on failure up to the policy's attempt budget.
///
/// The delay between attempts races against cancellation; a cancelled
/// sleep surfaces the last error without further attempts.
async fn run_with_retry(
    idx: usize,
    name: String,
    task: TaskRef,
    ctx: Arc<RunContext>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) -> NodeDone {
    let max_attempts = retry.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match task.run(&ctx).await {
            Ok(outcome) => {
                return NodeDone {
                    idx,
                    attempts: attempt,
                    result: Ok(outcome),
                };
            }
            Err(err) if attempt < max_attempts => {
                warn!(
                    "[{}] attempt {}/{} failed, retrying in {:?}: {}",
                    name,
                    attempt,
                    max_attempts,
                    retry.delay,
                    error_chain(&err)
                );
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        return NodeDone { idx, attempts: attempt, result: Err(err) };
                    }
                    _ = tokio::time::sleep(retry.delay) => {}
                }
            }
            Err(err) => {
                return NodeDone {
                    idx,
                    attempts: attempt,
                    result: Err(err),
                };
            }
        }
    }
}

/// Render an error with its full source chain.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QualityError, TaskError};
    use crate::graph::GraphBuilder;
    use crate::tasks::test_support::context;
    use crate::tasks::{Task, TaskRef};
    use crate::warehouse::MemoryWarehouse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Task that fails a scripted number of times before succeeding, and
    /// records its executions in a shared log.
    struct ScriptedTask {
        name: &'static str,
        failures: AtomicU32,
        rows: u64,
        log: Arc<Mutex<Vec<&'static str>>>,
        cancel_on_run: Option<CancellationToken>,
    }

    impl ScriptedTask {
        fn succeeding(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> TaskRef {
            Arc::new(Self {
                name,
                failures: AtomicU32::new(0),
                rows: 1,
                log: log.clone(),
                cancel_on_run: None,
            })
        }

        fn failing(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, times: u32) -> TaskRef {
            Arc::new(Self {
                name,
                failures: AtomicU32::new(times),
                rows: 1,
                log: log.clone(),
                cancel_on_run: None,
            })
        }

        fn cancelling(
            name: &'static str,
            log: &Arc<Mutex<Vec<&'static str>>>,
            token: CancellationToken,
        ) -> TaskRef {
            Arc::new(Self {
                name,
                failures: AtomicU32::new(0),
                rows: 1,
                log: log.clone(),
                cancel_on_run: Some(token),
            })
        }
    }

    #[async_trait]
    impl Task for ScriptedTask {
        async fn run(&self, _ctx: &RunContext) -> Result<TaskOutcome, TaskError> {
            self.log.lock().unwrap().push(self.name);

            if let Some(token) = &self.cancel_on_run {
                token.cancel();
            }

            // Yield so sibling tasks interleave.
            tokio::task::yield_now().await;

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TaskError::Quality {
                    source: QualityError::Empty {
                        table: self.name.to_string(),
                    },
                });
            }
            Ok(TaskOutcome::rows(self.rows))
        }
    }

    fn test_ctx() -> Arc<RunContext> {
        Arc::new(context(Arc::new(MemoryWarehouse::new())))
    }

    fn fast_retry(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_linear_graph_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_task("first", ScriptedTask::succeeding("first", &log)).unwrap();
        builder.add_task("second", ScriptedTask::succeeding("second", &log)).unwrap();
        builder.add_edge("first", "second").unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(RetryPolicy::none())
            .run(&graph, test_ctx())
            .await;

        assert!(report.is_success());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(report.node("first").unwrap().rows, Some(1));
    }

    #[tokio::test]
    async fn test_barriers_pass_through() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_barrier("begin").unwrap();
        builder.add_task("work", ScriptedTask::succeeding("work", &log)).unwrap();
        builder.add_barrier("end").unwrap();
        builder.add_edge("begin", "work").unwrap();
        builder.add_edge("work", "end").unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(RetryPolicy::none())
            .run(&graph, test_ctx())
            .await;

        assert!(report.is_success());
        assert_eq!(report.node("begin").unwrap().rows, None);
        assert_eq!(report.node("begin").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_failure_poisons_downstream_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_task("root", ScriptedTask::succeeding("root", &log)).unwrap();
        builder.add_task("bad", ScriptedTask::failing("bad", &log, u32::MAX)).unwrap();
        builder.add_task("sibling", ScriptedTask::succeeding("sibling", &log)).unwrap();
        builder.add_task("gate", ScriptedTask::succeeding("gate", &log)).unwrap();
        builder.add_edges_to_all("root", &["bad", "sibling"]).unwrap();
        builder.add_edges_from_all(&["bad", "sibling"], "gate").unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(RetryPolicy::none())
            .run(&graph, test_ctx())
            .await;

        assert!(!report.is_success());
        assert_eq!(report.node("bad").unwrap().state, NodeState::Failed);
        // The sibling still completed; only the join node was poisoned.
        assert_eq!(report.node("sibling").unwrap().state, NodeState::Succeeded);
        assert_eq!(report.node("gate").unwrap().state, NodeState::UpstreamFailed);
        assert!(
            report
                .node("gate")
                .unwrap()
                .error
                .as_deref()
                .unwrap()
                .contains("upstream 'bad'")
        );
        assert!(!log.lock().unwrap().contains(&"gate"));
    }

    #[tokio::test]
    async fn test_first_failure_is_the_failed_node() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_task("bad", ScriptedTask::failing("bad", &log, u32::MAX)).unwrap();
        builder.add_task("after", ScriptedTask::succeeding("after", &log)).unwrap();
        builder.add_edge("bad", "after").unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(RetryPolicy::none())
            .run(&graph, test_ctx())
            .await;

        assert_eq!(report.first_failure().unwrap().name, "bad");
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_task("flaky", ScriptedTask::failing("flaky", &log, 2)).unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(fast_retry(3)).run(&graph, test_ctx()).await;

        let node = report.node("flaky").unwrap();
        assert_eq!(node.state, NodeState::Succeeded);
        assert_eq!(node.attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new();
        builder.add_task("doomed", ScriptedTask::failing("doomed", &log, u32::MAX)).unwrap();
        let graph = builder.build().unwrap();

        let report = Executor::new(fast_retry(3)).run(&graph, test_ctx()).await;

        let node = report.node("doomed").unwrap();
        assert_eq!(node.state, NodeState::Failed);
        assert_eq!(node.attempts, 4);
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_nodes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let mut builder = GraphBuilder::new();
        builder
            .add_task("canceller", ScriptedTask::cancelling("canceller", &log, token.clone()))
            .unwrap();
        builder.add_task("never", ScriptedTask::succeeding("never", &log)).unwrap();
        builder.add_edge("canceller", "never").unwrap();
        let graph = builder.build().unwrap();

        let executor = Executor::with_shutdown(RetryPolicy::none(), token);
        let report = executor.run(&graph, test_ctx()).await;

        assert_eq!(report.node("canceller").unwrap().state, NodeState::Succeeded);
        assert_eq!(report.node("never").unwrap().state, NodeState::Cancelled);
        assert!(!log.lock().unwrap().contains(&"never"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_starts_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        token.cancel();

        let mut builder = GraphBuilder::new();
        builder.add_task("task", ScriptedTask::succeeding("task", &log)).unwrap();
        let graph = builder.build().unwrap();

        let executor = Executor::with_shutdown(RetryPolicy::none(), token);
        let report = executor.run(&graph, test_ctx()).await;

        assert_eq!(report.node("task").unwrap().state, NodeState::Cancelled);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_graph_succeeds() {
        let graph = GraphBuilder::new().build().unwrap();
        let report = Executor::new(RetryPolicy::none())
            .run(&graph, test_ctx())
            .await;
        assert!(report.is_success());
        assert!(report.nodes.is_empty());
    }
}
