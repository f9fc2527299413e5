//! Plan executor for applying change sets.
//!
//! The executor runs a change set as a bounded pool of tokio tasks. Each
//! node keeps a count of the changes it still waits for; a node whose count
//! reaches zero becomes ready and is started as soon as a slot is free.
//!
//! - Creates and updates wait for the creates and updates of their
//!   dependencies.
//! - A delete waits for the deletes (and updates) of every resource whose
//!   record depends on it.
//!
//! A failed node never aborts the run. Its transitive dependents are
//! skipped, independent branches carry on, and every failure is reported
//! together at the end.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{DeclarationHasher, DEFAULT_CONCURRENCY};
use crate::error::{ConvergeError, ReconcileError, Result};
use crate::model::{resolve_attributes, Attributes, ResourceId};
use crate::provider::Provider;
use crate::state::{check_revision, Revision, StateRecord, StateStore};

use super::cell::OutputCells;
use super::plan::{Action, ChangeSet, PlannedChange};

/// Executor for change sets.
pub struct PlanExecutor {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn Provider>,
    concurrency: usize,
    cancel: Option<watch::Receiver<bool>>,
}

/// Lifecycle of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Waiting for dependencies or a free slot.
    Pending,
    /// Provider call in flight.
    Running,
    /// Applied and recorded.
    Succeeded,
    /// The provider or state store reported an error.
    Failed,
    /// Never started, because a dependency failed or the run was cancelled.
    Skipped,
}

/// Outcome of a single node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeOutcome {
    /// Resource identity.
    pub id: ResourceId,
    /// Action that was attempted.
    pub action: Action,
    /// Terminal status.
    pub status: NodeStatus,
    /// Provider identifier after the action.
    pub provider_id: Option<String>,
    /// Resolved outputs for successful creates and updates.
    pub outputs: Option<Attributes>,
    /// Whether the provider was actually called.
    pub provider_called: bool,
    /// Why the node failed or was skipped.
    pub error: Option<String>,
}

/// Result of executing a change set.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Outcome of every actionable node, in change-set order.
    pub outcomes: Vec<NodeOutcome>,
    /// Whether a cancellation signal stopped scheduling.
    pub cancelled: bool,
}

/// What a successful node leaves behind.
struct NodeDone {
    provider_id: Option<String>,
    outputs: Option<Attributes>,
    provider_called: bool,
}

/// Everything a spawned node needs, owned.
struct NodeTask {
    change: PlannedChange,
    store: Arc<dyn StateStore>,
    provider: Arc<dyn Provider>,
    cells: OutputCells,
    hasher: DeclarationHasher,
}

/// A finished node task: its index and either its result or a failure message.
type NodeResult = (usize, std::result::Result<NodeDone, String>);

enum Event {
    Joined(Option<std::result::Result<NodeResult, tokio::task::JoinError>>),
    Cancelled,
}

impl fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("backend", &self.store.backend_type())
            .field("provider", &self.provider.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            store,
            provider,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: None,
        }
    }

    /// Sets the maximum number of nodes in flight. Zero is treated as one.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the run-level cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executes a change set.
    ///
    /// Never fails as a whole: every node's terminal state is reported in the
    /// result. Use [`ExecutionResult::into_result`] to turn failures into an
    /// error.
    pub async fn execute(&self, changeset: &ChangeSet) -> ExecutionResult {
        let cells = OutputCells::for_changeset(changeset);
        let entries: Vec<&PlannedChange> = changeset.actionable().collect();
        let waits = build_gates(&entries);

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        for (idx, gate) in waits.iter().enumerate() {
            for &dep in gate {
                dependents[dep].push(idx);
            }
        }

        let mut remaining: Vec<usize> = waits.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> =
            (0..entries.len()).filter(|i| remaining[*i] == 0).collect();
        let mut outcomes: Vec<NodeOutcome> =
            entries.iter().map(|c| NodeOutcome::pending(c)).collect();

        let limit = self.concurrency.max(1);
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;
        let mut running: JoinSet<NodeResult> = JoinSet::new();

        info!(
            "Executing {} changes with concurrency {limit}",
            entries.len()
        );

        loop {
            if !cancelled && cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                cancelled = true;
                warn!("Cancellation requested, no further changes will start");
            }

            while !cancelled && running.len() < limit {
                let Some(idx) = ready.pop_first() else {
                    break;
                };
                outcomes[idx].status = NodeStatus::Running;
                info!("Starting {}", entries[idx].description());

                let task = NodeTask {
                    change: entries[idx].clone(),
                    store: Arc::clone(&self.store),
                    provider: Arc::clone(&self.provider),
                    cells: cells.clone(),
                    hasher: DeclarationHasher::new(),
                };

                // The inner spawn turns a panic into a join error for this node only.
                running.spawn(async move {
                    let result = match tokio::spawn(task.run()).await {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => Err(String::from("node task panicked")),
                        Err(e) => Err(format!("node task aborted: {e}")),
                    };
                    (idx, result)
                });
            }

            if running.is_empty() {
                break;
            }

            let event = tokio::select! {
                joined = running.join_next() => Event::Joined(joined),
                () = wait_cancelled(&mut cancel), if !cancelled => Event::Cancelled,
            };

            match event {
                Event::Cancelled => {
                    cancelled = true;
                    warn!(
                        "Cancellation requested, waiting for {} in-flight changes",
                        running.len()
                    );
                }
                Event::Joined(None) => {}
                Event::Joined(Some(Err(e))) => error!("Executor task failed: {e}"),
                Event::Joined(Some(Ok((idx, Ok(done))))) => {
                    let outcome = &mut outcomes[idx];
                    outcome.status = NodeStatus::Succeeded;
                    outcome.provider_id = done.provider_id;
                    outcome.outputs = done.outputs;
                    outcome.provider_called = done.provider_called;
                    info!("Finished {}", entries[idx].description());

                    for &dep in &dependents[idx] {
                        remaining[dep] = remaining[dep].saturating_sub(1);
                        if remaining[dep] == 0 && outcomes[dep].status == NodeStatus::Pending {
                            ready.insert(dep);
                        }
                    }
                }
                Event::Joined(Some(Ok((idx, Err(message))))) => {
                    error!("{} failed: {message}", entries[idx].id);
                    let outcome = &mut outcomes[idx];
                    outcome.status = NodeStatus::Failed;
                    outcome.provider_called = true;
                    outcome.error = Some(message);
                    skip_dependents(idx, &dependents, &entries, &mut outcomes, &mut ready);
                }
            }
        }

        for outcome in &mut outcomes {
            match outcome.status {
                NodeStatus::Pending => {
                    outcome.status = NodeStatus::Skipped;
                    outcome.error = Some(if cancelled {
                        String::from("run cancelled before start")
                    } else {
                        String::from("blocked by a deletion ordering cycle in recorded state")
                    });
                }
                NodeStatus::Running => {
                    outcome.status = NodeStatus::Failed;
                    outcome.error = Some(String::from("node task lost"));
                }
                _ => {}
            }
        }

        let result = ExecutionResult { outcomes, cancelled };
        info!(
            "Run finished: {} succeeded, {} failed, {} skipped",
            result.count(NodeStatus::Succeeded),
            result.count(NodeStatus::Failed),
            result.count(NodeStatus::Skipped)
        );
        result
    }
}

/// Computes, for each entry, the indices it must wait for.
fn build_gates(entries: &[&PlannedChange]) -> Vec<Vec<usize>> {
    let index: HashMap<&ResourceId, usize> =
        entries.iter().enumerate().map(|(i, c)| (&c.id, i)).collect();

    entries
        .iter()
        .enumerate()
        .map(|(i, change)| match change.action {
            Action::Create | Action::Update => change
                .dependencies
                .iter()
                .filter_map(|dep| index.get(dep).copied())
                .filter(|&j| matches!(entries[j].action, Action::Create | Action::Update))
                .collect(),
            Action::Delete => entries
                .iter()
                .enumerate()
                .filter(|&(j, other)| {
                    j != i
                        && matches!(other.action, Action::Delete | Action::Update)
                        && other
                            .prior
                            .as_ref()
                            .is_some_and(|p| p.dependencies.contains(&change.id))
                })
                .map(|(j, _)| j)
                .collect(),
            Action::Noop => Vec::new(),
        })
        .collect()
}

/// Marks every pending transitive dependent of `failed` as skipped.
fn skip_dependents(
    failed: usize,
    dependents: &[Vec<usize>],
    entries: &[&PlannedChange],
    outcomes: &mut [NodeOutcome],
    ready: &mut BTreeSet<usize>,
) {
    let root = &entries[failed].id;
    let mut queue: VecDeque<usize> = dependents[failed].iter().copied().collect();

    while let Some(idx) = queue.pop_front() {
        if outcomes[idx].status != NodeStatus::Pending {
            continue;
        }
        ready.remove(&idx);
        outcomes[idx].status = NodeStatus::Skipped;
        outcomes[idx].error = Some(format!("dependency {root} failed"));
        warn!("Skipping {} because {root} failed", entries[idx].id);
        queue.extend(dependents[idx].iter().copied());
    }
}

/// Resolves when cancellation is signalled; never resolves without a signal.
async fn wait_cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

impl NodeTask {
    async fn run(self) -> std::result::Result<NodeDone, String> {
        let id = self.change.id.clone();
        let result = match self.change.action {
            Action::Create => self.create().await,
            Action::Update => self.update().await,
            Action::Delete => self.delete().await,
            Action::Noop => Ok(NodeDone {
                provider_id: None,
                outputs: None,
                provider_called: false,
            }),
        };
        result.map_err(|e| {
            debug!("{id}: {e}");
            e.to_string()
        })
    }

    fn resolve(&self) -> Result<Attributes> {
        resolve_attributes(&self.change.attributes, &|r| self.cells.lookup(r)).map_err(|r| {
            ConvergeError::internal(format!("reference {r} has no value after its dependency ran"))
        })
    }

    fn prior(&self) -> Result<&StateRecord> {
        self.change.prior.as_ref().ok_or_else(|| {
            ConvergeError::internal(format!("{} has no recorded state", self.change.id))
        })
    }

    /// Fails early if the record moved since planning.
    async fn ensure_current(&self, expected: Option<&Revision>) -> Result<()> {
        let current = self.store.get(&self.change.id).await?;
        check_revision(&self.change.id, current.as_ref(), expected)?;
        Ok(())
    }

    async fn create(self) -> Result<NodeDone> {
        let attributes = self.resolve()?;
        self.ensure_current(None).await?;

        let id = &self.change.id;
        let response = self.provider.create(id, &attributes).await?;

        let hash = self.hasher.hash_attributes(&attributes);
        let record = StateRecord::new(id.clone(), &response.provider_id, attributes, &hash)
            .with_outputs(response.outputs.clone())
            .with_dependencies(self.change.dependencies.clone());
        self.store.put(record, None).await?;

        self.cells.publish(id, response.outputs.clone());
        Ok(NodeDone {
            provider_id: Some(response.provider_id),
            outputs: Some(response.outputs),
            provider_called: true,
        })
    }

    async fn update(self) -> Result<NodeDone> {
        let prior = self.prior()?;
        let id = &self.change.id;
        let attributes = self.resolve()?;
        let hash = self.hasher.hash_attributes(&attributes);

        if DeclarationHasher::hashes_match(&hash, &prior.attributes_hash) {
            debug!("{id} resolved to its recorded attributes, skipping provider call");
            if !same_edges(&prior.dependencies, &self.change.dependencies) {
                let record = prior
                    .clone()
                    .with_dependencies(self.change.dependencies.clone());
                self.store.put(record, prior.revision.as_ref()).await?;
                debug!("{id} recorded with its new dependencies");
            }
            self.cells.publish(id, prior.outputs.clone());
            return Ok(NodeDone {
                provider_id: Some(prior.provider_id.clone()),
                outputs: Some(prior.outputs.clone()),
                provider_called: false,
            });
        }

        self.ensure_current(prior.revision.as_ref()).await?;
        let response = self.provider.update(id, &prior.provider_id, &attributes).await?;

        let record = StateRecord::new(id.clone(), &response.provider_id, attributes, &hash)
            .with_outputs(response.outputs.clone())
            .with_dependencies(self.change.dependencies.clone())
            .created_at(prior.created_at);
        self.store.put(record, prior.revision.as_ref()).await?;

        self.cells.publish(id, response.outputs.clone());
        Ok(NodeDone {
            provider_id: Some(response.provider_id),
            outputs: Some(response.outputs),
            provider_called: true,
        })
    }

    async fn delete(self) -> Result<NodeDone> {
        let prior = self.prior()?;
        let id = &self.change.id;
        let revision = prior.revision.as_ref().ok_or_else(|| {
            ConvergeError::internal(format!("{id} record carries no revision"))
        })?;

        self.ensure_current(Some(revision)).await?;
        self.provider.delete(id, &prior.provider_id).await?;
        self.store.delete(id, revision).await?;

        Ok(NodeDone {
            provider_id: Some(prior.provider_id.clone()),
            outputs: None,
            provider_called: true,
        })
    }
}

fn same_edges(recorded: &[ResourceId], desired: &[ResourceId]) -> bool {
    recorded.iter().collect::<BTreeSet<_>>() == desired.iter().collect::<BTreeSet<_>>()
}

impl NodeOutcome {
    fn pending(change: &PlannedChange) -> Self {
        Self {
            id: change.id.clone(),
            action: change.action,
            status: NodeStatus::Pending,
            provider_id: change.prior.as_ref().map(|p| p.provider_id.clone()),
            outputs: None,
            provider_called: false,
            error: None,
        }
    }
}

impl ExecutionResult {
    /// Returns the number of nodes with the given status.
    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Returns true if every node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == NodeStatus::Succeeded)
    }

    /// Returns the outcome for an identity.
    #[must_use]
    pub fn outcome(&self, id: &ResourceId) -> Option<&NodeOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    /// Returns one message per failed or skipped node.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, NodeStatus::Failed | NodeStatus::Skipped))
            .map(|o| {
                format!(
                    "{} {} {}: {}",
                    o.status,
                    o.action,
                    o.id,
                    o.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }

    /// Converts a run with failures into an error.
    ///
    /// # Errors
    ///
    /// Returns `RunFailed` if any node failed or was skipped because of a
    /// failure, and `Cancelled` if cancellation left nodes unstarted.
    pub fn into_result(self) -> Result<Self> {
        if self.count(NodeStatus::Failed) > 0 {
            let failures = self.failures();
            return Err(ReconcileError::RunFailed {
                failed: failures.len(),
                total: self.outcomes.len(),
                failures,
            }
            .into());
        }

        let not_started = self.count(NodeStatus::Skipped);
        if not_started > 0 {
            if self.cancelled {
                return Err(ReconcileError::Cancelled { not_started }.into());
            }
            let failures = self.failures();
            return Err(ReconcileError::RunFailed {
                failed: failures.len(),
                total: self.outcomes.len(),
                failures,
            }
            .into());
        }

        Ok(self)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use crate::error::ProviderError;
    use crate::graph::GraphBuilder;
    use crate::planner::Planner;
    use crate::provider::{MockProvider, ProviderResponse, ProviderResult};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes inputs as outputs; fails or panics for chosen identities and
    /// records call order.
    #[derive(Default)]
    struct FakeProvider {
        fail: HashSet<String>,
        panic: HashSet<String>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
        in_flight: Mutex<(usize, usize)>,
    }

    impl FakeProvider {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls").clone()
        }

        fn max_in_flight(&self) -> usize {
            self.in_flight.lock().expect("in flight").1
        }

        async fn call(&self, action: &str, id: &ResourceId) -> ProviderResult<()> {
            {
                let mut guard = self.in_flight.lock().expect("in flight");
                guard.0 += 1;
                guard.1 = guard.1.max(guard.0);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.lock().expect("in flight").0 -= 1;

            self.calls.lock().expect("calls").push(format!("{action} {id}"));
            assert!(!self.panic.contains(&id.to_string()), "provider blew up on {id}");
            if self.fail.contains(&id.to_string()) {
                return Err(ProviderError::operation(id.to_string(), action, "boom"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn create(
            &self,
            id: &ResourceId,
            attributes: &Attributes,
        ) -> ProviderResult<ProviderResponse> {
            self.call("create", id).await?;
            Ok(ProviderResponse {
                provider_id: format!("{id}-1"),
                outputs: attributes.clone(),
            })
        }

        async fn update(
            &self,
            id: &ResourceId,
            provider_id: &str,
            attributes: &Attributes,
        ) -> ProviderResult<ProviderResponse> {
            self.call("update", id).await?;
            Ok(ProviderResponse {
                provider_id: provider_id.to_string(),
                outputs: attributes.clone(),
            })
        }

        async fn delete(&self, id: &ResourceId, _provider_id: &str) -> ProviderResult<()> {
            self.call("delete", id).await
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn id(s: &str) -> ResourceId {
        s.parse().expect("identity")
    }

    async fn plan(store: &MemoryStateStore, decls: &[ResourceDecl]) -> ChangeSet {
        let graph = GraphBuilder::new().build(decls).expect("graph");
        let records = store.list_all().await.expect("list");
        Planner::new().plan(&graph, &records, "fp").expect("plan")
    }

    fn scenario() -> Vec<ResourceDecl> {
        vec![
            ResourceDecl::new("Bucket", "artifacts").with_attribute("name", json!("x")),
            ResourceDecl::new("Service", "api")
                .with_attribute("bucket", json!("${Bucket.artifacts.name}")),
        ]
    }

    #[tokio::test]
    async fn test_scenario_resolves_reference() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider::default());
        let set = plan(&store, &scenario()).await;

        let executor = PlanExecutor::new(store.clone(), provider.clone());
        let result = executor.execute(&set).await.into_result().expect("run");

        assert_eq!(result.count(NodeStatus::Succeeded), 2);
        assert_eq!(provider.calls(), vec!["create Bucket.artifacts", "create Service.api"]);

        let service = store.get(&id("Service.api")).await.expect("get").expect("record");
        assert_eq!(service.attributes["bucket"], json!("x"));
        assert_eq!(service.dependencies, vec![id("Bucket.artifacts")]);
        assert!(store.get(&id("Bucket.artifacts")).await.expect("get").is_some());

        // Idempotent convergence
        assert!(plan(&store, &scenario()).await.is_converged());
    }

    #[tokio::test]
    async fn test_failure_isolated_to_dependents() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider::failing(&["Bucket.artifacts"]));
        let mut decls = scenario();
        decls.push(ResourceDecl::new("Database", "docs").with_attribute("tier", json!("free")));
        decls.push(
            ResourceDecl::new("Binding", "invoker")
                .with_attribute("service", json!("${Service.api.bucket}")),
        );

        let set = plan(&store, &decls).await;
        let result = PlanExecutor::new(store.clone(), provider).execute(&set).await;

        let status = |s: &str| result.outcome(&id(s)).map(|o| o.status);
        assert_eq!(status("Bucket.artifacts"), Some(NodeStatus::Failed));
        assert_eq!(status("Service.api"), Some(NodeStatus::Skipped));
        assert_eq!(status("Binding.invoker"), Some(NodeStatus::Skipped));
        assert_eq!(status("Database.docs"), Some(NodeStatus::Succeeded));

        let failures = result.failures();
        assert_eq!(failures.len(), 3);

        let err = result.into_result().expect_err("run failed");
        assert!(matches!(
            err,
            ConvergeError::Reconcile(ReconcileError::RunFailed { failed: 3, total: 4, .. })
        ));

        // Resumable: only the failed branch remains
        let again = plan(&store, &decls).await;
        assert_eq!(again.actionable().count(), 3);
        assert_eq!(again.get(&id("Database.docs")).map(|c| c.action), Some(Action::Noop));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_failure() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider {
            panic: HashSet::from([String::from("Service.api")]),
            ..FakeProvider::default()
        });
        let set = plan(&store, &scenario()).await;
        let result = PlanExecutor::new(store, provider).execute(&set).await;

        let service = result.outcome(&id("Service.api")).expect("outcome");
        assert_eq!(service.status, NodeStatus::Failed);
        assert_eq!(service.error.as_deref(), Some("node task panicked"));
        assert_eq!(result.count(NodeStatus::Succeeded), 1);
    }

    #[tokio::test]
    async fn test_deletes_run_dependents_first() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider::default());
        let mut decls = scenario();
        decls.push(
            ResourceDecl::new("Binding", "invoker")
                .with_attribute("service", json!("${Service.api.bucket}")),
        );
        let set = plan(&store, &decls).await;
        PlanExecutor::new(store.clone(), provider.clone())
            .with_concurrency(8)
            .execute(&set)
            .await
            .into_result()
            .expect("apply");

        let records = store.list_all().await.expect("list");
        let destroy = Planner::new().plan_destroy(&records, "fp");
        PlanExecutor::new(store.clone(), provider.clone())
            .with_concurrency(8)
            .execute(&destroy)
            .await
            .into_result()
            .expect("destroy");

        let deletes: Vec<String> = provider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        assert_eq!(
            deletes,
            vec!["delete Binding.invoker", "delete Service.api", "delete Bucket.artifacts"]
        );
        assert!(store.list_all().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_dependency() {
        let store = Arc::new(MemoryStateStore::new());
        let set = plan(&store, &scenario()).await;
        PlanExecutor::new(store.clone(), Arc::new(FakeProvider::default()))
            .execute(&set)
            .await
            .into_result()
            .expect("apply");

        let records = store.list_all().await.expect("list");
        let destroy = Planner::new().plan_destroy(&records, "fp");
        let provider = Arc::new(FakeProvider::failing(&["Service.api"]));
        let result = PlanExecutor::new(store.clone(), provider).execute(&destroy).await;

        assert_eq!(
            result.outcome(&id("Bucket.artifacts")).map(|o| o.status),
            Some(NodeStatus::Skipped)
        );
        assert_eq!(store.list_all().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider {
            delay: Duration::from_millis(20),
            ..FakeProvider::default()
        });
        let decls: Vec<ResourceDecl> = (0..6)
            .map(|i| ResourceDecl::new("Bucket", &format!("b{i}")))
            .collect();
        let set = plan(&store, &decls).await;

        let result = PlanExecutor::new(store, provider.clone())
            .with_concurrency(2)
            .execute(&set)
            .await;

        assert!(result.is_success());
        assert!(provider.max_in_flight() <= 2);
        assert_eq!(provider.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_cancellation_stops_scheduling() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("send");

        let set = plan(&store, &scenario()).await;
        let result = PlanExecutor::new(store, provider.clone())
            .with_cancellation(rx)
            .execute(&set)
            .await;

        assert!(result.cancelled);
        assert!(provider.calls().is_empty());
        assert_eq!(result.count(NodeStatus::Skipped), 2);
        assert!(matches!(
            result.into_result(),
            Err(ConvergeError::Reconcile(ReconcileError::Cancelled { not_started: 2 }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_mid_run_lets_in_flight_finish() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider {
            delay: Duration::from_millis(150),
            ..FakeProvider::default()
        });
        let decls = vec![
            ResourceDecl::new("Bucket", "a").with_attribute("name", json!("x")),
            ResourceDecl::new("Service", "b").with_attribute("bucket", json!("${Bucket.a.name}")),
            ResourceDecl::new("Database", "c").with_attribute("tier", json!("free")),
        ];
        let set = plan(&store, &decls).await;

        let (tx, rx) = watch::channel(false);
        let signal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            tx.send(true).expect("send");
            tx
        });

        let result = PlanExecutor::new(store.clone(), provider.clone())
            .with_cancellation(rx)
            .execute(&set)
            .await;
        drop(signal.await.expect("signal"));

        assert!(result.cancelled);
        let status = |s: &str| result.outcome(&id(s)).map(|o| o.status);
        assert_eq!(status("Bucket.a"), Some(NodeStatus::Succeeded));
        assert_eq!(status("Database.c"), Some(NodeStatus::Succeeded));
        assert_eq!(status("Service.b"), Some(NodeStatus::Skipped));

        assert!(store.get(&id("Bucket.a")).await.expect("get").is_some());
        assert!(store.get(&id("Service.b")).await.expect("get").is_none());
        assert!(!provider.calls().contains(&String::from("create Service.b")));
        assert!(matches!(
            result.into_result(),
            Err(ConvergeError::Reconcile(ReconcileError::Cancelled { not_started: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_independent_nodes_run_in_parallel() {
        let store = Arc::new(MemoryStateStore::new());
        let provider = Arc::new(FakeProvider {
            delay: Duration::from_millis(50),
            ..FakeProvider::default()
        });
        let decls: Vec<ResourceDecl> = (0..4)
            .map(|i| ResourceDecl::new("Bucket", &format!("b{i}")))
            .collect();
        let set = plan(&store, &decls).await;

        let result = PlanExecutor::new(store, provider.clone())
            .with_concurrency(4)
            .execute(&set)
            .await;

        assert!(result.is_success());
        assert!(provider.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_unchanged_resolution_skips_provider() {
        let store = Arc::new(MemoryStateStore::new());
        let set = plan(&store, &scenario()).await;
        PlanExecutor::new(store.clone(), Arc::new(FakeProvider::default()))
            .execute(&set)
            .await
            .into_result()
            .expect("apply");

        // Change a bucket attribute that the service does not read.
        let mut decls = scenario();
        decls[0] = ResourceDecl::new("Bucket", "artifacts")
            .with_attribute("name", json!("x"))
            .with_attribute("region", json!("eu"));
        let set = plan(&store, &decls).await;
        assert_eq!(set.get(&id("Service.api")).map(|c| c.action), Some(Action::Update));

        let provider = Arc::new(FakeProvider::default());
        let result = PlanExecutor::new(store.clone(), provider.clone())
            .execute(&set)
            .await
            .into_result()
            .expect("apply");

        assert_eq!(provider.calls(), vec!["update Bucket.artifacts"]);
        let service = result.outcome(&id("Service.api")).expect("outcome");
        assert_eq!(service.status, NodeStatus::Succeeded);
        assert!(!service.provider_called);
    }

    #[tokio::test]
    async fn test_stale_record_fails_node() {
        let store = Arc::new(MemoryStateStore::new());
        let set = plan(&store, &scenario()).await;

        // Another writer records the bucket after planning.
        store
            .put(
                StateRecord::new(id("Bucket.artifacts"), "other", Attributes::new(), "h"),
                None,
            )
            .await
            .expect("put");

        let result = PlanExecutor::new(store, Arc::new(FakeProvider::default()))
            .execute(&set)
            .await;
        let bucket = result.outcome(&id("Bucket.artifacts")).expect("outcome");
        assert_eq!(bucket.status, NodeStatus::Failed);
        assert!(bucket.error.as_deref().is_some_and(|e| e.contains("Stale")));
        assert_eq!(result.outcome(&id("Service.api")).map(|o| o.status), Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn test_mock_provider_receives_resolved_attributes() {
        let store = Arc::new(MemoryStateStore::new());
        let mut provider = MockProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_create()
            .withf(|id, _| id.kind == "Bucket")
            .times(1)
            .returning(|_, attrs| {
                Ok(ProviderResponse {
                    provider_id: String::from("bkt-1"),
                    outputs: Attributes::from([
                        (String::from("name"), attrs["name"].clone()),
                        (String::from("url"), json!("gs://x")),
                    ]),
                })
            });
        provider
            .expect_create()
            .withf(|id, attrs| id.kind == "Service" && attrs["bucket"] == json!("gs://x/app"))
            .times(1)
            .returning(|_, _| {
                Ok(ProviderResponse {
                    provider_id: String::from("svc-1"),
                    outputs: Attributes::new(),
                })
            });

        let decls = vec![
            ResourceDecl::new("Bucket", "artifacts").with_attribute("name", json!("x")),
            ResourceDecl::new("Service", "api")
                .with_attribute("bucket", json!("${Bucket.artifacts.url}/app")),
        ];
        let set = plan(&store, &decls).await;
        let result = PlanExecutor::new(store.clone(), Arc::new(provider))
            .execute(&set)
            .await
            .into_result()
            .expect("apply");

        assert_eq!(
            result.outcome(&id("Bucket.artifacts")).and_then(|o| o.provider_id.clone()),
            Some(String::from("bkt-1"))
        );
    }
}
