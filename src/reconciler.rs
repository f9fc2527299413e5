//! Reconciler for converging declared resources.
//!
//! This module ties the stages of a run together: declarations are built
//! into a graph, planned against recorded state, and the resulting change
//! set is applied. A failed run is resumed simply by running again; the new
//! plan only contains what is still out of date.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{DeclarationHasher, Manifest, DEFAULT_CONCURRENCY};
use crate::error::Result;
use crate::graph::{Graph, GraphBuilder};
use crate::planner::{Action, ChangeSet, ExecutionResult, NodeStatus, PlanExecutor, Planner};
use crate::provider::Provider;
use crate::state::StateStore;

/// Fingerprint recorded on destroy plans.
const DESTROY_FINGERPRINT: &str = "destroy";

/// Reconciler for maintaining desired state.
pub struct Reconciler {
    /// State store.
    store: Arc<dyn StateStore>,
    /// Provider performing side effects.
    provider: Arc<dyn Provider>,
    /// Maximum nodes in flight.
    concurrency: usize,
    /// Run-level cancellation.
    cancel: Option<watch::Receiver<bool>>,
    hasher: DeclarationHasher,
    planner: Planner,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    /// The change set that was applied.
    pub changeset: ChangeSet,
    /// Per-node outcomes.
    pub execution: ExecutionResult,
}

/// Report of pending changes, computed without applying anything.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Whether anything is out of date.
    pub has_drift: bool,
    /// Out-of-date resources as `action Kind.name`.
    pub drifted_resources: Vec<String>,
    /// Number of declared resources.
    pub total_resources: usize,
    /// Number of recorded resources.
    pub recorded_count: usize,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.store.backend_type())
            .field("provider", &self.provider.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            store,
            provider,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: None,
            hasher: DeclarationHasher::new(),
            planner: Planner::new(),
        }
    }

    /// Sets the executor concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the cancellation signal used by `apply` and `converge`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Builds the dependency graph of a manifest.
    ///
    /// # Errors
    ///
    /// Returns a graph error for cycles and unresolved references.
    pub fn build_graph(&self, manifest: &Manifest) -> Result<Graph> {
        Ok(GraphBuilder::new().build(&manifest.resources)?)
    }

    /// Plans the changes needed to converge.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be built, state cannot be read,
    /// or planning fails. Nothing has been mutated in any of these cases.
    pub async fn plan(&self, manifest: &Manifest) -> Result<ChangeSet> {
        let graph = self.build_graph(manifest)?;
        let records = self.store.list_all().await?;
        debug!(
            "Planning {} declared resources against {} records",
            graph.len(),
            records.len()
        );

        let fingerprint = self.hasher.hash_manifest(manifest);
        let changeset = self.planner.plan(&graph, &records, &fingerprint)?;

        info!(
            "Plan: {} to create, {} to update, {} to delete, {} unchanged",
            changeset.count(Action::Create),
            changeset.count(Action::Update),
            changeset.count(Action::Delete),
            changeset.count(Action::Noop)
        );
        Ok(changeset)
    }

    /// Plans the deletion of every recorded resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read.
    pub async fn plan_destroy(&self) -> Result<ChangeSet> {
        let records = self.store.list_all().await?;
        info!("Planning destroy of {} recorded resources", records.len());
        Ok(self.planner.plan_destroy(&records, DESTROY_FINGERPRINT))
    }

    /// Applies a change set.
    pub async fn apply(&self, changeset: &ChangeSet) -> ExecutionResult {
        let mut executor = PlanExecutor::new(Arc::clone(&self.store), Arc::clone(&self.provider))
            .with_concurrency(self.concurrency);
        if let Some(cancel) = &self.cancel {
            executor = executor.with_cancellation(cancel.clone());
        }
        executor.execute(changeset).await
    }

    /// Plans and applies in one step.
    ///
    /// # Errors
    ///
    /// Returns an error only if planning fails. Node failures are reported
    /// in the result.
    pub async fn converge(&self, manifest: &Manifest) -> Result<ReconciliationResult> {
        info!(
            "Converging {}/{}",
            manifest.project.name, manifest.project.environment
        );

        let changeset = self.plan(manifest).await?;
        if changeset.is_converged() {
            info!("No changes required - state is converged");
        }

        let execution = self.apply(&changeset).await;
        if !execution.is_success() {
            warn!("{} changes did not succeed", execution.failures().len());
        }

        Ok(ReconciliationResult {
            changeset,
            execution,
        })
    }

    /// Checks what a run would change without applying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails.
    pub async fn check_drift(&self, manifest: &Manifest) -> Result<DriftReport> {
        let changeset = self.plan(manifest).await?;
        let recorded_count = self.store.list_all().await?.len();

        let drifted_resources: Vec<String> = changeset
            .actionable()
            .map(|c| format!("{} {}", c.action, c.id))
            .collect();

        Ok(DriftReport {
            has_drift: !drifted_resources.is_empty(),
            drifted_resources,
            total_resources: manifest.resources.len(),
            recorded_count,
        })
    }
}

impl ReconciliationResult {
    /// Returns true if every change succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.execution.is_success()
    }

    fn succeeded(&self, action: Action) -> usize {
        self.execution
            .outcomes
            .iter()
            .filter(|o| o.action == action && o.status == NodeStatus::Succeeded)
            .count()
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Created: {}", self.succeeded(Action::Create))?;
        writeln!(f, "  Updated: {}", self.succeeded(Action::Update))?;
        writeln!(f, "  Deleted: {}", self.succeeded(Action::Delete))?;
        writeln!(f, "  Unchanged: {}", self.changeset.count(Action::Noop))?;

        let failures = self.execution.failures();
        if !failures.is_empty() {
            writeln!(f, "  Errors:")?;
            for failure in &failures {
                writeln!(f, "    - {failure}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use crate::error::{ConvergeError, GraphError};
    use crate::model::ResourceId;
    use crate::provider::{LocalProvider, ProviderRegistry};
    use crate::state::{LocalStateStore, MemoryStateStore};
    use serde_json::json;
    use tempfile::TempDir;

    fn manifest(resources: Vec<ResourceDecl>) -> Manifest {
        Manifest::new("nl-to-iac", resources)
    }

    fn scenario() -> Vec<ResourceDecl> {
        vec![
            ResourceDecl::new("Bucket", "artifacts").with_attribute("name", json!("x")),
            ResourceDecl::new("Service", "api")
                .with_attribute("bucket", json!("${Bucket.artifacts.name}")),
        ]
    }

    fn reconciler(dir: &TempDir) -> Reconciler {
        let local = LocalProvider::new(dir.path().join("resources"));
        let provider = ProviderRegistry::new().with_fallback(Arc::new(local));
        Reconciler::new(Arc::new(MemoryStateStore::new()), Arc::new(provider))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = TempDir::new().expect("tempdir");
        let reconciler = reconciler(&dir);

        let first = reconciler.converge(&manifest(scenario())).await.expect("converge");
        assert!(first.is_success());
        let order: Vec<_> = first
            .changeset
            .summary()
            .into_iter()
            .map(|(action, kind, name, _)| format!("{action} {kind}.{name}"))
            .collect();
        assert_eq!(order, vec!["create Bucket.artifacts", "create Service.api"]);

        let service = first
            .execution
            .outcome(&ResourceId::new("Service", "api"))
            .and_then(|o| o.outputs.clone())
            .expect("outputs");
        assert_eq!(service["bucket"], json!("x"));

        let drift = reconciler.check_drift(&manifest(scenario())).await.expect("drift");
        assert!(drift.is_converged());
        assert_eq!(drift.recorded_count, 2);

        let mut reduced = scenario();
        reduced.pop();
        let second = reconciler.plan(&manifest(reduced.clone())).await.expect("plan");
        assert_eq!(
            second
                .summary()
                .into_iter()
                .map(|(a, k, n, _)| format!("{a} {k}.{n}"))
                .collect::<Vec<_>>(),
            vec!["delete Service.api"]
        );
        let applied = reconciler.apply(&second).await.into_result().expect("apply");
        assert_eq!(applied.count(NodeStatus::Succeeded), 1);

        let destroy = reconciler.plan_destroy().await.expect("destroy plan");
        assert_eq!(destroy.count(Action::Delete), 1);
        reconciler.apply(&destroy).await.into_result().expect("destroy");
        assert!(reconciler.plan_destroy().await.expect("plan").is_converged());
    }

    #[tokio::test]
    async fn test_added_edge_reorders_destroy() {
        let dir = TempDir::new().expect("tempdir");
        let reconciler = reconciler(&dir);
        let api = ResourceDecl::new("Api", "a").with_attribute("region", json!("eu"));
        let service = ResourceDecl::new("Service", "z").with_attribute("image", json!("v1"));

        reconciler
            .converge(&manifest(vec![api.clone(), service.clone()]))
            .await
            .expect("first run");

        let linked = manifest(vec![api, service.with_dependency("Api.a")]);
        let second = reconciler.converge(&linked).await.expect("second run");
        assert!(second.is_success());
        let outcome = second
            .execution
            .outcome(&ResourceId::new("Service", "z"))
            .expect("outcome");
        assert_eq!(outcome.action, Action::Update);
        assert!(!outcome.provider_called);

        let records = reconciler.store.list_all().await.expect("records");
        let service = records.iter().find(|r| r.id.name == "z").expect("record");
        assert_eq!(service.dependencies, vec![ResourceId::new("Api", "a")]);
        assert!(reconciler.plan(&linked).await.expect("plan").is_converged());

        let destroy = reconciler.plan_destroy().await.expect("destroy plan");
        let order: Vec<String> = destroy.changes.iter().map(|c| c.id.to_string()).collect();
        assert_eq!(order, vec!["Service.z", "Api.a"]);
    }

    #[tokio::test]
    async fn test_graph_errors_abort_before_mutation() {
        let dir = TempDir::new().expect("tempdir");
        let reconciler = reconciler(&dir);

        let decls = vec![
            ResourceDecl::new("Bucket", "a").with_attribute("x", json!("${Bucket.b.id}")),
            ResourceDecl::new("Bucket", "b").with_attribute("x", json!("${Bucket.a.id}")),
        ];
        let err = reconciler.converge(&manifest(decls)).await.expect_err("cycle");
        assert!(matches!(err, ConvergeError::Graph(GraphError::Cycle { .. })));
        assert!(err.is_pre_mutation());
        assert!(!dir.path().join("resources").exists());
    }

    #[tokio::test]
    async fn test_dotted_name_is_rejected_before_mutation() {
        let dir = TempDir::new().expect("tempdir");
        let reconciler = reconciler(&dir);

        let decls = vec![ResourceDecl::new("Bucket", "my.bucket").with_attribute("x", json!("1"))];
        let err = reconciler.converge(&manifest(decls)).await.expect_err("invalid name");
        assert!(matches!(err, ConvergeError::Graph(GraphError::InvalidIdentity { .. })));
        assert!(err.is_pre_mutation());
        assert!(reconciler.store.list_all().await.expect("records").is_empty());
        assert!(!dir.path().join("resources").exists());
    }

    #[tokio::test]
    async fn test_persistent_state_survives_restart() {
        let dir = TempDir::new().expect("tempdir");
        let provider = Arc::new(LocalProvider::new(dir.path().join("resources")));

        let state = || Arc::new(LocalStateStore::with_base_dir(dir.path().join("state")));

        let first = Reconciler::new(state(), provider.clone());
        first.converge(&manifest(scenario())).await.expect("converge");

        let second = Reconciler::new(state(), provider);
        let plan = second.plan(&manifest(scenario())).await.expect("plan");
        assert!(plan.is_converged());
        assert_eq!(plan.count(Action::Noop), 2);
    }
}
