//! Invocation surface: repair one program, one file, or a batch of files
//!
//! Sessions never share mutable state except the per-batch [`FixCache`]. A
//! batch fans out on a `JoinSet` bounded by a semaphore and returns exactly
//! one report per input, in input order.

use crate::artifact::{ArtifactLocation, ArtifactStore, FsArtifactStore, SessionKey};
use crate::config::{ModelEndpoint, RepairConfig};
use crate::error::{RepairError, RepairResult};
use crate::feedback::backend::{HttpBackend, ProcessBackend};
use crate::feedback::compiler::{CompileClient, CompileRequest, CompilerBackend};
use crate::feedback::correction_loop::{RepairLoop, RepairOutcome};
use crate::feedback::history::CompileHistory;
use crate::feedback::session::{ProgramState, RepairSession, TerminalState};
use crate::strategy::{FixCache, LearnedFixStrategy, ModelStrategy, StrategyRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// One file of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub source_path: PathBuf,
    /// None = `<stem>.wit` next to the source when present
    pub witness_path: Option<PathBuf>,
}

impl BatchItem {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            witness_path: None,
        }
    }

    pub fn with_witness(mut self, witness_path: impl Into<PathBuf>) -> Self {
        self.witness_path = Some(witness_path.into());
        self
    }
}

impl From<PathBuf> for BatchItem {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

/// Result of repairing one file
#[derive(Debug)]
pub struct FileReport {
    pub source_path: PathBuf,
    pub outcome: RepairOutcome,
    /// Where the results went; an error here does not change the outcome
    pub artifact: RepairResult<ArtifactLocation>,
}

impl FileReport {
    /// Solved and persisted
    pub fn is_success(&self) -> bool {
        self.outcome.is_solved() && self.artifact.is_ok()
    }

    /// Machine-readable summary for `--json` output
    pub fn summary(&self) -> ReportSummary {
        let location = self.artifact.as_ref().ok();
        ReportSummary {
            source_path: self.source_path.clone(),
            terminal_state: self.outcome.terminal_state,
            reason: self.outcome.reason.clone(),
            attempts: self.outcome.session.attempts().len(),
            fixed_source: location.and_then(|l| l.fixed_source.clone()),
            fixed_witness: location.and_then(|l| l.fixed_witness.clone()),
            history: location.and_then(|l| l.history.clone()),
            persistence_error: self.artifact.as_ref().err().map(|e| e.to_string()),
            trail: self.outcome.trail.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub source_path: PathBuf,
    pub terminal_state: TerminalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_witness: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
    pub trail: Vec<String>,
}

/// Compile client, strategies, store and configuration bundled for callers
pub struct Repairer {
    client: Arc<CompileClient>,
    registry: StrategyRegistry,
    store: Arc<dyn ArtifactStore>,
    config: RepairConfig,
}

impl Repairer {
    pub fn new(
        client: Arc<CompileClient>,
        registry: StrategyRegistry,
        store: Arc<dyn ArtifactStore>,
        config: RepairConfig,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            config,
        }
    }

    /// Wire up the configured compiler backend, the rule-based strategies,
    /// the model strategy when an endpoint is given, and the filesystem store
    pub fn from_config(config: RepairConfig, model: Option<ModelEndpoint>) -> RepairResult<Self> {
        config.validate()?;

        let backend: Arc<dyn CompilerBackend> = match &config.compiler_url {
            Some(url) => {
                let mut backend = HttpBackend::new(url.clone());
                if let Ok(token) = std::env::var("SIMF_REPAIR_COMPILER_TOKEN") {
                    backend = backend.with_token(token);
                }
                Arc::new(backend)
            }
            None => Arc::new(
                ProcessBackend::from_command_line(&config.compiler_command)
                    .map_err(|e| RepairError::config(format!("compiler_command: {}", e)))?,
            ),
        };
        let client = CompileClient::new(backend, config.compile_timeout())
            .with_history(CompileHistory::new());

        let mut registry = StrategyRegistry::with_rules();
        if let Some(endpoint) = model {
            tracing::info!(model = %endpoint.model, url = %endpoint.url, "model strategy enabled");
            registry.register_fallback(Arc::new(ModelStrategy::from_endpoint(
                endpoint,
                config.model_timeout(),
            )));
        }

        let store = Arc::new(FsArtifactStore::from_config(&config));
        Ok(Self::new(Arc::new(client), registry, store, config))
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn client(&self) -> &CompileClient {
        &self.client
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Repair inline source and witness; nothing is persisted
    pub async fn repair_source(
        &self,
        source: impl Into<String>,
        witness: impl Into<String>,
        cancel: &CancellationToken,
    ) -> RepairOutcome {
        self.repair_loop(self.registry.clone())
            .run(CompileRequest::new(source, witness), cancel)
            .await
    }

    /// Read, repair and persist one file
    pub async fn repair_file(
        &self,
        source_path: &Path,
        witness_path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> FileReport {
        let item = BatchItem {
            source_path: source_path.to_path_buf(),
            witness_path: witness_path.map(Path::to_path_buf),
        };
        run_item(
            &self.repair_loop(self.registry.clone()),
            self.store.clone(),
            &item,
            cancel,
        )
        .await
    }

    /// Repair every item with at most `workers` sessions in flight.
    ///
    /// Items not started when `cancel` fires are reported `Aborted` without
    /// running; in-flight sessions stop at their next check and end `Aborted`.
    pub async fn repair_batch(
        &self,
        items: Vec<BatchItem>,
        cancel: CancellationToken,
    ) -> Vec<FileReport> {
        let cache = FixCache::new();
        let repair_loop = Arc::new(self.repair_loop(
            self.registry
                .with_leading(Arc::new(LearnedFixStrategy::new(cache.clone()))),
        ));
        let workers = self.config.workers.max(1);
        let max_iterations = self.config.max_iterations;
        let paths: Vec<PathBuf> = items.iter().map(|i| i.source_path.clone()).collect();
        tracing::info!(files = items.len(), workers, "batch repair starting");

        let sem = Arc::new(Semaphore::new(workers));
        let mut join_set: JoinSet<(usize, FileReport)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let sem = sem.clone();
            let repair_loop = repair_loop.clone();
            let store = self.store.clone();
            let cache = cache.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (index, skipped(item.source_path, max_iterations));
                };
                if cancel.is_cancelled() {
                    return (index, skipped(item.source_path, max_iterations));
                }
                let report = run_item(&repair_loop, store, &item, &cancel).await;
                if report.outcome.is_solved() {
                    cache.learn(&report.outcome.session);
                }
                (index, report)
            });
        }

        let mut slots: Vec<Option<FileReport>> = paths.iter().map(|_| None).collect();
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok((index, report)) => slots[index] = Some(report),
                Err(e) => tracing::warn!(error = %e, "repair worker panicked"),
            }
        }

        let reports: Vec<FileReport> = slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| FileReport {
                    source_path: path.clone(),
                    outcome: RepairOutcome::aborted(
                        ProgramState::new("", ""),
                        max_iterations,
                        "repair worker panicked",
                    ),
                    artifact: Ok(ArtifactLocation::default()),
                })
            })
            .collect();

        let solved = reports.iter().filter(|r| r.outcome.is_solved()).count();
        tracing::info!(
            files = reports.len(),
            solved,
            learned = cache.len(),
            cancelled = cancel.is_cancelled(),
            "batch repair finished"
        );
        reports
    }

    fn repair_loop(&self, registry: StrategyRegistry) -> RepairLoop {
        RepairLoop::new(self.client.clone(), registry, self.config.clone())
    }
}

/// Read, repair and persist one item
async fn run_item(
    repair_loop: &RepairLoop,
    store: Arc<dyn ArtifactStore>,
    item: &BatchItem,
    cancel: &CancellationToken,
) -> FileReport {
    let request = match read_input(item).await {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(source = %item.source_path.display(), error = %e, "unreadable input");
            return FileReport {
                source_path: item.source_path.clone(),
                outcome: RepairOutcome::aborted(
                    ProgramState::new("", ""),
                    repair_loop.config().max_iterations,
                    format!("unreadable input: {}", e),
                ),
                artifact: Err(e),
            };
        }
    };

    let outcome = repair_loop.run(request, cancel).await;
    let key = SessionKey::new(&item.source_path, outcome.session.original());
    let artifact = persist_blocking(store, key, outcome.session.clone()).await;
    if let Err(e) = &artifact {
        tracing::error!(source = %item.source_path.display(), error = %e, "failed to persist session");
    }

    FileReport {
        source_path: item.source_path.clone(),
        outcome,
        artifact,
    }
}

/// Run the store's filesystem writes off the async workers
async fn persist_blocking(
    store: Arc<dyn ArtifactStore>,
    key: SessionKey,
    session: RepairSession,
) -> RepairResult<ArtifactLocation> {
    let path = key.source_path.clone();
    tokio::task::spawn_blocking(move || store.persist(&key, &session))
        .await
        .map_err(|e| RepairError::persistence(path, std::io::Error::other(e)))?
}

/// Report for an item cancelled before it started
fn skipped(source_path: PathBuf, max_iterations: u32) -> FileReport {
    tracing::debug!(source = %source_path.display(), "cancelled before start");
    FileReport {
        source_path,
        outcome: RepairOutcome::aborted(
            ProgramState::new("", ""),
            max_iterations,
            "cancelled before start",
        ),
        artifact: Ok(ArtifactLocation::default()),
    }
}

/// Read source and witness; the witness defaults to `<stem>.wit` when present
pub async fn read_input(item: &BatchItem) -> RepairResult<CompileRequest> {
    let source = tokio::fs::read_to_string(&item.source_path)
        .await
        .map_err(|e| RepairError::input(&item.source_path, e))?;

    let witness_path = match &item.witness_path {
        Some(path) => Some(path.clone()),
        None => {
            let sibling = item.source_path.with_extension("wit");
            tokio::fs::try_exists(&sibling)
                .await
                .unwrap_or(false)
                .then_some(sibling)
        }
    };
    let witness = match witness_path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RepairError::input(&path, e))?,
        None => String::new(),
    };

    Ok(CompileRequest::new(source, witness))
}
