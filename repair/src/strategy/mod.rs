//! Fix strategies
//!
//! A [`FixStrategy`] turns one classified diagnostic into zero or more
//! candidate program states, best guess first. The [`StrategyRegistry`] holds
//! strategies per category plus catch-all strategies and asks them in order;
//! it never branches on which concrete strategy it is talking to.

pub mod assertion;
pub mod learned;
pub mod model;
pub mod syntax;
pub mod type_widen;
pub mod witness;

use crate::feedback::error_parser::{Diagnostic, ErrorCategory};
use crate::feedback::session::ProgramState;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub use assertion::RelaxAssertion;
pub use learned::{FixCache, LearnedFixStrategy};
pub use model::{ChatCompletionsBackend, ModelBackend, ModelStrategy};
pub use syntax::SyntaxCleanup;
pub use type_widen::WidenOperand;
pub use witness::{DefaultWitness, PadWitness};

/// A proposed program state, not yet compiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub state: ProgramState,
    pub strategy_id: String,
    pub rationale: Option<String>,
}

impl Candidate {
    pub fn new(
        state: ProgramState,
        strategy_id: impl Into<String>,
        rationale: Option<String>,
    ) -> Self {
        Self {
            state,
            strategy_id: strategy_id.into(),
            rationale,
        }
    }

    pub fn source(&self) -> &str {
        &self.state.source
    }

    pub fn witness(&self) -> &str {
        &self.state.witness
    }
}

/// Inputs of one generation request
#[derive(Debug, Clone, Copy)]
pub struct FixContext<'a> {
    pub category: ErrorCategory,
    pub source: &'a str,
    pub witness: &'a str,
    pub diagnostic: &'a Diagnostic,
}

impl<'a> FixContext<'a> {
    pub fn new(state: &'a ProgramState, diagnostic: &'a Diagnostic) -> Self {
        Self {
            category: diagnostic.category,
            source: &state.source,
            witness: &state.witness,
            diagnostic,
        }
    }

    pub fn state(&self) -> ProgramState {
        ProgramState::new(self.source, self.witness)
    }

    /// Candidate replacing only the source
    pub fn with_source(&self, id: &str, source: String, rationale: impl Into<String>) -> Candidate {
        Candidate::new(
            ProgramState::new(source, self.witness),
            id,
            Some(rationale.into()),
        )
    }

    /// Candidate replacing only the witness
    pub fn with_witness(&self, id: &str, witness: String, rationale: impl Into<String>) -> Candidate {
        Candidate::new(
            ProgramState::new(self.source, witness),
            id,
            Some(rationale.into()),
        )
    }
}

/// Why a strategy produced nothing. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Backend not configured or unreachable
    #[error("Strategy unavailable: {0}")]
    Unavailable(String),

    /// Backend call exceeded its timeout
    #[error("Strategy timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Backend answered with a non-success status
    #[error("Model API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Backend answered with something that is not a fix
    #[error("Unparsable response: {0}")]
    Unparsable(String),

    /// The witness text is not a witness object
    #[error("Invalid witness data: {0}")]
    InvalidWitness(String),
}

/// Capability every fix generator provides
#[async_trait]
pub trait FixStrategy: Send + Sync {
    /// Stable identifier recorded in attempts
    fn id(&self) -> &str;

    /// Candidates for `ctx`, best first; empty means "no safe fix"
    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError>;
}

/// Ordered strategies per category.
///
/// Lookup order for a category: leading catch-alls, the category's own
/// strategies, then trailing catch-alls.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    leading: Vec<Arc<dyn FixStrategy>>,
    by_category: HashMap<ErrorCategory, Vec<Arc<dyn FixStrategy>>>,
    fallback: Vec<Arc<dyn FixStrategy>>,
    collect_all: bool,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every rule-based strategy
    pub fn with_rules() -> Self {
        let mut registry = Self::new();
        registry.register(ErrorCategory::TypeMismatch, Arc::new(WidenOperand));
        registry.register(ErrorCategory::MissingWitness, Arc::new(DefaultWitness));
        registry.register(ErrorCategory::WitnessCountMismatch, Arc::new(PadWitness));
        registry.register(ErrorCategory::AssertionFailed, Arc::new(RelaxAssertion));
        registry.register(ErrorCategory::SyntaxError, Arc::new(SyntaxCleanup));
        registry
    }

    pub fn register(&mut self, category: ErrorCategory, strategy: Arc<dyn FixStrategy>) {
        self.by_category.entry(category).or_default().push(strategy);
    }

    /// Catch-all asked before any category-specific strategy
    pub fn register_leading(&mut self, strategy: Arc<dyn FixStrategy>) {
        self.leading.push(strategy);
    }

    /// Catch-all asked after the category-specific strategies
    pub fn register_fallback(&mut self, strategy: Arc<dyn FixStrategy>) {
        self.fallback.push(strategy);
    }

    /// Copy of this registry with `strategy` asked first
    pub fn with_leading(&self, strategy: Arc<dyn FixStrategy>) -> Self {
        let mut registry = self.clone();
        registry.leading.insert(0, strategy);
        registry
    }

    pub fn set_collect_all(&mut self, collect_all: bool) {
        self.collect_all = collect_all;
    }

    pub fn collect_all(&self) -> bool {
        self.collect_all
    }

    /// Strategies consulted for `category`, in order
    pub fn strategies_for(&self, category: ErrorCategory) -> Vec<Arc<dyn FixStrategy>> {
        self.leading
            .iter()
            .chain(self.by_category.get(&category).into_iter().flatten())
            .chain(self.fallback.iter())
            .cloned()
            .collect()
    }

    pub fn ids_for(&self, category: ErrorCategory) -> Vec<String> {
        self.strategies_for(category)
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    /// Ask the strategies for `ctx.category` in order.
    ///
    /// Strategy errors count as zero candidates. Candidates identical to the
    /// input or to an earlier candidate are dropped. Unless `collect_all` is
    /// set, the first strategy with a surviving candidate ends the search.
    pub async fn generate(&self, ctx: &FixContext<'_>) -> Vec<Candidate> {
        let input = ctx.state();
        let mut seen: HashSet<ProgramState> = HashSet::new();
        let mut candidates = Vec::new();

        for strategy in self.strategies_for(ctx.category) {
            let produced = match strategy.generate(ctx).await {
                Ok(produced) => produced,
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.id(),
                        category = %ctx.category,
                        error = %e,
                        "strategy failed, treating as no candidates"
                    );
                    continue;
                }
            };

            let before = candidates.len();
            for candidate in produced {
                if candidate.state == input || !seen.insert(candidate.state.clone()) {
                    continue;
                }
                candidates.push(candidate);
            }

            tracing::debug!(
                strategy = strategy.id(),
                category = %ctx.category,
                candidates = candidates.len() - before,
                "strategy consulted"
            );

            if !self.collect_all && candidates.len() > before {
                break;
            }
        }

        candidates
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |list: &[Arc<dyn FixStrategy>]| -> Vec<String> {
            list.iter().map(|s| s.id().to_string()).collect()
        };
        let mut categories: Vec<_> = self.by_category.keys().copied().collect();
        categories.sort();
        f.debug_struct("StrategyRegistry")
            .field("leading", &ids(self.leading.as_slice()))
            .field("categories", &categories)
            .field("fallback", &ids(self.fallback.as_slice()))
            .field("collect_all", &self.collect_all)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::error_parser::DiagnosticClassifier;
    use std::sync::Mutex;

    struct Scripted {
        id: &'static str,
        sources: Vec<&'static str>,
        fail: bool,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(id: &'static str, sources: Vec<&'static str>) -> Self {
            Self {
                id,
                sources,
                fail: false,
                calls: Mutex::new(0),
            }
        }

        fn failing(id: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::new(id, vec![])
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl FixStrategy for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(StrategyError::Unavailable("scripted".into()));
            }
            Ok(self
                .sources
                .iter()
                .map(|s| ctx.with_source(self.id, s.to_string(), "scripted"))
                .collect())
        }
    }

    fn diag() -> Diagnostic {
        DiagnosticClassifier::new().classify("mismatched types", None)
    }

    #[tokio::test]
    async fn test_stops_at_first_strategy_with_candidates() {
        let first = Arc::new(Scripted::new("first", vec!["b"]));
        let second = Arc::new(Scripted::new("second", vec!["c"]));
        let mut registry = StrategyRegistry::new();
        registry.register(ErrorCategory::TypeMismatch, first.clone());
        registry.register(ErrorCategory::TypeMismatch, second.clone());

        let state = ProgramState::new("a", "");
        let diag = diag();
        let candidates = registry.generate(&FixContext::new(&state, &diag)).await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source(), "b");
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_collect_all_concatenates_and_dedups() {
        let mut registry = StrategyRegistry::new();
        registry.register(
            ErrorCategory::TypeMismatch,
            Arc::new(Scripted::new("first", vec!["b", "a", "b"])),
        );
        registry.register_fallback(Arc::new(Scripted::new("second", vec!["b", "c"])));
        registry.set_collect_all(true);

        let state = ProgramState::new("a", "");
        let diag = diag();
        let candidates = registry.generate(&FixContext::new(&state, &diag)).await;

        let sources: Vec<&str> = candidates.iter().map(Candidate::source).collect();
        assert_eq!(sources, vec!["b", "c"]);
        assert_eq!(candidates[1].strategy_id, "second");
    }

    #[tokio::test]
    async fn test_strategy_error_is_zero_candidates() {
        let mut registry = StrategyRegistry::new();
        registry.register_leading(Arc::new(Scripted::failing("broken")));
        registry.register(
            ErrorCategory::TypeMismatch,
            Arc::new(Scripted::new("rule", vec!["b"])),
        );

        let state = ProgramState::new("a", "");
        let diag = diag();
        let candidates = registry.generate(&FixContext::new(&state, &diag)).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].strategy_id, "rule");
    }

    #[test]
    fn test_lookup_order() {
        let mut registry = StrategyRegistry::with_rules();
        registry.register_fallback(Arc::new(Scripted::new("model", vec![])));
        let registry = registry.with_leading(Arc::new(Scripted::new("learned", vec![])));

        assert_eq!(
            registry.ids_for(ErrorCategory::TypeMismatch),
            vec!["learned", "widen-operand", "model"]
        );
        assert_eq!(
            registry.ids_for(ErrorCategory::Unknown),
            vec!["learned", "model"]
        );
    }
}
