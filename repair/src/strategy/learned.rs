//! Learned fixes, scoped to one batch run
//!
//! A [`FixCache`] is created by the batch runner, shared by its sessions and
//! dropped with it. When a session is solved, the fixes on its path to the
//! accepted program are remembered, so an identical failing state in another
//! file can skip straight to the known fix.

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use crate::feedback::error_parser::ErrorCategory;
use crate::feedback::session::{ProgramState, RepairSession, TerminalState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type FixKey = (ErrorCategory, String);

/// Known fixes keyed by category and the blake3 fingerprint of the failing state
#[derive(Debug, Clone, Default)]
pub struct FixCache {
    fixes: Arc<RwLock<HashMap<FixKey, ProgramState>>>,
}

impl FixCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the fixes that led a solved session to its accepted program.
    /// Returns how many were recorded.
    pub fn learn(&self, session: &RepairSession) -> usize {
        if session.terminal_state() != Some(TerminalState::Solved) {
            return 0;
        }
        let Some(last) = session.attempts().last() else {
            return 0;
        };

        let mut fixes = self.fixes.write().unwrap_or_else(|e| e.into_inner());
        let mut target = &last.output;
        let mut learned = 0;
        for attempt in session.attempts().iter().rev() {
            if &attempt.output != target {
                continue;
            }
            let Some(category) = attempt.category_addressed else {
                break;
            };
            fixes.insert(
                (category, attempt.input.fingerprint()),
                attempt.output.clone(),
            );
            learned += 1;
            target = &attempt.input;
        }

        if learned > 0 {
            tracing::debug!(session = %session.id(), learned, "learned fixes from solved session");
        }
        learned
    }

    pub fn lookup(&self, category: ErrorCategory, state: &ProgramState) -> Option<ProgramState> {
        self.fixes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(category, state.fingerprint()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.fixes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Replays a fix from the [`FixCache`] for an identical failing state
pub struct LearnedFixStrategy {
    cache: FixCache,
}

impl LearnedFixStrategy {
    pub fn new(cache: FixCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FixStrategy for LearnedFixStrategy {
    fn id(&self) -> &str {
        "learned"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        Ok(self
            .cache
            .lookup(ctx.category, &ctx.state())
            .map(|state| {
                Candidate::new(
                    state,
                    self.id(),
                    Some("fix learned earlier in this batch".to_string()),
                )
            })
            .into_iter()
            .collect())
    }
}
