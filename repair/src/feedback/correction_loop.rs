//! Iterative repair loop
//!
//! Drives one session through its phases:
//! 1. Compile the current candidate (the original first)
//! 2. Classify the diagnostics of a failure
//! 3. Ask the strategy registry for candidates
//! 4. Repeat until the compiler accepts, the budget runs out, no fresh
//!    candidate is left, or the compiler stays unreachable

use crate::config::RepairConfig;
use crate::feedback::compiler::{CompileClient, CompileRequest, CompileResult};
use crate::feedback::error_parser::Diagnostic;
use crate::feedback::session::{PendingFix, ProgramState, RepairSession, TerminalState};
use crate::strategy::{Candidate, FixContext, StrategyRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Where the loop is between two steps
#[derive(Debug)]
enum Phase {
    Compiling(PendingFix),
    Classifying(Vec<Diagnostic>),
    Generating(Vec<Diagnostic>),
    Done,
}

/// Terminal result of one session
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub terminal_state: TerminalState,
    pub reason: Option<String>,
    /// Accepted program, only when solved
    pub fixed: Option<ProgramState>,
    /// One line per attempt plus the ending
    pub trail: Vec<String>,
    pub session: RepairSession,
}

impl RepairOutcome {
    pub fn from_session(mut session: RepairSession) -> Self {
        if !session.is_terminal() {
            session.mark_aborted("loop ended without a terminal state");
        }
        Self {
            terminal_state: session.terminal_state().unwrap_or(TerminalState::Aborted),
            reason: session.reason().map(str::to_string),
            fixed: session.fixed_state().cloned(),
            trail: session.trail(),
            session,
        }
    }

    /// Outcome for a session that never compiled anything
    pub fn aborted(original: ProgramState, max_iterations: u32, reason: impl Into<String>) -> Self {
        let mut session = RepairSession::new(original, max_iterations);
        session.mark_aborted(reason);
        Self::from_session(session)
    }

    pub fn is_solved(&self) -> bool {
        self.terminal_state == TerminalState::Solved
    }

    pub fn fixed_source(&self) -> Option<&str> {
        self.fixed.as_ref().map(|s| s.source.as_str())
    }

    pub fn fixed_witness(&self) -> Option<&str> {
        self.fixed.as_ref().map(|s| s.witness.as_str())
    }
}

/// Compile → classify → generate, bounded by the session budget
pub struct RepairLoop {
    client: Arc<CompileClient>,
    registry: StrategyRegistry,
    config: RepairConfig,
}

impl RepairLoop {
    pub fn new(client: Arc<CompileClient>, mut registry: StrategyRegistry, config: RepairConfig) -> Self {
        if config.collect_all_strategies {
            registry.set_collect_all(true);
        }
        Self {
            client,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Run one session to a terminal state. Never fails.
    pub async fn run(&self, request: CompileRequest, cancel: &CancellationToken) -> RepairOutcome {
        let original = ProgramState::from(&request);
        let mut session = RepairSession::new(original, self.config.max_iterations);
        let span = tracing::info_span!("repair", session = %session.id());

        self.drive(&mut session, cancel).instrument(span).await;
        RepairOutcome::from_session(session)
    }

    async fn drive(&self, session: &mut RepairSession, cancel: &CancellationToken) {
        let mut phase = Phase::Compiling(PendingFix::original(session.original().clone()));
        loop {
            phase = match phase {
                Phase::Compiling(fix) => self.compile_phase(session, fix, cancel).await,
                Phase::Classifying(diagnostics) => self.classify_phase(session, diagnostics),
                Phase::Generating(focus) => self.generate_phase(session, focus).await,
                Phase::Done => break,
            };
        }

        tracing::info!(
            state = ?session.terminal_state(),
            attempts = session.attempts().len(),
            reason = session.reason().unwrap_or(""),
            "repair session finished"
        );
    }

    async fn compile_phase(
        &self,
        session: &mut RepairSession,
        fix: PendingFix,
        cancel: &CancellationToken,
    ) -> Phase {
        if cancel.is_cancelled() {
            session.mark_aborted("cancelled");
            return Phase::Done;
        }
        if session.budget_remaining() == 0 {
            session.mark_exhausted(self.budget_reason());
            return Phase::Done;
        }

        let request = fix.candidate.state.to_request();
        let Some(result) = self.compile_guarded(&request, session, cancel).await else {
            session.mark_aborted("cancelled during compile");
            return Phase::Done;
        };
        // A result that raced a cancellation is discarded, never recorded as a success
        if cancel.is_cancelled() {
            session.mark_aborted("cancelled");
            return Phase::Done;
        }

        let success = result.is_success();
        let transport_fault = result.is_transport_fault();
        let diagnostics = result.diagnostics().to_vec();

        match session.record(fix, result) {
            Ok(attempt) => tracing::info!(
                iteration = attempt.iteration,
                strategy = %attempt.strategy_id,
                outcome = %attempt.resulting.summary(),
                "compile attempt"
            ),
            Err(e) => {
                session.mark_aborted(e.to_string());
                return Phase::Done;
            }
        }

        if success {
            if let Err(e) = session.mark_solved() {
                session.mark_aborted(e.to_string());
            }
            return Phase::Done;
        }
        if transport_fault {
            let message = diagnostics
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_default();
            session.mark_aborted(format!(
                "compiler unreachable after {} retries: {}",
                self.config.transport_retries, message
            ));
            return Phase::Done;
        }

        Phase::Classifying(diagnostics)
    }

    /// Compile with in-place transport retries. `None` when cancelled.
    async fn compile_guarded(
        &self,
        request: &CompileRequest,
        session: &mut RepairSession,
        cancel: &CancellationToken,
    ) -> Option<CompileResult> {
        let mut retries = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.client.compile(request) => result,
            };

            if !result.is_transport_fault() || retries >= self.config.transport_retries {
                return Some(result);
            }

            retries += 1;
            session.note_transport_retry();
            let backoff = retry_backoff(self.config.retry_backoff_ms, retries);
            tracing::warn!(
                retry = retries,
                max_retries = self.config.transport_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %result.summary(),
                "compile transport fault, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    fn classify_phase(&self, session: &mut RepairSession, diagnostics: Vec<Diagnostic>) -> Phase {
        let mut focus: Vec<Diagnostic> = diagnostics
            .into_iter()
            .filter(|d| !d.is_transport())
            .collect();
        if focus.is_empty() {
            session.mark_exhausted("compile failed without a usable diagnostic");
            return Phase::Done;
        }
        if !self.config.batch_diagnostics {
            focus.truncate(1);
        }

        tracing::debug!(
            category = %focus[0].category,
            location = ?focus[0].location,
            addressed = focus.len(),
            "classified failure"
        );
        Phase::Generating(focus)
    }

    async fn generate_phase(&self, session: &mut RepairSession, focus: Vec<Diagnostic>) -> Phase {
        let category = focus[0].category;

        if session.budget_remaining() == 0 {
            session.mark_exhausted(self.budget_reason());
            return Phase::Done;
        }

        if let Some(fix) =
            session.take_retained(category, self.config.retry_candidates_on_category_change)
        {
            tracing::debug!(strategy = %fix.candidate.strategy_id, "trying retained candidate");
            return Phase::Compiling(fix);
        }

        let current = session.current().clone();
        let produced = if focus.len() > 1 {
            self.chain_fixes(session, &current, &focus).await
        } else {
            let ctx = FixContext::new(&current, &focus[0]);
            self.registry
                .generate(&ctx)
                .await
                .into_iter()
                .map(|candidate| PendingFix {
                    input: current.clone(),
                    candidate,
                    category: Some(category),
                })
                .collect()
        };

        let total = produced.len();
        let mut fresh = produced
            .into_iter()
            .filter(|fix| !session.has_seen(&fix.candidate.state))
            .collect::<Vec<_>>()
            .into_iter();

        match fresh.next() {
            Some(next) => {
                session.retain(category, fresh);
                Phase::Compiling(next)
            }
            None => {
                let reason = if total == 0 {
                    format!("no candidate for {}", category)
                } else {
                    format!("every candidate for {} was already tried", category)
                };
                tracing::debug!(%category, total, "no fresh candidate");
                session.mark_exhausted(reason);
                Phase::Done
            }
        }
    }

    /// Fix each diagnostic in turn, feeding each first fresh candidate into the next
    async fn chain_fixes(
        &self,
        session: &RepairSession,
        base: &ProgramState,
        focus: &[Diagnostic],
    ) -> Vec<PendingFix> {
        let mut state = base.clone();
        let mut ids: Vec<String> = Vec::new();
        let mut rationales: Vec<String> = Vec::new();

        for diagnostic in focus {
            let ctx = FixContext::new(&state, diagnostic);
            let next = self
                .registry
                .generate(&ctx)
                .await
                .into_iter()
                .find(|c| !session.has_seen(&c.state));
            if let Some(candidate) = next {
                ids.push(candidate.strategy_id);
                rationales.extend(candidate.rationale);
                state = candidate.state;
            }
        }

        if ids.is_empty() {
            return vec![];
        }
        vec![PendingFix {
            input: base.clone(),
            candidate: Candidate::new(state, ids.join("+"), Some(rationales.join("; "))),
            category: Some(focus[0].category),
        }]
    }

    fn budget_reason(&self) -> String {
        format!("iteration budget of {} exhausted", self.config.max_iterations)
    }
}

/// Linear backoff, saturating for oversized settings
fn retry_backoff(base_ms: u64, retries: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(u64::from(retries)))
}
