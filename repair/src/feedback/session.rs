//! Repair session state
//!
//! Everything the loop needs to resume or inspect a run lives here as explicit
//! state: the attempt log, the set of program states already compiled, the
//! candidates held back for a later iteration, and the remaining budget.

use crate::error::{RepairError, RepairResult};
use crate::feedback::compiler::{CompileRequest, CompileResult};
use crate::feedback::error_parser::ErrorCategory;
use crate::strategy::Candidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Source plus witness: the unit a fix changes and the identity used for cycle detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramState {
    pub source: String,
    pub witness: String,
}

impl ProgramState {
    pub fn new(source: impl Into<String>, witness: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            witness: witness.into(),
        }
    }

    pub fn to_request(&self) -> CompileRequest {
        CompileRequest::new(self.source.clone(), self.witness.clone())
    }

    /// blake3 hex digest of source and witness
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.source.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.witness.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

impl From<&CompileRequest> for ProgramState {
    fn from(request: &CompileRequest) -> Self {
        Self::new(request.source(), request.witness())
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The compiler accepted the current program
    Solved,
    /// Budget spent, or no fresh candidate left
    Exhausted,
    /// Compiler unreachable across retries, cancelled, or input unreadable
    Aborted,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solved => write!(f, "Solved"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A candidate on its way to the compiler, with the state it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFix {
    pub input: ProgramState,
    pub candidate: Candidate,
    pub category: Option<ErrorCategory>,
}

impl PendingFix {
    /// The unmodified program, compiled first
    pub fn original(state: ProgramState) -> Self {
        Self {
            input: state.clone(),
            candidate: Candidate::new(state, "original", None),
            category: None,
        }
    }
}

/// One compile of one program state. Append-only within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixAttempt {
    /// 1-indexed compile attempt
    pub iteration: u32,
    pub strategy_id: String,
    pub input: ProgramState,
    pub output: ProgramState,
    pub category_addressed: Option<ErrorCategory>,
    pub rationale: Option<String>,
    pub resulting: CompileResult,
    pub timestamp: DateTime<Utc>,
}

impl FixAttempt {
    pub fn input_source(&self) -> &str {
        &self.input.source
    }

    pub fn output_source(&self) -> &str {
        &self.output.source
    }

    /// Trail line: `#2 widen-operand [type_mismatch] -> compiled (..)`
    pub fn trail_line(&self) -> String {
        let category = self
            .category_addressed
            .map(|c| format!(" [{}]", c))
            .unwrap_or_default();
        format!(
            "#{} {}{} -> {}",
            self.iteration,
            self.strategy_id,
            category,
            self.resulting.summary()
        )
    }
}

/// Bounded record of one file's repair run
#[derive(Debug, Clone)]
pub struct RepairSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    original: ProgramState,
    current: ProgramState,
    attempts: Vec<FixAttempt>,
    seen: HashSet<ProgramState>,
    retained: VecDeque<PendingFix>,
    retained_category: Option<ErrorCategory>,
    transport_retries: u32,
    max_iterations: u32,
    terminal_state: Option<TerminalState>,
    reason: Option<String>,
}

impl RepairSession {
    pub fn new(original: ProgramState, max_iterations: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            current: original.clone(),
            original,
            attempts: Vec::new(),
            seen: HashSet::new(),
            retained: VecDeque::new(),
            retained_category: None,
            transport_retries: 0,
            max_iterations,
            terminal_state: None,
            reason: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn original(&self) -> &ProgramState {
        &self.original
    }

    /// Program state of the most recent attempt
    pub fn current(&self) -> &ProgramState {
        &self.current
    }

    pub fn attempts(&self) -> &[FixAttempt] {
        &self.attempts
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        self.terminal_state
    }

    /// Why the session ended, when it ended for a reason other than success
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_state.is_some()
    }

    pub fn budget_remaining(&self) -> u32 {
        self.max_iterations
            .saturating_sub(self.attempts.len() as u32)
    }

    /// Whether `state` has already been compiled in this session
    pub fn has_seen(&self, state: &ProgramState) -> bool {
        self.seen.contains(state)
    }

    pub fn last_result(&self) -> Option<&CompileResult> {
        self.attempts.last().map(|a| &a.resulting)
    }

    /// Accepted program, only for a solved session
    pub fn fixed_state(&self) -> Option<&ProgramState> {
        match self.terminal_state {
            Some(TerminalState::Solved) => Some(&self.current),
            _ => None,
        }
    }

    pub fn transport_retries(&self) -> u32 {
        self.transport_retries
    }

    pub fn note_transport_retry(&mut self) {
        self.transport_retries += 1;
    }

    /// Append the compile of `fix`.
    ///
    /// Refuses to grow past the budget, to record after the session ended, and
    /// to compile a program state twice.
    pub fn record(&mut self, fix: PendingFix, resulting: CompileResult) -> RepairResult<&FixAttempt> {
        if self.is_terminal() {
            return Err(RepairError::session("session already ended"));
        }
        if self.budget_remaining() == 0 {
            return Err(RepairError::session(format!(
                "iteration budget of {} exhausted",
                self.max_iterations
            )));
        }
        if self.seen.contains(&fix.candidate.state) {
            return Err(RepairError::session(format!(
                "program state from `{}` was already compiled",
                fix.candidate.strategy_id
            )));
        }

        self.seen.insert(fix.candidate.state.clone());
        self.current = fix.candidate.state.clone();

        let attempt = FixAttempt {
            iteration: self.attempts.len() as u32 + 1,
            strategy_id: fix.candidate.strategy_id,
            input: fix.input,
            output: fix.candidate.state,
            category_addressed: fix.category,
            rationale: fix.candidate.rationale,
            resulting,
            timestamp: Utc::now(),
        };
        self.attempts.push(attempt);
        Ok(&self.attempts[self.attempts.len() - 1])
    }

    /// Hold back the remaining candidates of a strategy for `category`
    pub fn retain(&mut self, category: ErrorCategory, fixes: impl IntoIterator<Item = PendingFix>) {
        self.retained = fixes.into_iter().collect();
        self.retained_category = Some(category);
    }

    /// Next retained candidate that is still fresh.
    ///
    /// Retained candidates are only handed out while the failure stays in the
    /// category they were generated for, unless `across_categories` is set.
    /// A category change without it discards them.
    pub fn take_retained(
        &mut self,
        category: ErrorCategory,
        across_categories: bool,
    ) -> Option<PendingFix> {
        if self.retained_category != Some(category) && !across_categories {
            self.clear_retained();
            return None;
        }
        while let Some(fix) = self.retained.pop_front() {
            if !self.seen.contains(&fix.candidate.state) {
                return Some(fix);
            }
        }
        self.retained_category = None;
        None
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    pub fn clear_retained(&mut self) {
        self.retained.clear();
        self.retained_category = None;
    }

    /// End as `Solved`; the last attempt must have compiled
    pub fn mark_solved(&mut self) -> RepairResult<()> {
        if self.is_terminal() {
            return Err(RepairError::session("session already ended"));
        }
        match self.last_result() {
            Some(result) if result.is_success() => {
                self.finish(TerminalState::Solved, None);
                Ok(())
            }
            _ => Err(RepairError::session(
                "cannot mark solved: last attempt did not compile",
            )),
        }
    }

    pub fn mark_exhausted(&mut self, reason: impl Into<String>) {
        self.finish(TerminalState::Exhausted, Some(reason.into()));
    }

    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.finish(TerminalState::Aborted, Some(reason.into()));
    }

    fn finish(&mut self, state: TerminalState, reason: Option<String>) {
        if let Some(existing) = self.terminal_state {
            tracing::warn!(session = %self.id, %existing, attempted = %state, "session already terminal");
            return;
        }
        self.terminal_state = Some(state);
        self.reason = reason;
        self.finished_at = Some(Utc::now());
        self.clear_retained();
    }

    /// Human-readable diagnostic trail, one line per attempt plus the ending
    pub fn trail(&self) -> Vec<String> {
        let mut trail: Vec<String> = self.attempts.iter().map(FixAttempt::trail_line).collect();
        if let Some(state) = self.terminal_state {
            match &self.reason {
                Some(reason) => trail.push(format!("{}: {}", state, reason)),
                None => trail.push(state.to_string()),
            }
        }
        trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::error_parser::DiagnosticClassifier;

    fn state(source: &str) -> ProgramState {
        ProgramState::new(source, "")
    }

    fn fix(input: &str, output: &str, strategy: &str) -> PendingFix {
        PendingFix {
            input: state(input),
            candidate: Candidate::new(state(output), strategy, None),
            category: Some(ErrorCategory::TypeMismatch),
        }
    }

    fn failed(message: &str) -> CompileResult {
        CompileResult::Failure {
            diagnostics: vec![DiagnosticClassifier::new().classify(message, None)],
        }
    }

    #[test]
    fn test_record_respects_budget() {
        let mut session = RepairSession::new(state("a"), 2);
        session
            .record(PendingFix::original(state("a")), failed("mismatched types"))
            .unwrap();
        session.record(fix("a", "b", "s"), failed("mismatched types")).unwrap();
        assert_eq!(session.budget_remaining(), 0);
        assert!(session.record(fix("b", "c", "s"), failed("x")).is_err());
        assert_eq!(session.attempts().len(), 2);
    }

    #[test]
    fn test_record_rejects_repeated_state() {
        let mut session = RepairSession::new(state("a"), 5);
        session
            .record(PendingFix::original(state("a")), failed("x"))
            .unwrap();
        session.record(fix("a", "b", "s"), failed("x")).unwrap();
        assert!(session.has_seen(&state("b")));
        assert!(session.record(fix("b", "a", "flip"), failed("x")).is_err());
    }

    #[test]
    fn test_witness_change_is_a_new_state() {
        let mut session = RepairSession::new(state("a"), 5);
        session
            .record(PendingFix::original(state("a")), failed("x"))
            .unwrap();
        assert!(!session.has_seen(&ProgramState::new("a", "{}")));
    }

    #[test]
    fn test_mark_solved_requires_success() {
        let mut session = RepairSession::new(state("a"), 5);
        assert!(session.mark_solved().is_err());
        session
            .record(PendingFix::original(state("a")), failed("x"))
            .unwrap();
        assert!(session.mark_solved().is_err());
        session
            .record(
                fix("a", "b", "s"),
                CompileResult::Success { artifact: vec![] },
            )
            .unwrap();
        session.mark_solved().unwrap();
        assert_eq!(session.terminal_state(), Some(TerminalState::Solved));
        assert_eq!(session.fixed_state(), Some(&state("b")));
        assert!(session.finished_at().is_some());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut session = RepairSession::new(state("a"), 5);
        session.mark_aborted("cancelled");
        session.mark_exhausted("later");
        assert_eq!(session.terminal_state(), Some(TerminalState::Aborted));
        assert_eq!(session.reason(), Some("cancelled"));
        assert!(session
            .record(PendingFix::original(state("a")), failed("x"))
            .is_err());
    }

    #[test]
    fn test_retained_dropped_on_category_change() {
        let mut session = RepairSession::new(state("a"), 5);
        session.retain(
            ErrorCategory::TypeMismatch,
            vec![fix("a", "c", "s"), fix("a", "d", "s")],
        );
        assert!(session
            .take_retained(ErrorCategory::SyntaxError, false)
            .is_none());
        assert_eq!(session.retained_len(), 0);
    }

    #[test]
    fn test_retained_survive_category_change_when_allowed() {
        let mut session = RepairSession::new(state("a"), 5);
        session.retain(
            ErrorCategory::TypeMismatch,
            vec![fix("a", "c", "s"), fix("a", "d", "s")],
        );
        let next = session
            .take_retained(ErrorCategory::SyntaxError, true)
            .unwrap();
        assert_eq!(next.candidate.state, state("c"));
        assert_eq!(next.category, Some(ErrorCategory::TypeMismatch));
        assert_eq!(session.retained_len(), 1);
    }

    #[test]
    fn test_retained_skips_seen_states() {
        let mut session = RepairSession::new(state("a"), 5);
        session
            .record(PendingFix::original(state("a")), failed("x"))
            .unwrap();
        session.record(fix("a", "c", "s"), failed("x")).unwrap();
        session.retain(
            ErrorCategory::TypeMismatch,
            vec![fix("a", "c", "s"), fix("a", "d", "s")],
        );
        let next = session
            .take_retained(ErrorCategory::TypeMismatch, false)
            .unwrap();
        assert_eq!(next.candidate.state, state("d"));
        assert_eq!(next.input, state("a"));
    }

    #[test]
    fn test_trail_ends_with_terminal_state() {
        let mut session = RepairSession::new(state("a"), 5);
        session
            .record(PendingFix::original(state("a")), failed("Assertion failed"))
            .unwrap();
        session.mark_exhausted("no candidate for assertion_failed");
        let trail = session.trail();
        assert_eq!(trail.len(), 2);
        assert!(trail[0].starts_with("#1 original -> failed: assertion_failed"));
        assert_eq!(trail[1], "Exhausted: no candidate for assertion_failed");
    }

    #[test]
    fn test_fingerprint_separates_source_and_witness() {
        assert_ne!(
            ProgramState::new("ab", "").fingerprint(),
            ProgramState::new("a", "b").fingerprint()
        );
    }
}
