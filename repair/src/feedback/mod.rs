//! Compilation Feedback Module
//!
//! Provides the bounded repair loop for SimplicityHL programs:
//! - Run the external compiler and normalize its output
//! - Classify diagnostics (type mismatch, missing witness, assertion, etc.)
//! - Iterate with fix strategies until the compiler accepts the program
//!
//! # Architecture
//!
//! ```text
//! Program → CompileClient → DiagnosticClassifier → StrategyRegistry → Candidate
//!               ↑                                                       |
//!               └───────────────────── RepairLoop ──────────────────────┘
//! ```

pub mod backend;
pub mod compiler;
pub mod correction_loop;
pub mod error_parser;
pub mod history;
pub mod session;

pub use backend::{parse_process_output, parse_service_response, HttpBackend, ProcessBackend};
pub use compiler::{
    BackendError, CompileClient, CompileRequest, CompileResult, CompilerBackend,
    RawCompileOutput, RawDiagnostic,
};
pub use correction_loop::{RepairLoop, RepairOutcome};
pub use error_parser::{
    Diagnostic, DiagnosticClassifier, DiagnosticLocation, DiagnosticOrigin, ErrorCategory,
};
pub use history::{CompileHistory, HistoryEntry};
pub use session::{FixAttempt, PendingFix, ProgramState, RepairSession, TerminalState};
