//! SimplicityHL Repair Library
//!
//! This library provides:
//! - A compile client for the external SimplicityHL compiler (local process or HTTP)
//! - Diagnostic classification into a small set of fixable categories
//! - Rule-based and model-driven fix strategies behind one registry
//! - A bounded compile → classify → fix loop with cycle detection
//! - Artifact persistence and a batch runner with cooperative cancellation
//!
//! # Usage
//!
//! ```no_run
//! use simf_repair::{RepairConfig, Repairer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> simf_repair::RepairResult<()> {
//! let repairer = Repairer::from_config(RepairConfig::from_env(), None)?;
//! let report = repairer
//!     .repair_file("contract.simf".as_ref(), None, &CancellationToken::new())
//!     .await;
//! println!("{}", report.outcome.terminal_state);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod feedback;
pub mod repairer;
pub mod strategy;
pub mod witness;

pub use artifact::{
    load_session_record, ArtifactLocation, ArtifactStore, AttemptRecord, FsArtifactStore,
    SessionKey, SessionRecord,
};
pub use config::{ModelEndpoint, RepairConfig};
pub use error::{RepairError, RepairResult};
pub use feedback::{
    CompileClient, CompileHistory, CompileRequest, CompileResult, CompilerBackend, Diagnostic,
    DiagnosticClassifier, ErrorCategory, HistoryEntry, ProgramState, RepairLoop, RepairOutcome, RepairSession,
    TerminalState,
};
pub use repairer::{read_input, BatchItem, FileReport, Repairer, ReportSummary};
pub use strategy::{Candidate, FixCache, FixContext, FixStrategy, StrategyError, StrategyRegistry};
pub use witness::WitnessFile;
