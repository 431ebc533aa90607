//! Compile client
//!
//! Wraps an external SimplicityHL compiler behind [`CompilerBackend`] and
//! normalizes whatever it returns into a typed [`CompileResult`]. Transport
//! faults (timeouts, unreachable compiler, malformed responses) never escape:
//! they become a `Failure` carrying one `Unknown` diagnostic of transport origin.

use crate::feedback::error_parser::{Diagnostic, DiagnosticClassifier};
use crate::feedback::history::CompileHistory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Source plus witness handed to the compiler. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileRequest {
    source: String,
    witness: String,
}

impl CompileRequest {
    pub fn new(source: impl Into<String>, witness: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            witness: witness.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Witness text, possibly empty
    pub fn witness(&self) -> &str {
        &self.witness
    }

    pub fn has_witness(&self) -> bool {
        !self.witness.trim().is_empty()
    }
}

/// Result of one compile attempt. Never both an artifact and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    /// The compiler accepted the program
    Success { artifact: Vec<u8> },
    /// The compiler rejected the program, or could not be reached
    Failure { diagnostics: Vec<Diagnostic> },
}

impl CompileResult {
    /// Failure caused by the transport rather than the program
    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self::Failure {
            diagnostics: vec![Diagnostic::transport(message)],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Diagnostics in compiler order (empty on success)
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Success { .. } => &[],
            Self::Failure { diagnostics } => diagnostics,
        }
    }

    /// The diagnostic the loop addresses first
    pub fn first_diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostics().first()
    }

    /// Whether every diagnostic was synthesized from a transport fault
    pub fn is_transport_fault(&self) -> bool {
        let diagnostics = self.diagnostics();
        !diagnostics.is_empty() && diagnostics.iter().all(Diagnostic::is_transport)
    }

    /// One-line outcome for trails and history
    pub fn summary(&self) -> String {
        match self {
            Self::Success { artifact } => format!("compiled ({} byte artifact)", artifact.len()),
            Self::Failure { diagnostics } => {
                let first = diagnostics
                    .first()
                    .map(Diagnostic::summary)
                    .unwrap_or_default();
                if diagnostics.len() > 1 {
                    format!("failed: {} (+{} more)", first, diagnostics.len() - 1)
                } else {
                    format!("failed: {}", first)
                }
            }
        }
    }

    /// Joined diagnostic text, empty on success
    pub fn error_text(&self) -> String {
        self.diagnostics()
            .iter()
            .map(|d| d.message.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A diagnostic as the compiler reported it, before classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiagnostic {
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl RawDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    pub fn at(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

/// What a backend got back from the compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCompileOutput {
    Accepted { artifact: Vec<u8> },
    Rejected { diagnostics: Vec<RawDiagnostic> },
}

/// Faults of the compile transport itself
#[derive(Debug, Error)]
pub enum BackendError {
    /// Compiler process could not be started
    #[error("Failed to run compiler `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Scratch files for the compiler could not be written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Remote compile service answered with a non-success status
    #[error("Compile service error ({status}): {body}")]
    Status { status: u16, body: String },

    /// Response could not be interpreted
    #[error("Malformed compiler response: {0}")]
    Malformed(String),
}

/// The compile boundary: one request in, one raw output (or transport fault) out.
#[async_trait]
pub trait CompilerBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Run the compiler once
    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError>;
}

/// Typed, timeout-guarded front of a [`CompilerBackend`]
pub struct CompileClient {
    backend: Arc<dyn CompilerBackend>,
    classifier: DiagnosticClassifier,
    timeout: Duration,
    history: Option<CompileHistory>,
}

impl CompileClient {
    pub fn new(backend: Arc<dyn CompilerBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            classifier: DiagnosticClassifier::new(),
            timeout,
            history: None,
        }
    }

    /// Record every compile call in `history`
    pub fn with_history(mut self, history: CompileHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn history(&self) -> Option<&CompileHistory> {
        self.history.as_ref()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compile once. Always returns a typed result.
    pub async fn compile(&self, request: &CompileRequest) -> CompileResult {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.backend.run(request)).await {
            Ok(Ok(output)) => self.normalize(output),
            Ok(Err(e)) => {
                tracing::warn!(backend = %self.backend.name(), error = %e, "compile transport fault");
                CompileResult::transport_failure(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    backend = %self.backend.name(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "compile timed out"
                );
                CompileResult::transport_failure(format!(
                    "Compiler timed out after {:.1}s",
                    self.timeout.as_secs_f64()
                ))
            }
        };

        tracing::debug!(
            backend = %self.backend.name(),
            source_len = request.source().len(),
            duration_ms = start.elapsed().as_millis() as u64,
            outcome = %result.summary(),
            "compile finished"
        );

        if let Some(history) = &self.history {
            history.record(request, &result);
        }

        result
    }

    fn normalize(&self, output: RawCompileOutput) -> CompileResult {
        match output {
            RawCompileOutput::Accepted { artifact } => CompileResult::Success { artifact },
            RawCompileOutput::Rejected { diagnostics } if diagnostics.is_empty() => {
                CompileResult::Failure {
                    diagnostics: vec![self
                        .classifier
                        .classify("compiler rejected the program without a diagnostic", None)],
                }
            }
            RawCompileOutput::Rejected { diagnostics } => CompileResult::Failure {
                diagnostics: diagnostics
                    .iter()
                    .map(|d| self.classifier.classify(&d.message, d.location.as_deref()))
                    .collect(),
            },
        }
    }
}
