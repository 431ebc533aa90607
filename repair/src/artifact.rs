//! Artifact persistence
//!
//! A solved session leaves `<stem>_fixed.simf` (and `<stem>_fixed.wit` when the
//! witness changed) next to the original or in the configured output
//! directory. The attempt history goes to `<stem>.repair.json`: always for
//! sessions that did not solve, and for solved ones when history is enabled.
//! Every file is written to a temporary sibling and renamed into place.

use crate::config::RepairConfig;
use crate::error::{RepairError, RepairResult};
use crate::feedback::error_parser::{Diagnostic, ErrorCategory};
use crate::feedback::session::{ProgramState, RepairSession, TerminalState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Version of the `.repair.json` layout
pub const SESSION_RECORD_VERSION: u32 = 1;

/// Identity of the original file a session repaired
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub source_path: PathBuf,
    /// blake3 hex of the original source and witness
    pub fingerprint: String,
}

impl SessionKey {
    pub fn new(source_path: impl Into<PathBuf>, original: &ProgramState) -> Self {
        Self {
            source_path: source_path.into(),
            fingerprint: original.fingerprint(),
        }
    }
}

/// Files written for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation {
    pub fixed_source: Option<PathBuf>,
    pub fixed_witness: Option<PathBuf>,
    pub history: Option<PathBuf>,
}

/// Where terminal sessions go
pub trait ArtifactStore: Send + Sync {
    fn persist(&self, key: &SessionKey, session: &RepairSession) -> RepairResult<ArtifactLocation>;
}

/// One attempt as stored in `.repair.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub iteration: u32,
    pub strategy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_addressed: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub compiled: bool,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub output_source: String,
    #[serde(default)]
    pub output_witness: String,
    pub timestamp: DateTime<Utc>,
}

/// Structured session history keyed by original file identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub schema_version: u32,
    pub key: SessionKey,
    pub session_id: Uuid,
    pub terminal_state: TerminalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub max_iterations: u32,
    pub attempts: Vec<AttemptRecord>,
}

impl SessionRecord {
    pub fn from_session(key: &SessionKey, session: &RepairSession) -> Self {
        Self {
            schema_version: SESSION_RECORD_VERSION,
            key: key.clone(),
            session_id: session.id(),
            terminal_state: session.terminal_state().unwrap_or(TerminalState::Aborted),
            reason: session.reason().map(str::to_string),
            started_at: session.started_at(),
            finished_at: session.finished_at(),
            max_iterations: session.max_iterations(),
            attempts: session
                .attempts()
                .iter()
                .map(|a| AttemptRecord {
                    iteration: a.iteration,
                    strategy_id: a.strategy_id.clone(),
                    category_addressed: a.category_addressed,
                    rationale: a.rationale.clone(),
                    compiled: a.resulting.is_success(),
                    diagnostics: a.resulting.diagnostics().to_vec(),
                    output_source: a.output.source.clone(),
                    output_witness: a.output.witness.clone(),
                    timestamp: a.timestamp,
                })
                .collect(),
        }
    }
}

/// Read back a `.repair.json` file
pub fn load_session_record(path: &Path) -> RepairResult<SessionRecord> {
    let text = std::fs::read_to_string(path).map_err(|e| RepairError::input(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

/// Filesystem store using the `_fixed` naming convention
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    output_dir: Option<PathBuf>,
    suffix: String,
    write_history: bool,
}

impl FsArtifactStore {
    pub fn new(output_dir: Option<PathBuf>, suffix: impl Into<String>, write_history: bool) -> Self {
        Self {
            output_dir,
            suffix: suffix.into(),
            write_history,
        }
    }

    pub fn from_config(config: &RepairConfig) -> Self {
        Self::new(
            config.output_dir.clone(),
            config.fixed_suffix.clone(),
            config.write_history,
        )
    }

    fn target_dir(&self, source_path: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.clone(),
            None => source_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    fn stem(source_path: &Path) -> String {
        source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "program".to_string())
    }

    /// `<dir>/<stem><suffix>.simf`
    pub fn fixed_source_path(&self, source_path: &Path) -> PathBuf {
        self.target_dir(source_path)
            .join(format!("{}{}.simf", Self::stem(source_path), self.suffix))
    }

    /// `<dir>/<stem><suffix>.wit`
    pub fn fixed_witness_path(&self, source_path: &Path) -> PathBuf {
        self.target_dir(source_path)
            .join(format!("{}{}.wit", Self::stem(source_path), self.suffix))
    }

    /// `<dir>/<stem>.repair.json`
    pub fn history_path(&self, source_path: &Path) -> PathBuf {
        self.target_dir(source_path)
            .join(format!("{}.repair.json", Self::stem(source_path)))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn persist(&self, key: &SessionKey, session: &RepairSession) -> RepairResult<ArtifactLocation> {
        let dir = self.target_dir(&key.source_path);
        if self.output_dir.is_some() {
            std::fs::create_dir_all(&dir).map_err(|e| RepairError::persistence(&dir, e))?;
        }

        let mut location = ArtifactLocation::default();
        let solved = session.terminal_state() == Some(TerminalState::Solved);

        if let Some(fixed) = session.fixed_state() {
            let path = self.fixed_source_path(&key.source_path);
            write_atomic(&path, fixed.source.as_bytes())?;
            location.fixed_source = Some(path);

            if fixed.witness != session.original().witness {
                let path = self.fixed_witness_path(&key.source_path);
                write_atomic(&path, fixed.witness.as_bytes())?;
                location.fixed_witness = Some(path);
            }
        }

        if self.write_history || !solved {
            let record = SessionRecord::from_session(key, session);
            let path = self.history_path(&key.source_path);
            let json = serde_json::to_string_pretty(&record)?;
            write_atomic(&path, json.as_bytes())?;
            location.history = Some(path);
        }

        tracing::debug!(
            source = %key.source_path.display(),
            fixed = ?location.fixed_source,
            history = ?location.history,
            "session persisted"
        );
        Ok(location)
    }
}

/// Write to a temporary file in the target directory, then rename over `path`
fn write_atomic(path: &Path, contents: &[u8]) -> RepairResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| RepairError::persistence(path, e))?;
    tmp.write_all(contents)
        .and_then(|_| tmp.flush())
        .map_err(|e| RepairError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| RepairError::persistence(path, e.error))?;
    Ok(())
}
