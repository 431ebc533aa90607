//! Bounded compile history shared by the sessions of one run

use crate::feedback::compiler::{CompileRequest, CompileResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const MAX_ENTRIES: usize = 50;
const SOURCE_PREVIEW_CHARS: usize = 500;
const WITNESS_PREVIEW_CHARS: usize = 200;
const ERROR_PREVIEW_CHARS: usize = 200;

/// One recorded compile call
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub witness: String,
    pub success: bool,
    pub errors: String,
}

/// Most recent compile calls, oldest evicted first. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CompileHistory {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
}

impl CompileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, request: &CompileRequest, result: &CompileResult) {
        let entry = HistoryEntry {
            timestamp: Utc::now(),
            source: preview(request.source(), SOURCE_PREVIEW_CHARS),
            witness: preview(request.witness(), WITNESS_PREVIEW_CHARS),
            success: result.is_success(),
            errors: result.error_text(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push_back(entry);
        while entries.len() > MAX_ENTRIES {
            entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Human-readable report of the newest `limit` entries
    pub fn render(&self, limit: usize) -> String {
        let recent = self.recent(limit);
        if recent.is_empty() {
            return "No compilation history available yet.".to_string();
        }

        let mut out = format!("Compilation History:\n{}\n\n", "=".repeat(50));
        for (i, entry) in recent.iter().enumerate() {
            let status = if entry.success { "SUCCESS" } else { "FAILED" };
            out.push_str(&format!(
                "{}. {} ({})\n",
                i + 1,
                status,
                entry.timestamp.format("%H:%M:%S")
            ));
            if !entry.errors.is_empty() {
                out.push_str(&format!(
                    "   Errors: {}\n",
                    entry.errors.chars().take(ERROR_PREVIEW_CHARS).collect::<String>()
                ));
            }
            out.push('\n');
        }
        out
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    }
}
