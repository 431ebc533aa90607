//! Diagnostic classification
//!
//! Maps raw compiler messages onto the fixed set of categories the strategy
//! registry is keyed by. Rules are ordered most specific first and the first
//! match wins, so the same message always lands in the same category.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Compiled regex patterns for error classification, in evaluation order
static WITNESS_COUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(expected\s+\d+\s+witness|fewer witness|not enough witness|too few witness|witness count|missing\s+\d+\s+witness|\d+\s+witness\s+(reads?|values?)\b.*\bbut\b)",
    )
    .unwrap()
});

static MISSING_WITNESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(witness\s+`?\w+`?\s+(is\s+)?(missing|absent|undefined|not\s+(found|provided|supplied|defined|assigned))|missing witness|no witness|empty witness|witness\s+(data|file|value)s?\s+(is\s+|are\s+)?(empty|absent|missing))",
    )
    .unwrap()
});

static ASSERTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(assertion\s+(failed|failure|violated)|assert(ion)?\b.*\b(evaluated|evaluates|is)\s+false|jet\s+failed|verify\s+failed)")
        .unwrap()
});

static TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(mismatched types|type mismatch|incompatible\s+(types|widths?)|width mismatch|expected\s+(an?\s+)?(expression\s+of\s+)?type\s+.+\bfound\b|expected\s+`[^`]+`,\s*found\s+`[^`]+`)",
    )
    .unwrap()
});

static SYNTAX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(syntax error|parse error|parsing error|grammar|unexpected\s+(token|character|symbol|end of (file|input))|unterminated|unclosed|unmatched|expected\s+(EOI|program|item|expression|statement|identifier|`;`|;|`\}`|\}))",
    )
    .unwrap()
});

/// `--> 3:5` or `--> file.simf:3:5` in a rendered diagnostic
static ARROW_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-->\s*(?:[^\s:]+:)?(\d+):(\d+)").unwrap());

/// `line 3` / `line 3, column 5`
static LINE_WORD_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bline\s+(\d+)(?:\s*,?\s*col(?:umn)?\s+(\d+))?").unwrap()
});

/// Gutter of a rendered snippet: `3 | let a: u32 = 5;`
static GUTTER_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s+\|").unwrap());

/// Bare `3:5` or `3`
static BARE_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)(?::(\d+))?\s*$").unwrap());

static QUOTED_WITNESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)witness\s+`([A-Za-z_][A-Za-z0-9_]*)`").unwrap());

/// Error categories the strategy registry is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Two operands with incompatible declared widths/types
    TypeMismatch,
    /// Witness data absent or empty where a value was required
    MissingWitness,
    /// A runtime assertion evaluated false
    AssertionFailed,
    /// Fewer witness values supplied than the program consumes
    WitnessCountMismatch,
    /// Malformed grammar
    SyntaxError,
    /// No rule matched, or the compiler could not be reached
    Unknown,
}

impl ErrorCategory {
    /// All categories, in classification order with `Unknown` last
    pub const ALL: [ErrorCategory; 6] = [
        Self::WitnessCountMismatch,
        Self::MissingWitness,
        Self::AssertionFailed,
        Self::TypeMismatch,
        Self::SyntaxError,
        Self::Unknown,
    ];

    /// Whether fixes for this category edit the witness rather than the program
    pub fn is_witness_related(&self) -> bool {
        matches!(self, Self::MissingWitness | Self::WitnessCountMismatch)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::MissingWitness => write!(f, "missing_witness"),
            Self::AssertionFailed => write!(f, "assertion_failed"),
            Self::WitnessCountMismatch => write!(f, "witness_count_mismatch"),
            Self::SyntaxError => write!(f, "syntax_error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Where a diagnostic points
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLocation {
    /// 1-indexed line and column
    LineColumn { line: usize, column: usize },
    /// A named symbol (variable, witness)
    Symbol(String),
}

impl DiagnosticLocation {
    /// Line number, when the location has one
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::LineColumn { line, .. } => Some(*line),
            Self::Symbol(_) => None,
        }
    }

    /// Symbol name, when the location is one
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(name) => Some(name),
            Self::LineColumn { .. } => None,
        }
    }
}

impl std::fmt::Display for DiagnosticLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LineColumn { line, column } => write!(f, "{}:{}", line, column),
            Self::Symbol(name) => write!(f, "`{}`", name),
        }
    }
}

/// Who produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticOrigin {
    /// Reported by the compiler about the program
    Compiler,
    /// Synthesized because the compiler could not be reached or answered garbage
    Transport,
}

/// A classified compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<DiagnosticLocation>,
    pub origin: DiagnosticOrigin,
}

impl Diagnostic {
    /// Diagnostic for a transport fault (timeout, unreachable compiler, bad response)
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Unknown,
            message: message.into(),
            location: None,
            origin: DiagnosticOrigin::Transport,
        }
    }

    /// Line the diagnostic points at, if any
    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().and_then(|l| l.line())
    }

    pub fn is_transport(&self) -> bool {
        self.origin == DiagnosticOrigin::Transport
    }

    /// One-line summary for trails and logs
    pub fn summary(&self) -> String {
        let first_line = self
            .message
            .lines()
            .map(str::trim)
            .find(|l| l.chars().any(char::is_alphabetic))
            .unwrap_or("");
        match &self.location {
            Some(loc) => format!("{} at {}: {}", self.category, loc, first_line),
            None => format!("{}: {}", self.category, first_line),
        }
    }

    /// Format for a model fix prompt
    pub fn format_for_prompt(&self) -> String {
        let mut result = format!("Category: {}\n", self.category);
        if let Some(loc) = &self.location {
            result.push_str(&format!("Location: {}\n", loc));
        }
        result.push_str(&format!("\nFull diagnostic:\n{}", self.message));
        result
    }
}

/// Pure, total classifier from raw compiler output to [`Diagnostic`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticClassifier;

impl DiagnosticClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one raw compiler message with its optional location hint
    pub fn classify(&self, raw_message: &str, raw_location: Option<&str>) -> Diagnostic {
        let category = Self::category_of(raw_message);
        let location = raw_location
            .and_then(Self::parse_location)
            .or_else(|| Self::location_from_message(raw_message, category));

        Diagnostic {
            category,
            message: raw_message.trim().to_string(),
            location,
            origin: DiagnosticOrigin::Compiler,
        }
    }

    /// First matching rule wins; nothing matching is `Unknown`
    pub fn category_of(message: &str) -> ErrorCategory {
        let rules: [(&Regex, ErrorCategory); 5] = [
            (&*WITNESS_COUNT_PATTERN, ErrorCategory::WitnessCountMismatch),
            (&*MISSING_WITNESS_PATTERN, ErrorCategory::MissingWitness),
            (&*ASSERTION_PATTERN, ErrorCategory::AssertionFailed),
            (&*TYPE_PATTERN, ErrorCategory::TypeMismatch),
            (&*SYNTAX_PATTERN, ErrorCategory::SyntaxError),
        ];

        rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|(_, category)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// Parse a location hint supplied next to the message
    pub fn parse_location(raw: &str) -> Option<DiagnosticLocation> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(caps) = BARE_LOCATION.captures(raw) {
            return line_column(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()));
        }
        if let Some(caps) = ARROW_LOCATION.captures(raw) {
            return line_column(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()));
        }
        if let Some(caps) = LINE_WORD_LOCATION.captures(raw) {
            return line_column(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()));
        }
        Some(DiagnosticLocation::Symbol(
            raw.trim_matches('`').to_string(),
        ))
    }

    fn location_from_message(
        message: &str,
        category: ErrorCategory,
    ) -> Option<DiagnosticLocation> {
        if let Some(caps) = ARROW_LOCATION.captures(message) {
            return line_column(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()));
        }
        if let Some(caps) = LINE_WORD_LOCATION.captures(message) {
            return line_column(caps.get(1)?.as_str(), caps.get(2).map(|m| m.as_str()));
        }
        if let Some(caps) = GUTTER_LOCATION.captures(message) {
            return line_column(caps.get(1)?.as_str(), None);
        }
        if category.is_witness_related() {
            if let Some(caps) = QUOTED_WITNESS.captures(message) {
                return Some(DiagnosticLocation::Symbol(caps[1].to_string()));
            }
        }
        None
    }
}

fn line_column(line: &str, column: Option<&str>) -> Option<DiagnosticLocation> {
    let line = line.parse().ok()?;
    let column = column.and_then(|c| c.parse().ok()).unwrap_or(1);
    Some(DiagnosticLocation::LineColumn { line, column })
}
