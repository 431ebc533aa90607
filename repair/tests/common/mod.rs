//! Shared fixtures for integration tests: an in-process toy compiler that
//! understands enough SimplicityHL to produce realistic diagnostics, and
//! backends that fail at the transport level.

#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use simf_repair::feedback::{BackendError, RawCompileOutput, RawDiagnostic};
use simf_repair::witness::{witness_reads, WitnessFile};
use simf_repair::{CompileClient, CompileRequest, CompilerBackend};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"let\s+([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([^=;]+?)\s*=\s*(.+?)\s*;").unwrap()
});

static JET_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"jet::[A-Za-z0-9_]+?_(\d+)\(([^()]*)\)").unwrap());

static EQ_ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"assert!\(\s*jet::eq_\d+\(\s*([^,()]+?)\s*,\s*([^,()]+?)\s*\)\s*\)").unwrap()
});

static UNSIGNED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^u(\d+)$").unwrap());

pub const MIXED_WIDTHS: &str = "fn main() {\n    let a: u32 = 5;\n    let b: u64 = 7;\n    let c: u64 = jet::add_64(a, b);\n}\n";

pub const LITERAL_ASSERTION: &str = "fn main() {\n    assert!(jet::eq_32(10, 20));\n}\n";

pub const WITNESS_ASSERTION: &str =
    "fn main() {\n    let x: u32 = witness::X;\n    assert!(jet::eq_32(x, 20));\n}\n";

pub const VALID: &str = "fn main() {\n    let a: u32 = 1;\n    let b: u32 = jet::add_32(a, a);\n}\n";

/// Type-checks jet operands, counts witness values and evaluates `eq` assertions
#[derive(Default)]
pub struct ToyCompiler {
    calls: AtomicUsize,
    delay: Duration,
}

impl ToyCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every compile takes `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompilerBackend for ToyCompiler {
    fn name(&self) -> &str {
        "toy"
    }

    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(match check(request.source(), request.witness()) {
            Ok(()) => RawCompileOutput::Accepted {
                artifact: request.source().as_bytes().to_vec(),
            },
            Err(diagnostic) => RawCompileOutput::Rejected {
                diagnostics: vec![diagnostic],
            },
        })
    }
}

/// First problem found, in the order a real front end would report them
pub fn check(source: &str, witness_text: &str) -> Result<(), RawDiagnostic> {
    if source.matches('{').count() != source.matches('}').count() {
        return Err(RawDiagnostic::new(
            "syntax error: unclosed delimiter at end of input",
        ));
    }
    for (index, line) in source.lines().enumerate() {
        if let Some(col) = line.find("todo!") {
            return Err(RawDiagnostic::at(
                "unsupported expression `todo!`",
                format!("{}:{}", index + 1, col + 1),
            ));
        }
    }

    let witness = WitnessFile::parse(witness_text)
        .map_err(|e| RawDiagnostic::new(format!("malformed witness file: {}", e)))?;
    let reads = witness_reads(source);
    if !reads.is_empty() && witness_text.trim().is_empty() {
        return Err(RawDiagnostic::new("witness data is empty"));
    }
    let supplied = reads.iter().filter(|name| witness.contains(name)).count();
    if supplied < reads.len() {
        return Err(RawDiagnostic::new(format!(
            "expected {} witness values, found {}",
            reads.len(),
            supplied
        )));
    }

    let declarations: HashMap<String, (String, String)> = DECLARATION
        .captures_iter(source)
        .map(|caps| {
            (
                caps[1].to_string(),
                (caps[2].trim().to_string(), caps[3].trim().to_string()),
            )
        })
        .collect();

    for (index, line) in source.lines().enumerate() {
        for caps in JET_CALL.captures_iter(line) {
            let width: u32 = caps[1].parse().unwrap_or(0);
            let args = caps.get(2).unwrap();
            let mut offset = args.start();
            for arg in args.as_str().split(',') {
                let name = arg.trim();
                let col = offset + (arg.len() - arg.trim_start().len()) + 1;
                offset += arg.len() + 1;
                let Some((ty, _)) = declarations.get(name) else {
                    continue;
                };
                let Some(found) = UNSIGNED
                    .captures(ty)
                    .and_then(|c| c[1].parse::<u32>().ok())
                else {
                    continue;
                };
                if found != width {
                    return Err(RawDiagnostic::at(
                        format!(
                            "Expected expression of type `u{}`, found type `u{}`",
                            width, found
                        ),
                        format!("{}:{}", index + 1, col),
                    ));
                }
            }
        }
    }

    for (index, line) in source.lines().enumerate() {
        let Some(caps) = EQ_ASSERTION.captures(line) else {
            continue;
        };
        let left = evaluate(&caps[1], &declarations, &witness, 0);
        let right = evaluate(&caps[2], &declarations, &witness, 0);
        if let (Some(left), Some(right)) = (left, right) {
            if left != right {
                let col = line.find("assert!").unwrap_or(0) + 1;
                return Err(RawDiagnostic::at(
                    "Assertion failed: jet::eq evaluated to false",
                    format!("{}:{}", index + 1, col),
                ));
            }
        }
    }

    Ok(())
}

fn evaluate(
    expr: &str,
    declarations: &HashMap<String, (String, String)>,
    witness: &WitnessFile,
    depth: usize,
) -> Option<u128> {
    let expr = expr.trim();
    if depth > 8 {
        return None;
    }
    if let Some(hex) = expr.strip_prefix("0x") {
        return u128::from_str_radix(hex, 16).ok();
    }
    if let Ok(n) = expr.parse::<u128>() {
        return Some(n);
    }
    if let Some(name) = expr.strip_prefix("witness::") {
        let value = witness.value_of(name)?;
        return evaluate(&value, &HashMap::new(), witness, depth + 1);
    }
    let (_, bound) = declarations.get(expr)?;
    evaluate(bound, declarations, witness, depth + 1)
}

/// Every call fails before reaching a compiler
#[derive(Default)]
pub struct FailingBackend {
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompilerBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Http("connection refused".into()))
    }
}

/// Fails the first `failures` calls, then behaves like [`ToyCompiler`]
pub struct FlakyBackend {
    failures: usize,
    calls: AtomicUsize,
    inner: ToyCompiler,
}

impl FlakyBackend {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            inner: ToyCompiler::new(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompilerBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(BackendError::Http("503 service unavailable".into()));
        }
        self.inner.run(request).await
    }
}

/// Rejects with `message` unless the source contains `marker`
pub struct Rejecting {
    message: String,
    marker: Option<String>,
}

impl Rejecting {
    pub fn always(message: &str) -> Self {
        Self {
            message: message.to_string(),
            marker: None,
        }
    }

    pub fn unless(message: &str, marker: &str) -> Self {
        Self {
            message: message.to_string(),
            marker: Some(marker.to_string()),
        }
    }
}

#[async_trait]
impl CompilerBackend for Rejecting {
    fn name(&self) -> &str {
        "rejecting"
    }

    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        match &self.marker {
            Some(marker) if request.source().contains(marker.as_str()) => {
                Ok(RawCompileOutput::Accepted { artifact: vec![] })
            }
            _ => Ok(RawCompileOutput::Rejected {
                diagnostics: vec![RawDiagnostic::new(self.message.clone())],
            }),
        }
    }
}

pub fn client(backend: Arc<dyn CompilerBackend>) -> Arc<CompileClient> {
    Arc::new(CompileClient::new(backend, Duration::from_secs(5)))
}
