//! `relax-assertion`: satisfy a failed equality assertion through the witness
//!
//! Assertion failures are usually semantic. The only rewrite considered safe is
//! the one that leaves the program untouched: when an `eq` assertion compares a
//! literal with a witness-supplied value, the witness is set to the literal.
//! Everything else yields no candidate.

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use crate::witness::WitnessFile;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static EQ_ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"assert!\s*\(\s*jet::eq_(\d+)\s*\(\s*([^,()]+?)\s*,\s*([^,()]+?)\s*\)\s*\)").unwrap()
});

static LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+|0x[0-9A-Fa-f]+|0b[01]+|true|false)$").unwrap());

static WITNESS_OPERAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^witness::([A-Za-z_][A-Za-z0-9_]*)$").unwrap());

#[derive(Debug, PartialEq, Eq)]
enum Operand {
    Literal(String),
    Witness(String),
    Other,
}

fn operand(source: &str, text: &str) -> Operand {
    let text = text.trim();
    if LITERAL.is_match(text) {
        return Operand::Literal(text.to_string());
    }
    if let Some(caps) = WITNESS_OPERAND.captures(text) {
        return Operand::Witness(caps[1].to_string());
    }
    // A local bound straight to a witness read
    let binding = format!(
        r"let\s+(?:mut\s+)?{}\s*(?::[^=;]+)?=\s*witness::([A-Za-z_][A-Za-z0-9_]*)\s*;",
        regex::escape(text)
    );
    match Regex::new(&binding).ok().and_then(|re| re.captures(source)) {
        Some(caps) => Operand::Witness(caps[1].to_string()),
        None => Operand::Other,
    }
}

/// The failing `(left, right)` operands: on the reported line, or the only
/// equality assertion when the diagnostic has no line
fn failing_assertion(ctx: &FixContext<'_>) -> Option<(String, String)> {
    let capture = |text: &str| {
        EQ_ASSERTION
            .captures(text)
            .map(|caps| (caps[2].to_string(), caps[3].to_string()))
    };

    if let Some(line) = ctx.diagnostic.line() {
        let text = ctx.source.lines().nth(line.checked_sub(1)?)?;
        if let Some(found) = capture(text) {
            return Some(found);
        }
    }

    let mut all = EQ_ASSERTION.captures_iter(ctx.source);
    let only = all.next()?;
    if all.next().is_some() {
        return None;
    }
    Some((only[2].to_string(), only[3].to_string()))
}

pub struct RelaxAssertion;

#[async_trait]
impl FixStrategy for RelaxAssertion {
    fn id(&self) -> &str {
        "relax-assertion"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let Some((left, right)) = failing_assertion(ctx) else {
            return Ok(vec![]);
        };

        let (name, literal) = match (operand(ctx.source, &left), operand(ctx.source, &right)) {
            (Operand::Witness(name), Operand::Literal(lit))
            | (Operand::Literal(lit), Operand::Witness(name)) => (name, lit),
            _ => return Ok(vec![]),
        };

        let mut witness = WitnessFile::parse(ctx.witness)
            .map_err(|e| StrategyError::InvalidWitness(e.to_string()))?;
        if witness.value_of(&name).as_deref() == Some(literal.as_str()) {
            return Ok(vec![]);
        }
        witness.set_value(&name, &literal);

        Ok(vec![ctx.with_witness(
            self.id(),
            witness.render(),
            format!("set witness {} to {} to satisfy the assertion", name, literal),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::error_parser::DiagnosticClassifier;
    use crate::feedback::session::ProgramState;

    async fn generate(source: &str, witness: &str, location: Option<&str>) -> Vec<Candidate> {
        let diag = DiagnosticClassifier::new().classify("Assertion failed", location);
        let state = ProgramState::new(source, witness);
        RelaxAssertion
            .generate(&FixContext::new(&state, &diag))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_two_literals_have_no_safe_fix() {
        let source = "fn main() {\n    assert!(jet::eq_32(10, 20));\n}\n";
        assert!(generate(source, "", Some("2:5")).await.is_empty());
    }

    #[tokio::test]
    async fn test_witness_bound_operand_takes_literal() {
        let source = "fn main() {\n    let x: u32 = witness::X;\n    assert!(jet::eq_32(x, 20));\n}\n";
        let witness = r#"{"X": {"value": "10", "type": "u32"}}"#;
        let candidates = generate(source, witness, Some("3:5")).await;

        assert_eq!(candidates.len(), 1);
        let fixed = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(fixed.value_of("X").as_deref(), Some("20"));
        assert_eq!(candidates[0].source(), source);
    }

    #[tokio::test]
    async fn test_direct_witness_read_without_line() {
        let source = "fn main() {\n    assert!(jet::eq_8(0x2a, witness::Y));\n}\n";
        let candidates = generate(source, "", None).await;
        let fixed = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(fixed.value_of("Y").as_deref(), Some("0x2a"));
    }

    #[tokio::test]
    async fn test_ambiguous_assertions_without_line() {
        let source = "fn main() {\n    assert!(jet::eq_8(1, witness::A));\n    assert!(jet::eq_8(2, witness::B));\n}\n";
        assert!(generate(source, "", None).await.is_empty());
    }
}
