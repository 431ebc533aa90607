//! Witness strategies: `default-witness` and `pad-witness`

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use crate::witness::{default_value, witness_reads, witness_type, WitnessFile};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

/// Largest gap between expected and supplied witness counts worth padding
pub const MAX_PAD_SLOTS: usize = 256;

static WITNESS_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)expected\s+(\d+)\D*?(?:found|got|but|supplied|provided)\D*?(\d+)").unwrap()
});

fn parse_witness(ctx: &FixContext<'_>) -> Result<WitnessFile, StrategyError> {
    WitnessFile::parse(ctx.witness).map_err(|e| StrategyError::InvalidWitness(e.to_string()))
}

/// Add a default entry for `name`, typed after the declaration that reads it
fn synthesize(witness: &mut WitnessFile, source: &str, name: &str) {
    match witness_type(source, name) {
        Some(ty) => witness.insert(name, default_value(&ty), &ty),
        None => witness.set_value(name, default_value("")),
    }
}

/// Witness names the source reads that the witness file lacks
fn absent_reads(source: &str, witness: &WitnessFile) -> Vec<String> {
    witness_reads(source)
        .into_iter()
        .filter(|name| !witness.contains(name))
        .collect()
}

/// Synthesize default values for witnesses the program reads but nobody supplied
pub struct DefaultWitness;

#[async_trait]
impl FixStrategy for DefaultWitness {
    fn id(&self) -> &str {
        "default-witness"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let mut witness = parse_witness(ctx)?;

        let named = ctx
            .diagnostic
            .location
            .as_ref()
            .and_then(|l| l.symbol())
            .filter(|name| !witness.contains(name))
            .map(|name| vec![name.to_string()]);
        let missing = named.unwrap_or_else(|| absent_reads(ctx.source, &witness));
        if missing.is_empty() {
            return Ok(vec![]);
        }

        for name in &missing {
            synthesize(&mut witness, ctx.source, name);
        }

        Ok(vec![ctx.with_witness(
            self.id(),
            witness.render(),
            format!("default value for witness {}", missing.join(", ")),
        )])
    }
}

/// Append exactly one synthesized entry per missing witness slot
pub struct PadWitness;

#[async_trait]
impl FixStrategy for PadWitness {
    fn id(&self) -> &str {
        "pad-witness"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let mut witness = parse_witness(ctx)?;
        let absent = absent_reads(ctx.source, &witness);

        let slots = WITNESS_COUNTS
            .captures(&ctx.diagnostic.message)
            .and_then(|caps| {
                let expected: usize = caps[1].parse().ok()?;
                let found: usize = caps[2].parse().ok()?;
                Some(expected.saturating_sub(found))
            });
        if let Some(slots) = slots.filter(|&n| n > MAX_PAD_SLOTS) {
            tracing::debug!(slots, max = MAX_PAD_SLOTS, "witness count out of range, not padding");
            return Ok(vec![]);
        }

        let mut added: Vec<String> = Vec::new();
        let name_budget = slots.unwrap_or(absent.len());
        for name in absent.into_iter().take(name_budget) {
            synthesize(&mut witness, ctx.source, &name);
            added.push(name);
        }

        if let Some(slots) = slots {
            let mut k = 1;
            while added.len() < slots {
                let name = format!("placeholder_{}", k);
                k += 1;
                if witness.contains(&name) {
                    continue;
                }
                witness.set_value(&name, default_value(""));
                added.push(name);
            }
        }

        if added.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![ctx.with_witness(
            self.id(),
            witness.render(),
            format!("pad {} missing witness slot(s): {}", added.len(), added.join(", ")),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::error_parser::{Diagnostic, DiagnosticClassifier};
    use crate::feedback::session::ProgramState;

    const THREE_READS: &str = "fn main() {\n    let a: u32 = witness::A;\n    let b: u32 = witness::B;\n    let ok: bool = witness::OK;\n}\n";

    fn classify(message: &str) -> Diagnostic {
        DiagnosticClassifier::new().classify(message, None)
    }

    async fn generate(
        strategy: &dyn FixStrategy,
        witness: &str,
        diag: &Diagnostic,
    ) -> Result<Vec<Candidate>, StrategyError> {
        let state = ProgramState::new(THREE_READS, witness);
        strategy.generate(&FixContext::new(&state, diag)).await
    }

    #[tokio::test]
    async fn test_pad_appends_one_entry_per_missing_slot() {
        let witness = r#"{"A": {"value": "1", "type": "u32"}, "B": {"value": "2", "type": "u32"}}"#;
        let diag = classify("expected 3 witness values, found 2");
        let candidates = generate(&PadWitness, witness, &diag).await.unwrap();

        assert_eq!(candidates.len(), 1);
        let padded = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(padded.len(), 3);
        assert_eq!(padded.value_of("OK").as_deref(), Some("false"));
        assert_eq!(padded.value_of("A").as_deref(), Some("1"));
        assert_eq!(candidates[0].source(), THREE_READS);
    }

    #[tokio::test]
    async fn test_pad_uses_placeholders_for_unnamed_slots() {
        let source = "fn main() {\n    let a: u32 = witness::A;\n}\n";
        let state = ProgramState::new(source, r#"{"A": {"value": "1", "type": "u32"}}"#);
        let diag = classify("expected 3 witness values, found 1");
        let candidates = PadWitness
            .generate(&FixContext::new(&state, &diag))
            .await
            .unwrap();

        let padded = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(padded.names(), vec!["A", "placeholder_1", "placeholder_2"]);
    }

    #[tokio::test]
    async fn test_pad_caps_additions_to_stated_count() {
        let diag = classify("expected 3 witness values, found 2");
        let witness = r#"{"X": {"value": "1", "type": "u32"}, "Y": {"value": "2", "type": "u32"}}"#;
        let candidates = generate(&PadWitness, witness, &diag).await.unwrap();
        let padded = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(padded.len(), 3);
        assert!(padded.contains("A"));
    }

    #[tokio::test]
    async fn test_pad_ignores_absurd_slot_count() {
        let source = "fn main() {\n    let a: u32 = witness::A;\n}\n";
        let state = ProgramState::new(source, "");
        let diag = classify("expected 2000000 witness values, found 0");
        let candidates = PadWitness
            .generate(&FixContext::new(&state, &diag))
            .await
            .unwrap();
        assert!(candidates.is_empty());

        let diag = classify(&format!("expected {} witness values, found 0", usize::MAX));
        let candidates = PadWitness
            .generate(&FixContext::new(&state, &diag))
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_pad_accepts_count_at_limit() {
        let state = ProgramState::new("fn main() {}\n", "");
        let diag = classify(&format!("expected {} witness values, found 0", MAX_PAD_SLOTS));
        let candidates = PadWitness
            .generate(&FixContext::new(&state, &diag))
            .await
            .unwrap();
        let padded = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(padded.len(), MAX_PAD_SLOTS);
    }

    #[tokio::test]
    async fn test_default_witness_from_empty_text() {
        let diag = classify("witness data is empty");
        let candidates = generate(&DefaultWitness, "", &diag).await.unwrap();

        let filled = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(filled.names(), vec!["A", "B", "OK"]);
        assert_eq!(filled.value_of("B").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_default_witness_targets_named_witness() {
        let diag = classify("Witness `B` is missing");
        let candidates = generate(&DefaultWitness, "", &diag).await.unwrap();
        let filled = WitnessFile::parse(candidates[0].witness()).unwrap();
        assert_eq!(filled.names(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_nothing_missing_yields_nothing() {
        let witness = r#"{"A": {"value": "1"}, "B": {"value": "2"}, "OK": {"value": "true"}}"#;
        let diag = classify("witness data is empty");
        assert!(generate(&DefaultWitness, witness, &diag).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_witness_is_strategy_error() {
        let diag = classify("witness data is empty");
        let err = generate(&DefaultWitness, "not json", &diag).await.unwrap_err();
        assert!(matches!(err, StrategyError::InvalidWitness(_)));
    }
}
