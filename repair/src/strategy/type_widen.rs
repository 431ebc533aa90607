//! `widen-operand`: resolve a width mismatch between two operands

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use crate::witness::{unsigned_width, WitnessFile};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

const ID: &str = "widen-operand";

static DIRECTED_TYPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)expected\s+(?:an?\s+)?(?:expression\s+of\s+)?(?:type\s+)?`([^`]+)`\s*,?\s*(?:but\s+)?found\s+(?:type\s+)?`([^`]+)`",
    )
    .unwrap()
});

static UNDIRECTED_TYPES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`\s+and\s+`([^`]+)`").unwrap());

static DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"let\s+(?:mut\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([^=;]+?)\s*=").unwrap()
});

static WITNESS_BINDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\s*witness::([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap());

static JET_WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(jet::[A-Za-z0-9_]*?_)(\d+)\b").unwrap());

/// Types named by a mismatch diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypePair {
    expected: String,
    found: String,
    directed: bool,
}

fn type_pair(message: &str) -> Option<TypePair> {
    if let Some(caps) = DIRECTED_TYPES.captures(message) {
        return Some(TypePair {
            expected: caps[1].trim().to_string(),
            found: caps[2].trim().to_string(),
            directed: true,
        });
    }
    UNDIRECTED_TYPES.captures(message).map(|caps| TypePair {
        expected: caps[1].trim().to_string(),
        found: caps[2].trim().to_string(),
        directed: false,
    })
}

/// Retype declarations to make both operands of an operation the same width.
///
/// Candidates, best first: widen the declaration on the offending line, widen
/// the narrower declarations feeding it, widen the jets on it, and finally
/// narrow the wider side instead.
pub struct WidenOperand;

#[async_trait]
impl FixStrategy for WidenOperand {
    fn id(&self) -> &str {
        ID
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let Some(pair) = type_pair(&ctx.diagnostic.message) else {
            return Ok(vec![]);
        };
        let lines = offending_lines(ctx);
        if lines.is_empty() {
            return Ok(vec![]);
        }

        let (Some(expected_width), Some(found_width)) =
            (unsigned_width(&pair.expected), unsigned_width(&pair.found))
        else {
            return Ok(retype_to_expected(ctx, &pair, &lines).into_iter().collect());
        };
        if expected_width == found_width {
            return Ok(vec![]);
        }

        let (wide, narrow) = if expected_width > found_width {
            (pair.expected.as_str(), pair.found.as_str())
        } else {
            (pair.found.as_str(), pair.expected.as_str())
        };
        let wide_width = expected_width.max(found_width);
        let narrow_width = expected_width.min(found_width);

        let mut candidates = Vec::new();

        // (1) the declaration on the offending line itself
        let mut rewrite = Rewrite::new(ctx);
        for &line in &lines {
            if let Some((name, ty)) = declaration_on_line(ctx.source, line) {
                if ty == narrow {
                    rewrite.retype(&name, wide);
                }
            }
        }
        candidates.extend(rewrite.finish(
            ctx,
            format!("widen the declaration on the offending line from {} to {}", narrow, wide),
        ));

        // (2) narrower declarations used on the offending line
        let mut rewrite = Rewrite::new(ctx);
        for name in operands(ctx.source, &lines) {
            if declared_type(ctx.source, &name).as_deref() == Some(narrow) {
                rewrite.retype(&name, wide);
            }
        }
        candidates.extend(rewrite.finish(
            ctx,
            format!("widen {} operands to {}", narrow, wide),
        ));

        // (3) jets on the offending line
        let mut rewrite = Rewrite::new(ctx);
        rewrite.jets_on(&lines, wide_width);
        candidates.extend(rewrite.finish(
            ctx,
            format!("use the {}-bit jet variant", wide_width),
        ));

        // (4) narrow the wider side instead
        let mut rewrite = Rewrite::new(ctx);
        for name in operands(ctx.source, &lines) {
            if declared_type(ctx.source, &name).as_deref() == Some(wide) {
                rewrite.retype(&name, narrow);
            }
        }
        for &line in &lines {
            if let Some((name, ty)) = declaration_on_line(ctx.source, line) {
                if ty == wide {
                    rewrite.retype(&name, narrow);
                }
            }
        }
        rewrite.jets_on(&lines, narrow_width);
        candidates.extend(rewrite.finish(
            ctx,
            format!("narrow {} values to {}", wide, narrow),
        ));

        Ok(candidates)
    }
}

/// Non-integer pair: give the offending declaration the expected type
fn retype_to_expected(ctx: &FixContext<'_>, pair: &TypePair, lines: &[usize]) -> Option<Candidate> {
    if !pair.directed {
        return None;
    }
    let mut rewrite = Rewrite::new(ctx);
    for &line in lines {
        if let Some((name, ty)) = declaration_on_line(ctx.source, line) {
            if ty == pair.found {
                rewrite.retype(&name, &pair.expected);
            }
        }
    }
    rewrite.finish(
        ctx,
        format!("declare as {} instead of {}", pair.expected, pair.found),
    )
}

/// 0-indexed lines the diagnostic points at; every jet line when it points nowhere
fn offending_lines(ctx: &FixContext<'_>) -> Vec<usize> {
    let total = ctx.source.lines().count();
    if let Some(line) = ctx.diagnostic.line() {
        return if line >= 1 && line <= total {
            vec![line - 1]
        } else {
            vec![]
        };
    }
    if let Some(symbol) = ctx.diagnostic.location.as_ref().and_then(|l| l.symbol()) {
        return ctx
            .source
            .lines()
            .position(|l| declaration_name(l).as_deref() == Some(symbol))
            .into_iter()
            .collect();
    }
    ctx.source
        .lines()
        .enumerate()
        .filter(|(_, l)| l.contains("jet::"))
        .map(|(i, _)| i)
        .collect()
}

fn declaration_name(line: &str) -> Option<String> {
    DECLARATION.captures(line).map(|caps| caps[1].to_string())
}

fn declaration_on_line(source: &str, line: usize) -> Option<(String, String)> {
    let text = source.lines().nth(line)?;
    DECLARATION
        .captures(text)
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
}

fn declared_type(source: &str, name: &str) -> Option<String> {
    DECLARATION
        .captures_iter(source)
        .find(|caps| &caps[1] == name)
        .map(|caps| caps[2].trim().to_string())
}

/// Identifiers used on the right-hand side of the given lines
fn operands(source: &str, lines: &[usize]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for &line in lines {
        let Some(text) = source.lines().nth(line) else {
            continue;
        };
        let rhs = match DECLARATION.find(text) {
            Some(m) => &text[m.end()..],
            None => text,
        };
        let without_jets = JET_WIDTH.replace_all(rhs, "");
        for m in IDENTIFIER.find_iter(&without_jets) {
            let name = m.as_str();
            if matches!(name, "jet" | "witness" | "assert" | "let" | "true" | "false") {
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Accumulates edits to one candidate, source and witness together
struct Rewrite {
    lines: Vec<String>,
    witness: Option<WitnessFile>,
    witness_changed: bool,
}

impl Rewrite {
    fn new(ctx: &FixContext<'_>) -> Self {
        Self {
            lines: ctx.source.split('\n').map(str::to_string).collect(),
            witness: WitnessFile::parse(ctx.witness).ok(),
            witness_changed: false,
        }
    }

    fn retype(&mut self, name: &str, ty: &str) {
        let pattern = format!(
            r"(let\s+(?:mut\s+)?{}\s*:\s*)([^=;]+?)(\s*=)",
            regex::escape(name)
        );
        let Ok(re) = Regex::new(&pattern) else {
            return;
        };
        for line in self.lines.iter_mut() {
            if !re.is_match(line.as_str()) {
                continue;
            }
            let replaced = re
                .replace(line.as_str(), |caps: &regex::Captures| {
                    format!("{}{}{}", &caps[1], ty, &caps[3])
                })
                .into_owned();

            if let Some(witness) = self.witness.as_mut() {
                if let Some(caps) = WITNESS_BINDING.captures(&replaced) {
                    if witness.set_type(&caps[1], ty) {
                        self.witness_changed = true;
                    }
                }
            }
            *line = replaced;
        }
    }

    fn jets_on(&mut self, lines: &[usize], width: u32) {
        for &line in lines {
            if let Some(text) = self.lines.get_mut(line) {
                *text = JET_WIDTH
                    .replace_all(text.as_str(), |caps: &regex::Captures| format!("{}{}", &caps[1], width))
                    .into_owned();
            }
        }
    }

    /// Candidate when anything changed
    fn finish(self, ctx: &FixContext<'_>, rationale: String) -> Option<Candidate> {
        let source = self.lines.join("\n");
        let witness = match (&self.witness, self.witness_changed) {
            (Some(w), true) => w.render(),
            _ => ctx.witness.to_string(),
        };
        if source == ctx.source && witness == ctx.witness {
            return None;
        }
        Some(Candidate::new(
            crate::feedback::session::ProgramState::new(source, witness),
            ID,
            Some(rationale),
        ))
    }
}
