//! `syntax-cleanup`: mechanical rewrites for common grammar failures

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static SINGLE_TUPLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"let\s+\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*,\s*\)\s*(:[^=;]*)?=").unwrap());

static MAIN_FN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfn\s+main\s*\(").unwrap());

static EXPECTED_SEMICOLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)expected\s+(`;`|;)").unwrap());

static UNCLOSED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(unterminated|unclosed|expected\s+(`\}`|\}))").unwrap());

/// Each rule that applies yields its own candidate, in rule order
pub struct SyntaxCleanup;

#[async_trait]
impl FixStrategy for SyntaxCleanup {
    fn id(&self) -> &str {
        "syntax-cleanup"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let message = ctx.diagnostic.message.to_lowercase();
        let mut candidates = Vec::new();
        let mut push = |source: Option<String>, rationale: &str| {
            if let Some(source) = source.filter(|s| s != ctx.source) {
                candidates.push(ctx.with_source("syntax-cleanup", source, rationale));
            }
        };

        if message.contains("expected eoi or item") {
            push(strip_line_comments(ctx.source), "remove `//` comment lines");
        }
        if message.contains("expected program") && !MAIN_FN.is_match(ctx.source) {
            push(Some(wrap_in_main(ctx.source)), "wrap statements in `fn main()`");
        }
        if SINGLE_TUPLE_PATTERN.is_match(ctx.source) {
            push(
                Some(
                    SINGLE_TUPLE_PATTERN
                        .replace_all(ctx.source, |caps: &regex::Captures| match caps.get(2) {
                            Some(ty) => format!("let {}{}=", &caps[1], ty.as_str()),
                            None => format!("let {} =", &caps[1]),
                        })
                        .into_owned(),
                ),
                "replace single-element tuple patterns with plain bindings",
            );
        }
        if UNCLOSED_BLOCK.is_match(&message) {
            push(close_blocks(ctx.source), "close unterminated blocks");
        }
        if EXPECTED_SEMICOLON.is_match(&message) {
            if let Some(line) = ctx.diagnostic.line() {
                push(terminate_line(ctx.source, line), "terminate statement with `;`");
            }
        }

        Ok(candidates)
    }
}

fn strip_line_comments(source: &str) -> Option<String> {
    let kept: Vec<&str> = source
        .split('\n')
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect();
    Some(kept.join("\n"))
}

fn wrap_in_main(source: &str) -> String {
    let body: Vec<String> = source
        .trim_end()
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                String::new()
            } else {
                format!("    {}", line)
            }
        })
        .collect();
    format!("fn main() {{\n{}\n}}\n", body.join("\n"))
}

fn close_blocks(source: &str) -> Option<String> {
    let opens = source.matches('{').count();
    let closes = source.matches('}').count();
    if opens <= closes {
        return None;
    }
    let mut fixed = source.trim_end().to_string();
    for _ in 0..(opens - closes) {
        fixed.push_str("\n}");
    }
    fixed.push('\n');
    Some(fixed)
}

/// Append `;` to 1-indexed `line` unless it already ends with one
fn terminate_line(source: &str, line: usize) -> Option<String> {
    let mut lines: Vec<String> = source.split('\n').map(str::to_string).collect();
    let target = lines.get_mut(line.checked_sub(1)?)?;
    let trimmed = target.trim_end();
    if trimmed.is_empty() || trimmed.ends_with(';') || trimmed.ends_with('{') {
        return None;
    }
    *target = format!("{};", trimmed);
    Some(lines.join("\n"))
}
