//! `model`: ask a text-generation backend for a fixed program
//!
//! The reply is untrusted. It becomes one candidate that only recompilation
//! can vindicate.

use super::{Candidate, FixContext, FixStrategy, StrategyError};
use crate::config::ModelEndpoint;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an expert in SimplicityHL, a functional language for Bitcoin smart contracts. You repair programs that fail to compile and answer with JSON only.";

/// Text-generation boundary: one prompt in, one reply out
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, StrategyError>;
}

/// OpenAI-compatible `/v1/chat/completions` client
pub struct ChatCompletionsBackend {
    client: reqwest::Client,
    endpoint: ModelEndpoint,
}

impl ChatCompletionsBackend {
    pub fn new(endpoint: ModelEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ModelBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.endpoint.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, StrategyError> {
        let request_body = serde_json::json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": 2000,
            "temperature": 0.2
        });

        let response = self
            .client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| StrategyError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Api { status, body });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StrategyError::Unparsable(e.to_string()))?;

        resp_json["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| StrategyError::Unparsable("response has no message content".into()))
    }
}

/// Parsed model reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelFix {
    pub fixed_code: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Extract a fix from a model reply.
///
/// Accepts bare JSON, JSON inside a ```` ```json ```` fence or any fence, and a
/// fenced block holding the program itself.
pub fn parse_model_response(text: &str) -> Result<ModelFix, StrategyError> {
    let text = text.trim();
    let fix = if let Ok(fix) = serde_json::from_str::<ModelFix>(text) {
        fix
    } else if let Some(block) = fenced_block(text, "```json") {
        serde_json::from_str::<ModelFix>(block)
            .map_err(|e| StrategyError::Unparsable(format!("json block: {}", e)))?
    } else if let Some(block) = fenced_block(text, "```") {
        let body = strip_language_tag(block);
        match serde_json::from_str::<ModelFix>(body) {
            Ok(fix) => fix,
            Err(_) => ModelFix {
                fixed_code: body.to_string(),
                explanation: String::new(),
                confidence: 0.0,
            },
        }
    } else {
        return Err(StrategyError::Unparsable(
            "reply is neither JSON nor a fenced block".into(),
        ));
    };

    if fix.fixed_code.trim().is_empty() {
        return Err(StrategyError::Unparsable("empty fixed_code".into()));
    }
    Ok(fix)
}

fn fenced_block<'a>(text: &'a str, opening: &str) -> Option<&'a str> {
    let start = text.find(opening)? + opening.len();
    let end = text[start..].find("```")? + start;
    Some(text[start..end].trim())
}

/// Drop a leading `simf`/`rust`-style tag left on the fence line
fn strip_language_tag(block: &str) -> &str {
    match block.split_once('\n') {
        Some((first, rest))
            if !first.is_empty()
                && first.len() <= 16
                && first.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            rest.trim()
        }
        _ => block,
    }
}

/// Prompt with language hints, the diagnostic, the program and its witness
pub fn build_prompt(ctx: &FixContext<'_>) -> String {
    let mut prompt = String::from(
        "The following SimplicityHL program failed to compile.\n\n## Diagnostic\n\n```\n",
    );
    prompt.push_str(&ctx.diagnostic.format_for_prompt());
    prompt.push_str("\n```\n\n## Program\n\n```\n");
    prompt.push_str(ctx.source);
    prompt.push_str("\n```\n");

    if !ctx.witness.trim().is_empty() {
        prompt.push_str("\n## Witness data\n\n```json\n");
        prompt.push_str(ctx.witness);
        prompt.push_str("\n```\n");
    }

    prompt.push_str(
        r#"
## SimplicityHL rules

1. Declarations are typed: `let name: u32 = expression;`
2. Jets are called with an explicit width: `jet::add_32(a, b)`, `jet::eq_64(a, b)`
3. Operands of a jet must match its width
4. Witness values are read with `witness::NAME`
5. Assertions are written `assert!(condition);`
6. Programs start at `fn main() { ... }`

Fix the program without changing what it is meant to do. Respond with a JSON object:
{
    "fixed_code": "the corrected program",
    "explanation": "what was wrong and how you fixed it",
    "confidence": 0.0
}

Only respond with valid JSON, no other text."#,
    );
    prompt
}

/// Catch-all strategy backed by a [`ModelBackend`]
pub struct ModelStrategy {
    backend: Arc<dyn ModelBackend>,
    timeout: Duration,
}

impl ModelStrategy {
    pub fn new(backend: Arc<dyn ModelBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Strategy talking to `endpoint`
    pub fn from_endpoint(endpoint: ModelEndpoint, timeout: Duration) -> Self {
        Self::new(Arc::new(ChatCompletionsBackend::new(endpoint)), timeout)
    }
}

#[async_trait]
impl FixStrategy for ModelStrategy {
    fn id(&self) -> &str {
        "model"
    }

    async fn generate(&self, ctx: &FixContext<'_>) -> Result<Vec<Candidate>, StrategyError> {
        let prompt = build_prompt(ctx);
        tracing::debug!(
            backend = self.backend.name(),
            category = %ctx.category,
            prompt_len = prompt.len(),
            "requesting model fix"
        );

        let reply = tokio::time::timeout(self.timeout, self.backend.complete(&prompt))
            .await
            .map_err(|_| StrategyError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        let fix = parse_model_response(&reply)?;
        tracing::info!(
            backend = self.backend.name(),
            confidence = fix.confidence,
            "model proposed a fix"
        );

        let mut source = fix.fixed_code;
        if ctx.source.ends_with('\n') && !source.ends_with('\n') {
            source.push('\n');
        }
        let rationale = if fix.explanation.is_empty() {
            format!("model fix (confidence {:.2})", fix.confidence)
        } else {
            format!("{} (confidence {:.2})", fix.explanation, fix.confidence)
        };

        Ok(vec![ctx.with_source(self.id(), source, rationale)])
    }
}
