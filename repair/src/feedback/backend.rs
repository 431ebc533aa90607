//! Compiler backends
//!
//! [`ProcessBackend`] runs a local SimplicityHL compiler binary against scratch
//! files; [`HttpBackend`] posts the program to a remote compile service.

use crate::feedback::compiler::{
    BackendError, CompileRequest, CompilerBackend, RawCompileOutput, RawDiagnostic,
};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static ARROW_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-->\s*(?:[^\s:]+:)?(\d+:\d+)").unwrap());

/// Runs a compiler binary once per request.
///
/// The command line is a template: `{source}` and `{witness}` are replaced by
/// paths of scratch files written into a fresh temporary directory.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-style command line, e.g. `simc {source} {witness}`
    pub fn from_command_line(command: &str) -> Result<Self, BackendError> {
        let mut words = shlex::split(command)
            .ok_or_else(|| BackendError::Malformed(format!("unbalanced quotes in `{}`", command)))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| BackendError::Malformed("empty compiler command".into()))?;
        Ok(Self::new(program, words.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn render_args(&self, source_path: &str, witness_path: Option<&str>) -> Vec<String> {
        self.args
            .iter()
            .filter_map(|arg| {
                if arg.contains("{witness}") {
                    let witness_path = witness_path?;
                    Some(
                        arg.replace("{witness}", witness_path)
                            .replace("{source}", source_path),
                    )
                } else {
                    Some(arg.replace("{source}", source_path))
                }
            })
            .collect()
    }
}

#[async_trait]
impl CompilerBackend for ProcessBackend {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        let scratch = tempfile::tempdir()?;
        let source_path = scratch.path().join("source.simf");
        tokio::fs::write(&source_path, request.source()).await?;

        let witness_path = if request.has_witness() {
            let path = scratch.path().join("witness.wit");
            tokio::fs::write(&path, request.witness()).await?;
            Some(path)
        } else {
            None
        };

        let source_arg = source_path.to_string_lossy();
        let witness_arg = witness_path.as_ref().map(|p| p.to_string_lossy());
        let args = self.render_args(&source_arg, witness_arg.as_deref());

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .current_dir(scratch.path())
            .kill_on_drop(true);

        // Own process group so a timed-out compiler takes its children with it
        #[cfg(unix)]
        cmd.process_group(0);

        let output = cmd.output().await.map_err(|source| BackendError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::trace!(
            program = %self.program,
            exit_code = ?output.status.code(),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "compiler process exited"
        );

        Ok(parse_process_output(output.status.success(), &stdout, &stderr))
    }
}

/// Interpret the output of a compiler process.
///
/// A JSON object on stdout wins over the exit status: its `success` flag (or
/// `status == "success"`) decides, and `error`/`errors`/`message` carry the
/// diagnostics. Otherwise the exit status decides and stderr (or stdout when
/// stderr is empty) is split into diagnostics.
pub fn parse_process_output(exit_ok: bool, stdout: &str, stderr: &str) -> RawCompileOutput {
    if let Ok(Value::Object(report)) = serde_json::from_str::<Value>(stdout.trim()) {
        let accepted = report
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || report.get("status").and_then(Value::as_str) == Some("success");

        if accepted {
            let artifact = ["program", "artifact", "result"]
                .iter()
                .find_map(|key| report.get(*key).and_then(Value::as_str))
                .unwrap_or_else(|| stdout.trim());
            return RawCompileOutput::Accepted {
                artifact: artifact.as_bytes().to_vec(),
            };
        }

        let mut diagnostics = Vec::new();
        for key in ["error", "errors", "message"] {
            if let Some(value) = report.get(key) {
                collect_json_diagnostics(value, &mut diagnostics);
            }
            if !diagnostics.is_empty() {
                break;
            }
        }
        return RawCompileOutput::Rejected { diagnostics };
    }

    if exit_ok {
        return RawCompileOutput::Accepted {
            artifact: stdout.trim().as_bytes().to_vec(),
        };
    }

    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    RawCompileOutput::Rejected {
        diagnostics: split_text_diagnostics(text),
    }
}

fn collect_json_diagnostics(value: &Value, out: &mut Vec<RawDiagnostic>) {
    match value {
        Value::String(text) if !text.trim().is_empty() => {
            out.extend(split_text_diagnostics(text));
        }
        Value::Array(items) => {
            for item in items {
                collect_json_diagnostics(item, out);
            }
        }
        Value::Object(fields) => {
            if let Some(message) = fields.get("message").and_then(Value::as_str) {
                let location = fields.get("location").and_then(|l| match l {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                out.push(RawDiagnostic {
                    message: message.to_string(),
                    location,
                });
            }
        }
        _ => {}
    }
}

/// Split rendered compiler text into diagnostics.
///
/// A line starting with `error` opens a new diagnostic and a blank line closes
/// one; `--> line:col` becomes the location of the diagnostic it belongs to.
fn split_text_diagnostics(text: &str) -> Vec<RawDiagnostic> {
    let mut diagnostics = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut location: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_diagnostic(&mut lines, &mut location, &mut diagnostics);
            continue;
        }
        if line.trim_start().to_lowercase().starts_with("error") && !lines.is_empty() {
            flush_diagnostic(&mut lines, &mut location, &mut diagnostics);
        }
        if let Some(caps) = ARROW_LINE.captures(line) {
            if location.is_none() {
                location = Some(caps[1].to_string());
            }
        }
        lines.push(line);
    }
    flush_diagnostic(&mut lines, &mut location, &mut diagnostics);

    diagnostics
}

fn flush_diagnostic(
    lines: &mut Vec<&str>,
    location: &mut Option<String>,
    out: &mut Vec<RawDiagnostic>,
) {
    if !lines.is_empty() {
        out.push(RawDiagnostic {
            message: lines.join("\n").trim_end().to_string(),
            location: location.take(),
        });
    }
    lines.clear();
    *location = None;
}

#[derive(Serialize)]
struct CompileServiceRequest<'a> {
    source: &'a str,
    witness: &'a str,
}

#[derive(Deserialize)]
struct CompileServiceResponse {
    success: bool,
    #[serde(default)]
    artifact: Option<String>,
    #[serde(default)]
    diagnostics: Vec<RawDiagnostic>,
    #[serde(default)]
    error: Option<String>,
}

/// Posts programs to a remote compile service
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CompilerBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.url
    }

    async fn run(&self, request: &CompileRequest) -> Result<RawCompileOutput, BackendError> {
        let body = CompileServiceRequest {
            source: request.source(),
            witness: request.witness(),
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Http(e.to_string()))?;
        parse_service_response(status, &body)
    }
}

/// Turn a compile service reply into compiler output.
///
/// Non-2xx replies are `Status` faults and unparseable bodies are `Malformed`.
/// A rejection with no diagnostics falls back to the `error` field.
pub fn parse_service_response(status: u16, body: &str) -> Result<RawCompileOutput, BackendError> {
    if !(200..300).contains(&status) {
        return Err(BackendError::Status {
            status,
            body: body.to_string(),
        });
    }

    let parsed: CompileServiceResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;

    if parsed.success {
        return Ok(RawCompileOutput::Accepted {
            artifact: parsed.artifact.unwrap_or_default().into_bytes(),
        });
    }

    let mut diagnostics = parsed.diagnostics;
    if diagnostics.is_empty() {
        if let Some(error) = parsed.error.filter(|e| !e.trim().is_empty()) {
            diagnostics.push(RawDiagnostic::new(error));
        }
    }
    Ok(RawCompileOutput::Rejected { diagnostics })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_runner_success() {
        let out = parse_process_output(
            true,
            r#"{"status": "success", "program": "4jSQ"}"#,
            "",
        );
        assert_eq!(
            out,
            RawCompileOutput::Accepted {
                artifact: b"4jSQ".to_vec()
            }
        );
    }

    #[test]
    fn test_json_runner_failure_ignores_exit_status() {
        let out = parse_process_output(
            true,
            r#"{"success": false, "error": "Assertion failed"}"#,
            "",
        );
        match out {
            RawCompileOutput::Rejected { diagnostics } => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(diagnostics[0].message, "Assertion failed");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_json_errors_array_of_objects() {
        let out = parse_process_output(
            false,
            r#"{"success": false, "errors": [{"message": "unexpected token", "location": "2:4"}, "Assertion failed"]}"#,
            "",
        );
        let RawCompileOutput::Rejected { diagnostics } = out else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].location.as_deref(), Some("2:4"));
        assert_eq!(diagnostics[1].location, None);
    }

    #[test]
    fn test_rendered_stderr_folds_arrow_into_location() {
        let stderr = " --> 1:1\n  |\n1 | // add two numbers\n  | ^---\n  |\n  = expected EOI or item\n";
        let RawCompileOutput::Rejected { diagnostics } = parse_process_output(false, "", stderr)
        else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.as_deref(), Some("1:1"));
        assert!(diagnostics[0].message.contains("expected EOI or item"));
    }

    #[test]
    fn test_error_lines_start_new_diagnostics() {
        let stderr = "error: Assertion failed\n --> 4:5\nerror: unexpected token\n";
        let RawCompileOutput::Rejected { diagnostics } = parse_process_output(false, "", stderr)
        else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].location.as_deref(), Some("4:5"));
        assert_eq!(diagnostics[1].message, "error: unexpected token");
    }

    #[test]
    fn test_plain_exit_status_decides_without_json() {
        assert!(matches!(
            parse_process_output(true, "compiled", ""),
            RawCompileOutput::Accepted { .. }
        ));
        let RawCompileOutput::Rejected { diagnostics } =
            parse_process_output(false, "fallback text", "")
        else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics[0].message, "fallback text");
    }

    #[test]
    fn test_service_non_2xx_is_status_fault() {
        let err = parse_service_response(503, "overloaded").unwrap_err();
        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected status fault, got {:?}", other),
        }
    }

    #[test]
    fn test_service_garbage_body_is_malformed() {
        let err = parse_service_response(200, "<html>gateway</html>").unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn test_service_success_carries_artifact() {
        let out = parse_service_response(200, r#"{"success": true, "artifact": "4jSQ"}"#).unwrap();
        assert_eq!(
            out,
            RawCompileOutput::Accepted {
                artifact: b"4jSQ".to_vec()
            }
        );
    }

    #[test]
    fn test_service_error_field_used_without_diagnostics() {
        let out = parse_service_response(
            200,
            r#"{"success": false, "diagnostics": [], "error": "Assertion failed"}"#,
        )
        .unwrap();
        let RawCompileOutput::Rejected { diagnostics } = out else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "Assertion failed");
    }

    #[test]
    fn test_service_diagnostics_win_over_error_field() {
        let out = parse_service_response(
            200,
            r#"{"success": false, "diagnostics": [{"message": "mismatched types", "location": "3:9"}], "error": "ignored"}"#,
        )
        .unwrap();
        let RawCompileOutput::Rejected { diagnostics } = out else {
            panic!("expected rejection");
        };
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.as_deref(), Some("3:9"));
    }

    #[test]
    fn test_witness_args_dropped_without_witness() {
        let backend = ProcessBackend::from_command_line("simc {source} --witness={witness}").unwrap();
        assert_eq!(backend.program(), "simc");
        assert_eq!(backend.render_args("/t/s.simf", None), vec!["/t/s.simf"]);
        assert_eq!(
            backend.render_args("/t/s.simf", Some("/t/w.wit")),
            vec!["/t/s.simf", "--witness=/t/w.wit"]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(ProcessBackend::from_command_line("   ").is_err());
        assert!(ProcessBackend::from_command_line("simc 'unterminated").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_backend_runs_command() {
        let backend = ProcessBackend::new("cat".to_string(), vec!["{source}".into()]);
        let out = backend
            .run(&CompileRequest::new("let a: u8 = 1;", ""))
            .await
            .unwrap();
        assert_eq!(
            out,
            RawCompileOutput::Accepted {
                artifact: b"let a: u8 = 1;".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let backend = ProcessBackend::new("simf-no-such-compiler-binary", vec![]);
        let err = backend
            .run(&CompileRequest::new("x", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }
}
