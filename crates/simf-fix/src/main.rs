//! Repair SimplicityHL programs that fail to compile
//!
//! # Usage
//!
//! ```bash
//! # Repair one file (witness defaults to contract.wit when present)
//! simf-fix repair contract.simf
//!
//! # Repair many files with four sessions in flight, model strategy enabled
//! SIMF_MODEL_API_KEY=... simf-fix batch --workers 4 --llm programs/*.simf
//!
//! # Compile once against a remote compile service
//! simf-fix --compiler-url http://localhost:8080/compile compile contract.simf
//!
//! # Show the last five compiler calls after the run
//! simf-fix --show-history 5 repair contract.simf
//! ```

mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Overrides;
use serde_json::Value;
use simf_repair::{read_input, BatchItem, CompileHistory, CompileResult, FileReport, Repairer};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Local compiler command line (`{source}` and `{witness}` are substituted)
    #[arg(long, global = true)]
    compiler: Option<String>,

    /// Remote compile service URL (takes precedence over --compiler)
    #[arg(long, global = true)]
    compiler_url: Option<String>,

    /// Directory for repaired files (default: next to each original)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Machine-readable output
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Print the newest compiler calls after the run (default 10)
    #[arg(
        long,
        global = true,
        value_name = "N",
        num_args = 0..=1,
        default_missing_value = "10"
    )]
    show_history: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repair one program
    Repair {
        file: PathBuf,

        /// Witness file (default: <stem>.wit next to the program, when present)
        #[arg(long)]
        witness: Option<PathBuf>,

        /// Compile attempts, the original included
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Enable the model-driven strategy (needs SIMF_MODEL_API_KEY)
        #[arg(long, default_value_t = false)]
        llm: bool,

        /// Skip the .repair.json history for solved sessions
        #[arg(long, default_value_t = false)]
        no_history: bool,
    },

    /// Repair many programs concurrently; Ctrl-C stops launching new sessions
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Concurrent sessions
        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        max_attempts: Option<u32>,

        #[arg(long, default_value_t = false)]
        llm: bool,
    },

    /// Compile once and print the result
    Compile {
        file: PathBuf,

        #[arg(long)]
        witness: Option<PathBuf>,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            compiler: self.compiler.clone(),
            compiler_url: self.compiler_url.clone(),
            output_dir: self.output_dir.clone(),
            ..Default::default()
        };
        match &self.command {
            Command::Repair {
                max_attempts,
                no_history,
                ..
            } => {
                overrides.max_attempts = *max_attempts;
                overrides.no_history = *no_history;
            }
            Command::Batch {
                workers,
                max_attempts,
                ..
            } => {
                overrides.workers = *workers;
                overrides.max_attempts = *max_attempts;
            }
            Command::Compile { .. } => {}
        }
        overrides
    }

    fn wants_model(&self) -> bool {
        matches!(
            self.command,
            Command::Repair { llm: true, .. } | Command::Batch { llm: true, .. }
        )
    }
}

/// What a subcommand produced
enum Output<'a> {
    Reports(&'a [FileReport]),
    Compile(&'a Path, &'a CompileResult),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref(), &cli.overrides())?;
    let repairer = Repairer::from_config(config, config::model_endpoint(cli.wants_model())?)?;
    let history = cli
        .show_history
        .and_then(|limit| repairer.client().history().map(|h| (h, limit)));

    match &cli.command {
        Command::Repair { file, witness, .. } => {
            let cancel = cancel_on_ctrl_c();
            let report = repairer
                .repair_file(file, witness.as_deref(), &cancel)
                .await;
            let reports = std::slice::from_ref(&report);
            println!("{}", render(&Output::Reports(reports), cli.json, history)?);
            Ok(exit_code(report.is_success()))
        }
        Command::Batch { files, .. } => {
            info!(
                files = files.len(),
                workers = repairer.config().workers,
                "starting batch"
            );
            let items = files.iter().cloned().map(BatchItem::from).collect();
            let reports = repairer.repair_batch(items, cancel_on_ctrl_c()).await;
            println!("{}", render(&Output::Reports(&reports), cli.json, history)?);
            Ok(exit_code(reports.iter().all(FileReport::is_success)))
        }
        Command::Compile { file, witness } => {
            let item = BatchItem {
                source_path: file.clone(),
                witness_path: witness.clone(),
            };
            let request = read_input(&item).await?;
            let result = repairer.client().compile(&request).await;
            println!("{}", render(&Output::Compile(file, &result), cli.json, history)?);
            Ok(exit_code(result.is_success()))
        }
    }
}

/// Cancel cooperatively on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight sessions");
            trigger.cancel();
        }
    });
    cancel
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Final output, followed by the newest `limit` compiler calls when asked.
///
/// In JSON mode the history turns the document into
/// `{"result": ..., "history": [...]}`.
fn render(output: &Output<'_>, json: bool, history: Option<(&CompileHistory, usize)>) -> Result<String> {
    if json {
        let value = match history {
            Some((history, limit)) => serde_json::json!({
                "result": output_json(output),
                "history": history.recent(limit),
            }),
            None => output_json(output),
        };
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut text = output_text(output);
    if let Some((history, limit)) = history {
        text.push('\n');
        text.push_str(history.render(limit).trim_end());
    }
    Ok(text)
}

fn output_json(output: &Output<'_>) -> Value {
    match output {
        Output::Reports(reports) => {
            let summaries: Vec<_> = reports.iter().map(FileReport::summary).collect();
            serde_json::json!(summaries)
        }
        Output::Compile(file, result) => serde_json::json!({
            "file": file,
            "success": result.is_success(),
            "diagnostics": result.diagnostics(),
        }),
    }
}

fn output_text(output: &Output<'_>) -> String {
    let mut lines: Vec<String> = Vec::new();
    match output {
        Output::Reports(reports) => {
            for report in reports.iter() {
                let outcome = &report.outcome;
                lines.push(format!(
                    "{}: {} after {} attempt(s)",
                    report.source_path.display(),
                    outcome.terminal_state,
                    outcome.session.attempts().len()
                ));
                for line in &outcome.trail {
                    lines.push(format!("    {}", line));
                }
                match &report.artifact {
                    Ok(location) => {
                        if let Some(path) = &location.fixed_source {
                            lines.push(format!("    fixed: {}", path.display()));
                        }
                        if let Some(path) = &location.fixed_witness {
                            lines.push(format!("    witness: {}", path.display()));
                        }
                        if let Some(path) = &location.history {
                            lines.push(format!("    history: {}", path.display()));
                        }
                    }
                    Err(e) => lines.push(format!("    error: {}", e)),
                }
            }
            if reports.len() > 1 {
                let solved = reports.iter().filter(|r| r.outcome.is_solved()).count();
                lines.push(format!("{}/{} solved", solved, reports.len()));
            }
        }
        Output::Compile(file, result) => {
            lines.push(format!("{}: {}", file.display(), result.summary()));
            for diagnostic in result.diagnostics() {
                lines.push(format!("    {}", diagnostic.summary()));
            }
        }
    }
    lines.join("\n")
}
