//! CLI binary for docmill.
//!
//! A thin shim over the library crate: builds an [`Engine`] from flags and
//! environment, then runs one conversion, one sweep, or one quota check.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docmill::{
    Engine, ModelsConfig, PipelineObserver, ProcessOptions, ServiceConfig, Stage, Task,
    TaskError, TaskResult, TaskStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Terminal observer using indicatif ────────────────────────────────────────

/// Spinner plus a 0–100 bar driven by stage checkpoints.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(name: &str) -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(name.to_string());
        bar.set_message("queued");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Pending => "starting",
        Stage::OfficeToPdf => "office → pdf",
        Stage::PdfToMarkdown => "pdf → markdown",
        Stage::OcrToMarkdown => "ocr → markdown",
        Stage::Completed => "done",
        Stage::Cancelled => "cancelled",
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage(&self, _task_id: &str, stage: Stage, progress: u8) {
        self.bar.set_position(u64::from(progress));
        self.bar.set_message(stage_label(stage));
    }

    fn on_complete(&self, _task_id: &str, result: &TaskResult) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}  {}",
            green("✔"),
            bold(&result.markdown_file.name),
            dim(&format!("{} bytes", result.markdown_file.size)),
        );
    }

    fn on_failed(&self, _task_id: &str, error: &TaskError) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error.code.as_str()));
    }

    fn on_cancelled(&self, _task_id: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} cancelled", red("✘"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert to stdout
  docmill convert report.docx

  # Convert to a file, keeping the session for inspection
  docmill convert scan.png -o scan.md --session demo

  # Task record as JSON
  docmill convert paper.pdf --json

  # Reclaim expired sessions once
  docmill sweep

  # Would a 2 GiB upload fit?
  docmill quota 2147483648

PIPELINES:
  .docx .pptx .xlsx .xls   LibreOffice → PDF, MarkItDown (PDF fallback)
  .doc .ppt                LibreOffice → PDF, OCR
  .pdf                     OCR
  images                   OCR

ENVIRONMENT VARIABLES:
  DATA_DIR            Session storage root (default ./data)
  LIBREOFFICE_PATH    LibreOffice binary (default /usr/bin/libreoffice)
  MARKITDOWN_BIN      MarkItDown binary (default markitdown)
  MARKITDOWN_TIMEOUT  MarkItDown kill timeout in ms (default 120000)
  DOCMILL_MODELS      Model registry YAML (default config/models.yaml)
  OPENAI_API_KEY      Key for provider: openai
  AZURE_API_KEY       Key for provider: azure
  CUSTOM_API_KEY      Key for provider: custom
  RUST_LOG            Overrides --verbose / --quiet
"#;

/// Convert office files, PDFs and images to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "docmill",
    version,
    about = "Convert office files, PDFs and images to Markdown",
    long_about = "Convert documents to Markdown by chaining LibreOffice, MarkItDown and an \
OCR-capable vision model. Each file runs as a background task with stage and progress \
reporting; sessions on disk expire after a TTL and are reclaimed by `docmill sweep`.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Session storage root; overrides DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Model registry YAML.
    #[arg(long, env = "DOCMILL_MODELS", default_value = "config/models.yaml", global = true)]
    models: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCMILL_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCMILL_QUIET", global = true)]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "DOCMILL_LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one file and print (or write) the Markdown.
    Convert {
        /// File to convert.
        input: PathBuf,

        /// Write Markdown to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Session to store the files under (default: a fresh one).
        #[arg(long)]
        session: Option<String>,

        /// Trace id attached to every log line of this run.
        #[arg(long)]
        trace_id: Option<String>,

        /// Print the final task record as JSON instead of Markdown.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "DOCMILL_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Run one cleanup sweep and print the report.
    Sweep {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check whether an upload of BYTES fits in the disk quota.
    Quota {
        bytes: u64,

        /// Budget in bytes (default: the configured quota).
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are hidden while the progress bar is active.
    let show_progress = match &cli.command {
        Command::Convert { json, no_progress, .. } => !cli.quiet && !no_progress && !json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // ── Build engine ─────────────────────────────────────────────────────
    let mut config = ServiceConfig::from_env().context("Invalid configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    let models = ModelsConfig::load_or_default(&cli.models);
    let engine = Engine::new(config, models);

    match cli.command {
        Command::Convert {
            input,
            output,
            session,
            trace_id,
            json,
            ..
        } => {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let engine = if show_progress {
                engine.with_observer(CliObserver::new(&name))
            } else {
                engine
            };
            let session = session.unwrap_or_else(Engine::new_session_id);
            let mut options = ProcessOptions::default();
            if let Some(id) = trace_id {
                options = options.with_trace_id(id);
            }
            run_convert(&engine, &session, input, output, json, cli.quiet, options).await
        }
        Command::Sweep { json } => {
            let report = engine.cleanup().trigger().await;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else {
                println!("Scanned:        {}", report.scanned);
                println!("Expired:        {}", report.expired_sessions.len());
                for id in &report.expired_sessions {
                    println!("  - {id}");
                }
                println!("Files deleted:  {}", report.deleted_files);
                println!("Bytes freed:    {}", report.freed_bytes);
                for failure in &report.failures {
                    println!(
                        "{} {}: {}",
                        red("✗"),
                        failure.session_id.as_deref().unwrap_or("<data dir>"),
                        failure.error
                    );
                }
            }
            if !report.is_clean() {
                bail!("{} session(s) could not be reclaimed", report.failures.len());
            }
            Ok(())
        }
        Command::Quota { bytes, limit } => {
            let usage = engine
                .cleanup()
                .total_disk_usage()
                .await
                .context("Failed to measure disk usage")?;
            let fits = engine
                .cleanup()
                .check_quota(bytes, limit)
                .await
                .context("Failed to check quota")?;
            let limit = limit.unwrap_or(engine.config().disk_quota);
            println!(
                "{}  usage {} + {} / {} bytes",
                if fits { green("fits") } else { red("over quota") },
                usage,
                bytes,
                limit
            );
            if !fits {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_convert(
    engine: &Engine,
    session: &str,
    input: PathBuf,
    output: Option<PathBuf>,
    json: bool,
    quiet: bool,
    options: ProcessOptions,
) -> Result<()> {
    let started = Instant::now();
    let task = engine
        .submit(session, &input, options)
        .await
        .with_context(|| format!("Failed to submit {}", input.display()))?;

    let task = tokio::select! {
        task = wait_for(engine, &task.id) => task?,
        _ = tokio::signal::ctrl_c() => {
            engine.cancel_task(&task.id);
            // The pipeline stops at its next stage boundary.
            wait_for(engine, &task.id).await?
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&task).context("Failed to serialise task")?
        );
    }

    match task.status {
        TaskStatus::Succeeded => {}
        TaskStatus::Cancelled => bail!("Conversion cancelled"),
        _ => match task.error {
            Some(err) => bail!("Conversion failed: {}: {}", err.code, err.message),
            None => bail!("Conversion failed"),
        },
    }
    if json {
        return Ok(());
    }

    let result = task.result.context("Task succeeded without a result")?;
    let markdown = tokio::fs::read_to_string(&result.markdown_file.storage_locator)
        .await
        .with_context(|| {
            format!(
                "Failed to read {}",
                result.markdown_file.storage_locator.display()
            )
        })?;

    if let Some(path) = output {
        tokio::fs::write(&path, &markdown)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !quiet {
            eprintln!(
                "{}  {}ms  →  {}",
                green("✔"),
                started.elapsed().as_millis(),
                bold(&path.display().to_string()),
            );
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(markdown.as_bytes())
            .context("Failed to write to stdout")?;
        if !markdown.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !quiet {
        eprintln!("   {}", dim(&format!("session {session}")));
    }
    Ok(())
}

/// Poll until the task is terminal.
async fn wait_for(engine: &Engine, task_id: &str) -> Result<Task> {
    loop {
        let task = engine
            .get_task(task_id)
            .context("Task disappeared before finishing")?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
