//! CLI binary for edgequake-form2json.
//!
//! A thin shim over the library crate: maps flags to `ExtractionConfig`,
//! opens the record store under `--data-dir` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_form2json::{
    ArtifactStore, ErrorClass, ExtractionConfig, ExtractionProgressCallback, FormError,
    FormPipeline, ProgressCallback, Record, RecordStore, StructuredPayload,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the document is normalised, then a per-page bar.
/// Pages may complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_task_start(&self, _task_id: &str, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Extracting");
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, field_count: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{field_count} fields")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_task_complete(&self, _task_id: &str, _field_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a scanned form
  form2json upload intake-form.jpg

  # Fetch the result later by task id
  form2json result 3f2c9a0e5b7d4c1e9a8b6d5c4e3f2a1b

  # List, inspect, correct and remove records
  form2json list
  form2json get 7 --json
  form2json update 7 --file corrected.json
  form2json delete 7

  # Use an edgequake-llm provider instead of the router endpoint
  form2json --provider openai --model gpt-4.1-mini upload form.pdf

ENVIRONMENT VARIABLES:
  HUGGINGFACE_API_KEY     Router credential (also HF_TOKEN, HUGGING_FACE_API_KEY)
  FORM2JSON_ENDPOINT      OpenAI-compatible chat-completions URL
  FORM2JSON_MODEL         Model id
  FORM2JSON_PROVIDER      edgequake-llm provider name
  FORM2JSON_DATA_DIR      Directory for records.db, uploads/ and results/
  PDFIUM_LIB_PATH         Path to libpdfium, needed for PDF uploads

Without any credential every upload stores a fixed demo payload.

EXIT CODES:
  0 success, 1 server-side failure, 2 bad input, 3 not found
"#;

/// Extract label/value fields from handwritten forms using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "form2json",
    version,
    about = "Extract label/value fields from handwritten forms using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding records.db, uploads/ and results/.
    #[arg(long, global = true, env = "FORM2JSON_DATA_DIR", default_value = "form2json-data")]
    data_dir: PathBuf,

    /// Model id.
    #[arg(long, global = true, env = "FORM2JSON_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "FORM2JSON_PROVIDER")]
    provider: Option<String>,

    /// OpenAI-compatible chat-completions URL used with the router credential.
    #[arg(long, global = true, env = "FORM2JSON_ENDPOINT")]
    endpoint: Option<String>,

    /// Per-page model call timeout in seconds.
    #[arg(long, global = true, env = "FORM2JSON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Retries per page on transient failures.
    #[arg(long, global = true, env = "FORM2JSON_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Pages extracted concurrently.
    #[arg(short, long, global = true, env = "FORM2JSON_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Prefix labels with "Page N - " on multi-page documents.
    #[arg(long, global = true)]
    label_pages: bool,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract fields from a PNG, JPEG or PDF and store them.
    Upload { file: PathBuf },
    /// Show the record produced by an upload.
    Result { task_id: String },
    /// List all records.
    List,
    /// Show one record.
    Get { id: i64 },
    /// Replace a record's fields with JSON from a file ("-" for stdin).
    Update {
        id: i64,
        #[arg(long)]
        file: String,
    },
    /// Delete a record.
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", red("error:"), err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_logging(cli: &Cli) {
    let show_progress = shows_progress(cli);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();
}

fn shows_progress(cli: &Cli) -> bool {
    matches!(cli.command, Command::Upload { .. }) && !cli.quiet && !cli.no_progress && !cli.json
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<FormError>().map(FormError::class) {
        Some(ErrorClass::Client) => 2,
        Some(ErrorClass::NotFound) => 3,
        _ => 1,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = RecordStore::open(&cli.data_dir.join("records.db"))
        .with_context(|| format!("Failed to open record store in {}", cli.data_dir.display()))?;

    match &cli.command {
        Command::Upload { file } => {
            let progress: Option<ProgressCallback> = if shows_progress(&cli) {
                Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let config = build_config(&cli, progress)?;
            let pipeline = FormPipeline::new(config, store)?
                .with_artifacts(ArtifactStore::new(&cli.data_dir));

            if pipeline.is_demo() && !cli.quiet {
                eprintln!(
                    "{} no API credential configured; storing the demo payload",
                    cyan("◆")
                );
            }

            let receipt = pipeline.upload_file(file).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&receipt)?);
            } else {
                println!("{}", receipt.task_id);
                if !cli.quiet {
                    eprintln!(
                        "{} record {}  {} pages  {} fields{}",
                        green("✔"),
                        bold(&receipt.record_id.to_string()),
                        receipt.page_count,
                        receipt.field_count,
                        if receipt.demo { dim("  (demo)") } else { String::new() },
                    );
                }
            }
        }
        Command::Result { task_id } => print_record(&store.get_by_task(task_id)?, cli.json)?,
        Command::List => {
            let records = store.list()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                eprintln!("{}", dim("no records"));
            } else {
                for r in &records {
                    println!(
                        "{:>5}  {}  {}  {} fields",
                        r.id,
                        r.task_id,
                        r.created_at.format("%Y-%m-%d %H:%M:%S"),
                        r.raw_json.len()
                    );
                }
            }
        }
        Command::Get { id } => print_record(&store.get(*id)?, cli.json)?,
        Command::Update { id, file } => {
            let payload = read_payload(file)?;
            let record = store.update(*id, &payload)?;
            print_record(&record, cli.json)?;
        }
        Command::Delete { id } => {
            store.delete(*id)?;
            if !cli.quiet {
                eprintln!("{} deleted record {}", green("✔"), id);
            }
        }
    }

    Ok(())
}

/// Map CLI args and environment to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let env = ExtractionConfig::from_env();

    let mut builder = ExtractionConfig::builder()
        .endpoint(cli.endpoint.clone().unwrap_or(env.endpoint))
        .api_timeout_secs(cli.api_timeout)
        .max_retries(cli.max_retries)
        .concurrency(cli.concurrency)
        .label_pages(cli.label_pages);

    if let Some(key) = env.api_key {
        builder = builder.api_key(key);
    }
    if let Some(model) = cli.model.clone() {
        builder = builder.model(model);
    }
    if let Some(provider) = cli.provider.clone() {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read `{"fields": [...]}` or `{"raw_json": {"fields": [...]}}`.
fn read_payload(source: &str) -> Result<StructuredPayload> {
    let text = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read payload from {source}"))?
    };

    let mut value: serde_json::Value =
        serde_json::from_str(&text).context("Payload is not valid JSON")?;
    if let Some(inner) = value.get_mut("raw_json") {
        value = inner.take();
    }
    serde_json::from_value(value)
        .context("Payload must look like {\"fields\": [{\"label\": ..., \"value\": ...}]}")
}

fn print_record(record: &Record, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    println!(
        "{} {}  {}",
        bold(&format!("Record {}", record.id)),
        dim(&format!("task {}", record.task_id)),
        dim(&format!(
            "created {}  updated {}",
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339()
        )),
    );
    for field in &record.raw_json.fields {
        println!("  {}: {}", cyan(&field.label), field.value);
    }
    Ok(())
}
