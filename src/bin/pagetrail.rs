//! Pagetrail CLI - Command-line interface for the Pagetrail collector
//!
//! Commands:
//! - replay: Drive the collector through a scripted browser session
//! - inspect: Summarise a stored action queue blob
//! - classify: Classify a user-agent string

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pagetrail::classifier::{Classifier, RuleClassifier};
use pagetrail::schema::StoredQueue;
use pagetrail::sim::{parse_script, replay, ReplayReport, SimulatedBrowser};
use pagetrail::{CollectorConfig, CollectorError, ProtocolVariant, COLLECTOR_NAME, PAGETRAIL_VERSION};

/// Environment variable holding the log filter
const LOG_ENV: &str = "PAGETRAIL_LOG";

/// Pagetrail - client-side behavioural telemetry collector
#[derive(Parser)]
#[command(name = "pagetrail")]
#[command(version = PAGETRAIL_VERSION)]
#[command(about = "Replay and inspect Pagetrail collector sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted browser session and print every outgoing request
    Replay {
        /// Script path, one step per line or a JSON array (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Customer API key
        #[arg(long, default_value = "demo")]
        api_key: String,

        /// Wire protocol variant
        #[arg(long, value_enum, default_value = "legacy")]
        variant: VariantArg,

        /// Idle threshold in minutes
        #[arg(long, default_value = "10")]
        idle_minutes: u32,

        /// Collection server base URL
        #[arg(long)]
        server_url: Option<String>,

        /// Location the page starts on
        #[arg(long, default_value = "https://localhost/")]
        location: String,

        /// Output format
        #[arg(long, value_enum, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Summarise a stored action queue (the value kept under the queue key)
    Inspect {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a user-agent string
    Classify {
        user_agent: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    /// `/data/send` with page buckets
    Legacy,
    /// `/data/send-beta` with a flat action log
    Beta,
}

impl From<VariantArg> for ProtocolVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Legacy => ProtocolVariant::Legacy,
            VariantArg::Beta => ProtocolVariant::Beta,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Full report as compact JSON
    Json,
    /// Full report as pretty-printed JSON
    JsonPretty,
    /// One decoded request per line
    Ndjson,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), PagetrailCliError> {
    match cli.command {
        Commands::Replay {
            input,
            api_key,
            variant,
            idle_minutes,
            server_url,
            location,
            output_format,
        } => {
            let mut config = CollectorConfig::new(api_key)
                .with_variant(variant.into())
                .with_idle_minutes(idle_minutes);
            if let Some(url) = server_url {
                config = config.with_server_url(url);
            }
            cmd_replay(&input, &config, &location, output_format)
        }

        Commands::Inspect { input, json } => cmd_inspect(&input, json),

        Commands::Classify { user_agent, json } => cmd_classify(&user_agent, json),
    }
}

fn cmd_replay(
    input: &Path,
    config: &CollectorConfig,
    location: &str,
    output_format: OutputFormat,
) -> Result<(), PagetrailCliError> {
    let script = read_input(input)?;
    let steps = parse_script(&script)?;
    if steps.is_empty() {
        return Err(PagetrailCliError::EmptyScript);
    }

    let report = replay(config, SimulatedBrowser::new(location), &steps)?;
    print!("{}", format_report(&report, output_format)?);
    Ok(())
}

fn cmd_inspect(input: &Path, json: bool) -> Result<(), PagetrailCliError> {
    let raw = read_input(input)?;
    let (queue, origin) = StoredQueue::from_json_with_origin(raw.trim())?;
    let summary = queue.summary(origin);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Stored Queue");
        println!("============");
        println!("Version: {} ({:?})", summary.version, summary.origin);
        println!("Pages:   {}", summary.pages);
        println!("Actions: {}", summary.actions);
        if let (Some(first), Some(last)) = (summary.first_action_at, summary.last_action_at) {
            println!("Span:    {} .. {}", first.to_rfc3339(), last.to_rfc3339());
        }
        if !summary.urls.is_empty() {
            println!("\nURLs:");
            for url in &summary.urls {
                println!("  - {}", url);
            }
        }
    }

    Ok(())
}

fn cmd_classify(user_agent: &str, json: bool) -> Result<(), PagetrailCliError> {
    let classification = RuleClassifier.classify(user_agent);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
    } else {
        println!("{} {}", COLLECTOR_NAME, PAGETRAIL_VERSION);
        println!("Bot:     {}", if classification.is_bot { "yes" } else { "no" });
        println!("Device:  {}", classification.device.as_str());
        println!("Browser: {}", classification.browser);
        println!("OS:      {}", classification.os);
    }

    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, PagetrailCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(PagetrailCliError::InteractiveStdin);
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn format_report(report: &ReplayReport, format: OutputFormat) -> Result<String, PagetrailCliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(report)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(report)? + "\n"),
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for sent in &report.requests {
                let line = serde_json::json!({
                    "at": sent.at,
                    "transport": sent.transport,
                    "url": sent.request.url,
                    "pages": sent.pages()?,
                });
                lines.push(line.to_string());
            }
            Ok(lines.join("\n") + "\n")
        }
    }
}

// Error types

#[derive(Debug)]
enum PagetrailCliError {
    Io(io::Error),
    Collector(CollectorError),
    Json(serde_json::Error),
    EmptyScript,
    InteractiveStdin,
}

impl From<io::Error> for PagetrailCliError {
    fn from(e: io::Error) -> Self {
        PagetrailCliError::Io(e)
    }
}

impl From<CollectorError> for PagetrailCliError {
    fn from(e: CollectorError) -> Self {
        PagetrailCliError::Collector(e)
    }
}

impl From<serde_json::Error> for PagetrailCliError {
    fn from(e: serde_json::Error) -> Self {
        PagetrailCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PagetrailCliError> for CliError {
    fn from(e: PagetrailCliError) -> Self {
        match e {
            PagetrailCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PagetrailCliError::Collector(CollectorError::Script(msg)) => CliError {
                code: "SCRIPT_ERROR".to_string(),
                message: msg,
                hint: Some("Each step needs an \"op\" and a non-decreasing \"at\" in milliseconds".to_string()),
            },
            PagetrailCliError::Collector(e @ CollectorError::UnsupportedVersion(_))
            | PagetrailCliError::Collector(e @ CollectorError::Schema(_)) => CliError {
                code: "SCHEMA_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Expected {\"version\": 1, \"pages\": [...]} or a bare page array".to_string()),
            },
            PagetrailCliError::Collector(e) => CliError {
                code: "COLLECTOR_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            PagetrailCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PagetrailCliError::EmptyScript => CliError {
                code: "EMPTY_SCRIPT".to_string(),
                message: "Script contains no steps".to_string(),
                hint: Some("Start the script with {\"at\": 0, \"op\": \"init\"}".to_string()),
            },
            PagetrailCliError::InteractiveStdin => CliError {
                code: "STDIN_IS_TTY".to_string(),
                message: "Refusing to read a script from an interactive terminal".to_string(),
                hint: Some("Pipe the script in or pass a file path with --input".to_string()),
            },
        }
    }
}
