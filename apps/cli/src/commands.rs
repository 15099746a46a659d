//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use extruder_core::{BatchConfig, run_batch};
use extruder_pipeline::RemoteClient;
use extruder_shared::{AppConfig, Event, EventSink, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// extruder — pull field values out of the remote task-tracking system.
#[derive(Parser)]
#[command(
    name = "extruder",
    version,
    about = "Resolve spreadsheet identifiers against the remote task system and collect field values.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a batch for a spreadsheet of identifiers and write datas.csv.
    Download {
        /// Input spreadsheet path.
        #[arg(short, long)]
        file: String,

        /// Target column for a future write-back; not consumed by download.
        #[arg(short, long)]
        column: Option<usize>,

        /// Sheet index holding the identifiers.
        #[arg(short, long, default_value_t = 0)]
        sheet: usize,

        /// Identifier column index.
        #[arg(short, long, default_value_t = 0)]
        idx: usize,

        /// Task name to match (overrides config).
        #[arg(long)]
        task: Option<String>,

        /// Field name to read (overrides config).
        #[arg(long)]
        field: Option<String>,
    },

    /// Build the two-column upload projection. No write-back yet.
    Upload {
        /// Input spreadsheet path.
        #[arg(short, long)]
        file: String,

        /// Value column to project.
        #[arg(short, long)]
        column: usize,

        /// Sheet index.
        #[arg(short, long, default_value_t = 0)]
        sheet: usize,

        /// Identifier column index.
        #[arg(short, long, default_value_t = 0)]
        idx: usize,
    },

    /// Start the browser front end.
    Serve {
        /// Port to bind on localhost (overrides config).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "extruder=info",
        1 => "extruder=debug",
        _ => "extruder=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command. No subcommand starts the front end.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Download {
            file,
            column,
            sheet,
            idx,
            task,
            field,
        }) => cmd_download(&file, column, sheet, idx, task, field).await,
        Some(Command::Upload {
            file,
            column,
            sheet,
            idx,
        }) => cmd_upload(&file, column, sheet, idx).await,
        Some(Command::Serve { port }) => cmd_serve(port).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        None => cmd_serve(None).await,
    }
}

// ---------------------------------------------------------------------------
// download
// ---------------------------------------------------------------------------

async fn cmd_download(
    file: &str,
    _column: Option<usize>,
    sheet: usize,
    idx: usize,
    task: Option<String>,
    field: Option<String>,
) -> Result<()> {
    let config = load_config()?;

    let mut batch_config = BatchConfig::from(&config);
    if let Some(task) = task {
        batch_config.task_name = task;
    }
    if let Some(field) = field {
        batch_config.field_name = field;
    }

    let input = PathBuf::from(file);
    let ids = extruder_sheets::identifier_column(&input, sheet, idx)?;

    info!(
        items = ids.len(),
        task = %batch_config.task_name,
        field = %batch_config.field_name,
        "starting download"
    );

    let client = RemoteClient::connect(&config).await?;
    let reporter = Arc::new(SpinnerSink::new());
    let sink: Arc<dyn EventSink> = reporter.clone();

    let outcome = run_batch(&ids, &batch_config, &client, Some(sink)).await?;
    reporter.finish();

    let out_path = extruder_sheets::write_results(&input, &outcome.rows)?;

    println!();
    println!(
        "  Completed in {:.1}s for {} items",
        outcome.elapsed.as_secs_f64(),
        outcome.processed
    );
    println!("  Values found: {}", outcome.rows.len());
    println!("  Results:      {}", out_path.display());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress sink
// ---------------------------------------------------------------------------

/// Renders pipeline events on an indicatif spinner.
struct SpinnerSink {
    spinner: ProgressBar,
}

impl SpinnerSink {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl EventSink for SpinnerSink {
    fn handle(&self, event: &Event) {
        let status = if event.success { "ok" } else { "failed" };
        self.spinner
            .set_message(format!("{} {} {status}", event.stage, event.id));
    }
}

// ---------------------------------------------------------------------------
// upload / serve / config
// ---------------------------------------------------------------------------

async fn cmd_upload(file: &str, column: usize, sheet: usize, idx: usize) -> Result<()> {
    let input = PathBuf::from(file);
    let pairs = extruder_sheets::column_pair(&input, sheet, idx, column)?;

    info!(rows = pairs.len(), "built upload projection");
    println!(
        "upload: built a projection of {} rows; write-back is not implemented",
        pairs.len()
    );
    // TODO: push the projected values back through the setValue stage once
    // its reported status is trustworthy.

    Ok(())
}

async fn cmd_serve(port: Option<u16>) -> Result<()> {
    let config = load_config()?;
    let port = port.unwrap_or(config.web.port);

    info!(port, "starting front end");
    extruder_web::serve(config, port).await?;
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
