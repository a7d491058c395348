//! CLI command definitions, routing, and tracing setup.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use stixfeed_core::pipeline::{
    DEFAULT_BATCH_SIZE, FeedRunResult, ProgressReporter, preview_indicators, run_feed,
};
use stixfeed_core::fetch::probe;
use stixfeed_shared::{
    AppConfig, BundleSource, CatalogConfig, CollectionSource, EnrichOptions, FeedEntity,
    FetchConfig, IndicatorEntity, ObjectKind, init_config, load_config, load_config_from,
};
use stixfeed_taxii::TaxiiClient;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// stixfeed: pull a STIX threat-intel catalog and emit enriched feed entities.
#[derive(Parser)]
#[command(
    name = "stixfeed",
    version,
    about = "Fetch STIX 2.0 objects from a TAXII catalog and emit enriched indicators and reports.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.stixfeed/stixfeed.toml.
    #[arg(long, global = true, env = "STIXFEED_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
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
    /// Fetch every collection, enrich, and write entities as JSON batches.
    Fetch {
        /// Read objects from a STIX bundle file instead of the catalog.
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// Output file (defaults to stdout). One JSON array per line.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Entities per output batch.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Tags added to every entity (comma-separated). Overrides config.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Traffic Light Protocol color. Overrides config.
        #[arg(long)]
        tlp: Option<String>,
    },

    /// Check that the catalog answers by reading one page of indicators.
    Test {
        /// Probe a STIX bundle file instead of the catalog.
        #[arg(long)]
        bundle: Option<PathBuf>,
    },

    /// Print the first indicators of the catalog as a Markdown table.
    GetIndicators {
        /// Maximum number of indicators to show.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Read indicators from a STIX bundle file instead of the catalog.
        #[arg(long)]
        bundle: Option<PathBuf>,
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

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "stixfeed=info",
        1 => "stixfeed=debug",
        _ => "stixfeed=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Fetch {
            bundle,
            out,
            batch_size,
            tags,
            tlp,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_fetch(&config, bundle.as_deref(), out.as_deref(), batch_size, tags, tlp).await
        }
        Command::Test { bundle } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_test(&config, bundle.as_deref()).await
        }
        Command::GetIndicators { limit, bundle } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_get_indicators(&config, limit, bundle.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Bundle file when given, otherwise the configured TAXII catalog.
fn open_source(config: &AppConfig, bundle: Option<&Path>) -> Result<Arc<dyn CollectionSource>> {
    if let Some(path) = bundle {
        return Ok(Arc::new(BundleSource::from_file(path)?));
    }

    let catalog = CatalogConfig::from_app_config(config)?;
    if catalog.api_key.is_none() {
        warn!(
            env = %config.catalog.api_key_env,
            "no API key in environment, requests will be unauthenticated"
        );
    }
    Ok(Arc::new(TaxiiClient::new(catalog)?))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_fetch(
    config: &AppConfig,
    bundle: Option<&Path>,
    out: Option<&Path>,
    batch_size: usize,
    tags: Vec<String>,
    tlp: Option<String>,
) -> Result<()> {
    if batch_size == 0 {
        return Err(eyre!("--batch-size must be at least 1"));
    }

    let mut opts = EnrichOptions::from(config);
    if !tags.is_empty() {
        opts.feed_tags = tags;
    }
    if tlp.is_some() {
        opts.tlp_color = tlp;
    }

    let source = open_source(config, bundle)?;
    let fetch_config = FetchConfig::from(config);

    info!(
        source = source.name(),
        concurrency = fetch_config.concurrency,
        "fetching feed"
    );

    let reporter = CliProgress::new();
    let result = run_feed(source, &fetch_config, &opts, &reporter).await?;

    let indicators = result.feed.indicators.len();
    let reports = result.feed.reports.len();
    let received = result.objects_received;
    let elapsed = result.elapsed;
    let entities = result.feed.into_entities();

    let batches = match out {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("cannot create output file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let batches = write_batches(&mut writer, &entities, batch_size)?;
            writer.flush()?;
            batches
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            let batches = write_batches(&mut writer, &entities, batch_size)?;
            writer.flush()?;
            batches
        }
    };

    eprintln!();
    eprintln!("  Feed fetched successfully!");
    eprintln!("  Objects:    {received}");
    eprintln!("  Indicators: {indicators}");
    eprintln!("  Reports:    {reports}");
    eprintln!("  Batches:    {batches}");
    if let Some(path) = out {
        eprintln!("  Output:     {}", path.display());
    }
    eprintln!("  Time:       {:.1}s", elapsed.as_secs_f64());
    eprintln!();

    Ok(())
}

async fn cmd_test(config: &AppConfig, bundle: Option<&Path>) -> Result<()> {
    let source = open_source(config, bundle)?;
    let count = probe(source.as_ref(), config.catalog.page_size).await?;
    info!(source = source.name(), indicators = count, "catalog reachable");
    println!("ok");
    Ok(())
}

async fn cmd_get_indicators(config: &AppConfig, limit: usize, bundle: Option<&Path>) -> Result<()> {
    let source = open_source(config, bundle)?;
    let opts = EnrichOptions::from(config);
    let indicators =
        preview_indicators(source.as_ref(), config.catalog.page_size, limit, &opts).await?;

    print!("{}", indicators_table(&opts.reported_by, &indicators));
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Write entities as JSON arrays of at most `batch_size`, one per line.
/// Returns the number of batches written.
fn write_batches<W: Write>(writer: &mut W, entities: &[FeedEntity], batch_size: usize) -> Result<usize> {
    let mut batches = 0;
    for batch in entities.chunks(batch_size.max(1)) {
        serde_json::to_writer(&mut *writer, batch)?;
        writer.write_all(b"\n")?;
        batches += 1;
    }
    Ok(batches)
}

/// Render indicators as a Markdown table.
fn indicators_table(source_name: &str, indicators: &[IndicatorEntity]) -> String {
    let mut table = format!("### {source_name} indicators\n");
    if indicators.is_empty() {
        table.push_str("**No entries.**\n");
        return table;
    }

    table.push_str("|Value|Type|ID|Tags|\n|---|---|---|---|\n");
    for indicator in indicators {
        table.push_str(&format!(
            "|{}|{}|{}|{}|\n",
            escape_cell(&indicator.value),
            indicator.indicator_type,
            escape_cell(indicator.source_id()),
            escape_cell(&indicator.fields.tags.join(", ")),
        ));
    }
    table
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn kind_fetched(&self, kind: ObjectKind, count: usize) {
        self.spinner.println(format!("  fetched {count} {kind} objects"));
    }

    fn done(&self, _result: &FeedRunResult) {
        self.spinner.finish_and_clear();
    }
}
