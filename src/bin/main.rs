//! meilisync-pg CLI

use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use meilisync_pg::config::{DEFAULT_CONFIG_PATH, LogFormat};
use meilisync_pg::metrics::MetricsSnapshot;
use meilisync_pg::{
    ExitPolicy, IndexOutcome, MeilisearchClient, PostgresClient, RunPolicy, RunReport, Runner,
    SyncConfig,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "meilisync-pg")]
#[command(author, version, about = "Sync PostgreSQL tables into Meilisearch indexes")]
struct Cli {
    /// Delete and recreate each index before syncing (ignores cursors)
    #[arg(long)]
    drop: bool,

    /// Re-apply filterable, sortable and searchable attributes
    #[arg(long)]
    meta: bool,

    /// Only sync the index with this destination name
    #[arg(long, value_name = "INDEX")]
    only: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Exit non-zero when any index fails
    #[arg(long)]
    strict: bool,

    /// Log level (defaults to the config file's `logging.level`)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON output
    #[arg(long)]
    json: bool,

    /// Quiet mode
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = SyncConfig::from_file(&cli.config);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, logging.format, cli.quiet, cli.json);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Loaded config from: {}", cli.config);

    match run(cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut config: SyncConfig) -> Result<u8, Box<dyn std::error::Error>> {
    let endpoints = config.endpoints()?;
    debug!(?endpoints, "Resolved endpoints");

    let meili = MeilisearchClient::new(&endpoints.meili_host, endpoints.meili_key.clone())?
        .with_task_timeout(config.task_timeout);
    meili.health().await?;

    let pg = PostgresClient::connect(&endpoints.postgres_dsn).await?;
    pg.ping().await?;

    let interactive = !cli.quiet && !cli.json;
    if interactive {
        println!("{} v{}\n", style("meilisync-pg").bold(), meilisync_pg::VERSION);
    }

    let mut runner = Runner::new(Arc::new(meili), &pg).with_config_path(&cli.config);
    let progress = interactive.then(spinner);
    if let Some(ref pb) = progress {
        let pb = pb.clone();
        runner = runner.with_progress(move |p| {
            pb.set_message(format!(
                "{} {} ({} documents)",
                p.index, p.state, p.documents
            ));
        });
    }

    let policy = RunPolicy {
        drop: cli.drop,
        refresh_meta: cli.meta,
        only: cli.only.clone(),
        exit_policy: cli.strict.then_some(ExitPolicy::Strict),
    };
    let report = runner.run(&mut config, &policy).await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !cli.quiet {
        print_summary(&report, &runner.metrics().snapshot());
    }

    Ok(report.exit_code())
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(template);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_summary(report: &RunReport, stats: &MetricsSnapshot) {
    if report.all_success() {
        println!("{} Sync completed successfully", style("✓").green());
    } else {
        println!("{} Sync completed with errors", style("✗").red());
    }
    println!("\nDuration: {}ms", report.duration_ms);
    println!("Total documents: {}", report.total_documents());
    if stats.batches > 0 {
        println!(
            "Throughput: {:.0} documents/s, {:.1}% of batches accepted",
            stats.documents_per_second(),
            stats.batch_success_rate() * 100.0
        );
    }
    println!();

    for entry in &report.indexes {
        match entry.outcome {
            IndexOutcome::Synced(ref r) => {
                println!(
                    "  {} {}: {} documents in {} batches ({}ms)",
                    style("✓").green(),
                    entry.index,
                    r.total,
                    r.batches,
                    r.duration_ms
                );
                if r.failed_batches > 0 {
                    println!(
                        "      {} batches rejected",
                        style(r.failed_batches).yellow()
                    );
                }
            }
            IndexOutcome::Failed { ref error, .. } => {
                println!("  {} {}", style("✗").red(), entry.index);
                println!("      Error: {}", error);
            }
            IndexOutcome::Skipped => {
                println!("  {} {} (skipped)", style("-").dim(), entry.index);
            }
        }
    }

    if let Some(ref e) = report.persist_error {
        println!("\n{} {}", style("Config not saved:").red(), e);
    }
}

fn init_logging(level: &str, format: LogFormat, quiet: bool, json_output: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = fmt().with_env_filter(filter).with_target(false);

    // When JSON output is enabled, send logs to stderr to avoid mixing with JSON on stdout
    match (format, json_output) {
        (LogFormat::Json, true) => builder.json().with_writer(std::io::stderr).init(),
        (LogFormat::Json, false) => builder.json().init(),
        (LogFormat::Text, true) => builder.with_writer(std::io::stderr).init(),
        (LogFormat::Text, false) => builder.init(),
    }
}
