use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxy_harvest::{
    harvest::registry::{default_sources, load_source_list},
    Config, ConfigParser, HttpTransport, ProtocolCatalog, RunOutcome, ScoringConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Pause between HTTP attempts for one source
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Collects proxy configs from public sources and ranks them
#[derive(Parser)]
#[command(name = "proxy-harvest")]
#[command(about = "Collects proxy configs from public sources and ranks them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every source, extract configs and write the ranked list
    Collect {
        /// Source URL to fetch (can specify multiple)
        #[arg(short, long)]
        source: Vec<String>,
        /// File containing source URLs (one URL per line)
        #[arg(short = 'f', long)]
        sources_file: Option<PathBuf>,
        /// Output file for ranked configs
        #[arg(short, long, default_value = proxy_harvest::DEFAULT_OUTPUT_FILE)]
        output: PathBuf,
        /// Output file for per-source statistics
        #[arg(long, default_value = proxy_harvest::DEFAULT_STATS_FILE)]
        stats: PathBuf,
        /// MaxMind MMDB file for country lookups
        #[arg(long)]
        mmdb: Option<PathBuf>,
        /// Number of sources fetched concurrently
        #[arg(short = 'n', long, default_value = "60")]
        concurrency: usize,
        /// Per-source timeout in seconds
        #[arg(long, default_value = "45")]
        timeout: u64,
        /// Line volume that earns a source the full quantity score
        #[arg(long, default_value = "1000")]
        desired_total: u64,
        /// Maximum acquisition mode: never adjust protocol limits
        #[arg(long)]
        max_power: bool,
        /// Disable adaptive protocol limits
        #[arg(long)]
        no_adaptive: bool,
        /// Extra attempts per source after a connection or server error
        #[arg(long, default_value = "5")]
        retries: u32,
        /// Harvesting rounds to run in this process (0 = until interrupted)
        #[arg(long, default_value = "1")]
        rounds: u64,
        /// Seconds to wait between rounds
        #[arg(long, default_value = "600")]
        interval: u64,
    },
    /// Extract configs from a local file
    Extract {
        /// Input file containing raw text
        input: PathBuf,
        /// Output file for extracted configs
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            source,
            sources_file,
            output,
            stats,
            mmdb,
            concurrency,
            timeout,
            desired_total,
            max_power,
            no_adaptive,
            retries,
            rounds,
            interval,
        } => {
            let mut urls = source;
            if let Some(path) = sources_file {
                let listed = load_source_list(&path)
                    .with_context(|| format!("reading source list {}", path.display()))?;
                info!("Loaded {} sources from {}", listed.len(), path.display());
                urls.extend(listed);
            }
            if urls.is_empty() {
                urls = default_sources();
            }

            let config = Config::new()
                .with_output_path(output)
                .with_stats_path(Some(stats))
                .with_mmdb_path(mmdb)
                .with_concurrency(concurrency)
                .with_timeout(Duration::from_secs(timeout))
                .with_retries(retries, RETRY_DELAY)
                .with_scoring(
                    ScoringConfig::new()
                        .with_desired_total(desired_total)
                        .with_max_power(max_power)
                        .with_adaptive_limits(!no_adaptive),
                );

            let registry = config.build_registry(&urls);
            let transport = HttpTransport::with_config(&config.crawler_config())?;
            let mut harvester = config.build_harvester(registry, transport);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, abandoning in-flight fetches");
                    on_signal.cancel();
                }
            });

            let rounds = (rounds > 0).then_some(rounds);
            let outcome = harvester
                .run_rounds(rounds, Duration::from_secs(interval), &cancel)
                .await?;
            match outcome {
                RunOutcome::NoSources => {
                    println!("No usable sources; wrote empty {}", config.output_path.display());
                }
                RunOutcome::Exhausted { records } => {
                    println!(
                        "Saved {} configs to {}; every source is now disabled",
                        records.len(),
                        config.output_path.display(),
                    );
                }
                RunOutcome::Completed { records } => {
                    println!(
                        "Saved {} configs to {} ({} of {} sources still enabled)",
                        records.len(),
                        config.output_path.display(),
                        harvester.registry().enabled_count(),
                        harvester.registry().len(),
                    );
                }
            }
        }
        Commands::Extract { input, output } => {
            let catalog = ProtocolCatalog::default();
            let extraction = ConfigParser::new(&catalog)
                .parse_file(&input)
                .with_context(|| format!("reading {}", input.display()))?;

            println!(
                "Extracted {} configs from {} lines of {:?}",
                extraction.records.len(),
                extraction.lines_examined,
                input
            );

            let lines: Vec<&str> = extraction.records.iter().map(|(_, c)| c.as_str()).collect();
            if let Some(output_path) = output {
                std::fs::write(&output_path, lines.join("\n"))?;
                println!("Saved extracted configs to {:?}", output_path);
            } else {
                for line in lines {
                    println!("{}", line);
                }
            }
        }
    }

    Ok(())
}
