use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod forecast;
mod loader;
mod models;
mod rank;
mod report;
mod series;
mod trend;

use config::{PipelineConfig, DEFAULT_FIT_TIMEOUT_MS, DEFAULT_HORIZON_DAYS, DEFAULT_SOURCE};
use loader::{DatasetCache, DatasetSource};

pub const LOG_TARGET: &str = "vaccination-forecast";

#[derive(Parser)]
#[command(name = "vaccination-forecast")]
#[command(about = "Explore vaccination history and forecast daily doses per country", long_about = None)]
struct Cli {
    /// CSV source, either an http(s) URL or a local path.
    #[arg(long, short, env = "VAX_SOURCE", default_value = DEFAULT_SOURCE, global = true)]
    source: String,

    /// Logging filter, e.g. `debug` or `vaccination-forecast=trace`.
    #[arg(long, short, default_value = "info", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ForecastArgs {
    #[arg(long, env = "VAX_HORIZON_DAYS", default_value_t = DEFAULT_HORIZON_DAYS)]
    horizon_days: usize,
    /// Worker threads, 0 for one per CPU.
    #[arg(long, env = "VAX_JOBS", default_value_t = 0)]
    jobs: usize,
    #[arg(long, env = "VAX_FIT_TIMEOUT_MS", default_value_t = DEFAULT_FIT_TIMEOUT_MS)]
    fit_timeout_ms: u64,
}

impl ForecastArgs {
    fn config(&self) -> anyhow::Result<PipelineConfig> {
        let config = PipelineConfig::default()
            .with_horizon_days(self.horizon_days)
            .with_jobs(self.jobs)
            .with_fit_timeout(Duration::from_millis(self.fit_timeout_ms));
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the dataset shape and the available entities
    Entities,
    /// Headline totals for one entity
    Metrics {
        #[arg(long)]
        entity: String,
    },
    /// Print the observed daily series of one entity
    History {
        #[arg(long)]
        entity: String,
    },
    /// Forecast one entity
    Forecast {
        #[arg(long)]
        entity: String,
        #[command(flatten)]
        args: ForecastArgs,
        #[arg(long)]
        json: bool,
    },
    /// Rank entities by predicted doses over the horizon
    Rank {
        #[arg(long = "entity", required = true)]
        entities: Vec<String>,
        #[command(flatten)]
        args: ForecastArgs,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long = "entity", required = true)]
        entities: Vec<String>,
        #[command(flatten)]
        args: ForecastArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::from_default_env().add_directive(
        cli.log
            .parse()
            .with_context(|| format!("invalid log directive `{}`", cli.log))?,
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cache = DatasetCache::new();
    let source = DatasetSource::parse(&cli.source);
    let dataset = cache
        .get_or_load(&source)
        .await
        .context("failed to load the vaccination dataset")?;
    log::debug!(target: LOG_TARGET, "{} source(s) cached", cache.cached_sources());

    match cli.command {
        Commands::Entities => {
            if dataset.is_empty() {
                log::warn!(target: LOG_TARGET, "{} has no rows", dataset.source());
            }
            let entities = dataset.entities();
            println!(
                "Loaded {} rows x {} columns from {}.",
                dataset.len(),
                dataset.column_count(),
                dataset.source()
            );
            for record in dataset.head(5) {
                println!(
                    "  {} {} daily={} total={}",
                    record.entity_id,
                    record.date,
                    report::format_count(record.daily_count),
                    report::format_count(record.cumulative_total)
                );
            }
            println!("{} entities:", entities.len());
            for entity in entities {
                println!("- {entity}");
            }
        }
        Commands::Metrics { entity } => {
            let metrics = dataset.headline_metrics(&entity);
            println!("{}:", metrics.entity_id);
            println!("  total doses: {}", report::format_count(metrics.max_cumulative_total));
            println!("  at least one dose: {}", report::format_count(metrics.max_people_partial));
            println!("  fully vaccinated: {}", report::format_count(metrics.max_people_full));
        }
        Commands::History { entity } => {
            let observed = series::observed_series(&dataset, &entity);
            if observed.is_empty() {
                log::warn!(target: LOG_TARGET, "no daily counts recorded for {entity}");
                return Ok(());
            }
            println!("date,value");
            for point in &observed.points {
                println!("{},{}", point.date, point.value);
            }
        }
        Commands::Forecast { entity, args, json } => {
            let config = args.config()?;
            let result = match rank::forecast_entity(&dataset, &entity, &config) {
                Ok(result) => result,
                Err(e) if !e.is_fatal() => {
                    log::warn!(target: LOG_TARGET, "{e}");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!(
                "{} over the next {} days: {:.0} doses, trend {}",
                entity, config.horizon_days, result.summary.total_predicted_over_horizon, result.summary.trend_label
            );
            println!(
                "fitted on {} days, {} trimmed above {:.0}",
                result.cleaned.len(),
                result.cleaned.removed,
                result.cleaned.threshold
            );
            println!("date,point_estimate,lower_bound,upper_bound");
            for point in result.forecast.horizon() {
                println!(
                    "{},{:.0},{:.0},{:.0}",
                    point.date, point.point_estimate, point.lower_bound, point.upper_bound
                );
            }
        }
        Commands::Rank {
            entities,
            args,
            json,
        } => {
            let config = args.config()?;
            let ranking = rank::rank_entities(&dataset, &entities, &config)?;
            if let Some(warning) = ranking.empty_warning() {
                log::warn!(target: LOG_TARGET, "{warning}");
                return Ok(());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&ranking.table)?);
                return Ok(());
            }

            println!("Predicted doses over the next {} days:", config.horizon_days);
            for (position, row) in ranking.table.rows.iter().enumerate() {
                println!(
                    "{}. {} {:.0} ({})",
                    position + 1,
                    row.entity_id,
                    row.total_predicted_over_horizon,
                    row.trend_label
                );
            }
        }
        Commands::Report {
            entities,
            args,
            out,
        } => {
            let config = args.config()?;
            let ranking = rank::rank_entities(&dataset, &entities, &config)?;
            if let Some(warning) = ranking.empty_warning() {
                log::warn!(target: LOG_TARGET, "{warning}");
            }

            let metrics: Vec<_> = entities
                .iter()
                .map(|entity| dataset.headline_metrics(entity))
                .collect();
            let report = report::build_report(dataset.source(), config.horizon_days, &metrics, &ranking);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
