use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use meter_billing::aggregator::{BillingRequest, BillingRunProcessor};
use meter_billing::config::BillingConfig;
use meter_billing::domain::{BillingPeriod, InvoiceId, LocationId};
use meter_billing::error::BillingError;
use meter_billing::logging;
use meter_billing::rates::{ExchangeRateSet, HttpRateSource, RateCache, RateCacheConfig};
use meter_billing::storage::{
    self, InvoiceRepository, SqlDeviceRepository, SqlInvoiceRepository, SqlReadingRepository,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "meter-billing")]
#[command(about = "Metered-usage billing for rented print devices")]
struct Args {
    #[arg(short, long, global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Generate sample configuration file")]
    gen_config: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Show the exchange rates a billing run would use
    Rates {
        #[arg(long, help = "Bypass the cache and query the rate source")]
        refresh: bool,
    },

    /// Bill one location for an inclusive date range
    Run {
        #[arg(long)]
        location: String,

        #[arg(long, help = "First day of the period (YYYY-MM-DD)")]
        from: NaiveDate,

        #[arg(long, help = "Last day of the period (YYYY-MM-DD)")]
        to: NaiveDate,

        #[arg(long, help = "Force a fresh exchange rate fetch")]
        refresh_rates: bool,

        #[arg(long, help = "Compute the invoice without persisting it")]
        dry_run: bool,
    },

    /// Print a stored invoice and its document projection
    ShowInvoice {
        #[arg(long)]
        id: InvoiceId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.gen_config {
        let config = BillingConfig::default();
        let toml = toml::to_string_pretty(&config)?;
        println!("{}", toml);
        return Ok(());
    }

    let config = BillingConfig::load(args.config)?;
    logging::init_logging(&args.verbosity, &config.logging)?;

    let Some(command) = args.command else {
        info!("Configuration validated, no command given");
        return Ok(());
    };

    match command {
        Command::Migrate => {
            info!("Running database migrations");
            storage::connect(&config.database).await?;
            info!("Migrations completed successfully");
        }
        Command::Rates { refresh } => {
            let cache = rate_cache(&config)?;
            let snapshot = cache.get_rates(refresh).await;
            let output = json!({
                "provenance": snapshot.provenance,
                "rates": snapshot.rates.as_ref(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Run {
            location,
            from,
            to,
            refresh_rates,
            dry_run,
        } => {
            let period = BillingPeriod::new(from, to)?;
            let pool = storage::connect(&config.database).await?;

            let processor = BillingRunProcessor::new(
                Arc::new(SqlDeviceRepository::new(pool.clone())),
                Arc::new(SqlReadingRepository::new(pool.clone())),
                Arc::new(SqlInvoiceRepository::new(pool)),
                Arc::new(rate_cache(&config)?),
            );

            let report = processor
                .run(BillingRequest {
                    location_id: LocationId::new(location),
                    period,
                    force_refresh_rates: refresh_rates,
                    dry_run,
                })
                .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::ShowInvoice { id } => {
            let pool = storage::connect(&config.database).await?;
            let invoice = SqlInvoiceRepository::new(pool)
                .get_invoice(&id)
                .await?
                .ok_or_else(|| BillingError::InvoiceNotFound { id: id.to_string() })?;

            let projection = invoice.projection();
            let output = json!({
                "invoice": invoice,
                "projection": projection,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn rate_cache(config: &BillingConfig) -> Result<RateCache> {
    let source = HttpRateSource::new(&config.rates.source_url, config.rates.request_timeout())
        .context("Failed to build exchange rate client")?;
    let fallback = ExchangeRateSet::from_codes(&config.rates.fallback)
        .context("Invalid fallback exchange rates")?;

    Ok(RateCache::new(
        Arc::new(source),
        RateCacheConfig::from(&config.rates),
        fallback,
    ))
}
