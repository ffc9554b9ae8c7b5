use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

mod cart;
mod database;
mod enrich;
mod export;
mod models;
mod probe;
mod session;
mod telegram;
mod watcher;

use database::Database;
use probe::{ProbeConfig, StockProber};
use telegram::StockBot;
use watcher::StockWatcher;

const DEFAULT_DATABASE_URL: &str = "sqlite:rozetka_stock.db";

/// Discovers the real stock of Rozetka products through the cart
/// quantity-validation side channel
#[derive(Parser)]
#[command(name = "rozetka-stock-checker", version)]
struct Cli {
    /// Product URLs to check once
    urls: Vec<String>,

    /// File with one product URL per line (lines starting with # are skipped)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Seconds to wait between quantity trials
    #[arg(long, default_value_t = 0.7)]
    delay: f64,

    /// Assumed ceiling on any product's stock
    #[arg(long, default_value_t = probe::DEFAULT_UPPER_BOUND)]
    upper_bound: u32,

    /// Trial budget for one product's search
    #[arg(long, default_value_t = probe::DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// SQLite database URL (falls back to DATABASE_URL)
    #[arg(long)]
    database: Option<String>,

    /// Path of the CSV stock-history report
    #[arg(long, default_value = "rozetka_stock_history.csv")]
    export: PathBuf,

    /// Run the Telegram bot with the daily scheduler (needs BOT_TOKEN)
    #[arg(long)]
    bot: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    info!("Starting Rozetka stock checker");

    let config = ProbeConfig {
        upper_bound: cli.upper_bound,
        max_attempts: cli.max_attempts,
        trial_delay: Duration::from_secs_f64(cli.delay),
        ..ProbeConfig::default()
    };

    let database_url = cli
        .database
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    let database = Database::new(&database_url).await?;
    let watcher = StockWatcher::new(database, StockProber::new(config));

    if cli.bot {
        run_bot(watcher, cli.export).await
    } else {
        run_batch(&watcher, &cli).await
    }
}

/// One-shot mode: probe the given URLs, merge them into the store and
/// rewrite the report.
async fn run_batch(watcher: &StockWatcher, cli: &Cli) -> Result<()> {
    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.file {
        urls.extend(read_url_file(path)?);
    }
    if urls.is_empty() {
        bail!("no product URLs given; pass URLs, --file, or run with --bot");
    }

    info!(count = urls.len(), "starting batch stock check");
    let mut succeeded = 0;

    for (index, url) in urls.iter().enumerate() {
        match watcher.probe_url(url).await {
            Ok(report) => {
                succeeded += 1;
                let name = report.title.clone().unwrap_or_default();
                let category = report.category.clone().unwrap_or_default();

                let database = watcher.database();
                database.upsert_product(&report.url, &name, &category).await?;
                if let Some(id) = database.product_id_by_url(&report.url).await? {
                    database.record_stock(id, i64::from(report.max_stock)).await?;
                }

                info!(
                    name = %name,
                    product_id = report.product_id,
                    stock = report.max_stock,
                    exact = report.exact,
                    url = %report.url,
                    "probe succeeded"
                );
            }
            Err(failure) => {
                error!(product_id = ?failure.product_id, error = %failure, "probe failed");
            }
        }

        if index + 1 < urls.len() {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    let (dates, histories) = watcher.database().history().await?;
    export::write_history_csv(&cli.export, &dates, &histories)?;

    info!(
        succeeded,
        total = urls.len(),
        report = %cli.export.display(),
        "batch check finished"
    );
    Ok(())
}

/// Bot mode: minute-tick scheduler for the daily check plus the long-polling
/// Telegram front end.
async fn run_bot(watcher: StockWatcher, export_path: PathBuf) -> Result<()> {
    let token = std::env::var("BOT_TOKEN")
        .map_err(|_| anyhow::anyhow!("BOT_TOKEN must be set to run the Telegram bot"))?;

    let sched = JobScheduler::new().await?;
    let job_watcher = watcher.clone();
    let job_export = export_path.clone();
    sched
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let watcher = job_watcher.clone();
            let export_path = job_export.clone();
            Box::pin(async move {
                match watcher.schedule_due(&chrono::Local::now()).await {
                    Ok(true) => {
                        info!("scheduled stock check starting");
                        if let Err(e) = watcher.run_scheduled_check(&export_path).await {
                            error!("scheduled check failed: {}", e);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => error!("could not read the schedule: {}", e),
                }
            })
        })?)
        .await?;
    sched.start().await?;
    info!("Scheduler started - comparing the schedule every minute");

    let bot = StockBot::new(&token, watcher, export_path);
    bot.run().await
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn url_file_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# watch list").unwrap();
        writeln!(file, "https://rozetka.com.ua/a/p1/").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  https://rozetka.com.ua/b/p2/  ").unwrap();

        let urls = read_url_file(file.path()).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://rozetka.com.ua/a/p1/".to_string(),
                "https://rozetka.com.ua/b/p2/".to_string(),
            ]
        );
    }
}
