use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use crate::database::Database;
use crate::export;
use crate::models::CheckSummary;
use crate::probe::{ProbeFailure, StockProber, StockReport};

/// Pause between successive product probes, so batch runs stay gentle on the
/// storefront
const BATCH_PAUSE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct StockWatcher {
    database: Database,
    prober: StockProber,
}

impl StockWatcher {
    pub fn new(database: Database, prober: StockProber) -> Self {
        Self { database, prober }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub async fn probe_url(&self, url: &str) -> Result<StockReport, ProbeFailure> {
        self.prober.check_product(url).await
    }

    /// Probes every tracked product in sequence.
    ///
    /// Snapshots are persisted only when `persist` is set (scheduled runs);
    /// manual checks report results without touching history. One product's
    /// failure never stops the rest of the batch.
    pub async fn check_all(&self, persist: bool) -> Result<Vec<CheckSummary>> {
        let products = self.database.list_products().await?;
        let mut summaries = Vec::with_capacity(products.len());

        for (index, product) in products.iter().enumerate() {
            info!(
                current = index + 1,
                total = products.len(),
                name = %product.name,
                "checking product"
            );

            match self.prober.check_product(&product.url).await {
                Ok(report) => {
                    let name = report.title.clone().unwrap_or_else(|| product.name.clone());
                    let category = report
                        .category
                        .clone()
                        .unwrap_or_else(|| product.category.clone());
                    if name != product.name || category != product.category {
                        self.database
                            .upsert_product(&product.url, &name, &category)
                            .await?;
                    }
                    if persist {
                        self.database
                            .record_stock(product.id, i64::from(report.max_stock))
                            .await?;
                    }

                    info!(name = %name, stock = report.max_stock, "check succeeded");
                    summaries.push(CheckSummary {
                        name,
                        stock: Some(report.max_stock),
                        error: None,
                    });
                }
                Err(failure) => {
                    error!(url = %product.url, error = %failure, "check failed");
                    summaries.push(CheckSummary {
                        name: product.name.clone(),
                        stock: None,
                        error: Some(failure.reason.to_string()),
                    });
                }
            }

            if index + 1 < products.len() {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        Ok(summaries)
    }

    /// Scheduled daily run: persists snapshots and rewrites the report file.
    pub async fn run_scheduled_check(&self, export_path: &Path) -> Result<()> {
        let summaries = self.check_all(true).await?;
        let (dates, histories) = self.database.history().await?;
        export::write_history_csv(export_path, &dates, &histories)?;

        info!(
            products = summaries.len(),
            report = %export_path.display(),
            "scheduled check complete"
        );
        Ok(())
    }

    /// True when the stored `HH:MM` schedule matches the given local time.
    pub async fn schedule_due(&self, now: &chrono::DateTime<chrono::Local>) -> Result<bool> {
        match self.database.schedule_time().await? {
            Some(time) => Ok(now.format("%H:%M").to_string() == time),
            None => Ok(false),
        }
    }
}
