use std::collections::BTreeMap;

use anyhow::Result;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::info;

use crate::models::{ProductHistory, TrackedProduct};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database file");
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;

        // Run migrations
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(Self::with_pool(pool))
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Adds a product or refreshes its name/category, keeping its row id (and
    /// therefore its stock history) stable.
    pub async fn upsert_product(&self, url: &str, name: &str, category: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO products (url, name, category)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET name = excluded.name, category = excluded.category
            ",
        )
        .bind(url)
        .bind(name)
        .bind(category)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn product_id_by_url(&self, url: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM products WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get::<i64, _>("id")))
    }

    /// Records today's stock snapshot for a product; at most one snapshot per
    /// product per day, later checks overwrite earlier ones.
    pub async fn record_stock(&self, product_id: i64, stock_count: i64) -> Result<()> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();

        sqlx::query(
            r"
            INSERT OR REPLACE INTO stock_history (product_id, check_date, stock_count)
            VALUES (?, ?, ?)
            ",
        )
        .bind(product_id)
        .bind(&today)
        .bind(stock_count)
        .execute(&self.pool)
        .await?;

        info!(product_id, stock_count, "stock snapshot recorded");
        Ok(())
    }

    /// All tracked products with their most recent snapshot, if any.
    pub async fn list_products(&self) -> Result<Vec<TrackedProduct>> {
        let rows = sqlx::query(
            r"
            SELECT p.id, p.url, p.name, p.category,
                (SELECT stock_count FROM stock_history sh
                    WHERE sh.product_id = p.id
                    ORDER BY sh.check_date DESC LIMIT 1) AS last_stock,
                (SELECT check_date FROM stock_history sh
                    WHERE sh.product_id = p.id
                    ORDER BY sh.check_date DESC LIMIT 1) AS last_check
            FROM products p
            ORDER BY p.name
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let products = rows
            .into_iter()
            .map(|row| TrackedProduct {
                id: row.get("id"),
                url: row.get("url"),
                name: row.get::<Option<String>, _>("name").unwrap_or_default(),
                category: row.get::<Option<String>, _>("category").unwrap_or_default(),
                last_stock: row.get("last_stock"),
                last_check: row.get("last_check"),
            })
            .collect();

        Ok(products)
    }

    /// Removes a product and its whole snapshot history.
    pub async fn remove_product(&self, id: i64) -> Result<bool> {
        sqlx::query("DELETE FROM stock_history WHERE product_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The full history matrix: every check date ever recorded, and per
    /// product the date -> count mapping, for the report exporter.
    pub async fn history(&self) -> Result<(Vec<String>, Vec<ProductHistory>)> {
        let date_rows =
            sqlx::query("SELECT DISTINCT check_date FROM stock_history ORDER BY check_date")
                .fetch_all(&self.pool)
                .await?;
        let dates = date_rows
            .into_iter()
            .map(|row| row.get::<String, _>("check_date"))
            .collect();

        let product_rows =
            sqlx::query("SELECT id, name, url, category FROM products ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        let mut histories = Vec::with_capacity(product_rows.len());
        for row in product_rows {
            let product_id: i64 = row.get("id");
            let snapshot_rows = sqlx::query(
                r"
                SELECT check_date, stock_count
                FROM stock_history
                WHERE product_id = ?
                ORDER BY check_date
                ",
            )
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;

            let counts: BTreeMap<String, i64> = snapshot_rows
                .into_iter()
                .map(|row| (row.get("check_date"), row.get("stock_count")))
                .collect();

            histories.push(ProductHistory {
                name: row.get::<Option<String>, _>("name").unwrap_or_default(),
                url: row.get("url"),
                category: row.get::<Option<String>, _>("category").unwrap_or_default(),
                counts,
            });
        }

        Ok((dates, histories))
    }

    pub async fn schedule_time(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = 'schedule_time'")
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| row.get::<Option<String>, _>("value")))
    }

    pub async fn set_schedule_time(&self, time: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('schedule_time', ?)")
            .bind(time)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
