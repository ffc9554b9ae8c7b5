//! # Telegram Bot Front End
//!
//! Long-polling Telegram interface for managing the tracked product set and
//! triggering checks, built directly on the Bot HTTP API (`getUpdates`,
//! `sendMessage`, `sendDocument`) with reqwest and serde payloads.
//!
//! ## Commands
//!
//! - `/add` — prompt for a product URL, probe it immediately, start tracking
//! - `/list` — tracked products with their latest recorded stock
//! - `/remove <n>` — stop tracking the n-th listed product
//! - `/check` — probe everything now; results are shown but NOT saved (only
//!   scheduled checks write history)
//! - `/schedule HH:MM` — set the daily automatic check time
//! - `/export` — receive the stock-history report as a CSV document
//! - `/start`, `/help` — usage
//!
//! ## Conversation state
//!
//! `/add` and a bare `/schedule` put the chat into a one-shot prompt state
//! (awaiting a URL or a time); the next plain message in that chat is
//! consumed as the answer. There is no other session state.
//!
//! ## Configuration
//!
//! `BOT_TOKEN` must carry the token from `@BotFather`. Messages use HTML
//! parse mode and are chunked below Telegram's 4096-character limit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::{error, info, warn};

use crate::export;
use crate::models::{CheckSummary, OutgoingMessage, TelegramUpdate, TrackedProduct, UpdatesResponse};
use crate::watcher::StockWatcher;

/// Telegram rejects messages above 4096 characters; stay safely below
const MESSAGE_CHUNK_LIMIT: usize = 4000;
/// Long-poll duration for `getUpdates`
const POLL_TIMEOUT_SECS: u64 = 30;

static ROZETKA_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^\s]*rozetka\.com\.ua/").expect("valid storefront url pattern")
});
static SCHEDULE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid schedule pattern"));

const HELP_TEXT: &str = "🛒 <b>Rozetka stock checker</b>\n\n\
    /add - track a new product\n\
    /list - tracked products\n\
    /remove &lt;n&gt; - stop tracking product n\n\
    /check - probe everything now (not saved to history)\n\
    /schedule HH:MM - daily automatic check time\n\
    /export - stock history as CSV\n\
    /help - this message";

/// What the next plain message in a chat will be consumed as
enum Pending {
    ProductUrl,
    ScheduleTime,
}

/// Thin client for the handful of Bot API methods the bot needs
struct BotApi {
    client: Client,
    base_url: String,
}

impl BotApi {
    fn new(token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("https://api.telegram.org/bot{token}"),
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let response = self
            .client
            .get(format!("{}/getUpdates", self.base_url))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?;

        let payload: UpdatesResponse = response.json().await?;
        if !payload.ok {
            bail!("getUpdates answered ok=false");
        }
        Ok(payload.result)
    }

    /// Sends a message, chunked below the API limit. Delivery problems are
    /// logged rather than propagated, the way notification failures should
    /// never take the bot down.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in chunk_text(text, MESSAGE_CHUNK_LIMIT) {
            let message = OutgoingMessage {
                chat_id,
                text: chunk,
                parse_mode: "HTML",
            };
            let response = self
                .client
                .post(format!("{}/sendMessage", self.base_url))
                .json(&message)
                .send()
                .await?;

            if !response.status().is_success() {
                error!(status = %response.status(), "sendMessage rejected");
            }
        }

        Ok(())
    }

    async fn send_document(&self, chat_id: i64, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.csv".to_string());

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(format!("{}/sendDocument", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("sendDocument rejected with status {}", response.status());
        }
        Ok(())
    }
}

pub struct StockBot {
    api: BotApi,
    watcher: StockWatcher,
    export_path: PathBuf,
    pending: HashMap<i64, Pending>,
}

impl StockBot {
    pub fn new(token: &str, watcher: StockWatcher, export_path: PathBuf) -> Self {
        Self {
            api: BotApi::new(token),
            watcher,
            export_path,
            pending: HashMap::new(),
        }
    }

    /// Long-polls updates forever, handling one command at a time.
    pub async fn run(mut self) -> Result<()> {
        info!("Telegram bot started");
        let mut offset = 0i64;

        loop {
            match self.api.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(message) = update.message else { continue };
                        let Some(text) = message.text else { continue };

                        if let Err(error) = self.handle_message(message.chat.id, text.trim()).await
                        {
                            error!(%error, "failed to handle message");
                            let _ = self
                                .api
                                .send_message(message.chat.id, "❌ Something went wrong, see the logs")
                                .await;
                        }
                    }
                }
                Err(error) => {
                    warn!(%error, "getUpdates failed, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn handle_message(&mut self, chat_id: i64, text: &str) -> Result<()> {
        let (command, argument) = split_command(text);

        match command {
            "/start" | "/help" => self.api.send_message(chat_id, HELP_TEXT).await,
            "/add" => {
                self.pending.insert(chat_id, Pending::ProductUrl);
                self.api
                    .send_message(chat_id, "🔗 Send the Rozetka product URL to track")
                    .await
            }
            "/list" => self.cmd_list(chat_id).await,
            "/remove" => self.cmd_remove(chat_id, argument).await,
            "/check" => self.cmd_check(chat_id).await,
            "/schedule" => self.cmd_schedule(chat_id, argument).await,
            "/export" => self.cmd_export(chat_id).await,
            _ if command.starts_with('/') => {
                self.api
                    .send_message(chat_id, "Unknown command, see /help")
                    .await
            }
            _ => self.handle_reply(chat_id, text).await,
        }
    }

    /// Plain text is only meaningful as the answer to a pending prompt.
    async fn handle_reply(&mut self, chat_id: i64, text: &str) -> Result<()> {
        match self.pending.remove(&chat_id) {
            Some(Pending::ProductUrl) => self.add_product(chat_id, text).await,
            Some(Pending::ScheduleTime) => self.set_schedule(chat_id, text).await,
            None => self.api.send_message(chat_id, "See /help for commands").await,
        }
    }

    async fn add_product(&mut self, chat_id: i64, url: &str) -> Result<()> {
        if !ROZETKA_URL_RE.is_match(url) {
            self.api
                .send_message(chat_id, "❌ That is not a rozetka.com.ua product link")
                .await?;
            return Ok(());
        }

        self.api
            .send_message(chat_id, "⏳ Probing the product, this can take a minute...")
            .await?;

        match self.watcher.probe_url(url).await {
            Ok(report) => {
                let name = report.title.clone().unwrap_or_default();
                let category = report.category.clone().unwrap_or_default();
                self.watcher
                    .database()
                    .upsert_product(&report.url, &name, &category)
                    .await?;

                let note = if report.exact {
                    String::new()
                } else {
                    "\n⚠️ Stock is a lower bound (trial budget ran out)".to_string()
                };
                let reply = format!(
                    "✅ Product added!\n\n📦 <b>{}</b>\n📂 Category: {}\n📊 Current stock: {}{}\n\n\
                     ℹ️ History is recorded by the scheduled daily check",
                    display_or_dash(&name),
                    display_or_dash(&category),
                    report.max_stock,
                    note
                );
                self.api.send_message(chat_id, &reply).await
            }
            Err(failure) => {
                self.api
                    .send_message(chat_id, &format!("❌ Probe failed: {}", failure.reason))
                    .await
            }
        }
    }

    async fn cmd_list(&self, chat_id: i64) -> Result<()> {
        let products = self.watcher.database().list_products().await?;
        if products.is_empty() {
            return self.api.send_message(chat_id, "📦 No products tracked yet").await;
        }

        self.api
            .send_message(chat_id, &format_product_list(&products))
            .await
    }

    async fn cmd_remove(&self, chat_id: i64, argument: &str) -> Result<()> {
        let products = self.watcher.database().list_products().await?;
        if products.is_empty() {
            return self
                .api
                .send_message(chat_id, "📦 Nothing to remove, the list is empty")
                .await;
        }

        let Ok(index) = argument.parse::<usize>() else {
            let text = format!(
                "{}\nReply with <code>/remove &lt;number&gt;</code>",
                format_product_list(&products)
            );
            return self.api.send_message(chat_id, &text).await;
        };

        let Some(product) = index.checked_sub(1).and_then(|i| products.get(i)) else {
            return self
                .api
                .send_message(chat_id, "❌ No product with that number, see /list")
                .await;
        };

        if self.watcher.database().remove_product(product.id).await? {
            self.api
                .send_message(
                    chat_id,
                    &format!("🗑 Removed <b>{}</b>", display_or_dash(&product.name)),
                )
                .await
        } else {
            self.api
                .send_message(chat_id, "❌ The product was already gone")
                .await
        }
    }

    async fn cmd_check(&self, chat_id: i64) -> Result<()> {
        self.api
            .send_message(chat_id, "🔍 Running a manual stock check...")
            .await?;

        let summaries = self.watcher.check_all(false).await?;
        if summaries.is_empty() {
            return self
                .api
                .send_message(chat_id, "✅ Done, but there are no products to check")
                .await;
        }

        self.api
            .send_message(chat_id, &format_check_report(&summaries))
            .await
    }

    async fn cmd_schedule(&mut self, chat_id: i64, argument: &str) -> Result<()> {
        if argument.is_empty() {
            self.pending.insert(chat_id, Pending::ScheduleTime);
            let current = self.watcher.database().schedule_time().await?;
            let text = match current {
                Some(time) => format!(
                    "🕐 Send the daily check time as HH:MM\n\n⏰ Currently set to {time}"
                ),
                None => "🕐 Send the daily check time as HH:MM".to_string(),
            };
            return self.api.send_message(chat_id, &text).await;
        }

        self.set_schedule(chat_id, argument).await
    }

    async fn set_schedule(&self, chat_id: i64, text: &str) -> Result<()> {
        match parse_schedule_time(text) {
            Some(time) => {
                self.watcher.database().set_schedule_time(&time).await?;
                self.api
                    .send_message(chat_id, &format!("✅ Daily check scheduled at {time}"))
                    .await
            }
            None => {
                self.api
                    .send_message(chat_id, "❌ Bad time format, use HH:MM (e.g. 09:30)")
                    .await
            }
        }
    }

    async fn cmd_export(&self, chat_id: i64) -> Result<()> {
        let (dates, histories) = self.watcher.database().history().await?;
        if histories.is_empty() {
            return self
                .api
                .send_message(chat_id, "❌ No products to export yet")
                .await;
        }

        self.api
            .send_message(chat_id, "📊 Building the report...")
            .await?;

        export::write_history_csv(&self.export_path, &dates, &histories)?;
        let caption = format!(
            "📋 Rozetka stock history\n📊 Products: {}\n📅 {}",
            histories.len(),
            chrono::Local::now().format("%d.%m.%Y %H:%M")
        );
        self.api
            .send_document(chat_id, &self.export_path, &caption)
            .await
    }
}

/// Splits `/command arg...` into the command (with any `@botname` suffix
/// stripped) and the rest of the line.
fn split_command(text: &str) -> (&str, &str) {
    let mut parts = text.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let argument = parts.next().unwrap_or("").trim();
    let command = command.split('@').next().unwrap_or(command);
    (command, argument)
}

/// Validates and normalizes a `HH:MM` schedule time.
fn parse_schedule_time(text: &str) -> Option<String> {
    let captures = SCHEDULE_TIME_RE.captures(text.trim())?;
    let hours: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: u32 = captures.get(2)?.as_str().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(format!("{hours:02}:{minutes:02}"))
}

fn format_product_list(products: &[TrackedProduct]) -> String {
    let mut text = String::from("📋 <b>Tracked products:</b>\n\n");
    for (index, product) in products.iter().enumerate() {
        let stock = product
            .last_stock
            .map(|count| count.to_string())
            .unwrap_or_else(|| "-".to_string());
        let checked = product.last_check.as_deref().unwrap_or("never");
        text.push_str(&format!(
            "{}. <b>{}</b>\n   📂 {}\n   📊 Stock: {} (checked {})\n   🔗 {}\n\n",
            index + 1,
            display_or_dash(&product.name),
            display_or_dash(&product.category),
            stock,
            checked,
            product.url
        ));
    }
    text
}

fn format_check_report(summaries: &[CheckSummary]) -> String {
    let mut text = String::from("✅ <b>Manual check finished</b>\n\n");
    for summary in summaries {
        match (summary.stock, &summary.error) {
            (Some(stock), _) => {
                text.push_str(&format!(
                    "📦 <b>{}</b>: {stock}\n",
                    display_or_dash(&summary.name)
                ));
            }
            (None, error) => {
                text.push_str(&format!(
                    "❌ <b>{}</b>: {}\n",
                    display_or_dash(&summary.name),
                    error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }
    text.push_str("\nℹ️ <i>Manual results are not saved to history</i>");
    text
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Splits on char boundaries into pieces below `limit` characters.
fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if current.chars().count() == limit {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_command_and_argument() {
        assert_eq!(split_command("/remove 3"), ("/remove", "3"));
        assert_eq!(split_command("/check"), ("/check", ""));
        assert_eq!(split_command("/schedule   09:30"), ("/schedule", "09:30"));
    }

    #[test]
    fn strips_bot_name_suffix() {
        assert_eq!(split_command("/list@rozetka_stock_bot"), ("/list", ""));
    }

    #[test]
    fn accepts_and_normalizes_schedule_times() {
        assert_eq!(parse_schedule_time("09:30").as_deref(), Some("09:30"));
        assert_eq!(parse_schedule_time("9:05").as_deref(), Some("09:05"));
        assert_eq!(parse_schedule_time(" 23:59 ").as_deref(), Some("23:59"));
    }

    #[test]
    fn rejects_malformed_schedule_times() {
        assert_eq!(parse_schedule_time("24:00"), None);
        assert_eq!(parse_schedule_time("12:60"), None);
        assert_eq!(parse_schedule_time("noon"), None);
        assert_eq!(parse_schedule_time("12-30"), None);
    }

    #[test]
    fn recognizes_storefront_urls() {
        assert!(ROZETKA_URL_RE.is_match("https://rozetka.com.ua/ua/widget/p123/"));
        assert!(ROZETKA_URL_RE.is_match("http://hard.rozetka.com.ua/widget/p123/"));
        assert!(!ROZETKA_URL_RE.is_match("https://example.com/widget/p123/"));
    }

    #[test]
    fn chunks_long_text_on_char_boundaries() {
        let text = "абв".repeat(10);
        let chunks = chunk_text(&text, 7);

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("hello", 4000), vec!["hello".to_string()]);
        assert_eq!(chunk_text("", 4000), vec![String::new()]);
    }
}
