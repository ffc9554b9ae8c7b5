//! Data models for probe targets, stock records and wire payloads

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PRODUCT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/p(\d+)/").expect("valid product id pattern"));

/// A probe target, identified by the numeric id embedded in its product URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReference {
    pub product_id: i64,
    pub source_url: String,
}

impl ProductReference {
    /// Extracts the product id from a canonical product URL.
    ///
    /// Returns `None` when the URL does not carry the `/p<digits>/` segment,
    /// in which case no probe is attempted.
    pub fn parse(url: &str) -> Option<Self> {
        let captures = PRODUCT_ID_RE.captures(url)?;
        let product_id = captures.get(1)?.as_str().parse().ok()?;

        Some(Self {
            product_id,
            source_url: url.to_string(),
        })
    }
}

/// Best-effort product metadata scraped around a successful probe
#[derive(Debug, Clone, Default)]
pub struct ProductMeta {
    pub title: Option<String>,
    pub category: Option<String>,
}

/// A tracked product as stored in the database, with its latest snapshot
#[derive(Debug, Clone)]
pub struct TrackedProduct {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub category: String,
    pub last_stock: Option<i64>,
    pub last_check: Option<String>,
}

/// Full stock history of one product, keyed by check date (`YYYY-MM-DD`)
#[derive(Debug, Clone)]
pub struct ProductHistory {
    pub name: String,
    pub url: String,
    pub category: String,
    pub counts: BTreeMap<String, i64>,
}

/// Per-product outcome of a batch check, for user-facing summaries
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub name: String,
    pub stock: Option<u32>,
    pub error: Option<String>,
}

/// Response payload shared by the cart `add` and `edit-quantity` endpoints.
///
/// The `add` response carries the cart lines under `purchases.goods`; the
/// `edit-quantity` response carries only `error_messages` when the requested
/// quantity was rejected. Fields absent from a given response default to
/// empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartPayload {
    #[serde(default)]
    pub purchases: Purchases,
    #[serde(default)]
    pub error_messages: Vec<ApiErrorMessage>,
}

/// The cart-line container nested in the `add` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Purchases {
    #[serde(default)]
    pub goods: Vec<CartLine>,
}

/// One cart line: the opaque line id plus the product it binds
#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub id: i64,
    pub goods: GoodsInfo,
}

/// Product fields embedded in a cart line
#[derive(Debug, Clone, Deserialize)]
pub struct GoodsInfo {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A structured error entry from the cart API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorMessage {
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Request line for the cart `add` endpoint
#[derive(Debug, Serialize)]
pub struct AddItemRequest {
    pub goods_id: i64,
    pub quantity: u32,
}

/// Request line for the cart `edit-quantity` endpoint
#[derive(Debug, Serialize)]
pub struct EditQuantityRequest {
    pub purchase_id: i64,
    pub quantity: u32,
}

/// Telegram `getUpdates` response envelope
#[derive(Debug, Deserialize)]
pub struct UpdatesResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Vec<TelegramUpdate>,
}

/// One long-polled Telegram update
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

/// An incoming Telegram message
#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    pub text: Option<String>,
}

/// The chat an incoming message belongs to
#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Outgoing `sendMessage` payload
#[derive(Debug, Serialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_product_id_from_canonical_url() {
        let reference =
            ProductReference::parse("https://rozetka.com.ua/ua/apple-iphone-15/p395460480/")
                .expect("reference should parse");

        assert_eq!(reference.product_id, 395_460_480);
        assert!(reference.source_url.contains("p395460480"));
    }

    #[test]
    fn rejects_url_without_product_segment() {
        assert!(ProductReference::parse("https://rozetka.com.ua/ua/notebooks/c80004/").is_none());
        assert!(ProductReference::parse("not a url at all").is_none());
    }

    #[test]
    fn rejects_bare_digits_outside_pattern() {
        assert!(ProductReference::parse("https://rozetka.com.ua/12345/").is_none());
    }

    #[test]
    fn cart_payload_defaults_missing_sections() {
        let payload: CartPayload = serde_json::from_str("{}").expect("empty object parses");

        assert!(payload.purchases.goods.is_empty());
        assert!(payload.error_messages.is_empty());
    }

    #[test]
    fn cart_payload_parses_add_response() {
        let body = r#"{
            "purchases": {
                "goods": [
                    {"id": 777001, "goods": {"id": 555, "title": "Widget", "category_id": 80004}}
                ]
            }
        }"#;

        let payload: CartPayload = serde_json::from_str(body).expect("add response parses");
        let line = &payload.purchases.goods[0];

        assert_eq!(line.id, 777_001);
        assert_eq!(line.goods.id, 555);
        assert_eq!(line.goods.title.as_deref(), Some("Widget"));
        assert_eq!(line.goods.category_id, Some(80_004));
    }
}
