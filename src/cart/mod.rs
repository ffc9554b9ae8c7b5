//! Cart channel: the three cart operations and response classification

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{AddItemRequest, CartPayload, EditQuantityRequest};
use crate::session::Session;

/// Error code the storefront returns when the requested quantity exceeds stock
pub const INSUFFICIENT_STOCK_CODE: i64 = 3002;

/// Endpoints and contract constants for one storefront
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub home_url: String,
    pub cart_api_base: String,
    pub api_query: String,
    pub csrf_cookie: String,
    pub insufficient_stock_code: i64,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            home_url: "https://rozetka.com.ua/".to_string(),
            cart_api_base: "https://uss.rozetka.com.ua/session/cart-se".to_string(),
            api_query: "country=UA&lang=ua".to_string(),
            csrf_cookie: "_uss-csrf".to_string(),
            insufficient_stock_code: INSUFFICIENT_STOCK_CODE,
        }
    }
}

impl StorefrontConfig {
    fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}?{}", self.cart_api_base, operation, self.api_query)
    }
}

/// Classified failure of a cart operation
#[derive(Debug, Error)]
pub enum CartError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("anti-forgery cookie `{cookie}` missing from the storefront response")]
    TokenUnavailable { cookie: String },

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("no cart line matched product {product_id}")]
    LineNotFound { product_id: i64 },

    #[error("quantity update attempted without a bound cart line")]
    MissingCartLine,

    #[error("invalid storefront configuration: {0}")]
    Config(String),
}

/// Outcome of one quantity trial, classified from the structured response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantityOutcome {
    /// The server accepted the requested quantity
    Accepted,
    /// The server rejected the quantity with the insufficient-stock code
    InsufficientStock,
    /// The server rejected the quantity for a reason outside the known
    /// contract; the search must stop rather than guess
    Rejected { code: Option<i64> },
}

/// The three cart operations for one product probe.
///
/// A channel owns its session exclusively; a fresh channel (or a reset)
/// starts from a blank cookie jar so no cart line leaks between products.
pub struct CartChannel {
    session: Session,
    config: StorefrontConfig,
}

impl CartChannel {
    /// Opens a channel with a fresh, blank session.
    pub fn open(config: StorefrontConfig) -> Result<Self, CartError> {
        let session = Session::new(&config)?;
        Ok(Self { session, config })
    }

    /// Drops all session state: token, cart line, cookies.
    pub fn reset(&mut self) -> Result<(), CartError> {
        self.session.reset(&self.config)
    }

    /// The session's HTTP client, for metadata fetches within the same probe.
    pub fn client(&self) -> &Client {
        self.session.client()
    }

    /// Empties the remote cart. Best-effort: a failed clear is logged and
    /// swallowed, since the following add is expected to succeed regardless.
    pub async fn clear_cart(&mut self) {
        let Some(token) = self.session.token().map(str::to_string) else {
            return;
        };

        match self.post("clear", &token, &serde_json::json!({})).await {
            Ok(response) if response.status().is_success() => debug!("cart cleared"),
            Ok(response) => warn!(status = %response.status(), "cart clear rejected"),
            Err(error) => warn!(%error, "cart clear failed"),
        }
    }

    /// Adds one unit of the product and binds the resulting cart line.
    ///
    /// The cart is cleared first so it holds exactly one line belonging to
    /// the product under test. The full response payload is returned for
    /// metadata enrichment.
    pub async fn add_to_cart(&mut self, product_id: i64) -> Result<CartPayload, CartError> {
        let token = self.session.ensure_token(&self.config).await?;
        self.clear_cart().await;

        let body = vec![AddItemRequest {
            goods_id: product_id,
            quantity: 1,
        }];
        let response = self.post("add", &token, &body).await?;
        if !response.status().is_success() {
            return Err(CartError::UnexpectedStatus(response.status()));
        }

        let payload: CartPayload = response.json().await?;
        match match_cart_line(&payload, product_id) {
            Some(line_id) => {
                self.session.bind_cart_line(line_id);
                debug!(product_id, line_id, "cart line bound");
                Ok(payload)
            }
            None => Err(CartError::LineNotFound { product_id }),
        }
    }

    /// Sets the bound cart line to the given quantity and classifies the
    /// structured response. Requires a previous successful add.
    pub async fn set_quantity(&mut self, quantity: u32) -> Result<QuantityOutcome, CartError> {
        let line_id = self.session.cart_line().ok_or(CartError::MissingCartLine)?;
        let token = self
            .session
            .token()
            .ok_or(CartError::MissingCartLine)?
            .to_string();

        let body = vec![EditQuantityRequest {
            purchase_id: line_id,
            quantity,
        }];
        let response = self.post("edit-quantity", &token, &body).await?;
        if !response.status().is_success() {
            return Err(CartError::UnexpectedStatus(response.status()));
        }

        let payload: CartPayload = response.json().await?;
        for entry in &payload.error_messages {
            debug!(quantity, code = ?entry.code, message = ?entry.message, "cart error entry");
        }

        Ok(classify_quantity_response(
            &payload,
            self.config.insufficient_stock_code,
        ))
    }

    async fn post<B: Serialize>(
        &self,
        operation: &str,
        token: &str,
        body: &B,
    ) -> Result<reqwest::Response, CartError> {
        let url = self.config.endpoint(operation);
        let response = self
            .session
            .client()
            .post(&url)
            .header("CSRF-Token", token)
            .json(body)
            .send()
            .await?;

        Ok(response)
    }
}

/// Finds the cart line the add response created for the requested product.
/// An echoed cart that does not contain the product means the add failed,
/// whatever the HTTP status said.
fn match_cart_line(payload: &CartPayload, product_id: i64) -> Option<i64> {
    payload
        .purchases
        .goods
        .iter()
        .find(|line| line.goods.id == product_id)
        .map(|line| line.id)
}

/// Maps the `error_messages` array onto the closed trial taxonomy: the
/// insufficient-stock code, a clean acceptance, or an unknown rejection.
///
/// Classification keys on the structured code, not the HTTP status: an entry
/// outside the known contract must stop the search instead of being guessed
/// into either bucket.
pub fn classify_quantity_response(payload: &CartPayload, insufficient_code: i64) -> QuantityOutcome {
    if payload
        .error_messages
        .iter()
        .any(|entry| entry.code == Some(insufficient_code))
    {
        return QuantityOutcome::InsufficientStock;
    }

    if payload.error_messages.is_empty() {
        QuantityOutcome::Accepted
    } else {
        QuantityOutcome::Rejected {
            code: payload.error_messages.first().and_then(|entry| entry.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str) -> CartPayload {
        serde_json::from_str(body).expect("payload parses")
    }

    #[test]
    fn empty_error_list_is_accepted() {
        let outcome = classify_quantity_response(&payload("{}"), INSUFFICIENT_STOCK_CODE);
        assert_eq!(outcome, QuantityOutcome::Accepted);
    }

    #[test]
    fn insufficient_stock_code_is_recognized() {
        let body = r#"{"error_messages": [{"code": 3002, "message": "not enough goods"}]}"#;
        let outcome = classify_quantity_response(&payload(body), INSUFFICIENT_STOCK_CODE);
        assert_eq!(outcome, QuantityOutcome::InsufficientStock);
    }

    #[test]
    fn insufficient_stock_wins_among_multiple_entries() {
        let body = r#"{"error_messages": [{"code": 1}, {"code": 3002}]}"#;
        let outcome = classify_quantity_response(&payload(body), INSUFFICIENT_STOCK_CODE);
        assert_eq!(outcome, QuantityOutcome::InsufficientStock);
    }

    #[test]
    fn foreign_error_code_is_rejected_not_guessed() {
        let body = r#"{"error_messages": [{"code": 1234}]}"#;
        let outcome = classify_quantity_response(&payload(body), INSUFFICIENT_STOCK_CODE);
        assert_eq!(outcome, QuantityOutcome::Rejected { code: Some(1234) });
    }

    #[test]
    fn error_entry_without_code_is_rejected() {
        let body = r#"{"error_messages": [{"message": "something else"}]}"#;
        let outcome = classify_quantity_response(&payload(body), INSUFFICIENT_STOCK_CODE);
        assert_eq!(outcome, QuantityOutcome::Rejected { code: None });
    }

    #[test]
    fn matches_the_line_belonging_to_the_product() {
        let body = r#"{
            "purchases": {
                "goods": [
                    {"id": 1, "goods": {"id": 111}},
                    {"id": 2, "goods": {"id": 555}}
                ]
            }
        }"#;

        assert_eq!(match_cart_line(&payload(body), 555), Some(2));
    }

    #[test]
    fn missing_or_foreign_lines_do_not_match() {
        let body = r#"{"purchases": {"goods": [{"id": 1, "goods": {"id": 111}}]}}"#;
        assert_eq!(match_cart_line(&payload(body), 555), None);

        // An empty echoed cart is equally a failed add
        assert_eq!(match_cart_line(&payload("{}"), 555), None);
    }

    #[test]
    fn endpoints_carry_base_and_query() {
        let config = StorefrontConfig::default();
        assert_eq!(
            config.endpoint("edit-quantity"),
            "https://uss.rozetka.com.ua/session/cart-se/edit-quantity?country=UA&lang=ua"
        );
    }
}
