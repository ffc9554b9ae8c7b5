//! Per-probe session lifecycle: HTTP client, anti-forgery token, cart line

use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::debug;

use crate::cart::{CartError, StorefrontConfig};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// State bound to one product probe: a fresh cookie jar, the anti-forgery
/// token once acquired, and the cart line created by a successful add.
///
/// A session is owned by exactly one probe. It starts blank, is populated
/// during the probe and discarded afterwards; the cart line id is never
/// meaningful outside the probe that produced it.
pub struct Session {
    client: Client,
    csrf_token: Option<String>,
    cart_line_id: Option<i64>,
}

impl Session {
    /// Creates a blank session with a fresh cookie jar.
    pub fn new(config: &StorefrontConfig) -> Result<Self, CartError> {
        Ok(Self {
            client: build_client(config)?,
            csrf_token: None,
            cart_line_id: None,
        })
    }

    /// Discards the token, the cart-line binding and every cookie by
    /// rebuilding the HTTP client. Calling this twice in a row leaves the
    /// session equivalently empty both times.
    pub fn reset(&mut self, config: &StorefrontConfig) -> Result<(), CartError> {
        self.client = build_client(config)?;
        self.csrf_token = None;
        self.cart_line_id = None;
        Ok(())
    }

    /// Acquires the anti-forgery token if not already held.
    ///
    /// Issues a GET against the storefront home page and reads the
    /// anti-forgery cookie from the response. Without that cookie no
    /// cart-mutating call can proceed.
    pub async fn ensure_token(&mut self, config: &StorefrontConfig) -> Result<String, CartError> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }

        debug!(url = %config.home_url, "fetching home page for anti-forgery cookie");
        let response = self.client.get(&config.home_url).send().await?;
        let token = response
            .cookies()
            .find(|cookie| cookie.name() == config.csrf_cookie)
            .map(|cookie| cookie.value().to_string());

        match token {
            Some(token) => {
                self.csrf_token = Some(token.clone());
                Ok(token)
            }
            None => Err(CartError::TokenUnavailable {
                cookie: config.csrf_cookie.clone(),
            }),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Records the cart line created by a successful add. The binding only
    /// holds for the product probed in this session.
    pub fn bind_cart_line(&mut self, line_id: i64) {
        self.cart_line_id = Some(line_id);
    }

    pub fn cart_line(&self) -> Option<i64> {
        self.cart_line_id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn build_client(config: &StorefrontConfig) -> Result<Client, CartError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("uk,ru;q=0.9,en;q=0.8"),
    );
    let origin = HeaderValue::from_str(config.home_url.trim_end_matches('/')).map_err(|_| {
        CartError::Config(format!(
            "home URL {} is not a valid Origin header",
            config.home_url
        ))
    })?;
    headers.insert(header::ORIGIN, origin);
    let referer = HeaderValue::from_str(&config.home_url).map_err(|_| {
        CartError::Config(format!(
            "home URL {} is not a valid Referer header",
            config.home_url
        ))
    })?;
    headers.insert(header::REFERER, referer);
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));

    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .cookie_store(true)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_blank() {
        let config = StorefrontConfig::default();
        let session = Session::new(&config).unwrap();

        assert!(session.token().is_none());
        assert!(session.cart_line().is_none());
    }

    #[test]
    fn reset_clears_bindings_idempotently() {
        let config = StorefrontConfig::default();
        let mut session = Session::new(&config).unwrap();
        session.csrf_token = Some("token".to_string());
        session.bind_cart_line(42);

        session.reset(&config).unwrap();
        assert!(session.token().is_none());
        assert!(session.cart_line().is_none());

        // A second reset leaves the session equivalently empty
        session.reset(&config).unwrap();
        assert!(session.token().is_none());
        assert!(session.cart_line().is_none());
    }
}
