//! Adaptive stock probing: binary search over cart quantity trials

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::cart::{CartChannel, CartError, QuantityOutcome, StorefrontConfig};
use crate::enrich;
use crate::models::ProductReference;

/// Assumed ceiling on any product's stock; the search never looks above it
pub const DEFAULT_UPPER_BOUND: u32 = 10_000;
/// Trial budget for one product's search
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
/// Courtesy pause between quantity trials
pub const DEFAULT_TRIAL_DELAY_MS: u64 = 700;

/// Tunables for one probe run
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub storefront: StorefrontConfig,
    pub upper_bound: u32,
    pub max_attempts: u32,
    pub trial_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            storefront: StorefrontConfig::default(),
            upper_bound: DEFAULT_UPPER_BOUND,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            trial_delay: Duration::from_millis(DEFAULT_TRIAL_DELAY_MS),
        }
    }
}

/// Why a probe failed
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The URL does not yield a product id; never retried
    #[error("product id could not be derived from the URL")]
    InvalidReference,

    /// The anti-forgery cookie was missing or the session could not be
    /// established; transient, safe to retry the whole probe later
    #[error("anti-forgery token unavailable: {source}")]
    TokenUnavailable {
        #[source]
        source: CartError,
    },

    /// The cart never bound a line for the product; without one, stock
    /// cannot be determined
    #[error("product could not be added to the cart: {source}")]
    AddFailed {
        #[source]
        source: CartError,
    },

    /// A trial produced an indeterminate response; stock may be partially
    /// known but is not reported as authoritative
    #[error("search aborted after {confirmed} confirmed: {cause}")]
    SearchAborted { confirmed: u32, cause: String },
}

/// A failed probe, with enough context to report per-item in a batch
#[derive(Debug, Error)]
#[error("{url}: {reason}")]
pub struct ProbeFailure {
    pub url: String,
    pub product_id: Option<i64>,
    pub reason: ProbeError,
}

/// Result of a successful probe
#[derive(Debug, Clone)]
pub struct StockReport {
    pub product_id: i64,
    pub url: String,
    pub max_stock: u32,
    /// False when the trial budget ran out first; `max_stock` is then a
    /// confirmed lower bound, not the exact maximum
    pub exact: bool,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// How one search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEnd {
    /// The `[low, high]` range was exhausted; `best_accepted` is exact
    RangeExhausted,
    /// The trial budget ran out; `best_accepted` is a lower bound
    AttemptsExhausted,
    /// An indeterminate response stopped the search
    Aborted { cause: String },
}

/// Working result of one binary search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub best_accepted: u32,
    pub attempts_used: u32,
    pub end: SearchEnd,
}

/// One quantity trial against the remote cart. The seam between the search
/// and the cart channel, so the search is testable without a storefront.
#[async_trait]
pub trait QuantityOracle {
    async fn try_quantity(&mut self, quantity: u32) -> Result<QuantityOutcome, CartError>;
}

#[async_trait]
impl QuantityOracle for CartChannel {
    async fn try_quantity(&mut self, quantity: u32) -> Result<QuantityOutcome, CartError> {
        self.set_quantity(quantity).await
    }
}

/// Finds the maximum quantity the oracle accepts within `[1, upper_bound]`.
///
/// Classic binary search: O(log(upper_bound)) trials instead of a linear
/// scan, which matters because every trial is rate-limited. A quantity at or
/// above the true stock comes back as insufficient, anything at or below it
/// as accepted; any other answer aborts the search immediately rather than
/// corrupting the invariant. If the true maximum is at or above
/// `upper_bound`, the result is capped at `upper_bound`.
pub async fn binary_search_max_stock<O>(
    oracle: &mut O,
    upper_bound: u32,
    max_attempts: u32,
    trial_delay: Duration,
) -> SearchReport
where
    O: QuantityOracle + ?Sized,
{
    let mut low = 1u32;
    let mut high = upper_bound;
    let mut best_accepted = 0u32;
    let mut attempts_used = 0u32;

    while low <= high && attempts_used < max_attempts {
        let mid = low + (high - low) / 2;
        let outcome = oracle.try_quantity(mid).await;
        attempts_used += 1;

        if !trial_delay.is_zero() {
            tokio::time::sleep(trial_delay).await;
        }

        match outcome {
            Ok(QuantityOutcome::InsufficientStock) => {
                debug!(quantity = mid, "insufficient stock, lowering bound");
                high = mid - 1;
            }
            Ok(QuantityOutcome::Accepted) => {
                debug!(quantity = mid, "accepted, raising bound");
                best_accepted = mid;
                low = mid + 1;
            }
            Ok(QuantityOutcome::Rejected { code }) => {
                let cause = match code {
                    Some(code) => format!("unrecognized cart error code {code}"),
                    None => "cart error entry without a code".to_string(),
                };
                return SearchReport {
                    best_accepted,
                    attempts_used,
                    end: SearchEnd::Aborted { cause },
                };
            }
            Err(error) => {
                return SearchReport {
                    best_accepted,
                    attempts_used,
                    end: SearchEnd::Aborted {
                        cause: error.to_string(),
                    },
                };
            }
        }
    }

    let end = if low > high {
        SearchEnd::RangeExhausted
    } else {
        SearchEnd::AttemptsExhausted
    };

    SearchReport {
        best_accepted,
        attempts_used,
        end,
    }
}

/// Sequences one full product probe: session reset, add to cart, binary
/// search, metadata enrichment, result assembly.
#[derive(Debug, Clone, Default)]
pub struct StockProber {
    config: ProbeConfig,
}

impl StockProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probes one product URL end to end.
    ///
    /// Every probe gets a freshly reset channel, so no cookies or cart line
    /// leak in from a previous product. There are no internal retries; a
    /// caller owning a batch decides what to do with a failed URL.
    pub async fn check_product(&self, url: &str) -> Result<StockReport, ProbeFailure> {
        let Some(reference) = ProductReference::parse(url) else {
            return Err(ProbeFailure {
                url: url.to_string(),
                product_id: None,
                reason: ProbeError::InvalidReference,
            });
        };
        let product_id = reference.product_id;
        info!(product_id, url, "probing product");

        let fail = |reason: ProbeError| ProbeFailure {
            url: url.to_string(),
            product_id: Some(product_id),
            reason,
        };

        let mut channel = CartChannel::open(self.config.storefront.clone())
            .map_err(|source| fail(ProbeError::TokenUnavailable { source }))?;
        channel
            .reset()
            .map_err(|source| fail(ProbeError::TokenUnavailable { source }))?;

        let payload = match channel.add_to_cart(product_id).await {
            Ok(payload) => payload,
            Err(source @ CartError::TokenUnavailable { .. }) => {
                return Err(fail(ProbeError::TokenUnavailable { source }));
            }
            Err(source) => return Err(fail(ProbeError::AddFailed { source })),
        };

        let report = binary_search_max_stock(
            &mut channel,
            self.config.upper_bound,
            self.config.max_attempts,
            self.config.trial_delay,
        )
        .await;

        if let SearchEnd::Aborted { cause } = report.end {
            return Err(fail(ProbeError::SearchAborted {
                confirmed: report.best_accepted,
                cause,
            }));
        }

        let exact = report.end == SearchEnd::RangeExhausted;
        let meta = enrich::product_meta(channel.client(), &reference, &payload).await;
        info!(
            product_id,
            max_stock = report.best_accepted,
            attempts = report.attempts_used,
            exact,
            "probe complete"
        );

        Ok(StockReport {
            product_id,
            url: reference.source_url,
            max_stock: report.best_accepted,
            exact,
            title: meta.title,
            category: meta.category,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulated storefront: accepts quantities up to `threshold`, optionally
    /// failing a specific trial number with a foreign error or a transport
    /// error.
    struct FakeCart {
        threshold: u32,
        trials: Vec<u32>,
        reject_at: Option<(usize, QuantityOutcome)>,
        transport_error_at: Option<usize>,
    }

    impl FakeCart {
        fn with_stock(threshold: u32) -> Self {
            Self {
                threshold,
                trials: Vec::new(),
                reject_at: None,
                transport_error_at: None,
            }
        }
    }

    #[async_trait]
    impl QuantityOracle for FakeCart {
        async fn try_quantity(&mut self, quantity: u32) -> Result<QuantityOutcome, CartError> {
            self.trials.push(quantity);
            let trial_number = self.trials.len();

            if let Some((at, outcome)) = &self.reject_at
                && *at == trial_number
            {
                return Ok(outcome.clone());
            }
            if self.transport_error_at == Some(trial_number) {
                return Err(CartError::MissingCartLine);
            }

            if quantity <= self.threshold {
                Ok(QuantityOutcome::Accepted)
            } else {
                Ok(QuantityOutcome::InsufficientStock)
            }
        }
    }

    async fn search(oracle: &mut FakeCart, upper_bound: u32, max_attempts: u32) -> SearchReport {
        binary_search_max_stock(oracle, upper_bound, max_attempts, Duration::ZERO).await
    }

    #[tokio::test]
    async fn finds_exact_maximum_in_logarithmic_trials() {
        let mut cart = FakeCart::with_stock(37);
        let report = search(&mut cart, 10_000, 100).await;

        assert_eq!(report.best_accepted, 37);
        assert_eq!(report.end, SearchEnd::RangeExhausted);
        // ceil(log2(10_000)) = 14
        assert!(report.attempts_used <= 14, "used {}", report.attempts_used);
    }

    #[tokio::test]
    async fn zero_stock_terminates_without_a_full_scan() {
        let mut cart = FakeCart::with_stock(0);
        let report = search(&mut cart, 10_000, 100).await;

        assert_eq!(report.best_accepted, 0);
        assert_eq!(report.end, SearchEnd::RangeExhausted);
        assert!(report.attempts_used <= 14, "used {}", report.attempts_used);
    }

    #[tokio::test]
    async fn result_is_capped_at_the_upper_bound() {
        let mut cart = FakeCart::with_stock(20_000);
        let report = search(&mut cart, 10_000, 100).await;

        assert_eq!(report.best_accepted, 10_000);
        assert_eq!(report.end, SearchEnd::RangeExhausted);
    }

    #[tokio::test]
    async fn single_unit_stock_is_found() {
        let mut cart = FakeCart::with_stock(1);
        let report = search(&mut cart, 10_000, 100).await;

        assert_eq!(report.best_accepted, 1);
        assert_eq!(report.end, SearchEnd::RangeExhausted);
    }

    #[tokio::test]
    async fn foreign_error_code_aborts_the_search() {
        let mut cart = FakeCart::with_stock(500);
        cart.reject_at = Some((3, QuantityOutcome::Rejected { code: Some(1234) }));
        let report = search(&mut cart, 10_000, 100).await;

        assert_eq!(report.attempts_used, 3);
        assert!(matches!(report.end, SearchEnd::Aborted { ref cause } if cause.contains("1234")));
    }

    #[tokio::test]
    async fn transport_failure_aborts_with_interim_best_preserved() {
        let mut cart = FakeCart::with_stock(5_000);
        cart.transport_error_at = Some(2);
        let report = search(&mut cart, 10_000, 100).await;

        // First trial (5000) was accepted before the failure
        assert_eq!(report.best_accepted, 5_000);
        assert!(matches!(report.end, SearchEnd::Aborted { .. }));
    }

    #[tokio::test]
    async fn attempt_budget_exhaustion_yields_a_lower_bound() {
        let mut cart = FakeCart::with_stock(37);
        let report = search(&mut cart, 10_000, 3).await;

        assert_eq!(report.attempts_used, 3);
        assert_eq!(report.end, SearchEnd::AttemptsExhausted);
        assert!(report.best_accepted <= 37);
    }

    #[tokio::test]
    async fn accepted_quantities_are_strictly_increasing() {
        let mut cart = FakeCart::with_stock(731);
        let report = search(&mut cart, 10_000, 100).await;
        assert_eq!(report.best_accepted, 731);

        // best_accepted only ever moves up: every accepted trial quantity is
        // larger than the previous accepted one
        let accepted: Vec<u32> = cart
            .trials
            .iter()
            .copied()
            .filter(|q| *q <= 731)
            .collect();
        assert!(accepted.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn invalid_url_fails_before_any_network_call() {
        let prober = StockProber::new(ProbeConfig::default());
        let failure = prober
            .check_product("https://rozetka.com.ua/ua/notebooks/c80004/")
            .await
            .expect_err("reference should not parse");

        assert!(matches!(failure.reason, ProbeError::InvalidReference));
        assert!(failure.product_id.is_none());
    }
}
