//! Best-effort title and category scraping around a successful probe.
//!
//! Everything here is heuristic work against uncontrolled markup: selector
//! lists with regex fallbacks. A miss yields `None` fields, never an error,
//! and nothing in this module can change a probe's success or failure.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;

use crate::models::{CartPayload, ProductMeta, ProductReference};

static CATEGORY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/c(\d+)/").expect("valid category id pattern"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

const TITLE_SELECTORS: [&str; 5] = [
    "h1.product__title",
    r#"h1[data-testid="product-title"]"#,
    ".product-title h1",
    "h1.rz-product-title",
    "h1",
];

const BREADCRUMB_SELECTORS: [&str; 4] = [
    ".breadcrumbs a",
    ".rz-breadcrumbs a",
    r#"[data-testid="breadcrumbs"] a"#,
    ".catalog-heading a",
];

/// Collects title and category for a probed product.
///
/// The cart-add payload is mined first (it often carries the title and the
/// category id); page scraping only fills the gaps. Uses the probe's own
/// client so the fetches ride the same session.
pub async fn product_meta(
    client: &Client,
    reference: &ProductReference,
    add_payload: &CartPayload,
) -> ProductMeta {
    let mut title = None;
    let mut category_id = None;
    let mut product_url = reference.source_url.clone();

    if let Some(line) = add_payload
        .purchases
        .goods
        .iter()
        .find(|line| line.goods.id == reference.product_id)
    {
        title = line
            .goods
            .title
            .clone()
            .or_else(|| line.goods.name.clone());
        category_id = line.goods.category_id;
        if let Some(api_url) = line.goods.href.clone().or_else(|| line.goods.url.clone()) {
            product_url = api_url;
        }
    }

    if category_id.is_none() {
        category_id = category_id_from_url(&product_url)
            .or_else(|| category_id_from_url(&reference.source_url));
    }

    if title.is_none() {
        match fetch_page(client, &reference.source_url).await {
            Ok(html) => title = title_from_document(&html),
            Err(error) => debug!(%error, url = %reference.source_url, "product page fetch failed"),
        }
    }

    let mut category = None;
    if let Some(id) = category_id {
        match fetch_page(client, &product_url).await {
            Ok(html) => {
                category =
                    category_from_document(&html, id).or_else(|| category_from_markup(&html, id));
            }
            Err(error) => debug!(%error, url = %product_url, "category page fetch failed"),
        }
    }

    debug!(?title, ?category, "metadata enrichment finished");
    ProductMeta { title, category }
}

async fn fetch_page(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    client.get(url).send().await?.text().await
}

/// The numeric category id embedded in a `/c<digits>/` URL segment
pub fn category_id_from_url(url: &str) -> Option<i64> {
    CATEGORY_ID_RE
        .captures(url)
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

fn title_from_document(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for raw in TITLE_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    None
}

/// Selector pass: anchors pointing at the category, then breadcrumb links.
fn category_from_document(html: &str, category_id: i64) -> Option<String> {
    let document = Html::parse_document(html);

    let anchor_selectors = [
        format!(r#"a[href*="/c{category_id}/"]"#),
        format!(r#"a[href*="/ua/c{category_id}/"]"#),
        format!(r#"[href*="c{category_id}"]"#),
    ];
    for raw in &anchor_selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element.text().collect::<String>().trim().to_string();
            if text.chars().count() > 2 {
                return Some(text);
            }
        }
    }

    let category_segment = format!("/c{category_id}/");
    let category_token = format!("c{category_id}");
    for raw in BREADCRUMB_SELECTORS {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for element in document.select(&selector) {
            let href = element.value().attr("href").unwrap_or("");
            if href.contains(&category_segment) || href.contains(&category_token) {
                let text = element.text().collect::<String>().trim().to_string();
                if text.chars().count() > 2 {
                    return Some(text);
                }
            }
        }
    }

    None
}

/// Regex fallback over the raw markup, for pages the selector pass misses.
fn category_from_markup(html: &str, category_id: i64) -> Option<String> {
    let patterns = [
        format!(r#"<a[^>]+href="[^"]*/?c{category_id}/[^"]*"[^>]*>([^<]+)</a>"#),
        format!(r#"<a[^>]+href="[^"]*c{category_id}[^"]*"[^>]*>(.*?)</a>"#),
        format!(r#"href="[^"]*c{category_id}[^"]*"[^>]*>([^<]*)</a>"#),
    ];

    for pattern in &patterns {
        let Ok(re) = Regex::new(&format!("(?is){pattern}")) else {
            continue;
        };
        for captures in re.captures_iter(html) {
            let Some(raw) = captures.get(1) else { continue };
            let text = TAG_RE.replace_all(raw.as_str(), "");
            let text = WHITESPACE_RE.replace_all(text.trim(), " ").to_string();
            if text.chars().count() > 2 {
                return Some(text);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_category_id_from_url() {
        assert_eq!(
            category_id_from_url("https://rozetka.com.ua/ua/notebooks/c80004/"),
            Some(80_004)
        );
        assert_eq!(category_id_from_url("https://rozetka.com.ua/ua/"), None);
    }

    #[test]
    fn finds_title_via_preferred_selector() {
        let html = r#"<html><body>
            <h1>Generic heading</h1>
            <h1 class="product__title">Apple iPhone 15 128GB Black</h1>
        </body></html>"#;

        assert_eq!(
            title_from_document(html).as_deref(),
            Some("Apple iPhone 15 128GB Black")
        );
    }

    #[test]
    fn falls_back_to_plain_h1_title() {
        let html = "<html><body><h1>  Sony WH-1000XM5  </h1></body></html>";
        assert_eq!(title_from_document(html).as_deref(), Some("Sony WH-1000XM5"));
    }

    #[test]
    fn missing_title_yields_none() {
        assert_eq!(title_from_document("<html><body><p>no heading</p></body></html>"), None);
    }

    #[test]
    fn finds_category_name_via_anchor_selector() {
        let html = r#"<html><body>
            <a href="/ua/notebooks/c80004/">Ноутбуки</a>
        </body></html>"#;

        assert_eq!(
            category_from_document(html, 80_004).as_deref(),
            Some("Ноутбуки")
        );
    }

    #[test]
    fn finds_category_name_in_breadcrumbs() {
        let html = r#"<html><body>
            <nav class="breadcrumbs">
                <a href="/">Home</a>
                <a href="/ua/notebooks/c80004/">Laptops and computers</a>
            </nav>
        </body></html>"#;

        assert_eq!(
            category_from_document(html, 80_004).as_deref(),
            Some("Laptops and computers")
        );
    }

    #[test]
    fn regex_fallback_strips_nested_markup() {
        let html = r#"<div><a class="x" href="/ua/phones/c8000/"><span>Mobile
            phones</span></a></div>"#;

        assert_eq!(
            category_from_markup(html, 8_000).as_deref(),
            Some("Mobile phones")
        );
    }

    #[test]
    fn short_link_text_is_ignored() {
        let html = r#"<a href="/ua/c80004/">..</a>"#;
        assert_eq!(category_from_document(html, 80_004), None);
    }
}
