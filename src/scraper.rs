use crate::config::Config;
use crate::error::{DecodeError, FetchError};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde::Deserialize;
use strum_macros::{Display, VariantArray};

static PRODUCT_SCRIPT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"script[type="application/json"].bc-sf-filter-product-script"#).unwrap()
});

pub fn build_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.request_timeout())
        .build()
}

#[derive(Display, Debug, VariantArray, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Home,
    Radish,
    Dungaree,
    #[strum(to_string = "Long Sleeve Suit")]
    LongSleeveSuit,
    #[strum(to_string = "Zip Suit")]
    ZipSuit,
    #[strum(to_string = "Summer Suit")]
    SummerSuit,
    #[strum(to_string = "Play suit")]
    PlaySuit,
    #[strum(to_string = "Short Sleeved Top")]
    ShortSleevedTop,
    #[strum(to_string = "Short Pants")]
    ShortPants,
    #[strum(to_string = "Skater Dress")]
    SkaterDress,
    #[strum(to_string = "Baggy Pants")]
    BaggyPants,
    #[strum(to_string = "Long Sleeved Top")]
    LongSleevedTop,
    #[strum(to_string = "Hood Suit")]
    HoodSuit,
    #[strum(to_string = "Long Sleeve Dress")]
    LongSleeveDress,
    #[strum(to_string = "LS Dress w. Gathered Skirt")]
    LongSleeveGatheredDress,
    #[strum(to_string = "Long Sleeve Body")]
    LongSleeveBody,
    #[strum(to_string = "Sun Hat")]
    SunHat,
    #[strum(to_string = "Sleeveless Dress with Gathered Skirt")]
    SleevelessGatheredDress,
    Babycap,
}

impl Collection {
    pub const fn path(&self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Radish => "/collections/radish/radish",
            Self::Dungaree => "/collections/dungaree",
            Self::LongSleeveSuit => "/collections/long-sleeve-suit",
            Self::ZipSuit => "/collections/zip-suit",
            Self::SummerSuit => "/collections/short-sleeved-suit/Summer-Suit",
            Self::PlaySuit => "/collections/play-suit/Play-suit",
            Self::ShortSleevedTop => "/collections/short-sleeved-top",
            Self::ShortPants => "/collections/short-pants/Short-pants",
            Self::SkaterDress => "/collections/skater-dress/Skater-Dress",
            Self::BaggyPants => "/collections/baggy-trousers",
            Self::LongSleevedTop => "/collections/long-sleeved-top",
            Self::HoodSuit => "/collections/hood-suit",
            Self::LongSleeveDress => "/collections/long-sleeved-dress",
            Self::LongSleeveGatheredDress => {
                "/collections/long-sleeve-dress-with-gathered-skirt/Long-Sleeve-Dress-with-Gathered-Skirt"
            }
            Self::LongSleeveBody => "/collections/body",
            Self::SunHat => "/collections/sun-hat",
            Self::SleevelessGatheredDress => {
                "/collections/sleeveless-dress-with-gathered-skirt/Sleeveless-Dress-with-Gathered-Skirt"
            }
            Self::Babycap => "/collections/babycap",
        }
    }
}

pub type ProductId = i64;
pub type VariantId = i64;

#[derive(Debug, Clone, Deserialize)]
pub struct RawProduct {
    pub id: ProductId,
    pub title: String,
    pub handle: String,
    pub url: String,
    #[serde(default)]
    pub variants: Vec<RawVariant>,
    #[serde(default)]
    pub options_with_values: Vec<ProductOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawVariant {
    pub id: VariantId,
    pub title: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub available: bool,
}

impl RawVariant {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductOption {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<String, FetchError>;
}

pub struct Storefront {
    client: Client,
    base_url: Url,
}

impl Storefront {
    pub const fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl PageSource for Storefront {
    async fn fetch(&self, path: &str) -> Result<String, FetchError> {
        let url = self.base_url.join(path).map_err(|source| FetchError::Url {
            path: path.to_string(),
            source,
        })?;
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                path: path.to_string(),
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                path: path.to_string(),
                status,
            });
        }

        res.text().await.map_err(|source| FetchError::Request {
            path: path.to_string(),
            source,
        })
    }
}

fn decode_block(index: usize, body: &str) -> Result<Vec<RawProduct>, DecodeError> {
    let body = body.trim();
    let decoded = if body.starts_with('[') {
        serde_json::from_str(body)
    } else {
        serde_json::from_str(body).map(|product| vec![product])
    };
    decoded.map_err(|source| DecodeError { index, source })
}

pub fn decode_blocks(page: &str) -> Vec<Result<Vec<RawProduct>, DecodeError>> {
    let document = Html::parse_document(page);
    document
        .select(&PRODUCT_SCRIPT)
        .enumerate()
        .map(|(index, block)| decode_block(index, &block.text().collect::<String>()))
        .collect()
}

pub fn extract_products(collection: Collection, page: &str) -> Vec<RawProduct> {
    decode_blocks(page)
        .into_iter()
        .filter_map(|block| {
            block
                .inspect_err(|err| warn!("{collection}: skipping product block: {err}"))
                .ok()
        })
        .flatten()
        .collect()
}

#[derive(Debug, Default)]
pub struct Scrape {
    pub products: Vec<RawProduct>,
    pub pages_fetched: usize,
    pub failed_pages: Vec<Collection>,
}

/// A page that fails to load is logged and left out of the result.
pub async fn scrape(source: &dyn PageSource, collections: &[Collection]) -> Scrape {
    let tasks = collections
        .iter()
        .map(|&collection| async move { (collection, source.fetch(collection.path()).await) });

    let mut scrape = Scrape::default();
    for (collection, page) in join_all(tasks).await {
        match page {
            Ok(body) => {
                let products = extract_products(collection, &body);
                debug!("{collection}: {} products", products.len());
                scrape.products.extend(products);
                scrape.pages_fetched += 1;
            }
            Err(err) => {
                warn!("{collection}: {err}");
                scrape.failed_pages.push(collection);
            }
        }
    }
    scrape
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::collections::{HashMap, HashSet};
    use strum::VariantArray;

    pub(crate) fn product_block(json: &str) -> String {
        format!(r#"<script type="application/json" class="bc-sf-filter-product-script">{json}</script>"#)
    }

    pub(crate) fn page(blocks: &[String]) -> String {
        format!(
            "<html><head><script>window.theme = {{}};</script></head><body><div class=\"grid\">{}</div></body></html>",
            blocks.concat()
        )
    }

    const RADISH: &str = r#"{
        "id": 42,
        "title": "Radish Dungaree",
        "handle": "radish-dungaree",
        "url": "/products/radish-dungaree",
        "images": {"1": "//cdn.example/radish.jpg"},
        "variants": [
            {"id": 420, "title": "86/1-2Y", "name": "Radish Dungaree - 86/1-2Y", "available": true},
            {"id": 421, "title": "92/2-3Y", "available": false}
        ],
        "options_with_values": [{"name": "size", "label": "Size", "values": ["86/1-2Y", "92/2-3Y"]}]
    }"#;

    #[test]
    fn decodes_embedded_products() {
        let html = page(&[product_block(RADISH)]);
        let products = extract_products(Collection::Radish, &html);

        assert_eq!(products.len(), 1);
        let radish = &products[0];
        assert_eq!(radish.id, 42);
        assert_eq!(radish.url, "/products/radish-dungaree");
        assert_eq!(radish.variants.len(), 2);
        assert_eq!(radish.variants[0].display_name(), "Radish Dungaree - 86/1-2Y");
        assert_eq!(radish.variants[1].display_name(), "92/2-3Y");
        assert!(!radish.variants[1].available);
        assert_eq!(radish.options_with_values[0].values, ["86/1-2Y", "92/2-3Y"]);
    }

    #[test]
    fn ignores_unrelated_scripts() {
        let html = r#"<script type="application/json" id="shop-config">{"id": 1}</script>
            <script type="text/javascript" class="bc-sf-filter-product-script">{"id": 2}</script>"#;
        assert!(extract_products(Collection::Home, html).is_empty());
        assert!(extract_products(Collection::Home, "").is_empty());
    }

    #[test]
    fn skips_only_the_broken_block() {
        let html = page(&[
            product_block("{ not json"),
            product_block(RADISH),
            product_block(r#"{"id": 7}"#),
        ]);

        let blocks = decode_blocks(&html);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].as_ref().unwrap_err().index, 0);
        assert!(blocks[1].is_ok());
        assert_eq!(blocks[2].as_ref().unwrap_err().index, 2);

        let products = extract_products(Collection::Dungaree, &html);
        assert_eq!(products.iter().map(|p| p.id).collect::<Vec<_>>(), [42]);
    }

    #[test]
    fn accepts_array_blocks() {
        let array = format!(
            r#"[{RADISH}, {{"id": 43, "title": "Babycap", "handle": "babycap", "url": "/products/babycap"}}]"#
        );
        let products = extract_products(Collection::Babycap, &page(&[product_block(&array)]));
        assert_eq!(products.iter().map(|p| p.id).collect::<Vec<_>>(), [42, 43]);
        assert!(products[1].variants.is_empty());
    }

    #[test]
    fn collection_paths_are_distinct_and_rooted() {
        let paths: HashSet<_> = Collection::VARIANTS.iter().map(Collection::path).collect();
        assert_eq!(paths.len(), Collection::VARIANTS.len());
        assert!(paths.iter().all(|p| p.starts_with('/')));
        assert_eq!(Collection::LongSleeveGatheredDress.to_string(), "LS Dress w. Gathered Skirt");
    }

    /// Serves canned bodies; paths without one answer 503.
    pub(crate) struct FakeStorefront(pub HashMap<&'static str, String>);

    #[async_trait]
    impl PageSource for FakeStorefront {
        async fn fetch(&self, path: &str) -> Result<String, FetchError> {
            self.0.get(path).cloned().ok_or_else(|| FetchError::Status {
                path: path.to_string(),
                status: StatusCode::SERVICE_UNAVAILABLE,
            })
        }
    }

    #[tokio::test]
    async fn failed_page_is_skipped() {
        let source = FakeStorefront(HashMap::from([(
            Collection::Radish.path(),
            page(&[product_block(RADISH)]),
        )]));

        let scrape = scrape(&source, &[Collection::Dungaree, Collection::Radish]).await;
        assert_eq!(scrape.pages_fetched, 1);
        assert_eq!(scrape.failed_pages, [Collection::Dungaree]);
        assert_eq!(scrape.products.len(), 1);
    }
}
