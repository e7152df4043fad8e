use std::fmt;

use crate::diff::{CatalogDiff, compute_diff, render_messages};
use crate::error::{RunError, StoreError};
use crate::normalize::{Snapshot, normalize};
use crate::notify::{ChatId, Messenger, dispatch};
use crate::scraper::{self, Collection, PageSource};
use crate::storage::Store;
use log::{info, warn};
use reqwest::Url;

pub struct Pipeline<'a> {
    pub pages: &'a dyn PageSource,
    pub store: &'a dyn Store,
    pub messenger: &'a dyn Messenger,
    pub base_url: &'a Url,
    pub collections: &'a [Collection],
    pub sync_chats: bool,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub pages_fetched: usize,
    pub failed_pages: Vec<Collection>,
    pub products: usize,
    pub variants: usize,
    pub new_products: usize,
    pub restocked: usize,
    pub messages_sent: usize,
    pub failed_chats: Vec<ChatId>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages ({} failed), {} products, {} variants, {} new, {} restocked, {} messages sent, {} chats failed",
            self.pages_fetched,
            self.failed_pages.len(),
            self.products,
            self.variants,
            self.new_products,
            self.restocked,
            self.messages_sent,
            self.failed_chats.len()
        )
    }
}

impl Pipeline<'_> {
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let scrape = scraper::scrape(self.pages, self.collections).await;
        if scrape.pages_fetched == 0 && !self.collections.is_empty() {
            return Err(RunError::NoPages(self.collections.len()));
        }

        let snapshot = normalize(&scrape.products);
        let mut summary = RunSummary {
            pages_fetched: scrape.pages_fetched,
            failed_pages: scrape.failed_pages,
            products: snapshot.products.len(),
            variants: snapshot.variants.len(),
            ..Default::default()
        };
        info!(
            "Scraped {} products with {} variants",
            summary.products, summary.variants
        );

        if snapshot.is_empty() {
            info!("No products on any page, nothing to compare");
            return Ok(summary);
        }

        let known_products = self.store.list_known_product_ids().await?;
        let known_available = self.store.list_available_variant_ids().await?;
        let diff = compute_diff(&snapshot, &known_products, &known_available);
        summary.new_products = diff.new_products.len();
        summary.restocked = diff.restocked.len();
        info!(
            "{} new products, {} restocked variants",
            summary.new_products, summary.restocked
        );

        if self.dry_run {
            log_dry_run(&diff);
            return Ok(summary);
        }

        if self.sync_chats {
            self.register_chats().await;
        }

        // Read recipients before persisting: once the diff is stored it is
        // never computed again, so a failed read must leave the state as is.
        let chats = if diff.is_empty() {
            None
        } else {
            Some(self.store.list_chat_ids().await?)
        };

        self.persist(&snapshot, &diff, summary.failed_pages.is_empty())
            .await?;

        let Some(chats) = chats else {
            return Ok(summary);
        };
        let messages = render_messages(&diff, &snapshot, self.base_url);
        let delivery = dispatch(self.messenger, &chats, &messages).await;
        summary.messages_sent = delivery.sent;
        summary.failed_chats = delivery.failed_chats;

        Ok(summary)
    }

    async fn persist(
        &self,
        snapshot: &Snapshot,
        diff: &CatalogDiff,
        complete: bool,
    ) -> Result<(), StoreError> {
        if !diff.new_products.is_empty() {
            info!("Inserting {} new products", diff.new_products.len());
            self.store.insert_products(&diff.new_products).await?;
        }

        // Variants of a collection that failed to load are missing from the
        // snapshot, so only a complete scrape may drop stored rows.
        if complete {
            self.store.replace_all_variants(&snapshot.variants).await
        } else {
            warn!("Scrape was partial, keeping variants that weren't seen");
            self.store.upsert_variants(&snapshot.variants).await
        }
    }

    async fn register_chats(&self) {
        let pending = match self.messenger.pending_chat_ids().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!("Couldn't read bot updates, skipping chat registration: {err}");
                return;
            }
        };

        let known = match self.store.list_chat_ids().await {
            Ok(known) => known,
            Err(err) => {
                warn!("Couldn't list chats, skipping chat registration: {err}");
                return;
            }
        };
        let fresh: Vec<_> = pending
            .into_iter()
            .filter(|id| !known.contains(id))
            .collect();
        if fresh.is_empty() {
            return;
        }

        info!("Registering {} new chats", fresh.len());
        if let Err(err) = self.store.insert_chats(&fresh).await {
            warn!("Couldn't register chats {fresh:?}: {err}");
        }
    }
}

fn log_dry_run(diff: &CatalogDiff) {
    for product in &diff.new_products {
        info!("[dry run] new product {}: {}", product.id, product.title);
    }
    for restock in &diff.restocked {
        info!("[dry run] restocked {}: {}", restock.variant_id, restock.name);
    }
}
