use std::collections::HashSet;

use crate::error::StoreError;
use crate::normalize::{Product, ProductVariant};
use crate::notify::ChatId;
use crate::scraper::{ProductId, VariantId};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};

const PRODUCTS: &str = "products";
const VARIANTS: &str = "product_variants";
const CHATS: &str = "chats";

// Supabase caps responses at 1000 rows by default.
const PAGE_SIZE: usize = 1000;
const CHUNK_SIZE: usize = 500;

const PREFER_INSERT: &str = "return=minimal";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=minimal";
const PREFER_IGNORE: &str = "resolution=ignore-duplicates,return=minimal";

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_known_product_ids(&self) -> Result<HashSet<ProductId>, StoreError>;
    async fn list_available_variant_ids(&self) -> Result<HashSet<VariantId>, StoreError>;
    async fn list_chat_ids(&self) -> Result<HashSet<ChatId>, StoreError>;
    async fn insert_products(&self, rows: &[Product]) -> Result<(), StoreError>;
    /// Makes the variant table hold exactly `rows`.
    async fn replace_all_variants(&self, rows: &[ProductVariant]) -> Result<(), StoreError>;
    async fn upsert_variants(&self, rows: &[ProductVariant]) -> Result<(), StoreError>;
    async fn insert_chats(&self, ids: &[ChatId]) -> Result<(), StoreError>;
}

#[derive(Serialize, Deserialize)]
struct IdRow {
    id: i64,
}

/// [`Store`] backed by a Supabase project's PostgREST endpoint.
pub struct SupabaseStore {
    client: Client,
    rest_url: Url,
    key: String,
}

impl SupabaseStore {
    pub fn new(client: Client, project_url: &Url, key: String) -> Result<Self, StoreError> {
        let rest_url = project_url
            .join("rest/v1/")
            .map_err(|source| StoreError::Url {
                table: "rest/v1",
                source,
            })?;
        Ok(Self {
            client,
            rest_url,
            key,
        })
    }

    fn request(&self, method: Method, table: &'static str) -> Result<RequestBuilder, StoreError> {
        let url = self
            .rest_url
            .join(table)
            .map_err(|source| StoreError::Url { table, source })?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key))
    }

    async fn select_ids(
        &self,
        table: &'static str,
        filter: &[(&str, &str)],
    ) -> Result<HashSet<i64>, StoreError> {
        let mut ids = HashSet::new();
        let mut offset = 0;

        loop {
            let req = self
                .request(Method::GET, table)?
                .query(&[("select", "id"), ("order", "id")])
                .query(filter)
                .query(&[("limit", PAGE_SIZE), ("offset", offset)]);
            let rows: Vec<IdRow> = send("select", table, req)
                .await?
                .json()
                .await
                .map_err(|source| StoreError::Request {
                    op: "select",
                    table,
                    source,
                })?;

            let fetched = rows.len();
            ids.extend(rows.into_iter().map(|row| row.id));
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        debug!("{table}: {} ids", ids.len());
        Ok(ids)
    }

    async fn write<T: Serialize + Sync>(
        &self,
        table: &'static str,
        rows: &[T],
        prefer: &str,
    ) -> Result<(), StoreError> {
        for chunk in rows.chunks(CHUNK_SIZE) {
            let req = self
                .request(Method::POST, table)?
                .header("Prefer", prefer)
                .json(chunk);
            send("insert", table, req).await?;
        }
        Ok(())
    }

    async fn delete_ids(&self, table: &'static str, ids: &[i64]) -> Result<(), StoreError> {
        for chunk in ids.chunks(CHUNK_SIZE) {
            let req = self
                .request(Method::DELETE, table)?
                .query(&[("id", id_filter(chunk))]);
            send("delete", table, req).await?;
        }
        Ok(())
    }
}

async fn send(
    op: &'static str,
    table: &'static str,
    req: RequestBuilder,
) -> Result<Response, StoreError> {
    let res = req
        .send()
        .await
        .map_err(|source| StoreError::Request { op, table, source })?;

    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(StoreError::Status {
        op,
        table,
        status,
        body,
    })
}

fn id_filter(ids: &[i64]) -> String {
    let list = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
    format!("in.({list})")
}

fn stale_ids(stored: &HashSet<VariantId>, rows: &[ProductVariant]) -> Vec<VariantId> {
    let current: HashSet<_> = rows.iter().map(|v| v.id).collect();
    let mut stale: Vec<_> = stored.difference(&current).copied().collect();
    stale.sort_unstable();
    stale
}

#[async_trait]
impl Store for SupabaseStore {
    async fn list_known_product_ids(&self) -> Result<HashSet<ProductId>, StoreError> {
        self.select_ids(PRODUCTS, &[]).await
    }

    async fn list_available_variant_ids(&self) -> Result<HashSet<VariantId>, StoreError> {
        self.select_ids(VARIANTS, &[("available", "eq.true")]).await
    }

    async fn list_chat_ids(&self) -> Result<HashSet<ChatId>, StoreError> {
        self.select_ids(CHATS, &[]).await
    }

    async fn insert_products(&self, rows: &[Product]) -> Result<(), StoreError> {
        self.write(PRODUCTS, rows, PREFER_INSERT).await
    }

    // Upsert first, then prune. A crash in between leaves stale extra rows
    // until the next run, never an empty table.
    async fn replace_all_variants(&self, rows: &[ProductVariant]) -> Result<(), StoreError> {
        let stored = self.select_ids(VARIANTS, &[]).await?;
        self.upsert_variants(rows).await?;

        let stale = stale_ids(&stored, rows);
        if !stale.is_empty() {
            debug!("{VARIANTS}: pruning {} stale rows", stale.len());
            self.delete_ids(VARIANTS, &stale).await?;
        }
        Ok(())
    }

    async fn upsert_variants(&self, rows: &[ProductVariant]) -> Result<(), StoreError> {
        self.write(VARIANTS, rows, PREFER_UPSERT).await
    }

    async fn insert_chats(&self, ids: &[ChatId]) -> Result<(), StoreError> {
        let rows: Vec<_> = ids.iter().map(|&id| IdRow { id }).collect();
        self.write(CHATS, &rows, PREFER_IGNORE).await
    }
}
