use std::collections::{HashMap, HashSet};

use crate::scraper::{ProductId, ProductOption, RawProduct, VariantId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub handle: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub title: String,
    pub name: String,
    pub available: bool,
    pub product_id: ProductId,
}

#[derive(Debug, Default)]
pub struct Snapshot {
    pub products: Vec<Product>,
    pub variants: Vec<ProductVariant>,
    // only used for rendering
    pub options: HashMap<ProductId, Vec<ProductOption>>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn option_values(&self, id: ProductId) -> Vec<&str> {
        self.options
            .get(&id)
            .into_iter()
            .flatten()
            .flat_map(|option| option.values.iter().map(|v| v.trim()))
            .collect()
    }
}

pub fn normalize(raw: &[RawProduct]) -> Snapshot {
    let mut snapshot = Snapshot::default();
    let mut seen_products = HashSet::new();
    let mut seen_variants = HashSet::new();

    for record in raw {
        if seen_products.insert(record.id) {
            snapshot.products.push(Product {
                id: record.id,
                title: record.title.clone(),
                handle: record.handle.clone(),
                url: record.url.clone(),
            });
            snapshot
                .options
                .insert(record.id, record.options_with_values.clone());
        }

        // first parent to list a variant keeps it
        for variant in &record.variants {
            if seen_variants.insert(variant.id) {
                snapshot.variants.push(ProductVariant {
                    id: variant.id,
                    title: variant.title.clone(),
                    name: variant.display_name().to_string(),
                    available: variant.available,
                    product_id: record.id,
                });
            }
        }
    }

    snapshot
}
