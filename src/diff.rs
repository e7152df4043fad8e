use std::collections::{HashMap, HashSet};

use crate::normalize::{Product, Snapshot};
use crate::scraper::{ProductId, VariantId};
use log::warn;
use reqwest::Url;

const EMOJI_NEW: &str = "🆕";
const EMOJI_RESTOCK: &str = "🔁";
const EMOJI_LINK: &str = "🔗";

/// Telegram's cap on a single message, in UTF-16 units.
pub const MESSAGE_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restock {
    pub variant_id: VariantId,
    pub name: String,
    pub product_url: String,
}

#[derive(Debug, Default)]
pub struct CatalogDiff {
    pub new_products: Vec<Product>,
    pub restocked: Vec<Restock>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.new_products.is_empty() && self.restocked.is_empty()
    }
}

pub fn compute_diff(
    snapshot: &Snapshot,
    known_products: &HashSet<ProductId>,
    known_available: &HashSet<VariantId>,
) -> CatalogDiff {
    let urls: HashMap<_, _> = snapshot
        .products
        .iter()
        .map(|p| (p.id, p.url.as_str()))
        .collect();

    CatalogDiff {
        new_products: snapshot
            .products
            .iter()
            .filter(|p| !known_products.contains(&p.id))
            .cloned()
            .collect(),
        restocked: snapshot
            .variants
            .iter()
            .filter(|v| v.available && !known_available.contains(&v.id))
            .filter_map(|v| {
                urls.get(&v.product_id).map(|url| Restock {
                    variant_id: v.id,
                    name: v.name.clone(),
                    product_url: url.to_string(),
                })
            })
            .collect(),
    }
}

/// Escapes the characters Telegram's legacy Markdown treats as markup.
pub fn escape_markdown(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '_' | '*' | '`' | '[' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

fn absolute_url(base: &Url, path: &str) -> String {
    match base.join(path) {
        Ok(url) => url.to_string(),
        Err(err) => {
            warn!("Keeping product url {path:?} as is: {err}");
            path.to_string()
        }
    }
}

/// One numbered list item: plain text lines, then a link line.
struct Entry {
    head: String,
    url: String,
}

impl Entry {
    fn link(&self) -> String {
        format!("{EMOJI_LINK} [View product]({})\n", self.url)
    }

    /// Shortens the text, never the link, to stay within `room`. When even
    /// the link can't fit, the whole entry degrades to escaped plain text.
    fn render(&self, room: usize) -> String {
        let link = self.link();
        let full = format!("{}{link}", escape_markdown(&self.head));
        if utf16_len(&full) <= room {
            return full;
        }

        let link_len = utf16_len(&link);
        if link_len + 2 <= room {
            format!("{}…\n{link}", cut_escaped(&self.head, room - link_len - 2))
        } else {
            let plain = format!("{}{}", self.head, self.url);
            format!("{}…", cut_escaped(&plain, room.saturating_sub(1)))
        }
    }
}

/// Longest escaped prefix of `text` within `room`; escapes are never split.
fn cut_escaped(text: &str, room: usize) -> String {
    let mut cut = String::new();
    let mut used = 0;
    for c in text.chars() {
        let escaped = escape_markdown(c.encode_utf8(&mut [0; 4]));
        used += utf16_len(&escaped);
        if used > room {
            break;
        }
        cut.push_str(&escaped);
    }
    cut
}

fn product_entry(n: usize, product: &Product, options: &[&str], base: &Url) -> Entry {
    let mut head = format!("{n}. {}\n", product.title);
    if !options.is_empty() {
        head.push_str(&format!("Options: {}\n", options.join(", ")));
    }
    Entry {
        head,
        url: absolute_url(base, &product.url),
    }
}

fn restock_entry(n: usize, restock: &Restock, base: &Url) -> Entry {
    Entry {
        head: format!("{n}. {}\n", restock.name),
        url: absolute_url(base, &restock.product_url),
    }
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Packs entries under `header` into as few messages as fit `limit`,
/// never splitting an entry.
fn pack(header: &str, entries: Vec<Entry>, limit: usize) -> Vec<String> {
    let room = limit.saturating_sub(utf16_len(header) + 1);
    let mut messages = Vec::new();
    let mut current = header.to_string();
    let mut has_entries = false;

    for entry in entries {
        let entry = entry.render(room);
        if has_entries && utf16_len(&current) + 1 + utf16_len(&entry) > limit {
            messages.push(std::mem::replace(&mut current, header.to_string()));
        }
        current.push('\n');
        current.push_str(&entry);
        has_entries = true;
    }

    if has_entries {
        messages.push(current);
    }
    messages
}

pub fn render_new_products(
    diff: &CatalogDiff,
    snapshot: &Snapshot,
    base: &Url,
    limit: usize,
) -> Vec<String> {
    let entries = diff
        .new_products
        .iter()
        .enumerate()
        .map(|(i, p)| product_entry(i + 1, p, &snapshot.option_values(p.id), base))
        .collect();
    pack(&format!("{EMOJI_NEW} *New arrivals*\n"), entries, limit)
}

pub fn render_restocks(diff: &CatalogDiff, base: &Url, limit: usize) -> Vec<String> {
    let entries = diff
        .restocked
        .iter()
        .enumerate()
        .map(|(i, r)| restock_entry(i + 1, r, base))
        .collect();
    pack(&format!("{EMOJI_RESTOCK} *Back in stock*\n"), entries, limit)
}

/// Every message the diff produces: new arrivals first, then restocks.
pub fn render_messages(diff: &CatalogDiff, snapshot: &Snapshot, base: &Url) -> Vec<String> {
    let mut messages = render_new_products(diff, snapshot, base, MESSAGE_LIMIT);
    messages.extend(render_restocks(diff, base, MESSAGE_LIMIT));
    messages
}
