use color_eyre::{Result, eyre::Context};
use log::{info, warn};
use strum::VariantArray;
use tracing_subscriber::EnvFilter;

mod config;
mod diff;
mod error;
mod normalize;
mod notify;
mod pipeline;
mod scraper;
mod storage;

use crate::config::Config;
use crate::notify::TelegramBot;
use crate::pipeline::Pipeline;
use crate::scraper::{Collection, Storefront, build_client};
use crate::storage::SupabaseStore;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let client = build_client(&config).wrap_err("failed to build http client")?;

    let storefront = Storefront::new(client.clone(), config.base_url.clone());
    let store = SupabaseStore::new(
        client.clone(),
        &config.supabase_url,
        config.supabase_key.clone(),
    )?;
    let bot = TelegramBot::new(client, &config.telegram_api_base, &config.bot_token)
        .wrap_err("invalid telegram api base")?;

    let summary = Pipeline {
        pages: &storefront,
        store: &store,
        messenger: &bot,
        base_url: &config.base_url,
        collections: Collection::VARIANTS,
        sync_chats: config.sync_chats,
        dry_run: config.dry_run,
    }
    .run()
    .await
    .wrap_err("tracker run failed")?;

    info!("Run finished: {summary}");
    if !summary.failed_pages.is_empty() {
        warn!("Pages that failed to load: {:?}", summary.failed_pages);
    }
    if !summary.failed_chats.is_empty() {
        warn!("Chats that weren't notified: {:?}", summary.failed_chats);
    }
    Ok(())
}
