use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use reqwest::Url;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct Config {
    pub supabase_url: Url,
    pub supabase_key: String,
    pub bot_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: Url,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub sync_chats: bool,
    /// Scrape and diff only; no writes, no messages.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_base_url() -> Url {
    Url::parse("https://shopdunssweden.se/").expect("default base url is valid")
}

fn default_telegram_api_base() -> Url {
    Url::parse("https://api.telegram.org/").expect("default telegram url is valid")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36".into()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().wrap_err("failed to load config")
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
