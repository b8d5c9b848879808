use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash";

/// Provider keys and I/O budgets, read once at process start.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub gemini_api_key: Option<String>,
    pub llm_model: String,
    pub tavily_api_key: Option<String>,
    pub openweather_api_key: Option<String>,
    /// Whole-request budget for a single outbound HTTP call.
    pub http_timeout: Duration,
    /// Budget for one pipeline step (a search query, the weather chain, the enhancement call).
    pub io_timeout: Duration,
    pub offline_search_fallback: bool,
    pub enhancement_enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            tavily_api_key: None,
            openweather_api_key: None,
            http_timeout: Duration::from_secs(20),
            io_timeout: Duration::from_secs(25),
            offline_search_fallback: true,
            enhancement_enabled: true,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            llm_model: non_empty_var("CONCIERGE_LLM_MODEL").unwrap_or(defaults.llm_model),
            tavily_api_key: non_empty_var("TAVILY_API_KEY"),
            openweather_api_key: non_empty_var("OPENWEATHER_API_KEY"),
            http_timeout: env::var("CONCIERGE_HTTP_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            io_timeout: env::var("CONCIERGE_IO_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.io_timeout),
            offline_search_fallback: env::var("CONCIERGE_OFFLINE_SEARCH_FALLBACK")
                .ok()
                .and_then(|value| parse_flag(&value))
                .unwrap_or(defaults.offline_search_fallback),
            enhancement_enabled: env::var("CONCIERGE_ENHANCEMENT")
                .ok()
                .and_then(|value| parse_flag(&value))
                .unwrap_or(defaults.enhancement_enabled),
        }
    }

    pub fn http_client(&self) -> Result<Client> {
        Client::builder()
            .connect_timeout(Duration::from_secs(6))
            .timeout(self.http_timeout)
            .build()
            .context("failed to build HTTP client")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
