pub mod config;
pub mod llm;
pub mod search;
pub mod weather;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use config::ProviderConfig;
pub use llm::{
    request_enhancement, strip_code_fences, ChatTurnRequest, GeminiClient, LanguageModel,
    ModelTurn, ToolCall, ToolResult, TranscriptEntry,
};
pub use search::{
    offline_hits, SearchBatch, SearchProvider, SearchService, TavilySearch, MAX_CONCURRENT_QUERIES,
};
pub use weather::{OpenMeteo, OpenWeather, WeatherChain, WeatherProvider};

/// Every outbound dependency of the concierge, built once at startup.
#[derive(Clone)]
pub struct Providers {
    pub search: SearchService,
    pub weather: WeatherChain,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub enhancement_enabled: bool,
    pub config: ProviderConfig,
}

impl Providers {
    pub fn from_config(config: ProviderConfig) -> Result<Self> {
        let client = config.http_client()?;

        let search_provider = config.tavily_api_key.as_deref().map(|key| {
            Arc::new(TavilySearch::new(client.clone(), key)) as Arc<dyn SearchProvider>
        });
        let search = SearchService::new(
            search_provider,
            config.offline_search_fallback,
            config.io_timeout,
        );
        let weather = WeatherChain::standard(
            client.clone(),
            config.openweather_api_key.as_deref(),
            config.io_timeout,
        );
        let llm = config.gemini_api_key.as_deref().map(|key| {
            Arc::new(GeminiClient::new(client.clone(), key, config.llm_model.clone()))
                as Arc<dyn LanguageModel>
        });

        info!(
            search = search.label(),
            openweather = config.openweather_api_key.is_some(),
            llm = llm.is_some(),
            model = %config.llm_model,
            "providers configured"
        );

        Ok(Self {
            search,
            weather,
            llm,
            enhancement_enabled: config.enhancement_enabled,
            config,
        })
    }

    /// No network at all: no weather, no model, search answered by offline
    /// templates or by nothing when `offline_search` is false.
    pub fn offline(offline_search: bool) -> Self {
        let config = ProviderConfig {
            offline_search_fallback: offline_search,
            enhancement_enabled: false,
            ..ProviderConfig::default()
        };
        Self {
            search: SearchService::new(None, offline_search, config.io_timeout),
            weather: WeatherChain::disabled(),
            llm: None,
            enhancement_enabled: false,
            config,
        }
    }

    pub fn with_search(mut self, search: SearchService) -> Self {
        self.search = search;
        self
    }

    pub fn with_weather(mut self, weather: WeatherChain) -> Self {
        self.weather = weather;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self.enhancement_enabled = true;
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm
            .as_deref()
            .map(|llm| llm.model_name())
            .unwrap_or(self.config.llm_model.as_str())
    }
}
