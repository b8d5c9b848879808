use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use concierge_core::SearchHit;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const OFFLINE_HIT_CAP: usize = 3;
/// Provider calls one [`SearchService::search_pois`] batch keeps in flight.
pub const MAX_CONCURRENT_QUERIES: usize = 3;
const OFFLINE_TEMPLATES: [&str; 5] = [
    "Explore {base}",
    "Local favorite: {base}",
    "Don't miss: {base}",
    "Hidden gem near {location}",
    "Top pick for visitors: {base}",
];

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn label(&self) -> &'static str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Clone)]
pub struct TavilySearch {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

impl TavilySearch {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn label(&self) -> &'static str {
        "Tavily search"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let payload = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "advanced",
            "max_results": max_results,
        });

        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .json(&payload)
            .send()
            .await
            .context("Tavily request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Tavily non-success status {}: {}", status.as_u16(), body);
        }

        let body: TavilyResponse = response.json().await.context("Tavily parse failed")?;
        Ok(body.results)
    }
}

/// Deterministic stand-in hits so planning still yields something when search
/// is unconfigured or failing.
pub fn offline_hits(location: &str, query: &str, max_results: usize) -> Vec<SearchHit> {
    let trimmed = query.trim();
    let base = if trimmed.is_empty() {
        format!("things to do in {location}")
    } else {
        trimmed.to_string()
    };
    let title_base = title_case(&base);
    let slug = location.replace(' ', "-").to_lowercase();

    OFFLINE_TEMPLATES
        .iter()
        .cycle()
        .take(OFFLINE_HIT_CAP.min(max_results))
        .enumerate()
        .map(|(idx, template)| {
            let title = template
                .replace("{base}", &title_base)
                .replace("{location}", location);
            SearchHit::new(
                title.trim(),
                Some(format!("https://example.org/{slug}/{}", idx + 1)),
                format!("Suggested activity inspired by '{base}' in {location}."),
            )
        })
        .collect()
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut previous_alpha = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if previous_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_alpha = true;
        } else {
            out.push(ch);
            previous_alpha = false;
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchBatch {
    pub hits: Vec<SearchHit>,
    /// Queries answered by offline hits or by nothing at all.
    pub degraded_queries: usize,
}

/// Runs query batches against the configured provider with a per-query
/// timeout, substituting offline hits (when enabled) for anything that fails
/// or comes back empty.
#[derive(Clone)]
pub struct SearchService {
    provider: Option<Arc<dyn SearchProvider>>,
    offline_fallback: bool,
    timeout: Duration,
}

impl SearchService {
    pub fn new(
        provider: Option<Arc<dyn SearchProvider>>,
        offline_fallback: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            offline_fallback,
            timeout,
        }
    }

    pub fn label(&self) -> &'static str {
        match (&self.provider, self.offline_fallback) {
            (Some(provider), _) => provider.label(),
            (None, true) => "offline search templates",
            (None, false) => "no search provider",
        }
    }

    /// Hits for every query in order; each query is sent as `"{query} in {location}"`.
    /// At most [`MAX_CONCURRENT_QUERIES`] queries run at once.
    pub async fn search_pois(&self, location: &str, queries: &[String], max_results: usize) -> SearchBatch {
        let searches = queries
            .iter()
            .map(|query| self.search_one(location, query, max_results))
            .collect::<Vec<_>>();
        let per_query = stream::iter(searches)
            .buffered(MAX_CONCURRENT_QUERIES)
            .collect::<Vec<_>>()
            .await;

        let mut batch = SearchBatch::default();
        for (hits, degraded) in per_query {
            if degraded {
                batch.degraded_queries += 1;
            }
            batch.hits.extend(hits);
        }
        batch
    }

    async fn search_one(&self, location: &str, query: &str, max_results: usize) -> (Vec<SearchHit>, bool) {
        let Some(provider) = self.provider.as_ref() else {
            return (self.fallback(location, query, max_results), true);
        };

        let full_query = format!("{query} in {location}");
        match tokio::time::timeout(self.timeout, provider.search(&full_query, max_results)).await {
            Ok(Ok(hits)) if !hits.is_empty() => {
                debug!(query = %full_query, hits = hits.len(), "search answered");
                (hits, false)
            }
            Ok(Ok(_)) => {
                debug!(query = %full_query, "search returned no results");
                (self.fallback(location, query, max_results), true)
            }
            Ok(Err(err)) => {
                warn!(query = %full_query, error = %err, "search failed, degrading");
                (self.fallback(location, query, max_results), true)
            }
            Err(_) => {
                warn!(query = %full_query, timeout_ms = self.timeout.as_millis() as u64, "search timed out, degrading");
                (self.fallback(location, query, max_results), true)
            }
        }
    }

    fn fallback(&self, location: &str, query: &str, max_results: usize) -> Vec<SearchHit> {
        if self.offline_fallback {
            offline_hits(location, query, max_results)
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSearch {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        fn label(&self) -> &'static str {
            "scripted"
        }

        async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            self.seen.lock().unwrap().push(query.to_string());
            if query.starts_with("broken") {
                anyhow::bail!("upstream 500");
            }
            if query.starts_with("empty") {
                return Ok(Vec::new());
            }
            Ok(vec![SearchHit::new(format!("hit for {query}"), None, "")])
        }
    }

    /// Tracks how many searches overlap; each one takes a few milliseconds.
    #[derive(Default)]
    struct GaugeSearch {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchProvider for GaugeSearch {
        fn label(&self) -> &'static str {
            "gauge"
        }

        async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![SearchHit::new(query, None, "")])
        }
    }

    struct StalledSearch;

    #[async_trait]
    impl SearchProvider for StalledSearch {
        fn label(&self) -> &'static str {
            "stalled"
        }

        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![SearchHit::new("too late", None, "")])
        }
    }

    #[tokio::test]
    async fn batch_concurrency_is_bounded_and_order_kept() {
        let provider = Arc::new(GaugeSearch::default());
        let service = SearchService::new(Some(provider.clone()), false, Duration::from_secs(5));
        let queries = (0..10).map(|idx| format!("query {idx}")).collect::<Vec<_>>();

        let batch = service.search_pois("Rome", &queries, 6).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 10);
        assert!(provider.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_QUERIES);
        let titles = batch
            .hits
            .iter()
            .map(|hit| hit.title.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        let expected = queries
            .iter()
            .map(|query| format!("{query} in Rome"))
            .collect::<Vec<_>>();
        assert_eq!(titles, expected);
    }

    #[tokio::test]
    async fn stalled_provider_times_out_to_empty_without_fallback() {
        let service = SearchService::new(Some(Arc::new(StalledSearch)), false, Duration::from_millis(50));
        let batch = service
            .search_pois("Paris, FR", &["museums".to_string(), "cafes".to_string()], 6)
            .await;
        assert!(batch.hits.is_empty());
        assert_eq!(batch.degraded_queries, 2);

        let service = SearchService::new(Some(Arc::new(StalledSearch)), true, Duration::from_millis(50));
        let batch = service.search_pois("Paris, FR", &["museums".to_string()], 6).await;
        assert_eq!(batch.hits[0].title.as_deref(), Some("Explore Museums"));
    }

    #[test]
    fn offline_hits_cycle_templates_and_cap_at_three() {
        let hits = offline_hits("New York", "best morning activities New York", 6);
        assert_eq!(hits.len(), 3);
        assert_eq!(
            hits[0].title.as_deref(),
            Some("Explore Best Morning Activities New York")
        );
        assert_eq!(
            hits[2].title.as_deref(),
            Some("Don't miss: Best Morning Activities New York")
        );
        assert_eq!(hits[1].url.as_deref(), Some("https://example.org/new-york/2"));
        assert_eq!(
            hits[0].content.as_deref(),
            Some("Suggested activity inspired by 'best morning activities New York' in New York.")
        );
    }

    #[test]
    fn offline_hits_respect_small_limits_and_blank_queries() {
        let hits = offline_hits("Oslo", "  ", 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title.as_deref(), Some("Explore Things To Do In Oslo"));
    }

    #[test]
    fn title_case_lowercases_inner_letters() {
        assert_eq!(title_case("paris, FR 3rd"), "Paris, Fr 3Rd");
    }

    #[tokio::test]
    async fn failures_and_empty_answers_degrade_per_query() {
        let provider = Arc::new(ScriptedSearch::default());
        let service = SearchService::new(Some(provider.clone()), true, Duration::from_secs(5));
        let queries = vec!["museums".to_string(), "broken".to_string(), "empty".to_string()];

        let batch = service.search_pois("Rome", &queries, 6).await;

        assert_eq!(batch.degraded_queries, 2);
        assert_eq!(batch.hits[0].title.as_deref(), Some("hit for museums in Rome"));
        assert_eq!(batch.hits.len(), 1 + 3 + 3);
        assert_eq!(batch.hits[1].title.as_deref(), Some("Explore Broken"));
        let mut seen = provider.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["broken in Rome", "empty in Rome", "museums in Rome"]);
    }

    #[tokio::test]
    async fn disabled_fallback_yields_nothing() {
        let service = SearchService::new(None, false, Duration::from_secs(5));
        let batch = service.search_pois("Paris, FR", &["top attractions Paris, FR".to_string()], 6).await;
        assert!(batch.hits.is_empty());
        assert_eq!(batch.degraded_queries, 1);
        assert_eq!(service.label(), "no search provider");
    }
}
