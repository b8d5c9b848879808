use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    requests_total: AtomicU64,
    search_queries_total: AtomicU64,
    search_fallback_total: AtomicU64,
    weather_unavailable_total: AtomicU64,
    enhancement_applied_total: AtomicU64,
    enhancement_discarded_total: AtomicU64,
    chat_turns_total: AtomicU64,
    tool_calls_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub search_queries_total: u64,
    pub search_fallback_total: u64,
    pub weather_unavailable_total: u64,
    pub enhancement_applied_total: u64,
    pub enhancement_discarded_total: u64,
    pub chat_turns_total: u64,
    pub tool_calls_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_search_queries(&self, queries: usize) {
        self.search_queries_total
            .fetch_add(queries as u64, Ordering::Relaxed);
    }

    /// Queries that were answered by offline hits or by nothing.
    pub fn add_search_fallbacks(&self, queries: usize) {
        self.search_fallback_total
            .fetch_add(queries as u64, Ordering::Relaxed);
    }

    pub fn inc_weather_unavailable(&self) {
        self.weather_unavailable_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enhancement_applied(&self) {
        self.enhancement_applied_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_enhancement_discarded(&self) {
        self.enhancement_discarded_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_chat_turn(&self) {
        self.chat_turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tool_call(&self) {
        self.tool_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            search_queries_total: self.search_queries_total.load(Ordering::Relaxed),
            search_fallback_total: self.search_fallback_total.load(Ordering::Relaxed),
            weather_unavailable_total: self.weather_unavailable_total.load(Ordering::Relaxed),
            enhancement_applied_total: self.enhancement_applied_total.load(Ordering::Relaxed),
            enhancement_discarded_total: self.enhancement_discarded_total.load(Ordering::Relaxed),
            chat_turns_total: self.chat_turns_total.load(Ordering::Relaxed),
            tool_calls_total: self.tool_calls_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,concierge_api=info,concierge_agents=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
