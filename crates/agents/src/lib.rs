mod chat;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use concierge_core::weather::DEFAULT_FORECAST_DAYS;
use concierge_core::{
    merge_preferences, reconcile_text, summarize, AssembledItinerary, BookingContext,
    ConciergeAsk, ConciergeError, ConciergeResponse, ItineraryAssembler, Preferences,
    Reconciliation, SlotHits, WeatherSummary,
};
use concierge_observability::AppMetrics;
use concierge_providers::{request_enhancement, Providers};
use concierge_storage::{
    BookingRepository, ChatHistoryEntry, ChatHistoryRepository, FavoritesRepository,
    PreferencesRepository, DEFAULT_HISTORY_LIMIT,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

pub use chat::{LegacyChatRequest, LegacyChatResponse};

/// Search slots (each a batch of queries) one itinerary keeps in flight.
pub const MAX_CONCURRENT_SLOTS: usize = 4;

/// Everything the agent needs from persistence.
pub trait ConciergeStore:
    BookingRepository + PreferencesRepository + FavoritesRepository + ChatHistoryRepository
{
}

impl<T> ConciergeStore for T where
    T: BookingRepository + PreferencesRepository + FavoritesRepository + ChatHistoryRepository
{
}

/// Which optional stages of the pipeline run for a given caller.
#[derive(Debug, Clone, Copy)]
struct PlanMode {
    weather: bool,
    enhance: bool,
}

impl PlanMode {
    /// The chat model's `generate_itinerary` tool plans without weather or a
    /// second model call.
    const TOOL: Self = Self {
        weather: false,
        enhance: false,
    };
}

#[derive(Clone)]
pub struct ConciergeAgent<S>
where
    S: ConciergeStore,
{
    providers: Providers,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
}

impl<S> ConciergeAgent<S>
where
    S: ConciergeStore,
{
    pub fn new(providers: Providers, store: Arc<S>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            providers,
            store,
            metrics,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Builds the itinerary for one booking. Client mistakes surface as
    /// [`ConciergeError`] inside the returned error; provider trouble never
    /// does.
    #[instrument(skip(self, ask), fields(booking_id = ask.booking.booking_id))]
    pub async fn plan(&self, ask: ConciergeAsk) -> Result<ConciergeResponse> {
        let started = Instant::now();
        self.metrics.inc_request();

        let mode = PlanMode {
            weather: true,
            enhance: self.providers.enhancement_enabled,
        };
        let outcome = self.build_itinerary(ask, mode).await;

        self.metrics.observe_latency(started.elapsed());
        outcome.map(|(_, response)| response)
    }

    /// Chat history for a booking, oldest first. No booking means no history.
    pub async fn history(
        &self,
        booking_id: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<ChatHistoryEntry>> {
        let Some(booking_id) = booking_id else {
            return Ok(Vec::new());
        };
        self.store
            .chat_history(booking_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// Returns the hydrated booking alongside the itinerary.
    async fn build_itinerary(
        &self,
        ask: ConciergeAsk,
        mode: PlanMode,
    ) -> Result<(BookingContext, ConciergeResponse)> {
        // Location may still come from the stored booking; the date range cannot.
        ask.booking.validate_dates()?;

        let (mut booking, prefs) = self.hydrate(ask.booking, ask.prefs).await?;
        booking.validate()?;

        let weather = if mode.weather {
            self.weather_for(&mut booking).await
        } else {
            WeatherSummary::unavailable()
        };

        let resolved = merge_preferences(prefs.as_ref(), ask.free_text.as_deref());
        let (assembled, days) = {
            let assembler = ItineraryAssembler::new(&booking, &resolved)?;
            let tasks = assembler.search_tasks();

            let searches = tasks
                .iter()
                .map(|task| {
                    self.providers
                        .search
                        .search_pois(assembler.location(), &task.queries, task.max_results)
                })
                .collect::<Vec<_>>();
            let batches = stream::iter(searches)
                .buffered(MAX_CONCURRENT_SLOTS)
                .collect::<Vec<_>>()
                .await;

            let mut results = Vec::with_capacity(tasks.len());
            for (task, batch) in tasks.iter().zip(batches) {
                self.metrics.add_search_queries(task.queries.len());
                self.metrics.add_search_fallbacks(batch.degraded_queries);
                results.push(SlotHits {
                    slot: task.slot,
                    hits: batch.hits,
                });
            }

            let assembled = assembler.assemble(results, &weather, self.providers.search.label());
            (assembled, assembler.days().len())
        };

        let (response, enhanced) = if mode.enhance {
            self.enhance(assembled).await
        } else {
            (assembled.response, false)
        };

        info!(
            location = booking.location().unwrap_or_default(),
            days,
            restaurants = response.restaurants.len(),
            forecast_days = weather.forecast.len(),
            enhanced,
            "itinerary planned"
        );

        Ok((booking, response))
    }

    async fn hydrate(
        &self,
        mut booking: BookingContext,
        prefs: Option<Preferences>,
    ) -> Result<(BookingContext, Option<Preferences>)> {
        let Some(booking_id) = booking.booking_id else {
            return Ok((booking, prefs));
        };

        let record = match self.store.get_booking(booking_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ConciergeError::BookingNotFound(booking_id).into()),
            Err(err) => {
                warn!(booking_id, error = %err, "booking lookup failed, using request booking");
                return Ok((booking, prefs));
            }
        };

        if let Some(location) = record.location.filter(|value| !value.trim().is_empty()) {
            booking.location = Some(location);
        }
        if booking.guests.is_none() {
            booking.guests = record.guests;
        }
        if booking.party_type.is_none() {
            booking.party_type = record.party_type;
        }

        let prefs = match prefs {
            Some(prefs) => Some(prefs),
            None => match self.store.traveler_preferences(record.traveler_id).await {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(traveler_id = record.traveler_id, error = %err, "preferences lookup failed");
                    None
                }
            },
        };

        Ok((booking, prefs))
    }

    /// Geocodes the booking when it has no coordinates, then summarizes
    /// whatever forecast the weather chain produced.
    async fn weather_for(&self, booking: &mut BookingContext) -> WeatherSummary {
        if booking.coordinates().is_none() {
            let location = booking.location().map(str::to_string);
            if let Some(location) = location {
                if let Some((lat, lon)) = self.providers.weather.geocode(&location).await {
                    booking.lat = Some(lat);
                    booking.lon = Some(lon);
                }
            }
        }

        let payload = match booking.coordinates() {
            Some((lat, lon)) => self.providers.weather.daily_forecast(lat, lon).await,
            None => None,
        };
        if payload.is_none() {
            self.metrics.inc_weather_unavailable();
        }
        summarize(payload.as_ref(), DEFAULT_FORECAST_DAYS)
    }

    async fn enhance(&self, assembled: AssembledItinerary) -> (ConciergeResponse, bool) {
        let Some(llm) = self.providers.llm.as_deref() else {
            return (assembled.response, false);
        };

        let request = request_enhancement(llm, &assembled.enhancement_context);
        let raw = match tokio::time::timeout(self.providers.config.io_timeout, request).await {
            Ok(Ok(raw)) => Some(raw),
            Ok(Err(err)) => {
                warn!(model = llm.model_name(), error = %err, "enhancement request failed");
                None
            }
            Err(_) => {
                warn!(model = llm.model_name(), "enhancement timed out");
                None
            }
        };

        match reconcile_text(assembled.response, raw.as_deref()) {
            Reconciliation::Enhanced(response) => {
                self.metrics.inc_enhancement_applied();
                (response, true)
            }
            Reconciliation::Fallback { response, reason } => {
                self.metrics.inc_enhancement_discarded();
                debug!(%reason, "keeping heuristic itinerary");
                (response, false)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use concierge_providers::{ChatTurnRequest, LanguageModel, ModelTurn};

    /// Plays back canned answers and records every chat request it saw.
    #[derive(Default)]
    pub struct ScriptedModel {
        pub delay: Option<Duration>,
        pub enhancement: Option<String>,
        pub turns: Mutex<VecDeque<Result<ModelTurn, String>>>,
        pub seen: Mutex<Vec<ChatTurnRequest>>,
    }

    impl ScriptedModel {
        pub fn stalled() -> Self {
            Self {
                delay: Some(Duration::from_secs(30)),
                enhancement: Some("{}".into()),
                ..Self::default()
            }
        }

        pub fn with_enhancement(raw: &str) -> Self {
            Self {
                enhancement: Some(raw.to_string()),
                ..Self::default()
            }
        }

        pub fn with_turns(turns: Vec<Result<ModelTurn, String>>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate_json(&self, _system: &str, _user: &str) -> Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.enhancement {
                Some(raw) => Ok(raw.clone()),
                None => anyhow::bail!("no enhancement scripted"),
            }
        }

        async fn chat_turn(&self, request: &ChatTurnRequest) -> Result<ModelTurn> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen.lock().unwrap().push(request.clone());
            match self.turns.lock().unwrap().pop_front() {
                Some(Ok(turn)) => Ok(turn),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => anyhow::bail!("script exhausted"),
            }
        }
    }
}
