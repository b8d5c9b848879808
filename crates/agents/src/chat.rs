use std::time::Instant;

use anyhow::Result;
use concierge_core::chat::{
    normalize_context, system_prompt, EMPTY_REPLY, FALLBACK_REPLY, GREETING, MAX_MODEL_TURNS,
    NO_RECORDS,
};
use concierge_core::tools::{
    FAVORITES_LIMIT, MISSING_COORDINATES, MISSING_LOOKUP_KEYS, MISSING_SEARCH_ARGS,
    TRAVELER_BOOKINGS_LIMIT,
};
use concierge_core::weather::DEFAULT_FORECAST_DAYS;
use concierge_core::{
    summarize, tool_declarations, ActivityCard, BookingContext, ChatMessage, ChatRole, ConciergeAsk,
    ConciergeChatRequest, ConciergeChatResponse, ConciergeError, ConciergeResponse, ConciergeTool,
    Preferences,
};
use concierge_providers::{ChatTurnRequest, ModelTurn, ToolCall, ToolResult, TranscriptEntry};
use concierge_storage::{BookingRepository, FavoritesRepository};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{ConciergeAgent, ConciergeStore, PlanMode};

/// Older single-message chat shape: a loosely keyed booking plus one message.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyChatRequest {
    #[serde(default)]
    pub booking: Option<Value>,
    pub message: String,
    #[serde(default)]
    pub prefs: Option<Value>,
    #[serde(default)]
    pub history: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegacyChatResponse {
    pub reply: String,
    pub concierge: ConciergeResponse,
}

impl<S> ConciergeAgent<S>
where
    S: ConciergeStore,
{
    #[instrument(skip(self, request), fields(messages = request.messages.len()))]
    pub async fn chat(&self, request: ConciergeChatRequest) -> ConciergeChatResponse {
        let started = Instant::now();
        self.metrics.inc_request();

        let context = normalize_context(request.context);
        let reply = self.converse(request.messages, context).await;

        self.metrics.observe_latency(started.elapsed());
        ConciergeChatResponse { reply }
    }

    /// Plans with the message as free text, then answers it through the chat
    /// model with the booking as context. Both sides of the exchange are kept
    /// in the booking's history when the booking has an id.
    #[instrument(skip(self, request))]
    pub async fn legacy_chat(&self, request: LegacyChatRequest) -> Result<LegacyChatResponse> {
        let started = Instant::now();
        self.metrics.inc_request();

        let Some(mut booking_raw) = request.booking.filter(|value| !value.is_null()) else {
            return Err(ConciergeError::InvalidBooking("booking is required".into()).into());
        };
        let booking = BookingContext::from_loose_json(&booking_raw)?;
        let prefs = match request.prefs.filter(|value| !value.is_null()) {
            Some(raw) => Some(
                serde_json::from_value::<Preferences>(raw)
                    .map_err(|err| ConciergeError::InvalidPreferences(err.to_string()))?,
            ),
            None => None,
        };
        let booking_id = booking.booking_id;

        let ask = ConciergeAsk {
            booking,
            prefs,
            free_text: Some(request.message.clone()),
        };
        let mode = PlanMode {
            weather: true,
            enhance: self.providers.enhancement_enabled,
        };
        let (hydrated, concierge) = self.build_itinerary(ask, mode).await?;

        if let (Some(location), Some(object)) = (hydrated.location(), booking_raw.as_object_mut()) {
            object.insert("location".into(), json!(location));
            object.insert("property_location".into(), json!(location));
        }

        if let Some(booking_id) = booking_id {
            self.remember(booking_id, ChatRole::User, &request.message).await;
        }

        let mut messages = request
            .history
            .unwrap_or_default()
            .iter()
            .filter_map(history_message)
            .collect::<Vec<_>>();
        messages.push(ChatMessage::user(request.message));

        let mut context = Map::new();
        context.insert("active_booking".into(), booking_raw);
        let reply = self.converse(messages, context).await;

        if let Some(booking_id) = booking_id {
            self.remember(booking_id, ChatRole::Assistant, &reply).await;
        }

        self.metrics.observe_latency(started.elapsed());
        Ok(LegacyChatResponse { reply, concierge })
    }

    async fn remember(&self, booking_id: i64, role: ChatRole, content: &str) {
        if let Err(err) = self.store.append_chat_message(booking_id, role, content).await {
            warn!(booking_id, role = role.as_str(), error = %err, "failed to persist chat message");
        }
    }

    /// Runs the model/tool loop and always produces a reply.
    async fn converse(&self, messages: Vec<ChatMessage>, context: Map<String, Value>) -> String {
        if messages.is_empty() {
            return GREETING.to_string();
        }
        let Some(llm) = self.providers.llm.clone() else {
            debug!("no chat model configured");
            return FALLBACK_REPLY.to_string();
        };

        let mut request = ChatTurnRequest {
            system: system_prompt(&context),
            transcript: messages.into_iter().map(TranscriptEntry::Message).collect(),
            tools: tool_declarations(),
        };

        for turn in 0..MAX_MODEL_TURNS {
            self.metrics.inc_chat_turn();
            let outcome =
                tokio::time::timeout(self.providers.config.io_timeout, llm.chat_turn(&request)).await;

            match outcome {
                Ok(Ok(ModelTurn::Text(text))) => {
                    let text = text.trim();
                    info!(turn, reply_chars = text.len(), "chat answered");
                    return if text.is_empty() { EMPTY_REPLY } else { text }.to_string();
                }
                Ok(Ok(ModelTurn::ToolCalls(calls))) => {
                    debug!(turn, calls = calls.len(), "model requested tools");
                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        results.push(self.run_tool(call).await);
                    }
                    request.transcript.push(TranscriptEntry::ToolCalls(calls));
                    request.transcript.push(TranscriptEntry::ToolResults(results));
                }
                Ok(Err(err)) => {
                    warn!(model = llm.model_name(), error = %err, "chat model call failed");
                    return FALLBACK_REPLY.to_string();
                }
                Err(_) => {
                    warn!(model = llm.model_name(), "chat model call timed out");
                    return FALLBACK_REPLY.to_string();
                }
            }
        }

        warn!(turns = MAX_MODEL_TURNS, "tool loop ended without a text reply");
        EMPTY_REPLY.to_string()
    }

    /// Tool failures go back to the model as the tool's output text.
    async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        self.metrics.inc_tool_call();

        let output = match ConciergeTool::from_call(&call.name, &call.args) {
            Ok(tool) => {
                let name = tool.name();
                debug!(tool = name, "running tool");
                match self.execute_tool(tool).await {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(tool = name, error = %err, "tool failed");
                        format!("Tool {name} failed: {err}")
                    }
                }
            }
            Err(err) => {
                warn!(tool = %call.name, error = %err, "rejected tool call");
                err.to_string()
            }
        };

        ToolResult {
            name: call.name.clone(),
            output,
        }
    }

    async fn execute_tool(&self, tool: ConciergeTool) -> Result<String> {
        match tool {
            ConciergeTool::LookupBooking(args) => {
                let records = match (args.booking_id, args.traveler_id) {
                    (Some(booking_id), _) => {
                        self.store.get_booking(booking_id).await?.into_iter().collect()
                    }
                    (None, Some(traveler_id)) => {
                        self.store
                            .bookings_for_traveler(traveler_id, TRAVELER_BOOKINGS_LIMIT)
                            .await?
                    }
                    (None, None) => return Ok(MISSING_LOOKUP_KEYS.to_string()),
                };
                serialize_rows(&records)
            }
            ConciergeTool::ListFavorites(args) => {
                let favorites = self.store.favorites(args.traveler_id, FAVORITES_LIMIT).await?;
                serialize_rows(&favorites)
            }
            ConciergeTool::SearchPois(args) => {
                let location = args.location.trim();
                let query = args.query.trim();
                if location.is_empty() || query.is_empty() {
                    return Ok(MISSING_SEARCH_ARGS.to_string());
                }
                let batch = self
                    .providers
                    .search
                    .search_pois(location, &[query.to_string()], args.max_results)
                    .await;
                self.metrics.add_search_queries(1);
                self.metrics.add_search_fallbacks(batch.degraded_queries);
                serialize_rows(&batch.hits)
            }
            ConciergeTool::GetWeather(args) => {
                let coordinates = match (args.lat, args.lon, args.location.as_deref()) {
                    (Some(lat), Some(lon), _) => Some((lat, lon)),
                    (_, _, Some(location)) => self.providers.weather.geocode(location).await,
                    _ => None,
                };
                let Some((lat, lon)) = coordinates else {
                    return Ok(MISSING_COORDINATES.to_string());
                };

                let payload = self.providers.weather.daily_forecast(lat, lon).await;
                if payload.is_none() {
                    self.metrics.inc_weather_unavailable();
                }
                let summary = summarize(payload.as_ref(), DEFAULT_FORECAST_DAYS);
                serialize_rows(&summary.forecast)
            }
            ConciergeTool::GenerateItinerary(args) => {
                let ask = ConciergeAsk {
                    booking: args.booking_context()?,
                    prefs: args.preferences()?,
                    free_text: args.notes.clone(),
                };
                let (_, response) = self.build_itinerary(ask, PlanMode::TOOL).await?;
                Ok(itinerary_digest(&response).to_string())
            }
        }
    }
}

fn serialize_rows<T: Serialize>(rows: &[T]) -> Result<String> {
    if rows.is_empty() {
        return Ok(NO_RECORDS.to_string());
    }
    Ok(serde_json::to_string(rows)?)
}

/// Titles only; the model rewrites the plan in its own words anyway.
fn itinerary_digest(response: &ConciergeResponse) -> Value {
    let plan = response
        .plan
        .iter()
        .map(|day| {
            json!({
                "date": day.date,
                "morning": titles(&day.morning),
                "afternoon": titles(&day.afternoon),
                "evening": titles(&day.evening),
            })
        })
        .collect::<Vec<_>>();

    json!({
        "plan": plan,
        "restaurants": titles(&response.restaurants),
        "packing_checklist": response.packing_checklist,
    })
}

fn titles(cards: &[ActivityCard]) -> Vec<String> {
    cards.iter().map(|card| card.title.clone()).collect()
}

/// Prior turns sent by the browser; `text` is accepted for `content`.
fn history_message(item: &Value) -> Option<ChatMessage> {
    let role = ChatRole::parse(item.get("role")?.as_str()?)?;
    let content = ["content", "text"]
        .iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())?;
    Some(ChatMessage {
        role,
        content: content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use concierge_core::ChatRole;
    use concierge_observability::AppMetrics;
    use concierge_providers::Providers;
    use concierge_storage::{BookingRecord, FavoriteRecord, MemoryStore};

    use super::*;
    use crate::test_support::ScriptedModel;

    fn agent_with(model: ScriptedModel) -> (ConciergeAgent<MemoryStore>, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let providers = Providers::offline(true).with_llm(model.clone());
        let agent = ConciergeAgent::new(providers, Arc::new(MemoryStore::new()), AppMetrics::shared());
        (agent, model)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            args,
        }
    }

    fn user_says(text: &str) -> ConciergeChatRequest {
        ConciergeChatRequest {
            messages: vec![ChatMessage::user(text)],
            context: Map::new(),
        }
    }

    async fn seed_booking(agent: &ConciergeAgent<MemoryStore>) {
        let day = NaiveDate::from_ymd_opt(2024, 9, 14).unwrap();
        agent
            .store
            .upsert_booking(BookingRecord {
                booking_id: 5,
                traveler_id: 9,
                property_id: Some(77),
                property_name: Some("Alfama flat".into()),
                location: Some("Lisbon, PT".into()),
                start_date: day,
                end_date: day,
                guests: Some(2),
                party_type: None,
                status: Some("confirmed".into()),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_conversation_gets_the_greeting() {
        let (agent, model) = agent_with(ScriptedModel::default());
        let response = agent
            .chat(ConciergeChatRequest {
                messages: Vec::new(),
                context: Map::new(),
            })
            .await;
        assert_eq!(response.reply, GREETING);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_or_failing_model_falls_back() {
        let agent = ConciergeAgent::new(
            Providers::offline(true),
            Arc::new(MemoryStore::new()),
            AppMetrics::shared(),
        );
        assert_eq!(agent.chat(user_says("hi")).await.reply, FALLBACK_REPLY);

        let (agent, _) = agent_with(ScriptedModel::with_turns(vec![Err("quota".into())]));
        assert_eq!(agent.chat(user_says("hi")).await.reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn stalled_model_falls_back() {
        let model = Arc::new(ScriptedModel::stalled());
        let mut providers = Providers::offline(true).with_llm(model);
        providers.config.io_timeout = std::time::Duration::from_millis(50);
        let agent = ConciergeAgent::new(providers, Arc::new(MemoryStore::new()), AppMetrics::shared());

        assert_eq!(agent.chat(user_says("hi")).await.reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn blank_model_text_becomes_a_polite_default() {
        let (agent, _) = agent_with(ScriptedModel::with_turns(vec![Ok(ModelTurn::Text("  ".into()))]));
        assert_eq!(agent.chat(user_says("thanks")).await.reply, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_model_turn() {
        let (agent, model) = agent_with(ScriptedModel::with_turns(vec![
            Ok(ModelTurn::ToolCalls(vec![
                call("lookup_booking", json!({ "booking_id": 5 })),
                call("list_favorites", json!({ "traveler_id": 9 })),
                call("book_flight", json!({})),
            ])),
            Ok(ModelTurn::Text("Your stay is in Lisbon.".into())),
        ]));
        seed_booking(&agent).await;

        let mut request = user_says("where am I staying?");
        request
            .context
            .insert("active_booking".into(), json!({ "property_location": "Lisbon, PT" }));
        let response = agent.chat(request).await;
        assert_eq!(response.reply, "Your stay is in Lisbon.");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].system.contains("\"active_booking_location\":\"Lisbon, PT\""));
        assert_eq!(seen[0].tools.len(), 5);

        let Some(TranscriptEntry::ToolResults(results)) = seen[1].transcript.last() else {
            panic!("expected tool results at the end of the transcript");
        };
        assert!(results[0].output.contains("\"location\":\"Lisbon, PT\""));
        assert_eq!(results[1].output, NO_RECORDS);
        assert_eq!(results[2].output, "unknown tool `book_flight`");
        assert_eq!(agent.metrics.snapshot().tool_calls_total, 3);
    }

    #[tokio::test]
    async fn tools_report_missing_arguments_in_plain_text() {
        let (agent, _) = agent_with(ScriptedModel::default());
        agent
            .store
            .add_favorite(FavoriteRecord {
                favorite_id: 1,
                traveler_id: 9,
                property_id: 77,
                name: "Alfama flat".into(),
                location: Some("Lisbon, PT".into()),
                price_per_night: Some(140.0),
            })
            .await
            .unwrap();

        let lookup = agent.run_tool(&call("lookup_booking", json!({}))).await;
        assert_eq!(lookup.output, MISSING_LOOKUP_KEYS);
        let search = agent
            .run_tool(&call("search_pois", json!({ "location": "Lisbon", "query": " " })))
            .await;
        assert_eq!(search.output, MISSING_SEARCH_ARGS);
        let weather = agent.run_tool(&call("get_weather", json!({ "location": "Lisbon" }))).await;
        assert_eq!(weather.output, MISSING_COORDINATES);
        let favorites = agent
            .run_tool(&call("list_favorites", json!({ "traveler_id": 9 })))
            .await;
        assert!(favorites.output.contains("Alfama flat"));
    }

    #[tokio::test]
    async fn generate_itinerary_tool_returns_titles() {
        let (agent, _) = agent_with(ScriptedModel::default());
        let result = agent
            .run_tool(&call(
                "generate_itinerary",
                json!({
                    "booking": "{\"location\": \"Kyoto, JP\", \"start_date\": \"2024-04-02\", \"end_date\": \"2024-04-03\"}",
                    "notes": "kids love parks"
                }),
            ))
            .await;

        let digest: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(digest["plan"].as_array().unwrap().len(), 2);
        assert_eq!(digest["plan"][0]["date"], "2024-04-02");
        assert!(digest["plan"][0]["morning"][0].is_string());
        assert_eq!(
            digest["packing_checklist"],
            json!(["comfortable shoes", "daypack", "charger"])
        );
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let turns = (0..MAX_MODEL_TURNS + 2)
            .map(|_| Ok(ModelTurn::ToolCalls(vec![call("lookup_booking", json!({}))])))
            .collect();
        let (agent, model) = agent_with(ScriptedModel::with_turns(turns));

        assert_eq!(agent.chat(user_says("loop forever")).await.reply, EMPTY_REPLY);
        assert_eq!(model.seen.lock().unwrap().len(), MAX_MODEL_TURNS);
    }

    #[tokio::test]
    async fn legacy_chat_plans_replies_and_records_history() {
        let (agent, model) = agent_with(ScriptedModel::with_turns(vec![Ok(ModelTurn::Text(
            "Enjoy the tiles!".into(),
        ))]));
        seed_booking(&agent).await;

        let response = agent
            .legacy_chat(LegacyChatRequest {
                booking: Some(json!({ "id": "5", "startDate": "2024-09-14", "endDate": "2024-09-14" })),
                message: "we are vegan".into(),
                prefs: None,
                history: Some(vec![
                    json!({ "role": "assistant", "text": "Welcome!" }),
                    json!({ "role": "system", "content": "ignored" }),
                ]),
            })
            .await
            .unwrap();

        assert_eq!(response.reply, "Enjoy the tiles!");
        assert_eq!(response.concierge.plan.len(), 1);
        assert!(response.concierge.reasoning_notes[0].contains("dietary=vegan"));

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].transcript.len(), 2);
        assert!(seen[0].system.contains("\"property_location\":\"Lisbon, PT\""));

        let history = agent.history(Some(5), None).await.unwrap();
        let roles = history.iter().map(|entry| entry.role).collect::<Vec<_>>();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant]);
        assert_eq!(history[1].content, "Enjoy the tiles!");
    }

    #[tokio::test]
    async fn legacy_chat_requires_a_booking() {
        let (agent, _) = agent_with(ScriptedModel::default());
        let err = agent
            .legacy_chat(LegacyChatRequest {
                booking: None,
                message: "hello".into(),
                prefs: None,
                history: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConciergeError>(),
            Some(ConciergeError::InvalidBooking(_))
        ));
    }
}
