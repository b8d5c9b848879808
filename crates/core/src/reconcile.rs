use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{truncate_title, ActivityCard, ConciergeResponse, DayPlan, PriceTier};
use crate::planner::HEURISTIC_NOTE;
use crate::text::dedupe_preserving_order;

/// Stands in for [`HEURISTIC_NOTE`] when the model answered but wrote no notes.
pub const ENHANCED_NOTE: &str = "The assistant model generated this itinerary using your inputs.";

/// Why the heuristic itinerary was kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("no enhancement was produced")]
    Unavailable,
    #[error("enhancement was not valid JSON")]
    NotJson,
    #[error("enhancement had an unexpected shape: {0}")]
    Malformed(String),
    #[error("enhancement contained nothing usable")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Enhanced(ConciergeResponse),
    Fallback {
        response: ConciergeResponse,
        reason: FallbackReason,
    },
}

impl Reconciliation {
    pub fn is_enhanced(&self) -> bool {
        matches!(self, Self::Enhanced(_))
    }

    pub fn response(&self) -> &ConciergeResponse {
        match self {
            Self::Enhanced(response) | Self::Fallback { response, .. } => response,
        }
    }

    pub fn into_response(self) -> ConciergeResponse {
        match self {
            Self::Enhanced(response) | Self::Fallback { response, .. } => response,
        }
    }
}

/// Reconciles raw model text against the heuristic itinerary.
pub fn reconcile_text(heuristic: ConciergeResponse, raw: Option<&str>) -> Reconciliation {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return fallback(heuristic, FallbackReason::Unavailable);
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => reconcile(heuristic, Some(&value)),
        Err(_) => fallback(heuristic, FallbackReason::NotJson),
    }
}

/// Replaces heuristic fields with the external model's where the model gave
/// something usable. Structural damage anywhere discards the whole payload.
pub fn reconcile(heuristic: ConciergeResponse, external: Option<&Value>) -> Reconciliation {
    let Some(external) = external else {
        return fallback(heuristic, FallbackReason::Unavailable);
    };
    let parsed = match parse_external(external) {
        Ok(parsed) => parsed,
        Err(reason) => return fallback(heuristic, FallbackReason::Malformed(reason)),
    };

    let model_wrote_notes = !parsed.notes.is_empty();
    let mut merged = ConciergeResponse {
        plan: non_empty_or(parsed.plan, &heuristic.plan),
        restaurants: non_empty_or(parsed.restaurants, &heuristic.restaurants),
        packing_checklist: non_empty_or(parsed.packing, &heuristic.packing_checklist),
        reasoning_notes: non_empty_or(parsed.notes, &heuristic.reasoning_notes),
    };

    if merged == heuristic {
        return fallback(heuristic, FallbackReason::Empty);
    }
    if !model_wrote_notes {
        for note in &mut merged.reasoning_notes {
            if *note == HEURISTIC_NOTE {
                *note = ENHANCED_NOTE.to_string();
            }
        }
    }
    Reconciliation::Enhanced(merged)
}

fn fallback(response: ConciergeResponse, reason: FallbackReason) -> Reconciliation {
    Reconciliation::Fallback { response, reason }
}

fn non_empty_or<T: Clone>(parsed: Vec<T>, heuristic: &[T]) -> Vec<T> {
    if parsed.is_empty() {
        heuristic.to_vec()
    } else {
        parsed
    }
}

#[derive(Debug, Default)]
struct ParsedEnhancement {
    plan: Vec<DayPlan>,
    restaurants: Vec<ActivityCard>,
    packing: Vec<String>,
    notes: Vec<String>,
}

fn parse_external(external: &Value) -> Result<ParsedEnhancement, String> {
    let object = external
        .as_object()
        .ok_or_else(|| "payload is not an object".to_string())?;

    let mut plan = Vec::new();
    for entry in optional_array(object, "plan")? {
        let day = entry
            .as_object()
            .ok_or_else(|| "plan entry is not an object".to_string())?;
        let Some(date) = day
            .get("date")
            .and_then(Value::as_str)
            .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
        else {
            continue;
        };
        plan.push(DayPlan {
            date,
            morning: parse_cards(optional_array(day, "morning")?)?,
            afternoon: parse_cards(optional_array(day, "afternoon")?)?,
            evening: parse_cards(optional_array(day, "evening")?)?,
        });
    }

    Ok(ParsedEnhancement {
        plan,
        restaurants: parse_cards(optional_array(object, "restaurants")?)?,
        packing: dedupe_preserving_order(string_list(object.get("packing_checklist"))),
        notes: string_list(object.get("reasoning_notes")),
    })
}

/// Missing or null reads as empty; any other non-array is structural damage.
fn optional_array<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], String> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(format!("`{key}` is not an array")),
    }
}

fn parse_cards(items: &[Value]) -> Result<Vec<ActivityCard>, String> {
    let mut cards = Vec::new();
    for item in items {
        let card = item
            .as_object()
            .ok_or_else(|| "card is not an object".to_string())?;
        let title = card
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        cards.push(ActivityCard {
            title: truncate_title(title),
            address: card.get("address").and_then(Value::as_str).map(ToString::to_string),
            geo: card.get("geo").and_then(parse_geo),
            price_tier: card.get("price_tier").and_then(Value::as_str).and_then(PriceTier::parse),
            duration_min: card
                .get("duration_min")
                .and_then(Value::as_u64)
                .and_then(|minutes| u32::try_from(minutes).ok()),
            tags: card
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            wheelchair_friendly: card.get("wheelchair_friendly").and_then(Value::as_bool),
            child_friendly: card.get("child_friendly").and_then(Value::as_bool),
            url: card.get("url").and_then(Value::as_str).map(ToString::to_string),
        });
    }
    Ok(cards)
}

fn parse_geo(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [lat, lon] => Some((lat.as_f64()?, lon.as_f64()?)),
        _ => None,
    }
}

/// Strings kept as-is, numbers and booleans rendered, everything else dropped.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect()
}
