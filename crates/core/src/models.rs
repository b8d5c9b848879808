use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConciergeError;

pub const MAX_TITLE_CHARS: usize = 120;
/// Longest stay, in days, that one itinerary request may cover.
pub const MAX_TRIP_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    Low,
    #[default]
    Mid,
    High,
}

impl Budget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mobility {
    #[default]
    None,
    Wheelchair,
    LimitedWalk,
}

impl Mobility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Wheelchair => "wheelchair",
            Self::LimitedWalk => "limited_walk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dietary {
    #[default]
    None,
    Vegan,
    Vegetarian,
    Halal,
    Kosher,
    GlutenFree,
}

impl Dietary {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Vegan => "vegan",
            Self::Vegetarian => "vegetarian",
            Self::Halal => "halal",
            Self::Kosher => "kosher",
            Self::GlutenFree => "gluten_free",
        }
    }

    pub fn is_restricted(self) -> bool {
        self != Self::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub budget: Budget,
    pub interests: Vec<String>,
    pub mobility_needs: Mobility,
    pub dietary: Dietary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingContext {
    #[serde(default)]
    pub booking_id: Option<i64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub party_type: Option<String>,
    #[serde(default)]
    pub guests: Option<u32>,
}

impl BookingContext {
    pub fn new(location: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            booking_id: None,
            location: Some(location.into()),
            lat: None,
            lon: None,
            start_date,
            end_date,
            party_type: None,
            guests: None,
        }
    }

    /// Trimmed location, `None` when missing or blank.
    pub fn location(&self) -> Option<&str> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Inclusive day count of the stay.
    pub fn trip_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    /// Date-only checks, usable before the location is known.
    pub fn validate_dates(&self) -> Result<(), ConciergeError> {
        if self.end_date < self.start_date {
            return Err(ConciergeError::InvalidDateRange {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if self.trip_days() > MAX_TRIP_DAYS {
            return Err(ConciergeError::InvalidBooking(format!(
                "stay of {} days exceeds the {MAX_TRIP_DAYS}-day limit",
                self.trip_days()
            )));
        }
        Ok(())
    }

    /// Rejects bookings the pipeline cannot plan for. Runs before any I/O.
    pub fn validate(&self) -> Result<(), ConciergeError> {
        self.validate_dates()?;
        if self.location().is_none() {
            return Err(ConciergeError::MissingLocation);
        }
        Ok(())
    }

    /// Builds a booking from the loosely keyed objects browsers send, accepting
    /// both snake_case and camelCase aliases.
    pub fn from_loose_json(raw: &Value) -> Result<Self, ConciergeError> {
        let object = raw
            .as_object()
            .ok_or_else(|| ConciergeError::InvalidBooking("booking must be an object".into()))?;

        let start_raw = first_present(object, &["start_date", "startDate"]);
        let end_raw = first_present(object, &["end_date", "endDate"]);
        let (Some(start_raw), Some(end_raw)) = (start_raw, end_raw) else {
            return Err(ConciergeError::InvalidBooking(
                "start_date and end_date are required".into(),
            ));
        };

        Ok(Self {
            booking_id: first_present(object, &["booking_id", "id"]).and_then(loose_i64),
            location: first_present(object, &["location", "property_location"])
                .and_then(|value| value.as_str())
                .map(ToString::to_string),
            lat: object.get("lat").and_then(Value::as_f64),
            lon: object.get("lon").and_then(Value::as_f64),
            start_date: parse_loose_date(start_raw)?,
            end_date: parse_loose_date(end_raw)?,
            party_type: first_present(object, &["party_type", "partyType"])
                .and_then(|value| value.as_str())
                .map(ToString::to_string),
            guests: object
                .get("guests")
                .and_then(loose_i64)
                .and_then(|value| u32::try_from(value).ok()),
        })
    }
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null() && value.as_str() != Some(""))
}

fn loose_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` as well as full ISO timestamps, keeping the date part.
pub fn parse_loose_date(value: &Value) -> Result<NaiveDate, ConciergeError> {
    let text = value
        .as_str()
        .ok_or_else(|| ConciergeError::InvalidBooking("invalid date format".into()))?
        .trim();
    let date_part = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ConciergeError::InvalidBooking(format!("invalid date format: {text}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConciergeAsk {
    pub booking: BookingContext,
    #[serde(default)]
    pub prefs: Option<Preferences>,
    #[serde(default)]
    pub free_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceTier {
    #[serde(rename = "$")]
    Budget,
    #[serde(rename = "$$")]
    Moderate,
    #[serde(rename = "$$$")]
    Expensive,
}

impl PriceTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "$" => Some(Self::Budget),
            "$$" => Some(Self::Moderate),
            "$$$" => Some(Self::Expensive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivityCard {
    pub title: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub geo: Option<(f64, f64)>,
    #[serde(default)]
    pub price_tier: Option<PriceTier>,
    #[serde(default)]
    pub duration_min: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub wheelchair_friendly: Option<bool>,
    #[serde(default)]
    pub child_friendly: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
}

pub fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBlock {
    Morning,
    Afternoon,
    Evening,
}

impl TimeBlock {
    pub const ALL: [TimeBlock; 3] = [Self::Morning, Self::Afternoon, Self::Evening];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    #[serde(default)]
    pub morning: Vec<ActivityCard>,
    #[serde(default)]
    pub afternoon: Vec<ActivityCard>,
    #[serde(default)]
    pub evening: Vec<ActivityCard>,
}

impl DayPlan {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            morning: Vec::new(),
            afternoon: Vec::new(),
            evening: Vec::new(),
        }
    }

    pub fn block(&self, block: TimeBlock) -> &[ActivityCard] {
        match block {
            TimeBlock::Morning => &self.morning,
            TimeBlock::Afternoon => &self.afternoon,
            TimeBlock::Evening => &self.evening,
        }
    }

    pub fn block_mut(&mut self, block: TimeBlock) -> &mut Vec<ActivityCard> {
        match block {
            TimeBlock::Morning => &mut self.morning,
            TimeBlock::Afternoon => &mut self.afternoon,
            TimeBlock::Evening => &mut self.evening,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConciergeResponse {
    pub plan: Vec<DayPlan>,
    pub restaurants: Vec<ActivityCard>,
    pub packing_checklist: Vec<String>,
    #[serde(default)]
    pub reasoning_notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherDay {
    pub date: Option<String>,
    pub description: Option<String>,
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub precip_probability: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, url: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            url,
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConciergeChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConciergeChatResponse {
    pub reply: String,
}
