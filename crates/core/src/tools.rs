use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::ConciergeError;
use crate::models::{BookingContext, Preferences};

pub const DEFAULT_TOOL_SEARCH_RESULTS: usize = 6;
pub const TRAVELER_BOOKINGS_LIMIT: usize = 5;
pub const FAVORITES_LIMIT: usize = 10;

pub const MISSING_LOOKUP_KEYS: &str = "Please provide a booking_id or traveler_id for lookup.";
pub const MISSING_SEARCH_ARGS: &str = "Provide both location and query to search.";
pub const MISSING_COORDINATES: &str =
    "Latitude and longitude (or a recognizable location name) are required.";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    Unknown(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArgs { tool: String, message: String },
}

/// The closed set of tools the chat model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ConciergeTool {
    LookupBooking(LookupBookingArgs),
    ListFavorites(ListFavoritesArgs),
    SearchPois(SearchPoisArgs),
    GetWeather(GetWeatherArgs),
    GenerateItinerary(GenerateItineraryArgs),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupBookingArgs {
    #[serde(default)]
    pub booking_id: Option<i64>,
    #[serde(default)]
    pub traveler_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFavoritesArgs {
    pub traveler_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPoisArgs {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_tool_search_results")]
    pub max_results: usize,
}

fn default_tool_search_results() -> usize {
    DEFAULT_TOOL_SEARCH_RESULTS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetWeatherArgs {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

/// `booking` and `preferences` arrive either as objects or as JSON-encoded
/// strings, depending on how the model chose to fill them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateItineraryArgs {
    pub booking: Value,
    #[serde(default)]
    pub preferences: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl GenerateItineraryArgs {
    pub fn booking_context(&self) -> Result<BookingContext, ConciergeError> {
        let booking = decode_embedded(&self.booking)
            .ok_or_else(|| ConciergeError::InvalidBooking("booking is not valid JSON".into()))?;
        BookingContext::from_loose_json(&booking)
    }

    pub fn preferences(&self) -> Result<Option<Preferences>, ConciergeError> {
        let Some(raw) = self.preferences.as_ref().filter(|value| !value.is_null()) else {
            return Ok(None);
        };
        let value = decode_embedded(raw)
            .ok_or_else(|| ConciergeError::InvalidPreferences("preferences are not valid JSON".into()))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| ConciergeError::InvalidPreferences(err.to_string()))
    }
}

fn decode_embedded(value: &Value) -> Option<Value> {
    match value {
        Value::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

impl ConciergeTool {
    /// Resolves a model-issued function call into a typed tool.
    pub fn from_call(name: &str, args: &Value) -> Result<Self, ToolError> {
        if !TOOL_NAMES.contains(&name) {
            return Err(ToolError::Unknown(name.to_string()));
        }
        let args = if args.is_null() { json!({}) } else { args.clone() };
        serde_json::from_value(json!({ "tool": name, "args": args })).map_err(|err| {
            ToolError::InvalidArgs {
                tool: name.to_string(),
                message: err.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LookupBooking(_) => "lookup_booking",
            Self::ListFavorites(_) => "list_favorites",
            Self::SearchPois(_) => "search_pois",
            Self::GetWeather(_) => "get_weather",
            Self::GenerateItinerary(_) => "generate_itinerary",
        }
    }
}

const TOOL_NAMES: [&str; 5] = [
    "lookup_booking",
    "list_favorites",
    "search_pois",
    "get_weather",
    "generate_itinerary",
];

/// Function declaration advertised to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub fn tool_declarations() -> Vec<ToolDeclaration> {
    vec![
        ToolDeclaration {
            name: "lookup_booking",
            description: "Look up booking details by booking_id or traveler_id to understand trip context.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "booking_id": { "type": "INTEGER" },
                    "traveler_id": { "type": "INTEGER" }
                }
            }),
        },
        ToolDeclaration {
            name: "list_favorites",
            description: "Fetch traveler favorite properties using traveler_id to personalize suggestions.",
            parameters: json!({
                "type": "OBJECT",
                "properties": { "traveler_id": { "type": "INTEGER" } },
                "required": ["traveler_id"]
            }),
        },
        ToolDeclaration {
            name: "search_pois",
            description: "Search for local points of interest, events, or activities. Requires location and query.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "location": { "type": "STRING" },
                    "query": { "type": "STRING" },
                    "max_results": { "type": "INTEGER" }
                },
                "required": ["location", "query"]
            }),
        },
        ToolDeclaration {
            name: "get_weather",
            description: "Retrieve the weather forecast for a latitude/longitude or a place name to advise on packing.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "lat": { "type": "NUMBER" },
                    "lon": { "type": "NUMBER" },
                    "location": { "type": "STRING" }
                }
            }),
        },
        ToolDeclaration {
            name: "generate_itinerary",
            description: "Create a day-by-day itinerary using booking and preference JSON payloads.",
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "booking": {
                        "type": "OBJECT",
                        "properties": {
                            "booking_id": { "type": "INTEGER" },
                            "location": { "type": "STRING" },
                            "lat": { "type": "NUMBER" },
                            "lon": { "type": "NUMBER" },
                            "start_date": { "type": "STRING" },
                            "end_date": { "type": "STRING" },
                            "party_type": { "type": "STRING" },
                            "guests": { "type": "INTEGER" }
                        },
                        "required": ["start_date", "end_date"]
                    },
                    "preferences": {
                        "type": "OBJECT",
                        "properties": {
                            "budget": { "type": "STRING", "enum": ["low", "mid", "high"] },
                            "interests": { "type": "ARRAY", "items": { "type": "STRING" } },
                            "mobility_needs": { "type": "STRING", "enum": ["none", "wheelchair", "limited_walk"] },
                            "dietary": {
                                "type": "STRING",
                                "enum": ["none", "vegan", "vegetarian", "halal", "kosher", "gluten_free"]
                            }
                        }
                    },
                    "notes": { "type": "STRING" }
                },
                "required": ["booking"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dietary;

    #[test]
    fn search_defaults_to_six_results() {
        let tool = ConciergeTool::from_call("search_pois", &json!({ "location": "Rome", "query": "gelato" })).unwrap();
        assert_eq!(
            tool,
            ConciergeTool::SearchPois(SearchPoisArgs {
                location: "Rome".into(),
                query: "gelato".into(),
                max_results: 6,
            })
        );
    }

    #[test]
    fn null_args_mean_no_args() {
        let tool = ConciergeTool::from_call("get_weather", &Value::Null).unwrap();
        assert_eq!(tool, ConciergeTool::GetWeather(GetWeatherArgs::default()));
        assert_eq!(tool.name(), "get_weather");
    }

    #[test]
    fn rejects_unknown_tools_and_bad_args() {
        assert_eq!(
            ConciergeTool::from_call("book_flight", &json!({})),
            Err(ToolError::Unknown("book_flight".into()))
        );
        assert!(matches!(
            ConciergeTool::from_call("list_favorites", &json!({})),
            Err(ToolError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn itinerary_args_accept_embedded_json_strings() {
        let tool = ConciergeTool::from_call(
            "generate_itinerary",
            &json!({
                "booking": "{\"location\":\"Rome\",\"start_date\":\"2024-05-01\",\"end_date\":\"2024-05-02\"}",
                "preferences": { "dietary": "vegan" }
            }),
        )
        .unwrap();
        let ConciergeTool::GenerateItinerary(args) = tool else {
            panic!("expected generate_itinerary");
        };

        let booking = args.booking_context().unwrap();
        assert_eq!(booking.location(), Some("Rome"));
        assert_eq!(args.preferences().unwrap().unwrap().dietary, Dietary::Vegan);
    }

    #[test]
    fn every_tool_is_declared() {
        let names = tool_declarations()
            .into_iter()
            .map(|declaration| declaration.name)
            .collect::<Vec<_>>();
        assert_eq!(names, TOOL_NAMES);
    }
}
