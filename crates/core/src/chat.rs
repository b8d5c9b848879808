use serde_json::{Map, Value};

pub const GREETING: &str = "Hello! Tell me about your upcoming trip and I can help plan it.";
pub const EMPTY_REPLY: &str = "Glad to help!";
pub const FALLBACK_REPLY: &str = "Here is your updated concierge plan.";
pub const NO_RECORDS: &str = "No records found.";

/// Model turns allowed per chat request, tool round-trips included.
pub const MAX_MODEL_TURNS: usize = 4;

const SYSTEM_PROMPT: &str = "You are an AI travel concierge helping short-stay travelers. \
Use the provided tools to ground your answers with real data. \
Always incorporate booking context, traveler preferences, favorites, weather, \
and web search findings when helpful. \
Respond with friendly, concise messages. \
If you deliver an itinerary, format it with clear headings per day.";

const LOCATION_KEYS: [&str; 3] = ["location", "property_location", "address"];

/// System instruction for a chat request, with the context embedded as JSON.
pub fn system_prompt(context: &Map<String, Value>) -> String {
    let context_json = Value::Object(context.clone()).to_string();
    format!("{SYSTEM_PROMPT}\nContext JSON: {context_json}")
}

/// Fills `location` on the active booking and on every listed booking from
/// whichever location-like key is present, and surfaces the active booking's
/// location as `active_booking_location`.
pub fn normalize_context(mut context: Map<String, Value>) -> Map<String, Value> {
    let active_location = context
        .get_mut("active_booking")
        .and_then(Value::as_object_mut)
        .and_then(fill_location);

    if let Some(Value::Array(bookings)) = context.get_mut("bookings") {
        for entry in bookings.iter_mut().filter_map(Value::as_object_mut) {
            fill_location(entry);
        }
    }

    if let Some(location) = active_location {
        context.insert("active_booking_location".into(), Value::String(location));
    }
    context
}

fn fill_location(booking: &mut Map<String, Value>) -> Option<String> {
    let location = LOCATION_KEYS
        .iter()
        .filter_map(|key| booking.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())?
        .to_string();
    booking.insert("location".into(), Value::String(location.clone()));
    Some(location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn active_booking_location_comes_from_aliases() {
        let context = normalize_context(object(json!({
            "active_booking": { "booking_id": 7, "property_location": "Lisbon, PT" },
            "bookings": [
                { "address": "12 Rua Augusta" },
                { "location": "Porto" },
                "not a booking"
            ]
        })));

        assert_eq!(context["active_booking"]["location"], "Lisbon, PT");
        assert_eq!(context["active_booking_location"], "Lisbon, PT");
        assert_eq!(context["bookings"][0]["location"], "12 Rua Augusta");
        assert_eq!(context["bookings"][1]["location"], "Porto");
        assert_eq!(context["bookings"][2], "not a booking");
    }

    #[test]
    fn context_without_location_is_untouched() {
        let raw = object(json!({ "active_booking": { "booking_id": 7, "location": "" } }));
        let context = normalize_context(raw.clone());
        assert_eq!(context, raw);
    }

    #[test]
    fn system_prompt_embeds_context() {
        let prompt = system_prompt(&object(json!({ "active_booking_location": "Oslo" })));
        assert!(prompt.ends_with("Context JSON: {\"active_booking_location\":\"Oslo\"}"));
    }
}
