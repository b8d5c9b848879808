use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::WeatherDay;
use crate::text::push_unique;

pub const DEFAULT_FORECAST_DAYS: usize = 5;
const SUMMARY_DAYS: usize = 3;

pub const DEFAULT_PACKING: [&str; 3] = ["comfortable shoes", "daypack", "charger"];
const HOT_PACKING: [&str; 4] = ["sunscreen", "hat", "light clothing", "reusable water bottle"];
const COLD_PACKING: [&str; 3] = ["warm jacket", "layers", "beanie"];
const WET_PACKING: [&str; 3] = ["rain jacket", "compact umbrella", "waterproof shoes"];

const HOT_THRESHOLD_C: f64 = 28.0;
const COLD_THRESHOLD_C: f64 = 10.0;
/// Condition-id groups (id div 100) for thunderstorm, drizzle and rain.
const WET_CONDITION_GROUPS: [i64; 3] = [2, 3, 5];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub description: Option<String>,
    pub id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyForecast {
    pub dt: Option<i64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub conditions: Vec<WeatherCondition>,
    pub pop: Option<f64>,
}

/// Provider-neutral daily forecast, the only weather shape the planner reads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub daily: Vec<DailyForecast>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub forecast: Vec<WeatherDay>,
    pub summary_text: Option<String>,
    pub packing: Vec<String>,
}

impl WeatherSummary {
    pub fn unavailable() -> Self {
        Self {
            forecast: Vec::new(),
            summary_text: None,
            packing: default_packing(),
        }
    }

    pub fn today(&self) -> Option<&WeatherDay> {
        self.forecast.first()
    }
}

pub fn default_packing() -> Vec<String> {
    DEFAULT_PACKING.iter().map(|item| item.to_string()).collect()
}

/// Normalizes whichever provider shape arrived into a [`WeatherPayload`].
///
/// Two shapes are understood: a `daily` array of per-day objects
/// (`dt`, `temp.min/max`, `weather[]`, `pop`) and a `daily` object of
/// parallel arrays keyed by `time`. Anything else yields an empty payload.
pub fn normalize_provider_payload(raw: &Value) -> WeatherPayload {
    let source = raw
        .get("source")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    match raw.get("daily") {
        Some(Value::Array(entries)) => WeatherPayload {
            daily: entries.iter().filter_map(daily_from_entry).collect(),
            source,
        },
        Some(Value::Object(_)) => WeatherPayload {
            daily: daily_from_parallel_arrays(&raw["daily"]),
            source: source.or_else(|| Some("open-meteo".to_string())),
        },
        _ => WeatherPayload {
            daily: Vec::new(),
            source,
        },
    }
}

fn daily_from_entry(entry: &Value) -> Option<DailyForecast> {
    let entry = entry.as_object()?;
    let temp = entry.get("temp");
    let conditions = entry
        .get("weather")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| WeatherCondition {
                    description: item
                        .get("description")
                        .and_then(Value::as_str)
                        .map(ToString::to_string),
                    id: item.get("id").and_then(as_loose_i64),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(DailyForecast {
        dt: entry.get("dt").and_then(as_loose_i64),
        temp_min: temp.and_then(|t| t.get("min")).and_then(Value::as_f64),
        temp_max: temp.and_then(|t| t.get("max")).and_then(Value::as_f64),
        conditions,
        pop: entry.get("pop").and_then(Value::as_f64),
    })
}

fn daily_from_parallel_arrays(daily: &Value) -> Vec<DailyForecast> {
    let column = |key: &str| -> Vec<Value> {
        daily
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let times = column("time");
    let max_t = column("temperature_2m_max");
    let min_t = column("temperature_2m_min");
    let precip = column("precipitation_probability_max");
    let codes = column("weathercode");

    times
        .iter()
        .enumerate()
        .map(|(idx, time)| {
            let dt = time
                .as_str()
                .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|moment| moment.and_utc().timestamp());
            let code = codes.get(idx).and_then(as_loose_i64);

            DailyForecast {
                dt,
                temp_min: min_t.get(idx).and_then(Value::as_f64),
                temp_max: max_t.get(idx).and_then(Value::as_f64),
                conditions: vec![WeatherCondition {
                    description: Some(wmo_code_description(code).to_string()),
                    id: code,
                }],
                pop: precip
                    .get(idx)
                    .and_then(Value::as_f64)
                    .map(|percent| percent / 100.0),
            }
        })
        .collect()
}

fn as_loose_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|number| number as i64))
}

pub fn wmo_code_description(code: Option<i64>) -> &'static str {
    let Some(code) = code else {
        return "Unknown conditions";
    };
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Light rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Light snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        77 => "Snow grains",
        80 => "Light rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Light snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Mixed weather",
    }
}

/// Forecast list, short outlook text and packing list for the first days of a
/// payload. Absent or empty payloads produce the unavailable summary.
pub fn summarize(payload: Option<&WeatherPayload>, max_days: usize) -> WeatherSummary {
    let Some(payload) = payload.filter(|payload| !payload.daily.is_empty()) else {
        return WeatherSummary::unavailable();
    };
    let first_day = &payload.daily[0];

    let forecast = payload
        .daily
        .iter()
        .take(max_days)
        .map(weather_day)
        .collect::<Vec<_>>();

    let pieces = forecast
        .iter()
        .take(SUMMARY_DAYS)
        .map(outlook_piece)
        .collect::<Vec<_>>();
    let summary_text = if pieces.is_empty() {
        None
    } else {
        Some(pieces.join("; "))
    };

    let mut packing = packing_for_day(first_day);
    if packing.is_empty() {
        packing = default_packing();
    }

    WeatherSummary {
        forecast,
        summary_text,
        packing,
    }
}

fn weather_day(entry: &DailyForecast) -> WeatherDay {
    WeatherDay {
        date: entry
            .dt
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|moment| moment.format("%Y-%m-%d").to_string()),
        description: entry
            .conditions
            .first()
            .and_then(|condition| condition.description.clone()),
        temp_min_c: entry.temp_min,
        temp_max_c: entry.temp_max,
        precip_probability: entry.pop,
    }
}

fn outlook_piece(day: &WeatherDay) -> String {
    let date = day.date.as_deref().unwrap_or("Unknown date");
    let description = day.description.as_deref().unwrap_or("Unknown conditions");
    let mut piece = format!("{date}: {description}");

    let mut temps = Vec::new();
    if let Some(max) = day.temp_max_c {
        temps.push(format!("high {max:.1}°C"));
    }
    if let Some(min) = day.temp_min_c {
        temps.push(format!("low {min:.1}°C"));
    }
    if !temps.is_empty() {
        piece.push_str(&format!(" ({})", temps.join(" / ")));
    }
    piece
}

/// Packing additions triggered by a single day. Empty when no rule fires.
pub fn packing_for_day(day: &DailyForecast) -> Vec<String> {
    let mut packing = Vec::new();

    if day.temp_max.is_some_and(|max| max >= HOT_THRESHOLD_C) {
        push_unique(&mut packing, HOT_PACKING);
    }
    if day.temp_min.is_some_and(|min| min <= COLD_THRESHOLD_C) {
        push_unique(&mut packing, COLD_PACKING);
    }
    let wet = day.conditions.iter().any(|condition| {
        condition
            .id
            .is_some_and(|id| WET_CONDITION_GROUPS.contains(&id.div_euclid(100)))
    });
    if wet {
        push_unique(&mut packing, WET_PACKING);
    }

    packing
}
