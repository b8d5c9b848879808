use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use concierge_core::weather::normalize_provider_payload;
use concierge_core::WeatherPayload;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

const OPENWEATHER_GEOCODE: &str = "https://api.openweathermap.org/geo/1.0/direct";
const OPENWEATHER_ONECALL: &str = "https://api.openweathermap.org/data/2.5/onecall";
const OPEN_METEO_GEOCODE: &str = "https://geocoding-api.open-meteo.com/v1/search";
const OPEN_METEO_FORECAST: &str = "https://api.open-meteo.com/v1/forecast";
const OPEN_METEO_DAILY_FIELDS: &str =
    "temperature_2m_max,temperature_2m_min,precipitation_probability_max,weathercode";

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn geocode(&self, location: &str) -> Result<Option<(f64, f64)>>;

    async fn daily_forecast(&self, lat: f64, lon: f64) -> Result<WeatherPayload>;
}

async fn get_json(client: &Client, url: Url, provider: &str) -> Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("{provider} request failed"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("{provider} non-success status {}", status.as_u16());
    }
    response
        .json()
        .await
        .with_context(|| format!("{provider} parse failed"))
}

fn coordinate_pair(entry: &Value, lat_key: &str, lon_key: &str) -> Option<(f64, f64)> {
    Some((entry.get(lat_key)?.as_f64()?, entry.get(lon_key)?.as_f64()?))
}

#[derive(Clone)]
pub struct OpenWeather {
    client: Client,
    api_key: String,
}

impl OpenWeather {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    fn geocode_url(&self, location: &str) -> Result<Url> {
        Ok(Url::parse_with_params(
            OPENWEATHER_GEOCODE,
            &[("q", location), ("limit", "1"), ("appid", self.api_key.as_str())],
        )?)
    }

    fn forecast_url(&self, lat: f64, lon: f64) -> Result<Url> {
        Ok(Url::parse_with_params(
            OPENWEATHER_ONECALL,
            &[
                ("lat", lat.to_string().as_str()),
                ("lon", lon.to_string().as_str()),
                ("exclude", "minutely,hourly,alerts"),
                ("units", "metric"),
                ("appid", self.api_key.as_str()),
            ],
        )?)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeather {
    fn name(&self) -> &'static str {
        "openweather"
    }

    async fn geocode(&self, location: &str) -> Result<Option<(f64, f64)>> {
        let body = get_json(&self.client, self.geocode_url(location)?, "OpenWeather geocode").await?;
        Ok(body
            .as_array()
            .and_then(|results| results.first())
            .and_then(|first| coordinate_pair(first, "lat", "lon")))
    }

    async fn daily_forecast(&self, lat: f64, lon: f64) -> Result<WeatherPayload> {
        let mut body = get_json(&self.client, self.forecast_url(lat, lon)?, "OpenWeather").await?;
        if let Some(object) = body.as_object_mut() {
            object
                .entry("source")
                .or_insert_with(|| Value::String("openweather".into()));
        }
        Ok(normalize_provider_payload(&body))
    }
}

#[derive(Clone)]
pub struct OpenMeteo {
    client: Client,
}

impl OpenMeteo {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn geocode_url(location: &str) -> Result<Url> {
        Ok(Url::parse_with_params(
            OPEN_METEO_GEOCODE,
            &[("name", location), ("count", "1"), ("language", "en"), ("format", "json")],
        )?)
    }

    fn forecast_url(lat: f64, lon: f64) -> Result<Url> {
        Ok(Url::parse_with_params(
            OPEN_METEO_FORECAST,
            &[
                ("latitude", lat.to_string().as_str()),
                ("longitude", lon.to_string().as_str()),
                ("daily", OPEN_METEO_DAILY_FIELDS),
                ("timezone", "UTC"),
            ],
        )?)
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteo {
    fn name(&self) -> &'static str {
        "open-meteo"
    }

    async fn geocode(&self, location: &str) -> Result<Option<(f64, f64)>> {
        let body = get_json(&self.client, Self::geocode_url(location)?, "Open-Meteo geocode").await?;
        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|first| coordinate_pair(first, "latitude", "longitude")))
    }

    async fn daily_forecast(&self, lat: f64, lon: f64) -> Result<WeatherPayload> {
        let body = get_json(&self.client, Self::forecast_url(lat, lon)?, "Open-Meteo").await?;
        let mut payload = normalize_provider_payload(&body);
        payload.source = Some("open-meteo".into());
        Ok(payload)
    }
}

/// Tries each provider in order; the first usable answer wins. Every failure
/// is logged and swallowed, so callers only ever see `None`.
#[derive(Clone)]
pub struct WeatherChain {
    providers: Vec<Arc<dyn WeatherProvider>>,
    timeout: Duration,
}

impl WeatherChain {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// OpenWeather first when keyed, then the keyless Open-Meteo.
    pub fn standard(client: Client, openweather_key: Option<&str>, timeout: Duration) -> Self {
        let mut providers: Vec<Arc<dyn WeatherProvider>> = Vec::new();
        if let Some(key) = openweather_key {
            providers.push(Arc::new(OpenWeather::new(client.clone(), key)));
        }
        providers.push(Arc::new(OpenMeteo::new(client)));
        Self::new(providers, timeout)
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    pub async fn geocode(&self, location: &str) -> Option<(f64, f64)> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.geocode(location)).await {
                Ok(Ok(Some(coords))) => {
                    debug!(provider = provider.name(), %location, "geocoded");
                    return Some(coords);
                }
                Ok(Ok(None)) => debug!(provider = provider.name(), %location, "geocode found nothing"),
                Ok(Err(err)) => warn!(provider = provider.name(), error = %err, "geocode failed"),
                Err(_) => warn!(provider = provider.name(), "geocode timed out"),
            }
        }
        None
    }

    pub async fn daily_forecast(&self, lat: f64, lon: f64) -> Option<WeatherPayload> {
        for provider in &self.providers {
            match tokio::time::timeout(self.timeout, provider.daily_forecast(lat, lon)).await {
                Ok(Ok(payload)) => return Some(payload),
                Ok(Err(err)) => warn!(provider = provider.name(), error = %err, "forecast failed"),
                Err(_) => warn!(provider = provider.name(), "forecast timed out"),
            }
        }
        None
    }
}
