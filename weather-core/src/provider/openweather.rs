use std::{sync::OnceLock, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::DEFAULT_BASE_URL,
    credential::Credential,
    error::FetchError,
    model::{Units, WeatherSnapshot},
};

use super::{BlockingWeatherProvider, ProviderError, RawPayload, WeatherProvider};

/// OpenWeatherMap current-weather client (`/weather` endpoint).
#[derive(Debug)]
pub struct OpenWeatherClient {
    base_url: String,
    http: Client,
    /// Built on first blocking call; constructing it inside an async
    /// context panics.
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl Default for OpenWeatherClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl OpenWeatherClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            blocking: OnceLock::new(),
        }
    }

    fn url(&self) -> String {
        format!("{}/weather", self.base_url)
    }

    fn blocking_client(&self) -> &reqwest::blocking::Client {
        self.blocking.get_or_init(reqwest::blocking::Client::new)
    }
}

/// Query parameters for a lookup. `lat,lon` pairs go out as coordinates,
/// everything else as a `q=` place name.
fn query_params(
    location: &str,
    units: Units,
    credential: &Credential,
) -> Vec<(&'static str, String)> {
    let mut params = match parse_coordinates(location) {
        Some((lat, lon)) => vec![("lat", lat.to_string()), ("lon", lon.to_string())],
        None => vec![("q", location.to_string())],
    };
    params.push(("appid", credential.expose().to_string()));
    params.push(("units", units.api_value().to_string()));
    params
}

pub fn parse_coordinates(location: &str) -> Option<(f64, f64)> {
    let (lat, lon) = location.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lon: f64 = lon.trim().parse().ok()?;

    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn lookup(
        &self,
        location: &str,
        units: Units,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        let res = self
            .http
            .get(self.url())
            .query(&query_params(location, units, credential))
            .timeout(timeout)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(RawPayload::new(body))
    }
}

impl BlockingWeatherProvider for OpenWeatherClient {
    fn lookup_blocking(
        &self,
        location: &str,
        units: Units,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<RawPayload, ProviderError> {
        let res = self
            .blocking_client()
            .get(self.url())
            .query(&query_params(location, units, credential))
            .timeout(timeout)
            .send()?;

        let status = res.status();
        let body = res.text()?;

        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(RawPayload::new(body))
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    id: u32,
    main: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    #[serde(default)]
    speed: f64,
    deg: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwClouds {
    #[serde(default)]
    all: u8,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    visibility: Option<f64>,
    pop: Option<f64>,
}

/// Turn a `/weather` body into a snapshot labelled with the requested
/// `location`, not the provider's own city name.
pub fn parse_snapshot(
    location: &str,
    units: Units,
    body: &str,
) -> Result<WeatherSnapshot, FetchError> {
    let parsed: OwCurrentResponse =
        serde_json::from_str(body).map_err(|err| FetchError::Malformed(err.to_string()))?;

    let weather = parsed
        .weather
        .first()
        .ok_or_else(|| FetchError::Malformed("response contained no weather conditions".into()))?;

    Ok(WeatherSnapshot {
        city: location.to_string(),
        units,
        status: weather.main.clone(),
        detailed_status: capitalize(&weather.description),
        temperature: round_to(parsed.main.temp, 1),
        feels_like: round_to(parsed.main.feels_like, 1),
        humidity: parsed.main.humidity,
        wind_speed: round_to(parsed.wind.speed, 2),
        wind_direction_deg: parsed.wind.deg,
        precipitation_probability: parsed.pop,
        clouds: Some(parsed.clouds.all),
        visibility_distance: parsed.visibility,
        pressure_hpa: parsed.main.pressure,
        icon_code: Some(weather.id),
    })
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// First character upper-cased, the rest lower-cased.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON: &str = r#"{
        "coord": {"lon": -0.1257, "lat": 51.5085},
        "weather": [{"id": 804, "main": "Clouds", "description": "overcast clouds", "icon": "04d"}],
        "main": {"temp": 12.346, "feels_like": 11.04, "pressure": 1012, "humidity": 81},
        "visibility": 10000,
        "wind": {"speed": 4.1234, "deg": 230},
        "clouds": {"all": 90},
        "name": "London"
    }"#;

    #[test]
    fn parses_current_weather() {
        let snap = parse_snapshot("London,GB", Units::Metric, LONDON).unwrap();

        assert_eq!(snap.city, "London,GB");
        assert_eq!(snap.status, "Clouds");
        assert_eq!(snap.detailed_status, "Overcast clouds");
        assert_eq!(snap.temperature, 12.3);
        assert_eq!(snap.feels_like, 11.0);
        assert_eq!(snap.wind_speed, 4.12);
        assert_eq!(snap.wind_direction_deg, Some(230.0));
        assert_eq!(snap.clouds, Some(90));
        assert_eq!(snap.visibility_distance, Some(10000.0));
        assert_eq!(snap.pressure_hpa, 1012.0);
        assert_eq!(snap.icon_code, Some(804));
        assert_eq!(snap.precipitation_probability, None);
    }

    #[test]
    fn optional_sections_default() {
        let body = r#"{
            "weather": [{"id": 800, "main": "Clear", "description": "CLEAR SKY"}],
            "main": {"temp": 20, "feels_like": 19, "pressure": 1015, "humidity": 40}
        }"#;
        let snap = parse_snapshot("Paris,FR", Units::Imperial, body).unwrap();

        assert_eq!(snap.detailed_status, "Clear sky");
        assert_eq!(snap.wind_speed, 0.0);
        assert_eq!(snap.clouds, Some(0));
        assert_eq!(snap.units, Units::Imperial);
    }

    #[test]
    fn missing_fields_are_malformed() {
        for body in [
            "not json",
            r#"{"weather":[],"main":{"temp":1,"feels_like":1,"pressure":1,"humidity":1}}"#,
            r#"{"weather": [{"id": 1, "main": "Clear", "description": "x"}]}"#,
        ] {
            let err = parse_snapshot("X,YY", Units::Metric, body).unwrap_err();
            assert!(matches!(err, FetchError::Malformed(_)), "{body}");
        }
    }

    #[test]
    fn coordinates_are_detected_in_range_only() {
        assert_eq!(parse_coordinates("51.5,-0.12"), Some((51.5, -0.12)));
        assert_eq!(parse_coordinates("91,0"), None);
        assert_eq!(parse_coordinates("London,GB"), None);
        assert_eq!(parse_coordinates("1,2,3"), None);
    }

    #[test]
    fn query_uses_coordinates_or_name() {
        let credential = Credential::new("0123456789abcdef0123456789abcdef").unwrap();

        let params = query_params("51.5,-0.12", Units::Default, &credential);
        assert!(params.contains(&("lat", "51.5".to_string())));
        assert!(params.contains(&("units", "standard".to_string())));

        let params = query_params("London,GB", Units::Metric, &credential);
        assert!(params.contains(&("q", "London,GB".to_string())));
    }

    #[test]
    fn truncate_body_is_char_safe() {
        let long = "é".repeat(300);
        let out = truncate_body(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 203);
        assert_eq!(truncate_body("short"), "short");
    }
}
