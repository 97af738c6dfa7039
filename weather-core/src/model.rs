use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Measurement system requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    /// Kelvin and m/s; the provider calls this "standard".
    #[serde(alias = "standard")]
    Default,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Default => "default",
        }
    }

    /// Value of the `units` query parameter.
    pub fn api_value(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Default => "standard",
        }
    }

    pub fn temperature_symbol(&self) -> &'static str {
        match self {
            Units::Metric => "°C",
            Units::Imperial => "°F",
            Units::Default => "K",
        }
    }

    pub fn speed_unit(&self) -> &'static str {
        match self {
            Units::Imperial => "mph",
            Units::Metric | Units::Default => "m/s",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown units '{0}', expected metric, imperial or default")]
pub struct UnknownUnits(pub String);

impl FromStr for Units {
    type Err = UnknownUnits;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            "default" | "standard" => Ok(Units::Default),
            _ => Err(UnknownUnits(value.to_string())),
        }
    }
}

/// Parsed current conditions for one location.
///
/// Field names are the on-disk cache schema; renaming any of them breaks
/// existing cache files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub city: String,
    pub units: Units,
    pub status: String,
    pub detailed_status: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: u8,
    pub wind_speed: f64,
    pub wind_direction_deg: Option<f64>,
    pub precipitation_probability: Option<f64>,
    pub clouds: Option<u8>,
    pub visibility_distance: Option<f64>,
    pub pressure_hpa: f64,
    #[serde(default)]
    pub icon_code: Option<u32>,
}

const STATUS_EMOJI: &[(&str, &str)] = &[
    ("clear", "☀️"),
    ("scattered clouds", "🌤️"),
    ("broken clouds", "🌥️"),
    ("few clouds", "🌥️"),
    ("overcast clouds", "☁️"),
    ("light rain", "🌦️"),
    ("rain", "🌧️"),
    ("drizzle", "💧"),
    ("snow", "❄️"),
    ("sleet", "🌨️"),
    ("mist", "🌫️"),
    ("haze", "🌫️"),
    ("fog", "🌫️"),
    ("thunderstorm", "⛈️"),
    ("windy", "💨"),
    ("sunny", "☀️"),
    ("clouds", "☁️"),
];

impl WeatherSnapshot {
    /// Emoji for the detailed status, first match in table order.
    pub fn emoji(&self) -> &'static str {
        let status = self.detailed_status.to_lowercase();
        STATUS_EMOJI
            .iter()
            .find(|(needle, _)| status.contains(needle))
            .map(|(_, emoji)| *emoji)
            .unwrap_or("🌈")
    }
}

#[cfg(test)]
pub(crate) fn sample_snapshot(city: &str) -> WeatherSnapshot {
    WeatherSnapshot {
        city: city.to_string(),
        units: Units::Metric,
        status: "Clouds".to_string(),
        detailed_status: "Overcast clouds".to_string(),
        temperature: 12.3,
        feels_like: 11.0,
        humidity: 81,
        wind_speed: 4.12,
        wind_direction_deg: Some(230.0),
        precipitation_probability: None,
        clouds: Some(90),
        visibility_distance: Some(10000.0),
        pressure_hpa: 1012.0,
        icon_code: Some(804),
    }
}
