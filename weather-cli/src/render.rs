//! Human-readable output.

use std::fmt::Write as _;

use weather_core::{Config, Credential, WeatherSnapshot};

/// Cardinal direction and arrow for a wind bearing in degrees.
pub fn wind_direction(deg: Option<f64>) -> (&'static str, &'static str) {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    const ARROWS: [&str; 8] = ["⬇️", "↙️", "⬅️", "↖️", "⬆️", "↗️", "➡️", "↘️"];

    match deg {
        Some(deg) => {
            let index = ((deg.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
            (DIRECTIONS[index], ARROWS[index])
        }
        None => ("?", "?"),
    }
}

pub fn render_snapshot(snapshot: &WeatherSnapshot) -> String {
    let units = snapshot.units;
    let temp = units.temperature_symbol();
    let (letters, arrow) = wind_direction(snapshot.wind_direction_deg);

    let mut out = String::new();
    let _ = writeln!(out, "{} Weather in {}:", snapshot.emoji(), snapshot.city);
    let _ = writeln!(out, "> Condition: {}", snapshot.detailed_status);
    let _ = writeln!(out, "> Temperature: {}{temp}", snapshot.temperature);
    let _ = writeln!(out, "> Feels like: {}{temp}", snapshot.feels_like);
    let _ = writeln!(out, "> Humidity: {}%", snapshot.humidity);
    let _ = writeln!(
        out,
        "> Wind: {} {} {letters} {arrow}",
        snapshot.wind_speed,
        units.speed_unit()
    );
    if let Some(clouds) = snapshot.clouds {
        let _ = writeln!(out, "> Clouds: {clouds}%");
    }
    if let Some(pop) = snapshot.precipitation_probability {
        let _ = writeln!(out, "> Precipitation: {:.0}%", pop * 100.0);
    }
    match snapshot.visibility_distance {
        Some(visibility) => {
            // the provider reports visibility in metres for every unit system
            let _ = writeln!(out, "> Visibility: {visibility} m");
        }
        None => {
            let _ = writeln!(out, "> Visibility: N/A");
        }
    }
    let _ = write!(out, "> Pressure: {} hPa", snapshot.pressure_hpa);
    out
}

/// `show --json` output: an object for a single location, otherwise one
/// array holding every successful lookup.
pub fn render_json(snapshots: &[WeatherSnapshot], single: bool) -> serde_json::Result<String> {
    match snapshots {
        [snapshot] if single => serde_json::to_string_pretty(snapshot),
        all => serde_json::to_string_pretty(all),
    }
}

/// First and last four characters, or `***` for anything of eight or less.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn mask_credential(credential: Option<&Credential>) -> String {
    credential.map(|c| mask_secret(c.expose())).unwrap_or_else(|| "(not set)".to_string())
}

/// One line per setting: name, value, source.
pub fn render_config(config: &Config) -> String {
    let optional_path = |path: &Option<std::path::PathBuf>| {
        path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(stderr)".to_string())
    };

    let values = [
        mask_credential(config.credential()),
        config.units.value.to_string(),
        config.cache_persist.value.to_string(),
        config.cache_file.value.display().to_string(),
        config.cache_ttl_seconds.value.to_string(),
        config.request_timeout_seconds.value.to_string(),
        config.use_async.value.to_string(),
        config.use_keyring.value.to_string(),
        config.log_level.value.clone(),
        config.log_format.value.to_string(),
        optional_path(&config.log_file.value),
        config.base_url.value.clone(),
    ];

    let rows: Vec<_> = config.sources().into_iter().zip(values).collect();
    let width = rows.iter().map(|((name, _), _)| name.len()).max().unwrap_or(0);

    rows.iter()
        .map(|((name, source), value)| format!("{name:<width$}  {value}  ({source})"))
        .collect::<Vec<_>>()
        .join("\n")
}
