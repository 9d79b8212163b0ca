use crate::arrival_state::CaptureWindow;
use crate::car_collector::CarConfig;
use crate::db_fetcher::DbFetcherConfig;
use crate::error::Error;

use chrono::{Duration, NaiveTime};
use chrono_tz::Tz;
use config_file::FromConfigFile;
use serde::{Deserialize, Deserializer};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub fetcher: DbFetcherConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteWindow>,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub car: Option<CarConfig>,
    #[serde(default)]
    pub webui: WebUiConfig,
}

#[derive(Debug)]
pub struct ConfigError {
    what: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid configuration: {}", self.what)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let config = Config::from_config_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if self.fetcher.client_id.trim().is_empty() || self.fetcher.api_key.trim().is_empty() {
            return Err(ConfigError {
                what: "fetcher.client_id and fetcher.api_key must be set".to_string(),
            });
        }
        if self.routes.is_empty() {
            return Err(ConfigError {
                what: "at least one route must be configured".to_string(),
            });
        }
        for route in &self.routes {
            if route.end_time < route.start_time {
                return Err(ConfigError {
                    what: format!("route {} ends before it starts", route.label),
                });
            }
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(&self.timezone).map_err(|e| ConfigError {
            what: format!("timezone {}: {}", self.timezone, e),
        })
    }
}

/// Tuning for matching and arrival classification.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// How long after a planned departure an arrival still counts as a plausible continuation.
    pub continuation_window_minutes: i64,
    pub capture_window_minutes: i64,
    /// Extra hours of arrival plans fetched past the end of a route window.
    pub arrival_lookahead_hours: u32,
    pub infer_silent_arrivals: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            continuation_window_minutes: 300,
            capture_window_minutes: 60,
            arrival_lookahead_hours: 3,
            infer_silent_arrivals: true,
        }
    }
}

impl MatchingConfig {
    pub fn capture_window(&self) -> CaptureWindow {
        CaptureWindow {
            length: Duration::minutes(self.capture_window_minutes),
            infer_silent_arrivals: self.infer_silent_arrivals,
        }
    }
}

/// A commute route and the time of day its departures are tracked.
#[derive(Clone, Debug, Deserialize)]
pub struct RouteWindow {
    pub label: String,
    pub source_station: String,
    pub target_station: String,
    #[serde(default)]
    pub source_eva: Option<String>,
    #[serde(default)]
    pub target_eva: Option<String>,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub start_time: NaiveTime,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CollectorConfig {
    /// Repeat collection at this interval; a single run is made when unset.
    pub interval_minutes: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WebUiConfig {
    pub enabled: bool,
    pub history_days: u32,
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            history_days: 30,
        }
    }
}

pub fn parse_hhmm(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
}

pub fn deserialize_hhmm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_hhmm(&raw).map_err(serde::de::Error::custom)
}

fn default_timezone() -> String {
    "Europe/Berlin".to_string()
}

fn default_database_path() -> String {
    "data/train_punctuality.db".to_string()
}

fn hhmm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn default_routes() -> Vec<RouteWindow> {
    vec![
        RouteWindow {
            label: "Morning Freiburg->Offenburg".to_string(),
            source_station: "Freiburg(Breisgau) Hbf".to_string(),
            target_station: "Offenburg".to_string(),
            source_eva: Some("8000107".to_string()),
            target_eva: Some("8000290".to_string()),
            start_time: hhmm(6, 0),
            end_time: hhmm(8, 0),
        },
        RouteWindow {
            label: "Afternoon Offenburg->Freiburg".to_string(),
            source_station: "Offenburg".to_string(),
            target_station: "Freiburg(Breisgau) Hbf".to_string(),
            source_eva: Some("8000290".to_string()),
            target_eva: Some("8000107".to_string()),
            start_time: hhmm(15, 30),
            end_time: hhmm(17, 30),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "fetcher": { "client_id": "id", "api_key": "key" }
        }))
        .unwrap();

        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].start_time, hhmm(15, 30));
        assert_eq!(config.matching.continuation_window_minutes, 300);
        assert_eq!(config.matching.capture_window_minutes, 60);
        assert!(config.collector.interval_minutes.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn route_times_use_hour_minute_format() {
        let route: RouteWindow = serde_json::from_value(serde_json::json!({
            "label": "Evening",
            "source_station": "A",
            "target_station": "B",
            "start_time": "18:05",
            "end_time": "19:40"
        }))
        .unwrap();
        assert_eq!(route.start_time, hhmm(18, 5));
        assert_eq!(route.end_time, hhmm(19, 40));
        assert!(route.source_eva.is_none());

        let bad = serde_json::from_value::<RouteWindow>(serde_json::json!({
            "label": "Evening",
            "source_station": "A",
            "target_station": "B",
            "start_time": "late",
            "end_time": "19:40"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn rejects_missing_credentials_and_bad_timezone() {
        let mut config: Config = serde_json::from_value(serde_json::json!({
            "fetcher": { "client_id": " ", "api_key": "key" }
        }))
        .unwrap();
        assert!(config.validate().is_err());

        config.fetcher.client_id = "id".to_string();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }
}
