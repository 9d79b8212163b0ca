use crate::config::deserialize_hhmm;
use crate::error::Error;
use crate::observation::CarObservation;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use std::fmt;

#[derive(Clone, Deserialize)]
pub struct CarConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_directions_endpoint")]
    pub directions_endpoint: String,
    #[serde(default)]
    pub routes: Vec<CarRoute>,
}

fn default_directions_endpoint() -> String {
    "https://api.openrouteservice.org/v2/directions/driving-car".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct CarRoute {
    pub label: String,
    pub from_name: String,
    pub to_name: String,
    pub from_lat: f64,
    pub from_lon: f64,
    pub to_lat: f64,
    pub to_lon: f64,
    /// Sampling starts once this time of day has been reached.
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub target_departure: NaiveTime,
}

#[derive(Debug)]
pub struct CarSamplerError {
    what: String,
}

impl fmt::Display for CarSamplerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error sampling car route: {}", self.what)
    }
}

/// Travel time and distance for one car route, right now.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteSample {
    pub duration_minutes: i64,
    pub distance_km: f64,
}

#[async_trait]
pub trait RouteSampler {
    async fn sample(&self, route: &CarRoute) -> Result<RouteSample, Error>;
}

#[derive(Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Deserialize)]
struct DirectionsRoute {
    summary: DirectionsSummary,
}

#[derive(Deserialize)]
struct DirectionsSummary {
    duration: f64,
    distance: f64,
}

fn sample_from_response(body: &str) -> Result<RouteSample, Error> {
    let response: DirectionsResponse = serde_json::from_str(body)?;
    let summary = match response.routes.first() {
        Some(x) => &x.summary,
        None => {
            return Err(CarSamplerError {
                what: "No route in directions response".to_string(),
            }
            .into())
        }
    };
    Ok(RouteSample {
        duration_minutes: (summary.duration / 60.0).round() as i64,
        distance_km: (summary.distance / 100.0).round() / 10.0,
    })
}

/// openrouteservice directions API.
pub struct OrsSampler {
    config: CarConfig,
    client: Client,
}

impl OrsSampler {
    pub fn new(config: CarConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl RouteSampler for OrsSampler {
    async fn sample(&self, route: &CarRoute) -> Result<RouteSample, Error> {
        let payload = serde_json::json!({
            "coordinates": [
                [route.from_lon, route.from_lat],
                [route.to_lon, route.to_lat],
            ]
        });
        let body = self
            .client
            .post(self.config.directions_endpoint.clone())
            .header("Authorization", self.config.api_key.clone())
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        sample_from_response(&body)
    }
}

/// Samples each route whose target departure has been reached at `now`.
pub async fn collect_car_observations<S: RouteSampler + Sync>(
    sampler: &S,
    routes: &[CarRoute],
    now: DateTime<Tz>,
) -> Vec<CarObservation> {
    let mut rows = Vec::new();
    for route in routes {
        if now.time() < route.target_departure {
            continue;
        }
        match sampler.sample(route).await {
            Ok(sample) => {
                info!("{}: {} min by car", route.label, sample.duration_minutes);
                rows.push(CarObservation {
                    observation_ts: now,
                    service_date: now.date_naive(),
                    route_label: route.label.clone(),
                    from_name: route.from_name.clone(),
                    to_name: route.to_name.clone(),
                    target_departure_time: route.target_departure.format("%H:%M").to_string(),
                    duration_minutes: sample.duration_minutes,
                    distance_km: sample.distance_km,
                });
            }
            Err(e) => warn!("Could not sample car route {}: {}", route.label, e),
        }
    }
    rows
}
