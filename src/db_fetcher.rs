use crate::error::Error;
use crate::fetcher::{FeedFetcher, EMPTY_TIMETABLE};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use std::fmt;

const MAX_ERROR_BODY: usize = 500;

#[derive(Clone, Deserialize)]
pub struct DbFetcherConfig {
    pub client_id: String,
    pub api_key: String,
    #[serde(default = "default_station_endpoint")]
    pub station_endpoint: String,
    #[serde(default = "default_timetables_endpoint")]
    pub timetables_endpoint: String,
}

fn default_station_endpoint() -> String {
    "https://apis.deutschebahn.com/db-api-marketplace/apis/station-data/v2".to_string()
}

fn default_timetables_endpoint() -> String {
    "https://apis.deutschebahn.com/db-api-marketplace/apis/timetables/v1".to_string()
}

#[derive(Debug)]
pub struct StationLookupError {
    what: String,
}

impl fmt::Display for StationLookupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error talking to DB API: {}", self.what)
    }
}

#[derive(Deserialize)]
struct StationSearch {
    #[serde(default)]
    result: Vec<StationResult>,
}

#[derive(Deserialize)]
struct StationResult {
    #[serde(default)]
    name: String,
    #[serde(rename = "evaNumbers", default)]
    eva_numbers: Vec<EvaNumber>,
}

#[derive(Deserialize)]
struct EvaNumber {
    number: serde_json::Value,
}

impl StationResult {
    fn eva(&self) -> Option<String> {
        self.eva_numbers.first().map(|x| match &x.number {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Deutsche Bahn Timetables and StaDa APIs.
pub struct DbFetcher {
    config: DbFetcherConfig,
    client: Client,
}

impl DbFetcher {
    pub fn new(config: DbFetcherConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("DB-Client-Id", self.config.client_id.clone())
            .header("DB-Api-Key", self.config.api_key.clone())
    }

    async fn checked_text(response: Response, endpoint: &str) -> Result<String, Error> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        let body: String = body.trim().replace('\n', " ").chars().take(MAX_ERROR_BODY).collect();
        Err(StationLookupError {
            what: format!("{} | endpoint={} | response_body={}", status, endpoint, body),
        })?
    }
}

/// Picks the station whose name contains the query, falling back to the first hit.
fn choose_station(search: &StationSearch, station_name: &str) -> Option<String> {
    let wanted = station_name.to_lowercase();
    search
        .result
        .iter()
        .find(|x| x.name.to_lowercase().contains(&wanted))
        .or(search.result.first())
        .and_then(StationResult::eva)
}

#[async_trait]
impl FeedFetcher for DbFetcher {
    async fn station_eva(&self, station_name: &str) -> Result<String, Error> {
        debug!("Looking up EVA number for {}", station_name);
        let response = self
            .authorized(self.client.get(format!("{}/stations", self.config.station_endpoint)))
            .query(&[("searchstring", station_name), ("limit", "5")])
            .header("Accept", "application/json")
            .send()
            .await?;
        let body = Self::checked_text(response, "station-data/v2/stations").await?;
        let search: StationSearch = serde_json::from_str(&body)?;

        match choose_station(&search, station_name) {
            Some(x) => Ok(x),
            None => Err(StationLookupError {
                what: format!("No station found for '{}'", station_name),
            })?,
        }
    }

    async fn plan(&self, eva: &str, service_date: NaiveDate, hour: u32) -> Result<String, Error> {
        debug!("Fetching plan for {} on {} hour {:02}", eva, service_date, hour);
        let response = self
            .authorized(self.client.get(format!(
                "{}/plan/{}/{}/{:02}",
                self.config.timetables_endpoint,
                eva,
                service_date.format("%y%m%d"),
                hour
            )))
            .header("Accept", "application/xml")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // some station/hour pairs legitimately have no plan
            return Ok(EMPTY_TIMETABLE.to_string());
        }
        Self::checked_text(response, "timetables/v1/plan").await
    }

    async fn changes(&self, eva: &str) -> Result<String, Error> {
        debug!("Fetching changes for {}", eva);
        let response = self
            .authorized(self.client.get(format!("{}/fchg/{}", self.config.timetables_endpoint, eva)))
            .header("Accept", "application/xml")
            .send()
            .await?;
        Self::checked_text(response, "timetables/v1/fchg").await
    }
}
