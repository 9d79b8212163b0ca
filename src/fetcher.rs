use crate::error::Error;

use async_trait::async_trait;
use chrono::NaiveDate;

/// Stands in for a plan hour the feed has nothing for.
pub const EMPTY_TIMETABLE: &str = "<timetable/>";

/// Source of raw timetable payloads for a station.
#[async_trait]
pub trait FeedFetcher {
    async fn station_eva(&self, station_name: &str) -> Result<String, Error>;
    async fn plan(&self, eva: &str, service_date: NaiveDate, hour: u32) -> Result<String, Error>;
    async fn changes(&self, eva: &str) -> Result<String, Error>;
}
