use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::Serialize;

/// Which half of a stop record a plan parse is interested in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Departure,
    Arrival,
}

/// One scheduled event for a train at a station, as read from a plan feed.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedStop {
    pub train_id: String, // only unique within a single fetch
    pub train_name: String,
    pub line: String,
    pub source_station: String,
    pub target_station: String,
    pub planned_departure: Option<NaiveDateTime>,
    pub planned_arrival: Option<NaiveDateTime>,
    pub route_label: String,
}

impl PlannedStop {
    pub fn event_time(&self, kind: EventKind) -> Option<NaiveDateTime> {
        match kind {
            EventKind::Departure => self.planned_departure,
            EventKind::Arrival => self.planned_arrival,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeInfo {
    pub train_id: String,
    pub changed_departure: Option<NaiveDateTime>,
    pub changed_arrival: Option<NaiveDateTime>,
    pub departure_reason: String,
    pub arrival_reason: String,
    pub canceled: bool,
}

impl ChangeInfo {
    /// A revised arrival or a cancellation counts as a confirmed arrival outcome.
    pub fn has_arrival_signal(&self) -> bool {
        self.changed_arrival.is_some() || self.canceled
    }
}

/// Storage identity of an observation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
    pub service_date: NaiveDate,
    pub train_id: String,
    pub route_label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Observation {
    pub observation_ts: DateTime<Tz>,
    pub service_date: NaiveDate,
    pub train_id: String,
    pub train_name: String,
    pub line: String,
    pub route_label: String,
    pub source_station: String,
    pub target_station: String,
    pub planned_departure: NaiveDateTime,
    pub actual_departure: Option<NaiveDateTime>,
    pub planned_arrival: Option<NaiveDateTime>,
    pub actual_arrival: Option<NaiveDateTime>,
    pub delay_minutes: i64,
    pub schedule_deviation_minutes: i64,
    pub arrival_delay_minutes: i64,
    pub arrival_schedule_deviation_minutes: i64,
    pub arrival_observed: bool,
    pub arrival_info_missing: bool,
    pub departure_reason: String,
    pub arrival_reason: String,
    pub canceled_departure: bool,
    pub canceled_arrival: bool,
    pub canceled: bool,
}

impl Observation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            service_date: self.service_date,
            train_id: self.train_id.clone(),
            route_label: self.route_label.clone(),
        }
    }
}

/// Sampled road travel time for one commute route and service day.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CarObservation {
    pub observation_ts: DateTime<Tz>,
    pub service_date: NaiveDate,
    pub route_label: String,
    pub from_name: String,
    pub to_name: String,
    pub target_departure_time: String,
    pub duration_minutes: i64,
    pub distance_km: f64,
}

/// Whole minutes between two instants, truncated toward zero; zero if either is unknown.
pub fn minutes_delta(actual: Option<NaiveDateTime>, planned: Option<NaiveDateTime>) -> i64 {
    match (actual, planned) {
        (Some(actual), Some(planned)) => (actual - planned).num_minutes(),
        _ => 0,
    }
}
