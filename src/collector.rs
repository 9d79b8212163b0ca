use crate::arrival_state::CaptureWindow;
use crate::builder::{build_observation, ObservationInput};
use crate::config::{MatchingConfig, RouteWindow};
use crate::db_parser::{parse_changes, parse_plan, PlanQuery};
use crate::dedup::deduplicate;
use crate::error::Error;
use crate::fetcher::FeedFetcher;
use crate::matcher::{ArrivalMatcher, UsedArrivals};
use crate::observation::{EventKind, Observation, PlannedStop};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike};
use chrono_tz::Tz;
use futures::future::join_all;
use itertools::Itertools;
use tracing::{debug, info, warn};

/// Turns the feeds for a set of route windows into one observation per train.
pub struct TrainCollector<'a, F: FeedFetcher + Sync> {
    fetcher: &'a F,
    matching: MatchingConfig,
}

fn departure_hours(route: &RouteWindow) -> Vec<u32> {
    (route.start_time.hour()..=route.end_time.hour()).collect()
}

fn arrival_hours(route: &RouteWindow, lookahead_hours: u32) -> Vec<u32> {
    let end = (route.end_time.hour() + lookahead_hours).min(23);
    (route.start_time.hour()..=end).collect()
}

/// End of the arrival window, saturating at the end of the service day.
fn arrival_window_end(route: &RouteWindow, lookahead_hours: u32) -> NaiveTime {
    let (end, overflow) = route
        .end_time
        .overflowing_add_signed(Duration::hours(i64::from(lookahead_hours)));
    if overflow == 0 {
        end
    } else {
        NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(end)
    }
}

fn sort_by_event_time(stops: &mut [PlannedStop], kind: EventKind) {
    stops.sort_by_key(|x| (x.event_time(kind).is_none(), x.event_time(kind)));
}

impl<'a, F: FeedFetcher + Sync> TrainCollector<'a, F> {
    pub fn new(fetcher: &'a F, matching: MatchingConfig) -> Self {
        Self { fetcher, matching }
    }

    /// Collects every route at `now`. A route whose feeds fail is logged and left out.
    pub async fn collect(&self, routes: &[RouteWindow], now: DateTime<Tz>) -> Vec<Observation> {
        let mut observations = Vec::new();
        for route in routes {
            match self.collect_route(route, now).await {
                Ok(rows) => {
                    info!("Collected {} observations for {}", rows.len(), route.label);
                    observations.extend(rows);
                }
                Err(e) => warn!("Skipping route {}: {}", route.label, e),
            }
        }
        deduplicate(observations)
    }

    async fn resolve_eva(&self, eva: &Option<String>, station: &str) -> Result<String, Error> {
        match eva.as_deref().map(str::trim).filter(|x| !x.is_empty()) {
            Some(x) => Ok(x.to_string()),
            None => self.fetcher.station_eva(station).await,
        }
    }

    async fn collect_route(
        &self,
        route: &RouteWindow,
        now: DateTime<Tz>,
    ) -> Result<Vec<Observation>, Error> {
        let service_date = now.date_naive();
        let source_eva = self.resolve_eva(&route.source_eva, &route.source_station).await?;
        let target_eva = self.resolve_eva(&route.target_eva, &route.target_station).await?;

        let source_changes = parse_changes(&self.fetcher.changes(&source_eva).await?)?;
        let target_changes = parse_changes(&self.fetcher.changes(&target_eva).await?)?;

        let lookahead = self.matching.arrival_lookahead_hours;
        let departure_query = PlanQuery {
            source_station: &route.source_station,
            target_station: &route.target_station,
            route_label: &route.label,
            window_start: route.start_time,
            window_end: route.end_time,
            kind: EventKind::Departure,
        };
        let arrival_query = PlanQuery {
            window_end: arrival_window_end(route, lookahead),
            kind: EventKind::Arrival,
            ..departure_query.clone()
        };

        let mut departures = self
            .fetch_plans(&source_eva, service_date, &departure_hours(route), &departure_query)
            .await;
        let mut arrivals = self
            .fetch_plans(&target_eva, service_date, &arrival_hours(route, lookahead), &arrival_query)
            .await;
        // a train listed in more than one plan hour is only a candidate once
        departures = departures.into_iter().unique_by(|x| x.train_id.clone()).collect();
        arrivals = arrivals.into_iter().unique_by(|x| x.train_id.clone()).collect();
        sort_by_event_time(&mut departures, EventKind::Departure);
        sort_by_event_time(&mut arrivals, EventKind::Arrival);
        debug!(
            "{}: {} departure and {} arrival candidates",
            route.label,
            departures.len(),
            arrivals.len()
        );

        let window: CaptureWindow = self.matching.capture_window();
        let matcher = ArrivalMatcher::new(
            &arrivals,
            Duration::minutes(self.matching.continuation_window_minutes),
        );
        let mut used = UsedArrivals::new();
        let mut rows = Vec::new();

        for departure in departures.iter().filter(|x| x.planned_departure.is_some()) {
            let (arrival, claimed) = matcher.match_departure(departure, used);
            used = claimed;

            let input = ObservationInput {
                departure,
                arrival,
                departure_change: source_changes.get(&departure.train_id),
                arrival_change: arrival.and_then(|x| target_changes.get(&x.train_id)),
            };
            rows.extend(build_observation(&input, now, &window));
        }
        debug!(
            "{}: matched {} of {} arrivals",
            route.label,
            used.len(),
            arrivals.len()
        );

        Ok(rows)
    }

    /// Fetches plan hours concurrently and parses them in hour order. Failed hours are skipped.
    async fn fetch_plans(
        &self,
        eva: &str,
        service_date: NaiveDate,
        hours: &[u32],
        query: &PlanQuery<'_>,
    ) -> Vec<PlannedStop> {
        let payloads = join_all(
            hours
                .iter()
                .map(|hour| self.fetcher.plan(eva, service_date, *hour)),
        )
        .await;

        let mut stops = Vec::new();
        for (hour, payload) in hours.iter().zip(payloads) {
            let parsed = payload.and_then(|x| Ok(parse_plan(&x, query)?));
            match parsed {
                Ok(rows) => stops.extend(rows),
                Err(e) => warn!("Skipping plan for {} hour {:02}: {}", eva, hour, e),
            }
        }
        stops
    }
}
