use crate::arrival_state::{classify, ArrivalEvidence, ArrivalState, CaptureWindow};
use crate::observation::{minutes_delta, ChangeInfo, Observation, PlannedStop};

use chrono::DateTime;
use chrono_tz::Tz;

const CANCELLATION_REASON: &str = "Ausfall";

/// Everything known about one departure at collection time.
pub struct ObservationInput<'a> {
    pub departure: &'a PlannedStop,
    pub arrival: Option<&'a PlannedStop>,
    pub departure_change: Option<&'a ChangeInfo>,
    pub arrival_change: Option<&'a ChangeInfo>,
}

fn leg_reason(reason: Option<&str>, canceled: bool) -> String {
    let reason = reason.unwrap_or("").trim();
    if canceled && reason.is_empty() {
        CANCELLATION_REASON.to_string()
    } else {
        reason.to_string()
    }
}

/// Builds the observation for one departure as seen at `now`.
///
/// Returns `None` for a departure without a planned departure time.
pub fn build_observation(
    input: &ObservationInput,
    now: DateTime<Tz>,
    window: &CaptureWindow,
) -> Option<Observation> {
    let departure = input.departure;
    let planned_departure = departure.planned_departure?;
    let now_local = now.naive_local();

    let actual_departure = input.departure_change.and_then(|x| x.changed_departure);
    let deviation = minutes_delta(actual_departure, Some(planned_departure));
    let canceled_departure = input.departure_change.map_or(false, |x| x.canceled);
    let departure_reason = leg_reason(
        input.departure_change.map(|x| x.departure_reason.as_str()),
        canceled_departure,
    );

    let planned_arrival = input.arrival.and_then(|x| x.planned_arrival);
    let evidence = ArrivalEvidence {
        planned_arrival,
        confirmed: input.arrival_change.map_or(false, ChangeInfo::has_arrival_signal),
        inferable: input.arrival.is_some(),
        flagged_missing: false,
        service_day_over: false,
    };
    let state = classify(&evidence, now_local, window);

    let (actual_arrival, arrival_deviation, canceled_arrival, arrival_reason) = match state {
        ArrivalState::Observed => {
            let actual = input
                .arrival_change
                .and_then(|x| x.changed_arrival)
                .or(planned_arrival);
            let canceled = input.arrival_change.map_or(false, |x| x.canceled);
            let reason = leg_reason(
                input.arrival_change.map(|x| x.arrival_reason.as_str()),
                canceled,
            );
            (actual, minutes_delta(actual, planned_arrival), canceled, reason)
        }
        ArrivalState::Open | ArrivalState::Missing => (None, 0, false, String::new()),
    };

    Some(Observation {
        observation_ts: now,
        service_date: now_local.date(),
        train_id: departure.train_id.clone(),
        train_name: departure.train_name.clone(),
        line: departure.line.clone(),
        route_label: departure.route_label.clone(),
        source_station: departure.source_station.clone(),
        target_station: departure.target_station.clone(),
        planned_departure,
        actual_departure,
        planned_arrival,
        actual_arrival,
        delay_minutes: deviation.max(0),
        schedule_deviation_minutes: deviation,
        arrival_delay_minutes: arrival_deviation.max(0),
        arrival_schedule_deviation_minutes: arrival_deviation,
        arrival_observed: state == ArrivalState::Observed,
        arrival_info_missing: state == ArrivalState::Missing,
        departure_reason,
        arrival_reason,
        canceled_departure,
        canceled_arrival,
        canceled: canceled_departure || canceled_arrival,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone};
    use chrono_tz::Europe::Berlin;

    fn t(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn now(at: NaiveDateTime) -> DateTime<Tz> {
        Berlin.from_local_datetime(&at).unwrap()
    }

    fn stop(planned_departure: Option<NaiveDateTime>, planned_arrival: Option<NaiveDateTime>) -> PlannedStop {
        PlannedStop {
            train_id: "t1".to_string(),
            train_name: "RE1".to_string(),
            line: "RE1".to_string(),
            source_station: "A".to_string(),
            target_station: "B".to_string(),
            planned_departure,
            planned_arrival,
            route_label: "A->B".to_string(),
        }
    }

    fn change() -> ChangeInfo {
        ChangeInfo {
            train_id: "t1".to_string(),
            ..Default::default()
        }
    }

    fn build(
        arrival: Option<&PlannedStop>,
        departure_change: Option<&ChangeInfo>,
        arrival_change: Option<&ChangeInfo>,
        at: NaiveDateTime,
    ) -> Observation {
        let departure = stop(Some(t(6, 45)), None);
        let input = ObservationInput {
            departure: &departure,
            arrival,
            departure_change,
            arrival_change,
        };
        build_observation(&input, now(at), &CaptureWindow::default()).unwrap()
    }

    #[test]
    fn window_transitions_without_changes() {
        let arrival = stop(None, Some(t(7, 20)));

        let before = build(Some(&arrival), None, None, t(7, 19));
        assert!(!before.arrival_observed);
        assert!(!before.arrival_info_missing);
        assert_eq!(before.actual_arrival, None);

        let inside = build(Some(&arrival), None, None, t(8, 19));
        assert!(!inside.arrival_info_missing);
        assert!(inside.arrival_observed);
        assert_eq!(inside.actual_arrival, Some(t(7, 20)));
        assert_eq!(inside.arrival_delay_minutes, 0);

        let after = build(Some(&arrival), None, None, t(8, 21));
        assert!(!after.arrival_observed);
        assert!(after.arrival_info_missing);
    }

    #[test]
    fn window_without_inference_stays_open_until_deadline() {
        let departure = stop(Some(t(6, 45)), None);
        let arrival = stop(None, Some(t(7, 20)));
        let input = ObservationInput {
            departure: &departure,
            arrival: Some(&arrival),
            departure_change: None,
            arrival_change: None,
        };
        let window = CaptureWindow {
            length: Duration::hours(1),
            infer_silent_arrivals: false,
        };
        let row = build_observation(&input, now(t(8, 19)), &window).unwrap();
        assert!(!row.arrival_observed);
        assert!(!row.arrival_info_missing);
    }

    #[test]
    fn revised_arrival_is_observed_immediately() {
        let arrival = stop(None, Some(t(7, 20)));
        let revised = ChangeInfo {
            changed_arrival: Some(t(7, 28)),
            arrival_reason: "Verspätung aus vorheriger Fahrt".to_string(),
            ..change()
        };
        let row = build(Some(&arrival), None, Some(&revised), t(6, 50));
        assert!(row.arrival_observed);
        assert_eq!(row.actual_arrival, Some(t(7, 28)));
        assert_eq!(row.arrival_delay_minutes, 8);
        assert_eq!(row.arrival_schedule_deviation_minutes, 8);
        assert_eq!(row.arrival_reason, "Verspätung aus vorheriger Fahrt");
    }

    #[test]
    fn early_departure_clamps_delay() {
        let early = ChangeInfo {
            changed_departure: Some(t(6, 42)),
            ..change()
        };
        let row = build(None, Some(&early), None, t(6, 50));
        assert_eq!(row.actual_departure, Some(t(6, 42)));
        assert_eq!(row.delay_minutes, 0);
        assert_eq!(row.schedule_deviation_minutes, -3);
    }

    #[test]
    fn cancellation_defaults_reason() {
        let arrival = stop(None, Some(t(7, 20)));
        let canceled = ChangeInfo {
            canceled: true,
            ..change()
        };
        let row = build(Some(&arrival), Some(&canceled), Some(&canceled), t(6, 30));
        assert!(row.canceled_departure);
        assert!(row.canceled_arrival);
        assert!(row.canceled);
        assert!(row.arrival_observed);
        assert_eq!(row.departure_reason, "Ausfall");
        assert_eq!(row.arrival_reason, "Ausfall");
        assert_eq!(row.actual_arrival, Some(t(7, 20)));
    }

    #[test]
    fn unmatched_arrival_is_never_observed() {
        let row = build(None, None, None, t(23, 0));
        assert!(!row.arrival_observed);
        assert!(!row.arrival_info_missing);
        assert_eq!(row.planned_arrival, None);
        assert_eq!(row.arrival_reason, "");
    }

    #[test]
    fn departure_without_planned_time_is_discarded() {
        let departure = stop(None, Some(t(7, 0)));
        let input = ObservationInput {
            departure: &departure,
            arrival: None,
            departure_change: None,
            arrival_change: None,
        };
        assert!(build_observation(&input, now(t(7, 0)), &CaptureWindow::default()).is_none());
    }

    #[test]
    fn observation_carries_departure_identity() {
        let row = build(None, None, None, t(6, 50));
        assert_eq!(row.service_date, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_eq!(row.train_id, "t1");
        assert_eq!(row.route_label, "A->B");
        assert_eq!(row.planned_departure, t(6, 45));
        assert_eq!(row.actual_departure, None);
        assert_eq!(row.delay_minutes, 0);
    }
}
