use crate::observation::{ChangeInfo, EventKind, PlannedStop};

use chrono::{NaiveDateTime, NaiveTime};
use itertools::Itertools;
use quick_xml::de::from_str;
use quick_xml::DeError;
use serde::Deserialize;

use std::collections::HashMap;
use std::fmt;

const UNKNOWN_TRAIN: &str = "Unbekannt";
const CANCELED_STATUS: &str = "c";

#[derive(Debug)]
pub enum FeedErrorType {
    MalformedPayload(DeError),
    InvalidTimestamp(String),
}

impl fmt::Display for FeedErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeedErrorType::MalformedPayload(x) => write!(f, "Malformed timetable XML: {}", x),
            FeedErrorType::InvalidTimestamp(x) => write!(f, "Invalid DB timestamp {:?}", x),
        }
    }
}

#[derive(Debug)]
pub struct FeedError {
    error_type: FeedErrorType,
    train_id: Option<String>,
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.train_id {
            Some(x) => write!(f, "Error reading timetable feed at train {}: {}", x, self.error_type),
            None => write!(f, "Error reading timetable feed: {}", self.error_type),
        }
    }
}

impl FeedError {
    #[cfg(test)]
    pub fn error_type(&self) -> &FeedErrorType {
        &self.error_type
    }

    fn at_train(mut self, train_id: &str) -> Self {
        self.train_id = Some(train_id.to_string());
        self
    }
}

#[derive(Debug, Deserialize)]
struct Timetable {
    #[serde(rename = "s", default)]
    stops: Vec<Stop>,
}

#[derive(Debug, Deserialize)]
struct Stop {
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "tl")]
    train_line: Option<TrainLine>,
    #[serde(rename = "dp")]
    departure: Option<Event>,
    #[serde(rename = "ar")]
    arrival: Option<Event>,
    #[serde(rename = "m", default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct TrainLine {
    #[serde(rename = "@c")]
    category: Option<String>,
    #[serde(rename = "@n")]
    number: Option<String>,
    #[serde(rename = "@o")]
    operator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "@pt")]
    planned_time: Option<String>,
    #[serde(rename = "@ct")]
    changed_time: Option<String>,
    #[serde(rename = "@ppth")]
    planned_path: Option<String>,
    #[serde(rename = "@cs")]
    changed_status: Option<String>,
    #[serde(rename = "m", default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(rename = "@t")]
    kind: Option<String>,
    #[serde(rename = "@txt")]
    text_attr: Option<String>,
    #[serde(rename = "@cat")]
    category: Option<String>,
    #[serde(rename = "@c")]
    code: Option<String>,
    #[serde(rename = "@from")]
    valid_from: Option<String>,
    #[serde(rename = "@to")]
    valid_to: Option<String>,
    #[serde(rename = "@id")]
    id: Option<String>,
    #[serde(rename = "$text")]
    body: Option<String>,
}

impl Message {
    fn describe(&self) -> String {
        let text = [
            &self.kind,
            &self.text_attr,
            &self.category,
            &self.code,
            &self.valid_from,
            &self.valid_to,
            &self.id,
        ]
        .into_iter()
        .filter_map(|x| non_empty(x.as_deref()))
        .join(" ");

        if text.is_empty() {
            self.body.as_deref().unwrap_or("").trim().to_string()
        } else {
            text
        }
    }
}

/// What a plan payload is filtered down to.
#[derive(Clone, Debug)]
pub struct PlanQuery<'a> {
    pub source_station: &'a str,
    pub target_station: &'a str,
    pub route_label: &'a str,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub kind: EventKind,
}

impl PlanQuery<'_> {
    /// The endpoint a matching train must also pass through.
    fn other_endpoint(&self) -> &str {
        match self.kind {
            EventKind::Departure => self.target_station,
            EventKind::Arrival => self.source_station,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|x| !x.is_empty())
}

fn parse_timetable(payload: &str) -> Result<Timetable, FeedError> {
    from_str(payload).map_err(|e| FeedError {
        error_type: FeedErrorType::MalformedPayload(e),
        train_id: None,
    })
}

/// Parses a compact `YYMMDDHHmm` feed timestamp; anything after the tenth character is ignored.
pub fn parse_db_time(raw: &str) -> Result<NaiveDateTime, FeedError> {
    let invalid = || FeedError {
        error_type: FeedErrorType::InvalidTimestamp(raw.to_string()),
        train_id: None,
    };
    let compact = raw.trim().get(..10).ok_or_else(invalid)?;
    NaiveDateTime::parse_from_str(compact, "%y%m%d%H%M").map_err(|_| invalid())
}

fn parse_optional_time(raw: Option<&str>) -> Result<Option<NaiveDateTime>, FeedError> {
    match non_empty(raw) {
        Some(x) => Ok(Some(parse_db_time(x)?)),
        None => Ok(None),
    }
}

fn train_name(train_line: Option<&TrainLine>) -> (String, String) {
    let Some(tl) = train_line else {
        return (UNKNOWN_TRAIN.to_string(), String::new());
    };

    let category = non_empty(tl.category.as_deref());
    let number = non_empty(tl.number.as_deref());
    let name = match (category, number) {
        (Some(c), Some(n)) => format!("{}{}", c, n).replace(' ', ""),
        (None, Some(n)) => n.to_string(),
        (Some(c), None) => c.to_string(),
        (None, None) => non_empty(tl.operator.as_deref())
            .unwrap_or(UNKNOWN_TRAIN)
            .replace(' ', ""),
    };
    (name.clone(), name)
}

fn routing_path(stop: &Stop) -> Option<&str> {
    [&stop.departure, &stop.arrival]
        .into_iter()
        .flatten()
        .find_map(|event| non_empty(event.planned_path.as_deref()))
}

fn path_contains(path: &str, station: &str) -> bool {
    let station = station.trim().to_lowercase();
    path.split('|')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .any(|x| x.to_lowercase() == station)
}

/// Reads one hour of a station's planned timetable into candidate stops.
pub fn parse_plan(payload: &str, query: &PlanQuery) -> Result<Vec<PlannedStop>, FeedError> {
    let timetable = parse_timetable(payload)?;
    let mut rows = Vec::new();

    for stop in &timetable.stops {
        let Some(train_id) = non_empty(stop.id.as_deref()) else {
            continue;
        };

        let planned_departure = parse_optional_time(
            stop.departure.as_ref().and_then(|x| x.planned_time.as_deref()),
        )
        .map_err(|e| e.at_train(train_id))?;
        let planned_arrival = parse_optional_time(
            stop.arrival.as_ref().and_then(|x| x.planned_time.as_deref()),
        )
        .map_err(|e| e.at_train(train_id))?;

        let event_time = match query.kind {
            EventKind::Departure => planned_departure,
            EventKind::Arrival => planned_arrival,
        };
        let Some(event_time) = event_time else {
            continue;
        };
        if event_time.time() < query.window_start || event_time.time() > query.window_end {
            continue;
        }

        if let Some(path) = routing_path(stop) {
            if !path_contains(path, query.other_endpoint()) {
                continue;
            }
        }

        let (train_name, line) = train_name(stop.train_line.as_ref());
        rows.push(PlannedStop {
            train_id: train_id.to_string(),
            train_name,
            line,
            source_station: query.source_station.to_string(),
            target_station: query.target_station.to_string(),
            planned_departure,
            planned_arrival,
            route_label: query.route_label.to_string(),
        });
    }

    Ok(rows)
}

fn reasons(stop: &Stop, event: Option<&Event>) -> String {
    let event_messages = event.map(|x| x.messages.as_slice()).unwrap_or_default();
    stop.messages
        .iter()
        .chain(event_messages)
        .map(Message::describe)
        .filter(|x| !x.is_empty())
        .unique()
        .join(" | ")
}

fn is_canceled(event: Option<&Event>) -> bool {
    event
        .and_then(|x| x.changed_status.as_deref())
        .map_or(false, |x| x == CANCELED_STATUS)
}

/// Reads a station's change feed into one change record per train.
pub fn parse_changes(payload: &str) -> Result<HashMap<String, ChangeInfo>, FeedError> {
    let timetable = parse_timetable(payload)?;
    let mut result = HashMap::new();

    for stop in &timetable.stops {
        let Some(train_id) = non_empty(stop.id.as_deref()) else {
            continue;
        };
        let departure = stop.departure.as_ref();
        let arrival = stop.arrival.as_ref();

        let changed_departure =
            parse_optional_time(departure.and_then(|x| x.changed_time.as_deref()))
                .map_err(|e| e.at_train(train_id))?;
        let changed_arrival = parse_optional_time(arrival.and_then(|x| x.changed_time.as_deref()))
            .map_err(|e| e.at_train(train_id))?;

        result.insert(
            train_id.to_string(),
            ChangeInfo {
                train_id: train_id.to_string(),
                changed_departure,
                changed_arrival,
                departure_reason: reasons(stop, departure),
                arrival_reason: reasons(stop, arrival),
                canceled: is_canceled(departure) || is_canceled(arrival),
            },
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn query(kind: EventKind) -> PlanQuery<'static> {
        PlanQuery {
            source_station: "Freiburg(Breisgau) Hbf",
            target_station: "Offenburg",
            route_label: "Morning",
            window_start: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            kind,
        }
    }

    const PLAN: &str = r#"<timetable station="Freiburg(Breisgau) Hbf">
        <s id="-1-2603020645">
            <tl c="RE" n="1 7" o="800" />
            <dp pt="2603020645" ppth="Emmendingen|Lahr(Schwarzw)|offenburg|Karlsruhe Hbf" />
        </s>
        <s id="-2-2603020700">
            <tl c="RB" n="26" />
            <dp pt="2603020700" ppth="Titisee|Neustadt(Schwarzw)" />
        </s>
        <s id="-3-2603020830">
            <tl c="ICE" n="70" />
            <dp pt="2603020830" ppth="Offenburg" />
        </s>
        <s>
            <tl c="RE" n="3" />
            <dp pt="2603020710" />
        </s>
        <s id="-4-2603020800">
            <tl o="DB Regio" />
            <ar pt="2603020755" />
            <dp pt="2603020800" />
        </s>
        <s id="-5-2603020615">
            <ar pt="2603020614" ppth="Basel Bad Bf" />
        </s>
    </timetable>"#;

    #[test]
    fn parses_compact_timestamps() {
        assert_eq!(parse_db_time("2603020645").unwrap(), at(6, 45));
        assert_eq!(parse_db_time(" 260302064599 ").unwrap(), at(6, 45));
        assert!(parse_db_time("26030206").is_err());
        assert!(parse_db_time("26AB020645").is_err());
    }

    #[test]
    fn departure_plan_filters_on_window_and_path() {
        let rows = parse_plan(PLAN, &query(EventKind::Departure)).unwrap();
        let ids: Vec<_> = rows.iter().map(|x| x.train_id.as_str()).collect();
        assert_eq!(ids, vec!["-1-2603020645", "-4-2603020800"]);

        assert_eq!(rows[0].train_name, "RE17");
        assert_eq!(rows[0].line, "RE17");
        assert_eq!(rows[0].planned_departure, Some(at(6, 45)));
        assert_eq!(rows[0].planned_arrival, None);
        assert_eq!(rows[0].route_label, "Morning");

        // no path attribute at all, operator code fallback
        assert_eq!(rows[1].train_name, "DBRegio");
        assert_eq!(rows[1].planned_arrival, Some(at(7, 55)));
    }

    #[test]
    fn arrival_plan_requires_source_in_path() {
        let payload = r#"<timetable>
            <s id="a1"><tl c="RE" n="7"/><ar pt="2603020720" ppth="Freiburg(Breisgau) Hbf|Emmendingen"/></s>
            <s id="a2"><tl c="RE" n="7"/><ar pt="2603020725" ppth="Basel SBB|Müllheim(Baden)"/></s>
            <s id="a3"><ar pt="2603020730"/></s>
        </timetable>"#;
        let rows = parse_plan(payload, &query(EventKind::Arrival)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].train_id, "a1");
        assert_eq!(rows[1].train_id, "a3");
        assert_eq!(rows[1].train_name, "Unbekannt");
        assert_eq!(rows[1].line, "");
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let payload = r#"<timetable>
            <s id="x"><tl n="42"/><dp pt="2603020600"/></s>
            <s id="y"><tl c="S"/><dp pt="2603020800"/></s>
            <s id="z"><tl c="S"/><dp pt="2603020801"/></s>
        </timetable>"#;
        let rows = parse_plan(payload, &query(EventKind::Departure)).unwrap();
        let names: Vec<_> = rows.iter().map(|x| x.train_name.as_str()).collect();
        assert_eq!(names, vec!["42", "S"]);
    }

    #[test]
    fn empty_timetable_has_no_candidates() {
        assert!(parse_plan("<timetable/>", &query(EventKind::Departure))
            .unwrap()
            .is_empty());
        assert!(parse_changes("<timetable/>").unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = parse_plan("<timetable><s id=", &query(EventKind::Departure)).unwrap_err();
        assert!(matches!(err.error_type(), FeedErrorType::MalformedPayload(_)));
    }

    #[test]
    fn short_timestamp_fails_the_payload() {
        let payload = r#"<timetable><s id="x"><dp pt="2603"/></s></timetable>"#;
        let err = parse_plan(payload, &query(EventKind::Departure)).unwrap_err();
        assert!(matches!(err.error_type(), FeedErrorType::InvalidTimestamp(_)));
        assert!(err.to_string().contains("train x"));
    }

    #[test]
    fn changes_collect_times_reasons_and_cancellation() {
        let payload = r#"<timetable station="Offenburg">
            <s id="t1">
                <m t="d" c="36" cat="Information" id="r1"/>
                <ar ct="2603020728">
                    <m t="d" c="36" cat="Information" id="r1"/>
                    <m t="h" txt="Bauarbeiten"/>
                </ar>
                <dp ct="2603020731"/>
            </s>
            <s id="t2">
                <dp cs="c"/>
            </s>
            <s id="t3">
                <ar cs="a" ct="2603020801"/>
                <m>Signalstoerung</m>
            </s>
            <s>
                <dp cs="c"/>
            </s>
        </timetable>"#;
        let changes = parse_changes(payload).unwrap();
        assert_eq!(changes.len(), 3);

        let t1 = &changes["t1"];
        assert_eq!(t1.changed_arrival, Some(at(7, 28)));
        assert_eq!(t1.changed_departure, Some(at(7, 31)));
        assert_eq!(t1.arrival_reason, "d Information 36 r1 | h Bauarbeiten");
        assert_eq!(t1.departure_reason, "d Information 36 r1");
        assert!(!t1.canceled);

        let t2 = &changes["t2"];
        assert!(t2.canceled);
        assert!(t2.has_arrival_signal());
        assert_eq!(t2.departure_reason, "");

        let t3 = &changes["t3"];
        assert!(!t3.canceled);
        assert_eq!(t3.arrival_reason, "Signalstoerung");
    }

    #[test]
    fn repeated_train_in_changes_keeps_last() {
        let payload = r#"<timetable>
            <s id="t1"><ar ct="2603020728"/></s>
            <s id="t1"><ar ct="2603020735"/></s>
        </timetable>"#;
        let changes = parse_changes(payload).unwrap();
        assert_eq!(changes["t1"].changed_arrival, Some(at(7, 35)));
    }
}
