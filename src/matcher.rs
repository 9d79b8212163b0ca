use crate::observation::PlannedStop;

use chrono::Duration;

use std::collections::HashSet;

/// Arrival identifiers already claimed within one route window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsedArrivals {
    ids: HashSet<String>,
}

impl UsedArrivals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, train_id: &str) -> bool {
        self.ids.contains(train_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    fn claim(mut self, train_id: &str) -> Self {
        self.ids.insert(train_id.to_string());
        self
    }
}

/// Pairs departures at the source station with arrivals at the target station.
pub struct ArrivalMatcher<'a> {
    arrivals: &'a [PlannedStop],
    continuation_window: Duration,
}

impl<'a> ArrivalMatcher<'a> {
    pub fn new(arrivals: &'a [PlannedStop], continuation_window: Duration) -> Self {
        Self {
            arrivals,
            continuation_window,
        }
    }

    /// Picks the arrival for `departure`, returning the accumulator with the pick claimed.
    pub fn match_departure(
        &self,
        departure: &PlannedStop,
        used: UsedArrivals,
    ) -> (Option<&'a PlannedStop>, UsedArrivals) {
        match self.choose(departure, &used) {
            Some(arrival) => {
                let used = used.claim(&arrival.train_id);
                (Some(arrival), used)
            }
            None => (None, used),
        }
    }

    fn choose(&self, departure: &PlannedStop, used: &UsedArrivals) -> Option<&'a PlannedStop> {
        if !departure.train_id.is_empty() {
            let direct = self
                .arrivals
                .iter()
                .find(|x| x.train_id == departure.train_id && !used.contains(&x.train_id));
            if direct.is_some() {
                return direct;
            }
        }

        let mut same_name: Vec<&'a PlannedStop> = self
            .arrivals
            .iter()
            .filter(|x| x.train_name == departure.train_name && !used.contains(&x.train_id))
            .collect();
        // absent times sort last
        same_name.sort_by_key(|x| (x.planned_arrival.is_none(), x.planned_arrival));

        let first = *same_name.first()?;
        let Some(planned_departure) = departure.planned_departure else {
            return Some(first);
        };

        let window_minutes = self.continuation_window.num_minutes();
        let mut preferred: Option<(&'a PlannedStop, i64)> = None;
        let mut nearest: Option<(&'a PlannedStop, i64)> = None;

        for candidate in same_name {
            let Some(planned_arrival) = candidate.planned_arrival else {
                continue;
            };
            let diff = (planned_arrival - planned_departure).num_minutes();
            if nearest.map_or(true, |(_, best)| diff.abs() < best) {
                nearest = Some((candidate, diff.abs()));
            }
            if (0..=window_minutes).contains(&diff) && preferred.map_or(true, |(_, best)| diff < best) {
                preferred = Some((candidate, diff));
            }
        }

        preferred
            .or(nearest)
            .map(|(x, _)| x)
            .or(Some(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn departure(id: &str, name: &str, at: Option<NaiveDateTime>) -> PlannedStop {
        PlannedStop {
            train_id: id.to_string(),
            train_name: name.to_string(),
            line: name.to_string(),
            source_station: "A".to_string(),
            target_station: "B".to_string(),
            planned_departure: at,
            planned_arrival: None,
            route_label: "A->B".to_string(),
        }
    }

    fn arrival(id: &str, name: &str, at: Option<NaiveDateTime>) -> PlannedStop {
        PlannedStop {
            planned_departure: None,
            planned_arrival: at,
            ..departure(id, name, None)
        }
    }

    fn matcher(arrivals: &[PlannedStop]) -> ArrivalMatcher<'_> {
        ArrivalMatcher::new(arrivals, Duration::minutes(300))
    }

    #[test]
    fn matches_identical_train_id_first() {
        let arrivals = vec![
            arrival("other", "RE7", Some(t(7, 10))),
            arrival("d1", "ICE70", Some(t(9, 0))),
        ];
        let (chosen, used) = matcher(&arrivals).match_departure(
            &departure("d1", "RE7", Some(t(6, 45))),
            UsedArrivals::new(),
        );
        assert_eq!(chosen.unwrap().train_id, "d1");
        assert!(used.contains("d1"));
    }

    #[test]
    fn prefers_plausible_continuation_over_distant_arrival() {
        let arrivals = vec![
            arrival("late", "RE7", Some(t(6, 45) + Duration::minutes(400))),
            arrival("soon", "RE7", Some(t(7, 0))),
        ];
        let (chosen, _) = matcher(&arrivals)
            .match_departure(&departure("d1", "RE7", Some(t(6, 45))), UsedArrivals::new());
        assert_eq!(chosen.unwrap().train_id, "soon");
    }

    #[test]
    fn falls_back_to_nearest_absolute_distance() {
        let arrivals = vec![
            arrival("before", "RE7", Some(t(6, 40))),
            arrival("far", "RE7", Some(t(6, 45) + Duration::minutes(350))),
        ];
        let (chosen, _) = matcher(&arrivals)
            .match_departure(&departure("d1", "RE7", Some(t(6, 45))), UsedArrivals::new());
        assert_eq!(chosen.unwrap().train_id, "before");
    }

    #[test]
    fn without_departure_time_takes_earliest_arrival() {
        let arrivals = vec![
            arrival("none", "RE7", None),
            arrival("later", "RE7", Some(t(8, 0))),
            arrival("earlier", "RE7", Some(t(7, 30))),
        ];
        let (chosen, _) =
            matcher(&arrivals).match_departure(&departure("d1", "RE7", None), UsedArrivals::new());
        assert_eq!(chosen.unwrap().train_id, "earlier");
    }

    #[test]
    fn different_name_does_not_match() {
        let arrivals = vec![arrival("a1", "RB26", Some(t(7, 0)))];
        let (chosen, used) = matcher(&arrivals)
            .match_departure(&departure("d1", "RE7", Some(t(6, 45))), UsedArrivals::new());
        assert!(chosen.is_none());
        assert_eq!(used.len(), 0);
    }

    #[test]
    fn an_arrival_is_claimed_at_most_once() {
        let arrivals = vec![
            arrival("a1", "RE7", Some(t(7, 20))),
            arrival("a2", "RE7", Some(t(7, 50))),
        ];
        let matcher = matcher(&arrivals);

        let (first, used) =
            matcher.match_departure(&departure("d1", "RE7", Some(t(6, 45))), UsedArrivals::new());
        let (second, used) = matcher.match_departure(&departure("d2", "RE7", Some(t(6, 50))), used);
        let (third, used) = matcher.match_departure(&departure("d3", "RE7", Some(t(7, 0))), used);

        assert_eq!(first.unwrap().train_id, "a1");
        assert_eq!(second.unwrap().train_id, "a2");
        assert!(third.is_none());
        assert_eq!(used.len(), 2);
    }

    #[test]
    fn all_candidates_without_time_fall_back_to_first() {
        let arrivals = vec![arrival("x", "RE7", None)];
        let (chosen, _) = matcher(&arrivals)
            .match_departure(&departure("d1", "RE7", Some(t(6, 45))), UsedArrivals::new());
        assert_eq!(chosen.unwrap().train_id, "x");
    }
}
