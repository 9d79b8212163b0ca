use crate::observation::Observation;

/// Folds a freshly collected observation into the stored row with the same key.
///
/// Departure facts always follow the newer row. Arrival facts only follow it when it has
/// actually observed the arrival, so a later fetch that saw nothing cannot erase them.
pub fn merge(existing: &Observation, incoming: &Observation) -> Observation {
    let arrival_observed = existing.arrival_observed || incoming.arrival_observed;
    let arrival_source = if incoming.arrival_observed {
        incoming
    } else {
        existing
    };

    let arrival_reason = if incoming.arrival_observed || existing.arrival_reason.is_empty() {
        incoming.arrival_reason.clone()
    } else {
        existing.arrival_reason.clone()
    };

    Observation {
        actual_arrival: arrival_source.actual_arrival,
        arrival_delay_minutes: arrival_source.arrival_delay_minutes,
        arrival_schedule_deviation_minutes: arrival_source.arrival_schedule_deviation_minutes,
        canceled_arrival: arrival_source.canceled_arrival,
        arrival_observed,
        arrival_info_missing: !arrival_observed
            && (existing.arrival_info_missing || incoming.arrival_info_missing),
        arrival_reason,
        ..incoming.clone()
    }
}
