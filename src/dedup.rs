use crate::observation::Observation;

use itertools::Itertools;

use std::collections::HashMap;

/// Keeps the last observation per (route, train) and orders the result for storage.
pub fn deduplicate(observations: Vec<Observation>) -> Vec<Observation> {
    let mut latest: HashMap<(String, String), Observation> = HashMap::new();
    for row in observations {
        latest.insert((row.route_label.clone(), row.train_id.clone()), row);
    }

    latest
        .into_values()
        .sorted_by(|a, b| {
            (&a.route_label, a.planned_departure, &a.train_name)
                .cmp(&(&b.route_label, b.planned_departure, &b.train_name))
                .then_with(|| a.train_id.cmp(&b.train_id))
        })
        .collect()
}
