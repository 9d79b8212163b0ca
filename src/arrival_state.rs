//! Arrival-leg classification shared by the collector and the read path.
//!
//! Both callers describe what they know about an arrival as [`ArrivalEvidence`] and get the
//! same answer from [`classify`] for the same instant.

use crate::observation::Observation;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ArrivalState {
    Observed,
    /// Still inside the capture window, outcome unknown.
    Open,
    /// Capture window elapsed without any arrival data.
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureWindow {
    pub length: Duration,
    /// Accept a silent arrival as on time once its planned moment has passed.
    pub infer_silent_arrivals: bool,
}

// Defaults to inferring silent arrivals, so a matched train with no arrival data reads as
// Observed from its planned arrival on. Disable inference to keep it Open until real data
// arrives or the window closes.
impl Default for CaptureWindow {
    fn default() -> Self {
        Self {
            length: Duration::hours(1),
            infer_silent_arrivals: true,
        }
    }
}

impl CaptureWindow {
    pub fn deadline(&self, planned_arrival: NaiveDateTime) -> NaiveDateTime {
        planned_arrival + self.length
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArrivalEvidence {
    pub planned_arrival: Option<NaiveDateTime>,
    /// An explicit arrival signal, or an arrival already confirmed in storage.
    pub confirmed: bool,
    /// Whether a silent arrival may be inferred once its planned moment passes.
    pub inferable: bool,
    pub flagged_missing: bool,
    /// The service day is over, so nothing more will arrive for it.
    pub service_day_over: bool,
}

pub fn classify(evidence: &ArrivalEvidence, now: NaiveDateTime, window: &CaptureWindow) -> ArrivalState {
    if evidence.confirmed {
        return ArrivalState::Observed;
    }

    if let Some(planned) = evidence.planned_arrival {
        let deadline = window.deadline(planned);
        if now > deadline {
            return ArrivalState::Missing;
        }
        if evidence.inferable && window.infer_silent_arrivals && now >= planned {
            return ArrivalState::Observed;
        }
    }

    if evidence.flagged_missing || evidence.service_day_over {
        ArrivalState::Missing
    } else {
        ArrivalState::Open
    }
}

/// Effective arrival state of a stored row at `now`, independent of when it was written.
pub fn reclassify(
    observation: &Observation,
    now: NaiveDateTime,
    today: NaiveDate,
    window: &CaptureWindow,
) -> ArrivalState {
    let evidence = ArrivalEvidence {
        planned_arrival: observation.planned_arrival,
        confirmed: observation.arrival_observed,
        inferable: false,
        flagged_missing: observation.arrival_info_missing,
        service_day_over: observation.service_date < today,
    };
    classify(&evidence, now, window)
}
