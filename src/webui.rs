use crate::arrival_state::{reclassify, ArrivalState, CaptureWindow};
use crate::error::Error;
use crate::observation::{CarObservation, Observation};
use crate::store::ObservationStore;

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rocket::http::Status;
use rocket::{get, routes, State};
use rocket_dyn_templates::{context, Template};
use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::warn;

use std::collections::BTreeMap;

pub struct WebUiState {
    pub database_path: String,
    pub tz: Tz,
    pub window: CaptureWindow,
    pub history_days: u32,
}

#[derive(Serialize)]
struct ObservationView {
    #[serde(flatten)]
    observation: Observation,
    state: ArrivalState,
    planned_departure_hhmm: String,
}

#[derive(Default, Serialize)]
struct StateCounts {
    observed: usize,
    open: usize,
    missing: usize,
    canceled: usize,
}

fn hhmm(value: NaiveDateTime) -> String {
    value.format("%H:%M").to_string()
}

/// Attaches the effective arrival state at `now` to each stored row.
fn classify_rows(
    rows: Vec<Observation>,
    now: NaiveDateTime,
    window: &CaptureWindow,
) -> (Vec<ObservationView>, StateCounts) {
    let mut counts = StateCounts::default();
    let today = now.date();
    let views = rows
        .into_iter()
        .map(|observation| {
            let state = reclassify(&observation, now, today, window);
            match state {
                ArrivalState::Observed => counts.observed += 1,
                ArrivalState::Open => counts.open += 1,
                ArrivalState::Missing => counts.missing += 1,
            }
            if observation.canceled {
                counts.canceled += 1;
            }
            ObservationView {
                planned_departure_hhmm: hhmm(observation.planned_departure),
                observation,
                state,
            }
        })
        .collect();
    (views, counts)
}

fn load(database_path: &str, tz: Tz, first_day: NaiveDate) -> Result<(Vec<Observation>, Vec<CarObservation>), Error> {
    let store = ObservationStore::open_read_only(database_path, tz)?;
    Ok((
        store.observations_since(first_day)?,
        store.car_observations_since(first_day)?,
    ))
}

#[get("/")]
async fn index(state: &State<WebUiState>) -> Result<Template, Status> {
    let now = Utc::now().with_timezone(&state.tz).naive_local();
    let first_day = now
        .date()
        .checked_sub_days(Days::new(u64::from(state.history_days)))
        .unwrap_or(now.date());

    let database_path = state.database_path.clone();
    let tz = state.tz;
    let (rows, car_rows) = spawn_blocking(move || load(&database_path, tz, first_day))
        .await
        .map_err(|e| {
            warn!("Observation loader did not finish: {}", e);
            Status::InternalServerError
        })?
        .map_err(|e| {
            warn!("Could not load observations: {}", e);
            Status::InternalServerError
        })?;
    let (views, counts) = classify_rows(rows, now, &state.window);

    let mut routes: BTreeMap<String, Vec<ObservationView>> = BTreeMap::new();
    for view in views {
        routes
            .entry(view.observation.route_label.clone())
            .or_default()
            .push(view);
    }

    Ok(Template::render(
        "index",
        context! {
            generated_at: now.format("%Y-%m-%d %H:%M").to_string(),
            first_day: first_day.to_string(),
            counts,
            routes,
            car_rows,
        },
    ))
}

pub async fn rocket(state: WebUiState) -> Result<(), Error> {
    rocket::build()
        .mount("/", routes![index])
        .attach(Template::fairing())
        .manage(state)
        .launch()
        .await?;

    Ok(())
}
