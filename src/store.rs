use crate::error::Error;
use crate::merge::merge;
use crate::observation::{CarObservation, Observation, ObservationKey};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use tracing::debug;

use std::collections::HashSet;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    observation_ts TEXT NOT NULL,
    service_date TEXT NOT NULL,
    train_id TEXT NOT NULL,
    train_name TEXT,
    line TEXT,
    route_label TEXT NOT NULL,
    source_station TEXT NOT NULL,
    target_station TEXT NOT NULL,
    planned_departure TEXT NOT NULL,
    actual_departure TEXT,
    planned_arrival TEXT,
    actual_arrival TEXT,
    delay_minutes INTEGER NOT NULL,
    schedule_deviation_minutes INTEGER NOT NULL,
    arrival_delay_minutes INTEGER NOT NULL DEFAULT 0,
    arrival_schedule_deviation_minutes INTEGER NOT NULL DEFAULT 0,
    arrival_observed INTEGER NOT NULL DEFAULT 0,
    arrival_info_missing INTEGER NOT NULL DEFAULT 0,
    departure_reason TEXT,
    arrival_reason TEXT,
    canceled_departure INTEGER NOT NULL DEFAULT 0,
    canceled_arrival INTEGER NOT NULL DEFAULT 0,
    canceled INTEGER NOT NULL,
    UNIQUE(service_date, train_id, route_label)
);

CREATE TABLE IF NOT EXISTS car_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    observation_ts TEXT NOT NULL,
    service_date TEXT NOT NULL,
    route_label TEXT NOT NULL,
    from_name TEXT NOT NULL,
    to_name TEXT NOT NULL,
    target_departure_time TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    distance_km REAL NOT NULL,
    UNIQUE(service_date, route_label)
);
";

// Columns added after the first schema; older databases get them on startup.
const ADDED_COLUMNS: [(&str, &str); 9] = [
    ("train_name", "TEXT"),
    ("arrival_delay_minutes", "INTEGER NOT NULL DEFAULT 0"),
    ("arrival_schedule_deviation_minutes", "INTEGER NOT NULL DEFAULT 0"),
    ("arrival_observed", "INTEGER NOT NULL DEFAULT 0"),
    ("arrival_info_missing", "INTEGER NOT NULL DEFAULT 0"),
    ("departure_reason", "TEXT"),
    ("arrival_reason", "TEXT"),
    ("canceled_departure", "INTEGER NOT NULL DEFAULT 0"),
    ("canceled_arrival", "INTEGER NOT NULL DEFAULT 0"),
];

const OBSERVATION_COLUMNS: &str = "
    observation_ts, service_date, train_id, train_name, line, route_label,
    source_station, target_station, planned_departure, actual_departure,
    planned_arrival, actual_arrival, delay_minutes, schedule_deviation_minutes,
    arrival_delay_minutes, arrival_schedule_deviation_minutes, arrival_observed,
    arrival_info_missing, departure_reason, arrival_reason,
    canceled_departure, canceled_arrival, canceled";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite persistence for observations and car samples.
pub struct ObservationStore {
    conn: Connection,
    tz: Tz,
}

impl ObservationStore {
    pub fn open(path: impl AsRef<Path>, tz: Tz) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Connection::open(path)?,
            tz,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Opens an existing database for reading only. Nothing is created or migrated.
    pub fn open_read_only(path: impl AsRef<Path>, tz: Tz) -> Result<Self, Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn, tz })
    }

    #[cfg(test)]
    pub fn open_in_memory(tz: Tz) -> Result<Self, Error> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            tz,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), Error> {
        self.conn.execute_batch(SCHEMA)?;
        self.migrate_observations()
    }

    fn migrate_observations(&self) -> Result<(), Error> {
        let existing = {
            let mut statement = self.conn.prepare("PRAGMA table_info(observations)")?;
            let names = statement.query_map([], |row| row.get::<_, String>(1))?;
            let names = names.collect::<Result<HashSet<String>, _>>()?;
            names
        };

        for (column, column_type) in ADDED_COLUMNS {
            if !existing.contains(column) {
                debug!("Adding column {} to observations", column);
                self.conn.execute(
                    &format!("ALTER TABLE observations ADD COLUMN {} {}", column, column_type),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Merges a collection run into storage in one transaction.
    pub fn upsert_many(&mut self, rows: &[Observation]) -> Result<usize, Error> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tz = self.tz;
        let tx = self.conn.transaction()?;
        for row in rows {
            let merged = match find_observation(&tx, tz, &row.key())? {
                Some(existing) => merge(&existing, row),
                None => row.clone(),
            };
            write_observation(&tx, &merged)?;
        }
        tx.commit()?;

        Ok(rows.len())
    }

    #[cfg(test)]
    pub fn observation(&self, key: &ObservationKey) -> Result<Option<Observation>, Error> {
        Ok(find_observation(&self.conn, self.tz, key)?)
    }

    pub fn observations_since(&self, first_day: NaiveDate) -> Result<Vec<Observation>, Error> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {} FROM observations
             WHERE service_date >= ?1
             ORDER BY service_date DESC, route_label, planned_departure",
            OBSERVATION_COLUMNS
        ))?;
        let tz = self.tz;
        let rows = statement.query_map(params![first_day.format(DATE_FORMAT).to_string()], |row| {
            read_observation(row, tz)
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Car samples are plain measurements, so a conflict just replaces the row.
    pub fn upsert_car_many(&mut self, rows: &[CarObservation]) -> Result<usize, Error> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT INTO car_observations (
                    observation_ts, service_date, route_label, from_name, to_name,
                    target_departure_time, duration_minutes, distance_km
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(service_date, route_label) DO UPDATE SET
                    observation_ts=excluded.observation_ts,
                    from_name=excluded.from_name,
                    to_name=excluded.to_name,
                    target_departure_time=excluded.target_departure_time,
                    duration_minutes=excluded.duration_minutes,
                    distance_km=excluded.distance_km",
                params![
                    row.observation_ts.to_rfc3339(),
                    row.service_date.format(DATE_FORMAT).to_string(),
                    row.route_label,
                    row.from_name,
                    row.to_name,
                    row.target_departure_time,
                    row.duration_minutes,
                    row.distance_km,
                ],
            )?;
        }
        tx.commit()?;

        Ok(rows.len())
    }

    pub fn car_observations_since(&self, first_day: NaiveDate) -> Result<Vec<CarObservation>, Error> {
        let mut statement = self.conn.prepare(
            "SELECT observation_ts, service_date, route_label, from_name, to_name,
                    target_departure_time, duration_minutes, distance_km
             FROM car_observations
             WHERE service_date >= ?1
             ORDER BY service_date DESC, route_label",
        )?;
        let tz = self.tz;
        let rows = statement.query_map(params![first_day.format(DATE_FORMAT).to_string()], |row| {
            Ok(CarObservation {
                observation_ts: timestamp_column(row, 0, tz)?,
                service_date: date_column(row, 1)?,
                route_label: row.get(2)?,
                from_name: row.get(3)?,
                to_name: row.get(4)?,
                target_departure_time: row.get(5)?,
                duration_minutes: row.get(6)?,
                distance_km: row.get(7)?,
            })
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn find_observation(
    conn: &Connection,
    tz: Tz,
    key: &ObservationKey,
) -> Result<Option<Observation>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {} FROM observations
             WHERE service_date = ?1 AND train_id = ?2 AND route_label = ?3",
            OBSERVATION_COLUMNS
        ),
        params![
            key.service_date.format(DATE_FORMAT).to_string(),
            key.train_id,
            key.route_label,
        ],
        |row| read_observation(row, tz),
    )
    .optional()
}

fn write_observation(tx: &Transaction, row: &Observation) -> Result<(), rusqlite::Error> {
    tx.execute(
        &format!(
            "INSERT INTO observations ({}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
            )
            ON CONFLICT(service_date, train_id, route_label) DO UPDATE SET
                observation_ts=excluded.observation_ts,
                train_name=excluded.train_name,
                line=excluded.line,
                source_station=excluded.source_station,
                target_station=excluded.target_station,
                planned_departure=excluded.planned_departure,
                actual_departure=excluded.actual_departure,
                planned_arrival=excluded.planned_arrival,
                actual_arrival=excluded.actual_arrival,
                delay_minutes=excluded.delay_minutes,
                schedule_deviation_minutes=excluded.schedule_deviation_minutes,
                arrival_delay_minutes=excluded.arrival_delay_minutes,
                arrival_schedule_deviation_minutes=excluded.arrival_schedule_deviation_minutes,
                arrival_observed=excluded.arrival_observed,
                arrival_info_missing=excluded.arrival_info_missing,
                departure_reason=excluded.departure_reason,
                arrival_reason=excluded.arrival_reason,
                canceled_departure=excluded.canceled_departure,
                canceled_arrival=excluded.canceled_arrival,
                canceled=excluded.canceled",
            OBSERVATION_COLUMNS
        ),
        params![
            row.observation_ts.to_rfc3339(),
            row.service_date.format(DATE_FORMAT).to_string(),
            row.train_id,
            row.train_name,
            row.line,
            row.route_label,
            row.source_station,
            row.target_station,
            format_datetime(row.planned_departure),
            row.actual_departure.map(format_datetime),
            row.planned_arrival.map(format_datetime),
            row.actual_arrival.map(format_datetime),
            row.delay_minutes,
            row.schedule_deviation_minutes,
            row.arrival_delay_minutes,
            row.arrival_schedule_deviation_minutes,
            row.arrival_observed,
            row.arrival_info_missing,
            row.departure_reason,
            row.arrival_reason,
            row.canceled_departure,
            row.canceled_arrival,
            row.canceled,
        ],
    )?;
    Ok(())
}

fn format_datetime(value: NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

fn conversion_error(index: usize, error: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn date_column(row: &Row, index: usize) -> Result<NaiveDate, rusqlite::Error> {
    let raw: String = row.get(index)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(index, e))
}

fn datetime_column(row: &Row, index: usize) -> Result<Option<NaiveDateTime>, rusqlite::Error> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|x| NaiveDateTime::parse_from_str(&x, DATETIME_FORMAT))
        .transpose()
        .map_err(|e| conversion_error(index, e))
}

fn timestamp_column(row: &Row, index: usize, tz: Tz) -> Result<DateTime<Tz>, rusqlite::Error> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|x| x.with_timezone(&tz))
        .map_err(|e| conversion_error(index, e))
}

fn read_observation(row: &Row, tz: Tz) -> Result<Observation, rusqlite::Error> {
    let planned_departure = datetime_column(row, 8)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(8, "planned_departure".to_string(), Type::Null))?;

    Ok(Observation {
        observation_ts: timestamp_column(row, 0, tz)?,
        service_date: date_column(row, 1)?,
        train_id: row.get(2)?,
        train_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        line: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        route_label: row.get(5)?,
        source_station: row.get(6)?,
        target_station: row.get(7)?,
        planned_departure,
        actual_departure: datetime_column(row, 9)?,
        planned_arrival: datetime_column(row, 10)?,
        actual_arrival: datetime_column(row, 11)?,
        delay_minutes: row.get(12)?,
        schedule_deviation_minutes: row.get(13)?,
        arrival_delay_minutes: row.get(14)?,
        arrival_schedule_deviation_minutes: row.get(15)?,
        arrival_observed: row.get(16)?,
        arrival_info_missing: row.get(17)?,
        departure_reason: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
        arrival_reason: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
        canceled_departure: row.get(20)?,
        canceled_arrival: row.get(21)?,
        canceled: row.get(22)?,
    })
}
