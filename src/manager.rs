use crate::car_collector::{collect_car_observations, OrsSampler};
use crate::collector::TrainCollector;
use crate::config::Config;
use crate::db_fetcher::DbFetcher;
use crate::error::Error;
use crate::store::ObservationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::task::block_in_place;
use tokio::time;
use tokio::time::Duration;
use tracing::info;

#[async_trait]
pub trait Manager {
    async fn run(&mut self) -> Result<(), Error>;
}

/// Runs collection either once or on a fixed interval, storing each run as one batch.
pub struct CollectionManager {
    config: Config,
    tz: Tz,
    store: ObservationStore,
    fetcher: DbFetcher,
    car_sampler: Option<OrsSampler>,
}

impl CollectionManager {
    pub fn new(config: Config) -> Result<Self, Error> {
        let tz = config.tz()?;
        let store = ObservationStore::open(&config.database_path, tz)?;
        let fetcher = DbFetcher::new(config.fetcher.clone());
        let car_sampler = config
            .car
            .clone()
            .filter(|x| !x.api_key.trim().is_empty())
            .map(OrsSampler::new);

        Ok(Self {
            config,
            tz,
            store,
            fetcher,
            car_sampler,
        })
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    async fn collect_once(&mut self) -> Result<(), Error> {
        let now = self.now();
        info!("Starting collection run at {}", now);

        let rows = TrainCollector::new(&self.fetcher, self.config.matching.clone())
            .collect(&self.config.routes, now)
            .await;
        let stored = block_in_place(|| self.store.upsert_many(&rows))?;
        info!(
            "Stored {} train observations in {}",
            stored, self.config.database_path
        );

        if let (Some(sampler), Some(car)) = (&self.car_sampler, &self.config.car) {
            let car_rows = collect_car_observations(sampler, &car.routes, now).await;
            let stored = block_in_place(|| self.store.upsert_car_many(&car_rows))?;
            info!(
                "Stored {} car observations in {}",
                stored, self.config.database_path
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Manager for CollectionManager {
    async fn run(&mut self) -> Result<(), Error> {
        let Some(minutes) = self.config.collector.interval_minutes else {
            return self.collect_once().await;
        };

        let mut interval = time::interval(Duration::from_secs(minutes.max(1) * 60));
        loop {
            interval.tick().await;
            self.collect_once().await?;
        }
    }
}
