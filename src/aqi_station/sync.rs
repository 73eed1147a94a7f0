// aqi_station - Air quality station sync and dashboard
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Periodic refresh of the local sensor, the display, and every station record.
//!
//! Each cycle runs the same phases in order and never interleaves them:
//!
//! 1. Show "Updating..." on the display, read the local sensor, show the reading.
//! 2. Fetch every configured station, one after the other. The first failure abandons
//!    the cycle before anything is written.
//! 3. Reconcile the fetched records into the store as a single batch.
//! 4. Sleep for the refresh interval, then check whether we've been asked to stop.
//!
//! The scheduler is the only writer to the store so no locking happens here. Readers
//! may see a batch partially applied, which is fine: every station record is
//! independent of the others.

use crate::client::{ClientError, StationSource};
use crate::display::TextDisplay;
use crate::metrics::{CycleResult, SyncMetrics};
use crate::record::{Station, StationRecord, STATIONS};
use crate::sensor::{SensorError, SensorReader};
use crate::store::{RecordStore, StoreError, StoredRecord, WriteOp};
use std::collections::HashMap;
use std::error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STATUS_PAUSE: Duration = Duration::from_secs(2);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const UPDATING_TEXT: &str = "Updating...";

#[derive(Debug)]
pub enum SyncError {
    Sensor(SensorError),
    Source(ClientError),
    Store(StoreError),
    Task(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {}", e),
            Self::Source(e) => write!(f, "station source: {}", e),
            Self::Store(e) => write!(f, "record store: {}", e),
            Self::Task(msg) => write!(f, "background task: {}", msg),
        }
    }
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Sensor(e) => Some(e),
            Self::Source(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Task(_) => None,
        }
    }
}

/// Work out the writes needed to bring the store in line with `fetched`.
///
/// `existing` is the full current contents of the store. Records whose station id is
/// already stored replace that document (keeping its key), all others are inserted.
pub fn plan_batch(existing: &[StoredRecord], fetched: &[StationRecord]) -> Vec<WriteOp> {
    let keys: HashMap<&str, _> = existing.iter().map(|s| (s.record.id.as_str(), &s.key)).collect();

    fetched
        .iter()
        .map(|record| match keys.get(record.id.as_str()) {
            Some(key) => WriteOp::Replace {
                key: (*key).clone(),
                record: record.clone(),
            },
            None => WriteOp::Insert(record.clone()),
        })
        .collect()
}

/// Upsert each fetched record by station id as a single batch.
pub async fn reconcile<S>(store: &S, fetched: &[StationRecord]) -> Result<(), StoreError>
where
    S: RecordStore,
{
    let existing = store.scan_all().await?;
    let ops = plan_batch(&existing, fetched);
    tracing::debug!(message = "applying record batch", operations = ops.len(), existing = existing.len());
    store.write_batch(ops).await
}

/// Insert `record`, or replace the stored record with the same station id.
pub async fn upsert_by_id<S>(store: &S, record: StationRecord) -> Result<(), StoreError>
where
    S: RecordStore,
{
    reconcile(store, &[record]).await
}

/// Result of asking a running scheduler to stop.
#[derive(Debug)]
pub enum Shutdown {
    /// Stopped at its next checkpoint within the timeout.
    Stopped,
    /// Had already stopped because of an error.
    Failed(SyncError),
    /// Did not stop in time and was aborted.
    TimedOut,
}

/// Handle to a scheduler running in a background task.
#[derive(Debug)]
pub struct SchedulerHandle {
    token: CancellationToken,
    task: JoinHandle<Result<(), SyncError>>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop and wait up to `timeout` for it.
    ///
    /// The stop request is only noticed after the scheduler finishes sleeping, so this
    /// may take up to one refresh interval. When the timeout is shorter than that the
    /// task is aborted and shutdown carries on anyway.
    pub async fn shutdown(mut self, timeout: Duration) -> Shutdown {
        self.token.cancel();

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(Ok(()))) => Shutdown::Stopped,
            Ok(Ok(Err(e))) => Shutdown::Failed(e),
            Ok(Err(e)) => Shutdown::Failed(SyncError::Task(e.to_string())),
            Err(_) => {
                self.task.abort();
                Shutdown::TimedOut
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Runs sync cycles until cancelled.
pub struct Scheduler<S, C, R, D> {
    store: Arc<S>,
    source: C,
    sensor: Arc<R>,
    display: Arc<D>,
    metrics: SyncMetrics,
    stations: Vec<Station>,
    interval: Duration,
    status_pause: Duration,
}

impl<S, C, R, D> Scheduler<S, C, R, D>
where
    S: RecordStore + 'static,
    C: StationSource + 'static,
    R: SensorReader + 'static,
    D: TextDisplay + 'static,
{
    pub fn new(store: Arc<S>, source: C, sensor: Arc<R>, display: Arc<D>, metrics: SyncMetrics) -> Self {
        Scheduler {
            store,
            source,
            sensor,
            display,
            metrics,
            stations: STATIONS.to_vec(),
            interval: DEFAULT_INTERVAL,
            status_pause: DEFAULT_STATUS_PAUSE,
        }
    }

    pub fn with_stations(mut self, stations: Vec<Station>) -> Self {
        self.stations = stations;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// How long "Updating..." stays on the display before the sensor is read.
    pub fn with_status_pause(mut self, pause: Duration) -> Self {
        self.status_pause = pause;
        self
    }

    /// Start running cycles in a background task.
    pub fn spawn(self, token: CancellationToken) -> SchedulerHandle {
        let task = tokio::spawn(self.run(token.clone()));
        SchedulerHandle { token, task }
    }

    /// Run cycles until `token` is cancelled or the sensor fails.
    ///
    /// Source and store failures only abandon the current cycle, the next one is tried
    /// after the usual interval. A sensor failure ends the loop and is returned.
    pub async fn run(self, token: CancellationToken) -> Result<(), SyncError> {
        tracing::info!(
            message = "station sync started",
            stations = self.stations.len(),
            interval_secs = self.interval.as_secs_f64(),
        );

        loop {
            match self.run_cycle().instrument(tracing::span!(Level::DEBUG, "sync_cycle")).await {
                Ok(updated) => {
                    self.metrics.cycle(CycleResult::Success);
                    tracing::info!(message = "updated station records", stations = updated);
                }
                Err(e @ SyncError::Source(_)) => {
                    self.metrics.cycle(CycleResult::SourceFailure);
                    tracing::error!(message = "failed to fetch stations, skipping cycle", error = %e);
                }
                Err(e @ SyncError::Store(_)) => {
                    self.metrics.cycle(CycleResult::StoreFailure);
                    tracing::error!(message = "failed to write station records, skipping cycle", error = %e);
                }
                Err(e @ SyncError::Sensor(_)) => {
                    self.metrics.cycle(CycleResult::SensorFailure);
                    tracing::error!(message = "failed to read local sensor, stopping sync", error = %e);
                    return Err(e);
                }
                Err(e @ SyncError::Task(_)) => {
                    self.metrics.cycle(CycleResult::TaskFailure);
                    tracing::error!(message = "sensor or display task failed, stopping sync", error = %e);
                    return Err(e);
                }
            }

            tokio::time::sleep(self.interval).await;
            if token.is_cancelled() {
                tracing::info!("station sync stopped");
                return Ok(());
            }
        }
    }

    /// Run a single cycle, returning the number of station records written.
    pub async fn run_cycle(&self) -> Result<usize, SyncError> {
        self.update_sensor().await?;
        let records = self.fetch_all().await?;

        reconcile(self.store.as_ref(), &records).await.map_err(SyncError::Store)?;
        self.metrics.stations(&records);
        Ok(records.len())
    }

    async fn update_sensor(&self) -> Result<(), SyncError> {
        self.show(UPDATING_TEXT.to_owned()).await?;
        tokio::time::sleep(self.status_pause).await;

        let sensor = Arc::clone(&self.sensor);
        let reading = tokio::task::spawn_blocking(move || sensor.read())
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
            .map_err(SyncError::Sensor)?;

        tracing::debug!(message = "read local sensor", humidity = reading.humidity, temperature = reading.temperature);
        self.metrics.sensor(&reading);
        self.show(reading.display_text()).await
    }

    async fn show(&self, text: String) -> Result<(), SyncError> {
        let display = Arc::clone(&self.display);
        tokio::task::spawn_blocking(move || display.set_text(&text))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))
    }

    async fn fetch_all(&self) -> Result<Vec<StationRecord>, SyncError> {
        let mut records = Vec::with_capacity(self.stations.len());
        for station in &self.stations {
            let record = self.source.fetch(station).await.map_err(SyncError::Source)?;
            tracing::debug!(message = "fetched station", station = %station.id);
            records.push(record);
        }

        Ok(records)
    }
}
