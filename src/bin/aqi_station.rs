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

use aqi_station::client::{AqicnClient, DEFAULT_SOURCE_URL};
use aqi_station::display::{BusError, Lcd};
use aqi_station::http::{self, RequestContext};
use aqi_station::lifecycle::{self, DEFAULT_CLOSE_PAUSE};
use aqi_station::metrics::SyncMetrics;
use aqi_station::mongo::{MongoStore, DEFAULT_PORT};
use aqi_station::record::STATIONS;
use aqi_station::sensor::SensorError;
use aqi_station::store::{MemoryStore, RecordStore};
use aqi_station::sync::{Scheduler, Shutdown, DEFAULT_JOIN_TIMEOUT};
use clap::{Parser, ValueEnum};
use prometheus_client::registry::Registry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[cfg(feature = "hardware")]
use aqi_station::display::{RppalBus, DEFAULT_I2C_BUS};
#[cfg(feature = "hardware")]
use aqi_station::sensor::{Dht11, DEFAULT_SENSOR_PIN};

#[cfg(not(feature = "hardware"))]
use aqi_station::display::LoggingBus;
#[cfg(not(feature = "hardware"))]
use aqi_station::sensor::FixedSensor;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 5000);
const DEFAULT_REFERSH_SECS: u64 = 60;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_MONGO_HOST: &str = "localhost";

#[cfg(not(feature = "hardware"))]
const FIXED_HUMIDITY: f32 = 50.0;
#[cfg(not(feature = "hardware"))]
const FIXED_TEMPERATURE: f32 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Scrape every station once and insert the results
    Launch,
    /// Keep the display and stations up to date and serve the dashboard
    Stream,
    /// Clear the display and drop every stored station
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// MongoDB on MONGO_HOST
    Mongo,
    /// In-process store that is lost on exit
    Memory,
}

#[derive(Debug, Parser)]
#[clap(name = "aqi_station", version = clap::crate_version!())]
struct AqiStationApplication {
    /// What to do: 'launch', 'stream', or 'close'
    #[clap(value_enum)]
    mode: Mode,

    /// Host running MongoDB, port 27017 is always used
    #[clap(long, env = "MONGO_HOST", default_value_t = DEFAULT_MONGO_HOST.into())]
    mongo_host: String,

    /// Where station records are kept
    #[clap(long, value_enum, default_value_t = StoreKind::Mongo)]
    store: StoreKind,

    /// Base URL for station pages, each station is at '$URL/$STATION/es/'
    #[clap(long, default_value_t = DEFAULT_SOURCE_URL.into())]
    source_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Refresh the sensor, display, and stations at this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_REFERSH_SECS)]
    refresh_secs: u64,

    /// Timeout for fetching station pages and for selecting a MongoDB server, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Address to bind the dashboard to. By default, aqi_station will bind to public address
    /// since the dashboard is meant to be viewed from other machines.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Usage problems exit with 1 rather than clap's usual 2, help and version still exit 0
    let opts = AqiStationApplication::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        process::exit(code)
    });

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    match opts.store {
        StoreKind::Mongo => {
            let store = MongoStore::new(&opts.mongo_host, DEFAULT_PORT, timeout).unwrap_or_else(|e| {
                tracing::error!(message = "unable to initialize MongoDB client", host = %opts.mongo_host, error = %e);
                process::exit(1)
            });

            run(opts, Arc::new(store)).await
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory store, station records are lost on exit");
            run(opts, Arc::new(MemoryStore::new())).await
        }
    }
}

async fn run<S>(opts: AqiStationApplication, store: Arc<S>) -> Result<(), Box<dyn Error + Send + Sync>>
where
    S: RecordStore + 'static,
{
    let display = Arc::new(new_display().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize display", error = %e);
        process::exit(1)
    }));

    match opts.mode {
        Mode::Launch => {
            let client = new_source(&opts);
            match lifecycle::launch(store.as_ref(), &client, &STATIONS, display).await {
                Ok(count) => tracing::info!(message = "launch complete", stations = count),
                Err(e) => {
                    tracing::error!(message = "launch failed", error = %e);
                    process::exit(1)
                }
            }
        }
        Mode::Close => match lifecycle::close(store.as_ref(), display, DEFAULT_CLOSE_PAUSE).await {
            Ok(_) => tracing::info!("close complete"),
            Err(e) => {
                tracing::error!(message = "close failed", error = %e);
                process::exit(1)
            }
        },
        Mode::Stream => {
            let sensor = Arc::new(new_sensor().unwrap_or_else(|e| {
                tracing::error!(message = "unable to initialize sensor", error = %e);
                process::exit(1)
            }));

            let client = new_source(&opts);
            let mut registry = Registry::default();
            let metrics = SyncMetrics::new(&mut registry);

            let handle = Scheduler::new(Arc::clone(&store), client, sensor, display, metrics)
                .with_interval(Duration::from_secs(opts.refresh_secs))
                .spawn(CancellationToken::new());

            let context = Arc::new(RequestContext::new(store, STATIONS.to_vec(), registry));
            let server = axum::Server::try_bind(&opts.bind)
                .unwrap_or_else(|e| {
                    tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
                    process::exit(1)
                })
                .serve(http::router(context).into_make_service());

            tracing::info!(message = "server started", address = %server.local_addr());
            server
                .with_graceful_shutdown(async {
                    // Wait for either SIGTERM or SIGINT to shutdown
                    tokio::select! {
                        _ = sigterm() => {}
                        _ = sigint() => {}
                    }
                })
                .await?;

            tracing::info!("server shutdown");
            match handle.shutdown(DEFAULT_JOIN_TIMEOUT).await {
                Shutdown::Stopped => tracing::info!("station sync shutdown"),
                Shutdown::Failed(e) => tracing::warn!(message = "station sync had already stopped", error = %e),
                Shutdown::TimedOut => tracing::warn!(
                    message = "station sync did not stop in time, aborted",
                    timeout_secs = DEFAULT_JOIN_TIMEOUT.as_secs(),
                ),
            }
        }
    }

    Ok(())
}

fn new_source(opts: &AqiStationApplication) -> AqicnClient {
    let http_client = Client::builder()
        .timeout(Duration::from_millis(opts.timeout_millis))
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to initialize HTTP client", error = %e);
            process::exit(1)
        });

    AqicnClient::new(http_client, &opts.source_url).unwrap_or_else(|e| {
        tracing::error!(message = "invalid station source", error = %e);
        process::exit(1)
    })
}

#[cfg(feature = "hardware")]
fn new_display() -> Result<Lcd<RppalBus>, BusError> {
    Ok(Lcd::new(RppalBus::new(DEFAULT_I2C_BUS)?))
}

#[cfg(not(feature = "hardware"))]
fn new_display() -> Result<Lcd<LoggingBus>, BusError> {
    Ok(Lcd::new(LoggingBus))
}

#[cfg(feature = "hardware")]
fn new_sensor() -> Result<Dht11, SensorError> {
    Dht11::new(DEFAULT_SENSOR_PIN)
}

#[cfg(not(feature = "hardware"))]
fn new_sensor() -> Result<FixedSensor, SensorError> {
    Ok(FixedSensor::new(FIXED_HUMIDITY, FIXED_TEMPERATURE))
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
