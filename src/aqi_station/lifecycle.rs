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

//! One-shot setup and teardown run by the `launch` and `close` modes.

use crate::client::StationSource;
use crate::display::TextDisplay;
use crate::record::Station;
use crate::store::RecordStore;
use crate::sync::SyncError;
use std::sync::Arc;
use std::time::Duration;

pub const WELCOME_TEXT: &str = "Welcome...";
pub const GOODBYE_TEXT: &str = "Goodbye...";
pub const DEFAULT_CLOSE_PAUSE: Duration = Duration::from_secs(2);
pub const WELCOME_BACKLIGHT: (u8, u8, u8) = (0, 128, 64);

/// Scrape every station once, insert the results, and greet on the display.
///
/// Records are inserted without checking for existing ones so this is meant to run
/// against an empty store. Nothing is written if any station fails to fetch.
pub async fn launch<S, C, D>(store: &S, source: &C, stations: &[Station], display: Arc<D>) -> Result<usize, SyncError>
where
    S: RecordStore,
    C: StationSource,
    D: TextDisplay + 'static,
{
    let mut records = Vec::with_capacity(stations.len());
    for station in stations {
        records.push(source.fetch(station).await.map_err(SyncError::Source)?);
    }

    let count = records.len();
    store.insert_many(records).await.map_err(SyncError::Store)?;
    tracing::info!(message = "inserted initial station records", stations = count);

    blocking(display, |d| {
        let (r, g, b) = WELCOME_BACKLIGHT;
        d.set_backlight(r, g, b);
        d.set_text(WELCOME_TEXT);
    })
    .await?;
    Ok(count)
}

/// Say goodbye on the display, clear it, then drop every stored record.
pub async fn close<S, D>(store: &S, display: Arc<D>, pause: Duration) -> Result<(), SyncError>
where
    S: RecordStore,
    D: TextDisplay + 'static,
{
    blocking(Arc::clone(&display), |d| d.set_text(GOODBYE_TEXT)).await?;
    tokio::time::sleep(pause).await;
    blocking(display, |d| d.clear()).await?;

    store.drop_all().await.map_err(SyncError::Store)?;
    tracing::info!("dropped station records");
    Ok(())
}

async fn blocking<D, F>(display: Arc<D>, f: F) -> Result<(), SyncError>
where
    D: TextDisplay + 'static,
    F: FnOnce(&D) + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&display))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))
}
