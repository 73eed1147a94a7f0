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

//! Air quality station scraper, LCD status display, and web dashboard
//!
//! ## Features
//!
//! `aqi_station` scrapes air quality and weather measurements for a fixed set of stations
//! in Bilbao from [aqicn.org], keeps the latest values for each station in MongoDB, and
//! shows them on a web dashboard. On a Raspberry Pi it also reads a local DHT11 sensor and
//! shows the temperature and humidity on a 16x2 I2C character LCD.
//!
//! The following values are kept for each station when available: air quality index,
//! PM2.5, PM10, NO2, SO2, temperature, atmospheric pressure, humidity, and wind. Each has
//! a current value and, except for the air quality index, the min and max seen by the
//! station recently.
//!
//! [aqicn.org]: https://aqicn.org/
//!
//! ## Build
//!
//! `aqi_station` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//! Support for the LCD and the DHT11 sensor is behind the `hardware` feature. Without it,
//! display output is only logged and the sensor always reports the same values.
//!
//! ```text
//! git clone git@github.com:56quarters/aqi_station.git && cd aqi_station
//! cargo build --release --features hardware
//! ```
//!
//! ## Usage
//!
//! `aqi_station` takes a single mode argument. MongoDB is expected on port `27017` of the
//! host given by the `MONGO_HOST` environment variable.
//!
//! ### Launch
//!
//! Scrape every station once and insert the results into an empty database.
//!
//! ```text
//! MONGO_HOST=localhost ./aqi_station launch
//! ```
//!
//! ### Stream
//!
//! Refresh the sensor, the display, and every station once a minute and serve the dashboard
//! on port `5000` until stopped with `SIGINT` or `SIGTERM`.
//!
//! ```text
//! MONGO_HOST=localhost ./aqi_station stream
//! ```
//!
//! Prometheus metrics about the refresh loop and the last values scraped are available
//! at `/metrics` on the same port.
//!
//! ### Close
//!
//! Clear the display and drop the database.
//!
//! ```text
//! MONGO_HOST=localhost ./aqi_station close
//! ```
//!

pub mod client;
pub mod dashboard;
pub mod display;
pub mod http;
pub mod lifecycle;
pub mod metrics;
pub mod mongo;
pub mod record;
pub mod sensor;
pub mod store;
pub mod sync;
