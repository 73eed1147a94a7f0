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

use serde::{Deserialize, Serialize};

/// A monitoring station we scrape, identified by the slug used in its page URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Station {
    pub id: &'static str,
    pub name: &'static str,
}

impl Station {
    pub const fn new(id: &'static str, name: &'static str) -> Self {
        Station { id, name }
    }
}

/// Stations shown on the dashboard and refreshed each cycle.
pub const STATIONS: [Station; 3] = [
    Station::new("mazarredo", "Mazarredo"),
    Station::new("m--diaz-haro", "Mª Díaz de Haro"),
    Station::new("europa", "Europa"),
];

/// Current, minimum, and maximum value of a single measurement.
///
/// Values are kept as the text shown on the source page (e.g. `"12"` or `"1013"`) and
/// only parsed into numbers when rendering.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Metric {
    pub current: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
}

impl Metric {
    pub fn new<S: Into<String>>(current: S, min: S, max: S) -> Self {
        Metric {
            current: Some(current.into()),
            min: Some(min.into()),
            max: Some(max.into()),
        }
    }

    pub fn current_only<S: Into<String>>(current: S) -> Self {
        Metric {
            current: Some(current.into()),
            min: None,
            max: None,
        }
    }
}

/// Latest known measurements for one station.
///
/// Every field is part of the stored document. Replacing a record in the store replaces
/// all of these fields, there is no merging with whatever was stored before.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StationRecord {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "station_name")]
    pub name: String,
    #[serde(rename = "air_quality")]
    pub air_quality: Metric,
    #[serde(rename = "pm2_5")]
    pub pm2_5: Metric,
    #[serde(rename = "pm10")]
    pub pm10: Metric,
    #[serde(rename = "no2")]
    pub no2: Metric,
    #[serde(rename = "so2")]
    pub so2: Metric,
    #[serde(rename = "temperature")]
    pub temperature: Metric,
    #[serde(rename = "atm_pressure")]
    pub atm_pressure: Metric,
    #[serde(rename = "humidity")]
    pub humidity: Metric,
    #[serde(rename = "wind")]
    pub wind: Metric,
}

impl StationRecord {
    /// Create a record for a station with no measurements set yet.
    pub fn empty<S: Into<String>>(id: S, name: S) -> Self {
        StationRecord {
            id: id.into(),
            name: name.into(),
            air_quality: Metric::default(),
            pm2_5: Metric::default(),
            pm10: Metric::default(),
            no2: Metric::default(),
            so2: Metric::default(),
            temperature: Metric::default(),
            atm_pressure: Metric::default(),
            humidity: Metric::default(),
            wind: Metric::default(),
        }
    }

    /// Measurements that have a current, min, and max value along with their display label.
    pub fn ranged_metrics(&self) -> [(MetricKind, &Metric); 8] {
        [
            (MetricKind::Pm25, &self.pm2_5),
            (MetricKind::Pm10, &self.pm10),
            (MetricKind::No2, &self.no2),
            (MetricKind::So2, &self.so2),
            (MetricKind::Temperature, &self.temperature),
            (MetricKind::AtmPressure, &self.atm_pressure),
            (MetricKind::Humidity, &self.humidity),
            (MetricKind::Wind, &self.wind),
        ]
    }

    pub fn metric(&self, kind: MetricKind) -> &Metric {
        match kind {
            MetricKind::AirQuality => &self.air_quality,
            MetricKind::Pm25 => &self.pm2_5,
            MetricKind::Pm10 => &self.pm10,
            MetricKind::No2 => &self.no2,
            MetricKind::So2 => &self.so2,
            MetricKind::Temperature => &self.temperature,
            MetricKind::AtmPressure => &self.atm_pressure,
            MetricKind::Humidity => &self.humidity,
            MetricKind::Wind => &self.wind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    AirQuality,
    Pm25,
    Pm10,
    No2,
    So2,
    Temperature,
    AtmPressure,
    Humidity,
    Wind,
}

impl MetricKind {
    /// Name of the field in stored documents, also used as a metric label.
    pub fn key(&self) -> &'static str {
        match self {
            Self::AirQuality => "air_quality",
            Self::Pm25 => "pm2_5",
            Self::Pm10 => "pm10",
            Self::No2 => "no2",
            Self::So2 => "so2",
            Self::Temperature => "temperature",
            Self::AtmPressure => "atm_pressure",
            Self::Humidity => "humidity",
            Self::Wind => "wind",
        }
    }

    /// Human readable name for charts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AirQuality => "Air Quality",
            Self::Pm25 => "PM2.5",
            Self::Pm10 => "PM10",
            Self::No2 => "NO2",
            Self::So2 => "SO2",
            Self::Temperature => "Temperature",
            Self::AtmPressure => "Atm. Pressure",
            Self::Humidity => "Humidity",
            Self::Wind => "Wind",
        }
    }
}
