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

use crate::record::{Metric, StationRecord};
use crate::sensor::SensorReading;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum CycleResult {
    Success,
    SourceFailure,
    StoreFailure,
    SensorFailure,
    TaskFailure,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CycleLabels {
    result: CycleResult,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, EncodeLabelValue)]
enum ValueKind {
    Current,
    Min,
    Max,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StationLabels {
    station: String,
    metric: String,
    kind: ValueKind,
}

/// Holder for metrics about the sync loop and the values it last wrote.
///
/// All metrics are created and registered upon call to `SyncMetrics::new()` and share
/// the prefix "aqi_". Cloning is cheap and clones update the same underlying metrics.
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    cycles: Family<CycleLabels, Counter>,
    station_values: Family<StationLabels, Gauge<f64, AtomicU64>>,
    sensor_temperature: Gauge<f64, AtomicU64>,
    sensor_humidity: Gauge<f64, AtomicU64>,
}

impl SyncMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let cycles = Family::<CycleLabels, Counter>::default();
        let station_values = Family::<StationLabels, Gauge<f64, AtomicU64>>::default();
        let sensor_temperature = Gauge::<f64, AtomicU64>::default();
        let sensor_humidity = Gauge::<f64, AtomicU64>::default();

        reg.register("aqi_sync_cycles", "Sync cycles run, by result", cycles.clone());
        reg.register(
            "aqi_station_value",
            "Last value scraped for a station measurement",
            station_values.clone(),
        );
        reg.register(
            "aqi_sensor_temperature_degrees",
            "Local sensor temperature in celsius",
            sensor_temperature.clone(),
        );
        reg.register(
            "aqi_sensor_humidity_percent",
            "Local sensor relative humidity (0-100)",
            sensor_humidity.clone(),
        );

        Self {
            cycles,
            station_values,
            sensor_temperature,
            sensor_humidity,
        }
    }

    pub fn cycle(&self, result: CycleResult) {
        self.cycles.get_or_create(&CycleLabels { result }).inc();
    }

    pub fn sensor(&self, reading: &SensorReading) {
        self.sensor_temperature.set(reading.temperature as f64);
        self.sensor_humidity.set(reading.humidity as f64);
    }

    /// Set gauges from the provided records if the relevant value parses as a number.
    ///
    /// Values that are missing or not numeric leave the gauge untouched.
    pub fn stations(&self, records: &[StationRecord]) {
        for record in records {
            self.set_from_metric(&record.id, "air_quality", &record.air_quality);
            for (kind, metric) in record.ranged_metrics() {
                self.set_from_metric(&record.id, kind.key(), metric);
            }
        }
    }

    fn set_from_metric(&self, station: &str, name: &str, metric: &Metric) {
        let values = [
            (ValueKind::Current, &metric.current),
            (ValueKind::Min, &metric.min),
            (ValueKind::Max, &metric.max),
        ];

        for (kind, value) in values {
            if let Some(v) = value.as_deref().and_then(|s| s.trim().parse::<f64>().ok()) {
                self.station_values
                    .get_or_create(&StationLabels {
                        station: station.to_owned(),
                        metric: name.to_owned(),
                        kind,
                    })
                    .set(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleResult, SyncMetrics};
    use crate::record::{Metric, StationRecord};
    use prometheus_client::encoding::text::encode;
    use prometheus_client::registry::Registry;

    fn encoded(reg: &Registry) -> String {
        let mut buf = String::new();
        encode(&mut buf, reg).unwrap();
        buf
    }

    #[test]
    fn test_cycle_counter() {
        let mut reg = Registry::default();
        let metrics = SyncMetrics::new(&mut reg);
        metrics.cycle(CycleResult::Success);
        metrics.cycle(CycleResult::Success);
        metrics.cycle(CycleResult::SourceFailure);

        let text = encoded(&reg);
        assert!(text.contains("aqi_sync_cycles_total{result=\"Success\"} 2"));
        assert!(text.contains("aqi_sync_cycles_total{result=\"SourceFailure\"} 1"));
    }

    #[test]
    fn test_station_values_skip_non_numeric() {
        let mut reg = Registry::default();
        let metrics = SyncMetrics::new(&mut reg);

        let mut record = StationRecord::empty("europa", "Europa");
        record.pm2_5 = Metric::new("10", "5", "-");
        metrics.stations(&[record]);

        let text = encoded(&reg);
        assert!(text.contains("aqi_station_value{station=\"europa\",metric=\"pm2_5\",kind=\"Current\"} 10"));
        assert!(text.contains("aqi_station_value{station=\"europa\",metric=\"pm2_5\",kind=\"Min\"} 5"));
        assert!(!text.contains("kind=\"Max\""));
    }
}
