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

use crate::record::{MetricKind, Station, StationRecord};
use crate::store::{RecordStore, StoreError};
use serde::Serialize;
use std::fmt::Write;

/// Measurements that get a gauge, in display order.
pub const GAUGE_METRICS: [MetricKind; 6] = [
    MetricKind::Pm25,
    MetricKind::Pm10,
    MetricKind::No2,
    MetricKind::Temperature,
    MetricKind::Humidity,
    MetricKind::AtmPressure,
];

const PLOTLY_URL: &str = "https://cdn.plot.ly/plotly-2.27.0.min.js";

/// Current, min, and max of one measurement in the breakdown chart.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Bar {
    pub label: &'static str,
    pub current: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Gauge for one measurement, scaled to that measurement's own min and max.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Gauge {
    pub title: &'static str,
    pub value: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StationCharts {
    pub id: String,
    pub name: String,
    pub breakdown: Vec<Bar>,
    pub gauges: Vec<Gauge>,
}

impl StationCharts {
    pub fn from_record(record: &StationRecord) -> Self {
        let breakdown = record
            .ranged_metrics()
            .iter()
            .map(|(kind, metric)| Bar {
                label: kind.label(),
                current: parse_value(metric.current.as_deref()),
                min: parse_value(metric.min.as_deref()),
                max: parse_value(metric.max.as_deref()),
            })
            .collect();

        let gauges = GAUGE_METRICS
            .iter()
            .map(|kind| {
                let metric = record.metric(*kind);
                Gauge {
                    title: kind.key(),
                    value: parse_value(metric.current.as_deref()),
                    min: parse_value(metric.min.as_deref()),
                    max: parse_value(metric.max.as_deref()),
                }
            })
            .collect();

        StationCharts {
            id: record.id.clone(),
            name: record.name.clone(),
            breakdown,
            gauges,
        }
    }
}

/// Parse a value as shown on a station page, `None` for anything that isn't a number.
fn parse_value(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok()).filter(|v| v.is_finite())
}

/// Build charts for each of `stations` that has a stored record, in the given order.
///
/// Stations without a record are left out rather than treated as an error.
pub async fn read_stations<S>(store: &S, stations: &[Station]) -> Result<Vec<StationCharts>, StoreError>
where
    S: RecordStore,
{
    let mut out = Vec::with_capacity(stations.len());
    for station in stations {
        match store.find(station.id).await? {
            Some(record) => out.push(StationCharts::from_record(&record)),
            None => tracing::debug!(message = "no stored record for station", station = %station.id),
        }
    }

    Ok(out)
}

/// Render the dashboard page.
///
/// Chart data is embedded as JSON and drawn by Plotly in the browser: one bar chart
/// breaking down every measurement and one gauge per entry in [`GAUGE_METRICS`].
pub fn render_page(charts: &[StationCharts]) -> String {
    let mut sections = String::new();
    for (i, station) in charts.iter().enumerate() {
        let _ = write!(
            sections,
            r#"<section class="station"><h2>{name}</h2><div class="breakdown" id="breakdown-{i}"></div><div class="gauges">"#,
            name = html_escape(&station.name),
            i = i,
        );
        for g in 0..station.gauges.len() {
            let _ = write!(sections, r#"<div class="gauge" id="gauge-{}-{}"></div>"#, i, g);
        }
        sections.push_str("</div></section>\n");
    }

    if charts.is_empty() {
        sections.push_str("<p>No station data available yet.</p>\n");
    }

    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Air Quality Dashboard</title>
<script src="{plotly}"></script>
<style>
body {{ font-family: Arial, sans-serif; background: #f4f4fb; color: darkblue; margin: 2rem; }}
.gauges {{ display: grid; grid-template-columns: repeat(3, 1fr); gap: 1rem; }}
.gauge {{ height: 250px; }}
.breakdown {{ height: 400px; }}
</style>
</head>
<body>
<h1>Air Quality Dashboard</h1>
{sections}<script>
const stations = {data};
stations.forEach((station, i) => {{
  const kinds = ["Current", "Min", "Max"];
  const fields = ["current", "min", "max"];
  const bars = kinds.map((kind, k) => ({{
    type: "bar",
    name: kind,
    x: station.breakdown.map(b => b.label),
    y: station.breakdown.map(b => b[fields[k]]),
  }}));
  Plotly.newPlot("breakdown-" + i, bars, {{ title: "Metrics for " + station.name, barmode: "group" }});

  station.gauges.forEach((gauge, g) => {{
    const axis = {{ tickwidth: 1, tickcolor: "darkblue" }};
    if (gauge.min !== null && gauge.max !== null) {{
      axis.range = [gauge.min, gauge.max];
    }}
    Plotly.newPlot("gauge-" + i + "-" + g, [{{
      type: "indicator",
      mode: "gauge+number",
      value: gauge.value,
      title: {{ text: gauge.title, font: {{ size: 24 }} }},
      gauge: {{ bar: {{ color: "darkblue" }}, axis: axis }},
      domain: {{ x: [0, 1], y: [0, 1] }},
    }}], {{ paper_bgcolor: "lavender", font: {{ color: "darkblue", family: "Arial" }} }});
  }});
}});
</script>
</body>
</html>
"#,
        plotly = PLOTLY_URL,
        sections = sections,
        data = script_json(charts),
    )
}

/// Serialize chart data for embedding in a script element.
fn script_json(charts: &[StationCharts]) -> String {
    // Serializing plain structs of strings and numbers can't fail, fall back to no data.
    // A '<' only ever appears inside JSON strings so escaping it keeps markup out.
    serde_json::to_string(charts)
        .unwrap_or_else(|_| "[]".to_owned())
        .replace('<', "\\u003c")
}

/// Escape html special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::{read_stations, render_page, StationCharts, GAUGE_METRICS};
    use crate::record::{Metric, Station, StationRecord};
    use crate::store::{MemoryStore, RecordStore};
    use crate::sync::reconcile;

    fn record(id: &str, name: &str) -> StationRecord {
        let mut r = StationRecord::empty(id, name);
        r.pm2_5 = Metric::new("10", "5", "20");
        r.atm_pressure = Metric::new("1016", "1012", "1019");
        r.wind = Metric::new("n/a", "0.5", "7");
        r
    }

    #[test]
    fn test_charts_from_record() {
        let charts = StationCharts::from_record(&record("a", "A"));

        assert_eq!(8, charts.breakdown.len());
        assert_eq!(GAUGE_METRICS.len(), charts.gauges.len());

        let pm25 = &charts.gauges[0];
        assert_eq!("pm2_5", pm25.title);
        assert_eq!((Some(10.0), Some(5.0), Some(20.0)), (pm25.value, pm25.min, pm25.max));

        let pressure = charts.gauges.iter().find(|g| g.title == "atm_pressure").unwrap();
        assert_eq!((Some(1016.0), Some(1012.0), Some(1019.0)), (pressure.value, pressure.min, pressure.max));
    }

    #[test]
    fn test_charts_non_numeric_values() {
        let charts = StationCharts::from_record(&record("a", "A"));
        let wind = charts.breakdown.iter().find(|b| b.label == "Wind").unwrap();

        assert_eq!(None, wind.current);
        assert_eq!(Some(0.5), wind.min);

        let no2 = charts.breakdown.iter().find(|b| b.label == "NO2").unwrap();
        assert_eq!((None, None, None), (no2.current, no2.min, no2.max));
    }

    #[tokio::test]
    async fn test_read_stations_skips_missing() {
        let store = MemoryStore::new();
        store.insert_many(vec![record("b", "B")]).await.unwrap();

        let stations = [Station::new("a", "A"), Station::new("b", "B")];
        let charts = read_stations(&store, &stations).await.unwrap();

        assert_eq!(1, charts.len());
        assert_eq!("b", charts[0].id);
    }

    #[tokio::test]
    async fn test_read_after_reconcile_sees_new_values() {
        let store = MemoryStore::new();
        reconcile(&store, &[record("a", "A"), record("b", "B")]).await.unwrap();

        let mut fresh = record("a", "A");
        fresh.pm2_5 = Metric::new("33", "5", "40");
        let mut fresh_b = record("b", "B");
        fresh_b.pm2_5 = Metric::new("44", "5", "50");
        reconcile(&store, &[fresh, fresh_b]).await.unwrap();

        let stations = [Station::new("a", "A"), Station::new("b", "B")];
        let charts = read_stations(&store, &stations).await.unwrap();
        assert_eq!(Some(33.0), charts[0].gauges[0].value);
        assert_eq!(Some(44.0), charts[1].gauges[0].value);
    }

    #[test]
    fn test_render_page_per_station() {
        let charts = vec![
            StationCharts::from_record(&record("a", "Mª Díaz de Haro")),
            StationCharts::from_record(&record("b", "<Europa>")),
        ];
        let page = render_page(&charts);

        assert!(page.contains("<h2>Mª Díaz de Haro</h2>"));
        assert!(page.contains("<h2>&lt;Europa&gt;</h2>"));
        assert!(page.contains(r#"id="breakdown-0""#));
        assert!(page.contains(r#"id="breakdown-1""#));
        assert!(page.contains(r#"id="gauge-1-5""#));
        assert!(!page.contains(r#"id="gauge-1-6""#));
        assert!(!page.contains("<Europa>"));
    }

    #[test]
    fn test_render_page_empty() {
        let page = render_page(&[]);
        assert!(page.contains("No station data available yet."));
        assert!(page.contains("const stations = [];"));
    }
}
