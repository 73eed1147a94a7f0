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

use crate::record::{Metric, Station, StationRecord};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use scraper::{Html, Selector};
use std::error;
use std::fmt;
use std::future::Future;

pub const DEFAULT_SOURCE_URL: &str = "https://aqicn.org/city/spain/pais-vasco/bilbao/";

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidBaseUrl(String),
    InvalidStation(String),
    MissingField(String, &'static str),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidBaseUrl(u) => write!(f, "invalid base URL {}", u),
            Self::InvalidStation(s) => write!(f, "invalid station {}", s),
            Self::MissingField(s, field) => write!(f, "missing field {} for station {}", field, s),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Source of current measurements for a single station.
pub trait StationSource: Send + Sync {
    fn fetch(&self, station: &Station) -> impl Future<Output = Result<StationRecord, ClientError>> + Send;
}

/// Client for the public aqicn.org station pages.
#[derive(Debug)]
pub struct AqicnClient {
    client: Client,
    base_url: Url,
}

impl AqicnClient {
    const USER_AGENT: &'static str = "aqi_station (https://github.com/56quarters/aqi_station)";
    const HTML_RESPONSE: &'static str = "text/html";

    pub fn new(client: Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidBaseUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(AqicnClient { client, base_url })
    }

    async fn make_request(&self, station: &str, url: Url) -> Result<Response, ClientError> {
        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::HTML_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::NOT_FOUND {
            Err(ClientError::InvalidStation(station.to_owned()))
        } else {
            Err(ClientError::Unexpected(status, url))
        }
    }

    fn station_url(&self, station: &str) -> Url {
        let mut url = self.base_url.clone();
        // Checked for cannot-be-a-base in the constructor so this always succeeds
        if let Ok(mut p) = url.path_segments_mut() {
            p.pop_if_empty().push(station).push("es").push("");
        }

        url
    }
}

impl StationSource for AqicnClient {
    async fn fetch(&self, station: &Station) -> Result<StationRecord, ClientError> {
        let station_url = self.station_url(station.id);
        tracing::debug!(message = "making station page request", url = %station_url);

        let res = self.make_request(station.id, station_url).await?;
        let body = res.text().await.map_err(ClientError::Internal)?;
        parse_station(station, &body)
    }
}

/// Element ids for the current, min, and max values of each measurement on a station page.
struct FieldIds {
    current: &'static str,
    min: &'static str,
    max: &'static str,
}

const fn ids(current: &'static str, min: &'static str, max: &'static str) -> FieldIds {
    FieldIds { current, min, max }
}

const AIR_QUALITY_ID: &str = "aqiwgtvalue";
const PM25_IDS: FieldIds = ids("cur_pm25", "min_pm25", "max_pm25");
const PM10_IDS: FieldIds = ids("cur_pm10", "min_pm10", "max_pm10");
const NO2_IDS: FieldIds = ids("cur_no2", "min_no2", "max_no2");
const SO2_IDS: FieldIds = ids("cur_so2", "min_so2", "max_so2");
const TEMPERATURE_IDS: FieldIds = ids("cur_t", "min_t", "max_t");
const PRESSURE_IDS: FieldIds = ids("cur_p", "min_p", "max_p");
const HUMIDITY_IDS: FieldIds = ids("cur_h", "min_h", "max_h");
const WIND_IDS: FieldIds = ids("cur_w", "min_w", "max_w");

/// Build a record for `station` from the HTML of its page.
///
/// Every expected element must be present, a single missing element fails the whole
/// parse so that a page layout change never produces a half-populated record.
pub fn parse_station(station: &Station, html: &str) -> Result<StationRecord, ClientError> {
    let page = Page {
        station: station.id,
        doc: Html::parse_document(html),
    };

    Ok(StationRecord {
        id: station.id.to_owned(),
        name: station.name.to_owned(),
        air_quality: Metric::current_only(page.text(AIR_QUALITY_ID)?),
        pm2_5: page.metric(&PM25_IDS)?,
        pm10: page.metric(&PM10_IDS)?,
        no2: page.metric(&NO2_IDS)?,
        so2: page.metric(&SO2_IDS)?,
        temperature: page.metric(&TEMPERATURE_IDS)?,
        atm_pressure: page.metric(&PRESSURE_IDS)?,
        humidity: page.metric(&HUMIDITY_IDS)?,
        wind: page.metric(&WIND_IDS)?,
    })
}

struct Page<'a> {
    station: &'a str,
    doc: Html,
}

impl<'a> Page<'a> {
    fn metric(&self, ids: &FieldIds) -> Result<Metric, ClientError> {
        Ok(Metric::new(self.text(ids.current)?, self.text(ids.min)?, self.text(ids.max)?))
    }

    fn text(&self, id: &'static str) -> Result<String, ClientError> {
        let missing = || ClientError::MissingField(self.station.to_owned(), id);
        let selector = Selector::parse(&format!("#{}", id)).map_err(|_| missing())?;
        self.doc
            .select(&selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_owned())
            .ok_or_else(missing)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{parse_station, AqicnClient, ClientError};
    use crate::record::{Metric, Station};
    use reqwest::Client;

    const STATION: Station = Station::new("europa", "Europa");

    /// Build a page containing every element the parser looks for.
    pub(crate) fn station_page(skip: Option<&str>) -> String {
        let fields = [
            ("aqiwgtvalue", "42"),
            ("cur_pm25", "10"),
            ("min_pm25", "5"),
            ("max_pm25", "20"),
            ("cur_pm10", "15"),
            ("min_pm10", "8"),
            ("max_pm10", "30"),
            ("cur_no2", "12"),
            ("min_no2", "2"),
            ("max_no2", "25"),
            ("cur_so2", "1"),
            ("min_so2", "1"),
            ("max_so2", "3"),
            ("cur_t", "18"),
            ("min_t", "11"),
            ("max_t", "22"),
            ("cur_p", "1016"),
            ("min_p", "1012"),
            ("max_p", "1019"),
            ("cur_h", "77"),
            ("min_h", "60"),
            ("max_h", "94"),
            ("cur_w", "4"),
            ("min_w", "0.5"),
            ("max_w", "7"),
        ];

        let mut body = String::from("<html><body><table>");
        for (id, value) in fields.iter().filter(|(id, _)| Some(*id) != skip) {
            body.push_str(&format!("<tr><td id=\"{}\"> {} </td></tr>", id, value));
        }
        body.push_str("</table></body></html>");
        body
    }

    #[test]
    fn test_parse_station_all_fields() {
        let record = parse_station(&STATION, &station_page(None)).unwrap();

        assert_eq!("europa", record.id);
        assert_eq!("Europa", record.name);
        assert_eq!(Metric::current_only("42"), record.air_quality);
        assert_eq!(Metric::new("10", "5", "20"), record.pm2_5);
        assert_eq!(Metric::new("1016", "1012", "1019"), record.atm_pressure);
        assert_eq!(Metric::new("4", "0.5", "7"), record.wind);
    }

    #[test]
    fn test_parse_station_missing_field() {
        let res = parse_station(&STATION, &station_page(Some("max_h")));
        assert!(matches!(res, Err(ClientError::MissingField(s, "max_h")) if s == "europa"));
    }

    #[test]
    fn test_parse_station_empty_page() {
        let res = parse_station(&STATION, "<html></html>");
        assert!(matches!(res, Err(ClientError::MissingField(_, "aqiwgtvalue"))));
    }

    #[test]
    fn test_station_url() {
        let client = AqicnClient::new(Client::new(), "https://aqicn.org/city/spain/pais-vasco/bilbao/").unwrap();
        assert_eq!(
            "https://aqicn.org/city/spain/pais-vasco/bilbao/m--diaz-haro/es/",
            client.station_url("m--diaz-haro").as_str()
        );
    }

    #[test]
    fn test_station_url_no_trailing_slash() {
        let client = AqicnClient::new(Client::new(), "http://localhost:8080/bilbao").unwrap();
        assert_eq!("http://localhost:8080/bilbao/europa/es/", client.station_url("europa").as_str());
    }

    #[test]
    fn test_invalid_base_url() {
        let res = AqicnClient::new(Client::new(), "not a url");
        assert!(matches!(res, Err(ClientError::InvalidBaseUrl(_))));
    }
}
