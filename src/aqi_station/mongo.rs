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

use crate::record::StationRecord;
use crate::store::{DocumentKey, RecordStore, StoreError, StoredRecord, WriteOp};
use mongodb::bson::{self, doc, oid::ObjectId, Document};
use mongodb::options::{ClientOptions, FindOptions, ReplaceOptions, ServerAddress};
use mongodb::{Client, Collection};
use std::error;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 27017;
pub const DATABASE_NAME: &str = "weather_stations_db";
pub const COLLECTION_NAME: &str = "weather_stations";

const APP_NAME: &str = "aqi_station";
const KEY_FIELD: &str = "_id";
const STATION_ID_FIELD: &str = "id";

/// Record store backed by a MongoDB collection.
///
/// Documents keep the station fields at the top level next to the `_id` assigned by
/// MongoDB. That `_id` is what a replace targets, so replacing a station keeps its key.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    collection: Collection<Document>,
}

impl MongoStore {
    /// Create a store for the given server. No connection is made until the first operation.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, StoreError> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: host.to_owned(),
                port: Some(port),
            }])
            .app_name(APP_NAME.to_owned())
            .server_selection_timeout(timeout)
            .build();

        let client = Client::with_options(options).map_err(backend)?;
        let collection = client.database(DATABASE_NAME).collection::<Document>(COLLECTION_NAME);
        Ok(MongoStore { client, collection })
    }
}

impl RecordStore for MongoStore {
    async fn scan_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let opts = FindOptions::builder().sort(doc! { KEY_FIELD: 1 }).build();
        let mut cursor = self.collection.find(None, opts).await.map_err(backend)?;
        let mut out = Vec::new();

        while cursor.advance().await.map_err(backend)? {
            let doc = cursor.deserialize_current().map_err(backend)?;
            out.push(decode_document(doc)?);
        }

        Ok(out)
    }

    async fn find(&self, id: &str) -> Result<Option<StationRecord>, StoreError> {
        let res = self
            .collection
            .find_one(doc! { STATION_ID_FIELD: id }, None)
            .await
            .map_err(backend)?;

        res.map(|doc| decode_document(doc).map(|s| s.record)).transpose()
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        for op in ops {
            match op {
                WriteOp::Replace { key, record } => {
                    let oid = ObjectId::parse_str(&key.0).map_err(|_| StoreError::InvalidKey(key.clone()))?;
                    let opts = ReplaceOptions::builder().upsert(true).build();
                    self.collection
                        .replace_one(doc! { KEY_FIELD: oid }, encode_record(&record)?, opts)
                        .await
                        .map_err(backend)?;
                }
                WriteOp::Insert(record) => {
                    self.collection
                        .insert_one(encode_record(&record)?, None)
                        .await
                        .map_err(backend)?;
                }
            }
        }

        Ok(())
    }

    async fn insert_many(&self, records: Vec<StationRecord>) -> Result<(), StoreError> {
        // MongoDB rejects an empty insert_many
        if records.is_empty() {
            return Ok(());
        }

        let docs = records.iter().map(encode_record).collect::<Result<Vec<_>, _>>()?;
        self.collection.insert_many(docs, None).await.map_err(backend)?;
        Ok(())
    }

    async fn drop_all(&self) -> Result<(), StoreError> {
        self.client.database(DATABASE_NAME).drop(None).await.map_err(backend)
    }
}

fn backend<E>(e: E) -> StoreError
where
    E: error::Error + Send + Sync + 'static,
{
    StoreError::Backend(Box::new(e))
}

fn encode_record(record: &StationRecord) -> Result<Document, StoreError> {
    bson::to_document(record).map_err(backend)
}

fn decode_document(mut doc: Document) -> Result<StoredRecord, StoreError> {
    let oid = doc
        .get_object_id(KEY_FIELD)
        .map_err(|e| StoreError::Decode(format!("{}: {}", KEY_FIELD, e)))?;
    doc.remove(KEY_FIELD);

    let record = bson::from_document::<StationRecord>(doc).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(StoredRecord {
        key: DocumentKey(oid.to_hex()),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::{decode_document, encode_record};
    use crate::record::{Metric, StationRecord};
    use crate::store::StoreError;
    use mongodb::bson::{doc, oid::ObjectId, Bson};

    #[test]
    fn test_encode_decode_keeps_object_id() {
        let mut record = StationRecord::empty("europa", "Europa");
        record.pm2_5 = Metric::new("10", "5", "20");

        let oid = ObjectId::new();
        let mut doc = encode_record(&record).unwrap();
        doc.insert("_id", oid);

        let stored = decode_document(doc).unwrap();
        assert_eq!(oid.to_hex(), stored.key.0);
        assert_eq!(record, stored.record);
    }

    #[test]
    fn test_encode_document_field_names() {
        let record = StationRecord::empty("europa", "Europa");
        let doc = encode_record(&record).unwrap();

        assert_eq!(Some("europa"), doc.get_str("id").ok());
        assert_eq!(Some("Europa"), doc.get_str("station_name").ok());
        assert_eq!(Some(&Bson::Null), doc.get_document("pm10").unwrap().get("current"));
    }

    #[test]
    fn test_decode_missing_object_id() {
        let doc = encode_record(&StationRecord::empty("a", "A")).unwrap();
        assert!(matches!(decode_document(doc), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_decode_unknown_shape() {
        let doc = doc! { "_id": ObjectId::new(), "id": "a", "pm2_5": "10" };
        assert!(matches!(decode_document(doc), Err(StoreError::Decode(_))));
    }
}
