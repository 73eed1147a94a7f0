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

use crate::dashboard;
use crate::record::Station;
use crate::store::RecordStore;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const TEXT_FORMAT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared state for every request: where records are read from and the metrics registry.
pub struct RequestContext<S> {
    store: Arc<S>,
    stations: Vec<Station>,
    registry: Registry,
}

impl<S> RequestContext<S>
where
    S: RecordStore,
{
    pub fn new(store: Arc<S>, stations: Vec<Station>, registry: Registry) -> Self {
        Self {
            store,
            stations,
            registry,
        }
    }
}

/// Routes for the dashboard and metrics endpoints.
///
/// Other methods on either path get a 405 and every other path a 404.
pub fn router<S>(context: Arc<RequestContext<S>>) -> Router
where
    S: RecordStore + 'static,
{
    Router::new()
        .route("/", get(dashboard_handler::<S>))
        .route("/metrics", get(metrics_handler::<S>))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn dashboard_handler<S>(State(context): State<Arc<RequestContext<S>>>) -> Response
where
    S: RecordStore + 'static,
{
    match dashboard::read_stations(context.store.as_ref(), &context.stations).await {
        Ok(charts) => {
            tracing::debug!(message = "rendering dashboard", stations = charts.len());
            Html(dashboard::render_page(&charts)).into_response()
        }
        Err(e) => {
            tracing::error!(message = "unable to read station records", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn metrics_handler<S>(State(context): State<Arc<RequestContext<S>>>) -> Response
where
    S: RecordStore + 'static,
{
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, TEXT_FORMAT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::{dashboard_handler, metrics_handler, router, RequestContext};
    use crate::metrics::{CycleResult, SyncMetrics};
    use crate::record::{Metric, Station, StationRecord};
    use crate::store::{MemoryStore, RecordStore};
    use axum::body::{Body, HttpBody};
    use axum::extract::State;
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use prometheus_client::registry::Registry;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn body_text(res: Response) -> String {
        let mut body = res.into_body();
        let mut out = Vec::new();
        while let Some(chunk) = body.data().await {
            out.extend_from_slice(&chunk.unwrap());
        }

        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_dashboard_lists_stored_stations() {
        let store = Arc::new(MemoryStore::new());
        let mut record = StationRecord::empty("europa", "Europa");
        record.pm2_5 = Metric::new("10", "5", "20");
        store.insert_many(vec![record]).await.unwrap();

        let stations = vec![Station::new("mazarredo", "Mazarredo"), Station::new("europa", "Europa")];
        let context = Arc::new(RequestContext::new(store, stations, Registry::default()));

        let res = dashboard_handler(State(context)).await;
        assert_eq!(StatusCode::OK, res.status());

        let body = body_text(res).await;
        assert!(body.contains("<h2>Europa</h2>"));
        assert!(!body.contains("<h2>Mazarredo</h2>"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let mut registry = Registry::default();
        let metrics = SyncMetrics::new(&mut registry);
        metrics.cycle(CycleResult::Success);

        let context = Arc::new(RequestContext::new(Arc::new(MemoryStore::new()), Vec::new(), registry));
        let res = metrics_handler(State(context)).await;
        assert_eq!(StatusCode::OK, res.status());

        let body = body_text(res).await;
        assert!(body.contains("aqi_sync_cycles_total{result=\"Success\"} 1"));
    }

    #[tokio::test]
    async fn test_router_statuses() {
        let context = Arc::new(RequestContext::new(
            Arc::new(MemoryStore::new()),
            vec![Station::new("europa", "Europa")],
            Registry::default(),
        ));

        let cases = [
            (Method::GET, "/", StatusCode::OK),
            (Method::GET, "/metrics", StatusCode::OK),
            (Method::POST, "/", StatusCode::METHOD_NOT_ALLOWED),
            (Method::DELETE, "/metrics", StatusCode::METHOD_NOT_ALLOWED),
            (Method::GET, "/nope", StatusCode::NOT_FOUND),
        ];

        for (method, uri, expected) in cases {
            let req = Request::builder()
                .method(method.clone())
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let res = router(Arc::clone(&context)).oneshot(req).await.unwrap();
            assert_eq!(expected, res.status(), "{} {}", method, uri);
        }
    }
}
