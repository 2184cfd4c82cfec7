//! HTTP handler functions for the zone aggregates API.

use std::collections::BTreeMap;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, web};
use zonestat_aggregates::{ErrorCode, ZoneAggregateError};
use zonestat_aggregates_models::ParamsBag;
use zonestat_server_models::{ApiError, ApiHealth, BatchRequestBody};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        aggregates: state.service.registry().len(),
    })
}

/// `GET /api/aggregates`
///
/// Lists the display metadata of every registered aggregate.
pub async fn list_aggregates(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.service.registry().displays())
}

/// `GET /api/aggregates/{aggregate_id}`
pub async fn get_aggregate_display(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let aggregate_id = path.into_inner();
    match state.service.registry().get_display(&aggregate_id) {
        Some(display) => HttpResponse::Ok().json(display),
        None => error_response(&ZoneAggregateError::UnknownAggregate { aggregate_id }),
    }
}

/// `GET /api/zones/{zone_id}/aggregates/{aggregate_id}`
///
/// Query string entries become the raw parameter bag; plugin schemas
/// coerce numeric strings.
pub async fn get_zone_aggregate(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<BTreeMap<String, String>>,
) -> HttpResponse {
    let (zone_id, aggregate_id) = path.into_inner();
    let params: ParamsBag = query
        .into_inner()
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();

    match state
        .service
        .get_aggregate(&zone_id, &aggregate_id, &params)
        .await
    {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/zones/{zone_id}/aggregates:batch`
///
/// Always `200 OK`; per-item failures are reported in `errors`.
pub async fn batch(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<BatchRequestBody>,
) -> HttpResponse {
    let zone_id = path.into_inner();
    let BatchRequestBody { requests } = body.into_inner();

    HttpResponse::Ok().json(state.service.get_many(&zone_id, requests).await)
}

const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::UnknownAggregate => StatusCode::NOT_FOUND,
        ErrorCode::InvalidParams => StatusCode::BAD_REQUEST,
        ErrorCode::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::NoData | ErrorCode::ComputeError => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// Maps an engine error to its HTTP response.
fn error_response(e: &ZoneAggregateError) -> HttpResponse {
    let code = e.code();
    let status = status_for(code);
    if status.is_server_error() {
        log::error!("Aggregate request failed: {e}");
    } else {
        log::debug!("Aggregate request rejected ({code}): {e}");
    }

    HttpResponse::build(status)
        .json(ApiError::new(code.as_ref(), e.to_string()).with_details(e.details()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::{App, test};
    use serde_json::{Value, json};
    use zonestat_aggregates::memory::{
        MemoryGeoAggregateStore, MemoryZoneAggregateStore, MemoryZoneGeoMapStore,
    };
    use zonestat_aggregates::service::ZoneAggregatesService;
    use zonestat_database::seed::{SeedFile, apply_seed};
    use zonestat_plugins::registry::default_registry;

    use crate::configure_routes;

    async fn state() -> web::Data<AppState> {
        let registry = Arc::new(default_registry().unwrap());
        let geo = Arc::new(MemoryGeoAggregateStore::new());
        let zones = Arc::new(MemoryZoneGeoMapStore::new());

        let seed: SeedFile = serde_json::from_value(json!({
            "geoValues": [
                {
                    "aggregateId": "rent.v1",
                    "periodYear": 2024,
                    "geoLevel": "postcode_sector",
                    "geoCode": "AB1 2",
                    "params": {"bedrooms": "2"},
                    "source": "ons",
                    "sourceVersion": "2024",
                    "payload": {"median": 30}
                },
                {
                    "aggregateId": "rent.v1",
                    "periodYear": 2024,
                    "geoLevel": "postcode_sector",
                    "geoCode": "AB1 3",
                    "params": {"bedrooms": "2"},
                    "source": "ons",
                    "sourceVersion": "2024",
                    "payload": {"median": 40}
                }
            ],
            "zoneGeoWeights": [
                {"zoneId": "city", "geoLevel": "postcode_sector", "geoCode": "AB1 2", "weight": 0.6},
                {"zoneId": "city", "geoLevel": "postcode_sector", "geoCode": "AB1 3", "weight": 0.4}
            ]
        }))
        .unwrap();
        apply_seed(seed, &registry, geo.as_ref(), zones.as_ref())
            .await
            .unwrap();

        web::Data::new(AppState {
            service: Arc::new(ZoneAggregatesService::new(
                registry,
                Arc::new(MemoryZoneAggregateStore::new()),
                geo,
                zones,
            )),
        })
    }

    #[actix_web::test]
    async fn health_reports_registered_aggregates() {
        let app =
            test::init_service(App::new().app_data(state().await).configure(configure_routes))
                .await;
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["healthy"], json!(true));
        assert_eq!(body["aggregates"], json!(1));
    }

    #[actix_web::test]
    async fn lists_and_describes_aggregates() {
        let app =
            test::init_service(App::new().app_data(state().await).configure(configure_routes))
                .await;

        let req = test::TestRequest::get().uri("/api/aggregates").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["id"], json!("rent.v1"));

        let req = test::TestRequest::get()
            .uri("/api/aggregates/rent.v1")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["unit"], json!("GBP/month"));

        let req = test::TestRequest::get()
            .uri("/api/aggregates/crime.v1")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn computes_zone_aggregate_from_query_string() {
        let app =
            test::init_service(App::new().app_data(state().await).configure(configure_routes))
                .await;
        let req = test::TestRequest::get()
            .uri("/api/zones/city/aggregates/rent.v1?bedrooms=2&periodYear=latest")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["base"]["periodYear"], json!(2024));
        assert_eq!(body["base"]["coverage"], json!(1.0));
        assert_eq!(body["payload"]["median"], json!(34.0));
    }

    #[actix_web::test]
    async fn maps_engine_errors_to_status_codes() {
        let app =
            test::init_service(App::new().app_data(state().await).configure(configure_routes))
                .await;

        let cases = [
            (
                "/api/zones/city/aggregates/crime.v1",
                StatusCode::NOT_FOUND,
                "UNKNOWN_AGGREGATE",
            ),
            (
                "/api/zones/city/aggregates/rent.v1?bedrooms=lots",
                StatusCode::BAD_REQUEST,
                "INVALID_PARAMS",
            ),
            (
                "/api/zones/city/aggregates/rent.v1?bedrooms=2&periodYear=1999",
                StatusCode::UNPROCESSABLE_ENTITY,
                "NO_DATA",
            ),
        ];

        for (uri, status, code) in cases {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), status, "{uri}");
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"]["code"], json!(code), "{uri}");
        }
    }

    #[actix_web::test]
    async fn batch_reports_results_and_errors() {
        let app =
            test::init_service(App::new().app_data(state().await).configure(configure_routes))
                .await;
        let req = test::TestRequest::post()
            .uri("/api/zones/city/aggregates:batch")
            .set_json(json!({
                "requests": [
                    {"aggregateId": "rent.v1", "params": {"bedrooms": 2}},
                    {"aggregateId": "crime.v1"}
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["results"][0]["result"]["payload"]["median"], json!(34.0));
        assert_eq!(body["errors"][0]["code"], json!("UNKNOWN_AGGREGATE"));
        assert_eq!(body["errors"][0]["params"], json!({}));
    }
}
