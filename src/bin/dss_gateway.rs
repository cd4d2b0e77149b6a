//! dss-gateway: HTTP/JSON proxy for the DSS gRPC backend.
//!
//! A thin adapter: each route decodes JSON, forwards the bearer token and the
//! request to the gRPC backend, and renders the response back to JSON.
//!
//! ## Configuration
//! - `-port <port>`: HTTP listen port (default 8080)
//! - `-grpc-backend <host:port>`: endpoint of the gRPC backend
//! - `DSS_LOG_LEVEL`: log level (default "info")

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request};
use tracing::{error, info};

use dss::proto::discovery_and_synchronization_service_client::DiscoveryAndSynchronizationServiceClient;
use dss::proto::{
    DeleteIdentificationServiceAreaRequest, DeleteSubscriptionRequest,
    GetIdentificationServiceAreaRequest, GetSubscriptionRequest,
    PatchIdentificationServiceAreaRequest, PatchSubscriptionRequest,
    PutIdentificationServiceAreaRequest, PutSubscriptionRequest,
    SearchIdentificationServiceAreasRequest, SearchSubscriptionsRequest, SubscriptionCallbacks,
    Volume4D,
};
use dss::utils::bootstrap;

type DssClient = DiscoveryAndSynchronizationServiceClient<Channel>;

#[derive(Clone)]
struct Gateway {
    client: DssClient,
}

/// gRPC failure carried out to an HTTP response.
struct GatewayError(tonic::Status);

impl From<tonic::Status> for GatewayError {
    fn from(status: tonic::Status) -> Self {
        Self(status)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = match self.0.code() {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::FailedPrecondition | Code::Aborted => StatusCode::CONFLICT,
            Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(json!({ "message": self.0.message() }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> GatewayError {
    GatewayError(tonic::Status::invalid_argument(message.into()))
}

/// Wrap a message in a tonic request, forwarding the bearer token.
fn with_auth<T>(message: T, headers: &HeaderMap) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Ok(value) = MetadataValue::try_from(value) {
            request.metadata_mut().insert("authorization", value);
        }
    }
    request
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VolumeBody {
    area: String,
    altitude_lo: f32,
    altitude_hi: f32,
    time_start: Option<String>,
    time_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PutIsaBody {
    extents: Option<VolumeBody>,
    flights_url: String,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CallbacksBody {
    identification_service_area_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PutSubscriptionBody {
    extents: Option<VolumeBody>,
    callbacks: Option<CallbacksBody>,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchParams {
    area: String,
    earliest_time: Option<String>,
    latest_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VersionParam {
    version: String,
}

fn parse_time(value: &str) -> Result<prost_types::Timestamp, GatewayError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| bad_request(format!("invalid timestamp {value:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(prost_types::Timestamp {
        seconds: parsed.timestamp(),
        nanos: parsed.timestamp_subsec_nanos() as i32,
    })
}

fn render_time(ts: &prost_types::Timestamp) -> Value {
    match DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32) {
        Some(t) => json!(t.to_rfc3339()),
        None => Value::Null,
    }
}

fn volume_from_body(body: &VolumeBody) -> Result<Volume4D, GatewayError> {
    Ok(Volume4D {
        area: body.area.clone(),
        altitude_lo: body.altitude_lo,
        altitude_hi: body.altitude_hi,
        time_start: body.time_start.as_deref().map(parse_time).transpose()?,
        time_end: body.time_end.as_deref().map(parse_time).transpose()?,
    })
}

fn volume_json(extents: &Volume4D) -> Value {
    json!({
        "area": extents.area,
        "altitude_lo": extents.altitude_lo,
        "altitude_hi": extents.altitude_hi,
        "time_start": extents.time_start.as_ref().map(render_time),
        "time_end": extents.time_end.as_ref().map(render_time),
    })
}

fn isa_json(isa: &dss::proto::IdentificationServiceArea) -> Value {
    json!({
        "id": isa.id,
        "owner": isa.owner,
        "flights_url": isa.flights_url,
        "extents": isa.extents.as_ref().map(volume_json),
        "version": isa.version,
    })
}

fn subscription_json(sub: &dss::proto::Subscription) -> Value {
    json!({
        "id": sub.id,
        "owner": sub.owner,
        "callbacks": {
            "identification_service_area_url": sub
                .callbacks
                .as_ref()
                .map(|c| c.identification_service_area_url.clone())
                .unwrap_or_default(),
        },
        "notification_index": sub.notification_index,
        "begins": sub.begins.as_ref().map(render_time),
        "expires": sub.expires.as_ref().map(render_time),
        "version": sub.version,
    })
}

fn subscribers_json(subscribers: &[dss::proto::SubscriberToNotify]) -> Value {
    Value::Array(
        subscribers
            .iter()
            .map(|s| {
                json!({
                    "url": s.url,
                    "subscriptions": s
                        .subscriptions
                        .iter()
                        .map(|state| json!({
                            "subscription": state.subscription,
                            "notification_index": state.notification_index,
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

async fn get_isa(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let response = gateway
        .client
        .clone()
        .get_identification_service_area(with_auth(
            GetIdentificationServiceAreaRequest { id },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "service_area": response.service_area.as_ref().map(isa_json),
    })))
}

async fn put_isa(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutIsaBody>,
) -> Result<Json<Value>, GatewayError> {
    let extents = body
        .extents
        .as_ref()
        .map(volume_from_body)
        .transpose()?;

    let response = gateway
        .client
        .clone()
        .put_identification_service_area(with_auth(
            PutIdentificationServiceAreaRequest {
                id,
                extents,
                flights_url: body.flights_url,
                version: body.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "service_area": response.service_area.as_ref().map(isa_json),
        "subscribers": subscribers_json(&response.subscribers),
    })))
}

async fn patch_isa(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutIsaBody>,
) -> Result<Json<Value>, GatewayError> {
    let extents = body
        .extents
        .as_ref()
        .map(volume_from_body)
        .transpose()?;

    let response = gateway
        .client
        .clone()
        .patch_identification_service_area(with_auth(
            PatchIdentificationServiceAreaRequest {
                id,
                extents,
                flights_url: body.flights_url,
                version: body.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "service_area": response.service_area.as_ref().map(isa_json),
        "subscribers": subscribers_json(&response.subscribers),
    })))
}

async fn delete_isa(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<VersionParam>,
) -> Result<Json<Value>, GatewayError> {
    let response = gateway
        .client
        .clone()
        .delete_identification_service_area(with_auth(
            DeleteIdentificationServiceAreaRequest {
                id,
                version: params.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "service_area": response.service_area.as_ref().map(isa_json),
        "subscribers": subscribers_json(&response.subscribers),
    })))
}

async fn search_isas(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, GatewayError> {
    let request = SearchIdentificationServiceAreasRequest {
        area: params.area,
        earliest_time: params.earliest_time.as_deref().map(parse_time).transpose()?,
        latest_time: params.latest_time.as_deref().map(parse_time).transpose()?,
    };

    let response = gateway
        .client
        .clone()
        .search_identification_service_areas(with_auth(request, &headers))
        .await?
        .into_inner();

    Ok(Json(json!({
        "service_areas": response.service_areas.iter().map(isa_json).collect::<Vec<_>>(),
    })))
}

async fn get_subscription(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let response = gateway
        .client
        .clone()
        .get_subscription(with_auth(GetSubscriptionRequest { id }, &headers))
        .await?
        .into_inner();

    Ok(Json(json!({
        "subscription": response.subscription.as_ref().map(subscription_json),
    })))
}

async fn put_subscription(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutSubscriptionBody>,
) -> Result<Json<Value>, GatewayError> {
    let extents = body
        .extents
        .as_ref()
        .map(volume_from_body)
        .transpose()?;

    let response = gateway
        .client
        .clone()
        .put_subscription(with_auth(
            PutSubscriptionRequest {
                id,
                extents,
                callbacks: body.callbacks.map(|c| SubscriptionCallbacks {
                    identification_service_area_url: c.identification_service_area_url,
                }),
                version: body.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "subscription": response.subscription.as_ref().map(subscription_json),
    })))
}

async fn patch_subscription(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<PutSubscriptionBody>,
) -> Result<Json<Value>, GatewayError> {
    let extents = body
        .extents
        .as_ref()
        .map(volume_from_body)
        .transpose()?;

    let response = gateway
        .client
        .clone()
        .patch_subscription(with_auth(
            PatchSubscriptionRequest {
                id,
                extents,
                callbacks: body.callbacks.map(|c| SubscriptionCallbacks {
                    identification_service_area_url: c.identification_service_area_url,
                }),
                version: body.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "subscription": response.subscription.as_ref().map(subscription_json),
    })))
}

async fn delete_subscription(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<VersionParam>,
) -> Result<Json<Value>, GatewayError> {
    let response = gateway
        .client
        .clone()
        .delete_subscription(with_auth(
            DeleteSubscriptionRequest {
                id,
                version: params.version,
            },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "subscription": response.subscription.as_ref().map(subscription_json),
    })))
}

async fn search_subscriptions(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, GatewayError> {
    let response = gateway
        .client
        .clone()
        .search_subscriptions(with_auth(
            SearchSubscriptionsRequest { area: params.area },
            &headers,
        ))
        .await?
        .into_inner();

    Ok(Json(json!({
        "subscriptions": response
            .subscriptions
            .iter()
            .map(subscription_json)
            .collect::<Vec<_>>(),
    })))
}

fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/v1/dss/identification_service_areas", get(search_isas))
        .route(
            "/v1/dss/identification_service_areas/:id",
            get(get_isa).put(put_isa).patch(patch_isa).delete(delete_isa),
        )
        .route("/v1/dss/subscriptions", get(search_subscriptions))
        .route(
            "/v1/dss/subscriptions/:id",
            get(get_subscription)
                .put(put_subscription)
                .patch(patch_subscription)
                .delete(delete_subscription),
        )
        .with_state(gateway)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = bootstrap::parse_flag(&args, "port")
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(8080);
    let backend = bootstrap::parse_flag(&args, "grpc-backend").ok_or_else(|| {
        error!("Missing required flag -grpc-backend");
        "missing required flag -grpc-backend"
    })?;

    let channel = Endpoint::from_shared(format!("http://{backend}"))?
        .connect_timeout(Duration::from_secs(10))
        .connect()
        .await
        .map_err(|e| {
            error!(error = %e, backend = %backend, "Failed to connect to gRPC backend");
            e
        })?;

    let gateway = Gateway {
        client: DssClient::new(channel),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, backend = %backend, "DSS gateway listening");
    axum::serve(listener, router(gateway)).await?;

    Ok(())
}
