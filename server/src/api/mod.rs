//! HTTP transport. Translates requests into `PriceService` calls.

use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::averages::PriceService;
use crate::decimal::serialize_str;
use crate::error::QueryError;

/// Fractional digits kept in responses. Arithmetic is never rounded.
pub const OUTPUT_DECIMAL_PLACES: u32 = 8;

#[derive(Debug, Serialize, PartialEq)]
pub struct PriceResponse {
    pub symbol: String,
    #[serde(serialize_with = "serialize_str")]
    pub value: Decimal,
}

impl PriceResponse {
    fn new(symbol: &str, value: Decimal) -> Self {
        Self {
            symbol: crate::data_sources::normalize_symbol(symbol),
            value: value.round_dp(OUTPUT_DECIMAL_PLACES).normalize(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SmaParams {
    pub n: Option<String>,
    pub p: Option<String>,
    pub s: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Invalid start time \"{0}\", expected RFC 3339.")]
    InvalidStart(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Query(error) if error.is_client_error() => {
                (StatusCode::BAD_REQUEST, error.code().as_str())
            }
            ApiError::Query(error) => {
                error!(%error, code = %error.code(), "Price query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, error.code().as_str())
            }
            ApiError::InvalidStart(_) => (StatusCode::BAD_REQUEST, "INVALID_START_TIME"),
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub async fn average_24h(
    State(service): State<PriceService>,
    Path(symbol): Path<String>,
) -> Result<Json<PriceResponse>, ApiError> {
    let value = service.average_24h(&symbol).await?;
    Ok(Json(PriceResponse::new(&symbol, value)))
}

pub async fn simple_moving_average(
    State(service): State<PriceService>,
    Path(symbol): Path<String>,
    Query(params): Query<SmaParams>,
) -> Result<Json<PriceResponse>, ApiError> {
    // anything that is not a positive integer is an invalid sample count
    let sample_count = params
        .n
        .as_deref()
        .and_then(|n| n.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let period = params.p.unwrap_or_default();
    let anchor = match params.s.as_deref() {
        None | Some("") => None,
        Some(start) => Some(parse_start(start)?),
    };

    let value = service
        .simple_moving_average(&symbol, sample_count, &period, anchor)
        .await?;
    Ok(Json(PriceResponse::new(&symbol, value)))
}

fn parse_start(start: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(start.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| ApiError::InvalidStart(start.to_string()))
}

async fn health() -> &'static str {
    "ok"
}

pub fn router(service: PriceService) -> Router {
    Router::new()
        .route("/api/price/:symbol/24hAvgPrice", get(average_24h))
        .route(
            "/api/price/:symbol/SimpleMovingAverage",
            get(simple_moving_average),
        )
        .route("/health", get(health))
        .with_state(service)
}

/// Serves the query API until `cancel` fires.
pub async fn serve(
    service: PriceService,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Price API listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Price API stopped");
    Ok(())
}
