use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{
    parse_branch, parse_transport_decision, parse_transport_status, validate_input,
    PaginationParams,
};
use crate::errors::ServiceError;
use crate::services::transports::{SendTransportRequest, TransportDetail, TransportLineInput};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct TransportLinePayload {
    #[validate(length(min = 1))]
    #[schema(example = "6297000112")]
    pub barcode: String,
    #[schema(example = 10)]
    pub quantity: i32,
    /// Acquisition price identifying the batches to draw from
    #[schema(example = "250")]
    pub net_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SendTransportPayload {
    #[schema(example = "Slemany")]
    pub from_branch: String,
    #[schema(example = "Erbil")]
    pub to_branch: String,
    /// User dispatching the shipment
    pub sender_id: Uuid,
    pub notes: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<TransportLinePayload>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReceiveTransportPayload {
    /// User settling the shipment
    pub receiver_id: Uuid,
    /// received or rejected
    #[schema(example = "received")]
    pub decision: String,
    pub receiver_notes: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct TransportListFilter {
    /// Matches either side of the movement
    pub branch: Option<String>,
    /// pending, received or rejected
    pub status: Option<String>,
}

/// Dispatch stock to another branch, deducting the origin ledger
#[utoipa::path(
    post,
    path = "/api/v1/transports",
    request_body = SendTransportPayload,
    responses(
        (status = 201, description = "Transport sent", body = crate::ApiResponse<crate::services::transports::TransportDetail>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Transports"
)]
async fn send_transport(
    State(state): State<AppState>,
    Json(payload): Json<SendTransportPayload>,
) -> Result<(StatusCode, Json<ApiResponse<TransportDetail>>), ServiceError> {
    validate_input(&payload)?;

    let request = SendTransportRequest {
        from_branch: parse_branch(&payload.from_branch)?,
        to_branch: parse_branch(&payload.to_branch)?,
        sender_id: payload.sender_id,
        notes: payload.notes,
        items: payload
            .items
            .into_iter()
            .map(|line| TransportLineInput {
                barcode: line.barcode,
                quantity: line.quantity,
                net_price: line.net_price,
            })
            .collect(),
    };

    let transport = state.services.transports.send(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(transport))))
}

/// Settle a pending transport as received or rejected
#[utoipa::path(
    post,
    path = "/api/v1/transports/:transport_id/receive",
    params(
        ("transport_id" = Uuid, Path, description = "Transport ID")
    ),
    request_body = ReceiveTransportPayload,
    responses(
        (status = 200, description = "Transport settled", body = crate::ApiResponse<crate::services::transports::TransportDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transport already settled", body = crate::errors::ErrorResponse)
    ),
    tag = "Transports"
)]
async fn receive_transport(
    State(state): State<AppState>,
    Path(transport_id): Path<Uuid>,
    Json(payload): Json<ReceiveTransportPayload>,
) -> Result<Json<ApiResponse<TransportDetail>>, ServiceError> {
    let decision = parse_transport_decision(&payload.decision)?;

    let transport = state
        .services
        .transports
        .receive(
            transport_id,
            payload.receiver_id,
            decision,
            payload.receiver_notes,
        )
        .await?;

    Ok(Json(ApiResponse::success(transport)))
}

/// Get a transport with its items
#[utoipa::path(
    get,
    path = "/api/v1/transports/:transport_id",
    params(
        ("transport_id" = Uuid, Path, description = "Transport ID")
    ),
    responses(
        (status = 200, description = "Transport detail", body = crate::ApiResponse<crate::services::transports::TransportDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Transports"
)]
async fn get_transport(
    State(state): State<AppState>,
    Path(transport_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransportDetail>>, ServiceError> {
    let transport = state.services.transports.get_transport(transport_id).await?;
    Ok(Json(ApiResponse::success(transport)))
}

/// List transports with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/transports",
    params(
        PaginationParams,
        TransportListFilter
    ),
    responses(
        (status = 200, description = "Transports", body = crate::ApiResponse<crate::PaginatedResponse<crate::services::transports::TransportDetail>>)
    ),
    tag = "Transports"
)]
async fn list_transports(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<TransportListFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<TransportDetail>>>, ServiceError> {
    let branch = match filter.branch {
        Some(value) => Some(parse_branch(&value)?),
        None => None,
    };
    let status = match filter.status {
        Some(value) => Some(parse_transport_status(&value)?),
        None => None,
    };

    let (transports, total) = state
        .services
        .transports
        .list_transports(branch, status, params.page, params.per_page)
        .await?;

    let response = PaginatedResponse {
        items: transports,
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: total.div_ceil(params.per_page),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Transport routes
pub fn transport_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(send_transport))
        .route("/", get(list_transports))
        .route("/:transport_id", get(get_transport))
        .route("/:transport_id/receive", post(receive_transport))
}
