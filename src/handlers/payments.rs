use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::PaginationParams;
use crate::errors::ServiceError;
use crate::services::payments::{
    CreatePaymentRequest, OutstandingStatement, PaymentDetail, PaymentSummary,
    UpdatePaymentRequest,
};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentPayload {
    /// Counterparty being settled
    pub counterparty_id: Uuid,
    /// Sold bills to include
    pub sold_bill_ids: Vec<Uuid>,
    /// Returns to net against them
    #[serde(default)]
    pub return_ids: Vec<Uuid>,
    /// Number of the signed paper bill, if any
    pub hardcopy_bill_number: Option<String>,
    pub payment_date: NaiveDate,
    /// User recording the payment
    pub created_by: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdatePaymentPayload {
    pub sold_bill_ids: Vec<Uuid>,
    #[serde(default)]
    pub return_ids: Vec<Uuid>,
    pub hardcopy_bill_number: Option<String>,
    pub payment_date: NaiveDate,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PaymentListFilter {
    pub counterparty_id: Option<Uuid>,
}

/// Outstanding sold bills and returns for a counterparty
#[utoipa::path(
    get,
    path = "/api/v1/payments/outstanding/:counterparty_id",
    params(
        ("counterparty_id" = Uuid, Path, description = "Counterparty ID")
    ),
    responses(
        (status = 200, description = "Outstanding statement", body = crate::ApiResponse<crate::services::payments::OutstandingStatement>)
    ),
    tag = "Payments"
)]
async fn compute_outstanding(
    State(state): State<AppState>,
    Path(counterparty_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OutstandingStatement>>, ServiceError> {
    let statement = state
        .services
        .payments
        .compute_outstanding(counterparty_id)
        .await?;
    Ok(Json(ApiResponse::success(statement)))
}

/// Create a payment claiming the selected bills and returns
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentPayload,
    responses(
        (status = 201, description = "Payment created", body = crate::ApiResponse<crate::services::payments::PaymentDetail>),
        (status = 409, description = "A selection is already claimed", body = crate::errors::ErrorResponse),
        (status = 422, description = "A selection does not exist or belongs elsewhere", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentPayload>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentDetail>>), ServiceError> {
    let request = CreatePaymentRequest {
        counterparty_id: payload.counterparty_id,
        sold_bill_ids: payload.sold_bill_ids,
        return_ids: payload.return_ids,
        hardcopy_bill_number: payload.hardcopy_bill_number,
        payment_date: payload.payment_date,
        created_by: payload.created_by,
    };

    let payment = state.services.payments.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

/// Replace a payment's selection, releasing the old claims atomically
#[utoipa::path(
    put,
    path = "/api/v1/payments/:payment_id",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    request_body = UpdatePaymentPayload,
    responses(
        (status = 200, description = "Payment updated", body = crate::ApiResponse<crate::services::payments::PaymentDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "A selection is already claimed", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn update_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentPayload>,
) -> Result<Json<ApiResponse<PaymentDetail>>, ServiceError> {
    let request = UpdatePaymentRequest {
        sold_bill_ids: payload.sold_bill_ids,
        return_ids: payload.return_ids,
        hardcopy_bill_number: payload.hardcopy_bill_number,
        payment_date: payload.payment_date,
    };

    let payment = state
        .services
        .payments
        .update_payment(payment_id, request)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Get a payment with its claimed records
#[utoipa::path(
    get,
    path = "/api/v1/payments/:payment_id",
    params(
        ("payment_id" = Uuid, Path, description = "Payment ID")
    ),
    responses(
        (status = 200, description = "Payment detail", body = crate::ApiResponse<crate::services::payments::PaymentDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentDetail>>, ServiceError> {
    let payment = state.services.payments.get_payment(payment_id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// List payments with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(
        PaginationParams,
        PaymentListFilter
    ),
    responses(
        (status = 200, description = "Payments", body = crate::ApiResponse<crate::PaginatedResponse<crate::services::payments::PaymentSummary>>)
    ),
    tag = "Payments"
)]
async fn list_payments(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<PaymentListFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<PaymentSummary>>>, ServiceError> {
    let (payments, total) = state
        .services
        .payments
        .list_payments(filter.counterparty_id, params.page, params.per_page)
        .await?;

    let response = PaginatedResponse {
        items: payments,
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: total.div_ceil(params.per_page),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Payment routes. Payments are append/replace only: there is no delete
/// route, matching the audit-trail constraint of the reconciliation
/// domain.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment))
        .route("/", get(list_payments))
        .route("/outstanding/:counterparty_id", get(compute_outstanding))
        .route("/:payment_id", get(get_payment))
        .route("/:payment_id", put(update_payment))
}
