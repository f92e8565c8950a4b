use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{validate_input, PaginationParams};
use crate::errors::ServiceError;
use crate::services::bills::{ProcessReturnRequest, ReturnLineInput, ReturnSummary};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReturnLinePayload {
    #[validate(length(min = 1))]
    #[schema(example = "6297000112")]
    pub barcode: String,
    /// Units physically coming back
    #[schema(example = 5)]
    pub quantity: i32,
    /// Credit per unit
    #[schema(example = "325")]
    pub return_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateReturnPayload {
    /// Counterparty handing the goods back
    pub counterparty_id: Uuid,
    /// Bill the goods were originally issued on
    #[schema(example = 1042)]
    pub origin_bill_number: i64,
    #[validate(length(min = 1))]
    pub items: Vec<ReturnLinePayload>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ReturnListFilter {
    pub counterparty_id: Option<Uuid>,
    pub origin_bill_number: Option<i64>,
}

/// Record returned goods against a bill, crediting the branch ledger
#[utoipa::path(
    post,
    path = "/api/v1/returns",
    request_body = CreateReturnPayload,
    responses(
        (status = 201, description = "Return recorded", body = crate::ApiResponse<Vec<crate::services::bills::ReturnSummary>>),
        (status = 422, description = "Origin bill missing or quantity exceeds returnable", body = crate::errors::ErrorResponse)
    ),
    tag = "Returns"
)]
async fn create_return(
    State(state): State<AppState>,
    Json(payload): Json<CreateReturnPayload>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<ReturnSummary>>>), ServiceError> {
    validate_input(&payload)?;

    let request = ProcessReturnRequest {
        counterparty_id: payload.counterparty_id,
        origin_bill_number: payload.origin_bill_number,
        items: payload
            .items
            .into_iter()
            .map(|line| ReturnLineInput {
                barcode: line.barcode,
                quantity: line.quantity,
                return_price: line.return_price,
            })
            .collect(),
    };

    let lines = state.services.bills.process_return(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(lines))))
}

/// List returns with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/returns",
    params(
        PaginationParams,
        ReturnListFilter
    ),
    responses(
        (status = 200, description = "Returns", body = crate::ApiResponse<crate::PaginatedResponse<crate::services::bills::ReturnSummary>>)
    ),
    tag = "Returns"
)]
async fn list_returns(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<ReturnListFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<ReturnSummary>>>, ServiceError> {
    let (lines, total) = state
        .services
        .bills
        .list_returns(
            filter.counterparty_id,
            filter.origin_bill_number,
            params.page,
            params.per_page,
        )
        .await?;

    let response = PaginatedResponse {
        items: lines,
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: total.div_ceil(params.per_page),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Return routes
pub fn return_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_return))
        .route("/", get(list_returns))
}
