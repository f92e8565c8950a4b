use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::common::{parse_bill_kind, parse_branch, parse_sale_payment_status, validate_input, PaginationParams};
use crate::errors::ServiceError;
use crate::services::bills::{
    BillDetail, BillLineInput, BillSummary, CreatePurchaseBillRequest, CreateSaleBillRequest,
};
use crate::{ApiResponse, AppState, PaginatedResponse};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct BillLinePayload {
    /// Item barcode (stable item identity)
    #[validate(length(min = 1))]
    #[schema(example = "6297000112")]
    pub barcode: String,
    /// Item display name
    #[schema(example = "Paracetamol 500mg")]
    pub name: String,
    /// Units on this line
    #[schema(example = 20)]
    pub quantity: i32,
    /// Acquisition cost per unit
    #[schema(example = "250")]
    pub net_price: Decimal,
    /// Sale price per unit
    #[schema(example = "325")]
    pub out_price: Decimal,
    /// Expiry date; undated batches sort after dated ones
    pub expire_date: Option<NaiveDate>,
}

impl From<BillLinePayload> for BillLineInput {
    fn from(line: BillLinePayload) -> Self {
        Self {
            barcode: line.barcode,
            name: line.name,
            quantity: line.quantity,
            net_price: line.net_price,
            out_price: line.out_price,
            expire_date: line.expire_date,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePurchaseBillPayload {
    /// Supplying company
    pub company_id: Uuid,
    /// Branch receiving the goods
    #[schema(example = "Slemany")]
    pub branch: String,
    pub bill_date: NaiveDate,
    /// Consignment purchases carry no instant payment obligation
    #[serde(default)]
    pub is_consignment: bool,
    #[validate(length(min = 1))]
    pub items: Vec<BillLinePayload>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateSaleBillPayload {
    /// Buying pharmacy
    pub pharmacy_id: Uuid,
    /// Branch the stock leaves from
    #[schema(example = "Slemany")]
    pub branch: String,
    pub bill_date: NaiveDate,
    /// unpaid, paid or cash
    #[schema(example = "unpaid")]
    pub payment_status: String,
    #[validate(length(min = 1))]
    pub items: Vec<BillLinePayload>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct EditBillPayload {
    #[validate(length(min = 1))]
    pub items: Vec<BillLinePayload>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BillListFilter {
    /// purchase or sale
    pub kind: Option<String>,
    /// Company or pharmacy id
    pub counterparty_id: Option<Uuid>,
}

/// Create a purchase bill, booking the goods into the branch ledger
#[utoipa::path(
    post,
    path = "/api/v1/bills/purchase",
    request_body = CreatePurchaseBillPayload,
    responses(
        (status = 201, description = "Bill created", body = crate::ApiResponse<crate::services::bills::BillDetail>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    tag = "Bills"
)]
async fn create_purchase_bill(
    State(state): State<AppState>,
    Json(payload): Json<CreatePurchaseBillPayload>,
) -> Result<(StatusCode, Json<ApiResponse<BillDetail>>), ServiceError> {
    validate_input(&payload)?;
    let branch = parse_branch(&payload.branch)?;

    let request = CreatePurchaseBillRequest {
        company_id: payload.company_id,
        branch,
        bill_date: payload.bill_date,
        is_consignment: payload.is_consignment,
        items: payload.items.into_iter().map(BillLineInput::from).collect(),
    };

    let bill = state.services.bills.create_purchase_bill(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(bill))))
}

/// Create a sale bill, deducting stock FIFO-by-expiry
#[utoipa::path(
    post,
    path = "/api/v1/bills/sale",
    request_body = CreateSaleBillPayload,
    responses(
        (status = 201, description = "Bill created", body = crate::ApiResponse<crate::services::bills::BillDetail>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Bills"
)]
async fn create_sale_bill(
    State(state): State<AppState>,
    Json(payload): Json<CreateSaleBillPayload>,
) -> Result<(StatusCode, Json<ApiResponse<BillDetail>>), ServiceError> {
    validate_input(&payload)?;
    let branch = parse_branch(&payload.branch)?;
    let payment_status = parse_sale_payment_status(&payload.payment_status)?;

    let request = CreateSaleBillRequest {
        pharmacy_id: payload.pharmacy_id,
        branch,
        bill_date: payload.bill_date,
        payment_status,
        items: payload.items.into_iter().map(BillLineInput::from).collect(),
    };

    let bill = state.services.bills.create_sale_bill(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(bill))))
}

/// Get a bill with its items
#[utoipa::path(
    get,
    path = "/api/v1/bills/:bill_number",
    params(
        ("bill_number" = i64, Path, description = "Bill number")
    ),
    responses(
        (status = 200, description = "Bill detail", body = crate::ApiResponse<crate::services::bills::BillDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Bills"
)]
async fn get_bill(
    State(state): State<AppState>,
    Path(bill_number): Path<i64>,
) -> Result<Json<ApiResponse<BillDetail>>, ServiceError> {
    let bill = state.services.bills.get_bill(bill_number).await?;
    Ok(Json(ApiResponse::success(bill)))
}

/// Replace a bill's item list, reversing the old ledger effect first
#[utoipa::path(
    put,
    path = "/api/v1/bills/:bill_number",
    params(
        ("bill_number" = i64, Path, description = "Bill number")
    ),
    request_body = EditBillPayload,
    responses(
        (status = 200, description = "Bill updated", body = crate::ApiResponse<crate::services::bills::BillDetail>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Reversal not possible", body = crate::errors::ErrorResponse)
    ),
    tag = "Bills"
)]
async fn edit_bill(
    State(state): State<AppState>,
    Path(bill_number): Path<i64>,
    Json(payload): Json<EditBillPayload>,
) -> Result<Json<ApiResponse<BillDetail>>, ServiceError> {
    validate_input(&payload)?;

    let items = payload.items.into_iter().map(BillLineInput::from).collect();
    let bill = state.services.bills.edit_bill(bill_number, items).await?;
    Ok(Json(ApiResponse::success(bill)))
}

/// Delete a bill, fully reversing its ledger effect
#[utoipa::path(
    delete,
    path = "/api/v1/bills/:bill_number",
    params(
        ("bill_number" = i64, Path, description = "Bill number")
    ),
    responses(
        (status = 204, description = "Bill deleted"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Reversal not possible", body = crate::errors::ErrorResponse)
    ),
    tag = "Bills"
)]
async fn delete_bill(
    State(state): State<AppState>,
    Path(bill_number): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    state.services.bills.delete_bill(bill_number).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List bills with pagination and filtering
#[utoipa::path(
    get,
    path = "/api/v1/bills",
    params(
        PaginationParams,
        BillListFilter
    ),
    responses(
        (status = 200, description = "Bills", body = crate::ApiResponse<crate::PaginatedResponse<crate::services::bills::BillSummary>>)
    ),
    tag = "Bills"
)]
async fn list_bills(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<BillListFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<BillSummary>>>, ServiceError> {
    let kind = match filter.kind {
        Some(value) => Some(parse_bill_kind(&value)?),
        None => None,
    };

    let (bills, total) = state
        .services
        .bills
        .list_bills(kind, filter.counterparty_id, params.page, params.per_page)
        .await?;

    let response = PaginatedResponse {
        items: bills,
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: total.div_ceil(params.per_page),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Bill routes
pub fn bill_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_bills))
        .route("/purchase", post(create_purchase_bill))
        .route("/sale", post(create_sale_bill))
        .route("/:bill_number", get(get_bill))
        .route("/:bill_number", put(edit_bill))
        .route("/:bill_number", delete(delete_bill))
}
