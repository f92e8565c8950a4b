use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{parse_branch, PaginationParams};
use crate::entities::stock_batch;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState, PaginatedResponse};

/// One ledger row as shown on the stock screens.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchSummary {
    pub id: Uuid,
    pub barcode: String,
    pub branch: String,
    pub net_price: Decimal,
    pub out_price: Decimal,
    pub quantity: i32,
    pub expire_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl From<stock_batch::Model> for BatchSummary {
    fn from(batch: stock_batch::Model) -> Self {
        Self {
            id: batch.id,
            barcode: batch.barcode,
            branch: batch.branch,
            net_price: batch.net_price,
            out_price: batch.out_price,
            quantity: batch.quantity,
            expire_date: batch.expire_date,
            created_at: batch.created_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BranchStockFilter {
    /// Narrow the listing to one barcode
    pub barcode: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BatchPriceFilter {
    /// Narrow matches to one acquisition price
    pub net_price: Option<Decimal>,
}

/// List all batches held at a branch
#[utoipa::path(
    get,
    path = "/api/v1/stock/:branch",
    params(
        ("branch" = String, Path, description = "Branch name"),
        PaginationParams,
        BranchStockFilter
    ),
    responses(
        (status = 200, description = "Batches at the branch", body = crate::ApiResponse<crate::PaginatedResponse<BatchSummary>>),
        (status = 400, description = "Unknown branch", body = crate::errors::ErrorResponse)
    ),
    tag = "Stock"
)]
async fn list_branch_stock(
    State(state): State<AppState>,
    Path(branch): Path<String>,
    Query(params): Query<PaginationParams>,
    Query(filter): Query<BranchStockFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<BatchSummary>>>, ServiceError> {
    let branch = parse_branch(&branch)?;

    let (batches, total) = state
        .services
        .ledger
        .branch_stock(branch, filter.barcode, params.page, params.per_page)
        .await?;

    let response = PaginatedResponse {
        items: batches.into_iter().map(BatchSummary::from).collect(),
        total,
        page: params.page,
        limit: params.per_page,
        total_pages: total.div_ceil(params.per_page),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// List the batches of one item at a branch, soonest-expiring first
#[utoipa::path(
    get,
    path = "/api/v1/stock/:branch/:barcode",
    params(
        ("branch" = String, Path, description = "Branch name"),
        ("barcode" = String, Path, description = "Item barcode"),
        BatchPriceFilter
    ),
    responses(
        (status = 200, description = "Matching batches", body = crate::ApiResponse<Vec<BatchSummary>>),
        (status = 400, description = "Unknown branch", body = crate::errors::ErrorResponse)
    ),
    tag = "Stock"
)]
async fn find_item_batches(
    State(state): State<AppState>,
    Path((branch, barcode)): Path<(String, String)>,
    Query(filter): Query<BatchPriceFilter>,
) -> Result<Json<ApiResponse<Vec<BatchSummary>>>, ServiceError> {
    let branch = parse_branch(&branch)?;

    let batches = state
        .services
        .ledger
        .find_batches(&barcode, branch, filter.net_price)
        .await?;

    Ok(Json(ApiResponse::success(
        batches.into_iter().map(BatchSummary::from).collect(),
    )))
}

/// Stock routes
pub fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/:branch", get(list_branch_stock))
        .route("/:branch/:barcode", get(find_item_batches))
}
