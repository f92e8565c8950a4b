use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::entities::stock_batch::{self, Branch, Entity as StockBatchEntity};
use crate::errors::ServiceError;
use crate::services::batch_ledger::{self, BatchKey};

/// One slice taken out of one batch while satisfying a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchDeduction {
    pub batch: BatchKey,
    pub quantity: i32,
}

/// Deducts `quantity` units of `barcode` from `branch`, matching
/// `net_price` exactly and draining the soonest-expiring batches first
/// (undated batches last, to minimize spoilage loss). Returns one
/// `BatchDeduction` per batch touched.
///
/// All-or-nothing: when the matching batches cannot cover the request,
/// the call fails with `InsufficientStock` and the caller's transaction
/// discards any partial writes.
pub async fn allocate<C: ConnectionTrait>(
    conn: &C,
    barcode: &str,
    branch: Branch,
    net_price: Decimal,
    quantity: i32,
) -> Result<Vec<BatchDeduction>, ServiceError> {
    if quantity < 0 {
        return Err(ServiceError::ValidationError(format!(
            "allocation quantity must not be negative, got {}",
            quantity
        )));
    }
    if quantity == 0 {
        return Ok(Vec::new());
    }

    let mut batches = StockBatchEntity::find()
        .filter(stock_batch::Column::Barcode.eq(barcode))
        .filter(stock_batch::Column::Branch.eq(branch.to_string()))
        .filter(stock_batch::Column::NetPrice.eq(net_price))
        .filter(stock_batch::Column::Quantity.gt(0))
        .all(conn)
        .await
        .map_err(ServiceError::from_db)?;
    batches.sort_by_key(|b| b.expire_date.unwrap_or(NaiveDate::MAX));

    let available: i64 = batches.iter().map(|b| b.quantity as i64).sum();
    if available < quantity as i64 {
        return Err(ServiceError::InsufficientStock(format!(
            "{} units of {} available at {} for price {}, {} requested",
            available, barcode, branch, net_price, quantity
        )));
    }

    let mut remaining = quantity;
    let mut deductions = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.quantity);
        let key = BatchKey::from(&batch);
        batch_ledger::adjust_quantity(conn, &key, -take).await?;
        deductions.push(BatchDeduction {
            batch: key,
            quantity: take,
        });
        remaining -= take;
    }

    debug!(
        barcode,
        %branch,
        quantity,
        batches_touched = deductions.len(),
        "allocated stock"
    );

    Ok(deductions)
}

/// Reverses a prior allocation exactly, batch by batch. Batches whose
/// rows were removed at zero quantity are recreated from the recorded
/// keys.
pub async fn restore<C: ConnectionTrait>(
    conn: &C,
    deductions: &[BatchDeduction],
) -> Result<(), ServiceError> {
    for deduction in deductions {
        batch_ledger::adjust_quantity(conn, &deduction.batch, deduction.quantity).await?;
    }
    Ok(())
}
