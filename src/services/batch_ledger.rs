use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::stock_batch::{self, Branch, Entity as StockBatchEntity};
use crate::errors::ServiceError;

/// Full identity of one batch row. Distinct expiries under the same
/// (barcode, branch, net_price, out_price) are distinct batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchKey {
    pub barcode: String,
    pub branch: String,
    pub net_price: Decimal,
    pub out_price: Decimal,
    pub expire_date: Option<NaiveDate>,
}

impl From<&stock_batch::Model> for BatchKey {
    fn from(batch: &stock_batch::Model) -> Self {
        Self {
            barcode: batch.barcode.clone(),
            branch: batch.branch.clone(),
            net_price: batch.net_price,
            out_price: batch.out_price,
            expire_date: batch.expire_date,
        }
    }
}

impl BatchKey {
    /// Serialization key for the lock registry. Deliberately coarser than
    /// the row identity: allocation scans every expiry under a
    /// (barcode, branch, net_price) group, so the whole group shares one
    /// lock.
    pub fn lock_key(&self) -> String {
        lock_key(&self.barcode, &self.branch, self.net_price)
    }
}

pub fn lock_key(barcode: &str, branch: &str, net_price: Decimal) -> String {
    format!("{}|{}|{}", barcode, branch, net_price)
}

/// Registry of per-batch-group async locks. Every ledger-mutating
/// operation acquires the locks for the groups it will touch, in sorted
/// order, before opening its transaction; concurrent mutations of the
/// same group therefore never interleave their read-modify-write.
#[derive(Debug, Default)]
pub struct BatchLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires all requested keys, deduplicated and in sorted order so
    /// overlapping multi-item operations cannot deadlock each other.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = String>) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let entry = self
                .locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(entry.lock_owned().await);
        }
        guards
    }
}

/// Applies `delta` to the unique batch identified by `key`, creating the
/// row when it does not exist and the delta is positive, and deleting it
/// when the quantity reaches zero. Fails with `InsufficientStock` when
/// the resulting quantity would be negative. Runs on the caller's
/// connection so multi-item operations stay atomic.
pub async fn adjust_quantity<C: ConnectionTrait>(
    conn: &C,
    key: &BatchKey,
    delta: i32,
) -> Result<i32, ServiceError> {
    let mut query = StockBatchEntity::find()
        .filter(stock_batch::Column::Barcode.eq(key.barcode.as_str()))
        .filter(stock_batch::Column::Branch.eq(key.branch.as_str()))
        .filter(stock_batch::Column::NetPrice.eq(key.net_price))
        .filter(stock_batch::Column::OutPrice.eq(key.out_price));
    query = match key.expire_date {
        Some(date) => query.filter(stock_batch::Column::ExpireDate.eq(date)),
        None => query.filter(stock_batch::Column::ExpireDate.is_null()),
    };

    let existing = query.one(conn).await.map_err(ServiceError::from_db)?;

    match existing {
        Some(batch) => {
            let new_quantity = batch.quantity + delta;
            if new_quantity < 0 {
                return Err(ServiceError::InsufficientStock(format!(
                    "{} units of {} available at {}, {} requested",
                    batch.quantity, key.barcode, key.branch, -delta
                )));
            }
            if new_quantity == 0 {
                batch.delete(conn).await.map_err(ServiceError::from_db)?;
                debug!(barcode = %key.barcode, branch = %key.branch, "batch exhausted, row removed");
                Ok(0)
            } else {
                let mut active: stock_batch::ActiveModel = batch.into();
                active.quantity = Set(new_quantity);
                active.updated_at = Set(Some(Utc::now()));
                active.update(conn).await.map_err(ServiceError::from_db)?;
                Ok(new_quantity)
            }
        }
        None if delta > 0 => {
            let batch = stock_batch::ActiveModel {
                id: Set(Uuid::new_v4()),
                barcode: Set(key.barcode.clone()),
                branch: Set(key.branch.clone()),
                net_price: Set(key.net_price),
                out_price: Set(key.out_price),
                quantity: Set(delta),
                expire_date: Set(key.expire_date),
                created_at: Set(Utc::now()),
                updated_at: Set(None),
            };
            batch.insert(conn).await.map_err(ServiceError::from_db)?;
            Ok(delta)
        }
        None if delta == 0 => Ok(0),
        None => Err(ServiceError::InsufficientStock(format!(
            "no batch of {} at {} matching price {}",
            key.barcode, key.branch, key.net_price
        ))),
    }
}

/// Read-side view over the batch ledger.
#[derive(Clone)]
pub struct BatchLedgerService {
    db: Arc<DbPool>,
}

impl BatchLedgerService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Returns the batches matching (barcode, branch), optionally
    /// narrowed to one net price, ordered soonest-expiring first with
    /// undated batches last.
    #[instrument(skip(self))]
    pub async fn find_batches(
        &self,
        barcode: &str,
        branch: Branch,
        net_price: Option<Decimal>,
    ) -> Result<Vec<stock_batch::Model>, ServiceError> {
        let db = &*self.db;

        let mut query = StockBatchEntity::find()
            .filter(stock_batch::Column::Barcode.eq(barcode))
            .filter(stock_batch::Column::Branch.eq(branch.to_string()));
        if let Some(price) = net_price {
            query = query.filter(stock_batch::Column::NetPrice.eq(price));
        }

        let mut batches = query.all(db).await.map_err(ServiceError::from_db)?;
        batches.sort_by_key(|b| b.expire_date.unwrap_or(NaiveDate::MAX));

        Ok(batches)
    }

    /// Pages through all batches held at one branch, optionally filtered
    /// by barcode.
    #[instrument(skip(self))]
    pub async fn branch_stock(
        &self,
        branch: Branch,
        barcode: Option<String>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_batch::Model>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if limit == 0 || limit > 1000 {
            return Err(ServiceError::ValidationError(
                "Limit must be between 1 and 1000".to_string(),
            ));
        }

        let db = &*self.db;

        let mut query =
            StockBatchEntity::find().filter(stock_batch::Column::Branch.eq(branch.to_string()));
        if let Some(code) = barcode {
            query = query.filter(stock_batch::Column::Barcode.eq(code));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::from_db)?;
        let batches = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::from_db)?;

        Ok((batches, total))
    }
}
