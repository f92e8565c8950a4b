use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    batch_allocation, bill,
    bill::{BillKind, SalePaymentStatus},
    bill_item, return_line,
    stock_batch::Branch,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::allocation::{self, BatchDeduction};
use crate::services::batch_ledger::{self, BatchKey, BatchLocks};

/// Bounded transparent retries for lost races on batch rows or the
/// bill-number sequence.
const MAX_CONFLICT_RETRIES: usize = 3;

/// One line of a bill as submitted by a purchasing or selling screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillLineInput {
    pub barcode: String,
    pub name: String,
    pub quantity: i32,
    pub net_price: Decimal,
    pub out_price: Decimal,
    pub expire_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct CreatePurchaseBillRequest {
    pub company_id: Uuid,
    pub branch: Branch,
    pub bill_date: NaiveDate,
    pub is_consignment: bool,
    pub items: Vec<BillLineInput>,
}

#[derive(Debug, Clone)]
pub struct CreateSaleBillRequest {
    pub pharmacy_id: Uuid,
    pub branch: Branch,
    pub bill_date: NaiveDate,
    pub payment_status: SalePaymentStatus,
    pub items: Vec<BillLineInput>,
}

#[derive(Debug, Clone)]
pub struct ReturnLineInput {
    pub barcode: String,
    pub quantity: i32,
    pub return_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct ProcessReturnRequest {
    pub counterparty_id: Uuid,
    pub origin_bill_number: i64,
    pub items: Vec<ReturnLineInput>,
}

/// Bill header plus lines, as rendered by consuming screens.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillDetail {
    pub id: Uuid,
    pub bill_number: i64,
    pub kind: String,
    pub counterparty_id: Uuid,
    pub branch: String,
    pub bill_date: NaiveDate,
    pub payment_status: Option<String>,
    pub is_consignment: bool,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<BillLineDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillLineDetail {
    pub barcode: String,
    pub name: String,
    pub quantity: i32,
    pub net_price: Decimal,
    pub out_price: Decimal,
    pub expire_date: Option<NaiveDate>,
}

impl BillDetail {
    fn from_parts(bill: bill::Model, items: Vec<bill_item::Model>) -> Self {
        Self {
            id: bill.id,
            bill_number: bill.bill_number,
            kind: bill.kind,
            counterparty_id: bill.counterparty_id,
            branch: bill.branch,
            bill_date: bill.bill_date,
            payment_status: bill.payment_status,
            is_consignment: bill.is_consignment,
            total_amount: bill.total_amount,
            created_at: bill.created_at,
            updated_at: bill.updated_at,
            items: items
                .into_iter()
                .map(|item| BillLineDetail {
                    barcode: item.barcode,
                    name: item.name,
                    quantity: item.quantity,
                    net_price: item.net_price,
                    out_price: item.out_price,
                    expire_date: item.expire_date,
                })
                .collect(),
        }
    }
}

/// Bill header without lines, for list endpoints and statements.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillSummary {
    pub id: Uuid,
    pub bill_number: i64,
    pub kind: String,
    pub counterparty_id: Uuid,
    pub branch: String,
    pub bill_date: NaiveDate,
    pub payment_status: Option<String>,
    pub is_consignment: bool,
    pub total_amount: Decimal,
}

impl From<bill::Model> for BillSummary {
    fn from(bill: bill::Model) -> Self {
        Self {
            id: bill.id,
            bill_number: bill.bill_number,
            kind: bill.kind,
            counterparty_id: bill.counterparty_id,
            branch: bill.branch,
            bill_date: bill.bill_date,
            payment_status: bill.payment_status,
            is_consignment: bill.is_consignment,
            total_amount: bill.total_amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReturnSummary {
    pub id: Uuid,
    pub counterparty_id: Uuid,
    pub origin_bill_number: i64,
    pub barcode: String,
    pub name: String,
    pub branch: String,
    pub quantity: i32,
    pub return_price: Decimal,
    pub total_amount: Decimal,
    pub is_consignment: bool,
    pub created_at: DateTime<Utc>,
}

impl From<return_line::Model> for ReturnSummary {
    fn from(line: return_line::Model) -> Self {
        Self {
            id: line.id,
            counterparty_id: line.counterparty_id,
            origin_bill_number: line.origin_bill_number,
            barcode: line.barcode,
            name: line.name,
            branch: line.branch,
            quantity: line.quantity,
            return_price: line.return_price,
            total_amount: line.total_amount,
            is_consignment: line.is_consignment,
            created_at: line.created_at,
        }
    }
}

/// Creates, edits and deletes purchase/sale bills and records returns.
/// Every ledger effect happens inside one transaction per logical
/// operation, under the batch-group locks for the keys it touches.
#[derive(Clone)]
pub struct BillService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    locks: Arc<BatchLocks>,
}

impl BillService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, locks: Arc<BatchLocks>) -> Self {
        Self {
            db,
            event_sender,
            locks,
        }
    }

    /// Books purchased goods into the branch ledger and issues the bill.
    #[instrument(skip(self, req), fields(company_id = %req.company_id, branch = %req.branch))]
    pub async fn create_purchase_bill(
        &self,
        req: CreatePurchaseBillRequest,
    ) -> Result<BillDetail, ServiceError> {
        validate_items(&req.items)?;

        let branch = req.branch.to_string();
        let _guards = self
            .locks
            .acquire(
                req.items
                    .iter()
                    .map(|i| batch_ledger::lock_key(&i.barcode, &branch, i.net_price)),
            )
            .await;

        let mut attempt = 0;
        let detail = loop {
            match self.try_create_purchase_bill(&req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying purchase bill creation after conflict");
                }
                other => break other?,
            }
        };

        info!(bill_number = detail.bill_number, "purchase bill created");
        self.event_sender
            .send(Event::PurchaseBillCreated {
                bill_id: detail.id,
                bill_number: detail.bill_number,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_create_purchase_bill(
        &self,
        req: &CreatePurchaseBillRequest,
    ) -> Result<BillDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bill_number = next_bill_number(&txn).await?;
        let bill = bill::ActiveModel {
            id: Set(Uuid::new_v4()),
            bill_number: Set(bill_number),
            kind: Set(BillKind::Purchase.as_str().to_string()),
            counterparty_id: Set(req.company_id),
            branch: Set(req.branch.to_string()),
            bill_date: Set(req.bill_date),
            payment_status: Set(None),
            is_consignment: Set(req.is_consignment),
            total_amount: Set(purchase_total(&req.items)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_db)?;

        for item in &req.items {
            let key = line_batch_key(item, &bill.branch);
            batch_ledger::adjust_quantity(&txn, &key, item.quantity).await?;
        }

        let items = insert_items(&txn, bill.id, &req.items).await?;
        txn.commit().await.map_err(ServiceError::from_db)?;

        Ok(BillDetail::from_parts(bill, items))
    }

    /// Issues a sale bill, deducting stock FIFO-by-expiry at the exact
    /// net price of each line. Either every line allocates or the bill
    /// does not exist and the ledger is untouched.
    #[instrument(skip(self, req), fields(pharmacy_id = %req.pharmacy_id, branch = %req.branch))]
    pub async fn create_sale_bill(
        &self,
        req: CreateSaleBillRequest,
    ) -> Result<BillDetail, ServiceError> {
        validate_items(&req.items)?;

        let branch = req.branch.to_string();
        let _guards = self
            .locks
            .acquire(
                req.items
                    .iter()
                    .map(|i| batch_ledger::lock_key(&i.barcode, &branch, i.net_price)),
            )
            .await;

        let mut attempt = 0;
        let (detail, batches_touched) = loop {
            match self.try_create_sale_bill(&req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying sale bill creation after conflict");
                }
                other => break other?,
            }
        };

        info!(
            bill_number = detail.bill_number,
            batches_touched, "sale bill created"
        );
        self.event_sender
            .send(Event::SaleBillCreated {
                bill_id: detail.id,
                bill_number: detail.bill_number,
                batches_touched,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_create_sale_bill(
        &self,
        req: &CreateSaleBillRequest,
    ) -> Result<(BillDetail, usize), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bill_number = next_bill_number(&txn).await?;
        let bill = bill::ActiveModel {
            id: Set(Uuid::new_v4()),
            bill_number: Set(bill_number),
            kind: Set(BillKind::Sale.as_str().to_string()),
            counterparty_id: Set(req.pharmacy_id),
            branch: Set(req.branch.to_string()),
            bill_date: Set(req.bill_date),
            payment_status: Set(Some(req.payment_status.as_str().to_string())),
            is_consignment: Set(false),
            total_amount: Set(sale_total(&req.items)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_db)?;

        let mut batches_touched = 0;
        for item in &req.items {
            let deductions =
                allocation::allocate(&txn, &item.barcode, req.branch, item.net_price, item.quantity)
                    .await?;
            batches_touched += deductions.len();
            insert_allocations(&txn, bill.id, &deductions).await?;
        }

        let items = insert_items(&txn, bill.id, &req.items).await?;
        txn.commit().await.map_err(ServiceError::from_db)?;

        Ok((BillDetail::from_parts(bill, items), batches_touched))
    }

    /// Replaces a bill's item list. The old ledger effect is reversed and
    /// the new one applied inside a single transaction, so the ledger
    /// never reflects a state between the two. The bill number never
    /// changes.
    #[instrument(skip(self, new_items))]
    pub async fn edit_bill(
        &self,
        bill_number: i64,
        new_items: Vec<BillLineInput>,
    ) -> Result<BillDetail, ServiceError> {
        validate_items(&new_items)?;

        let (bill, old_items) = self.load_bill_with_items(bill_number).await?;

        let mut keys: Vec<String> = vec![bill_lock_key(bill_number)];
        keys.extend(
            old_items
                .iter()
                .map(|i| batch_ledger::lock_key(&i.barcode, &bill.branch, i.net_price)),
        );
        keys.extend(
            new_items
                .iter()
                .map(|i| batch_ledger::lock_key(&i.barcode, &bill.branch, i.net_price)),
        );
        let _guards = self.locks.acquire(keys).await;

        let mut attempt = 0;
        let detail = loop {
            match self.try_edit_bill(bill_number, &new_items).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying bill edit after conflict");
                }
                other => break other?,
            }
        };

        info!(bill_number, "bill edited");
        self.event_sender
            .send(Event::BillEdited {
                bill_id: detail.id,
                bill_number,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_edit_bill(
        &self,
        bill_number: i64,
        new_items: &[BillLineInput],
    ) -> Result<BillDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bill = find_bill(&txn, bill_number).await?;
        let kind = bill_kind(&bill)?;
        let old_items = bill_item::Entity::find()
            .filter(bill_item::Column::BillId.eq(bill.id))
            .all(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        ensure_covers_recorded_returns(&txn, bill_number, new_items).await?;

        match kind {
            BillKind::Sale => {
                let allocations = batch_allocation::Entity::find()
                    .filter(batch_allocation::Column::BillId.eq(bill.id))
                    .all(&txn)
                    .await
                    .map_err(ServiceError::from_db)?;
                allocation::restore(&txn, &deductions_from_rows(&allocations)).await?;
                batch_allocation::Entity::delete_many()
                    .filter(batch_allocation::Column::BillId.eq(bill.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::from_db)?;

                let branch = parse_branch(&bill.branch)?;
                for item in new_items {
                    let deductions = allocation::allocate(
                        &txn,
                        &item.barcode,
                        branch,
                        item.net_price,
                        item.quantity,
                    )
                    .await?;
                    insert_allocations(&txn, bill.id, &deductions).await?;
                }
            }
            BillKind::Purchase => {
                for item in &old_items {
                    let key = BatchKey {
                        barcode: item.barcode.clone(),
                        branch: bill.branch.clone(),
                        net_price: item.net_price,
                        out_price: item.out_price,
                        expire_date: item.expire_date,
                    };
                    batch_ledger::adjust_quantity(&txn, &key, -item.quantity).await?;
                }
                for item in new_items {
                    let key = line_batch_key(item, &bill.branch);
                    batch_ledger::adjust_quantity(&txn, &key, item.quantity).await?;
                }
            }
        }

        bill_item::Entity::delete_many()
            .filter(bill_item::Column::BillId.eq(bill.id))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;
        let items = insert_items(&txn, bill.id, new_items).await?;

        let total = match kind {
            BillKind::Purchase => purchase_total(new_items),
            BillKind::Sale => sale_total(new_items),
        };
        let mut active: bill::ActiveModel = bill.into();
        active.total_amount = Set(total);
        active.updated_at = Set(Some(Utc::now()));
        let bill = active.update(&txn).await.map_err(ServiceError::from_db)?;

        txn.commit().await.map_err(ServiceError::from_db)?;

        Ok(BillDetail::from_parts(bill, items))
    }

    /// Removes a bill, fully reversing its ledger effect. Fails when the
    /// booked stock has since been consumed or when returns reference
    /// the bill.
    #[instrument(skip(self))]
    pub async fn delete_bill(&self, bill_number: i64) -> Result<(), ServiceError> {
        let (bill, old_items) = self.load_bill_with_items(bill_number).await?;

        let mut keys: Vec<String> = vec![bill_lock_key(bill_number)];
        keys.extend(
            old_items
                .iter()
                .map(|i| batch_ledger::lock_key(&i.barcode, &bill.branch, i.net_price)),
        );
        let _guards = self.locks.acquire(keys).await;

        let mut attempt = 0;
        loop {
            match self.try_delete_bill(bill_number).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying bill deletion after conflict");
                }
                other => break other?,
            }
        }

        info!(bill_number, "bill deleted");
        self.event_sender
            .send(Event::BillDeleted { bill_number })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(())
    }

    async fn try_delete_bill(&self, bill_number: i64) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bill = find_bill(&txn, bill_number).await?;
        let kind = bill_kind(&bill)?;

        let returns = return_line::Entity::find()
            .filter(return_line::Column::OriginBillNumber.eq(bill_number))
            .count(&txn)
            .await
            .map_err(ServiceError::from_db)?;
        if returns > 0 {
            return Err(ServiceError::ReferentialViolation(format!(
                "bill {} has {} recorded returns and cannot be deleted",
                bill_number, returns
            )));
        }

        match kind {
            BillKind::Sale => {
                let allocations = batch_allocation::Entity::find()
                    .filter(batch_allocation::Column::BillId.eq(bill.id))
                    .all(&txn)
                    .await
                    .map_err(ServiceError::from_db)?;
                allocation::restore(&txn, &deductions_from_rows(&allocations)).await?;
                batch_allocation::Entity::delete_many()
                    .filter(batch_allocation::Column::BillId.eq(bill.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::from_db)?;
            }
            BillKind::Purchase => {
                let items = bill_item::Entity::find()
                    .filter(bill_item::Column::BillId.eq(bill.id))
                    .all(&txn)
                    .await
                    .map_err(ServiceError::from_db)?;
                for item in &items {
                    let key = BatchKey {
                        barcode: item.barcode.clone(),
                        branch: bill.branch.clone(),
                        net_price: item.net_price,
                        out_price: item.out_price,
                        expire_date: item.expire_date,
                    };
                    batch_ledger::adjust_quantity(&txn, &key, -item.quantity).await?;
                }
            }
        }

        bill_item::Entity::delete_many()
            .filter(bill_item::Column::BillId.eq(bill.id))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;
        bill::Entity::delete_by_id(bill.id)
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        txn.commit().await.map_err(ServiceError::from_db)?;
        Ok(())
    }

    /// Books goods physically handed back against an issued bill. Caps
    /// each line at the quantity originally billed minus what was already
    /// returned for that (bill, barcode).
    #[instrument(skip(self, req), fields(origin_bill_number = req.origin_bill_number))]
    pub async fn process_return(
        &self,
        req: ProcessReturnRequest,
    ) -> Result<Vec<ReturnSummary>, ServiceError> {
        if req.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a return needs at least one item".to_string(),
            ));
        }
        for item in &req.items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "return quantity must be positive, got {} for {}",
                    item.quantity, item.barcode
                )));
            }
            if item.return_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "return price must not be negative for {}",
                    item.barcode
                )));
            }
        }

        let (bill, bill_items) = self.load_bill_with_items(req.origin_bill_number).await?;

        let mut keys: Vec<String> = vec![bill_lock_key(req.origin_bill_number)];
        keys.extend(
            bill_items
                .iter()
                .map(|i| batch_ledger::lock_key(&i.barcode, &bill.branch, i.net_price)),
        );
        let _guards = self.locks.acquire(keys).await;

        let mut attempt = 0;
        let summaries = loop {
            match self.try_process_return(&req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying return after conflict");
                }
                other => break other?,
            }
        };

        for summary in &summaries {
            self.event_sender
                .send(Event::ReturnRecorded {
                    return_id: summary.id,
                    origin_bill_number: summary.origin_bill_number,
                    quantity: summary.quantity,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(summaries)
    }

    async fn try_process_return(
        &self,
        req: &ProcessReturnRequest,
    ) -> Result<Vec<ReturnSummary>, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bill = find_bill(&txn, req.origin_bill_number).await.map_err(|e| match e {
            ServiceError::NotFound(_) => ServiceError::ReferentialViolation(format!(
                "origin bill {} does not exist",
                req.origin_bill_number
            )),
            other => other,
        })?;
        if bill.counterparty_id != req.counterparty_id {
            return Err(ServiceError::ReferentialViolation(format!(
                "bill {} does not belong to counterparty {}",
                req.origin_bill_number, req.counterparty_id
            )));
        }

        let bill_items = bill_item::Entity::find()
            .filter(bill_item::Column::BillId.eq(bill.id))
            .all(&txn)
            .await
            .map_err(ServiceError::from_db)?;
        let returned = returned_by_barcode(&txn, req.origin_bill_number).await?;

        let mut summaries = Vec::new();
        for item in &req.items {
            let matched = bill_items
                .iter()
                .find(|line| line.barcode == item.barcode)
                .ok_or_else(|| {
                    ServiceError::ReferentialViolation(format!(
                        "bill {} has no line for barcode {}",
                        req.origin_bill_number, item.barcode
                    ))
                })?;

            let billed: i32 = bill_items
                .iter()
                .filter(|line| line.barcode == item.barcode)
                .map(|line| line.quantity)
                .sum();
            let already = returned.get(&item.barcode).copied().unwrap_or(0)
                + summaries
                    .iter()
                    .filter(|s: &&ReturnSummary| s.barcode == item.barcode)
                    .map(|s| s.quantity)
                    .sum::<i32>();
            if item.quantity > billed - already {
                return Err(ServiceError::ReferentialViolation(format!(
                    "bill {} allows {} more units of {} to be returned, {} requested",
                    req.origin_bill_number,
                    billed - already,
                    item.barcode,
                    item.quantity
                )));
            }

            let key = BatchKey {
                barcode: matched.barcode.clone(),
                branch: bill.branch.clone(),
                net_price: matched.net_price,
                out_price: matched.out_price,
                expire_date: matched.expire_date,
            };
            batch_ledger::adjust_quantity(&txn, &key, item.quantity).await?;

            let line = return_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                counterparty_id: Set(req.counterparty_id),
                origin_bill_number: Set(req.origin_bill_number),
                barcode: Set(item.barcode.clone()),
                name: Set(matched.name.clone()),
                branch: Set(bill.branch.clone()),
                quantity: Set(item.quantity),
                return_price: Set(item.return_price),
                total_amount: Set(item.return_price * Decimal::from(item.quantity)),
                is_consignment: Set(bill.is_consignment),
                payment_status: Set(None),
                created_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::from_db)?;

            summaries.push(ReturnSummary::from(line));
        }

        txn.commit().await.map_err(ServiceError::from_db)?;
        info!(
            origin_bill_number = req.origin_bill_number,
            lines = summaries.len(),
            "return recorded"
        );
        Ok(summaries)
    }

    /// Gets a bill with its items by number.
    #[instrument(skip(self))]
    pub async fn get_bill(&self, bill_number: i64) -> Result<BillDetail, ServiceError> {
        let (bill, items) = self.load_bill_with_items(bill_number).await?;
        Ok(BillDetail::from_parts(bill, items))
    }

    /// Lists bills with pagination, optionally filtered by kind and
    /// counterparty.
    #[instrument(skip(self))]
    pub async fn list_bills(
        &self,
        kind: Option<BillKind>,
        counterparty_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<BillSummary>, u64), ServiceError> {
        validate_page(page, limit)?;
        let db = &*self.db;

        let mut query = bill::Entity::find().order_by_desc(bill::Column::CreatedAt);
        if let Some(kind) = kind {
            query = query.filter(bill::Column::Kind.eq(kind.as_str()));
        }
        if let Some(counterparty) = counterparty_id {
            query = query.filter(bill::Column::CounterpartyId.eq(counterparty));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::from_db)?;
        let bills = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::from_db)?;

        Ok((bills.into_iter().map(BillSummary::from).collect(), total))
    }

    /// Lists returns with pagination, optionally filtered by counterparty
    /// or origin bill.
    #[instrument(skip(self))]
    pub async fn list_returns(
        &self,
        counterparty_id: Option<Uuid>,
        origin_bill_number: Option<i64>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<ReturnSummary>, u64), ServiceError> {
        validate_page(page, limit)?;
        let db = &*self.db;

        let mut query = return_line::Entity::find().order_by_desc(return_line::Column::CreatedAt);
        if let Some(counterparty) = counterparty_id {
            query = query.filter(return_line::Column::CounterpartyId.eq(counterparty));
        }
        if let Some(number) = origin_bill_number {
            query = query.filter(return_line::Column::OriginBillNumber.eq(number));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::from_db)?;
        let lines = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::from_db)?;

        Ok((lines.into_iter().map(ReturnSummary::from).collect(), total))
    }

    async fn load_bill_with_items(
        &self,
        bill_number: i64,
    ) -> Result<(bill::Model, Vec<bill_item::Model>), ServiceError> {
        let db = &*self.db;
        let bill = find_bill(db, bill_number).await?;
        let items = bill_item::Entity::find()
            .filter(bill_item::Column::BillId.eq(bill.id))
            .all(db)
            .await
            .map_err(ServiceError::from_db)?;
        Ok((bill, items))
    }
}

fn validate_items(items: &[BillLineInput]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "a bill needs at least one item".to_string(),
        ));
    }
    for item in items {
        if item.barcode.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "item barcode must not be empty".to_string(),
            ));
        }
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "item quantity must be positive, got {} for {}",
                item.quantity, item.barcode
            )));
        }
        if item.net_price < Decimal::ZERO || item.out_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "item prices must not be negative for {}",
                item.barcode
            )));
        }
    }
    Ok(())
}

fn validate_page(page: u64, limit: u64) -> Result<(), ServiceError> {
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
    Ok(())
}

fn purchase_total(items: &[BillLineInput]) -> Decimal {
    items
        .iter()
        .map(|i| i.net_price * Decimal::from(i.quantity))
        .sum()
}

fn sale_total(items: &[BillLineInput]) -> Decimal {
    items
        .iter()
        .map(|i| i.out_price * Decimal::from(i.quantity))
        .sum()
}

fn line_batch_key(item: &BillLineInput, branch: &str) -> BatchKey {
    BatchKey {
        barcode: item.barcode.clone(),
        branch: branch.to_string(),
        net_price: item.net_price,
        out_price: item.out_price,
        expire_date: item.expire_date,
    }
}

fn bill_lock_key(bill_number: i64) -> String {
    format!("bill|{}", bill_number)
}

fn bill_kind(bill: &bill::Model) -> Result<BillKind, ServiceError> {
    BillKind::from_str(&bill.kind).ok_or_else(|| {
        ServiceError::InternalError(format!("bill {} has unknown kind {}", bill.bill_number, bill.kind))
    })
}

fn parse_branch(value: &str) -> Result<Branch, ServiceError> {
    value
        .parse()
        .map_err(|_| ServiceError::InternalError(format!("unknown branch {}", value)))
}

fn deductions_from_rows(rows: &[batch_allocation::Model]) -> Vec<BatchDeduction> {
    rows.iter()
        .map(|row| BatchDeduction {
            batch: BatchKey {
                barcode: row.barcode.clone(),
                branch: row.branch.clone(),
                net_price: row.net_price,
                out_price: row.out_price,
                expire_date: row.expire_date,
            },
            quantity: row.quantity,
        })
        .collect()
}

async fn find_bill<C: sea_orm::ConnectionTrait>(
    conn: &C,
    bill_number: i64,
) -> Result<bill::Model, ServiceError> {
    bill::Entity::find()
        .filter(bill::Column::BillNumber.eq(bill_number))
        .one(conn)
        .await
        .map_err(ServiceError::from_db)?
        .ok_or_else(|| ServiceError::NotFound(format!("bill {} not found", bill_number)))
}

async fn next_bill_number(txn: &DatabaseTransaction) -> Result<i64, ServiceError> {
    let last = bill::Entity::find()
        .order_by_desc(bill::Column::BillNumber)
        .one(txn)
        .await
        .map_err(ServiceError::from_db)?;
    Ok(last.map(|b| b.bill_number + 1).unwrap_or(1))
}

async fn insert_items(
    txn: &DatabaseTransaction,
    bill_id: Uuid,
    items: &[BillLineInput],
) -> Result<Vec<bill_item::Model>, ServiceError> {
    let mut models = Vec::with_capacity(items.len());
    for item in items {
        let model = bill_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            bill_id: Set(bill_id),
            barcode: Set(item.barcode.clone()),
            name: Set(item.name.clone()),
            quantity: Set(item.quantity),
            net_price: Set(item.net_price),
            out_price: Set(item.out_price),
            expire_date: Set(item.expire_date),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::from_db)?;
        models.push(model);
    }
    Ok(models)
}

async fn insert_allocations(
    txn: &DatabaseTransaction,
    bill_id: Uuid,
    deductions: &[BatchDeduction],
) -> Result<(), ServiceError> {
    for deduction in deductions {
        batch_allocation::ActiveModel {
            id: Set(Uuid::new_v4()),
            bill_id: Set(bill_id),
            barcode: Set(deduction.batch.barcode.clone()),
            branch: Set(deduction.batch.branch.clone()),
            net_price: Set(deduction.batch.net_price),
            out_price: Set(deduction.batch.out_price),
            expire_date: Set(deduction.batch.expire_date),
            quantity: Set(deduction.quantity),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::from_db)?;
    }
    Ok(())
}

async fn returned_by_barcode(
    txn: &DatabaseTransaction,
    bill_number: i64,
) -> Result<HashMap<String, i32>, ServiceError> {
    let lines = return_line::Entity::find()
        .filter(return_line::Column::OriginBillNumber.eq(bill_number))
        .all(txn)
        .await
        .map_err(ServiceError::from_db)?;

    let mut totals: HashMap<String, i32> = HashMap::new();
    for line in lines {
        *totals.entry(line.barcode).or_insert(0) += line.quantity;
    }
    Ok(totals)
}

/// Editing a bill below the quantity already returned against it would
/// let future returns exceed what was billed.
async fn ensure_covers_recorded_returns(
    txn: &DatabaseTransaction,
    bill_number: i64,
    new_items: &[BillLineInput],
) -> Result<(), ServiceError> {
    let returned = returned_by_barcode(txn, bill_number).await?;
    for (barcode, quantity) in &returned {
        let new_quantity: i32 = new_items
            .iter()
            .filter(|item| &item.barcode == barcode)
            .map(|item| item.quantity)
            .sum();
        if new_quantity < *quantity {
            return Err(ServiceError::ReferentialViolation(format!(
                "bill {} already has {} units of {} returned, new items carry only {}",
                bill_number, quantity, barcode, new_quantity
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(barcode: &str, quantity: i32) -> BillLineInput {
        BillLineInput {
            barcode: barcode.to_string(),
            name: "Paracetamol 500mg".to_string(),
            quantity,
            net_price: dec!(100),
            out_price: dec!(125),
            expire_date: None,
        }
    }

    #[test]
    fn totals_use_the_matching_price_side() {
        let items = vec![line("X1", 2), line("X2", 3)];
        assert_eq!(purchase_total(&items), dec!(500));
        assert_eq!(sale_total(&items), dec!(625));
    }

    #[test]
    fn item_validation_rejects_bad_lines() {
        assert!(validate_items(&[]).is_err());
        assert!(validate_items(&[line("X1", 0)]).is_err());
        assert!(validate_items(&[line("", 1)]).is_err());

        let mut negative = line("X1", 1);
        negative.net_price = dec!(-1);
        assert!(validate_items(&[negative]).is_err());

        assert!(validate_items(&[line("X1", 1)]).is_ok());
    }
}
