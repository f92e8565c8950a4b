use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Query;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    bill,
    bill::{BillKind, SalePaymentStatus},
    payment,
    payment_claim::{self, ClaimRecordType},
    return_line,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::bills::{BillSummary, ReturnSummary};

const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub counterparty_id: Uuid,
    pub sold_bill_ids: Vec<Uuid>,
    pub return_ids: Vec<Uuid>,
    pub hardcopy_bill_number: Option<String>,
    pub payment_date: NaiveDate,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct UpdatePaymentRequest {
    pub sold_bill_ids: Vec<Uuid>,
    pub return_ids: Vec<Uuid>,
    pub hardcopy_bill_number: Option<String>,
    pub payment_date: NaiveDate,
}

/// Sold bills and returns of one counterparty not yet held by any
/// payment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutstandingStatement {
    pub counterparty_id: Uuid,
    pub sold_bills: Vec<BillSummary>,
    pub returns: Vec<ReturnSummary>,
    pub sold_total: Decimal,
    pub return_total: Decimal,
    pub net_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSummary {
    pub id: Uuid,
    pub payment_number: i64,
    pub counterparty_id: Uuid,
    pub sold_total: Decimal,
    pub return_total: Decimal,
    pub net_amount: Decimal,
    pub payment_date: NaiveDate,
    pub hardcopy_bill_number: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<payment::Model> for PaymentSummary {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            payment_number: model.payment_number,
            counterparty_id: model.counterparty_id,
            sold_total: model.sold_total,
            return_total: model.return_total,
            net_amount: model.net_amount,
            payment_date: model.payment_date,
            hardcopy_bill_number: model.hardcopy_bill_number,
            created_by: model.created_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Payment header plus the claimed records, enough to render a printable
/// statement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: PaymentSummary,
    pub sold_bills: Vec<BillSummary>,
    pub returns: Vec<ReturnSummary>,
}

/// Nets a counterparty's outstanding sold bills against their returns
/// into a single payment, holding each selected record in the claim
/// index so nothing is ever paid twice. Payments are editable but not
/// deletable.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DbPool>,
    event_sender: EventSender,
    /// Claim-set mutations are serialized globally; reconciliation is a
    /// low-volume back-office operation.
    claim_guard: Arc<Mutex<()>>,
}

impl PaymentReconciler {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db,
            event_sender,
            claim_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Everything of the counterparty's that could go into a new
    /// payment: non-cash sold bills and returns with no claim on them.
    #[instrument(skip(self))]
    pub async fn compute_outstanding(
        &self,
        counterparty_id: Uuid,
    ) -> Result<OutstandingStatement, ServiceError> {
        let db = &*self.db;

        let sold_bills = bill::Entity::find()
            .filter(bill::Column::Kind.eq(BillKind::Sale.as_str()))
            .filter(bill::Column::CounterpartyId.eq(counterparty_id))
            .filter(bill::Column::PaymentStatus.ne(SalePaymentStatus::Cash.as_str()))
            .filter(
                bill::Column::Id.not_in_subquery(
                    Query::select()
                        .column(payment_claim::Column::RecordId)
                        .from(payment_claim::Entity)
                        .and_where(
                            payment_claim::Column::RecordType.eq(ClaimRecordType::Bill.as_str()),
                        )
                        .to_owned(),
                ),
            )
            .order_by_asc(bill::Column::BillNumber)
            .all(db)
            .await
            .map_err(ServiceError::from_db)?;

        let returns = return_line::Entity::find()
            .filter(return_line::Column::CounterpartyId.eq(counterparty_id))
            .filter(
                return_line::Column::Id.not_in_subquery(
                    Query::select()
                        .column(payment_claim::Column::RecordId)
                        .from(payment_claim::Entity)
                        .and_where(
                            payment_claim::Column::RecordType.eq(ClaimRecordType::Return.as_str()),
                        )
                        .to_owned(),
                ),
            )
            .order_by_asc(return_line::Column::CreatedAt)
            .all(db)
            .await
            .map_err(ServiceError::from_db)?;

        let sold_total: Decimal = sold_bills.iter().map(|b| b.total_amount).sum();
        let return_total: Decimal = returns.iter().map(|r| r.total_amount).sum();

        Ok(OutstandingStatement {
            counterparty_id,
            sold_bills: sold_bills.into_iter().map(BillSummary::from).collect(),
            returns: returns.into_iter().map(ReturnSummary::from).collect(),
            sold_total,
            return_total,
            net_amount: sold_total - return_total,
        })
    }

    /// Claims the selected records and records the netted payment.
    #[instrument(skip(self, req), fields(counterparty_id = %req.counterparty_id))]
    pub async fn create_payment(
        &self,
        req: CreatePaymentRequest,
    ) -> Result<PaymentDetail, ServiceError> {
        if req.sold_bill_ids.is_empty() && req.return_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "a payment needs at least one selected bill or return".to_string(),
            ));
        }

        let _guard = self.claim_guard.lock().await;

        let mut attempt = 0;
        let detail = loop {
            match self.try_create_payment(&req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying payment creation after conflict");
                }
                other => break other?,
            }
        };

        info!(
            payment_number = detail.payment.payment_number,
            net_amount = %detail.payment.net_amount,
            "payment created"
        );
        self.event_sender
            .send(Event::PaymentCreated {
                payment_id: detail.payment.id,
                payment_number: detail.payment.payment_number,
                net_amount: detail.payment.net_amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_create_payment(
        &self,
        req: &CreatePaymentRequest,
    ) -> Result<PaymentDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let bills = load_selected_bills(&txn, req.counterparty_id, &req.sold_bill_ids).await?;
        let returns = load_selected_returns(&txn, req.counterparty_id, &req.return_ids).await?;
        ensure_unclaimed(&txn, ClaimRecordType::Bill, &req.sold_bill_ids).await?;
        ensure_unclaimed(&txn, ClaimRecordType::Return, &req.return_ids).await?;

        let sold_total: Decimal = bills.iter().map(|b| b.total_amount).sum();
        let return_total: Decimal = returns.iter().map(|r| r.total_amount).sum();

        let payment_number = next_payment_number(&txn).await?;
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_number: Set(payment_number),
            counterparty_id: Set(req.counterparty_id),
            sold_total: Set(sold_total),
            return_total: Set(return_total),
            net_amount: Set(sold_total - return_total),
            payment_date: Set(req.payment_date),
            hardcopy_bill_number: Set(req.hardcopy_bill_number.clone()),
            created_by: Set(req.created_by),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_db)?;

        insert_claims(&txn, model.id, ClaimRecordType::Bill, &req.sold_bill_ids).await?;
        insert_claims(&txn, model.id, ClaimRecordType::Return, &req.return_ids).await?;
        mark_bills(&txn, &req.sold_bill_ids, SalePaymentStatus::Paid).await?;

        txn.commit().await.map_err(ServiceError::from_db)?;

        Ok(PaymentDetail {
            payment: PaymentSummary::from(model),
            sold_bills: bills
                .into_iter()
                .map(|mut b| {
                    // reflect the status the commit just wrote
                    b.payment_status = Some(SalePaymentStatus::Paid.as_str().to_string());
                    BillSummary::from(b)
                })
                .collect(),
            returns: returns.into_iter().map(ReturnSummary::from).collect(),
        })
    }

    /// Replaces a payment's selection. The old claims are released and
    /// the new set claimed in one transaction under the claim guard, so
    /// no record is ever held by two payments or stolen while
    /// transiently unclaimed.
    #[instrument(skip(self, req))]
    pub async fn update_payment(
        &self,
        payment_id: Uuid,
        req: UpdatePaymentRequest,
    ) -> Result<PaymentDetail, ServiceError> {
        if req.sold_bill_ids.is_empty() && req.return_ids.is_empty() {
            return Err(ServiceError::ValidationError(
                "a payment needs at least one selected bill or return".to_string(),
            ));
        }

        let _guard = self.claim_guard.lock().await;

        let mut attempt = 0;
        let detail = loop {
            match self.try_update_payment(payment_id, &req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying payment update after conflict");
                }
                other => break other?,
            }
        };

        info!(
            payment_number = detail.payment.payment_number,
            "payment updated"
        );
        self.event_sender
            .send(Event::PaymentUpdated {
                payment_id,
                payment_number: detail.payment.payment_number,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_update_payment(
        &self,
        payment_id: Uuid,
        req: &UpdatePaymentRequest,
    ) -> Result<PaymentDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let existing = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        // Release the old selection before validating the new one
        let old_claims = payment_claim::Entity::find()
            .filter(payment_claim::Column::PaymentId.eq(payment_id))
            .all(&txn)
            .await
            .map_err(ServiceError::from_db)?;
        let old_bill_ids: Vec<Uuid> = old_claims
            .iter()
            .filter(|c| c.record_type == ClaimRecordType::Bill.as_str())
            .map(|c| c.record_id)
            .collect();
        mark_bills(&txn, &old_bill_ids, SalePaymentStatus::Unpaid).await?;
        payment_claim::Entity::delete_many()
            .filter(payment_claim::Column::PaymentId.eq(payment_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        let bills = load_selected_bills(&txn, existing.counterparty_id, &req.sold_bill_ids).await?;
        let returns =
            load_selected_returns(&txn, existing.counterparty_id, &req.return_ids).await?;
        ensure_unclaimed(&txn, ClaimRecordType::Bill, &req.sold_bill_ids).await?;
        ensure_unclaimed(&txn, ClaimRecordType::Return, &req.return_ids).await?;

        let sold_total: Decimal = bills.iter().map(|b| b.total_amount).sum();
        let return_total: Decimal = returns.iter().map(|r| r.total_amount).sum();

        insert_claims(&txn, payment_id, ClaimRecordType::Bill, &req.sold_bill_ids).await?;
        insert_claims(&txn, payment_id, ClaimRecordType::Return, &req.return_ids).await?;
        mark_bills(&txn, &req.sold_bill_ids, SalePaymentStatus::Paid).await?;

        let mut active: payment::ActiveModel = existing.into();
        active.sold_total = Set(sold_total);
        active.return_total = Set(return_total);
        active.net_amount = Set(sold_total - return_total);
        active.payment_date = Set(req.payment_date);
        active.hardcopy_bill_number = Set(req.hardcopy_bill_number.clone());
        active.updated_at = Set(Some(Utc::now()));
        let model = active.update(&txn).await.map_err(ServiceError::from_db)?;

        txn.commit().await.map_err(ServiceError::from_db)?;

        Ok(PaymentDetail {
            payment: PaymentSummary::from(model),
            sold_bills: bills
                .into_iter()
                .map(|mut b| {
                    b.payment_status = Some(SalePaymentStatus::Paid.as_str().to_string());
                    BillSummary::from(b)
                })
                .collect(),
            returns: returns.into_iter().map(ReturnSummary::from).collect(),
        })
    }

    /// Gets a payment with its claimed records.
    #[instrument(skip(self))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentDetail, ServiceError> {
        let db = &*self.db;

        let model = payment::Entity::find_by_id(payment_id)
            .one(db)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        let claims = payment_claim::Entity::find()
            .filter(payment_claim::Column::PaymentId.eq(payment_id))
            .all(db)
            .await
            .map_err(ServiceError::from_db)?;
        let bill_ids: Vec<Uuid> = claims
            .iter()
            .filter(|c| c.record_type == ClaimRecordType::Bill.as_str())
            .map(|c| c.record_id)
            .collect();
        let return_ids: Vec<Uuid> = claims
            .iter()
            .filter(|c| c.record_type == ClaimRecordType::Return.as_str())
            .map(|c| c.record_id)
            .collect();

        let bills = if bill_ids.is_empty() {
            Vec::new()
        } else {
            bill::Entity::find()
                .filter(bill::Column::Id.is_in(bill_ids))
                .all(db)
                .await
                .map_err(ServiceError::from_db)?
        };
        let returns = if return_ids.is_empty() {
            Vec::new()
        } else {
            return_line::Entity::find()
                .filter(return_line::Column::Id.is_in(return_ids))
                .all(db)
                .await
                .map_err(ServiceError::from_db)?
        };

        Ok(PaymentDetail {
            payment: PaymentSummary::from(model),
            sold_bills: bills.into_iter().map(BillSummary::from).collect(),
            returns: returns.into_iter().map(ReturnSummary::from).collect(),
        })
    }

    /// Lists payments with pagination, optionally for one counterparty.
    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        counterparty_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<PaymentSummary>, u64), ServiceError> {
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

        let mut query = payment::Entity::find().order_by_desc(payment::Column::PaymentNumber);
        if let Some(counterparty) = counterparty_id {
            query = query.filter(payment::Column::CounterpartyId.eq(counterparty));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::from_db)?;
        let payments = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::from_db)?;

        Ok((
            payments.into_iter().map(PaymentSummary::from).collect(),
            total,
        ))
    }
}

async fn load_selected_bills(
    txn: &DatabaseTransaction,
    counterparty_id: Uuid,
    ids: &[Uuid],
) -> Result<Vec<bill::Model>, ServiceError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let bills = bill::Entity::find()
        .filter(bill::Column::Id.is_in(ids.iter().copied()))
        .all(txn)
        .await
        .map_err(ServiceError::from_db)?;
    if bills.len() != ids.len() {
        return Err(ServiceError::ReferentialViolation(
            "one or more selected bills do not exist".to_string(),
        ));
    }

    for bill in &bills {
        if bill.kind != BillKind::Sale.as_str() {
            return Err(ServiceError::ReferentialViolation(format!(
                "bill {} is not a sale bill",
                bill.bill_number
            )));
        }
        if bill.counterparty_id != counterparty_id {
            return Err(ServiceError::ReferentialViolation(format!(
                "bill {} belongs to another counterparty",
                bill.bill_number
            )));
        }
        if bill.payment_status.as_deref() == Some(SalePaymentStatus::Cash.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "bill {} was settled in cash and cannot be reconciled",
                bill.bill_number
            )));
        }
    }

    Ok(bills)
}

async fn load_selected_returns(
    txn: &DatabaseTransaction,
    counterparty_id: Uuid,
    ids: &[Uuid],
) -> Result<Vec<return_line::Model>, ServiceError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let returns = return_line::Entity::find()
        .filter(return_line::Column::Id.is_in(ids.iter().copied()))
        .all(txn)
        .await
        .map_err(ServiceError::from_db)?;
    if returns.len() != ids.len() {
        return Err(ServiceError::ReferentialViolation(
            "one or more selected returns do not exist".to_string(),
        ));
    }

    for line in &returns {
        if line.counterparty_id != counterparty_id {
            return Err(ServiceError::ReferentialViolation(format!(
                "return {} belongs to another counterparty",
                line.id
            )));
        }
    }

    Ok(returns)
}

async fn ensure_unclaimed(
    txn: &DatabaseTransaction,
    record_type: ClaimRecordType,
    ids: &[Uuid],
) -> Result<(), ServiceError> {
    if ids.is_empty() {
        return Ok(());
    }

    let held = payment_claim::Entity::find()
        .filter(payment_claim::Column::RecordType.eq(record_type.as_str()))
        .filter(payment_claim::Column::RecordId.is_in(ids.iter().copied()))
        .all(txn)
        .await
        .map_err(ServiceError::from_db)?;
    if let Some(claim) = held.first() {
        return Err(ServiceError::AlreadyClaimed(format!(
            "{} {} is already part of another payment",
            record_type.as_str(),
            claim.record_id
        )));
    }

    Ok(())
}

async fn insert_claims(
    txn: &DatabaseTransaction,
    payment_id: Uuid,
    record_type: ClaimRecordType,
    ids: &[Uuid],
) -> Result<(), ServiceError> {
    for record_id in ids {
        payment_claim::ActiveModel {
            id: Set(Uuid::new_v4()),
            payment_id: Set(payment_id),
            record_type: Set(record_type.as_str().to_string()),
            record_id: Set(*record_id),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::from_db)?;
    }
    Ok(())
}

async fn mark_bills(
    txn: &DatabaseTransaction,
    ids: &[Uuid],
    status: SalePaymentStatus,
) -> Result<(), ServiceError> {
    for id in ids {
        let Some(model) = bill::Entity::find_by_id(*id)
            .one(txn)
            .await
            .map_err(ServiceError::from_db)?
        else {
            continue;
        };
        // Cash bills keep their settlement state even if claims churn
        if model.payment_status.as_deref() == Some(SalePaymentStatus::Cash.as_str()) {
            continue;
        }
        let mut active: bill::ActiveModel = model.into();
        active.payment_status = Set(Some(status.as_str().to_string()));
        active.update(txn).await.map_err(ServiceError::from_db)?;
    }
    Ok(())
}

async fn next_payment_number(txn: &DatabaseTransaction) -> Result<i64, ServiceError> {
    let last = payment::Entity::find()
        .order_by_desc(payment::Column::PaymentNumber)
        .one(txn)
        .await
        .map_err(ServiceError::from_db)?;
    Ok(last.map(|p| p.payment_number + 1).unwrap_or(1))
}
