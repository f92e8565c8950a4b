use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    stock_batch::Branch,
    transport::{self, TransportStatus},
    transport_item,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::allocation;
use crate::services::batch_ledger::{self, BatchKey, BatchLocks};

const MAX_CONFLICT_RETRIES: usize = 3;

/// One requested line of a shipment; the engine explodes it into the
/// batches it actually drew from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportLineInput {
    pub barcode: String,
    pub quantity: i32,
    pub net_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct SendTransportRequest {
    pub from_branch: Branch,
    pub to_branch: Branch,
    pub sender_id: Uuid,
    pub notes: Option<String>,
    pub items: Vec<TransportLineInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDecision {
    Received,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransportItemDetail {
    pub barcode: String,
    pub quantity: i32,
    pub net_price: Decimal,
    pub out_price: Decimal,
    pub expire_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransportDetail {
    pub id: Uuid,
    pub from_branch: String,
    pub to_branch: String,
    pub status: String,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub receiver_id: Option<Uuid>,
    pub received_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub receiver_notes: Option<String>,
    pub items: Vec<TransportItemDetail>,
}

impl TransportDetail {
    fn from_parts(transport: transport::Model, items: Vec<transport_item::Model>) -> Self {
        Self {
            id: transport.id,
            from_branch: transport.from_branch,
            to_branch: transport.to_branch,
            status: transport.status,
            sender_id: transport.sender_id,
            sent_at: transport.sent_at,
            receiver_id: transport.receiver_id,
            received_at: transport.received_at,
            notes: transport.notes,
            receiver_notes: transport.receiver_notes,
            items: items
                .into_iter()
                .map(|item| TransportItemDetail {
                    barcode: item.barcode,
                    quantity: item.quantity,
                    net_price: item.net_price,
                    out_price: item.out_price,
                    expire_date: item.expire_date,
                })
                .collect(),
        }
    }
}

/// Moves stock between branch ledgers through the
/// pending → received | rejected state machine. Stock leaves the origin
/// on send; the destination is credited (or the origin restored) only on
/// the receiver's decision.
#[derive(Clone)]
pub struct TransportService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    locks: Arc<BatchLocks>,
}

impl TransportService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, locks: Arc<BatchLocks>) -> Self {
        Self {
            db,
            event_sender,
            locks,
        }
    }

    /// Deducts every line from the origin ledger and creates a pending
    /// transport. No partial shipments: one failing line aborts the whole
    /// send.
    #[instrument(skip(self, req), fields(from = %req.from_branch, to = %req.to_branch))]
    pub async fn send(&self, req: SendTransportRequest) -> Result<TransportDetail, ServiceError> {
        if req.from_branch == req.to_branch {
            return Err(ServiceError::ValidationError(
                "transport origin and destination must differ".to_string(),
            ));
        }
        if req.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a transport needs at least one item".to_string(),
            ));
        }
        for item in &req.items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "transport quantity must be positive, got {} for {}",
                    item.quantity, item.barcode
                )));
            }
        }

        let from = req.from_branch.to_string();
        let _guards = self
            .locks
            .acquire(
                req.items
                    .iter()
                    .map(|i| batch_ledger::lock_key(&i.barcode, &from, i.net_price)),
            )
            .await;

        let mut attempt = 0;
        let detail = loop {
            match self.try_send(&req).await {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying transport send after conflict");
                }
                other => break other?,
            }
        };

        info!(transport_id = %detail.id, "transport sent");
        self.event_sender
            .send(Event::TransportSent {
                transport_id: detail.id,
                from_branch: detail.from_branch.clone(),
                to_branch: detail.to_branch.clone(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_send(&self, req: &SendTransportRequest) -> Result<TransportDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let transport = transport::ActiveModel {
            id: Set(Uuid::new_v4()),
            from_branch: Set(req.from_branch.to_string()),
            to_branch: Set(req.to_branch.to_string()),
            status: Set(TransportStatus::Pending.as_str().to_string()),
            sender_id: Set(req.sender_id),
            sent_at: Set(Utc::now()),
            receiver_id: Set(None),
            received_at: Set(None),
            notes: Set(req.notes.clone()),
            receiver_notes: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::from_db)?;

        let mut items = Vec::new();
        for line in &req.items {
            let deductions = allocation::allocate(
                &txn,
                &line.barcode,
                req.from_branch,
                line.net_price,
                line.quantity,
            )
            .await?;
            for deduction in deductions {
                let item = transport_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    transport_id: Set(transport.id),
                    barcode: Set(deduction.batch.barcode.clone()),
                    quantity: Set(deduction.quantity),
                    net_price: Set(deduction.batch.net_price),
                    out_price: Set(deduction.batch.out_price),
                    expire_date: Set(deduction.batch.expire_date),
                }
                .insert(&txn)
                .await
                .map_err(ServiceError::from_db)?;
                items.push(item);
            }
        }

        txn.commit().await.map_err(ServiceError::from_db)?;
        Ok(TransportDetail::from_parts(transport, items))
    }

    /// Settles a pending transport: `received` credits the destination
    /// ledger, `rejected` puts the stock back where it came from. A
    /// transport in a terminal state cannot be settled again.
    #[instrument(skip(self, receiver_notes))]
    pub async fn receive(
        &self,
        transport_id: Uuid,
        receiver_id: Uuid,
        decision: TransportDecision,
        receiver_notes: Option<String>,
    ) -> Result<TransportDetail, ServiceError> {
        let (transport, items) = self.load_with_items(transport_id).await?;

        // The ledger that the decision will touch
        let target_branch = match decision {
            TransportDecision::Received => transport.to_branch.clone(),
            TransportDecision::Rejected => transport.from_branch.clone(),
        };
        let mut keys: Vec<String> = vec![format!("transport|{}", transport_id)];
        keys.extend(
            items
                .iter()
                .map(|i| batch_ledger::lock_key(&i.barcode, &target_branch, i.net_price)),
        );
        let _guards = self.locks.acquire(keys).await;

        let mut attempt = 0;
        let detail = loop {
            match self
                .try_receive(transport_id, receiver_id, decision, receiver_notes.clone())
                .await
            {
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "retrying transport settlement after conflict");
                }
                other => break other?,
            }
        };

        let event = match decision {
            TransportDecision::Received => Event::TransportReceived { transport_id },
            TransportDecision::Rejected => Event::TransportRejected { transport_id },
        };
        self.event_sender
            .send(event)
            .await
            .map_err(ServiceError::EventError)?;

        Ok(detail)
    }

    async fn try_receive(
        &self,
        transport_id: Uuid,
        receiver_id: Uuid,
        decision: TransportDecision,
        receiver_notes: Option<String>,
    ) -> Result<TransportDetail, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::from_db)?;

        let transport = transport::Entity::find_by_id(transport_id)
            .one(&txn)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("transport {} not found", transport_id))
            })?;

        let status = TransportStatus::from_str(&transport.status).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "transport {} has unknown status {}",
                transport_id, transport.status
            ))
        })?;
        if status != TransportStatus::Pending {
            return Err(ServiceError::InvalidStateTransition(format!(
                "transport {} is already {}",
                transport_id, transport.status
            )));
        }

        let items = transport_item::Entity::find()
            .filter(transport_item::Column::TransportId.eq(transport_id))
            .all(&txn)
            .await
            .map_err(ServiceError::from_db)?;

        let credit_branch = match decision {
            TransportDecision::Received => transport.to_branch.clone(),
            TransportDecision::Rejected => transport.from_branch.clone(),
        };
        for item in &items {
            let key = BatchKey {
                barcode: item.barcode.clone(),
                branch: credit_branch.clone(),
                net_price: item.net_price,
                out_price: item.out_price,
                expire_date: item.expire_date,
            };
            batch_ledger::adjust_quantity(&txn, &key, item.quantity).await?;
        }

        let new_status = match decision {
            TransportDecision::Received => TransportStatus::Received,
            TransportDecision::Rejected => TransportStatus::Rejected,
        };
        let mut active: transport::ActiveModel = transport.into();
        active.status = Set(new_status.as_str().to_string());
        active.receiver_id = Set(Some(receiver_id));
        active.received_at = Set(Some(Utc::now()));
        active.receiver_notes = Set(receiver_notes);
        let transport = active.update(&txn).await.map_err(ServiceError::from_db)?;

        txn.commit().await.map_err(ServiceError::from_db)?;
        info!(
            transport_id = %transport_id,
            status = new_status.as_str(),
            "transport settled"
        );

        Ok(TransportDetail::from_parts(transport, items))
    }

    /// Gets a transport with its items.
    #[instrument(skip(self))]
    pub async fn get_transport(&self, transport_id: Uuid) -> Result<TransportDetail, ServiceError> {
        let (transport, items) = self.load_with_items(transport_id).await?;
        Ok(TransportDetail::from_parts(transport, items))
    }

    /// Lists transports, optionally filtered by branch (either side) and
    /// status.
    #[instrument(skip(self))]
    pub async fn list_transports(
        &self,
        branch: Option<Branch>,
        status: Option<TransportStatus>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<TransportDetail>, u64), ServiceError> {
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

        let mut query = transport::Entity::find().order_by_desc(transport::Column::SentAt);
        if let Some(branch) = branch {
            let name = branch.to_string();
            query = query.filter(
                sea_orm::Condition::any()
                    .add(transport::Column::FromBranch.eq(name.clone()))
                    .add(transport::Column::ToBranch.eq(name)),
            );
        }
        if let Some(status) = status {
            query = query.filter(transport::Column::Status.eq(status.as_str()));
        }

        let paginator = query.paginate(db, limit);
        let total = paginator.num_items().await.map_err(ServiceError::from_db)?;
        let transports = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::from_db)?;

        let mut details = Vec::with_capacity(transports.len());
        for transport in transports {
            let items = transport_item::Entity::find()
                .filter(transport_item::Column::TransportId.eq(transport.id))
                .all(db)
                .await
                .map_err(ServiceError::from_db)?;
            details.push(TransportDetail::from_parts(transport, items));
        }

        Ok((details, total))
    }

    async fn load_with_items(
        &self,
        transport_id: Uuid,
    ) -> Result<(transport::Model, Vec<transport_item::Model>), ServiceError> {
        let db = &*self.db;
        let transport = transport::Entity::find_by_id(transport_id)
            .one(db)
            .await
            .map_err(ServiceError::from_db)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("transport {} not found", transport_id))
            })?;
        let items = transport_item::Entity::find()
            .filter(transport_item::Column::TransportId.eq(transport_id))
            .all(db)
            .await
            .map_err(ServiceError::from_db)?;
        Ok((transport, items))
    }
}
