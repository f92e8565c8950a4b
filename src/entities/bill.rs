use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A purchase or sale bill header. `bill_number` is assigned once on
/// creation and survives edits.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bills")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub bill_number: i64,
    pub kind: String,
    pub counterparty_id: Uuid,
    pub branch: String,
    pub bill_date: NaiveDate,
    /// Sale bills only: unpaid, paid, or cash.
    pub payment_status: Option<String>,
    /// Purchase bills only.
    pub is_consignment: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bill_item::Entity")]
    BillItems,
    #[sea_orm(has_many = "super::batch_allocation::Entity")]
    BatchAllocations,
}

impl Related<super::bill_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BillItems.def()
    }
}

impl Related<super::batch_allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BatchAllocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillKind {
    Purchase,
    Sale,
}

impl BillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillKind::Purchase => "purchase",
            BillKind::Sale => "sale",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "purchase" => Some(BillKind::Purchase),
            "sale" => Some(BillKind::Sale),
            _ => None,
        }
    }
}

/// Settlement state of a sale bill. `Cash` bills are settled at the
/// counter and never enter payment reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalePaymentStatus {
    Unpaid,
    Paid,
    Cash,
}

impl SalePaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalePaymentStatus::Unpaid => "unpaid",
            SalePaymentStatus::Paid => "paid",
            SalePaymentStatus::Cash => "cash",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "unpaid" => Some(SalePaymentStatus::Unpaid),
            "paid" => Some(SalePaymentStatus::Paid),
            "cash" => Some(SalePaymentStatus::Cash),
            _ => None,
        }
    }
}
