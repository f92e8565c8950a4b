use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The claim index: one row per bill/return selected into a payment.
/// A unique index on (record_type, record_id) guarantees a record is
/// held by at most one payment at any time.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_claims")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_id: Uuid,
    pub record_type: String,
    pub record_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimRecordType {
    Bill,
    Return,
}

impl ClaimRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimRecordType::Bill => "bill",
            ClaimRecordType::Return => "return",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "bill" => Some(ClaimRecordType::Bill),
            "return" => Some(ClaimRecordType::Return),
            _ => None,
        }
    }
}
