use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inter-branch stock movement. Stock leaves the origin ledger on
/// send and enters the destination ledger (or returns to the origin)
/// only when the receiving side decides.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transports")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
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
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transport_item::Entity")]
    TransportItems,
}

impl Related<super::transport_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TransportItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// `Pending` is the only initial state; `Received` and `Rejected` are
/// terminal. No other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    Pending,
    Received,
    Rejected,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportStatus::Pending => "pending",
            TransportStatus::Received => "received",
            TransportStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransportStatus::Pending),
            "received" => Some(TransportStatus::Received),
            "rejected" => Some(TransportStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportStatus::Received | TransportStatus::Rejected)
    }
}
