use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A settlement netting a counterparty's sold bills against their
/// returns. Payments are editable but never deletable, preserving the
/// audit trail.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub payment_number: i64,
    pub counterparty_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub sold_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub return_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub net_amount: Decimal,
    pub payment_date: NaiveDate,
    pub hardcopy_bill_number: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment_claim::Entity")]
    PaymentClaims,
}

impl Related<super::payment_claim::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentClaims.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
