use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A quantity deducted from one stock batch on behalf of a sale bill.
/// Carries the full batch key so a later edit or delete can restore the
/// exact batches it drew from, even after zero-quantity rows are removed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batch_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub bill_id: Uuid,
    pub barcode: String,
    pub branch: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub net_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub out_price: Decimal,
    pub expire_date: Option<NaiveDate>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::bill::Entity",
        from = "Column::BillId",
        to = "super::bill::Column::Id"
    )]
    Bill,
}

impl Related<super::bill::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bill.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
