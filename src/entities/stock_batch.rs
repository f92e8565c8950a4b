use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// A quantity of one item held at one branch, acquired at one net price
/// and sold at one out price, with one expiry date. Rows that share the
/// (barcode, branch, net_price, out_price) key but differ in expiry are
/// distinct and are never merged.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub barcode: String,
    pub branch: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub net_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub out_price: Decimal,
    pub quantity: i32,
    pub expire_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Branches holding independent stock ledgers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Branch {
    Slemany,
    Erbil,
}
