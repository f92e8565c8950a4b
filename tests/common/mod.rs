#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, Database, EntityTrait};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use pharmstock_api::db::{self, DbPool};
use pharmstock_api::entities::stock_batch;
use pharmstock_api::events::{process_events, EventSender};
use pharmstock_api::services::bills::BillLineInput;
use pharmstock_api::services::AppServices;

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
}

/// Fresh in-memory database with the full schema and one service graph.
/// A single pooled connection keeps every pooled checkout on the same
/// sqlite memory instance.
pub async fn setup() -> TestApp {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = Database::connect(opt).await.expect("connect to sqlite");
    db::run_migrations(&conn).await.expect("run migrations");

    let conn = Arc::new(conn);
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(process_events(rx));
    let sender = EventSender::new(tx);

    TestApp {
        services: AppServices::new(conn.clone(), sender),
        db: conn,
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn line(
    barcode: &str,
    quantity: i32,
    net_price: Decimal,
    out_price: Decimal,
    expire_date: Option<NaiveDate>,
) -> BillLineInput {
    BillLineInput {
        barcode: barcode.to_string(),
        name: format!("item {}", barcode),
        quantity,
        net_price,
        out_price,
        expire_date,
    }
}

pub fn some_user() -> Uuid {
    Uuid::new_v4()
}

/// Sum of all batch quantities for one barcode across every branch.
pub async fn total_units(db: &DbPool, barcode: &str) -> i64 {
    stock_batch::Entity::find()
        .all(db)
        .await
        .expect("query batches")
        .into_iter()
        .filter(|b| b.barcode == barcode)
        .map(|b| b.quantity as i64)
        .sum()
}

/// Sum of batch quantities for one barcode at one branch.
pub async fn branch_units(db: &DbPool, barcode: &str, branch: &str) -> i64 {
    stock_batch::Entity::find()
        .all(db)
        .await
        .expect("query batches")
        .into_iter()
        .filter(|b| b.barcode == barcode && b.branch == branch)
        .map(|b| b.quantity as i64)
        .sum()
}
