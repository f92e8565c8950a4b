mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use pharmstock_api::entities::stock_batch::Branch;
use pharmstock_api::errors::ServiceError;
use pharmstock_api::services::allocation;
use pharmstock_api::services::batch_ledger::{self, BatchKey};

use common::{date, setup};

fn batch_key(barcode: &str, expire: Option<chrono::NaiveDate>) -> BatchKey {
    BatchKey {
        barcode: barcode.to_string(),
        branch: Branch::Slemany.to_string(),
        net_price: dec!(100),
        out_price: dec!(130),
        expire_date: expire,
    }
}

#[tokio::test]
async fn fifo_by_expiry_drains_soonest_batch_first() {
    let app = setup().await;
    let db = &*app.db;

    // qty 5 expiring 2025-01-01 and qty 10 expiring 2025-06-01
    batch_ledger::adjust_quantity(db, &batch_key("X1", Some(date(2025, 1, 1))), 5)
        .await
        .unwrap();
    batch_ledger::adjust_quantity(db, &batch_key("X1", Some(date(2025, 6, 1))), 10)
        .await
        .unwrap();

    let deductions = allocation::allocate(db, "X1", Branch::Slemany, dec!(100), 8)
        .await
        .unwrap();

    assert_eq!(deductions.len(), 2);
    assert_eq!(deductions[0].batch.expire_date, Some(date(2025, 1, 1)));
    assert_eq!(deductions[0].quantity, 5);
    assert_eq!(deductions[1].batch.expire_date, Some(date(2025, 6, 1)));
    assert_eq!(deductions[1].quantity, 3);

    // First batch is exhausted (removed at zero), second holds 7
    let remaining = app
        .services
        .ledger
        .find_batches("X1", Branch::Slemany, Some(dec!(100)))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].expire_date, Some(date(2025, 6, 1)));
    assert_eq!(remaining[0].quantity, 7);
}

#[tokio::test]
async fn request_smaller_than_first_batch_touches_only_it() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X2", Some(date(2025, 1, 1))), 5)
        .await
        .unwrap();
    batch_ledger::adjust_quantity(db, &batch_key("X2", Some(date(2025, 6, 1))), 10)
        .await
        .unwrap();
    batch_ledger::adjust_quantity(db, &batch_key("X2", Some(date(2026, 1, 1))), 10)
        .await
        .unwrap();

    let deductions = allocation::allocate(db, "X2", Branch::Slemany, dec!(100), 3)
        .await
        .unwrap();

    assert_eq!(deductions.len(), 1);
    assert_eq!(deductions[0].batch.expire_date, Some(date(2025, 1, 1)));
    assert_eq!(deductions[0].quantity, 3);
}

#[tokio::test]
async fn undated_batches_are_drained_last() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X3", None), 10).await.unwrap();
    batch_ledger::adjust_quantity(db, &batch_key("X3", Some(date(2025, 3, 1))), 4)
        .await
        .unwrap();

    let deductions = allocation::allocate(db, "X3", Branch::Slemany, dec!(100), 6)
        .await
        .unwrap();

    assert_eq!(deductions.len(), 2);
    assert_eq!(deductions[0].batch.expire_date, Some(date(2025, 3, 1)));
    assert_eq!(deductions[0].quantity, 4);
    assert_eq!(deductions[1].batch.expire_date, None);
    assert_eq!(deductions[1].quantity, 2);
}

#[tokio::test]
async fn price_must_match_exactly() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X4", None), 10).await.unwrap();

    // Same barcode and branch, different net price: nothing to allocate
    let result = allocation::allocate(db, "X4", Branch::Slemany, dec!(99), 1).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // The batch is untouched
    let remaining = app
        .services
        .ledger
        .find_batches("X4", Branch::Slemany, None)
        .await
        .unwrap();
    assert_eq!(remaining[0].quantity, 10);
}

#[tokio::test]
async fn branches_are_independent_ledgers() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X5", None), 10).await.unwrap();

    let result = allocation::allocate(db, "X5", Branch::Erbil, dec!(100), 1).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
}

#[tokio::test]
async fn zero_quantity_request_is_a_noop() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X6", None), 10).await.unwrap();

    let deductions = allocation::allocate(db, "X6", Branch::Slemany, dec!(100), 0)
        .await
        .unwrap();
    assert!(deductions.is_empty());

    let negative = allocation::allocate(db, "X6", Branch::Slemany, dec!(100), -1).await;
    assert_matches!(negative, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn restore_reverses_an_allocation_exactly() {
    let app = setup().await;
    let db = &*app.db;

    batch_ledger::adjust_quantity(db, &batch_key("X7", Some(date(2025, 1, 1))), 5)
        .await
        .unwrap();
    batch_ledger::adjust_quantity(db, &batch_key("X7", Some(date(2025, 6, 1))), 10)
        .await
        .unwrap();

    let deductions = allocation::allocate(db, "X7", Branch::Slemany, dec!(100), 8)
        .await
        .unwrap();
    allocation::restore(db, &deductions).await.unwrap();

    let batches = app
        .services
        .ledger
        .find_batches("X7", Branch::Slemany, None)
        .await
        .unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].expire_date, Some(date(2025, 1, 1)));
    assert_eq!(batches[0].quantity, 5);
    assert_eq!(batches[1].quantity, 10);
}

#[tokio::test]
async fn adjust_quantity_never_goes_negative() {
    let app = setup().await;
    let db = &*app.db;

    let key = batch_key("X8", None);
    batch_ledger::adjust_quantity(db, &key, 3).await.unwrap();

    let result = batch_ledger::adjust_quantity(db, &key, -4).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // Removing from a missing batch is also insufficient, not a crash
    let missing = batch_key("X9", None);
    let result = batch_ledger::adjust_quantity(db, &missing, -1).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
}
