mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use pharmstock_api::entities::bill::SalePaymentStatus;
use pharmstock_api::entities::stock_batch::Branch;
use pharmstock_api::errors::ServiceError;
use pharmstock_api::services::bills::{
    CreatePurchaseBillRequest, CreateSaleBillRequest, ProcessReturnRequest, ReturnLineInput,
};

use common::{branch_units, date, line, setup, total_units};

fn purchase(items: Vec<pharmstock_api::services::bills::BillLineInput>) -> CreatePurchaseBillRequest {
    CreatePurchaseBillRequest {
        company_id: Uuid::new_v4(),
        branch: Branch::Slemany,
        bill_date: date(2025, 2, 1),
        is_consignment: false,
        items,
    }
}

fn sale(items: Vec<pharmstock_api::services::bills::BillLineInput>) -> CreateSaleBillRequest {
    CreateSaleBillRequest {
        pharmacy_id: Uuid::new_v4(),
        branch: Branch::Slemany,
        bill_date: date(2025, 2, 10),
        payment_status: SalePaymentStatus::Unpaid,
        items,
    }
}

#[tokio::test]
async fn purchase_bill_books_batches_into_the_ledger() {
    let app = setup().await;

    let bill = app
        .services
        .bills
        .create_purchase_bill(purchase(vec![
            line("A1", 20, dec!(100), dec!(130), Some(date(2026, 1, 1))),
            line("A2", 5, dec!(40), dec!(55), None),
        ]))
        .await
        .unwrap();

    assert_eq!(bill.kind, "purchase");
    assert_eq!(bill.total_amount, dec!(2200));
    assert_eq!(branch_units(&app.db, "A1", "Slemany").await, 20);
    assert_eq!(branch_units(&app.db, "A2", "Slemany").await, 5);
}

#[tokio::test]
async fn repeated_purchases_of_one_batch_key_accumulate() {
    let app = setup().await;

    for _ in 0..2 {
        app.services
            .bills
            .create_purchase_bill(purchase(vec![line(
                "A3",
                10,
                dec!(100),
                dec!(130),
                Some(date(2026, 1, 1)),
            )]))
            .await
            .unwrap();
    }

    let batches = app
        .services
        .ledger
        .find_batches("A3", Branch::Slemany, None)
        .await
        .unwrap();
    assert_eq!(batches.len(), 1, "same key must merge into one batch row");
    assert_eq!(batches[0].quantity, 20);
}

#[tokio::test]
async fn bill_numbers_increase_and_survive_edits() {
    let app = setup().await;

    let first = app
        .services
        .bills
        .create_purchase_bill(purchase(vec![line("B1", 5, dec!(10), dec!(14), None)]))
        .await
        .unwrap();
    let second = app
        .services
        .bills
        .create_purchase_bill(purchase(vec![line("B2", 5, dec!(10), dec!(14), None)]))
        .await
        .unwrap();
    assert!(second.bill_number > first.bill_number);

    let edited = app
        .services
        .bills
        .edit_bill(first.bill_number, vec![line("B1", 7, dec!(10), dec!(14), None)])
        .await
        .unwrap();
    assert_eq!(edited.bill_number, first.bill_number);
    assert_eq!(branch_units(&app.db, "B1", "Slemany").await, 7);
}

#[tokio::test]
async fn sale_bill_creation_is_all_or_nothing() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(purchase(vec![
            line("C1", 10, dec!(100), dec!(130), None),
            line("C2", 2, dec!(50), dec!(70), None),
        ]))
        .await
        .unwrap();

    // First line fits, second asks for more C2 than exists
    let result = app
        .services
        .bills
        .create_sale_bill(sale(vec![
            line("C1", 5, dec!(100), dec!(130), None),
            line("C2", 3, dec!(50), dec!(70), None),
        ]))
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // The first line's deduction must have been rolled back
    assert_eq!(branch_units(&app.db, "C1", "Slemany").await, 10);
    assert_eq!(branch_units(&app.db, "C2", "Slemany").await, 2);

    // And no half-created bill is left behind
    let (bills, total) = app.services.bills.list_bills(None, None, 1, 50).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(bills[0].kind, "purchase");
}

#[tokio::test]
async fn editing_to_the_identical_items_changes_nothing() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(purchase(vec![
            line("D1", 5, dec!(100), dec!(130), Some(date(2025, 1, 1))),
            line("D1", 10, dec!(100), dec!(130), Some(date(2025, 6, 1))),
        ]))
        .await
        .unwrap();

    let items = vec![line("D1", 8, dec!(100), dec!(130), None)];
    let bill = app
        .services
        .bills
        .create_sale_bill(sale(items.clone()))
        .await
        .unwrap();

    let before = app
        .services
        .ledger
        .find_batches("D1", Branch::Slemany, None)
        .await
        .unwrap();

    app.services
        .bills
        .edit_bill(bill.bill_number, items)
        .await
        .unwrap();

    let after = app
        .services
        .ledger
        .find_batches("D1", Branch::Slemany, None)
        .await
        .unwrap();

    let snapshot = |batches: &[pharmstock_api::entities::stock_batch::Model]| {
        batches
            .iter()
            .map(|b| (b.expire_date, b.quantity))
            .collect::<Vec<_>>()
    };
    assert_eq!(snapshot(&before), snapshot(&after));
}

#[tokio::test]
async fn editing_a_sale_bill_restores_then_reallocates() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(purchase(vec![line("E1", 10, dec!(100), dec!(130), None)]))
        .await
        .unwrap();

    let bill = app
        .services
        .bills
        .create_sale_bill(sale(vec![line("E1", 6, dec!(100), dec!(130), None)]))
        .await
        .unwrap();
    assert_eq!(branch_units(&app.db, "E1", "Slemany").await, 4);

    app.services
        .bills
        .edit_bill(bill.bill_number, vec![line("E1", 2, dec!(100), dec!(130), None)])
        .await
        .unwrap();
    assert_eq!(branch_units(&app.db, "E1", "Slemany").await, 8);

    // Growing the bill beyond what the ledger holds fails whole, leaving
    // the pre-edit state intact
    let result = app
        .services
        .bills
        .edit_bill(bill.bill_number, vec![line("E1", 11, dec!(100), dec!(130), None)])
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(branch_units(&app.db, "E1", "Slemany").await, 8);
    let detail = app.services.bills.get_bill(bill.bill_number).await.unwrap();
    assert_eq!(detail.items[0].quantity, 2);
}

#[tokio::test]
async fn deleting_a_sale_bill_restores_the_ledger() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(purchase(vec![line("F1", 10, dec!(100), dec!(130), None)]))
        .await
        .unwrap();
    let bill = app
        .services
        .bills
        .create_sale_bill(sale(vec![line("F1", 7, dec!(100), dec!(130), None)]))
        .await
        .unwrap();
    assert_eq!(branch_units(&app.db, "F1", "Slemany").await, 3);

    app.services.bills.delete_bill(bill.bill_number).await.unwrap();
    assert_eq!(branch_units(&app.db, "F1", "Slemany").await, 10);

    let missing = app.services.bills.get_bill(bill.bill_number).await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn deleting_a_purchase_bill_fails_once_the_stock_was_sold() {
    let app = setup().await;

    let bill = app
        .services
        .bills
        .create_purchase_bill(purchase(vec![line("G1", 10, dec!(100), dec!(130), None)]))
        .await
        .unwrap();
    app.services
        .bills
        .create_sale_bill(sale(vec![line("G1", 8, dec!(100), dec!(130), None)]))
        .await
        .unwrap();

    // Only 2 of the 10 booked units remain; the reversal cannot proceed
    let result = app.services.bills.delete_bill(bill.bill_number).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    // Ledger untouched by the failed delete
    assert_eq!(branch_units(&app.db, "G1", "Slemany").await, 2);
}

#[tokio::test]
async fn returns_credit_the_ledger_and_are_capped_per_bill_line() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(purchase(vec![line("H1", 10, dec!(100), dec!(130), None)]))
        .await
        .unwrap();
    let pharmacy = Uuid::new_v4();
    let mut request = sale(vec![line("H1", 6, dec!(100), dec!(130), None)]);
    request.pharmacy_id = pharmacy;
    let bill = app.services.bills.create_sale_bill(request).await.unwrap();
    assert_eq!(branch_units(&app.db, "H1", "Slemany").await, 4);

    // Return 4 of the 6 sold units
    let lines = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: bill.bill_number,
            items: vec![ReturnLineInput {
                barcode: "H1".into(),
                quantity: 4,
                return_price: dec!(130),
            }],
        })
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].total_amount, dec!(520));
    assert_eq!(branch_units(&app.db, "H1", "Slemany").await, 8);

    // Only 2 remain returnable; 3 must be rejected and leave no trace
    let result = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: bill.bill_number,
            items: vec![ReturnLineInput {
                barcode: "H1".into(),
                quantity: 3,
                return_price: dec!(130),
            }],
        })
        .await;
    assert_matches!(result, Err(ServiceError::ReferentialViolation(_)));
    assert_eq!(branch_units(&app.db, "H1", "Slemany").await, 8);
}

#[tokio::test]
async fn returns_against_unknown_bills_or_items_are_rejected() {
    let app = setup().await;

    let result = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: Uuid::new_v4(),
            origin_bill_number: 999,
            items: vec![ReturnLineInput {
                barcode: "Z1".into(),
                quantity: 1,
                return_price: dec!(10),
            }],
        })
        .await;
    assert_matches!(result, Err(ServiceError::ReferentialViolation(_)));

    // Bill exists but never carried the barcode
    app.services
        .bills
        .create_purchase_bill(purchase(vec![line("Z2", 5, dec!(10), dec!(14), None)]))
        .await
        .unwrap();
    let pharmacy = Uuid::new_v4();
    let mut request = sale(vec![line("Z2", 2, dec!(10), dec!(14), None)]);
    request.pharmacy_id = pharmacy;
    let bill = app.services.bills.create_sale_bill(request).await.unwrap();

    let result = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: bill.bill_number,
            items: vec![ReturnLineInput {
                barcode: "Z3".into(),
                quantity: 1,
                return_price: dec!(14),
            }],
        })
        .await;
    assert_matches!(result, Err(ServiceError::ReferentialViolation(_)));
}

#[tokio::test]
async fn units_are_conserved_across_the_bill_lifecycle() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();

    // purchased 30
    app.services
        .bills
        .create_purchase_bill(purchase(vec![
            line("K1", 20, dec!(100), dec!(130), Some(date(2025, 5, 1))),
            line("K1", 10, dec!(100), dec!(130), Some(date(2025, 9, 1))),
        ]))
        .await
        .unwrap();

    // sold 12
    let mut request = sale(vec![line("K1", 12, dec!(100), dec!(130), None)]);
    request.pharmacy_id = pharmacy;
    let bill = app.services.bills.create_sale_bill(request).await.unwrap();

    // returned 5
    app.services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: bill.bill_number,
            items: vec![ReturnLineInput {
                barcode: "K1".into(),
                quantity: 5,
                return_price: dec!(130),
            }],
        })
        .await
        .unwrap();

    // purchased + returned - sold = 30 + 5 - 12 = 23
    assert_eq!(total_units(&app.db, "K1").await, 23);
}
