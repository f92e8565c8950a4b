mod common;

use std::collections::HashSet;

use rust_decimal_macros::dec;
use uuid::Uuid;

use pharmstock_api::entities::bill::SalePaymentStatus;
use pharmstock_api::entities::stock_batch::Branch;
use pharmstock_api::services::bills::{CreatePurchaseBillRequest, CreateSaleBillRequest};

use common::{branch_units, date, line, setup};

#[tokio::test]
async fn oversubscribed_concurrent_sales_never_oversell() {
    let app = setup().await;

    app.services
        .bills
        .create_purchase_bill(CreatePurchaseBillRequest {
            company_id: Uuid::new_v4(),
            branch: Branch::Slemany,
            bill_date: date(2025, 6, 1),
            is_consignment: false,
            items: vec![line("W1", 10, dec!(100), dec!(140), None)],
        })
        .await
        .unwrap();

    // 20 clerks race to sell 1 unit each out of 10
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let bills = app.services.bills.clone();
        tasks.push(tokio::spawn(async move {
            bills
                .create_sale_bill(CreateSaleBillRequest {
                    pharmacy_id: Uuid::new_v4(),
                    branch: Branch::Slemany,
                    bill_date: date(2025, 6, 2),
                    payment_status: SalePaymentStatus::Unpaid,
                    items: vec![line("W1", 1, dec!(100), dec!(140), None)],
                })
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(
        successes, 10,
        "exactly the available 10 units may be sold, got {} sales",
        successes
    );
    assert_eq!(branch_units(&app.db, "W1", "Slemany").await, 0);
}

#[tokio::test]
async fn concurrent_bills_for_distinct_items_all_get_unique_numbers() {
    let app = setup().await;

    let barcodes = ["Q1", "Q2", "Q3", "Q4", "Q5"];
    for barcode in barcodes {
        app.services
            .bills
            .create_purchase_bill(CreatePurchaseBillRequest {
                company_id: Uuid::new_v4(),
                branch: Branch::Slemany,
                bill_date: date(2025, 6, 1),
                is_consignment: false,
                items: vec![line(barcode, 5, dec!(100), dec!(140), None)],
            })
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for barcode in barcodes {
        let bills = app.services.bills.clone();
        tasks.push(tokio::spawn(async move {
            bills
                .create_sale_bill(CreateSaleBillRequest {
                    pharmacy_id: Uuid::new_v4(),
                    branch: Branch::Slemany,
                    bill_date: date(2025, 6, 2),
                    payment_status: SalePaymentStatus::Unpaid,
                    items: vec![line(barcode, 2, dec!(100), dec!(140), None)],
                })
                .await
        }));
    }

    let mut numbers = HashSet::new();
    for task in tasks {
        let bill = task.await.unwrap().expect("sale should succeed");
        assert!(
            numbers.insert(bill.bill_number),
            "bill number {} was issued twice",
            bill.bill_number
        );
    }
    assert_eq!(numbers.len(), 5);

    for barcode in barcodes {
        assert_eq!(branch_units(&app.db, barcode, "Slemany").await, 3);
    }
}
