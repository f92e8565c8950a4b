mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use pharmstock_api::entities::bill::SalePaymentStatus;
use pharmstock_api::entities::stock_batch::Branch;
use pharmstock_api::errors::ServiceError;
use pharmstock_api::services::bills::{
    BillDetail, CreatePurchaseBillRequest, CreateSaleBillRequest, ProcessReturnRequest,
    ReturnLineInput,
};
use pharmstock_api::services::payments::{CreatePaymentRequest, UpdatePaymentRequest};

use common::{date, line, setup, some_user, TestApp};

async fn seed_stock(app: &TestApp, barcode: &str, quantity: i32) {
    app.services
        .bills
        .create_purchase_bill(CreatePurchaseBillRequest {
            company_id: Uuid::new_v4(),
            branch: Branch::Slemany,
            bill_date: date(2025, 4, 1),
            is_consignment: false,
            items: vec![line(barcode, quantity, dec!(100), dec!(140), None)],
        })
        .await
        .unwrap();
}

async fn sell(
    app: &TestApp,
    pharmacy: Uuid,
    barcode: &str,
    quantity: i32,
    status: SalePaymentStatus,
) -> BillDetail {
    app.services
        .bills
        .create_sale_bill(CreateSaleBillRequest {
            pharmacy_id: pharmacy,
            branch: Branch::Slemany,
            bill_date: date(2025, 4, 5),
            payment_status: status,
            items: vec![line(barcode, quantity, dec!(100), dec!(140), None)],
        })
        .await
        .unwrap()
}

fn payment_request(
    pharmacy: Uuid,
    sold_bill_ids: Vec<Uuid>,
    return_ids: Vec<Uuid>,
) -> CreatePaymentRequest {
    CreatePaymentRequest {
        counterparty_id: pharmacy,
        sold_bill_ids,
        return_ids,
        hardcopy_bill_number: Some("HC-88".into()),
        payment_date: date(2025, 5, 1),
        created_by: some_user(),
    }
}

#[tokio::test]
async fn outstanding_nets_bills_against_returns_and_skips_cash() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    seed_stock(&app, "P1", 50).await;

    let unpaid = sell(&app, pharmacy, "P1", 10, SalePaymentStatus::Unpaid).await;
    sell(&app, pharmacy, "P1", 5, SalePaymentStatus::Cash).await;

    let returns = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: unpaid.bill_number,
            items: vec![ReturnLineInput {
                barcode: "P1".into(),
                quantity: 2,
                return_price: dec!(140),
            }],
        })
        .await
        .unwrap();

    let statement = app
        .services
        .payments
        .compute_outstanding(pharmacy)
        .await
        .unwrap();

    // The cash bill carries no receivable
    assert_eq!(statement.sold_bills.len(), 1);
    assert_eq!(statement.sold_bills[0].bill_number, unpaid.bill_number);
    assert_eq!(statement.returns.len(), 1);
    assert_eq!(statement.returns[0].id, returns[0].id);
    assert_eq!(statement.sold_total, dec!(1400));
    assert_eq!(statement.return_total, dec!(280));
    assert_eq!(statement.net_amount, dec!(1120));
}

#[tokio::test]
async fn a_claimed_bill_cannot_enter_a_second_payment() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    seed_stock(&app, "P2", 50).await;

    let bill = sell(&app, pharmacy, "P2", 10, SalePaymentStatus::Unpaid).await;

    let payment = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![bill.id], vec![]))
        .await
        .unwrap();
    assert_eq!(payment.payment.sold_total, dec!(1400));
    assert_eq!(payment.payment.net_amount, dec!(1400));

    // Same bill again: refused, and the bill no longer shows as outstanding
    let result = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![bill.id], vec![]))
        .await;
    assert_matches!(result, Err(ServiceError::AlreadyClaimed(_)));

    let statement = app
        .services
        .payments
        .compute_outstanding(pharmacy)
        .await
        .unwrap();
    assert!(statement.sold_bills.is_empty());

    // The claimed bill is now marked paid
    let reloaded = app.services.bills.get_bill(bill.bill_number).await.unwrap();
    assert_eq!(reloaded.payment_status.as_deref(), Some("paid"));
}

#[tokio::test]
async fn updating_a_payment_releases_and_reclaims_atomically() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    seed_stock(&app, "P3", 100).await;

    let first = sell(&app, pharmacy, "P3", 10, SalePaymentStatus::Unpaid).await;
    let second = sell(&app, pharmacy, "P3", 20, SalePaymentStatus::Unpaid).await;

    let payment = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![first.id], vec![]))
        .await
        .unwrap();

    // Swap the claimed bill for the other one
    let updated = app
        .services
        .payments
        .update_payment(
            payment.payment.id,
            UpdatePaymentRequest {
                sold_bill_ids: vec![second.id],
                return_ids: vec![],
                hardcopy_bill_number: None,
                payment_date: date(2025, 5, 2),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.payment.payment_number, payment.payment.payment_number);
    assert_eq!(updated.payment.sold_total, dec!(2800));

    // The released bill is reclaimable by a new payment
    let reclaimed = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![first.id], vec![]))
        .await
        .unwrap();
    assert_eq!(reclaimed.payment.sold_total, dec!(1400));

    // And the first bill's status followed the release/reclaim cycle
    let reloaded = app.services.bills.get_bill(first.bill_number).await.unwrap();
    assert_eq!(reloaded.payment_status.as_deref(), Some("paid"));
}

#[tokio::test]
async fn updating_cannot_steal_records_claimed_elsewhere() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    seed_stock(&app, "P4", 100).await;

    let first = sell(&app, pharmacy, "P4", 10, SalePaymentStatus::Unpaid).await;
    let second = sell(&app, pharmacy, "P4", 20, SalePaymentStatus::Unpaid).await;

    let payment_a = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![first.id], vec![]))
        .await
        .unwrap();
    let payment_b = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![second.id], vec![]))
        .await
        .unwrap();

    // B cannot grab A's bill
    let result = app
        .services
        .payments
        .update_payment(
            payment_b.payment.id,
            UpdatePaymentRequest {
                sold_bill_ids: vec![first.id, second.id],
                return_ids: vec![],
                hardcopy_bill_number: None,
                payment_date: date(2025, 5, 3),
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::AlreadyClaimed(_)));

    // A's payment is untouched by the failed update
    let reloaded = app
        .services
        .payments
        .get_payment(payment_a.payment.id)
        .await
        .unwrap();
    assert_eq!(reloaded.sold_bills.len(), 1);
    assert_eq!(reloaded.sold_bills[0].id, first.id);

    // B still holds its own claim after the rollback
    let reloaded_b = app
        .services
        .payments
        .get_payment(payment_b.payment.id)
        .await
        .unwrap();
    assert_eq!(reloaded_b.sold_bills.len(), 1);
    assert_eq!(reloaded_b.sold_bills[0].id, second.id);
}

#[tokio::test]
async fn selections_must_belong_to_the_counterparty() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    let other_pharmacy = Uuid::new_v4();
    seed_stock(&app, "P5", 100).await;

    let foreign_bill = sell(&app, other_pharmacy, "P5", 10, SalePaymentStatus::Unpaid).await;

    let result = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![foreign_bill.id], vec![]))
        .await;
    assert_matches!(result, Err(ServiceError::ReferentialViolation(_)));

    // Unknown ids are referential violations too
    let result = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![Uuid::new_v4()], vec![]))
        .await;
    assert_matches!(result, Err(ServiceError::ReferentialViolation(_)));

    // Cash bills cannot be selected
    let cash_bill = sell(&app, pharmacy, "P5", 5, SalePaymentStatus::Cash).await;
    let result = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![cash_bill.id], vec![]))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn payment_numbers_are_sequential_and_returns_net_down() {
    let app = setup().await;
    let pharmacy = Uuid::new_v4();
    seed_stock(&app, "P6", 100).await;

    let bill = sell(&app, pharmacy, "P6", 10, SalePaymentStatus::Unpaid).await;
    let returns = app
        .services
        .bills
        .process_return(ProcessReturnRequest {
            counterparty_id: pharmacy,
            origin_bill_number: bill.bill_number,
            items: vec![ReturnLineInput {
                barcode: "P6".into(),
                quantity: 3,
                return_price: dec!(140),
            }],
        })
        .await
        .unwrap();

    let payment = app
        .services
        .payments
        .create_payment(payment_request(
            pharmacy,
            vec![bill.id],
            vec![returns[0].id],
        ))
        .await
        .unwrap();
    assert_eq!(payment.payment.sold_total, dec!(1400));
    assert_eq!(payment.payment.return_total, dec!(420));
    assert_eq!(payment.payment.net_amount, dec!(980));

    let second_bill = sell(&app, pharmacy, "P6", 1, SalePaymentStatus::Unpaid).await;
    let second = app
        .services
        .payments
        .create_payment(payment_request(pharmacy, vec![second_bill.id], vec![]))
        .await
        .unwrap();
    assert_eq!(
        second.payment.payment_number,
        payment.payment.payment_number + 1
    );

    let (payments, total) = app
        .services
        .payments
        .list_payments(Some(pharmacy), 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(payments[0].payment_number, second.payment.payment_number);
}
