// The fulfillment engine
pub mod allocation;
pub mod batch_ledger;
pub mod bills;
pub mod payments;
pub mod transports;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

/// All engine services, constructed once per process over one storage
/// handle and one lock registry, then shared by reference.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: batch_ledger::BatchLedgerService,
    pub bills: bills::BillService,
    pub transports: transports::TransportService,
    pub payments: payments::PaymentReconciler,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        let locks = Arc::new(batch_ledger::BatchLocks::new());
        Self {
            ledger: batch_ledger::BatchLedgerService::new(db.clone()),
            bills: bills::BillService::new(db.clone(), event_sender.clone(), locks.clone()),
            transports: transports::TransportService::new(
                db.clone(),
                event_sender.clone(),
                locks,
            ),
            payments: payments::PaymentReconciler::new(db, event_sender),
        }
    }
}
