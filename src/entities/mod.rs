pub mod batch_allocation;
pub mod bill;
pub mod bill_item;
pub mod payment;
pub mod payment_claim;
pub mod return_line;
pub mod stock_batch;
pub mod transport;
pub mod transport_item;
