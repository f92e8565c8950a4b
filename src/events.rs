use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the engine after each committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Bill events
    PurchaseBillCreated {
        bill_id: Uuid,
        bill_number: i64,
    },
    SaleBillCreated {
        bill_id: Uuid,
        bill_number: i64,
        batches_touched: usize,
    },
    BillEdited {
        bill_id: Uuid,
        bill_number: i64,
    },
    BillDeleted {
        bill_number: i64,
    },
    ReturnRecorded {
        return_id: Uuid,
        origin_bill_number: i64,
        quantity: i32,
    },

    // Transport events
    TransportSent {
        transport_id: Uuid,
        from_branch: String,
        to_branch: String,
    },
    TransportReceived {
        transport_id: Uuid,
    },
    TransportRejected {
        transport_id: Uuid,
    },

    // Payment events
    PaymentCreated {
        payment_id: Uuid,
        payment_number: i64,
        net_amount: Decimal,
    },
    PaymentUpdated {
        payment_id: Uuid,
        payment_number: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Spawned once from `main`
/// (and from test setups) so senders never observe a closed channel.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        info!(event = ?event, "domain event");
    }
    info!("event channel closed, stopping event processor");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_processor() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender
            .send(Event::BillDeleted { bill_number: 42 })
            .await
            .expect("send should succeed while receiver is alive");

        match rx.recv().await {
            Some(Event::BillDeleted { bill_number }) => assert_eq!(bill_number, 42),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender.send(Event::BillDeleted { bill_number: 1 }).await;
        assert!(result.is_err());
    }
}
