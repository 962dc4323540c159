use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use crate::entities::stock_movement::MovementReason;

/// Sender half of the ledger event channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<LedgerEvent>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<LedgerEvent>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both halves.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: LedgerEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without waiting for channel capacity.
    pub fn try_send(&self, event: LedgerEvent) -> Result<(), TrySendError<LedgerEvent>> {
        self.sender.try_send(event)
    }
}

/// Notifications published after a ledger transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    StockMoved {
        movement_id: i64,
        location_id: i64,
        variant_id: i64,
        quantity_change: i64,
        quantity_after: i64,
        reason: MovementReason,
    },
    LowStock {
        location_id: i64,
        variant_id: i64,
        quantity: i64,
        safety_stock: i64,
    },
    TransferCompleted {
        transfer_id: i64,
        variant_id: i64,
        quantity: i64,
        from_location_id: i64,
        to_location_id: i64,
    },
    AssemblyCompleted {
        assembly_id: i64,
        assembly_number: String,
        variant_id: i64,
        quantity_produced: i64,
    },
    PurchaseOrderReceived {
        po_id: i64,
        status: String,
        units_received: i64,
    },
    OrderRestocked {
        order_id: i64,
        units_restocked: i64,
    },
}

/// Publishes every event without blocking. A full or closed channel drops the event.
pub(crate) fn publish_all(sender: Option<&EventSender>, events: Vec<LedgerEvent>) {
    let Some(sender) = sender else {
        return;
    };
    for event in events {
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                counter!("inventory_ledger.events.dropped", 1, "cause" => "full");
                warn!(?event, "Event channel full; dropping ledger event");
            }
            Err(TrySendError::Closed(event)) => {
                counter!("inventory_ledger.events.dropped", 1, "cause" => "closed");
                warn!(?event, "Event channel closed; dropping ledger event");
            }
        }
    }
}

/// Drains the channel, logging each event. Used by the CLI and by embedders with no consumer.
pub async fn process_events(mut rx: mpsc::Receiver<LedgerEvent>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            LedgerEvent::LowStock {
                location_id,
                variant_id,
                quantity,
                safety_stock,
            } => {
                warn!(
                    location_id,
                    variant_id, quantity, safety_stock, "Stock at or below safety level"
                );
            }
            other => info!("Received event: {:?}", other),
        }
    }

    info!("Event channel closed; stopping event processing");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_all_delivers_in_order() {
        let (sender, mut rx) = EventSender::channel(4);
        publish_all(
            Some(&sender),
            vec![
                LedgerEvent::OrderRestocked {
                    order_id: 1,
                    units_restocked: 3,
                },
                LedgerEvent::LowStock {
                    location_id: 1,
                    variant_id: 2,
                    quantity: 0,
                    safety_stock: 5,
                },
            ],
        );

        assert!(matches!(
            rx.recv().await,
            Some(LedgerEvent::OrderRestocked { order_id: 1, .. })
        ));
        assert!(matches!(rx.recv().await, Some(LedgerEvent::LowStock { .. })));
    }

    #[tokio::test]
    async fn closed_channel_does_not_fail_publisher() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        publish_all(
            Some(&sender),
            vec![LedgerEvent::OrderRestocked {
                order_id: 9,
                units_restocked: 1,
            }],
        );
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_waiting() {
        let (sender, mut rx) = EventSender::channel(1);
        publish_all(
            Some(&sender),
            vec![
                LedgerEvent::OrderRestocked {
                    order_id: 1,
                    units_restocked: 1,
                },
                LedgerEvent::OrderRestocked {
                    order_id: 2,
                    units_restocked: 1,
                },
            ],
        );

        assert!(matches!(
            rx.recv().await,
            Some(LedgerEvent::OrderRestocked { order_id: 1, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
