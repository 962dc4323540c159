use std::sync::Arc;

use chrono::Utc;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::{
        sales_order::{self, Entity as SalesOrder, SalesOrderStatus},
        sales_order_item::{self, Entity as SalesOrderItem},
        stock_movement::{self, MovementReason, ReferenceKind},
    },
    errors::LedgerError,
    events::{publish_all, EventSender, LedgerEvent},
    services::{
        ledger::{
            apply_movements, movement_events, record_applied, record_rejected, AppliedMovement,
            StockMoveCommand,
        },
        LedgerSettings,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockOutcome {
    pub order: sales_order::Model,
    pub movements: Vec<stock_movement::Model>,
}

/// Puts a cancelled order's goods back on the shelf.
#[derive(Clone)]
pub struct OrderRestockService {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderRestockService {
    pub fn new(
        db: Arc<DbPool>,
        settings: LedgerSettings,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            settings,
            event_sender,
        }
    }

    /// Restocks into the configured restock location.
    pub async fn restock_cancelled_order(
        &self,
        order_id: i64,
        actor_id: i64,
    ) -> Result<RestockOutcome, LedgerError> {
        self.restock_cancelled_order_at(self.settings.restock_location_id, order_id, actor_id)
            .await
    }

    /// Credits every line back and cancels the order in one transaction.
    ///
    /// If any credit fails the order keeps its previous status.
    #[instrument(skip(self))]
    pub async fn restock_cancelled_order_at(
        &self,
        location_id: i64,
        order_id: i64,
        actor_id: i64,
    ) -> Result<RestockOutcome, LedgerError> {
        let result = with_deadline(
            "restock_cancelled_order",
            self.settings.operation_timeout,
            self.restock_tx(location_id, order_id, actor_id),
        )
        .await;

        let (order, applied) = result.map_err(|e| {
            record_rejected("restock_cancelled_order", &e);
            warn!(error = %e, order_id, "Order restock rejected");
            e
        })?;
        record_applied("restock_cancelled_order", &applied);

        let units_restocked: i64 = applied.iter().map(|a| a.movement.quantity_change).sum();
        info!(order_id, units_restocked, "Cancelled order restocked");

        let mut events = movement_events(&applied);
        events.push(LedgerEvent::OrderRestocked {
            order_id,
            units_restocked,
        });
        publish_all(self.event_sender.as_deref(), events);

        Ok(RestockOutcome {
            order,
            movements: applied.into_iter().map(|a| a.movement).collect(),
        })
    }

    async fn restock_tx(
        &self,
        location_id: i64,
        order_id: i64,
        actor_id: i64,
    ) -> Result<(sales_order::Model, Vec<AppliedMovement>), LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;

        let order = SalesOrder::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Order {} not found", order_id)))?;
        if !order.status.is_cancellable() {
            return Err(LedgerError::OrderNotCancellable {
                order_id,
                status: order.status.to_string(),
            });
        }

        let lines = SalesOrderItem::find()
            .filter(sales_order_item::Column::OrderId.eq(order_id))
            .order_by_asc(sales_order_item::Column::Id)
            .all(&txn)
            .await?;

        let commands: Vec<StockMoveCommand> = lines
            .iter()
            .filter(|line| line.quantity > 0)
            .map(|line| {
                StockMoveCommand::new(
                    location_id,
                    line.variant_id,
                    line.quantity,
                    MovementReason::Return,
                    actor_id,
                )
                .with_reference(ReferenceKind::SalesOrder, order_id)
            })
            .collect();
        let applied = apply_movements(&txn, &commands).await?;

        let mut active: sales_order::ActiveModel = order.into();
        active.status = Set(SalesOrderStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        txn.commit().await?;
        Ok((order, applied))
    }
}
