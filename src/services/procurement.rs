use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::{
        purchase_order::{self, Entity as PurchaseOrder, PurchaseOrderStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
        stock_movement::{MovementReason, ReferenceKind},
    },
    errors::LedgerError,
    events::{publish_all, EventSender, LedgerEvent},
    services::{
        document_number,
        ledger::{
            apply_movements, movement_events, record_applied, record_rejected, AppliedMovement,
            ReferenceCheck, StockMoveCommand,
        },
        LedgerSettings,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPurchaseOrder {
    #[validate(length(min = 1, max = 255))]
    pub supplier_ref: String,
    pub created_by: i64,
    #[validate(length(min = 1, message = "a purchase order needs at least one line"))]
    pub lines: Vec<NewPurchaseOrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchaseOrderLine {
    pub variant_id: i64,
    pub quantity_ordered: i64,
    pub unit_cost: Decimal,
}

/// A purchase order header with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderDetails {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

impl PurchaseOrderDetails {
    pub fn units_outstanding(&self) -> i64 {
        self.items.iter().map(|item| item.outstanding()).sum()
    }
}

/// Status after a receipt: complete once every line is fully received.
pub fn derive_receipt_status(items: &[purchase_order_item::Model]) -> PurchaseOrderStatus {
    if items.iter().all(|item| item.is_fully_received()) {
        PurchaseOrderStatus::Completed
    } else {
        PurchaseOrderStatus::PartiallyReceived
    }
}

fn line_total(line: &NewPurchaseOrderLine) -> Result<Decimal, LedgerError> {
    line.unit_cost
        .checked_mul(Decimal::from(line.quantity_ordered))
        .ok_or_else(|| {
            LedgerError::InvalidQuantity(format!(
                "line total for variant {} is out of range",
                line.variant_id
            ))
        })
}

/// Purchase order lifecycle and goods receipt.
#[derive(Clone)]
pub struct ProcurementService {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl ProcurementService {
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

    #[instrument(skip(self, input), fields(lines = input.lines.len()))]
    pub async fn create_purchase_order(
        &self,
        input: NewPurchaseOrder,
    ) -> Result<PurchaseOrderDetails, LedgerError> {
        input.validate()?;
        for line in &input.lines {
            if line.quantity_ordered <= 0 {
                return Err(LedgerError::InvalidQuantity(format!(
                    "ordered quantity for variant {} must be positive, got {}",
                    line.variant_id, line.quantity_ordered
                )));
            }
            if line.unit_cost.is_sign_negative() {
                return Err(LedgerError::InvalidInput(format!(
                    "unit cost for variant {} must not be negative",
                    line.variant_id
                )));
            }
        }

        let txn = self.db.begin().await?;
        let mut check = ReferenceCheck::default();
        for line in &input.lines {
            check.variant(&txn, line.variant_id, false).await?;
        }

        let now = Utc::now();
        let line_totals = input
            .lines
            .iter()
            .map(line_total)
            .collect::<Result<Vec<_>, _>>()?;
        let total = line_totals
            .iter()
            .try_fold(Decimal::ZERO, |sum, t| sum.checked_add(*t))
            .ok_or_else(|| {
                LedgerError::InvalidQuantity("purchase order total is out of range".to_string())
            })?;

        let order = purchase_order::ActiveModel {
            po_number: Set(document_number("PO")),
            supplier_ref: Set(input.supplier_ref.trim().to_string()),
            status: Set(PurchaseOrderStatus::Draft),
            total: Set(total),
            created_by: Set(input.created_by),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(input.lines.len());
        for (line, line_total) in input.lines.iter().zip(line_totals) {
            let item = purchase_order_item::ActiveModel {
                purchase_order_id: Set(order.id),
                variant_id: Set(line.variant_id),
                quantity_ordered: Set(line.quantity_ordered),
                quantity_received: Set(0),
                unit_cost: Set(line.unit_cost),
                line_total: Set(line_total),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }
        txn.commit().await?;

        info!(po_id = order.id, po_number = %order.po_number, "Purchase order created");
        Ok(PurchaseOrderDetails { order, items })
    }

    pub async fn get_purchase_order(&self, po_id: i64) -> Result<PurchaseOrderDetails, LedgerError> {
        let db = self.db.as_ref();
        let order = PurchaseOrder::find_by_id(po_id)
            .one(db)
            .await?
            .ok_or_else(|| not_found(po_id))?;
        let items = load_items(db, po_id).await?;
        Ok(PurchaseOrderDetails { order, items })
    }

    /// DRAFT -> SENT.
    #[instrument(skip(self))]
    pub async fn mark_sent(&self, po_id: i64) -> Result<purchase_order::Model, LedgerError> {
        let order = PurchaseOrder::find_by_id(po_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| not_found(po_id))?;
        if order.status != PurchaseOrderStatus::Draft {
            return Err(LedgerError::Conflict(format!(
                "Purchase order {} is {} and cannot be sent",
                po_id, order.status
            )));
        }
        self.set_status(order, PurchaseOrderStatus::Sent).await
    }

    #[instrument(skip(self))]
    pub async fn cancel_purchase_order(
        &self,
        po_id: i64,
    ) -> Result<purchase_order::Model, LedgerError> {
        let order = PurchaseOrder::find_by_id(po_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| not_found(po_id))?;
        if order.status.is_closed() {
            return Err(LedgerError::PurchaseOrderClosed {
                po_id,
                status: order.status.to_string(),
            });
        }
        self.set_status(order, PurchaseOrderStatus::Cancelled).await
    }

    /// Receives goods into the configured receiving location.
    pub async fn receive_purchase_order(
        &self,
        po_id: i64,
        received: HashMap<i64, i64>,
        actor_id: i64,
    ) -> Result<PurchaseOrderDetails, LedgerError> {
        self.receive_purchase_order_at(
            self.settings.receiving_location_id,
            po_id,
            received,
            actor_id,
        )
        .await
    }

    /// Credits each received line and moves the order's status in one transaction.
    ///
    /// `received` maps purchase order item id to the quantity that arrived.
    #[instrument(skip(self, received), fields(lines = received.len()))]
    pub async fn receive_purchase_order_at(
        &self,
        location_id: i64,
        po_id: i64,
        received: HashMap<i64, i64>,
        actor_id: i64,
    ) -> Result<PurchaseOrderDetails, LedgerError> {
        if received.is_empty() {
            return Err(LedgerError::InvalidInput(
                "a receipt needs at least one line".to_string(),
            ));
        }
        let received: BTreeMap<i64, i64> = received.into_iter().collect();

        let result = with_deadline(
            "receive_purchase_order",
            self.settings.operation_timeout,
            self.receive_tx(location_id, po_id, &received, actor_id),
        )
        .await;

        let (details, applied) = result.map_err(|e| {
            record_rejected("receive_purchase_order", &e);
            warn!(error = %e, po_id, "Purchase order receipt rejected");
            e
        })?;
        record_applied("receive_purchase_order", &applied);

        let units_received: i64 = received.values().sum();
        info!(
            po_id,
            status = %details.order.status,
            units_received,
            "Purchase order receipt committed"
        );

        let mut events = movement_events(&applied);
        events.push(LedgerEvent::PurchaseOrderReceived {
            po_id,
            status: details.order.status.to_string(),
            units_received,
        });
        publish_all(self.event_sender.as_deref(), events);

        Ok(details)
    }

    async fn receive_tx(
        &self,
        location_id: i64,
        po_id: i64,
        received: &BTreeMap<i64, i64>,
        actor_id: i64,
    ) -> Result<(PurchaseOrderDetails, Vec<AppliedMovement>), LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;

        let order = PurchaseOrder::find_by_id(po_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| not_found(po_id))?;
        if order.status.is_closed() {
            return Err(LedgerError::PurchaseOrderClosed {
                po_id,
                status: order.status.to_string(),
            });
        }

        let mut items = load_items(&txn, po_id).await?;
        let mut commands = Vec::with_capacity(received.len());
        for (&item_id, &quantity) in received {
            if quantity <= 0 {
                return Err(LedgerError::InvalidQuantity(format!(
                    "received quantity for item {} must be positive, got {}",
                    item_id, quantity
                )));
            }
            let item = items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| {
                    LedgerError::NotFound(format!(
                        "Item {} not found on purchase order {}",
                        item_id, po_id
                    ))
                })?;
            if quantity > item.outstanding() {
                return Err(LedgerError::InvalidQuantity(format!(
                    "item {} has {} outstanding, cannot receive {}",
                    item_id,
                    item.outstanding(),
                    quantity
                )));
            }

            let mut active: purchase_order_item::ActiveModel = item.clone().into();
            active.quantity_received = Set(item.quantity_received + quantity);
            *item = active.update(&txn).await?;

            commands.push(
                StockMoveCommand::new(
                    location_id,
                    item.variant_id,
                    quantity,
                    MovementReason::Purchase,
                    actor_id,
                )
                .with_reference(ReferenceKind::PurchaseOrder, po_id),
            );
        }

        let applied = apply_movements(&txn, &commands).await?;

        let mut active: purchase_order::ActiveModel = order.into();
        active.status = Set(derive_receipt_status(&items));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        txn.commit().await?;
        Ok((PurchaseOrderDetails { order, items }, applied))
    }

    async fn set_status(
        &self,
        order: purchase_order::Model,
        status: PurchaseOrderStatus,
    ) -> Result<purchase_order::Model, LedgerError> {
        let po_id = order.id;
        let mut active: purchase_order::ActiveModel = order.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let order = active.update(self.db.as_ref()).await?;
        info!(po_id, status = %status, "Purchase order status changed");
        Ok(order)
    }
}

async fn load_items<C: ConnectionTrait>(
    db: &C,
    po_id: i64,
) -> Result<Vec<purchase_order_item::Model>, LedgerError> {
    Ok(PurchaseOrderItem::find()
        .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
        .order_by_asc(purchase_order_item::Column::Id)
        .all(db)
        .await?)
}

fn not_found(po_id: i64) -> LedgerError {
    LedgerError::NotFound(format!("Purchase order {} not found", po_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_multiplies_cost_by_quantity() {
        let line = NewPurchaseOrderLine {
            variant_id: 3,
            quantity_ordered: 4,
            unit_cost: dec!(2.25),
        };
        assert_eq!(line_total(&line).unwrap(), dec!(9.00));
    }

    #[test]
    fn overflowing_line_total_is_rejected() {
        let line = NewPurchaseOrderLine {
            variant_id: 3,
            quantity_ordered: i64::MAX,
            unit_cost: Decimal::MAX,
        };
        assert!(matches!(
            line_total(&line),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    fn item(ordered: i64, received: i64) -> purchase_order_item::Model {
        purchase_order_item::Model {
            id: 1,
            purchase_order_id: 1,
            variant_id: 1,
            quantity_ordered: ordered,
            quantity_received: received,
            unit_cost: dec!(2.50),
            line_total: dec!(2.50) * Decimal::from(ordered),
        }
    }

    #[test]
    fn status_is_partial_until_every_line_is_complete() {
        assert_eq!(
            derive_receipt_status(&[item(10, 4)]),
            PurchaseOrderStatus::PartiallyReceived
        );
        assert_eq!(
            derive_receipt_status(&[item(10, 10), item(5, 0)]),
            PurchaseOrderStatus::PartiallyReceived
        );
        assert_eq!(
            derive_receipt_status(&[item(10, 10), item(5, 5)]),
            PurchaseOrderStatus::Completed
        );
    }
}
