use std::sync::Arc;

use chrono::Utc;
use sea_orm::*;
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::{
        stock_movement::{MovementReason, ReferenceKind},
        stock_transfer::{self, Entity as StockTransfer},
    },
    errors::LedgerError,
    events::{publish_all, EventSender, LedgerEvent},
    services::{
        document_number,
        ledger::{
            apply_movements, movement_events, record_applied, record_rejected, AppliedMovement,
            StockMoveCommand,
        },
        LedgerSettings,
    },
};

/// Moves stock between two locations as one debit/credit pair.
#[derive(Clone)]
pub struct TransferService {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl TransferService {
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

    /// Debits `from` and credits `to` by `quantity` in one transaction.
    ///
    /// Both legs reference the returned transfer row. A short source leaves both sides untouched.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        variant_id: i64,
        quantity: i64,
        from_location_id: i64,
        to_location_id: i64,
        actor_id: i64,
    ) -> Result<stock_transfer::Model, LedgerError> {
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "transfer quantity must be positive, got {}",
                quantity
            )));
        }
        if from_location_id == to_location_id {
            return Err(LedgerError::InvalidInput(format!(
                "cannot transfer from location {} to itself",
                from_location_id
            )));
        }

        let result = with_deadline(
            "transfer",
            self.settings.operation_timeout,
            self.transfer_tx(
                variant_id,
                quantity,
                from_location_id,
                to_location_id,
                actor_id,
            ),
        )
        .await;

        let (transfer, applied) = result.map_err(|e| {
            record_rejected("transfer", &e);
            warn!(error = %e, "Transfer rejected");
            e
        })?;
        record_applied("transfer", &applied);

        info!(
            transfer_id = transfer.id,
            transfer_number = %transfer.transfer_number,
            "Transfer committed"
        );

        let mut events = movement_events(&applied);
        events.push(LedgerEvent::TransferCompleted {
            transfer_id: transfer.id,
            variant_id,
            quantity,
            from_location_id,
            to_location_id,
        });
        publish_all(self.event_sender.as_deref(), events);

        Ok(transfer)
    }

    async fn transfer_tx(
        &self,
        variant_id: i64,
        quantity: i64,
        from_location_id: i64,
        to_location_id: i64,
        actor_id: i64,
    ) -> Result<(stock_transfer::Model, Vec<AppliedMovement>), LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;

        let transfer = stock_transfer::ActiveModel {
            transfer_number: Set(document_number("TRF")),
            variant_id: Set(variant_id),
            quantity: Set(quantity),
            from_location_id: Set(from_location_id),
            to_location_id: Set(to_location_id),
            actor_id: Set(actor_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let legs = [
            StockMoveCommand::new(
                from_location_id,
                variant_id,
                -quantity,
                MovementReason::Transfer,
                actor_id,
            )
            .with_reference(ReferenceKind::Transfer, transfer.id),
            StockMoveCommand::new(
                to_location_id,
                variant_id,
                quantity,
                MovementReason::Transfer,
                actor_id,
            )
            .with_reference(ReferenceKind::Transfer, transfer.id),
        ];
        let applied = apply_movements(&txn, &legs).await?;

        txn.commit().await?;
        Ok((transfer, applied))
    }

    pub async fn get_transfer(&self, transfer_id: i64) -> Result<stock_transfer::Model, LedgerError> {
        StockTransfer::find_by_id(transfer_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Transfer {} not found", transfer_id)))
    }

    /// Transfers of a variant, newest first.
    pub async fn list_transfers(
        &self,
        variant_id: Option<i64>,
    ) -> Result<Vec<stock_transfer::Model>, LedgerError> {
        let mut query = StockTransfer::find();
        if let Some(variant_id) = variant_id {
            query = query.filter(stock_transfer::Column::VariantId.eq(variant_id));
        }
        Ok(query
            .order_by_desc(stock_transfer::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}
