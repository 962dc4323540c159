use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::stock_movement::{self, MovementReason},
    errors::LedgerError,
    events::{publish_all, EventSender},
    services::{
        ledger::{
            apply_movements, ensure_stock_row, lock_stock_row, movement_events, record_applied,
            record_rejected, AppliedMovement, ReferenceCheck, StockMoveCommand,
        },
        LedgerSettings,
    },
};

/// One counted line of a stocktake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub variant_id: i64,
    pub counted: i64,
}

/// What a count changed for one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountVariance {
    pub location_id: i64,
    pub variant_id: i64,
    pub previous: i64,
    pub counted: i64,
    pub delta: i64,
    /// Set when the count differed from the books and a movement was written.
    pub movement_id: Option<i64>,
}

/// Operator corrections: raw delta batches, set-to-count, and whole stocktakes.
#[derive(Clone)]
pub struct AdjustmentService {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl AdjustmentService {
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

    /// Applies operator-entered deltas as one all-or-nothing batch.
    #[instrument(skip(self, commands), fields(commands = commands.len()))]
    pub async fn bulk_adjust(
        &self,
        commands: Vec<StockMoveCommand>,
    ) -> Result<Vec<stock_movement::Model>, LedgerError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let result = with_deadline(
            "bulk_adjust",
            self.settings.operation_timeout,
            self.bulk_adjust_tx(&commands),
        )
        .await;

        let applied = result.map_err(|e| {
            record_rejected("bulk_adjust", &e);
            warn!(error = %e, "Bulk adjustment rejected");
            e
        })?;
        record_applied("bulk_adjust", &applied);

        info!(movements = applied.len(), "Bulk adjustment committed");
        publish_all(self.event_sender.as_deref(), movement_events(&applied));
        Ok(applied.into_iter().map(|a| a.movement).collect())
    }

    async fn bulk_adjust_tx(
        &self,
        commands: &[StockMoveCommand],
    ) -> Result<Vec<AppliedMovement>, LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;
        let applied = apply_movements(&txn, commands).await?;
        txn.commit().await?;
        Ok(applied)
    }

    /// Sets a pair to `actual` by issuing the difference as one movement.
    ///
    /// Returns `None` when the stock already matches and nothing was written.
    #[instrument(skip(self))]
    pub async fn adjust_to_target(
        &self,
        location_id: i64,
        variant_id: i64,
        actual: i64,
        reason: MovementReason,
        actor_id: i64,
    ) -> Result<Option<stock_movement::Model>, LedgerError> {
        let line = CountLine {
            variant_id,
            counted: actual,
        };
        let (_, applied) = self
            .run_count("adjust_to_target", location_id, vec![line], reason, actor_id)
            .await?;
        Ok(applied.into_iter().next().map(|a| a.movement))
    }

    /// Applies a whole stocktake for one location atomically.
    ///
    /// Every line is compared against the locked stock row; lines that match write nothing.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn cycle_count(
        &self,
        location_id: i64,
        lines: Vec<CountLine>,
        reason: MovementReason,
        actor_id: i64,
    ) -> Result<Vec<CountVariance>, LedgerError> {
        let (variances, _) = self
            .run_count("cycle_count", location_id, lines, reason, actor_id)
            .await?;
        Ok(variances)
    }

    async fn run_count(
        &self,
        operation: &'static str,
        location_id: i64,
        lines: Vec<CountLine>,
        reason: MovementReason,
        actor_id: i64,
    ) -> Result<(Vec<CountVariance>, Vec<AppliedMovement>), LedgerError> {
        validate_count_lines(&lines)?;
        if lines.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let result = with_deadline(
            operation,
            self.settings.operation_timeout,
            self.count_tx(location_id, &lines, reason, actor_id),
        )
        .await;

        let (variances, applied) = result.map_err(|e| {
            record_rejected(operation, &e);
            warn!(error = %e, location_id, "Stock count rejected");
            e
        })?;
        record_applied(operation, &applied);

        info!(
            location_id,
            counted = variances.len(),
            corrected = applied.len(),
            "Stock count committed"
        );
        publish_all(self.event_sender.as_deref(), movement_events(&applied));
        Ok((variances, applied))
    }

    async fn count_tx(
        &self,
        location_id: i64,
        lines: &[CountLine],
        reason: MovementReason,
        actor_id: i64,
    ) -> Result<(Vec<CountVariance>, Vec<AppliedMovement>), LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;
        let now = Utc::now();

        let mut check = ReferenceCheck::default();
        check.location(&txn, location_id, false).await?;

        let mut variances = Vec::with_capacity(lines.len());
        let mut commands = Vec::new();
        for line in lines {
            check.variant(&txn, line.variant_id, false).await?;
            if line.counted > 0 {
                ensure_stock_row(&txn, location_id, line.variant_id, now).await?;
            }

            let previous = lock_stock_row(&txn, location_id, line.variant_id)
                .await?
                .map(|row| row.quantity)
                .unwrap_or(0);
            let delta = line.counted - previous;
            if delta != 0 {
                commands.push(StockMoveCommand::new(
                    location_id,
                    line.variant_id,
                    delta,
                    reason,
                    actor_id,
                ));
            }
            variances.push(CountVariance {
                location_id,
                variant_id: line.variant_id,
                previous,
                counted: line.counted,
                delta,
                movement_id: None,
            });
        }

        let applied = apply_movements(&txn, &commands).await?;
        txn.commit().await?;

        for entry in &applied {
            if let Some(variance) = variances
                .iter_mut()
                .find(|v| v.variant_id == entry.movement.variant_id)
            {
                variance.movement_id = Some(entry.movement.id);
            }
        }
        Ok((variances, applied))
    }
}

fn validate_count_lines(lines: &[CountLine]) -> Result<(), LedgerError> {
    let mut seen = HashSet::with_capacity(lines.len());
    for line in lines {
        if line.counted < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "counted quantity for variant {} must not be negative, got {}",
                line.variant_id, line.counted
            )));
        }
        if !seen.insert(line.variant_id) {
            return Err(LedgerError::InvalidInput(format!(
                "variant {} is counted more than once",
                line.variant_id
            )));
        }
    }
    Ok(())
}
