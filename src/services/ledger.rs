use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::{
        inventory_location::Entity as InventoryLocation,
        product_variant::Entity as ProductVariant,
        stock_level::{self, Entity as StockLevel},
        stock_movement::{self, Entity as StockMovement, MovementReason, ReferenceKind},
    },
    errors::LedgerError,
    events::{publish_all, EventSender, LedgerEvent},
    services::LedgerSettings,
};

/// Record a movement points back at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReference {
    pub kind: ReferenceKind,
    pub id: i64,
}

/// A single signed quantity change requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoveCommand {
    pub location_id: i64,
    pub variant_id: i64,
    pub quantity_change: i64,
    pub reason: MovementReason,
    pub reference: Option<StockReference>,
    pub actor_id: i64,
}

impl StockMoveCommand {
    pub fn new(
        location_id: i64,
        variant_id: i64,
        quantity_change: i64,
        reason: MovementReason,
        actor_id: i64,
    ) -> Self {
        Self {
            location_id,
            variant_id,
            quantity_change,
            reason,
            reference: None,
            actor_id,
        }
    }

    pub fn with_reference(mut self, kind: ReferenceKind, id: i64) -> Self {
        self.reference = Some(StockReference { kind, id });
        self
    }
}

/// A movement as written, with the stock row it left behind.
#[derive(Debug, Clone)]
pub(crate) struct AppliedMovement {
    pub movement: stock_movement::Model,
    pub quantity_after: i64,
    pub safety_stock: i64,
}

/// A (location, variant) pair whose stored quantity disagrees with its movement history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDiscrepancy {
    pub location_id: i64,
    pub variant_id: i64,
    pub recorded_quantity: i64,
    pub movement_total: i64,
}

#[derive(Debug, FromQueryResult)]
struct PairTotal {
    location_id: i64,
    variant_id: i64,
    total: Option<i64>,
}

/// Per-transaction cache of location and variant validity checks.
#[derive(Debug, Default)]
pub(crate) struct ReferenceCheck {
    locations: HashMap<i64, bool>,
    variants: HashMap<i64, bool>,
}

impl ReferenceCheck {
    /// Fails unless the location exists. Inactive locations may be drained but not credited.
    pub(crate) async fn location<C: ConnectionTrait>(
        &mut self,
        db: &C,
        location_id: i64,
        crediting: bool,
    ) -> Result<(), LedgerError> {
        let active = match self.locations.get(&location_id) {
            Some(active) => *active,
            None => {
                let location = InventoryLocation::find_by_id(location_id)
                    .one(db)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::invalid_location(location_id, "location does not exist")
                    })?;
                self.locations.insert(location_id, location.is_active);
                location.is_active
            }
        };

        if crediting && !active {
            return Err(LedgerError::invalid_location(
                location_id,
                "location is inactive",
            ));
        }
        Ok(())
    }

    /// Fails unless the variant exists. Inactive variants may be drained but not credited.
    pub(crate) async fn variant<C: ConnectionTrait>(
        &mut self,
        db: &C,
        variant_id: i64,
        crediting: bool,
    ) -> Result<(), LedgerError> {
        let active = match self.variants.get(&variant_id) {
            Some(active) => *active,
            None => {
                let variant = ProductVariant::find_by_id(variant_id)
                    .one(db)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::invalid_variant(variant_id, "variant does not exist")
                    })?;
                self.variants.insert(variant_id, variant.is_active);
                variant.is_active
            }
        };

        if crediting && !active {
            return Err(LedgerError::invalid_variant(variant_id, "variant is inactive"));
        }
        Ok(())
    }
}

/// Applies commands in order inside the caller's transaction.
///
/// This is the only code path that changes `stock_levels.quantity` or appends to
/// `stock_movements`. Any error leaves the transaction to be rolled back by the caller.
pub(crate) async fn apply_movements(
    txn: &DatabaseTransaction,
    commands: &[StockMoveCommand],
) -> Result<Vec<AppliedMovement>, LedgerError> {
    let mut check = ReferenceCheck::default();
    let now = Utc::now();
    let mut applied = Vec::with_capacity(commands.len());

    for cmd in commands {
        if cmd.quantity_change == 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "movement for variant {} at location {} has a zero quantity change",
                cmd.variant_id, cmd.location_id
            )));
        }
        if cmd.quantity_change.checked_neg().is_none() {
            return Err(LedgerError::InvalidQuantity(format!(
                "movement for variant {} at location {} is out of range",
                cmd.variant_id, cmd.location_id
            )));
        }
        let crediting = cmd.quantity_change > 0;
        check.location(txn, cmd.location_id, crediting).await?;
        check.variant(txn, cmd.variant_id, crediting).await?;

        applied.push(apply_one(txn, cmd, now).await?);
    }

    Ok(applied)
}

async fn apply_one(
    txn: &DatabaseTransaction,
    cmd: &StockMoveCommand,
    now: DateTime<Utc>,
) -> Result<AppliedMovement, LedgerError> {
    if cmd.quantity_change > 0 {
        ensure_stock_row(txn, cmd.location_id, cmd.variant_id, now).await?;
    }

    // Evaluated by the store: concurrent debits serialize on the row and re-check the guard.
    let result = StockLevel::update_many()
        .col_expr(
            stock_level::Column::Quantity,
            Expr::col(stock_level::Column::Quantity).add(cmd.quantity_change),
        )
        .col_expr(stock_level::Column::UpdatedAt, Expr::value(now))
        .filter(stock_level::Column::LocationId.eq(cmd.location_id))
        .filter(stock_level::Column::VariantId.eq(cmd.variant_id))
        .filter(stock_level::Column::Quantity.gte(-cmd.quantity_change))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        let available = current_quantity(txn, cmd.location_id, cmd.variant_id).await?;
        return Err(LedgerError::InsufficientStock {
            location_id: cmd.location_id,
            variant_id: cmd.variant_id,
            requested: -cmd.quantity_change,
            available,
        });
    }

    let level = StockLevel::find_by_id((cmd.location_id, cmd.variant_id))
        .one(txn)
        .await?
        .ok_or_else(|| {
            LedgerError::db_error(format!(
                "stock row ({}, {}) missing after update",
                cmd.location_id, cmd.variant_id
            ))
        })?;

    let movement = stock_movement::ActiveModel {
        location_id: Set(cmd.location_id),
        variant_id: Set(cmd.variant_id),
        quantity_change: Set(cmd.quantity_change),
        reason: Set(cmd.reason),
        reference_type: Set(cmd.reference.map(|r| r.kind)),
        reference_id: Set(cmd.reference.map(|r| r.id)),
        actor_id: Set(cmd.actor_id),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await?;

    Ok(AppliedMovement {
        movement,
        quantity_after: level.quantity,
        safety_stock: level.safety_stock,
    })
}

/// Creates the zero row for a pair if it does not exist yet.
pub(crate) async fn ensure_stock_row<C: ConnectionTrait>(
    db: &C,
    location_id: i64,
    variant_id: i64,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let row = stock_level::ActiveModel {
        location_id: Set(location_id),
        variant_id: Set(variant_id),
        quantity: Set(0),
        safety_stock: Set(0),
        updated_at: Set(now),
    };

    StockLevel::insert(row)
        .on_conflict(
            OnConflict::columns([
                stock_level::Column::LocationId,
                stock_level::Column::VariantId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    Ok(())
}

/// Quantity for a pair, zero when no row exists.
pub(crate) async fn current_quantity<C: ConnectionTrait>(
    db: &C,
    location_id: i64,
    variant_id: i64,
) -> Result<i64, LedgerError> {
    Ok(StockLevel::find_by_id((location_id, variant_id))
        .one(db)
        .await?
        .map(|row| row.quantity)
        .unwrap_or(0))
}

/// Reads a stock row under `SELECT .. FOR UPDATE` so read-then-write callers hold it.
pub(crate) async fn lock_stock_row(
    txn: &DatabaseTransaction,
    location_id: i64,
    variant_id: i64,
) -> Result<Option<stock_level::Model>, LedgerError> {
    Ok(StockLevel::find_by_id((location_id, variant_id))
        .lock_exclusive()
        .one(txn)
        .await?)
}

pub(crate) fn record_applied(operation: &'static str, applied: &[AppliedMovement]) {
    counter!(
        "inventory_ledger.movements.applied",
        applied.len() as u64,
        "operation" => operation
    );
}

pub(crate) fn record_rejected(operation: &'static str, error: &LedgerError) {
    counter!(
        "inventory_ledger.movements.rejected",
        1,
        "operation" => operation,
        "code" => error.error_code()
    );
}

/// StockMoved for every movement, plus LowStock for debits that reached the safety level.
pub(crate) fn movement_events(applied: &[AppliedMovement]) -> Vec<LedgerEvent> {
    let mut events = Vec::with_capacity(applied.len());
    for entry in applied {
        let m = &entry.movement;
        events.push(LedgerEvent::StockMoved {
            movement_id: m.id,
            location_id: m.location_id,
            variant_id: m.variant_id,
            quantity_change: m.quantity_change,
            quantity_after: entry.quantity_after,
            reason: m.reason,
        });
        if m.quantity_change < 0 && entry.safety_stock > 0 && entry.quantity_after <= entry.safety_stock
        {
            events.push(LedgerEvent::LowStock {
                location_id: m.location_id,
                variant_id: m.variant_id,
                quantity: entry.quantity_after,
                safety_stock: entry.safety_stock,
            });
        }
    }
    events
}

/// Movement engine and stock read paths.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl StockLedger {
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

    /// Applies one command atomically and returns the movement row.
    #[instrument(skip(self))]
    pub async fn execute_movement(
        &self,
        cmd: StockMoveCommand,
    ) -> Result<stock_movement::Model, LedgerError> {
        let mut movements = self.execute_batch(vec![cmd]).await?;
        movements
            .pop()
            .ok_or_else(|| LedgerError::db_error("movement batch returned no rows".to_string()))
    }

    /// Applies every command in one transaction; the first failure aborts them all.
    #[instrument(skip(self, commands), fields(commands = commands.len()))]
    pub async fn execute_batch(
        &self,
        commands: Vec<StockMoveCommand>,
    ) -> Result<Vec<stock_movement::Model>, LedgerError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let result = with_deadline(
            "execute_batch",
            self.settings.operation_timeout,
            self.execute_batch_tx(&commands),
        )
        .await;

        let applied = result.map_err(|e| {
            record_rejected("execute_batch", &e);
            warn!(error = %e, "Movement batch rejected");
            e
        })?;
        record_applied("execute_batch", &applied);

        info!(movements = applied.len(), "Movement batch committed");
        publish_all(self.event_sender.as_deref(), movement_events(&applied));

        Ok(applied.into_iter().map(|a| a.movement).collect())
    }

    async fn execute_batch_tx(
        &self,
        commands: &[StockMoveCommand],
    ) -> Result<Vec<AppliedMovement>, LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;
        let applied = apply_movements(&txn, commands).await?;
        txn.commit().await?;
        Ok(applied)
    }

    /// Current on-hand quantity; zero for a pair that never held stock.
    #[instrument(skip(self))]
    pub async fn get_stock_level(
        &self,
        variant_id: i64,
        location_id: i64,
    ) -> Result<i64, LedgerError> {
        current_quantity(self.db.as_ref(), location_id, variant_id).await
    }

    /// The full stock row, if the pair has one.
    pub async fn get_stock_row(
        &self,
        location_id: i64,
        variant_id: i64,
    ) -> Result<Option<stock_level::Model>, LedgerError> {
        Ok(StockLevel::find_by_id((location_id, variant_id))
            .one(self.db.as_ref())
            .await?)
    }

    /// Total on hand for a variant across all locations.
    pub async fn total_on_hand(&self, variant_id: i64) -> Result<i64, LedgerError> {
        let rows = StockLevel::find()
            .filter(stock_level::Column::VariantId.eq(variant_id))
            .all(self.db.as_ref())
            .await?;
        Ok(rows.iter().map(|row| row.quantity).sum())
    }

    /// Movements newest first, optionally narrowed to a variant and/or location.
    ///
    /// `page` is 1-based. A zero `limit` falls back to the configured default page size,
    /// and every limit is capped at the configured maximum.
    #[instrument(skip(self))]
    pub async fn movement_history(
        &self,
        variant_id: Option<i64>,
        location_id: Option<i64>,
        page: u64,
        limit: u64,
    ) -> Result<Vec<stock_movement::Model>, LedgerError> {
        let limit = if limit == 0 {
            self.settings.default_page_size
        } else {
            limit.min(self.settings.max_page_size)
        };
        let offset = page.max(1).saturating_sub(1).saturating_mul(limit);

        let mut query = StockMovement::find();
        if let Some(variant_id) = variant_id {
            query = query.filter(stock_movement::Column::VariantId.eq(variant_id));
        }
        if let Some(location_id) = location_id {
            query = query.filter(stock_movement::Column::LocationId.eq(location_id));
        }

        Ok(query
            .order_by_desc(stock_movement::Column::CreatedAt)
            .order_by_desc(stock_movement::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(self.db.as_ref())
            .await?)
    }

    /// Movements written on behalf of one originating record, oldest first.
    pub async fn movements_for_reference(
        &self,
        kind: ReferenceKind,
        reference_id: i64,
    ) -> Result<Vec<stock_movement::Model>, LedgerError> {
        Ok(StockMovement::find()
            .filter(stock_movement::Column::ReferenceType.eq(kind))
            .filter(stock_movement::Column::ReferenceId.eq(reference_id))
            .order_by_asc(stock_movement::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    /// Sets the low-stock threshold for a pair, creating its row when needed.
    #[instrument(skip(self))]
    pub async fn set_safety_stock(
        &self,
        location_id: i64,
        variant_id: i64,
        safety_stock: i64,
    ) -> Result<stock_level::Model, LedgerError> {
        if safety_stock < 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "safety stock must not be negative, got {}",
                safety_stock
            )));
        }

        with_deadline(
            "set_safety_stock",
            self.settings.operation_timeout,
            self.set_safety_stock_tx(location_id, variant_id, safety_stock),
        )
        .await
    }

    async fn set_safety_stock_tx(
        &self,
        location_id: i64,
        variant_id: i64,
        safety_stock: i64,
    ) -> Result<stock_level::Model, LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;

        let mut check = ReferenceCheck::default();
        check.location(&txn, location_id, false).await?;
        check.variant(&txn, variant_id, false).await?;

        let now = Utc::now();
        ensure_stock_row(&txn, location_id, variant_id, now).await?;

        StockLevel::update_many()
            .col_expr(stock_level::Column::SafetyStock, Expr::value(safety_stock))
            .filter(stock_level::Column::LocationId.eq(location_id))
            .filter(stock_level::Column::VariantId.eq(variant_id))
            .exec(&txn)
            .await?;

        let row = StockLevel::find_by_id((location_id, variant_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                LedgerError::db_error(format!(
                    "stock row ({}, {}) missing after upsert",
                    location_id, variant_id
                ))
            })?;

        txn.commit().await?;
        Ok(row)
    }

    /// Rows at or below a non-zero safety stock.
    pub async fn low_stock_levels(
        &self,
        location_id: Option<i64>,
    ) -> Result<Vec<stock_level::Model>, LedgerError> {
        let mut query = StockLevel::find()
            .filter(stock_level::Column::SafetyStock.gt(0))
            .filter(
                Expr::col(stock_level::Column::Quantity)
                    .lte(Expr::col(stock_level::Column::SafetyStock)),
            );
        if let Some(location_id) = location_id {
            query = query.filter(stock_level::Column::LocationId.eq(location_id));
        }

        Ok(query
            .order_by_asc(stock_level::Column::LocationId)
            .order_by_asc(stock_level::Column::VariantId)
            .all(self.db.as_ref())
            .await?)
    }

    /// Recomputes the movement total of every pair and reports rows that disagree with it.
    ///
    /// An empty result means the ledger identity holds.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Vec<LedgerDiscrepancy>, LedgerError> {
        let db = self.db.as_ref();

        let totals = StockMovement::find()
            .select_only()
            .column(stock_movement::Column::LocationId)
            .column(stock_movement::Column::VariantId)
            .column_as(
                Expr::cust("CAST(SUM(quantity_change) AS BIGINT)"),
                "total",
            )
            .group_by(stock_movement::Column::LocationId)
            .group_by(stock_movement::Column::VariantId)
            .into_model::<PairTotal>()
            .all(db)
            .await?;

        let mut pairs: BTreeMap<(i64, i64), (i64, i64)> = BTreeMap::new();
        for row in StockLevel::find().all(db).await? {
            pairs.insert((row.location_id, row.variant_id), (row.quantity, 0));
        }
        for total in totals {
            pairs
                .entry((total.location_id, total.variant_id))
                .or_insert((0, 0))
                .1 = total.total.unwrap_or(0);
        }

        let discrepancies: Vec<LedgerDiscrepancy> = pairs
            .into_iter()
            .filter(|(_, (recorded, total))| recorded != total)
            .map(
                |((location_id, variant_id), (recorded_quantity, movement_total))| {
                    LedgerDiscrepancy {
                        location_id,
                        variant_id,
                        recorded_quantity,
                        movement_total,
                    }
                },
            )
            .collect();

        if !discrepancies.is_empty() {
            warn!(count = discrepancies.len(), "Ledger identity violated");
        }
        Ok(discrepancies)
    }
}
