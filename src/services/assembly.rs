use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
    db::{begin_ledger_txn, with_deadline, DbPool},
    entities::{
        product_recipe,
        product_variant::{self, Entity as ProductVariant},
        stock_assembly::{self, Entity as StockAssembly},
        stock_movement::{MovementReason, ReferenceKind},
    },
    errors::LedgerError,
    events::{publish_all, EventSender, LedgerEvent},
    services::{
        document_number,
        ledger::{
            apply_movements, current_quantity, movement_events, record_applied, record_rejected,
            AppliedMovement, StockMoveCommand,
        },
        recipes::load_recipe,
        LedgerSettings,
    },
};

/// Whole units of one component needed for a given kit quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRequirement {
    pub variant_id: i64,
    pub quantity: i64,
}

/// Expands a recipe for `kit_quantity` kits.
///
/// Each line must come out to a whole number of units; fractional requirements are rejected
/// rather than rounded.
pub fn component_requirements(
    recipe: &[product_recipe::Model],
    kit_quantity: i64,
) -> Result<Vec<ComponentRequirement>, LedgerError> {
    recipe
        .iter()
        .map(|line| {
            let required = line
                .quantity_needed
                .checked_mul(Decimal::from(kit_quantity))
                .ok_or_else(|| {
                    LedgerError::InvalidQuantity(format!(
                        "requirement for variant {} overflows at {} kits",
                        line.child_variant_id, kit_quantity
                    ))
                })?;
            if !required.fract().is_zero() {
                return Err(LedgerError::InvalidQuantity(format!(
                    "variant {} needs {} units for {} kits; only whole units can be moved",
                    line.child_variant_id, required, kit_quantity
                )));
            }
            let quantity = required.to_i64().ok_or_else(|| {
                LedgerError::InvalidQuantity(format!(
                    "requirement {} for variant {} is out of range",
                    required, line.child_variant_id
                ))
            })?;
            Ok(ComponentRequirement {
                variant_id: line.child_variant_id,
                quantity,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Assemble,
    Disassemble,
}

impl Direction {
    fn operation(self) -> &'static str {
        match self {
            Direction::Assemble => "assemble",
            Direction::Disassemble => "disassemble",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Direction::Assemble => "ASM",
            Direction::Disassemble => "DIS",
        }
    }
}

/// Builds kits from components and breaks them back down.
#[derive(Clone)]
pub struct AssemblyService {
    db: Arc<DbPool>,
    settings: LedgerSettings,
    event_sender: Option<Arc<EventSender>>,
}

impl AssemblyService {
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

    /// Assembles `quantity` kits at the configured production location.
    pub async fn assemble(
        &self,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<stock_assembly::Model, LedgerError> {
        self.assemble_at(
            self.settings.production_location_id,
            kit_variant_id,
            quantity,
            actor_id,
        )
        .await
    }

    /// Consumes every component and credits the kit in one transaction.
    #[instrument(skip(self))]
    pub async fn assemble_at(
        &self,
        location_id: i64,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<stock_assembly::Model, LedgerError> {
        self.run(
            Direction::Assemble,
            location_id,
            kit_variant_id,
            quantity,
            actor_id,
        )
        .await
    }

    /// Disassembles `quantity` kits at the configured production location.
    pub async fn disassemble(
        &self,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<stock_assembly::Model, LedgerError> {
        self.disassemble_at(
            self.settings.production_location_id,
            kit_variant_id,
            quantity,
            actor_id,
        )
        .await
    }

    /// Consumes kits and credits their components in one transaction.
    #[instrument(skip(self))]
    pub async fn disassemble_at(
        &self,
        location_id: i64,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<stock_assembly::Model, LedgerError> {
        self.run(
            Direction::Disassemble,
            location_id,
            kit_variant_id,
            quantity,
            actor_id,
        )
        .await
    }

    /// Assembly log, newest first.
    pub async fn list_assemblies(
        &self,
        kit_variant_id: Option<i64>,
    ) -> Result<Vec<stock_assembly::Model>, LedgerError> {
        let mut query = StockAssembly::find();
        if let Some(variant_id) = kit_variant_id {
            query = query.filter(stock_assembly::Column::VariantId.eq(variant_id));
        }
        Ok(query
            .order_by_desc(stock_assembly::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    async fn run(
        &self,
        direction: Direction,
        location_id: i64,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<stock_assembly::Model, LedgerError> {
        let operation = direction.operation();
        if quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(format!(
                "{} quantity must be positive, got {}",
                operation, quantity
            )));
        }

        let result = with_deadline(
            operation,
            self.settings.operation_timeout,
            self.run_tx(direction, location_id, kit_variant_id, quantity, actor_id),
        )
        .await;

        let (assembly, applied) = result.map_err(|e| {
            record_rejected(operation, &e);
            warn!(error = %e, kit_variant_id, quantity, "{} rejected", operation);
            e
        })?;
        record_applied(operation, &applied);

        info!(
            assembly_id = assembly.id,
            assembly_number = %assembly.assembly_number,
            quantity_produced = assembly.quantity_produced,
            "{} committed",
            operation
        );

        let mut events = movement_events(&applied);
        events.push(LedgerEvent::AssemblyCompleted {
            assembly_id: assembly.id,
            assembly_number: assembly.assembly_number.clone(),
            variant_id: kit_variant_id,
            quantity_produced: assembly.quantity_produced,
        });
        publish_all(self.event_sender.as_deref(), events);

        Ok(assembly)
    }

    async fn run_tx(
        &self,
        direction: Direction,
        location_id: i64,
        kit_variant_id: i64,
        quantity: i64,
        actor_id: i64,
    ) -> Result<(stock_assembly::Model, Vec<AppliedMovement>), LedgerError> {
        let txn = begin_ledger_txn(&self.db, self.settings.operation_timeout).await?;

        let recipe = load_recipe(&txn, kit_variant_id).await?;
        if recipe.is_empty() {
            return Err(LedgerError::NoRecipeDefined(kit_variant_id));
        }
        let requirements = component_requirements(&recipe, quantity)?;

        // Pre-flight only; the guarded updates in apply_movements are what close the race.
        match direction {
            Direction::Assemble => {
                for req in &requirements {
                    ensure_available(&txn, location_id, req.variant_id, req.quantity).await?;
                }
            }
            Direction::Disassemble => {
                ensure_available(&txn, location_id, kit_variant_id, quantity).await?;
            }
        }

        let total_cost = requirements_cost(&txn, &requirements).await?;
        let produced = match direction {
            Direction::Assemble => quantity,
            Direction::Disassemble => -quantity,
        };

        let assembly = stock_assembly::ActiveModel {
            assembly_number: Set(document_number(direction.prefix())),
            variant_id: Set(kit_variant_id),
            location_id: Set(location_id),
            quantity_produced: Set(produced),
            total_cost: Set(total_cost),
            actor_id: Set(actor_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let commands = assembly_commands(
            direction,
            location_id,
            kit_variant_id,
            quantity,
            &requirements,
            actor_id,
        )
        .into_iter()
        .map(|cmd| cmd.with_reference(ReferenceKind::Assembly, assembly.id))
        .collect::<Vec<_>>();
        let applied = apply_movements(&txn, &commands).await?;

        txn.commit().await?;
        Ok((assembly, applied))
    }
}

/// Debits first, then credits.
fn assembly_commands(
    direction: Direction,
    location_id: i64,
    kit_variant_id: i64,
    quantity: i64,
    requirements: &[ComponentRequirement],
    actor_id: i64,
) -> Vec<StockMoveCommand> {
    let mut commands = Vec::with_capacity(requirements.len() + 1);
    match direction {
        Direction::Assemble => {
            for req in requirements {
                commands.push(StockMoveCommand::new(
                    location_id,
                    req.variant_id,
                    -req.quantity,
                    MovementReason::AssemblyConsumption,
                    actor_id,
                ));
            }
            commands.push(StockMoveCommand::new(
                location_id,
                kit_variant_id,
                quantity,
                MovementReason::AssemblyOutput,
                actor_id,
            ));
        }
        Direction::Disassemble => {
            commands.push(StockMoveCommand::new(
                location_id,
                kit_variant_id,
                -quantity,
                MovementReason::AssemblyConsumption,
                actor_id,
            ));
            for req in requirements {
                commands.push(StockMoveCommand::new(
                    location_id,
                    req.variant_id,
                    req.quantity,
                    MovementReason::AssemblyOutput,
                    actor_id,
                ));
            }
        }
    }
    commands
}

async fn ensure_available(
    txn: &DatabaseTransaction,
    location_id: i64,
    variant_id: i64,
    required: i64,
) -> Result<(), LedgerError> {
    let available = current_quantity(txn, location_id, variant_id).await?;
    if available < required {
        return Err(LedgerError::InsufficientStock {
            location_id,
            variant_id,
            requested: required,
            available,
        });
    }
    Ok(())
}

/// Component cost at current cost prices; unpriced components count as zero.
async fn requirements_cost(
    txn: &DatabaseTransaction,
    requirements: &[ComponentRequirement],
) -> Result<Decimal, LedgerError> {
    let ids: Vec<i64> = requirements.iter().map(|r| r.variant_id).collect();
    let prices: HashMap<i64, Decimal> = ProductVariant::find()
        .filter(product_variant::Column::Id.is_in(ids))
        .all(txn)
        .await?
        .into_iter()
        .filter_map(|v| v.cost_price.map(|price| (v.id, price)))
        .collect();

    requirements.iter().try_fold(Decimal::ZERO, |total, req| {
        let line_cost = match prices.get(&req.variant_id) {
            Some(price) => price.checked_mul(Decimal::from(req.quantity)),
            None => Some(Decimal::ZERO),
        };
        line_cost
            .and_then(|cost| total.checked_add(cost))
            .ok_or_else(|| {
                LedgerError::InvalidQuantity(format!(
                    "cost of variant {} x {} is out of range",
                    req.variant_id, req.quantity
                ))
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn line(child: i64, needed: Decimal) -> product_recipe::Model {
        product_recipe::Model {
            id: child,
            parent_variant_id: 100,
            child_variant_id: child,
            quantity_needed: needed,
        }
    }

    #[rstest]
    #[case(dec!(2), 1, 2)]
    #[case(dec!(2), 5, 10)]
    #[case(dec!(0.5), 4, 2)]
    #[case(dec!(1.25), 8, 10)]
    fn requirements_scale_with_kit_quantity(
        #[case] needed: Decimal,
        #[case] kits: i64,
        #[case] expected: i64,
    ) {
        let reqs = component_requirements(&[line(7, needed)], kits).unwrap();
        assert_eq!(
            reqs,
            vec![ComponentRequirement {
                variant_id: 7,
                quantity: expected
            }]
        );
    }

    #[rstest]
    #[case(dec!(0.5), 3)]
    #[case(dec!(0.333), 1)]
    fn fractional_requirements_are_rejected(#[case] needed: Decimal, #[case] kits: i64) {
        assert_matches!(
            component_requirements(&[line(7, needed)], kits),
            Err(LedgerError::InvalidQuantity(_))
        );
    }

    #[test]
    fn overflowing_requirement_is_rejected() {
        assert_matches!(
            component_requirements(&[line(7, Decimal::MAX)], i64::MAX),
            Err(LedgerError::InvalidQuantity(_))
        );
    }

    #[test]
    fn assembly_debits_components_before_crediting_kit() {
        let reqs = [
            ComponentRequirement {
                variant_id: 1,
                quantity: 4,
            },
            ComponentRequirement {
                variant_id: 2,
                quantity: 6,
            },
        ];
        let cmds = assembly_commands(Direction::Assemble, 9, 100, 2, &reqs, 5);
        let changes: Vec<(i64, i64)> = cmds
            .iter()
            .map(|c| (c.variant_id, c.quantity_change))
            .collect();
        assert_eq!(changes, vec![(1, -4), (2, -6), (100, 2)]);
        assert!(cmds.iter().all(|c| c.location_id == 9));
    }

    #[test]
    fn disassembly_mirrors_assembly() {
        let reqs = [ComponentRequirement {
            variant_id: 1,
            quantity: 4,
        }];
        let cmds = assembly_commands(Direction::Disassemble, 9, 100, 2, &reqs, 5);
        assert_eq!(cmds[0].quantity_change, -2);
        assert_eq!(cmds[0].reason, MovementReason::AssemblyConsumption);
        assert_eq!(cmds[1].quantity_change, 4);
        assert_eq!(cmds[1].reason, MovementReason::AssemblyOutput);
    }
}
