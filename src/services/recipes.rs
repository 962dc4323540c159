use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::*;
use tracing::{info, instrument};

use crate::{
    db::DbPool,
    entities::{
        product_recipe::{self, Entity as ProductRecipe},
        product_variant::{self, Entity as ProductVariant},
    },
    errors::LedgerError,
};

/// Recipe lines of a kit, ordered by child variant so callers see a stable sequence.
pub(crate) async fn load_recipe<C: ConnectionTrait>(
    db: &C,
    parent_variant_id: i64,
) -> Result<Vec<product_recipe::Model>, LedgerError> {
    Ok(ProductRecipe::find()
        .filter(product_recipe::Column::ParentVariantId.eq(parent_variant_id))
        .order_by_asc(product_recipe::Column::ChildVariantId)
        .all(db)
        .await?)
}

/// Key of the transaction-scoped advisory lock guarding recipe edits on Postgres.
const RECIPE_GRAPH_LOCK: i64 = 0x5245_4349_5045;

/// Serializes recipe edits so concurrent cycle checks see each other's lines.
///
/// Postgres takes an advisory lock held until the transaction ends. SQLite takes the
/// database write lock up front with a no-op update.
async fn lock_recipe_graph(
    txn: &DatabaseTransaction,
    parent_variant_id: i64,
) -> Result<(), LedgerError> {
    match txn.get_database_backend() {
        DbBackend::Postgres => {
            txn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT pg_advisory_xact_lock($1)",
                [RECIPE_GRAPH_LOCK.into()],
            ))
            .await?;
        }
        _ => {
            ProductVariant::update_many()
                .col_expr(
                    product_variant::Column::Id,
                    Expr::col(product_variant::Column::Id).into(),
                )
                .filter(product_variant::Column::Id.eq(parent_variant_id))
                .exec(txn)
                .await?;
        }
    }
    Ok(())
}

/// Bill-of-materials definitions for kits.
#[derive(Clone)]
pub struct RecipeBook {
    db: Arc<DbPool>,
}

impl RecipeBook {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Creates or replaces the line `parent <- quantity_needed x child`.
    ///
    /// Lines that would make a kit contain itself, directly or through sub-kits, are refused.
    #[instrument(skip(self))]
    pub async fn define_recipe_line(
        &self,
        parent_variant_id: i64,
        child_variant_id: i64,
        quantity_needed: Decimal,
    ) -> Result<product_recipe::Model, LedgerError> {
        if quantity_needed <= Decimal::ZERO {
            return Err(LedgerError::InvalidQuantity(format!(
                "quantity needed must be positive, got {}",
                quantity_needed
            )));
        }
        if parent_variant_id == child_variant_id {
            return Err(LedgerError::InvalidInput(format!(
                "variant {} cannot be a component of itself",
                parent_variant_id
            )));
        }

        let txn = self.db.begin().await?;
        lock_recipe_graph(&txn, parent_variant_id).await?;
        for variant_id in [parent_variant_id, child_variant_id] {
            if ProductVariant::find_by_id(variant_id).one(&txn).await?.is_none() {
                return Err(LedgerError::invalid_variant(
                    variant_id,
                    "variant does not exist",
                ));
            }
        }

        let edges = recipe_edges(&txn).await?;
        if reaches(&edges, child_variant_id, parent_variant_id) {
            return Err(LedgerError::InvalidInput(format!(
                "variant {} already contains variant {}; the line would create a cycle",
                child_variant_id, parent_variant_id
            )));
        }

        let existing = ProductRecipe::find()
            .filter(product_recipe::Column::ParentVariantId.eq(parent_variant_id))
            .filter(product_recipe::Column::ChildVariantId.eq(child_variant_id))
            .one(&txn)
            .await?;

        let line = match existing {
            Some(line) => {
                let mut line: product_recipe::ActiveModel = line.into();
                line.quantity_needed = Set(quantity_needed);
                line.update(&txn).await?
            }
            None => {
                product_recipe::ActiveModel {
                    parent_variant_id: Set(parent_variant_id),
                    child_variant_id: Set(child_variant_id),
                    quantity_needed: Set(quantity_needed),
                    ..Default::default()
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;

        info!(
            parent_variant_id,
            child_variant_id,
            quantity_needed = %quantity_needed,
            "Recipe line defined"
        );
        Ok(line)
    }

    pub async fn get_recipe(
        &self,
        parent_variant_id: i64,
    ) -> Result<Vec<product_recipe::Model>, LedgerError> {
        load_recipe(self.db.as_ref(), parent_variant_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_recipe_line(
        &self,
        parent_variant_id: i64,
        child_variant_id: i64,
    ) -> Result<(), LedgerError> {
        let result = ProductRecipe::delete_many()
            .filter(product_recipe::Column::ParentVariantId.eq(parent_variant_id))
            .filter(product_recipe::Column::ChildVariantId.eq(child_variant_id))
            .exec(self.db.as_ref())
            .await?;
        if result.rows_affected == 0 {
            return Err(LedgerError::NotFound(format!(
                "Recipe line {} -> {} not found",
                parent_variant_id, child_variant_id
            )));
        }
        Ok(())
    }
}

async fn recipe_edges<C: ConnectionTrait>(db: &C) -> Result<HashMap<i64, Vec<i64>>, LedgerError> {
    let mut edges: HashMap<i64, Vec<i64>> = HashMap::new();
    for line in ProductRecipe::find().all(db).await? {
        edges
            .entry(line.parent_variant_id)
            .or_default()
            .push(line.child_variant_id);
    }
    Ok(edges)
}

/// Whether `target` is reachable from `start` by following parent -> child edges.
fn reaches(edges: &HashMap<i64, Vec<i64>>, start: i64, target: i64) -> bool {
    let mut stack = vec![start];
    let mut visited = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(children) = edges.get(&node) {
            stack.extend(children.iter().copied());
        }
    }
    false
}
