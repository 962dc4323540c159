use std::sync::Arc;

use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    db::DbPool,
    entities::{inventory_location, product_variant, stock_level},
    errors::LedgerError,
};

pub const SNAPSHOT_HEADER: [&str; 6] = [
    "Location ID",
    "Location Name",
    "Variant ID",
    "Variant Name",
    "Quantity",
    "Safety Stock",
];

/// One stock row joined with its location and variant names.
#[derive(Debug, Clone, PartialEq, Eq, FromQueryResult, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub location_id: i64,
    pub location_name: String,
    pub variant_id: i64,
    pub variant_name: String,
    pub quantity: i64,
    pub safety_stock: i64,
}

/// Renders snapshot rows as CSV with a fixed header line.
pub fn snapshot_to_csv(rows: &[SnapshotRow]) -> Result<String, LedgerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SNAPSHOT_HEADER).map_err(export_error)?;
    for row in rows {
        writer
            .write_record([
                row.location_id.to_string(),
                row.location_name.clone(),
                row.variant_id.to_string(),
                row.variant_name.clone(),
                row.quantity.to_string(),
                row.safety_stock.to_string(),
            ])
            .map_err(export_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| LedgerError::ExportError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LedgerError::ExportError(e.to_string()))
}

fn export_error(error: csv::Error) -> LedgerError {
    LedgerError::ExportError(error.to_string())
}

/// Read-only stock reporting.
#[derive(Clone)]
pub struct StockReports {
    db: Arc<DbPool>,
}

impl StockReports {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Every stock row with names, ordered by location then variant.
    #[instrument(skip(self))]
    pub async fn export_snapshot(&self) -> Result<Vec<SnapshotRow>, LedgerError> {
        let rows = stock_level::Entity::find()
            .select_only()
            .column_as(stock_level::Column::LocationId, "location_id")
            .column_as(inventory_location::Column::Name, "location_name")
            .column_as(stock_level::Column::VariantId, "variant_id")
            .column_as(product_variant::Column::Name, "variant_name")
            .column_as(stock_level::Column::Quantity, "quantity")
            .column_as(stock_level::Column::SafetyStock, "safety_stock")
            .join(JoinType::InnerJoin, stock_level::Relation::Location.def())
            .join(JoinType::InnerJoin, stock_level::Relation::Variant.def())
            .order_by_asc(stock_level::Column::LocationId)
            .order_by_asc(stock_level::Column::VariantId)
            .into_model::<SnapshotRow>()
            .all(self.db.as_ref())
            .await?;

        info!(rows = rows.len(), "Stock snapshot exported");
        Ok(rows)
    }

    pub async fn export_snapshot_csv(&self) -> Result<String, LedgerError> {
        let rows = self.export_snapshot().await?;
        snapshot_to_csv(&rows)
    }
}
