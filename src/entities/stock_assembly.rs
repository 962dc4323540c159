use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only log of kit production (positive quantity) and decomposition (negative).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_assemblies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub assembly_number: String,
    pub variant_id: i64,
    pub location_id: i64,
    pub quantity_produced: i64,
    #[sea_orm(column_type = "Decimal(None)")]
    pub total_cost: Decimal,
    pub actor_id: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_disassembly(&self) -> bool {
        self.quantity_produced < 0
    }
}
