use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One BOM line: `quantity_needed` units of the child per unit of the parent.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_recipes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub parent_variant_id: i64,
    pub child_variant_id: i64,
    #[sea_orm(column_type = "Decimal(None)")]
    pub quantity_needed: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::ChildVariantId",
        to = "super::product_variant::Column::Id"
    )]
    Child,
}

impl ActiveModelBehavior for ActiveModel {}
