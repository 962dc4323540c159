use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::product_variant::{self, Entity as ProductVariant},
    errors::LedgerError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewVariant {
    #[validate(length(min = 1, max = 100))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub cost_price: Option<Decimal>,
}

/// Minimal write access to the variant catalog, for operators and fixtures.
#[derive(Clone)]
pub struct VariantCatalog {
    db: Arc<DbPool>,
}

impl VariantCatalog {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn register_variant(
        &self,
        input: NewVariant,
    ) -> Result<product_variant::Model, LedgerError> {
        let input = NewVariant {
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            ..input
        };
        input.validate()?;
        if input.cost_price.map_or(false, |c| c.is_sign_negative()) {
            return Err(LedgerError::InvalidInput(
                "cost price must not be negative".to_string(),
            ));
        }

        let db = self.db.as_ref();
        let sku = input.sku;
        let taken = ProductVariant::find()
            .filter(product_variant::Column::Sku.eq(sku.as_str()))
            .one(db)
            .await?;
        if taken.is_some() {
            return Err(LedgerError::Conflict(format!("SKU '{}' already exists", sku)));
        }

        let variant = product_variant::ActiveModel {
            sku: Set(sku),
            name: Set(input.name),
            cost_price: Set(input.cost_price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(variant_id = variant.id, sku = %variant.sku, "Variant registered");
        Ok(variant)
    }

    pub async fn get_variant(&self, variant_id: i64) -> Result<product_variant::Model, LedgerError> {
        ProductVariant::find_by_id(variant_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Variant {} not found", variant_id)))
    }

    pub async fn set_cost_price(
        &self,
        variant_id: i64,
        cost_price: Option<Decimal>,
    ) -> Result<product_variant::Model, LedgerError> {
        if cost_price.map_or(false, |c| c.is_sign_negative()) {
            return Err(LedgerError::InvalidInput(
                "cost price must not be negative".to_string(),
            ));
        }
        let mut variant: product_variant::ActiveModel = self.get_variant(variant_id).await?.into();
        variant.cost_price = Set(cost_price);
        Ok(variant.update(self.db.as_ref()).await?)
    }

    pub async fn set_active(
        &self,
        variant_id: i64,
        active: bool,
    ) -> Result<product_variant::Model, LedgerError> {
        let mut variant: product_variant::ActiveModel = self.get_variant(variant_id).await?.into();
        variant.is_active = Set(active);
        Ok(variant.update(self.db.as_ref()).await?)
    }
}
