use std::sync::Arc;

use chrono::Utc;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        inventory_location::{self, Entity as InventoryLocation, LocationKind},
        stock_level::{self, Entity as StockLevel},
        stock_movement::{self, Entity as StockMovement},
    },
    errors::LedgerError,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewLocation {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub kind: LocationKind,
    pub address_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LocationUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub code: Option<String>,
    pub kind: Option<LocationKind>,
    pub address_id: Option<Option<i64>>,
}

impl NewLocation {
    fn trimmed(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            code: self.code.trim().to_string(),
            ..self
        }
    }
}

impl LocationUpdate {
    fn trimmed(self) -> Self {
        Self {
            name: self.name.map(|n| n.trim().to_string()),
            code: self.code.map(|c| c.trim().to_string()),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LocationFilter {
    pub kind: Option<LocationKind>,
    pub active: Option<bool>,
}

/// Catalog of stock locations.
#[derive(Clone)]
pub struct LocationRegistry {
    db: Arc<DbPool>,
}

impl LocationRegistry {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_location(
        &self,
        input: NewLocation,
    ) -> Result<inventory_location::Model, LedgerError> {
        let input = input.trimmed();
        input.validate()?;
        let db = self.db.as_ref();
        self.ensure_code_free(db, &input.code, None).await?;

        let now = Utc::now();
        let location = inventory_location::ActiveModel {
            name: Set(input.name),
            code: Set(input.code),
            kind: Set(input.kind),
            address_id: Set(input.address_id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(location_id = location.id, code = %location.code, "Location created");
        Ok(location)
    }

    #[instrument(skip(self))]
    pub async fn update_location(
        &self,
        location_id: i64,
        update: LocationUpdate,
    ) -> Result<inventory_location::Model, LedgerError> {
        let update = update.trimmed();
        update.validate()?;
        let db = self.db.as_ref();
        let existing = self.get_location(location_id).await?;

        if let Some(code) = &update.code {
            self.ensure_code_free(db, code, Some(location_id)).await?;
        }

        let mut location: inventory_location::ActiveModel = existing.into();
        if let Some(name) = update.name {
            location.name = Set(name);
        }
        if let Some(code) = update.code {
            location.code = Set(code);
        }
        if let Some(kind) = update.kind {
            location.kind = Set(kind);
        }
        if let Some(address_id) = update.address_id {
            location.address_id = Set(address_id);
        }
        location.updated_at = Set(Utc::now());

        Ok(location.update(db).await?)
    }

    pub async fn get_location(
        &self,
        location_id: i64,
    ) -> Result<inventory_location::Model, LedgerError> {
        InventoryLocation::find_by_id(location_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Location {} not found", location_id)))
    }

    pub async fn list_locations(
        &self,
        filter: LocationFilter,
    ) -> Result<Vec<inventory_location::Model>, LedgerError> {
        let mut query = InventoryLocation::find();
        if let Some(kind) = filter.kind {
            query = query.filter(inventory_location::Column::Kind.eq(kind));
        }
        if let Some(active) = filter.active {
            query = query.filter(inventory_location::Column::IsActive.eq(active));
        }
        Ok(query
            .order_by_asc(inventory_location::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn deactivate_location(
        &self,
        location_id: i64,
    ) -> Result<inventory_location::Model, LedgerError> {
        self.set_active(location_id, false).await
    }

    pub async fn activate_location(
        &self,
        location_id: i64,
    ) -> Result<inventory_location::Model, LedgerError> {
        self.set_active(location_id, true).await
    }

    /// Deletes a location that never held stock. Anything with history must be deactivated.
    #[instrument(skip(self))]
    pub async fn remove_location(&self, location_id: i64) -> Result<(), LedgerError> {
        let db = self.db.as_ref();
        self.get_location(location_id).await?;

        let movements = StockMovement::find()
            .filter(stock_movement::Column::LocationId.eq(location_id))
            .count(db)
            .await?;
        let stock_rows = StockLevel::find()
            .filter(stock_level::Column::LocationId.eq(location_id))
            .count(db)
            .await?;
        if movements > 0 || stock_rows > 0 {
            return Err(LedgerError::Conflict(format!(
                "Location {} has stock history; deactivate it instead",
                location_id
            )));
        }

        InventoryLocation::delete_by_id(location_id).exec(db).await?;
        info!(location_id, "Location removed");
        Ok(())
    }

    async fn set_active(
        &self,
        location_id: i64,
        active: bool,
    ) -> Result<inventory_location::Model, LedgerError> {
        let existing = self.get_location(location_id).await?;
        if existing.is_active == active {
            return Ok(existing);
        }

        let mut location: inventory_location::ActiveModel = existing.into();
        location.is_active = Set(active);
        location.updated_at = Set(Utc::now());
        let updated = location.update(self.db.as_ref()).await?;

        info!(location_id, active, "Location activation changed");
        Ok(updated)
    }

    async fn ensure_code_free(
        &self,
        db: &DbPool,
        code: &str,
        except: Option<i64>,
    ) -> Result<(), LedgerError> {
        let mut query =
            InventoryLocation::find().filter(inventory_location::Column::Code.eq(code));
        if let Some(id) = except {
            query = query.filter(inventory_location::Column::Id.ne(id));
        }
        if query.one(db).await?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "Location code '{}' is already in use",
                code
            )));
        }
        Ok(())
    }
}
