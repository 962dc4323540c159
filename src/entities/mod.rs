//! sea-orm entities for every table the ledger reads or writes.

pub mod inventory_location;
pub mod product_recipe;
pub mod product_variant;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod sales_order;
pub mod sales_order_item;
pub mod stock_assembly;
pub mod stock_level;
pub mod stock_movement;
pub mod stock_transfer;

pub use inventory_location::{Entity as InventoryLocation, LocationKind, Model as LocationModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use stock_level::{Entity as StockLevel, Model as StockLevelModel};
pub use stock_movement::{
    Entity as StockMovement, Model as StockMovementModel, MovementReason, ReferenceKind,
};
