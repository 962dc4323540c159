use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Header row correlating the debit and credit legs of one transfer.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transfers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub transfer_number: String,
    pub variant_id: i64,
    pub quantity: i64,
    pub from_location_id: i64,
    pub to_location_id: i64,
    pub actor_id: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
