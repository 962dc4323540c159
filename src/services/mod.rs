//! Ledger services. Each one owns an `Arc<DbPool>` and opens its own transactions.

pub mod adjustments;
pub mod assembly;
pub mod catalog;
pub mod ledger;
pub mod locations;
pub mod order_restock;
pub mod procurement;
pub mod recipes;
pub mod reports;
pub mod transfers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::db::DbPool;
use crate::events::EventSender;

/// Runtime knobs shared by the mutating services.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub operation_timeout: Duration,
    pub default_page_size: u64,
    pub max_page_size: u64,
    pub production_location_id: i64,
    pub receiving_location_id: i64,
    pub restock_location_id: i64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from(&LedgerConfig::for_database(String::new()))
    }
}

impl From<&LedgerConfig> for LedgerSettings {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            operation_timeout: cfg.operation_timeout(),
            default_page_size: cfg.default_page_size,
            max_page_size: cfg.max_page_size,
            production_location_id: cfg.production_location_id,
            receiving_location_id: cfg.receiving_location_id,
            restock_location_id: cfg.restock_location_id,
        }
    }
}

/// Every ledger service wired to one pool, settings and event channel.
#[derive(Clone)]
pub struct LedgerServices {
    pub locations: Arc<locations::LocationRegistry>,
    pub catalog: Arc<catalog::VariantCatalog>,
    pub ledger: Arc<ledger::StockLedger>,
    pub transfers: Arc<transfers::TransferService>,
    pub adjustments: Arc<adjustments::AdjustmentService>,
    pub recipes: Arc<recipes::RecipeBook>,
    pub assembly: Arc<assembly::AssemblyService>,
    pub procurement: Arc<procurement::ProcurementService>,
    pub order_restock: Arc<order_restock::OrderRestockService>,
    pub reports: Arc<reports::StockReports>,
}

impl LedgerServices {
    pub fn new(
        db: Arc<DbPool>,
        settings: LedgerSettings,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            locations: Arc::new(locations::LocationRegistry::new(db.clone())),
            catalog: Arc::new(catalog::VariantCatalog::new(db.clone())),
            ledger: Arc::new(ledger::StockLedger::new(
                db.clone(),
                settings.clone(),
                event_sender.clone(),
            )),
            transfers: Arc::new(transfers::TransferService::new(
                db.clone(),
                settings.clone(),
                event_sender.clone(),
            )),
            adjustments: Arc::new(adjustments::AdjustmentService::new(
                db.clone(),
                settings.clone(),
                event_sender.clone(),
            )),
            recipes: Arc::new(recipes::RecipeBook::new(db.clone())),
            assembly: Arc::new(assembly::AssemblyService::new(
                db.clone(),
                settings.clone(),
                event_sender.clone(),
            )),
            procurement: Arc::new(procurement::ProcurementService::new(
                db.clone(),
                settings.clone(),
                event_sender.clone(),
            )),
            order_restock: Arc::new(order_restock::OrderRestockService::new(
                db.clone(),
                settings,
                event_sender,
            )),
            reports: Arc::new(reports::StockReports::new(db)),
        }
    }
}

/// Human-readable document number, e.g. `ASM-20240131-1A2B3C4D`.
pub(crate) fn document_number(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", prefix, Utc::now().format("%Y%m%d"), suffix)
}
