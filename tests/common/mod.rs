#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use inventory_ledger::{
    db::{self, DbConfig, DbPool},
    entities::{
        inventory_location::{self, LocationKind},
        product_variant,
        sales_order::{self, SalesOrderStatus},
        sales_order_item,
        stock_movement::{self, MovementReason},
    },
    events::{EventSender, LedgerEvent},
    services::{
        catalog::NewVariant, ledger::StockMoveCommand, locations::NewLocation, LedgerServices,
        LedgerSettings,
    },
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;

pub const ACTOR: i64 = 42;

/// Single-connection in-memory SQLite; every connection would otherwise see its own database.
fn memory_config() -> DbConfig {
    DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    }
}

/// Ledger services over a fresh in-memory SQLite database.
///
/// The default location is wired as the production, receiving and restock location.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: LedgerServices,
    pub main: inventory_location::Model,
    events: mpsc::Receiver<LedgerEvent>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5)).await
    }

    pub async fn with_timeout(operation_timeout: Duration) -> Self {
        Self::build(memory_config(), operation_timeout, 1024, "MAIN").await
    }

    /// Event channel of the given capacity that nobody drains unless the test does.
    pub async fn with_event_capacity(capacity: usize) -> Self {
        Self::build(memory_config(), Duration::from_secs(5), capacity, "MAIN").await
    }

    /// Connects to an existing database; location codes must be unique per run.
    pub async fn connect(config: DbConfig, main_code: &str) -> Self {
        Self::build(config, Duration::from_secs(30), 1024, main_code).await
    }

    async fn build(
        config: DbConfig,
        operation_timeout: Duration,
        event_capacity: usize,
        main_code: &str,
    ) -> Self {
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let bootstrap = LedgerServices::new(db.clone(), LedgerSettings::default(), None);
        let main = bootstrap
            .locations
            .create_location(NewLocation {
                name: "Main Warehouse".to_string(),
                code: main_code.to_string(),
                kind: LocationKind::Warehouse,
                address_id: None,
            })
            .await
            .expect("failed to create main location");

        let settings = LedgerSettings {
            operation_timeout,
            production_location_id: main.id,
            receiving_location_id: main.id,
            restock_location_id: main.id,
            ..LedgerSettings::default()
        };
        let (sender, events) = EventSender::channel(event_capacity);
        let services = LedgerServices::new(db.clone(), settings, Some(Arc::new(sender)));

        Self {
            db,
            services,
            main,
            events,
        }
    }

    pub async fn location(&self, code: &str) -> inventory_location::Model {
        self.services
            .locations
            .create_location(NewLocation {
                name: format!("Location {}", code),
                code: code.to_string(),
                kind: LocationKind::Store,
                address_id: None,
            })
            .await
            .expect("failed to create location")
    }

    pub async fn variant(&self, sku: &str) -> product_variant::Model {
        self.priced_variant(sku, None).await
    }

    pub async fn priced_variant(
        &self,
        sku: &str,
        cost_price: Option<Decimal>,
    ) -> product_variant::Model {
        self.services
            .catalog
            .register_variant(NewVariant {
                sku: sku.to_string(),
                name: format!("Variant {}", sku),
                cost_price,
            })
            .await
            .expect("failed to register variant")
    }

    /// Seeds stock through the ledger so the movement history stays consistent.
    pub async fn stock(&self, location_id: i64, variant_id: i64, quantity: i64) {
        self.services
            .ledger
            .execute_movement(StockMoveCommand::new(
                location_id,
                variant_id,
                quantity,
                MovementReason::Adjustment,
                ACTOR,
            ))
            .await
            .expect("failed to seed stock");
    }

    pub async fn qty(&self, location_id: i64, variant_id: i64) -> i64 {
        self.services
            .ledger
            .get_stock_level(variant_id, location_id)
            .await
            .expect("failed to read stock level")
    }

    pub async fn movements(&self, variant_id: i64) -> Vec<stock_movement::Model> {
        self.services
            .ledger
            .movement_history(Some(variant_id), None, 1, 500)
            .await
            .expect("failed to read movements")
    }

    pub async fn assert_consistent(&self) {
        let discrepancies = self
            .services
            .ledger
            .reconcile()
            .await
            .expect("reconcile failed");
        assert!(
            discrepancies.is_empty(),
            "ledger identity violated: {:?}",
            discrepancies
        );
    }

    /// Inserts a sales order directly; order placement is outside the ledger.
    pub async fn sales_order(
        &self,
        status: SalesOrderStatus,
        lines: &[(i64, i64)],
    ) -> sales_order::Model {
        let now = Utc::now();
        let order = sales_order::ActiveModel {
            order_number: Set(format!("SO-{}", uuid::Uuid::new_v4().simple())),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("failed to insert sales order");

        for (variant_id, quantity) in lines {
            sales_order_item::ActiveModel {
                order_id: Set(order.id),
                variant_id: Set(*variant_id),
                quantity: Set(*quantity),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await
            .expect("failed to insert sales order item");
        }
        order
    }

    /// Events published so far, without waiting for more.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
