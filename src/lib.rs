//! Inventory Ledger
//!
//! Multi-location stock ledger with reason-coded movements, transfers, BOM assembly,
//! purchase order receiving and cancelled-order restocking.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use config::{LedgerConfig, LedgerConfigError};
pub use db::DbPool;
pub use errors::LedgerError;
pub use events::{EventSender, LedgerEvent};
pub use services::{
    adjustments::{CountLine, CountVariance},
    assembly::{component_requirements, ComponentRequirement},
    ledger::{LedgerDiscrepancy, StockMoveCommand, StockReference},
    procurement::{NewPurchaseOrder, NewPurchaseOrderLine, PurchaseOrderDetails},
    order_restock::RestockOutcome,
    reports::{snapshot_to_csv, SnapshotRow},
    LedgerServices, LedgerSettings,
};
