//! Inventory domain module: per-(company, product) on-hand stock.
//!
//! This crate contains business rules for stock, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod stock;

pub use stock::{Stock, StockAdjustment, StockKey};
