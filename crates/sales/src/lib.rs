//! Sales domain module: provisional sales (quotes) and their conversion into firm sales.
//!
//! This crate contains business rules for sales, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod provisional;
pub mod sale;

pub use provisional::{
    NewProvisionalSale, ProvisionalSale, ProvisionalSalePatch, ProvisionalSaleStatus,
};
pub use sale::{Sale, SaleLine, SaleType, lines_total};
