//! `tradeerp-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{
    CompanyId, CostHistoryId, CustomerId, ExpenseCategoryId, ExpenseId, LedgerEntryId, ProductId,
    ProvisionalSaleId, PurchaseId, ReceiptId, SaleId, SupplierId, UserId,
};
pub use money::{Money, Quantity};
pub use rust_decimal::Decimal;
