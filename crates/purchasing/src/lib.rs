//! Purchasing domain module (purchases, expense allocation, approval planning).
//!
//! This crate contains business rules for purchases, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod purchase;

pub use purchase::{
    ApprovalPlan, ExpenseAddendum, ExpenseInput, FirstApproval, ProductCost, ProductCostHistory,
    Purchase, PurchaseExpense, PurchaseLine, PurchaseStatus, allocate_expense_per_unit,
};
