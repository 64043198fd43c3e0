//! Application services of the consistency core.
//!
//! Every mutating operation authorizes the actor once, opens exactly one unit
//! of work, and commits it once. The workflows reuse the ledger and stock
//! primitives inside their own unit of work, so a workflow either lands as a
//! whole or not at all.

pub mod ledger;
pub mod provisional_sales;
pub mod purchase_approval;
pub mod receipts;
pub mod stock;

pub use ledger::LedgerEngine;
pub use provisional_sales::{Conversion, ProvisionalSaleStateMachine};
pub use purchase_approval::{ApprovalOutcome, PurchaseApprovalWorkflow};
pub use receipts::PaymentReceiptService;
pub use stock::StockMutator;
