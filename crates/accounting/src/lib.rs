//! Supplier accounting: running-balance ledger and payment receipts.
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod ledger;
pub mod receipt;

pub use ledger::{
    Direction, LedgerEntry, NewLedgerEntry, ReferenceKind, Supplier, SupplierAccount,
    next_entry, rebalance, verify,
};
pub use receipt::{ReceiptStatus, ReceiptType, SupplierPaymentReceipt};
