//! Infrastructure layer: stores, configuration, and the services that compose
//! the pure domain crates into atomic operations.

pub mod config;
pub mod error;
pub mod services;
pub mod store;


pub use config::{ConfigError, StoreBackend, StoreConfig};
pub use error::{CoreError, StoreError};
pub use services::{
    ApprovalOutcome, Conversion, LedgerEngine, PaymentReceiptService, ProvisionalSaleStateMachine,
    PurchaseApprovalWorkflow, StockMutator,
};
pub use store::{InMemoryStore, PostgresStore, Store, UnitOfWork};
