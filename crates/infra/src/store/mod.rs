//! Persistence boundary.
//!
//! Services talk to storage only through a [`UnitOfWork`] obtained from a
//! [`Store`]. Everything staged through one unit of work commits or rolls back
//! together.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{
    DirectoryRepository, LedgerRepository, PurchaseRepository, ReceiptRepository,
    SalesRepository, StockRepository, Store, UnitOfWork,
};
