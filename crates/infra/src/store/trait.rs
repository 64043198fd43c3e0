use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use tradeerp_accounting::{LedgerEntry, ReferenceKind, Supplier, SupplierPaymentReceipt};
use tradeerp_core::{
    CompanyId, CustomerId, ExpectedVersion, LedgerEntryId, Money, ProductId, ProvisionalSaleId,
    PurchaseId, Quantity, ReceiptId, SupplierId,
};
use tradeerp_inventory::{Stock, StockKey};
use tradeerp_purchasing::{ProductCostHistory, Purchase, PurchaseExpense};
use tradeerp_sales::{ProvisionalSale, Sale};

use crate::error::StoreError;

/// Reference data the core reads but does not own.
#[async_trait]
pub trait DirectoryRepository: Send {
    async fn company_exists(&mut self, id: CompanyId) -> Result<bool, StoreError>;

    async fn customer_exists(&mut self, id: CustomerId) -> Result<bool, StoreError>;

    /// The subset of `ids` with no product row.
    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError>;

    async fn supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError>;

    /// Like [`supplier`](Self::supplier), but holds the supplier row until the
    /// unit of work ends. Every ledger write for the supplier goes through this.
    async fn lock_supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError>;
}

#[async_trait]
pub trait LedgerRepository: Send {
    /// Highest-sequence entry of the supplier, if any.
    async fn latest_entry(&mut self, supplier_id: SupplierId)
    -> Result<Option<LedgerEntry>, StoreError>;

    /// All entries of the supplier in ascending sequence order.
    async fn entries(&mut self, supplier_id: SupplierId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Delete every entry of `supplier_id` matching the reference. Returns the number removed.
    async fn delete_entries(
        &mut self,
        supplier_id: SupplierId,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Result<u64, StoreError>;

    async fn set_running_balance(
        &mut self,
        id: LedgerEntryId,
        running_balance: Money,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StockRepository: Send {
    /// Atomic `boxes = boxes + delta`, inserting a row seeded with `delta` when
    /// none exists. Returns the row after the update.
    async fn add_boxes(&mut self, key: StockKey, delta: Quantity) -> Result<Stock, StoreError>;

    async fn stock(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError>;
}

#[async_trait]
pub trait PurchaseRepository: Send {
    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError>;

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError>;

    /// Persist header fields (approval flags, totals, version). Lines are immutable.
    async fn update_purchase(
        &mut self,
        purchase: &Purchase,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    async fn insert_expenses(&mut self, expenses: &[PurchaseExpense]) -> Result<(), StoreError>;

    async fn expenses(&mut self, purchase_id: PurchaseId)
    -> Result<Vec<PurchaseExpense>, StoreError>;

    async fn insert_cost_history(&mut self, rows: &[ProductCostHistory]) -> Result<(), StoreError>;

    async fn cost_history(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<ProductCostHistory>, StoreError>;
}

#[async_trait]
pub trait ReceiptRepository: Send {
    async fn insert_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError>;

    async fn receipt(&mut self, id: ReceiptId)
    -> Result<Option<SupplierPaymentReceipt>, StoreError>;

    async fn update_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError>;

    /// Receipts of a purchase in creation order.
    async fn receipts_for_purchase(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<SupplierPaymentReceipt>, StoreError>;
}

#[async_trait]
pub trait SalesRepository: Send {
    async fn provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Option<ProvisionalSale>, StoreError>;

    /// Newest first.
    async fn provisional_sales_for_company(
        &mut self,
        company_id: CompanyId,
    ) -> Result<Vec<ProvisionalSale>, StoreError>;

    async fn insert_provisional_sale(&mut self, sale: &ProvisionalSale) -> Result<(), StoreError>;

    /// Persist header fields and replace the line set wholesale.
    async fn update_provisional_sale(
        &mut self,
        sale: &ProvisionalSale,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_provisional_sale(&mut self, id: ProvisionalSaleId) -> Result<bool, StoreError>;

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError>;

    async fn sales_for_provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Vec<Sale>, StoreError>;
}

/// One atomic scope over every repository.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) discards
/// all writes staged through it.
#[async_trait]
pub trait UnitOfWork:
    DirectoryRepository
    + LedgerRepository
    + StockRepository
    + PurchaseRepository
    + ReceiptRepository
    + SalesRepository
    + Send
{
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Entry point of the persistence layer.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

#[async_trait]
impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin().await
    }
}
