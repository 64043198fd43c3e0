use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use tradeerp_accounting::{LedgerEntry, ReferenceKind, Supplier, SupplierPaymentReceipt};
use tradeerp_core::{
    AggregateRoot, CompanyId, CustomerId, ExpectedVersion, LedgerEntryId, Money, ProductId,
    ProvisionalSaleId, PurchaseId, Quantity, ReceiptId, SupplierId,
};
use tradeerp_inventory::{Stock, StockKey};
use tradeerp_purchasing::{ProductCostHistory, Purchase, PurchaseExpense};
use tradeerp_sales::{ProvisionalSale, Sale};

use super::r#trait::{
    DirectoryRepository, LedgerRepository, PurchaseRepository, ReceiptRepository,
    SalesRepository, StockRepository, Store, UnitOfWork,
};
use crate::error::StoreError;

#[derive(Debug, Default, Clone)]
struct State {
    companies: HashSet<CompanyId>,
    customers: HashSet<CustomerId>,
    products: HashSet<ProductId>,
    suppliers: HashMap<SupplierId, Supplier>,
    ledger: HashMap<SupplierId, Vec<LedgerEntry>>,
    stock: HashMap<StockKey, Stock>,
    purchases: HashMap<PurchaseId, Purchase>,
    expenses: Vec<PurchaseExpense>,
    cost_history: Vec<ProductCostHistory>,
    receipts: Vec<SupplierPaymentReceipt>,
    provisional_sales: HashMap<ProvisionalSaleId, ProvisionalSale>,
    sales: Vec<Sale>,
}

/// In-memory store.
///
/// Intended for tests/dev. A unit of work holds the whole store exclusively and
/// stages writes on a private copy, so units of work are fully serialized.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_company(&self, id: CompanyId) {
        self.state.lock().await.companies.insert(id);
    }

    pub async fn add_customer(&self, id: CustomerId) {
        self.state.lock().await.customers.insert(id);
    }

    pub async fn add_product(&self, id: ProductId) {
        self.state.lock().await.products.insert(id);
    }

    pub async fn add_supplier(&self, supplier: Supplier) {
        self.state
            .lock()
            .await
            .suppliers
            .insert(supplier.id, supplier);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, working }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn check_version<A>(what: &str, expected: ExpectedVersion, stored: &A) -> Result<(), StoreError>
where
    A: AggregateRoot,
{
    if expected.matches(stored.version()) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{what} {:?}: expected {expected:?}, found {}",
            stored.id(),
            stored.version()
        )))
    }
}

#[async_trait]
impl DirectoryRepository for InMemoryUnitOfWork {
    async fn company_exists(&mut self, id: CompanyId) -> Result<bool, StoreError> {
        Ok(self.working.companies.contains(&id))
    }

    async fn customer_exists(&mut self, id: CustomerId) -> Result<bool, StoreError> {
        Ok(self.working.customers.contains(&id))
    }

    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError> {
        let mut missing: Vec<ProductId> = ids
            .iter()
            .copied()
            .filter(|id| !self.working.products.contains(id))
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        Ok(self.working.suppliers.get(&id).cloned())
    }

    async fn lock_supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        // The unit of work already owns the whole store.
        self.supplier(id).await
    }
}

#[async_trait]
impl LedgerRepository for InMemoryUnitOfWork {
    async fn latest_entry(
        &mut self,
        supplier_id: SupplierId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .ledger
            .get(&supplier_id)
            .and_then(|entries| entries.iter().max_by_key(|e| e.sequence))
            .cloned())
    }

    async fn entries(&mut self, supplier_id: SupplierId) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut entries = self
            .working
            .ledger
            .get(&supplier_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let stream = self.working.ledger.entry(entry.supplier_id).or_default();
        if stream.iter().any(|e| e.sequence == entry.sequence) {
            return Err(StoreError::Conflict(format!(
                "ledger sequence {} already used for supplier {}",
                entry.sequence, entry.supplier_id
            )));
        }
        stream.push(entry.clone());
        Ok(())
    }

    async fn delete_entries(
        &mut self,
        supplier_id: SupplierId,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Result<u64, StoreError> {
        let Some(stream) = self.working.ledger.get_mut(&supplier_id) else {
            return Ok(0);
        };
        let before = stream.len();
        stream.retain(|e| !(e.reference_kind == reference_kind && e.reference_id == reference_id));
        Ok((before - stream.len()) as u64)
    }

    async fn set_running_balance(
        &mut self,
        id: LedgerEntryId,
        running_balance: Money,
    ) -> Result<(), StoreError> {
        let entry = self
            .working
            .ledger
            .values_mut()
            .flat_map(|stream| stream.iter_mut())
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::Backend(format!("ledger entry {id} vanished")))?;
        entry.running_balance = running_balance;
        Ok(())
    }
}

#[async_trait]
impl StockRepository for InMemoryUnitOfWork {
    async fn add_boxes(&mut self, key: StockKey, delta: Quantity) -> Result<Stock, StoreError> {
        let row = self
            .working
            .stock
            .entry(key)
            .or_insert_with(|| Stock::empty(key));
        row.apply(delta)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(row.clone())
    }

    async fn stock(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        Ok(self.working.stock.get(&key).cloned())
    }
}

#[async_trait]
impl PurchaseRepository for InMemoryUnitOfWork {
    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        Ok(self.working.purchases.get(&id).cloned())
    }

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError> {
        if self.working.purchases.contains_key(&purchase.id) {
            return Err(StoreError::Conflict(format!(
                "purchase {} already exists",
                purchase.id
            )));
        }
        self.working.purchases.insert(purchase.id, purchase.clone());
        Ok(())
    }

    async fn update_purchase(
        &mut self,
        purchase: &Purchase,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let stored = self
            .working
            .purchases
            .get_mut(&purchase.id)
            .ok_or_else(|| StoreError::Conflict(format!("purchase {} vanished", purchase.id)))?;
        check_version("purchase", expected, &*stored)?;
        *stored = purchase.clone();
        Ok(())
    }

    async fn insert_expenses(&mut self, expenses: &[PurchaseExpense]) -> Result<(), StoreError> {
        self.working.expenses.extend_from_slice(expenses);
        Ok(())
    }

    async fn expenses(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<PurchaseExpense>, StoreError> {
        Ok(self
            .working
            .expenses
            .iter()
            .filter(|e| e.purchase_id == purchase_id)
            .cloned()
            .collect())
    }

    async fn insert_cost_history(&mut self, rows: &[ProductCostHistory]) -> Result<(), StoreError> {
        self.working.cost_history.extend_from_slice(rows);
        Ok(())
    }

    async fn cost_history(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<ProductCostHistory>, StoreError> {
        Ok(self
            .working
            .cost_history
            .iter()
            .filter(|r| r.purchase_id == purchase_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReceiptRepository for InMemoryUnitOfWork {
    async fn insert_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError> {
        self.working.receipts.push(receipt.clone());
        Ok(())
    }

    async fn receipt(
        &mut self,
        id: ReceiptId,
    ) -> Result<Option<SupplierPaymentReceipt>, StoreError> {
        Ok(self.working.receipts.iter().find(|r| r.id == id).cloned())
    }

    async fn update_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError> {
        let stored = self
            .working
            .receipts
            .iter_mut()
            .find(|r| r.id == receipt.id)
            .ok_or_else(|| StoreError::Conflict(format!("receipt {} vanished", receipt.id)))?;
        *stored = receipt.clone();
        Ok(())
    }

    async fn receipts_for_purchase(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<SupplierPaymentReceipt>, StoreError> {
        Ok(self
            .working
            .receipts
            .iter()
            .filter(|r| r.purchase_id == Some(purchase_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SalesRepository for InMemoryUnitOfWork {
    async fn provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Option<ProvisionalSale>, StoreError> {
        Ok(self.working.provisional_sales.get(&id).cloned())
    }

    async fn provisional_sales_for_company(
        &mut self,
        company_id: CompanyId,
    ) -> Result<Vec<ProvisionalSale>, StoreError> {
        let mut sales: Vec<ProvisionalSale> = self
            .working
            .provisional_sales
            .values()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect();
        sales.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(sales)
    }

    async fn insert_provisional_sale(&mut self, sale: &ProvisionalSale) -> Result<(), StoreError> {
        self.working.provisional_sales.insert(sale.id, sale.clone());
        Ok(())
    }

    async fn update_provisional_sale(
        &mut self,
        sale: &ProvisionalSale,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let stored = self
            .working
            .provisional_sales
            .get_mut(&sale.id)
            .ok_or_else(|| {
                StoreError::Conflict(format!("provisional sale {} vanished", sale.id))
            })?;
        check_version("provisional sale", expected, &*stored)?;
        *stored = sale.clone();
        Ok(())
    }

    async fn delete_provisional_sale(&mut self, id: ProvisionalSaleId) -> Result<bool, StoreError> {
        Ok(self.working.provisional_sales.remove(&id).is_some())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        self.working.sales.push(sale.clone());
        Ok(())
    }

    async fn sales_for_provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Vec<Sale>, StoreError> {
        Ok(self
            .working
            .sales
            .iter()
            .filter(|s| s.provisional_sale_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
