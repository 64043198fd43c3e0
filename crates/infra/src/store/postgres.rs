//! Postgres-backed store.
//!
//! A unit of work is one SQL transaction. Dropping it without commit rolls the
//! transaction back.
//!
//! ## Serialization points
//!
//! - Ledger appends lock the supplier row (`SELECT ... FOR UPDATE`), so the
//!   read of the previous running balance and the insert of the next entry are
//!   never interleaved with another append for the same supplier.
//! - Purchase and provisional-sale loads lock their header row for the rest of
//!   the transaction; header updates also carry an expected version.
//! - Stock mutations are a single `INSERT ... ON CONFLICT DO UPDATE SET
//!   boxes = stock.boxes + EXCLUDED.boxes`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Backend` |
//! | PoolClosed, RowNotFound, other | N/A | `Backend` |
//! | ColumnDecode / Decode | N/A | `Decode` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use tradeerp_accounting::{
    Direction, LedgerEntry, ReceiptStatus, ReceiptType, ReferenceKind, Supplier,
    SupplierPaymentReceipt,
};
use tradeerp_core::{
    CompanyId, CostHistoryId, CustomerId, Decimal, ExpectedVersion, ExpenseCategoryId, ExpenseId,
    LedgerEntryId, Money, ProductId, ProvisionalSaleId, PurchaseId, Quantity, ReceiptId, SaleId,
    SupplierId, UserId,
};
use tradeerp_inventory::{Stock, StockKey};
use tradeerp_purchasing::{
    ProductCostHistory, Purchase, PurchaseExpense, PurchaseLine, PurchaseStatus,
};
use tradeerp_sales::{ProvisionalSale, ProvisionalSaleStatus, Sale, SaleLine, SaleType};

use super::r#trait::{
    DirectoryRepository, LedgerRepository, PurchaseRepository, ReceiptRepository,
    SalesRepository, StockRepository, Store, UnitOfWork,
};
use crate::error::StoreError;

const MIGRATION: &str = include_str!("../../migrations/0001_core.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema. Safe to run repeatedly.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn expected_param(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

#[async_trait]
impl DirectoryRepository for PgUnitOfWork {
    async fn company_exists(&mut self, id: CompanyId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM companies WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("company_exists", e))?;
        Ok(row.is_some())
    }

    async fn customer_exists(&mut self, id: CustomerId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM customers WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("customer_exists", e))?;
        Ok(row.is_some())
    }

    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError> {
        let wanted: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let rows = sqlx::query("SELECT id FROM products WHERE id = ANY($1)")
            .bind(wanted)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("missing_products", e))?;

        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            found.push(col::<Uuid>(row, "id")?);
        }

        let mut missing: Vec<ProductId> = ids
            .iter()
            .copied()
            .filter(|id| !found.contains(id.as_uuid()))
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM suppliers WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("supplier", e))?;
        row.as_ref().map(supplier_from_row).transpose()
    }

    async fn lock_supplier(&mut self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM suppliers WHERE id = $1 FOR UPDATE")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_supplier", e))?;
        row.as_ref().map(supplier_from_row).transpose()
    }
}

const LEDGER_COLUMNS: &str = "id, supplier_id, sequence, direction, amount, running_balance, \
     reference_kind, reference_id, description, transaction_date, created_at";

#[async_trait]
impl LedgerRepository for PgUnitOfWork {
    async fn latest_entry(
        &mut self,
        supplier_id: SupplierId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM supplier_ledger_entries \
             WHERE supplier_id = $1 ORDER BY sequence DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::from(supplier_id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("latest_entry", e))?;
        row.as_ref().map(ledger_entry_from_row).transpose()
    }

    async fn entries(&mut self, supplier_id: SupplierId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM supplier_ledger_entries \
             WHERE supplier_id = $1 ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(Uuid::from(supplier_id))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("entries", e))?;
        rows.iter().map(ledger_entry_from_row).collect()
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO supplier_ledger_entries ({LEDGER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(entry.id))
            .bind(Uuid::from(entry.supplier_id))
            .bind(entry.sequence as i64)
            .bind(entry.direction.as_str())
            .bind(entry.amount)
            .bind(entry.running_balance)
            .bind(entry.reference_kind.as_str())
            .bind(entry.reference_id)
            .bind(entry.description.as_deref())
            .bind(entry.transaction_date)
            .bind(entry.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry", e))?;
        Ok(())
    }

    async fn delete_entries(
        &mut self,
        supplier_id: SupplierId,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM supplier_ledger_entries \
             WHERE supplier_id = $1 AND reference_kind = $2 AND reference_id = $3",
        )
        .bind(Uuid::from(supplier_id))
        .bind(reference_kind.as_str())
        .bind(reference_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_entries", e))?;
        Ok(result.rows_affected())
    }

    async fn set_running_balance(
        &mut self,
        id: LedgerEntryId,
        running_balance: Money,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE supplier_ledger_entries SET running_balance = $2 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(running_balance)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("set_running_balance", e))?;
        Ok(())
    }
}

#[async_trait]
impl StockRepository for PgUnitOfWork {
    async fn add_boxes(&mut self, key: StockKey, delta: Quantity) -> Result<Stock, StoreError> {
        let row = sqlx::query(
            "INSERT INTO stock (company_id, product_id, boxes) VALUES ($1, $2, $3) \
             ON CONFLICT (company_id, product_id) \
             DO UPDATE SET boxes = stock.boxes + EXCLUDED.boxes, updated_at = NOW() \
             RETURNING boxes",
        )
        .bind(Uuid::from(key.company_id))
        .bind(Uuid::from(key.product_id))
        .bind(delta)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_boxes", e))?;

        Ok(Stock {
            company_id: key.company_id,
            product_id: key.product_id,
            boxes: col(&row, "boxes")?,
        })
    }

    async fn stock(&mut self, key: StockKey) -> Result<Option<Stock>, StoreError> {
        let row = sqlx::query("SELECT boxes FROM stock WHERE company_id = $1 AND product_id = $2")
            .bind(Uuid::from(key.company_id))
            .bind(Uuid::from(key.product_id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("stock", e))?;

        row.map(|row| {
            Ok(Stock {
                company_id: key.company_id,
                product_id: key.product_id,
                boxes: col(&row, "boxes")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl PurchaseRepository for PgUnitOfWork {
    async fn purchase(&mut self, id: PurchaseId) -> Result<Option<Purchase>, StoreError> {
        let Some(header) = sqlx::query(
            "SELECT id, company_id, supplier_id, total, total_expenses, final_total, is_approved, \
             approved_at, approved_by, status, version, created_at \
             FROM purchases WHERE id = $1 FOR UPDATE",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("purchase", e))?
        else {
            return Ok(None);
        };

        let line_rows = sqlx::query(
            "SELECT product_id, qty, unit_price, sub_total FROM purchase_lines \
             WHERE purchase_id = $1 ORDER BY line_no",
        )
        .bind(Uuid::from(id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("purchase_lines", e))?;

        let lines = line_rows
            .iter()
            .map(|row| {
                Ok(PurchaseLine {
                    product_id: ProductId::from_uuid(col(row, "product_id")?),
                    qty: col(row, "qty")?,
                    unit_price: col(row, "unit_price")?,
                    sub_total: col(row, "sub_total")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(Purchase {
            id,
            company_id: CompanyId::from_uuid(col(&header, "company_id")?),
            supplier_id: col::<Option<Uuid>>(&header, "supplier_id")?.map(SupplierId::from_uuid),
            lines,
            total: col(&header, "total")?,
            total_expenses: col(&header, "total_expenses")?,
            final_total: col(&header, "final_total")?,
            is_approved: col(&header, "is_approved")?,
            approved_at: col(&header, "approved_at")?,
            approved_by: col::<Option<Uuid>>(&header, "approved_by")?.map(UserId::from_uuid),
            status: parse_purchase_status(&col::<String>(&header, "status")?)?,
            version: to_u64(col(&header, "version")?, "purchases.version")?,
            created_at: col(&header, "created_at")?,
        }))
    }

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO purchases (id, company_id, supplier_id, total, total_expenses, \
             final_total, is_approved, approved_at, approved_by, status, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(Uuid::from(purchase.id))
        .bind(Uuid::from(purchase.company_id))
        .bind(purchase.supplier_id.map(Uuid::from))
        .bind(purchase.total)
        .bind(purchase.total_expenses)
        .bind(purchase.final_total)
        .bind(purchase.is_approved)
        .bind(purchase.approved_at)
        .bind(purchase.approved_by.map(Uuid::from))
        .bind(purchase.status.as_str())
        .bind(purchase.version as i64)
        .bind(purchase.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase", e))?;

        for (line_no, line) in purchase.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO purchase_lines (purchase_id, line_no, product_id, qty, unit_price, sub_total) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::from(purchase.id))
            .bind(line_no as i32)
            .bind(Uuid::from(line.product_id))
            .bind(line.qty)
            .bind(line.unit_price)
            .bind(line.sub_total)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_purchase_line", e))?;
        }
        Ok(())
    }

    async fn update_purchase(
        &mut self,
        purchase: &Purchase,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE purchases SET total_expenses = $2, final_total = $3, is_approved = $4, \
             approved_at = $5, approved_by = $6, status = $7, version = $8 \
             WHERE id = $1 AND ($9::BIGINT IS NULL OR version = $9)",
        )
        .bind(Uuid::from(purchase.id))
        .bind(purchase.total_expenses)
        .bind(purchase.final_total)
        .bind(purchase.is_approved)
        .bind(purchase.approved_at)
        .bind(purchase.approved_by.map(Uuid::from))
        .bind(purchase.status.as_str())
        .bind(purchase.version as i64)
        .bind(expected_param(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_purchase", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "purchase {}: expected {expected:?}",
                purchase.id
            )));
        }
        Ok(())
    }

    async fn insert_expenses(&mut self, expenses: &[PurchaseExpense]) -> Result<(), StoreError> {
        for expense in expenses {
            sqlx::query(
                "INSERT INTO purchase_expenses (id, purchase_id, category_id, category_name, \
                 supplier_id, amount, notes, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::from(expense.id))
            .bind(Uuid::from(expense.purchase_id))
            .bind(Uuid::from(expense.category_id))
            .bind(expense.category_name.as_deref())
            .bind(expense.supplier_id.map(Uuid::from))
            .bind(expense.amount)
            .bind(expense.notes.as_deref())
            .bind(expense.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_expenses", e))?;
        }
        Ok(())
    }

    async fn expenses(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<PurchaseExpense>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, purchase_id, category_id, category_name, supplier_id, amount, notes, \
             created_at FROM purchase_expenses WHERE purchase_id = $1 ORDER BY created_at, id",
        )
        .bind(Uuid::from(purchase_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("expenses", e))?;

        rows.iter()
            .map(|row| {
                Ok(PurchaseExpense {
                    id: ExpenseId::from_uuid(col(row, "id")?),
                    purchase_id: PurchaseId::from_uuid(col(row, "purchase_id")?),
                    category_id: ExpenseCategoryId::from_uuid(col(row, "category_id")?),
                    category_name: col(row, "category_name")?,
                    supplier_id: col::<Option<Uuid>>(row, "supplier_id")?
                        .map(SupplierId::from_uuid),
                    amount: col(row, "amount")?,
                    notes: col(row, "notes")?,
                    created_at: col(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn insert_cost_history(&mut self, rows: &[ProductCostHistory]) -> Result<(), StoreError> {
        for history in rows {
            sqlx::query(
                "INSERT INTO product_cost_history (id, product_id, purchase_id, company_id, \
                 purchase_price, expense_per_unit, total_cost_per_unit, quantity, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::from(history.id))
            .bind(Uuid::from(history.product_id))
            .bind(Uuid::from(history.purchase_id))
            .bind(Uuid::from(history.company_id))
            .bind(history.purchase_price)
            .bind(history.expense_per_unit)
            .bind(history.total_cost_per_unit)
            .bind(history.quantity)
            .bind(history.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_cost_history", e))?;
        }
        Ok(())
    }

    async fn cost_history(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<ProductCostHistory>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, product_id, purchase_id, company_id, purchase_price, expense_per_unit, \
             total_cost_per_unit, quantity, created_at FROM product_cost_history \
             WHERE purchase_id = $1 ORDER BY created_at, id",
        )
        .bind(Uuid::from(purchase_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("cost_history", e))?;

        rows.iter()
            .map(|row| {
                Ok(ProductCostHistory {
                    id: CostHistoryId::from_uuid(col(row, "id")?),
                    product_id: ProductId::from_uuid(col(row, "product_id")?),
                    purchase_id: PurchaseId::from_uuid(col(row, "purchase_id")?),
                    company_id: CompanyId::from_uuid(col(row, "company_id")?),
                    purchase_price: col(row, "purchase_price")?,
                    expense_per_unit: col(row, "expense_per_unit")?,
                    total_cost_per_unit: col(row, "total_cost_per_unit")?,
                    quantity: col(row, "quantity")?,
                    created_at: col(row, "created_at")?,
                })
            })
            .collect()
    }
}

const RECEIPT_COLUMNS: &str = "id, supplier_id, purchase_id, amount, receipt_type, status, \
     category_name, description, paid_at, created_at";

#[async_trait]
impl ReceiptRepository for PgUnitOfWork {
    async fn insert_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO supplier_payment_receipts ({RECEIPT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(receipt.id))
            .bind(Uuid::from(receipt.supplier_id))
            .bind(receipt.purchase_id.map(Uuid::from))
            .bind(receipt.amount)
            .bind(receipt.receipt_type.as_str())
            .bind(receipt.status.as_str())
            .bind(receipt.category_name.as_deref())
            .bind(receipt.description.as_str())
            .bind(receipt.paid_at)
            .bind(receipt.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_receipt", e))?;
        Ok(())
    }

    async fn receipt(
        &mut self,
        id: ReceiptId,
    ) -> Result<Option<SupplierPaymentReceipt>, StoreError> {
        let sql = format!(
            "SELECT {RECEIPT_COLUMNS} FROM supplier_payment_receipts WHERE id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("receipt", e))?;
        row.as_ref().map(receipt_from_row).transpose()
    }

    async fn update_receipt(&mut self, receipt: &SupplierPaymentReceipt) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE supplier_payment_receipts SET status = $2, paid_at = $3, category_name = $4, \
             description = $5 WHERE id = $1",
        )
        .bind(Uuid::from(receipt.id))
        .bind(receipt.status.as_str())
        .bind(receipt.paid_at)
        .bind(receipt.category_name.as_deref())
        .bind(receipt.description.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_receipt", e))?;
        Ok(())
    }

    async fn receipts_for_purchase(
        &mut self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<SupplierPaymentReceipt>, StoreError> {
        let sql = format!(
            "SELECT {RECEIPT_COLUMNS} FROM supplier_payment_receipts \
             WHERE purchase_id = $1 ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(Uuid::from(purchase_id))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("receipts_for_purchase", e))?;
        rows.iter().map(receipt_from_row).collect()
    }
}

const PROVISIONAL_COLUMNS: &str = "id, company_id, customer_id, invoice_number, notes, total, \
     status, is_converted, converted_sale_id, converted_at, version, created_at, updated_at";

impl PgUnitOfWork {
    async fn load_lines(&mut self, table: &str, owner: &str, id: Uuid) -> Result<Vec<SaleLine>, StoreError> {
        let sql = format!(
            "SELECT product_id, qty, unit_price, sub_total FROM {table} \
             WHERE {owner} = $1 ORDER BY line_no"
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_lines", e))?;

        rows.iter()
            .map(|row| {
                Ok(SaleLine {
                    product_id: ProductId::from_uuid(col(row, "product_id")?),
                    qty: col(row, "qty")?,
                    unit_price: col(row, "unit_price")?,
                    sub_total: col(row, "sub_total")?,
                })
            })
            .collect()
    }

    async fn insert_lines(
        &mut self,
        table: &str,
        owner: &str,
        id: Uuid,
        lines: &[SaleLine],
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {table} ({owner}, line_no, product_id, qty, unit_price, sub_total) \
             VALUES ($1, $2, $3, $4, $5, $6)"
        );
        for (line_no, line) in lines.iter().enumerate() {
            sqlx::query(&sql)
                .bind(id)
                .bind(line_no as i32)
                .bind(Uuid::from(line.product_id))
                .bind(line.qty)
                .bind(line.unit_price)
                .bind(line.sub_total)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_lines", e))?;
        }
        Ok(())
    }

    async fn provisional_from_row(&mut self, row: &PgRow) -> Result<ProvisionalSale, StoreError> {
        let id: Uuid = col(row, "id")?;
        let lines = self
            .load_lines("provisional_sale_lines", "provisional_sale_id", id)
            .await?;
        Ok(ProvisionalSale {
            id: ProvisionalSaleId::from_uuid(id),
            company_id: CompanyId::from_uuid(col(row, "company_id")?),
            customer_id: col::<Option<Uuid>>(row, "customer_id")?.map(CustomerId::from_uuid),
            invoice_number: col(row, "invoice_number")?,
            notes: col(row, "notes")?,
            lines,
            total: col(row, "total")?,
            status: col::<String>(row, "status")?
                .parse::<ProvisionalSaleStatus>()
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            is_converted: col(row, "is_converted")?,
            converted_sale_id: col::<Option<Uuid>>(row, "converted_sale_id")?
                .map(SaleId::from_uuid),
            converted_at: col(row, "converted_at")?,
            version: to_u64(col(row, "version")?, "provisional_sales.version")?,
            created_at: col(row, "created_at")?,
            updated_at: col(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl SalesRepository for PgUnitOfWork {
    async fn provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Option<ProvisionalSale>, StoreError> {
        let sql = format!(
            "SELECT {PROVISIONAL_COLUMNS} FROM provisional_sales WHERE id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("provisional_sale", e))?;

        match row {
            Some(row) => Ok(Some(self.provisional_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn provisional_sales_for_company(
        &mut self,
        company_id: CompanyId,
    ) -> Result<Vec<ProvisionalSale>, StoreError> {
        let sql = format!(
            "SELECT {PROVISIONAL_COLUMNS} FROM provisional_sales \
             WHERE company_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(Uuid::from(company_id))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("provisional_sales_for_company", e))?;

        let mut sales = Vec::with_capacity(rows.len());
        for row in &rows {
            sales.push(self.provisional_from_row(row).await?);
        }
        Ok(sales)
    }

    async fn insert_provisional_sale(&mut self, sale: &ProvisionalSale) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO provisional_sales ({PROVISIONAL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(sale.id))
            .bind(Uuid::from(sale.company_id))
            .bind(sale.customer_id.map(Uuid::from))
            .bind(sale.invoice_number.as_deref())
            .bind(sale.notes.as_deref())
            .bind(sale.total)
            .bind(sale.status.as_str())
            .bind(sale.is_converted)
            .bind(sale.converted_sale_id.map(Uuid::from))
            .bind(sale.converted_at)
            .bind(sale.version as i64)
            .bind(sale.created_at)
            .bind(sale.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_provisional_sale", e))?;

        self.insert_lines(
            "provisional_sale_lines",
            "provisional_sale_id",
            Uuid::from(sale.id),
            &sale.lines,
        )
        .await
    }

    async fn update_provisional_sale(
        &mut self,
        sale: &ProvisionalSale,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE provisional_sales SET customer_id = $2, invoice_number = $3, notes = $4, \
             total = $5, status = $6, is_converted = $7, converted_sale_id = $8, \
             converted_at = $9, version = $10, updated_at = $11 \
             WHERE id = $1 AND ($12::BIGINT IS NULL OR version = $12)",
        )
        .bind(Uuid::from(sale.id))
        .bind(sale.customer_id.map(Uuid::from))
        .bind(sale.invoice_number.as_deref())
        .bind(sale.notes.as_deref())
        .bind(sale.total)
        .bind(sale.status.as_str())
        .bind(sale.is_converted)
        .bind(sale.converted_sale_id.map(Uuid::from))
        .bind(sale.converted_at)
        .bind(sale.version as i64)
        .bind(sale.updated_at)
        .bind(expected_param(expected))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_provisional_sale", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "provisional sale {}: expected {expected:?}",
                sale.id
            )));
        }

        sqlx::query("DELETE FROM provisional_sale_lines WHERE provisional_sale_id = $1")
            .bind(Uuid::from(sale.id))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("replace_provisional_lines", e))?;

        self.insert_lines(
            "provisional_sale_lines",
            "provisional_sale_id",
            Uuid::from(sale.id),
            &sale.lines,
        )
        .await
    }

    async fn delete_provisional_sale(&mut self, id: ProvisionalSaleId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM provisional_sales WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_provisional_sale", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sales (id, company_id, customer_id, invoice_number, provisional_sale_id, \
             sale_type, payment_method, total, paid_amount, remaining_amount, is_fully_paid, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(Uuid::from(sale.id))
        .bind(Uuid::from(sale.company_id))
        .bind(sale.customer_id.map(Uuid::from))
        .bind(sale.invoice_number.as_deref())
        .bind(Uuid::from(sale.provisional_sale_id))
        .bind(sale.sale_type.as_str())
        .bind(sale.payment_method.as_str())
        .bind(sale.total)
        .bind(sale.paid_amount)
        .bind(sale.remaining_amount)
        .bind(sale.is_fully_paid)
        .bind(sale.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sale", e))?;

        self.insert_lines("sale_lines", "sale_id", Uuid::from(sale.id), &sale.lines)
            .await
    }

    async fn sales_for_provisional_sale(
        &mut self,
        id: ProvisionalSaleId,
    ) -> Result<Vec<Sale>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, company_id, customer_id, invoice_number, provisional_sale_id, sale_type, \
             payment_method, total, paid_amount, remaining_amount, is_fully_paid, created_at \
             FROM sales WHERE provisional_sale_id = $1 ORDER BY created_at",
        )
        .bind(Uuid::from(id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("sales_for_provisional_sale", e))?;

        let mut sales = Vec::with_capacity(rows.len());
        for row in &rows {
            let sale_id: Uuid = col(row, "id")?;
            let lines = self.load_lines("sale_lines", "sale_id", sale_id).await?;
            sales.push(Sale {
                id: SaleId::from_uuid(sale_id),
                company_id: CompanyId::from_uuid(col(row, "company_id")?),
                customer_id: col::<Option<Uuid>>(row, "customer_id")?.map(CustomerId::from_uuid),
                invoice_number: col(row, "invoice_number")?,
                provisional_sale_id: ProvisionalSaleId::from_uuid(col(row, "provisional_sale_id")?),
                sale_type: parse_sale_type(&col::<String>(row, "sale_type")?)?,
                payment_method: col(row, "payment_method")?,
                total: col(row, "total")?,
                paid_amount: col(row, "paid_amount")?,
                remaining_amount: col(row, "remaining_amount")?,
                is_fully_paid: col(row, "is_fully_paid")?,
                lines,
                created_at: col(row, "created_at")?,
            });
        }
        Ok(sales)
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Decode(format!("column {name}: {e}")))
}

fn to_u64(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Decode(format!("{what} is negative: {value}")))
}

fn supplier_from_row(row: &PgRow) -> Result<Supplier, StoreError> {
    Ok(Supplier {
        id: SupplierId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
    })
}

fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(col(row, "id")?),
        supplier_id: SupplierId::from_uuid(col(row, "supplier_id")?),
        sequence: to_u64(col(row, "sequence")?, "ledger sequence")?,
        direction: parse_direction(&col::<String>(row, "direction")?)?,
        amount: col::<Decimal>(row, "amount")?,
        running_balance: col::<Decimal>(row, "running_balance")?,
        reference_kind: parse_reference_kind(&col::<String>(row, "reference_kind")?)?,
        reference_id: col(row, "reference_id")?,
        description: col(row, "description")?,
        transaction_date: col::<DateTime<Utc>>(row, "transaction_date")?,
        created_at: col::<DateTime<Utc>>(row, "created_at")?,
    })
}

fn receipt_from_row(row: &PgRow) -> Result<SupplierPaymentReceipt, StoreError> {
    Ok(SupplierPaymentReceipt {
        id: ReceiptId::from_uuid(col(row, "id")?),
        supplier_id: SupplierId::from_uuid(col(row, "supplier_id")?),
        purchase_id: col::<Option<Uuid>>(row, "purchase_id")?.map(PurchaseId::from_uuid),
        amount: col(row, "amount")?,
        receipt_type: parse_receipt_type(&col::<String>(row, "receipt_type")?)?,
        status: parse_receipt_status(&col::<String>(row, "status")?)?,
        category_name: col(row, "category_name")?,
        description: col(row, "description")?,
        paid_at: col(row, "paid_at")?,
        created_at: col(row, "created_at")?,
    })
}

fn unknown(what: &str, value: &str) -> StoreError {
    StoreError::Decode(format!("unknown {what} '{value}'"))
}

fn parse_direction(value: &str) -> Result<Direction, StoreError> {
    match value {
        "credit" => Ok(Direction::Credit),
        "debit" => Ok(Direction::Debit),
        other => Err(unknown("ledger direction", other)),
    }
}

fn parse_reference_kind(value: &str) -> Result<ReferenceKind, StoreError> {
    match value {
        "purchase" => Ok(ReferenceKind::Purchase),
        "payment" => Ok(ReferenceKind::Payment),
        "adjustment" => Ok(ReferenceKind::Adjustment),
        "return" => Ok(ReferenceKind::Return),
        other => Err(unknown("reference kind", other)),
    }
}

fn parse_receipt_type(value: &str) -> Result<ReceiptType, StoreError> {
    match value {
        "main_purchase" => Ok(ReceiptType::MainPurchase),
        "expense" => Ok(ReceiptType::Expense),
        "return" => Ok(ReceiptType::Return),
        other => Err(unknown("receipt type", other)),
    }
}

fn parse_receipt_status(value: &str) -> Result<ReceiptStatus, StoreError> {
    match value {
        "pending" => Ok(ReceiptStatus::Pending),
        "paid" => Ok(ReceiptStatus::Paid),
        "cancelled" => Ok(ReceiptStatus::Cancelled),
        other => Err(unknown("receipt status", other)),
    }
}

fn parse_purchase_status(value: &str) -> Result<PurchaseStatus, StoreError> {
    match value {
        "pending" => Ok(PurchaseStatus::Pending),
        "approved" => Ok(PurchaseStatus::Approved),
        other => Err(unknown("purchase status", other)),
    }
}

fn parse_sale_type(value: &str) -> Result<SaleType, StoreError> {
    match value {
        "cash" => Ok(SaleType::Cash),
        "credit" => Ok(SaleType::Credit),
        other => Err(unknown("sale type", other)),
    }
}

/// SQLSTATEs a caller may resolve by retrying: unique violation,
/// serialization failure and deadlock.
fn is_conflict_code(code: &str) -> bool {
    matches!(code, "23505" | "40001" | "40P01")
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some(code) if is_conflict_code(code) => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
