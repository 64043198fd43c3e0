//! Supplier payment receipts: the payable documents behind ledger CREDIT entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeerp_core::money::ensure_positive;
use tradeerp_core::{DomainError, DomainResult, Money, PurchaseId, ReceiptId, SupplierId};

use crate::ledger::{NewLedgerEntry, ReferenceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    MainPurchase,
    Expense,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Paid,
    Cancelled,
}

impl ReceiptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptType::MainPurchase => "main_purchase",
            ReceiptType::Expense => "expense",
            ReceiptType::Return => "return",
        }
    }
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Paid => "paid",
            ReceiptStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierPaymentReceipt {
    pub id: ReceiptId,
    pub supplier_id: SupplierId,
    pub purchase_id: Option<PurchaseId>,
    pub amount: Money,
    pub receipt_type: ReceiptType,
    pub status: ReceiptStatus,
    pub category_name: Option<String>,
    pub description: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SupplierPaymentReceipt {
    /// A new receipt awaiting payment.
    pub fn pending(
        supplier_id: SupplierId,
        purchase_id: Option<PurchaseId>,
        amount: Money,
        receipt_type: ReceiptType,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive("receipt amount", amount)?;
        Ok(Self {
            id: ReceiptId::new(),
            supplier_id,
            purchase_id,
            amount,
            receipt_type,
            status: ReceiptStatus::Pending,
            category_name: None,
            description: description.into(),
            paid_at: None,
            created_at: now,
        })
    }

    pub fn with_category(mut self, category_name: Option<String>) -> Self {
        self.category_name = category_name;
        self
    }

    /// The CREDIT entry that records this obligation on the supplier ledger.
    pub fn credit_entry(&self) -> NewLedgerEntry {
        NewLedgerEntry::credit(
            self.supplier_id,
            self.amount,
            ReferenceKind::Purchase,
            *self.id.as_uuid(),
        )
        .with_description(self.description.clone())
        .dated(self.created_at)
    }

    /// PENDING → PAID. Returns the DEBIT entry to append.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> DomainResult<NewLedgerEntry> {
        match self.status {
            ReceiptStatus::Pending => {}
            ReceiptStatus::Paid => {
                return Err(DomainError::invalid_state("receipt is already paid"));
            }
            ReceiptStatus::Cancelled => {
                return Err(DomainError::invalid_state("cannot pay a cancelled receipt"));
            }
        }

        self.status = ReceiptStatus::Paid;
        self.paid_at = Some(now);

        Ok(NewLedgerEntry::debit(
            self.supplier_id,
            self.amount,
            ReferenceKind::Payment,
            *self.id.as_uuid(),
        )
        .with_description(format!("payment: {}", self.description))
        .dated(now))
    }

    /// PENDING|PAID → CANCELLED. Returns the ledger references to remove.
    pub fn cancel(&mut self) -> DomainResult<[ReferenceKind; 2]> {
        if self.status == ReceiptStatus::Cancelled {
            return Err(DomainError::invalid_state("receipt is already cancelled"));
        }
        self.status = ReceiptStatus::Cancelled;
        Ok([ReferenceKind::Purchase, ReferenceKind::Payment])
    }
}
