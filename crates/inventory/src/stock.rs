use serde::{Deserialize, Serialize};

use tradeerp_core::{CompanyId, Decimal, DomainError, DomainResult, ProductId, Quantity};

/// Unique key of a stock row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub company_id: CompanyId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(company_id: CompanyId, product_id: ProductId) -> Self {
        Self {
            company_id,
            product_id,
        }
    }
}

/// On-hand quantity of one product in one company, in boxes.
///
/// `boxes` has no lower bound: over-selling drives it negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub boxes: Quantity,
}

impl Stock {
    /// Row as created by the first adjustment for `key`.
    pub fn empty(key: StockKey) -> Self {
        Self {
            company_id: key.company_id,
            product_id: key.product_id,
            boxes: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.company_id, self.product_id)
    }

    /// Apply `delta` in place (the in-process equivalent of `boxes = boxes + delta`).
    /// The row is unchanged when the result is out of range.
    pub fn apply(&mut self, delta: Quantity) -> DomainResult<StockAdjustment> {
        let before = self.boxes;
        self.boxes = before.checked_add(delta).ok_or_else(|| {
            DomainError::validation(format!(
                "stock of product {} cannot move by {delta}: out of range",
                self.product_id
            ))
        })?;
        Ok(StockAdjustment {
            key: self.key(),
            delta,
            before,
            after: self.boxes,
        })
    }
}

/// Outcome of a single adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub key: StockKey,
    pub delta: Quantity,
    pub before: Quantity,
    pub after: Quantity,
}

impl StockAdjustment {
    /// Built from the post-update row returned by an atomic `boxes = boxes + delta` store.
    pub fn from_after(key: StockKey, delta: Quantity, after: Quantity) -> DomainResult<Self> {
        let before = after.checked_sub(delta).ok_or_else(|| {
            DomainError::inconsistent(format!(
                "stock of product {} reads {after} after moving by {delta}",
                key.product_id
            ))
        })?;
        Ok(Self {
            key,
            delta,
            before,
            after,
        })
    }

    pub fn is_negative(&self) -> bool {
        self.after < Decimal::ZERO
    }
}
