use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeerp_core::money::{checked_sum, ensure_non_negative, ensure_positive, line_sub_total};
use tradeerp_core::{
    CompanyId, CustomerId, Decimal, DomainResult, Money, ProductId, ProvisionalSaleId, Quantity,
    SaleId,
};

/// Sale line: product, quantity in boxes, unit price. Shared by quotes and firm sales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub qty: Quantity,
    pub unit_price: Money,
    pub sub_total: Money,
}

impl SaleLine {
    pub fn new(product_id: ProductId, qty: Quantity, unit_price: Money) -> DomainResult<Self> {
        ensure_positive("line quantity", qty)?;
        ensure_non_negative("unit price", unit_price)?;
        Ok(Self {
            product_id,
            qty,
            unit_price,
            sub_total: line_sub_total(qty, unit_price)?,
        })
    }
}

pub fn lines_total(lines: &[SaleLine]) -> DomainResult<Money> {
    checked_sum("sale total", lines.iter().map(|l| l.sub_total))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleType {
    Cash,
    Credit,
}

impl SaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleType::Cash => "cash",
            SaleType::Credit => "credit",
        }
    }
}

/// Firm sale. Created only by converting a provisional sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub company_id: CompanyId,
    pub customer_id: Option<CustomerId>,
    pub invoice_number: Option<String>,
    pub provisional_sale_id: ProvisionalSaleId,
    pub sale_type: SaleType,
    pub payment_method: String,
    pub total: Money,
    pub paid_amount: Money,
    pub remaining_amount: Money,
    pub is_fully_paid: bool,
    pub lines: Vec<SaleLine>,
    pub created_at: DateTime<Utc>,
}

impl Sale {
    /// Cash sales are settled in full on creation; credit sales owe the whole total.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        company_id: CompanyId,
        customer_id: Option<CustomerId>,
        invoice_number: Option<String>,
        provisional_sale_id: ProvisionalSaleId,
        sale_type: SaleType,
        payment_method: impl Into<String>,
        lines: Vec<SaleLine>,
        total: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let (paid_amount, remaining_amount, is_fully_paid) = match sale_type {
            SaleType::Cash => (total, Decimal::ZERO, true),
            SaleType::Credit => (Decimal::ZERO, total, false),
        };

        Self {
            id: SaleId::new(),
            company_id,
            customer_id,
            invoice_number,
            provisional_sale_id,
            sale_type,
            payment_method: payment_method.into(),
            total,
            paid_amount,
            remaining_amount,
            is_fully_paid,
            lines,
            created_at: now,
        }
    }

    /// `(product, -qty)` per line. `qty` is taken as boxes without unit conversion.
    pub fn stock_decrements(&self) -> Vec<(ProductId, Quantity)> {
        self.lines.iter().map(|l| (l.product_id, -l.qty)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeerp_core::DomainError;

    fn test_sale(sale_type: SaleType) -> Sale {
        let lines = vec![SaleLine::new(ProductId::new(), Decimal::from(3), Decimal::from(20)).unwrap()];
        let total = lines_total(&lines).unwrap();
        Sale::new(
            CompanyId::new(),
            None,
            Some("INV-001".to_string()),
            ProvisionalSaleId::new(),
            sale_type,
            "cash",
            lines,
            total,
            Utc::now(),
        )
    }

    #[test]
    fn cash_sale_is_fully_paid() {
        let sale = test_sale(SaleType::Cash);
        assert_eq!(sale.paid_amount, Decimal::from(60));
        assert_eq!(sale.remaining_amount, Decimal::ZERO);
        assert!(sale.is_fully_paid);
    }

    #[test]
    fn credit_sale_owes_everything() {
        let sale = test_sale(SaleType::Credit);
        assert_eq!(sale.paid_amount, Decimal::ZERO);
        assert_eq!(sale.remaining_amount, Decimal::from(60));
        assert!(!sale.is_fully_paid);
    }

    #[test]
    fn decrements_are_negated_quantities() {
        let sale = test_sale(SaleType::Cash);
        let decrements = sale.stock_decrements();
        assert_eq!(decrements, vec![(sale.lines[0].product_id, Decimal::from(-3))]);
    }

    #[test]
    fn oversized_lines_are_invalid() {
        let big = Decimal::from(1_000_000_000_000_000i64);
        let err = SaleLine::new(ProductId::new(), big, big).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let line = SaleLine::new(ProductId::new(), Decimal::ONE, Decimal::MAX).unwrap();
        let err = lines_total(&[line.clone(), line]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg == "sale total is out of range"));
    }

    #[test]
    fn zero_quantity_lines_are_invalid() {
        let err = SaleLine::new(ProductId::new(), Decimal::ZERO, Decimal::ONE).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
