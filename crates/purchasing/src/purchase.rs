use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeerp_accounting::{ReceiptType, SupplierPaymentReceipt};
use tradeerp_core::money::{
    checked_sum, ensure_non_negative, ensure_positive, line_sub_total, per_unit,
};
use tradeerp_core::{
    AggregateRoot, CompanyId, CostHistoryId, Decimal, DomainError, DomainResult,
    ExpenseCategoryId, ExpenseId, Money, ProductId, PurchaseId, Quantity, SupplierId, UserId,
};

/// Purchase approval lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Approved,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Approved => "approved",
        }
    }
}

/// Purchase line: product, quantity in boxes, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: ProductId,
    pub qty: Quantity,
    pub unit_price: Money,
    pub sub_total: Money,
}

impl PurchaseLine {
    pub fn new(product_id: ProductId, qty: Quantity, unit_price: Money) -> DomainResult<Self> {
        ensure_non_negative("line quantity", qty)?;
        ensure_non_negative("unit price", unit_price)?;
        Ok(Self {
            product_id,
            qty,
            unit_price,
            sub_total: line_sub_total(qty, unit_price)?,
        })
    }
}

/// Aggregate root: Purchase (header + lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub company_id: CompanyId,
    pub supplier_id: Option<SupplierId>,
    pub lines: Vec<PurchaseLine>,
    pub total: Money,
    pub total_expenses: Money,
    pub final_total: Money,
    pub is_approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
    pub status: PurchaseStatus,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl AggregateRoot for Purchase {
    type Id = PurchaseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// One expense as submitted with an approval call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseInput {
    pub category_id: ExpenseCategoryId,
    pub category_name: Option<String>,
    /// Supplier to be paid for this expense (freight forwarder, customs broker...).
    pub supplier_id: Option<SupplierId>,
    pub amount: Money,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseExpense {
    pub id: ExpenseId,
    pub purchase_id: PurchaseId,
    pub category_id: ExpenseCategoryId,
    pub category_name: Option<String>,
    pub supplier_id: Option<SupplierId>,
    pub amount: Money,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable per-line cost snapshot taken at first approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCostHistory {
    pub id: CostHistoryId,
    pub product_id: ProductId,
    pub purchase_id: PurchaseId,
    pub company_id: CompanyId,
    pub purchase_price: Money,
    pub expense_per_unit: Money,
    pub total_cost_per_unit: Money,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
}

/// Per-product landed cost reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCost {
    pub product_id: ProductId,
    pub purchase_price: Money,
    pub expense_per_unit: Money,
    pub total_cost_per_unit: Money,
}

impl From<&ProductCostHistory> for ProductCost {
    fn from(h: &ProductCostHistory) -> Self {
        Self {
            product_id: h.product_id,
            purchase_price: h.purchase_price,
            expense_per_unit: h.expense_per_unit,
            total_cost_per_unit: h.total_cost_per_unit,
        }
    }
}

/// Decision produced by [`Purchase::plan_approval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalPlan {
    /// `is_approved` flips; stock and cost history are written.
    First(FirstApproval),
    /// Post-approval: only expenses and their receipts are added.
    Addendum(ExpenseAddendum),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstApproval {
    pub approved_by: UserId,
    pub approved_at: DateTime<Utc>,
    pub expenses: Vec<PurchaseExpense>,
    pub total_expenses: Money,
    pub final_total: Money,
    pub total_quantity: Quantity,
    pub expense_per_unit: Money,
    pub cost_history: Vec<ProductCostHistory>,
    /// `(product, +qty)` per line, in line order.
    pub stock_increments: Vec<(ProductId, Quantity)>,
    pub receipts: Vec<SupplierPaymentReceipt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpenseAddendum {
    pub expenses: Vec<PurchaseExpense>,
    pub added_expenses: Money,
    /// Header totals once the addendum is applied.
    pub total_expenses: Money,
    pub final_total: Money,
    pub receipts: Vec<SupplierPaymentReceipt>,
}

impl ApprovalPlan {
    pub fn expenses(&self) -> &[PurchaseExpense] {
        match self {
            ApprovalPlan::First(p) => &p.expenses,
            ApprovalPlan::Addendum(p) => &p.expenses,
        }
    }

    pub fn receipts(&self) -> &[SupplierPaymentReceipt] {
        match self {
            ApprovalPlan::First(p) => &p.receipts,
            ApprovalPlan::Addendum(p) => &p.receipts,
        }
    }
}

/// Uniform allocation: every unit carries the same share regardless of line value.
pub fn allocate_expense_per_unit(
    total_expenses: Money,
    lines: &[PurchaseLine],
) -> DomainResult<Money> {
    let total_quantity = checked_sum("total quantity", lines.iter().map(|l| l.qty))?;
    per_unit(total_expenses, total_quantity)
}

impl Purchase {
    /// A new, unapproved purchase. Lines are fixed from here on.
    pub fn new(
        company_id: CompanyId,
        supplier_id: Option<SupplierId>,
        lines: Vec<PurchaseLine>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if lines.is_empty() {
            return Err(DomainError::validation("purchase must have lines"));
        }
        let total = checked_sum("purchase total", lines.iter().map(|l| l.sub_total))?;
        Ok(Self {
            id: PurchaseId::new(),
            company_id,
            supplier_id,
            lines,
            total,
            total_expenses: Decimal::ZERO,
            final_total: total,
            is_approved: false,
            approved_at: None,
            approved_by: None,
            status: PurchaseStatus::Pending,
            version: 0,
            created_at: now,
        })
    }

    pub fn total_quantity(&self) -> DomainResult<Quantity> {
        checked_sum("total quantity", self.lines.iter().map(|l| l.qty))
    }

    /// Decide what an `approve` call does, without mutating `self`.
    ///
    /// Validates every expense up front so a rejected call has no side effects.
    pub fn plan_approval(
        &self,
        inputs: &[ExpenseInput],
        actor: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<ApprovalPlan> {
        for input in inputs {
            ensure_positive("expense amount", input.amount)?;
        }

        let expenses = self.expense_rows(inputs, now);
        let mut receipts = Vec::new();

        if self.is_approved {
            if inputs.is_empty() {
                return Err(DomainError::invalid_state(
                    "purchase is already approved; an addendum needs at least one expense",
                ));
            }
            let added_expenses =
                checked_sum("purchase expenses", expenses.iter().map(|e| e.amount))?;
            let total_expenses =
                checked_sum("purchase expenses", [self.total_expenses, added_expenses])?;
            let final_total = checked_sum("purchase final total", [self.total, total_expenses])?;
            receipts.extend(self.expense_receipts(&expenses, now)?);
            return Ok(ApprovalPlan::Addendum(ExpenseAddendum {
                expenses,
                added_expenses,
                total_expenses,
                final_total,
                receipts,
            }));
        }

        let total_expenses =
            checked_sum("purchase expenses", expenses.iter().map(|e| e.amount))?;
        let final_total = checked_sum("purchase final total", [self.total, total_expenses])?;
        let total_quantity = self.total_quantity()?;
        let expense_per_unit = allocate_expense_per_unit(total_expenses, &self.lines)?;

        let cost_history = self
            .lines
            .iter()
            .map(|line| {
                Ok(ProductCostHistory {
                    id: CostHistoryId::new(),
                    product_id: line.product_id,
                    purchase_id: self.id,
                    company_id: self.company_id,
                    purchase_price: line.unit_price,
                    expense_per_unit,
                    total_cost_per_unit: checked_sum(
                        "landed cost per unit",
                        [line.unit_price, expense_per_unit],
                    )?,
                    quantity: line.qty,
                    created_at: now,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let stock_increments = self.lines.iter().map(|l| (l.product_id, l.qty)).collect();

        if let Some(supplier_id) = self.supplier_id {
            if self.total > Decimal::ZERO {
                receipts.push(SupplierPaymentReceipt::pending(
                    supplier_id,
                    Some(self.id),
                    self.total,
                    ReceiptType::MainPurchase,
                    format!("purchase {}", self.id),
                    now,
                )?);
            }
        }
        receipts.extend(self.expense_receipts(&expenses, now)?);

        Ok(ApprovalPlan::First(FirstApproval {
            approved_by: actor,
            approved_at: now,
            expenses,
            total_expenses,
            final_total,
            total_quantity,
            expense_per_unit,
            cost_history,
            stock_increments,
            receipts,
        }))
    }

    /// Evolve header state from an accepted plan. Totals were computed by the plan.
    pub fn apply_approval(&mut self, plan: &ApprovalPlan) {
        match plan {
            ApprovalPlan::First(p) => {
                self.is_approved = true;
                self.approved_at = Some(p.approved_at);
                self.approved_by = Some(p.approved_by);
                self.status = PurchaseStatus::Approved;
                self.total_expenses = p.total_expenses;
                self.final_total = p.final_total;
            }
            ApprovalPlan::Addendum(p) => {
                self.total_expenses = p.total_expenses;
                self.final_total = p.final_total;
            }
        }
        self.version += 1;
    }

    fn expense_rows(&self, inputs: &[ExpenseInput], now: DateTime<Utc>) -> Vec<PurchaseExpense> {
        inputs
            .iter()
            .map(|input| PurchaseExpense {
                id: ExpenseId::new(),
                purchase_id: self.id,
                category_id: input.category_id,
                category_name: input.category_name.clone(),
                supplier_id: input.supplier_id,
                amount: input.amount,
                notes: input.notes.clone(),
                created_at: now,
            })
            .collect()
    }

    fn expense_receipts(
        &self,
        expenses: &[PurchaseExpense],
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<SupplierPaymentReceipt>> {
        expenses
            .iter()
            .filter_map(|e| e.supplier_id.map(|supplier_id| (supplier_id, e)))
            .map(|(supplier_id, e)| {
                let description = match &e.category_name {
                    Some(name) => format!("{name} for purchase {}", self.id),
                    None => format!("expense for purchase {}", self.id),
                };
                Ok(SupplierPaymentReceipt::pending(
                    supplier_id,
                    Some(self.id),
                    e.amount,
                    ReceiptType::Expense,
                    description,
                    now,
                )?
                .with_category(e.category_name.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tradeerp_accounting::ReceiptStatus;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn line(qty: i64, price: i64) -> PurchaseLine {
        PurchaseLine::new(ProductId::new(), Decimal::from(qty), Decimal::from(price)).unwrap()
    }

    fn expense(amount: i64, supplier_id: Option<SupplierId>) -> ExpenseInput {
        ExpenseInput {
            category_id: ExpenseCategoryId::new(),
            category_name: Some("freight".to_string()),
            supplier_id,
            amount: Decimal::from(amount),
            notes: None,
        }
    }

    fn two_line_purchase(supplier_id: Option<SupplierId>) -> Purchase {
        Purchase::new(
            CompanyId::new(),
            supplier_id,
            vec![line(10, 5), line(5, 8)],
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn first_approval_allocates_expenses_uniformly() {
        let purchase = two_line_purchase(None);
        assert_eq!(purchase.total, Decimal::from(90));

        let plan = purchase
            .plan_approval(&[expense(75, None)], UserId::new(), test_time())
            .unwrap();
        let ApprovalPlan::First(first) = &plan else {
            panic!("expected first approval");
        };

        assert_eq!(first.total_quantity, Decimal::from(15));
        assert_eq!(first.expense_per_unit, Decimal::from(5));
        let costs: Vec<Money> = first.cost_history.iter().map(|h| h.total_cost_per_unit).collect();
        assert_eq!(costs, vec![Decimal::from(10), Decimal::from(13)]);
        assert_eq!(
            first.stock_increments,
            purchase.lines.iter().map(|l| (l.product_id, l.qty)).collect::<Vec<_>>()
        );

        let mut approved = purchase.clone();
        approved.apply_approval(&plan);
        assert!(approved.is_approved);
        assert_eq!(approved.status, PurchaseStatus::Approved);
        assert_eq!(approved.final_total, Decimal::from(165));
        assert_eq!(approved.version, 1);
    }

    #[test]
    fn first_approval_creates_main_and_expense_receipts() {
        let supplier = SupplierId::new();
        let forwarder = SupplierId::new();
        let purchase = two_line_purchase(Some(supplier));

        let plan = purchase
            .plan_approval(
                &[expense(75, Some(forwarder)), expense(10, None)],
                UserId::new(),
                test_time(),
            )
            .unwrap();

        let receipts = plan.receipts();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].receipt_type, ReceiptType::MainPurchase);
        assert_eq!(receipts[0].supplier_id, supplier);
        assert_eq!(receipts[0].amount, Decimal::from(90));
        assert_eq!(receipts[1].receipt_type, ReceiptType::Expense);
        assert_eq!(receipts[1].supplier_id, forwarder);
        assert_eq!(receipts[1].category_name.as_deref(), Some("freight"));
        assert!(receipts.iter().all(|r| r.status == ReceiptStatus::Pending));
    }

    #[test]
    fn empty_expenses_are_legal_on_first_approval() {
        let purchase = two_line_purchase(None);
        let plan = purchase.plan_approval(&[], UserId::new(), test_time()).unwrap();
        let ApprovalPlan::First(first) = plan else {
            panic!("expected first approval");
        };
        assert_eq!(first.expense_per_unit, Decimal::ZERO);
        assert_eq!(first.cost_history[1].total_cost_per_unit, Decimal::from(8));
    }

    #[test]
    fn zero_total_quantity_allocates_nothing() {
        let purchase =
            Purchase::new(CompanyId::new(), None, vec![line(0, 5)], test_time()).unwrap();
        let plan = purchase
            .plan_approval(&[expense(40, None)], UserId::new(), test_time())
            .unwrap();
        let ApprovalPlan::First(first) = plan else {
            panic!("expected first approval");
        };
        assert_eq!(first.expense_per_unit, Decimal::ZERO);
        assert_eq!(first.cost_history[0].total_cost_per_unit, Decimal::from(5));
    }

    #[test]
    fn addendum_requires_expenses_and_skips_stock() {
        let mut purchase = two_line_purchase(None);
        let plan = purchase
            .plan_approval(&[expense(75, None)], UserId::new(), test_time())
            .unwrap();
        purchase.apply_approval(&plan);

        let err = purchase
            .plan_approval(&[], UserId::new(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let forwarder = SupplierId::new();
        let plan = purchase
            .plan_approval(&[expense(20, Some(forwarder))], UserId::new(), test_time())
            .unwrap();
        let ApprovalPlan::Addendum(addendum) = &plan else {
            panic!("expected addendum");
        };
        assert_eq!(addendum.expenses.len(), 1);
        assert_eq!(addendum.receipts.len(), 1);
        assert_eq!(addendum.receipts[0].receipt_type, ReceiptType::Expense);

        let approved_at = purchase.approved_at;
        purchase.apply_approval(&plan);
        assert_eq!(purchase.total_expenses, Decimal::from(95));
        assert_eq!(purchase.final_total, Decimal::from(185));
        assert_eq!(purchase.approved_at, approved_at);
    }

    #[test]
    fn non_positive_expense_is_rejected_before_planning() {
        let purchase = two_line_purchase(None);
        let err = purchase
            .plan_approval(&[expense(0, None)], UserId::new(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        let big = Decimal::from(1_000_000_000_000_000i64);
        let err = PurchaseLine::new(ProductId::new(), big, big).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let huge = PurchaseLine::new(ProductId::new(), Decimal::ONE, Decimal::MAX).unwrap();
        let err = Purchase::new(
            CompanyId::new(),
            None,
            vec![huge.clone(), huge.clone()],
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.starts_with("purchase total")));

        // The header total fits, but adding expenses to it does not.
        let mut purchase = Purchase::new(CompanyId::new(), None, vec![huge], test_time()).unwrap();
        let err = purchase
            .plan_approval(&[expense(1, None)], UserId::new(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let plan = purchase.plan_approval(&[], UserId::new(), test_time()).unwrap();
        purchase.apply_approval(&plan);
        let before = purchase.clone();
        let err = purchase
            .plan_approval(&[expense(1, None)], UserId::new(), test_time())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(purchase, before);
    }

    #[test]
    fn purchase_without_lines_is_invalid() {
        let err = Purchase::new(CompanyId::new(), None, vec![], test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        /// Property: every line's landed cost is unit price + E/Q.
        #[test]
        fn landed_cost_is_price_plus_uniform_share(
            lines in prop::collection::vec((1i64..500, 0i64..10_000), 1..8),
            expense_cents in 1i64..1_000_000
        ) {
            let lines: Vec<PurchaseLine> = lines
                .into_iter()
                .map(|(q, p)| PurchaseLine::new(ProductId::new(), Decimal::from(q), Decimal::new(p, 2)).unwrap())
                .collect();
            let purchase = Purchase::new(CompanyId::new(), None, lines, test_time()).unwrap();
            let expenses = Decimal::new(expense_cents, 2);
            let input = ExpenseInput {
                category_id: ExpenseCategoryId::new(),
                category_name: None,
                supplier_id: None,
                amount: expenses,
                notes: None,
            };

            let plan = purchase.plan_approval(&[input], UserId::new(), test_time()).unwrap();
            let ApprovalPlan::First(first) = plan else {
                panic!("expected first approval");
            };
            let share = expenses / purchase.total_quantity().unwrap();
            for (history, line) in first.cost_history.iter().zip(&purchase.lines) {
                prop_assert_eq!(history.total_cost_per_unit, line.unit_price + share);
            }
            prop_assert_eq!(allocate_expense_per_unit(expenses, &purchase.lines).unwrap(), share);
        }
    }
}
