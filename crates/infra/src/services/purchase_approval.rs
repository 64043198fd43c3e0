//! Purchase approval.
//!
//! ```text
//! approve(purchase_id, expenses, actor)
//!   ↓
//! 1. Load + lock the purchase, authorize against its company
//!   ↓
//! 2. Plan (pure): first approval or expense addendum, all inputs validated
//!   ↓
//! 3. Persist expenses + header (expected version)
//!   ↓
//! 4. First approval only: cost history, stock += line qty
//!   ↓
//! 5. Payment receipts, one ledger CREDIT per receipt
//!   ↓
//! 6. Commit
//! ```
//!
//! Every step shares one unit of work, so a failure anywhere leaves no trace.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use tradeerp_accounting::SupplierPaymentReceipt;
use tradeerp_auth::{AccessPolicy, Actor, CompanyScopedPolicy, Permission};
use tradeerp_core::{ExpectedVersion, PurchaseId};
use tradeerp_inventory::StockKey;
use tradeerp_purchasing::{ApprovalPlan, ExpenseInput, ProductCost, Purchase};

use crate::error::CoreError;
use crate::services::{ledger, stock};
use crate::store::Store;

/// Result of an `approve` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalOutcome {
    pub purchase: Purchase,
    /// Cost basis per line, from the first approval.
    pub product_costs: Vec<ProductCost>,
    /// Receipts created by this call only.
    pub payment_receipts: Vec<SupplierPaymentReceipt>,
}

pub struct PurchaseApprovalWorkflow<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Store> PurchaseApprovalWorkflow<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Arc::new(CompanyScopedPolicy))
    }

    pub fn with_policy(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    #[instrument(
        skip(self, expenses, actor),
        fields(expense_count = expenses.len(), user_id = %actor.user_id),
        err
    )]
    pub async fn approve(
        &self,
        purchase_id: PurchaseId,
        expenses: Vec<ExpenseInput>,
        actor: &Actor,
    ) -> Result<ApprovalOutcome, CoreError> {
        let mut uow = self.store.begin().await?;

        let mut purchase = uow
            .purchase(purchase_id)
            .await?
            .ok_or_else(|| CoreError::not_found("purchase", purchase_id))?;
        self.policy
            .check_company(actor, &Permission::PURCHASES_APPROVE, purchase.company_id)?;

        let now = Utc::now();
        let expected = ExpectedVersion::Exact(purchase.version);
        let plan = purchase.plan_approval(&expenses, actor.user_id, now)?;
        purchase.apply_approval(&plan);

        uow.insert_expenses(plan.expenses()).await?;
        uow.update_purchase(&purchase, expected).await?;

        let product_costs = match &plan {
            ApprovalPlan::First(first) => {
                uow.insert_cost_history(&first.cost_history).await?;
                for (product_id, qty) in &first.stock_increments {
                    let key = StockKey::new(purchase.company_id, *product_id);
                    stock::apply(&mut *uow, key, *qty).await?;
                }
                first.cost_history.iter().map(ProductCost::from).collect()
            }
            ApprovalPlan::Addendum(_) => uow
                .cost_history(purchase.id)
                .await?
                .iter()
                .map(ProductCost::from)
                .collect(),
        };

        for receipt in plan.receipts() {
            uow.insert_receipt(receipt).await?;
            ledger::append(&mut *uow, receipt.credit_entry(), now).await?;
        }

        uow.commit().await?;

        info!(
            %purchase_id,
            company_id = %purchase.company_id,
            addendum = matches!(plan, ApprovalPlan::Addendum(_)),
            total_expenses = %purchase.total_expenses,
            final_total = %purchase.final_total,
            receipts = plan.receipts().len(),
            "purchase approved"
        );

        Ok(ApprovalOutcome {
            purchase,
            product_costs,
            payment_receipts: plan.receipts().to_vec(),
        })
    }
}
