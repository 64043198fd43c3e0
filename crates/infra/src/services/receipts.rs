//! Supplier payment receipt lifecycle.
//!
//! Paying a receipt books a ledger DEBIT against it; cancelling removes every
//! ledger entry that references it (the original CREDIT and any payment) and
//! rebalances the supplier.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use tradeerp_accounting::{LedgerEntry, SupplierPaymentReceipt};
use tradeerp_auth::{AccessPolicy, Actor, CompanyScopedPolicy, Permission};
use tradeerp_core::{PurchaseId, ReceiptId};

use crate::error::CoreError;
use crate::services::ledger;
use crate::store::{PurchaseRepository, Store};

pub struct PaymentReceiptService<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Store> PaymentReceiptService<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Arc::new(CompanyScopedPolicy))
    }

    pub fn with_policy(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    /// PENDING → PAID. Returns the receipt and the DEBIT it booked.
    #[instrument(skip(self, actor), err)]
    pub async fn mark_paid(
        &self,
        actor: &Actor,
        receipt_id: ReceiptId,
    ) -> Result<(SupplierPaymentReceipt, LedgerEntry), CoreError> {
        let mut uow = self.store.begin().await?;
        let mut receipt = uow
            .receipt(receipt_id)
            .await?
            .ok_or_else(|| CoreError::not_found("receipt", receipt_id))?;
        self.authorize(&mut *uow, actor, &receipt).await?;

        let now = Utc::now();
        let debit = receipt.mark_paid(now)?;
        uow.update_receipt(&receipt).await?;
        let entry = ledger::append(&mut *uow, debit, now).await?;
        uow.commit().await?;

        info!(
            %receipt_id,
            supplier_id = %receipt.supplier_id,
            amount = %receipt.amount,
            "receipt paid"
        );
        Ok((receipt, entry))
    }

    /// PENDING or PAID → CANCELLED, dropping the receipt's ledger entries.
    #[instrument(skip(self, actor), err)]
    pub async fn cancel(
        &self,
        actor: &Actor,
        receipt_id: ReceiptId,
    ) -> Result<SupplierPaymentReceipt, CoreError> {
        let mut uow = self.store.begin().await?;
        let mut receipt = uow
            .receipt(receipt_id)
            .await?
            .ok_or_else(|| CoreError::not_found("receipt", receipt_id))?;
        self.authorize(&mut *uow, actor, &receipt).await?;

        let kinds = receipt.cancel()?;
        let mut removed = 0;
        for kind in kinds {
            removed += ledger::remove_by_reference(
                &mut *uow,
                receipt.supplier_id,
                kind,
                *receipt.id.as_uuid(),
            )
            .await?;
        }
        uow.update_receipt(&receipt).await?;
        uow.commit().await?;

        info!(%receipt_id, removed, "receipt cancelled");
        Ok(receipt)
    }

    #[instrument(skip(self), err)]
    pub async fn receipts_for_purchase(
        &self,
        purchase_id: PurchaseId,
    ) -> Result<Vec<SupplierPaymentReceipt>, CoreError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.receipts_for_purchase(purchase_id).await?)
    }

    /// Purchase receipts are owned by the purchase's company; free-standing
    /// receipts only need the permission.
    async fn authorize<R>(
        &self,
        repo: &mut R,
        actor: &Actor,
        receipt: &SupplierPaymentReceipt,
    ) -> Result<(), CoreError>
    where
        R: PurchaseRepository + ?Sized,
    {
        let required = Permission::SUPPLIER_PAYMENTS_WRITE;
        match receipt.purchase_id {
            Some(purchase_id) => {
                let purchase = repo
                    .purchase(purchase_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("purchase", purchase_id))?;
                self.policy
                    .check_company(actor, &required, purchase.company_id)?;
            }
            None => self.policy.check_permission(actor, &required)?,
        }
        Ok(())
    }
}
