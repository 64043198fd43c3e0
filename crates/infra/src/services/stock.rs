//! Per-(company, product) on-hand quantity.

use std::sync::Arc;

use tracing::{instrument, warn};

use tradeerp_auth::{AccessPolicy, Actor, CompanyScopedPolicy, Permission};
use tradeerp_core::{CompanyId, Decimal, ProductId, Quantity};
use tradeerp_inventory::{StockAdjustment, StockKey};

use crate::error::CoreError;
use crate::store::{StockRepository, Store};

pub struct StockMutator<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Store> StockMutator<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Arc::new(CompanyScopedPolicy))
    }

    pub fn with_policy(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    /// Upsert `boxes += delta`. There is no lower bound.
    #[instrument(skip(self, actor), fields(delta = %delta), err)]
    pub async fn adjust(
        &self,
        actor: &Actor,
        company_id: CompanyId,
        product_id: ProductId,
        delta: Quantity,
    ) -> Result<StockAdjustment, CoreError> {
        self.policy
            .check_company(actor, &Permission::STOCK_ADJUST, company_id)?;

        let mut uow = self.store.begin().await?;
        let adjustment = apply(&mut *uow, StockKey::new(company_id, product_id), delta).await?;
        uow.commit().await?;
        Ok(adjustment)
    }

    /// Current boxes, 0 if the product was never stocked.
    #[instrument(skip(self), err)]
    pub async fn on_hand(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Quantity, CoreError> {
        let mut uow = self.store.begin().await?;
        Ok(uow
            .stock(StockKey::new(company_id, product_id))
            .await?
            .map(|row| row.boxes)
            .unwrap_or(Decimal::ZERO))
    }
}

/// Adjust inside the caller's unit of work.
pub(crate) async fn apply<R>(
    repo: &mut R,
    key: StockKey,
    delta: Quantity,
) -> Result<StockAdjustment, CoreError>
where
    R: StockRepository + ?Sized,
{
    let row = repo.add_boxes(key, delta).await?;
    let adjustment = StockAdjustment::from_after(key, delta, row.boxes)?;

    if adjustment.is_negative() {
        warn!(
            company_id = %key.company_id,
            product_id = %key.product_id,
            boxes = %adjustment.after,
            "stock went negative"
        );
    }
    Ok(adjustment)
}
