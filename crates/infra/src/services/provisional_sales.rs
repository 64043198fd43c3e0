//! Provisional sale (quotation) lifecycle and conversion into a firm sale.
//!
//! Conversion loads the quote under lock, builds the sale, decrements stock per
//! line and marks the quote converted, all in one unit of work. The stored
//! version guards against a second concurrent conversion.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use tradeerp_auth::{AccessPolicy, Actor, CompanyScopedPolicy, Permission};
use tradeerp_core::{CompanyId, CustomerId, ExpectedVersion, ProductId, ProvisionalSaleId};
use tradeerp_inventory::StockKey;
use tradeerp_sales::{
    NewProvisionalSale, ProvisionalSale, ProvisionalSalePatch, ProvisionalSaleStatus, Sale,
    SaleLine, SaleType,
};

use crate::error::CoreError;
use crate::services::stock;
use crate::store::{DirectoryRepository, SalesRepository, Store};

/// A converted quote together with the sale it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversion {
    pub provisional_sale: ProvisionalSale,
    pub sale: Sale,
}

pub struct ProvisionalSaleStateMachine<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Store> ProvisionalSaleStateMachine<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Arc::new(CompanyScopedPolicy))
    }

    pub fn with_policy(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    #[instrument(
        skip(self, actor, new),
        fields(company_id = %new.company_id, lines = new.lines.len()),
        err
    )]
    pub async fn create(
        &self,
        actor: &Actor,
        new: NewProvisionalSale,
    ) -> Result<ProvisionalSale, CoreError> {
        self.policy
            .check_company(actor, &Permission::PROVISIONAL_SALES_WRITE, new.company_id)?;

        let mut uow = self.store.begin().await?;
        if !uow.company_exists(new.company_id).await? {
            return Err(CoreError::not_found("company", new.company_id));
        }
        ensure_references(&mut *uow, new.customer_id, &new.lines).await?;

        let sale = ProvisionalSale::create(new, Utc::now())?;
        uow.insert_provisional_sale(&sale).await?;
        uow.commit().await?;

        info!(provisional_sale_id = %sale.id, total = %sale.total, "provisional sale created");
        Ok(sale)
    }

    #[instrument(skip(self, actor, patch), err)]
    pub async fn update(
        &self,
        actor: &Actor,
        id: ProvisionalSaleId,
        patch: ProvisionalSalePatch,
    ) -> Result<ProvisionalSale, CoreError> {
        let mut uow = self.store.begin().await?;
        let mut sale = self
            .load_owned(&mut *uow, actor, id, Permission::PROVISIONAL_SALES_WRITE)
            .await?;

        sale.ensure_editable()?;
        let lines = patch.lines.as_deref().unwrap_or_default();
        ensure_references(&mut *uow, patch.customer_id, lines).await?;

        let expected = ExpectedVersion::Exact(sale.version);
        sale.apply_patch(patch, Utc::now())?;
        uow.update_provisional_sale(&sale, expected).await?;
        uow.commit().await?;
        Ok(sale)
    }

    #[instrument(skip(self, actor), err)]
    pub async fn delete(&self, actor: &Actor, id: ProvisionalSaleId) -> Result<(), CoreError> {
        let mut uow = self.store.begin().await?;
        let sale = self
            .load_owned(&mut *uow, actor, id, Permission::PROVISIONAL_SALES_WRITE)
            .await?;

        sale.ensure_deletable()?;
        remove(&mut *uow, id).await?;
        uow.commit().await?;

        info!(provisional_sale_id = %id, "provisional sale deleted");
        Ok(())
    }

    #[instrument(skip(self, actor), fields(status = status.as_str()), err)]
    pub async fn transition(
        &self,
        actor: &Actor,
        id: ProvisionalSaleId,
        status: ProvisionalSaleStatus,
    ) -> Result<ProvisionalSale, CoreError> {
        let mut uow = self.store.begin().await?;
        let mut sale = self
            .load_owned(&mut *uow, actor, id, Permission::PROVISIONAL_SALES_WRITE)
            .await?;

        let expected = ExpectedVersion::Exact(sale.version);
        sale.transition(status, Utc::now())?;
        uow.update_provisional_sale(&sale, expected).await?;
        uow.commit().await?;
        Ok(sale)
    }

    #[instrument(
        skip(self, actor, payment_method),
        fields(sale_type = sale_type.as_str()),
        err
    )]
    pub async fn convert_to_sale(
        &self,
        actor: &Actor,
        id: ProvisionalSaleId,
        sale_type: SaleType,
        payment_method: &str,
    ) -> Result<Conversion, CoreError> {
        let mut uow = self.store.begin().await?;
        let mut provisional_sale = self
            .load_owned(&mut *uow, actor, id, Permission::PROVISIONAL_SALES_CONVERT)
            .await?;

        let now = Utc::now();
        let expected = ExpectedVersion::Exact(provisional_sale.version);
        let sale = provisional_sale.convert(sale_type, payment_method, now)?;

        uow.insert_sale(&sale).await?;
        for (product_id, delta) in sale.stock_decrements() {
            let key = StockKey::new(sale.company_id, product_id);
            stock::apply(&mut *uow, key, delta).await?;
        }
        uow.update_provisional_sale(&provisional_sale, expected).await?;
        uow.commit().await?;

        info!(
            provisional_sale_id = %id,
            sale_id = %sale.id,
            total = %sale.total,
            "provisional sale converted"
        );
        Ok(Conversion {
            provisional_sale,
            sale,
        })
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, id: ProvisionalSaleId) -> Result<ProvisionalSale, CoreError> {
        let mut uow = self.store.begin().await?;
        uow.provisional_sale(id)
            .await?
            .ok_or_else(|| CoreError::not_found("provisional sale", id))
    }

    #[instrument(skip(self), err)]
    pub async fn list_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<ProvisionalSale>, CoreError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.provisional_sales_for_company(company_id).await?)
    }

    /// Sales recorded against a quote. At most one for a converted quote.
    #[instrument(skip(self), err)]
    pub async fn sales_for(&self, id: ProvisionalSaleId) -> Result<Vec<Sale>, CoreError> {
        let mut uow = self.store.begin().await?;
        Ok(uow.sales_for_provisional_sale(id).await?)
    }

    async fn load_owned<R>(
        &self,
        repo: &mut R,
        actor: &Actor,
        id: ProvisionalSaleId,
        permission: Permission,
    ) -> Result<ProvisionalSale, CoreError>
    where
        R: SalesRepository + ?Sized,
    {
        let sale = repo
            .provisional_sale(id)
            .await?
            .ok_or_else(|| CoreError::not_found("provisional sale", id))?;
        self.policy
            .check_company(actor, &permission, sale.company_id)?;
        Ok(sale)
    }
}

/// Delete inside the caller's unit of work. `NotFound` if no row was removed.
pub(crate) async fn remove<R>(repo: &mut R, id: ProvisionalSaleId) -> Result<(), CoreError>
where
    R: SalesRepository + ?Sized,
{
    if !repo.delete_provisional_sale(id).await? {
        return Err(CoreError::not_found("provisional sale", id));
    }
    Ok(())
}

async fn ensure_references<R>(
    repo: &mut R,
    customer_id: Option<CustomerId>,
    lines: &[SaleLine],
) -> Result<(), CoreError>
where
    R: DirectoryRepository + ?Sized,
{
    if let Some(customer_id) = customer_id {
        if !repo.customer_exists(customer_id).await? {
            return Err(CoreError::not_found("customer", customer_id));
        }
    }

    let products: Vec<ProductId> = lines.iter().map(|l| l.product_id).collect();
    if products.is_empty() {
        return Ok(());
    }
    if let Some(missing) = repo.missing_products(&products).await?.first() {
        return Err(CoreError::not_found("product", missing));
    }
    Ok(())
}
