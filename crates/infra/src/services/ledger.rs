//! Supplier running ledger.
//!
//! ```text
//! append_entry
//!   ↓
//! 1. Lock the supplier row (serializes appends per supplier)
//!   ↓
//! 2. Read the highest-sequence entry (previous balance, 0 if none)
//!   ↓
//! 3. Fold the new signed amount into the balance
//!   ↓
//! 4. Insert the entry with `sequence = previous + 1`
//! ```
//!
//! Deletions always rewrite the running balance of every remaining entry, so
//! the stored balances stay equal to the fold over the entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use tradeerp_accounting::{
    LedgerEntry, NewLedgerEntry, ReferenceKind, Supplier, SupplierAccount, next_entry, rebalance,
    verify,
};
use tradeerp_auth::{AccessPolicy, Actor, CompanyScopedPolicy, Permission};
use tradeerp_core::money::ensure_positive;
use tradeerp_core::{Decimal, Money, SupplierId};

use crate::error::CoreError;
use crate::store::{DirectoryRepository, LedgerRepository, Store};

pub struct LedgerEngine<S> {
    store: S,
    policy: Arc<dyn AccessPolicy>,
}

impl<S: Store> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_policy(store, Arc::new(CompanyScopedPolicy))
    }

    pub fn with_policy(store: S, policy: Arc<dyn AccessPolicy>) -> Self {
        Self { store, policy }
    }

    #[instrument(
        skip(self, actor, entry),
        fields(
            supplier_id = %entry.supplier_id,
            direction = entry.direction.as_str(),
            reference_kind = entry.reference_kind.as_str(),
            reference_id = %entry.reference_id
        ),
        err
    )]
    pub async fn append_entry(
        &self,
        actor: &Actor,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, CoreError> {
        self.policy
            .check_permission(actor, &Permission::SUPPLIER_LEDGER_WRITE)?;

        let mut uow = self.store.begin().await?;
        let appended = append(&mut *uow, entry, Utc::now()).await?;
        uow.commit().await?;
        Ok(appended)
    }

    #[instrument(skip(self), err)]
    pub async fn account(&self, supplier_id: SupplierId) -> Result<SupplierAccount, CoreError> {
        let mut uow = self.store.begin().await?;
        let supplier = existing_supplier(&mut *uow, supplier_id).await?;
        let entries = uow.entries(supplier_id).await?;
        Ok(SupplierAccount::from_entries(supplier, entries)?)
    }

    #[instrument(skip(self), err)]
    pub async fn current_balance(&self, supplier_id: SupplierId) -> Result<Money, CoreError> {
        let mut uow = self.store.begin().await?;
        existing_supplier(&mut *uow, supplier_id).await?;
        Ok(uow
            .latest_entry(supplier_id)
            .await?
            .map(|e| e.running_balance)
            .unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self, actor), err)]
    pub async fn remove_entries_by_reference(
        &self,
        actor: &Actor,
        supplier_id: SupplierId,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Result<u64, CoreError> {
        self.policy
            .check_permission(actor, &Permission::SUPPLIER_LEDGER_WRITE)?;

        let mut uow = self.store.begin().await?;
        let removed = remove_by_reference(&mut *uow, supplier_id, reference_kind, reference_id).await?;
        uow.commit().await?;
        Ok(removed)
    }

    /// `Inconsistent` if any stored running balance disagrees with the fold.
    #[instrument(skip(self), err)]
    pub async fn verify_balances(&self, supplier_id: SupplierId) -> Result<(), CoreError> {
        let mut uow = self.store.begin().await?;
        existing_supplier(&mut *uow, supplier_id).await?;
        let entries = uow.entries(supplier_id).await?;
        verify(&entries)?;
        Ok(())
    }

    /// Repair drift. Returns how many entries were rewritten.
    #[instrument(skip(self, actor), err)]
    pub async fn rebalance(&self, actor: &Actor, supplier_id: SupplierId) -> Result<usize, CoreError> {
        self.policy
            .check_permission(actor, &Permission::SUPPLIER_LEDGER_WRITE)?;

        let mut uow = self.store.begin().await?;
        lock_existing_supplier(&mut *uow, supplier_id).await?;
        let rewritten = rewrite_balances(&mut *uow, supplier_id).await?;
        uow.commit().await?;

        if rewritten > 0 {
            warn!(%supplier_id, rewritten, "ledger drift repaired");
        }
        Ok(rewritten)
    }
}

async fn existing_supplier<R>(repo: &mut R, supplier_id: SupplierId) -> Result<Supplier, CoreError>
where
    R: DirectoryRepository + ?Sized,
{
    repo.supplier(supplier_id)
        .await?
        .ok_or_else(|| CoreError::not_found("supplier", supplier_id))
}

async fn lock_existing_supplier<R>(
    repo: &mut R,
    supplier_id: SupplierId,
) -> Result<Supplier, CoreError>
where
    R: DirectoryRepository + ?Sized,
{
    repo.lock_supplier(supplier_id)
        .await?
        .ok_or_else(|| CoreError::not_found("supplier", supplier_id))
}

/// Append inside the caller's unit of work.
pub(crate) async fn append<R>(
    repo: &mut R,
    entry: NewLedgerEntry,
    now: DateTime<Utc>,
) -> Result<LedgerEntry, CoreError>
where
    R: DirectoryRepository + LedgerRepository + ?Sized,
{
    ensure_positive("ledger amount", entry.amount)?;
    lock_existing_supplier(repo, entry.supplier_id).await?;

    let previous = repo.latest_entry(entry.supplier_id).await?;
    let next = next_entry(previous.as_ref(), entry, now)?;
    repo.insert_entry(&next).await?;

    debug!(
        supplier_id = %next.supplier_id,
        sequence = next.sequence,
        running_balance = %next.running_balance,
        "ledger entry appended"
    );
    Ok(next)
}

/// Delete matching entries inside the caller's unit of work, then rebalance.
pub(crate) async fn remove_by_reference<R>(
    repo: &mut R,
    supplier_id: SupplierId,
    reference_kind: ReferenceKind,
    reference_id: Uuid,
) -> Result<u64, CoreError>
where
    R: DirectoryRepository + LedgerRepository + ?Sized,
{
    lock_existing_supplier(repo, supplier_id).await?;

    let removed = repo
        .delete_entries(supplier_id, reference_kind, reference_id)
        .await?;
    if removed > 0 {
        rewrite_balances(repo, supplier_id).await?;
        debug!(
            %supplier_id,
            reference_kind = reference_kind.as_str(),
            %reference_id,
            removed,
            "ledger entries removed"
        );
    }
    Ok(removed)
}

async fn rewrite_balances<R>(repo: &mut R, supplier_id: SupplierId) -> Result<usize, CoreError>
where
    R: LedgerRepository + ?Sized,
{
    let mut entries = repo.entries(supplier_id).await?;
    let changed = rebalance(&mut entries)?;
    for entry in entries.iter().filter(|e| changed.contains(&e.id)) {
        repo.set_running_balance(entry.id, entry.running_balance)
            .await?;
    }
    Ok(changed.len())
}
