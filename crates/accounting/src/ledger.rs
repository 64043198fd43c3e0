use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeerp_core::money::ensure_positive;
use tradeerp_core::{Decimal, DomainError, DomainResult, LedgerEntryId, Money, SupplierId};

/// Side of a supplier ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The supplier is owed more (purchase, expense, return-to-supplier).
    Credit,
    /// The obligation is reduced (a payment made).
    Debit,
}

/// What kind of business document a ledger entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Purchase,
    Payment,
    Adjustment,
    Return,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Purchase => "purchase",
            ReferenceKind::Payment => "payment",
            ReferenceKind::Adjustment => "adjustment",
            ReferenceKind::Return => "return",
        }
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }
}

/// Supplier header as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
}

/// One stored movement on a supplier's running balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub supplier_id: SupplierId,
    /// Per-supplier insertion order, starting at 1. Canonical order for balances.
    pub sequence: u64,
    pub direction: Direction,
    /// Always positive; the sign lives in `direction`.
    pub amount: Money,
    pub running_balance: Money,
    pub reference_kind: ReferenceKind,
    pub reference_id: Uuid,
    pub description: Option<String>,
    /// Business date (display order only).
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Request to append an entry; the balance and ordering are assigned on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub supplier_id: SupplierId,
    pub direction: Direction,
    pub amount: Money,
    pub reference_kind: ReferenceKind,
    pub reference_id: Uuid,
    pub description: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
}

impl NewLedgerEntry {
    pub fn credit(
        supplier_id: SupplierId,
        amount: Money,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Self {
        Self {
            supplier_id,
            direction: Direction::Credit,
            amount,
            reference_kind,
            reference_id,
            description: None,
            transaction_date: None,
        }
    }

    pub fn debit(
        supplier_id: SupplierId,
        amount: Money,
        reference_kind: ReferenceKind,
        reference_id: Uuid,
    ) -> Self {
        Self {
            direction: Direction::Debit,
            ..Self::credit(supplier_id, amount, reference_kind, reference_id)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn dated(mut self, transaction_date: DateTime<Utc>) -> Self {
        self.transaction_date = Some(transaction_date);
        self
    }
}

fn balance_out_of_range(supplier_id: SupplierId, sequence: u64) -> DomainError {
    DomainError::inconsistent(format!(
        "running balance of supplier {supplier_id} is out of range at sequence {sequence}"
    ))
}

/// `balance` moved by one entry, or `Inconsistent` if the result does not fit.
fn folded(balance: Money, entry: &LedgerEntry) -> DomainResult<Money> {
    balance
        .checked_add(entry.signed_amount())
        .ok_or_else(|| balance_out_of_range(entry.supplier_id, entry.sequence))
}

/// Build the entry that follows `previous` in the supplier's stream.
///
/// `previous` must be the supplier's latest entry by `sequence` (or `None` for
/// an empty ledger).
pub fn next_entry(
    previous: Option<&LedgerEntry>,
    new: NewLedgerEntry,
    now: DateTime<Utc>,
) -> DomainResult<LedgerEntry> {
    ensure_positive("ledger amount", new.amount)?;

    if let Some(prev) = previous {
        if prev.supplier_id != new.supplier_id {
            return Err(DomainError::invalid_state("previous entry belongs to another supplier"));
        }
    }

    let previous_balance = previous.map(|e| e.running_balance).unwrap_or(Decimal::ZERO);
    let sequence = previous.map(|e| e.sequence).unwrap_or(0) + 1;

    let running_balance = match new.direction {
        Direction::Credit => previous_balance.checked_add(new.amount),
        Direction::Debit => previous_balance.checked_sub(new.amount),
    }
    .ok_or_else(|| balance_out_of_range(new.supplier_id, sequence))?;

    Ok(LedgerEntry {
        id: LedgerEntryId::new(),
        supplier_id: new.supplier_id,
        sequence,
        direction: new.direction,
        amount: new.amount,
        running_balance,
        reference_kind: new.reference_kind,
        reference_id: new.reference_id,
        description: new.description,
        transaction_date: new.transaction_date.unwrap_or(now),
        created_at: now,
    })
}

/// Recompute stored running balances in `sequence` order.
///
/// Sorts `entries` by sequence and returns the ids whose balance changed.
/// Balances are left untouched when the fold does not fit.
pub fn rebalance(entries: &mut [LedgerEntry]) -> DomainResult<Vec<LedgerEntryId>> {
    entries.sort_by_key(|e| e.sequence);

    let mut balance = Decimal::ZERO;
    let mut balances = Vec::with_capacity(entries.len());
    for entry in entries.iter() {
        balance = folded(balance, entry)?;
        balances.push(balance);
    }

    let mut changed = Vec::new();
    for (entry, balance) in entries.iter_mut().zip(balances) {
        if entry.running_balance != balance {
            entry.running_balance = balance;
            changed.push(entry.id);
        }
    }
    Ok(changed)
}

/// Fail with `Inconsistent` if any stored balance disagrees with the fold.
pub fn verify(entries: &[LedgerEntry]) -> DomainResult<()> {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    let mut balance = Decimal::ZERO;
    for entry in ordered {
        balance = folded(balance, entry)?;
        if entry.running_balance != balance {
            return Err(DomainError::inconsistent(format!(
                "ledger entry {} (sequence {}) stores balance {} but the fold gives {}",
                entry.id, entry.sequence, entry.running_balance, balance
            )));
        }
    }
    Ok(())
}

/// Supplier statement: header, totals and entries in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierAccount {
    pub supplier: Supplier,
    pub current_balance: Money,
    pub total_credit: Money,
    pub total_debit: Money,
    /// Newest business date first.
    pub entries: Vec<LedgerEntry>,
}

impl SupplierAccount {
    pub fn from_entries(supplier: Supplier, mut entries: Vec<LedgerEntry>) -> DomainResult<Self> {
        let current_balance = entries
            .iter()
            .max_by_key(|e| e.sequence)
            .map(|e| e.running_balance)
            .unwrap_or(Decimal::ZERO);

        let mut total_credit = Decimal::ZERO;
        let mut total_debit = Decimal::ZERO;
        for entry in &entries {
            let total = match entry.direction {
                Direction::Credit => &mut total_credit,
                Direction::Debit => &mut total_debit,
            };
            *total = total.checked_add(entry.amount).ok_or_else(|| {
                DomainError::inconsistent(format!(
                    "ledger totals of supplier {} are out of range",
                    supplier.id
                ))
            })?;
        }

        entries.sort_by(|a, b| {
            b.transaction_date
                .cmp(&a.transaction_date)
                .then(b.sequence.cmp(&a.sequence))
        });

        Ok(Self {
            supplier,
            current_balance,
            total_credit,
            total_debit,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_supplier_id() -> SupplierId {
        SupplierId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn append(
        entries: &mut Vec<LedgerEntry>,
        new: NewLedgerEntry,
    ) -> DomainResult<LedgerEntry> {
        let entry = next_entry(entries.last(), new, test_time())?;
        entries.push(entry.clone());
        Ok(entry)
    }

    fn signed_total(entries: &[LedgerEntry]) -> Money {
        entries.iter().map(LedgerEntry::signed_amount).sum()
    }

    #[test]
    fn credit_then_debit_runs_the_balance() {
        let supplier = test_supplier_id();
        let mut entries = Vec::new();

        let first = append(
            &mut entries,
            NewLedgerEntry::credit(supplier, Decimal::from(500), ReferenceKind::Purchase, Uuid::now_v7()),
        )
        .unwrap();
        assert_eq!(first.running_balance, Decimal::from(500));
        assert_eq!(first.sequence, 1);

        let second = append(
            &mut entries,
            NewLedgerEntry::debit(supplier, Decimal::from(200), ReferenceKind::Payment, Uuid::now_v7()),
        )
        .unwrap();
        assert_eq!(second.running_balance, Decimal::from(300));
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let new = NewLedgerEntry::credit(
            test_supplier_id(),
            Decimal::ZERO,
            ReferenceKind::Adjustment,
            Uuid::now_v7(),
        );
        let err = next_entry(None, new, test_time()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn previous_entry_of_another_supplier_is_refused() {
        let prev = next_entry(
            None,
            NewLedgerEntry::credit(test_supplier_id(), Decimal::ONE, ReferenceKind::Purchase, Uuid::now_v7()),
            test_time(),
        )
        .unwrap();
        let new = NewLedgerEntry::credit(
            test_supplier_id(),
            Decimal::ONE,
            ReferenceKind::Purchase,
            Uuid::now_v7(),
        );
        assert!(next_entry(Some(&prev), new, test_time()).is_err());
    }

    #[test]
    fn balance_overflow_is_inconsistent() {
        let supplier = test_supplier_id();
        let mut entries = Vec::new();
        append(
            &mut entries,
            NewLedgerEntry::credit(supplier, Decimal::MAX, ReferenceKind::Purchase, Uuid::now_v7()),
        )
        .unwrap();

        let err = append(
            &mut entries,
            NewLedgerEntry::credit(supplier, Decimal::ONE, ReferenceKind::Purchase, Uuid::now_v7()),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Inconsistent(_)));
        assert_eq!(entries.len(), 1);

        // A stream that cannot be folded is reported, never rewritten.
        let mut forged = entries[0].clone();
        forged.id = LedgerEntryId::new();
        forged.sequence = 2;
        entries.push(forged);
        let before = entries.clone();
        assert!(matches!(verify(&entries), Err(DomainError::Inconsistent(_))));
        assert!(matches!(rebalance(&mut entries), Err(DomainError::Inconsistent(_))));
        assert_eq!(entries, before);

        let account = SupplierAccount::from_entries(
            Supplier {
                id: supplier,
                name: "Acme".to_string(),
            },
            entries,
        );
        assert!(matches!(account, Err(DomainError::Inconsistent(_))));
    }

    #[test]
    fn rebalance_repairs_balances_after_deletion() {
        let supplier = test_supplier_id();
        let mut entries = Vec::new();
        for amount in [100, 50, 25] {
            append(
                &mut entries,
                NewLedgerEntry::credit(supplier, Decimal::from(amount), ReferenceKind::Purchase, Uuid::now_v7()),
            )
            .unwrap();
        }

        entries.remove(1);
        assert!(matches!(verify(&entries), Err(DomainError::Inconsistent(_))));

        let changed = rebalance(&mut entries).unwrap();
        assert_eq!(changed, vec![entries[1].id]);
        assert_eq!(entries[1].running_balance, Decimal::from(125));
        assert!(verify(&entries).is_ok());
    }

    #[test]
    fn account_orders_by_business_date_but_balances_by_sequence() {
        let supplier = test_supplier_id();
        let now = test_time();
        let mut entries = Vec::new();

        // Back-dated second entry.
        append(
            &mut entries,
            NewLedgerEntry::credit(supplier, Decimal::from(500), ReferenceKind::Purchase, Uuid::now_v7())
                .dated(now),
        )
        .unwrap();
        append(
            &mut entries,
            NewLedgerEntry::debit(supplier, Decimal::from(200), ReferenceKind::Payment, Uuid::now_v7())
                .dated(now - Duration::days(3)),
        )
        .unwrap();

        let account = SupplierAccount::from_entries(
            Supplier {
                id: supplier,
                name: "Acme".to_string(),
            },
            entries,
        )
        .unwrap();

        assert_eq!(account.current_balance, Decimal::from(300));
        assert_eq!(account.total_credit, Decimal::from(500));
        assert_eq!(account.total_debit, Decimal::from(200));
        assert_eq!(account.entries[0].direction, Direction::Credit);
        assert_eq!(account.entries[1].direction, Direction::Debit);
    }

    #[test]
    fn empty_account_has_zero_balance() {
        let supplier = Supplier {
            id: test_supplier_id(),
            name: "Empty".to_string(),
        };
        let account = SupplierAccount::from_entries(supplier, vec![]).unwrap();
        assert_eq!(account.current_balance, Decimal::ZERO);
        assert!(account.entries.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the latest running balance equals credits minus debits.
        #[test]
        fn running_balance_equals_credit_minus_debit(
            moves in prop::collection::vec((any::<bool>(), 1i64..1_000_000i64), 1..30)
        ) {
            let supplier = test_supplier_id();
            let mut entries = Vec::new();
            let mut expected = Decimal::ZERO;

            for (is_credit, cents) in moves {
                let amount = Decimal::new(cents, 2);
                let new = if is_credit {
                    expected += amount;
                    NewLedgerEntry::credit(supplier, amount, ReferenceKind::Purchase, Uuid::now_v7())
                } else {
                    expected -= amount;
                    NewLedgerEntry::debit(supplier, amount, ReferenceKind::Payment, Uuid::now_v7())
                };
                append(&mut entries, new).unwrap();
            }

            prop_assert_eq!(entries.last().unwrap().running_balance, expected);
            prop_assert_eq!(signed_total(&entries), expected);
            prop_assert!(verify(&entries).is_ok());
        }

        /// Property: after removing any subset and rebalancing, the stream verifies.
        #[test]
        fn rebalance_after_arbitrary_removal_verifies(
            amounts in prop::collection::vec(1i64..10_000i64, 2..20),
            keep_mask in prop::collection::vec(any::<bool>(), 20)
        ) {
            let supplier = test_supplier_id();
            let mut entries = Vec::new();
            for cents in amounts {
                append(
                    &mut entries,
                    NewLedgerEntry::credit(supplier, Decimal::new(cents, 2), ReferenceKind::Purchase, Uuid::now_v7()),
                )
                .unwrap();
            }

            let mut kept: Vec<LedgerEntry> = entries
                .into_iter()
                .zip(keep_mask)
                .filter_map(|(e, keep)| keep.then_some(e))
                .collect();
            rebalance(&mut kept).unwrap();

            prop_assert!(verify(&kept).is_ok());
            if let Some(last) = kept.last() {
                prop_assert_eq!(last.running_balance, signed_total(&kept));
            }
        }
    }
}
