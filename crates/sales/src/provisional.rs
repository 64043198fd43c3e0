use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeerp_core::{
    AggregateRoot, CompanyId, CustomerId, DomainError, DomainResult, Money, ProvisionalSaleId,
    SaleId,
};

use crate::sale::{Sale, SaleLine, SaleType, lines_total};

/// Quote lifecycle. `Converted` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionalSaleStatus {
    Draft,
    Pending,
    Approved,
    Converted,
    Cancelled,
}

impl ProvisionalSaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionalSaleStatus::Draft => "draft",
            ProvisionalSaleStatus::Pending => "pending",
            ProvisionalSaleStatus::Approved => "approved",
            ProvisionalSaleStatus::Converted => "converted",
            ProvisionalSaleStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionalSaleStatus::Converted | ProvisionalSaleStatus::Cancelled
        )
    }

    /// Explicit transitions reachable outside of conversion.
    pub fn can_transition_to(&self, next: ProvisionalSaleStatus) -> bool {
        use ProvisionalSaleStatus::*;
        match (self, next) {
            (Draft, Pending) | (Draft, Approved) | (Pending, Approved) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl core::str::FromStr for ProvisionalSaleStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "converted" => Ok(Self::Converted),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown provisional sale status '{other}'"
            ))),
        }
    }
}

/// Input for [`ProvisionalSale::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProvisionalSale {
    pub company_id: CompanyId,
    pub customer_id: Option<CustomerId>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<SaleLine>,
    /// Defaults to `Draft`.
    pub status: Option<ProvisionalSaleStatus>,
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalSalePatch {
    pub customer_id: Option<CustomerId>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    /// Replaces the whole line set and recomputes the total.
    pub lines: Option<Vec<SaleLine>>,
    pub status: Option<ProvisionalSaleStatus>,
}

/// Aggregate root: ProvisionalSale (a quotation with no inventory effect until converted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalSale {
    pub id: ProvisionalSaleId,
    pub company_id: CompanyId,
    pub customer_id: Option<CustomerId>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub lines: Vec<SaleLine>,
    pub total: Money,
    pub status: ProvisionalSaleStatus,
    /// Set once by conversion, never reset.
    pub is_converted: bool,
    pub converted_sale_id: Option<SaleId>,
    pub converted_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRoot for ProvisionalSale {
    type Id = ProvisionalSaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_has_lines(lines: &[SaleLine]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation("provisional sale must have lines"));
    }
    Ok(())
}

impl ProvisionalSale {
    pub fn create(new: NewProvisionalSale, now: DateTime<Utc>) -> DomainResult<Self> {
        ensure_has_lines(&new.lines)?;

        let status = new.status.unwrap_or(ProvisionalSaleStatus::Draft);
        if !matches!(
            status,
            ProvisionalSaleStatus::Draft | ProvisionalSaleStatus::Pending
        ) {
            return Err(DomainError::validation(format!(
                "provisional sale cannot be created as {}",
                status.as_str()
            )));
        }

        let total = lines_total(&new.lines)?;
        Ok(Self {
            id: ProvisionalSaleId::new(),
            company_id: new.company_id,
            customer_id: new.customer_id,
            invoice_number: new.invoice_number,
            notes: new.notes,
            lines: new.lines,
            total,
            status,
            is_converted: false,
            converted_sale_id: None,
            converted_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn ensure_editable(&self) -> DomainResult<()> {
        if self.is_converted {
            return Err(DomainError::invalid_state("cannot edit a converted quote"));
        }
        if self.status == ProvisionalSaleStatus::Cancelled {
            return Err(DomainError::invalid_state("cannot edit a cancelled quote"));
        }
        Ok(())
    }

    pub fn ensure_deletable(&self) -> DomainResult<()> {
        if self.is_converted {
            return Err(DomainError::invalid_state("cannot delete a converted quote"));
        }
        Ok(())
    }

    /// Apply a partial update. Validates everything before touching `self`.
    pub fn apply_patch(&mut self, patch: ProvisionalSalePatch, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_editable()?;

        let total = match &patch.lines {
            Some(lines) => {
                ensure_has_lines(lines)?;
                Some(lines_total(lines)?)
            }
            None => None,
        };
        if let Some(next) = patch.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(self.transition_error(next));
            }
        }

        if let Some(customer_id) = patch.customer_id {
            self.customer_id = Some(customer_id);
        }
        if let Some(invoice_number) = patch.invoice_number {
            self.invoice_number = Some(invoice_number);
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes);
        }
        if let (Some(lines), Some(total)) = (patch.lines, total) {
            self.total = total;
            self.lines = lines;
        }
        if let Some(next) = patch.status {
            self.status = next;
        }

        self.touch(now);
        Ok(())
    }

    /// Explicit forward move or cancellation.
    pub fn transition(&mut self, next: ProvisionalSaleStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(self.transition_error(next));
        }
        self.status = next;
        self.touch(now);
        Ok(())
    }

    /// One-way conversion into a firm sale.
    ///
    /// Auto-approves a quote that is not yet approved. The returned sale carries
    /// the stock decrements the caller must apply.
    pub fn convert(
        &mut self,
        sale_type: SaleType,
        payment_method: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Sale> {
        if self.is_converted {
            return Err(DomainError::invalid_state("provisional sale is already converted"));
        }
        if self.status == ProvisionalSaleStatus::Cancelled {
            return Err(DomainError::invalid_state("cannot convert a cancelled quote"));
        }
        if self.status != ProvisionalSaleStatus::Approved {
            self.status = ProvisionalSaleStatus::Approved;
        }

        let sale = Sale::new(
            self.company_id,
            self.customer_id,
            self.invoice_number.clone(),
            self.id,
            sale_type,
            payment_method,
            self.lines.clone(),
            self.total,
            now,
        );

        self.is_converted = true;
        self.converted_sale_id = Some(sale.id);
        self.converted_at = Some(now);
        self.status = ProvisionalSaleStatus::Converted;
        self.touch(now);

        Ok(sale)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.version += 1;
    }

    fn transition_error(&self, next: ProvisionalSaleStatus) -> DomainError {
        DomainError::invalid_state(format!(
            "cannot move provisional sale from {} to {}",
            self.status.as_str(),
            next.as_str()
        ))
    }
}
