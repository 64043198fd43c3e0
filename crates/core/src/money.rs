//! Exact decimal money and quantity helpers.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// Monetary amount in the company currency.
pub type Money = Decimal;

/// Quantity in boxes (stock unit). Fractional boxes are allowed.
pub type Quantity = Decimal;

/// Reject zero or negative amounts; `field` names the offending input.
pub fn ensure_positive(field: &str, value: Decimal) -> DomainResult<()> {
    if value <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} must be positive")));
    }
    Ok(())
}

pub fn ensure_non_negative(field: &str, value: Decimal) -> DomainResult<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(DomainError::validation(format!("{field} must not be negative")));
    }
    Ok(())
}

fn out_of_range(field: &str) -> DomainError {
    DomainError::validation(format!("{field} is out of range"))
}

/// `qty * unit_price` for one line.
pub fn line_sub_total(qty: Quantity, unit_price: Money) -> DomainResult<Money> {
    qty.checked_mul(unit_price)
        .ok_or_else(|| out_of_range("line total"))
}

/// Sum of `values`; `field` names the total in the overflow error.
pub fn checked_sum(
    field: &str,
    values: impl IntoIterator<Item = Decimal>,
) -> DomainResult<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(v))
        .ok_or_else(|| out_of_range(field))
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn per_unit(numerator: Money, denominator: Quantity) -> DomainResult<Money> {
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    numerator
        .checked_div(denominator)
        .ok_or_else(|| out_of_range("per-unit share"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_unit_handles_zero_denominator() {
        assert_eq!(per_unit(Decimal::from(75), Decimal::ZERO).unwrap(), Decimal::ZERO);
        assert_eq!(per_unit(Decimal::from(75), Decimal::from(15)).unwrap(), Decimal::from(5));
    }

    #[test]
    fn overflow_is_a_validation_error() {
        let big = Decimal::from(1_000_000_000_000_000i64);
        assert!(matches!(line_sub_total(big, big), Err(DomainError::Validation(_))));
        assert!(matches!(
            checked_sum("purchase total", [Decimal::MAX, Decimal::ONE]),
            Err(DomainError::Validation(msg)) if msg == "purchase total is out of range"
        ));
        assert!(matches!(
            per_unit(Decimal::MAX, Decimal::new(5, 1)),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(line_sub_total(Decimal::from(3), Decimal::from(20)).unwrap(), Decimal::from(60));
        assert_eq!(checked_sum("total", Vec::<Decimal>::new()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn positivity_checks() {
        assert!(ensure_positive("amount", Decimal::ONE).is_ok());
        assert!(ensure_positive("amount", Decimal::ZERO).is_err());
        assert!(ensure_non_negative("price", Decimal::ZERO).is_ok());
        assert!(ensure_non_negative("price", Decimal::NEGATIVE_ONE).is_err());
    }
}
