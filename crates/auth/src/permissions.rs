use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "purchases.approve").
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const PURCHASES_APPROVE: Permission = Permission::from_static("purchases.approve");
    pub const PROVISIONAL_SALES_WRITE: Permission =
        Permission::from_static("provisional_sales.write");
    pub const PROVISIONAL_SALES_CONVERT: Permission =
        Permission::from_static("provisional_sales.convert");
    pub const SUPPLIER_LEDGER_WRITE: Permission = Permission::from_static("suppliers.ledger.write");
    pub const SUPPLIER_PAYMENTS_WRITE: Permission =
        Permission::from_static("suppliers.payments.write");
    pub const STOCK_ADJUST: Permission = Permission::from_static("inventory.stock.adjust");

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
