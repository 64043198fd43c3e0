//! `tradeerp-auth`: capability checks the core asks once per mutating operation.
//!
//! This crate is intentionally decoupled from HTTP and storage. Role evaluation
//! lives with the caller; an [`Actor`] arrives here with its permissions resolved.

pub mod actor;
pub mod authorize;
pub mod permissions;

pub use actor::Actor;
pub use authorize::{AccessPolicy, AuthzError, CompanyScopedPolicy, authorize, ensure_company_access};
pub use permissions::Permission;
