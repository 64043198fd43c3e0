use thiserror::Error;

use tradeerp_core::CompanyId;

use crate::{Actor, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("company mismatch: actor cannot act on company {0}")]
    CompanyMismatch(CompanyId),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Check that the actor holds `required`.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    if actor.has_permission(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Check that the actor may touch data owned by `company_id`.
///
/// System actors pass unconditionally.
pub fn ensure_company_access(actor: &Actor, company_id: CompanyId) -> Result<(), AuthzError> {
    if actor.is_system || actor.company_id == Some(company_id) {
        Ok(())
    } else {
        Err(AuthzError::CompanyMismatch(company_id))
    }
}

/// Capability interface consulted once per mutating core operation.
pub trait AccessPolicy: Send + Sync {
    /// Permission-only check, for data that is not owned by a single company.
    fn check_permission(&self, actor: &Actor, required: &Permission) -> Result<(), AuthzError>;

    /// Permission check followed by company ownership.
    fn check_company(
        &self,
        actor: &Actor,
        required: &Permission,
        company_id: CompanyId,
    ) -> Result<(), AuthzError> {
        self.check_permission(actor, required)?;
        ensure_company_access(actor, company_id)
    }
}

/// Default policy: the actor's resolved permissions plus company ownership.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompanyScopedPolicy;

impl AccessPolicy for CompanyScopedPolicy {
    fn check_permission(&self, actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
        authorize(actor, required).inspect_err(|err| {
            tracing::debug!(
                user_id = %actor.user_id,
                permission = %required,
                error = %err,
                "access denied"
            );
        })
    }

    fn check_company(
        &self,
        actor: &Actor,
        required: &Permission,
        company_id: CompanyId,
    ) -> Result<(), AuthzError> {
        self.check_permission(actor, required)?;
        ensure_company_access(actor, company_id).inspect_err(|err| {
            tracing::debug!(
                user_id = %actor.user_id,
                company_id = %company_id,
                error = %err,
                "company access denied"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradeerp_core::UserId;

    #[test]
    fn wildcard_grants_any_permission() {
        let actor = Actor::system(UserId::new());
        assert!(authorize(&actor, &Permission::PURCHASES_APPROVE).is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let actor = Actor::company_user(
            UserId::new(),
            CompanyId::new(),
            [Permission::PROVISIONAL_SALES_WRITE],
        );
        let err = authorize(&actor, &Permission::PURCHASES_APPROVE).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("purchases.approve".to_string()));
    }

    #[test]
    fn company_user_cannot_touch_other_company() {
        let own = CompanyId::new();
        let other = CompanyId::new();
        let actor = Actor::company_user(UserId::new(), own, [Permission::WILDCARD]);

        assert!(ensure_company_access(&actor, own).is_ok());
        assert_eq!(
            ensure_company_access(&actor, other),
            Err(AuthzError::CompanyMismatch(other))
        );
    }

    #[test]
    fn system_actor_crosses_companies() {
        let actor = Actor::system(UserId::new());
        assert!(
            CompanyScopedPolicy
                .check_company(&actor, &Permission::STOCK_ADJUST, CompanyId::new())
                .is_ok()
        );
    }

    #[test]
    fn policy_checks_permission_before_company() {
        let company = CompanyId::new();
        let actor = Actor::company_user(UserId::new(), CompanyId::new(), []);
        let err = CompanyScopedPolicy
            .check_company(&actor, &Permission::STOCK_ADJUST, company)
            .unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden(_)));
    }
}
