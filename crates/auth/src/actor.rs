use serde::{Deserialize, Serialize};

use tradeerp_core::{CompanyId, UserId};

use crate::Permission;

/// The user on whose behalf a core operation runs.
///
/// System actors operate across companies; everyone else is pinned to the
/// company they are signed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub company_id: Option<CompanyId>,
    pub is_system: bool,
    pub permissions: Vec<Permission>,
}

impl Actor {
    /// A company user holding the given permissions.
    pub fn company_user(
        user_id: UserId,
        company_id: CompanyId,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            user_id,
            company_id: Some(company_id),
            is_system: false,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// A cross-company operator with every permission.
    pub fn system(user_id: UserId) -> Self {
        Self {
            user_id,
            company_id: None,
            is_system: true,
            permissions: vec![Permission::WILDCARD],
        }
    }

    pub fn has_permission(&self, required: &Permission) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_wildcard() || p == required)
    }
}
