//! Scope and role authorization
//!
//! API keys carry string scopes checked at request time; organization
//! members carry a [`Role`] compared by level.

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Scope that grants everything
pub const WILDCARD_SCOPE: &str = "*";

// =============================================================================
// Scopes
// =============================================================================

/// Scopes that may be granted to a key at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "keys:read")]
    KeysRead,
    #[serde(rename = "keys:write")]
    KeysWrite,
    #[serde(rename = "keys:sign")]
    KeysSign,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "billing:read")]
    BillingRead,
    #[serde(rename = "billing:write")]
    BillingWrite,
    #[serde(rename = "webhooks:read")]
    WebhooksRead,
    #[serde(rename = "webhooks:write")]
    WebhooksWrite,
    #[serde(rename = "*")]
    All,
}

impl Scope {
    pub const ALL: [Scope; 9] = [
        Scope::KeysRead,
        Scope::KeysWrite,
        Scope::KeysSign,
        Scope::AuditRead,
        Scope::BillingRead,
        Scope::BillingWrite,
        Scope::WebhooksRead,
        Scope::WebhooksWrite,
        Scope::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeysRead => "keys:read",
            Self::KeysWrite => "keys:write",
            Self::KeysSign => "keys:sign",
            Self::AuditRead => "audit:read",
            Self::BillingRead => "billing:read",
            Self::BillingWrite => "billing:write",
            Self::WebhooksRead => "webhooks:read",
            Self::WebhooksWrite => "webhooks:write",
            Self::All => WILDCARD_SCOPE,
        }
    }
}

impl FromStr for Scope {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| AuthError::InvalidScope(s.to_string()))
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `scopes` contains `required` literally or the wildcard
pub fn has_scope<S: AsRef<str>>(scopes: &[S], required: &str) -> bool {
    scopes
        .iter()
        .any(|s| s.as_ref() == required || s.as_ref() == WILDCARD_SCOPE)
}

/// `scopes` satisfies at least one of `candidates`
///
/// An empty candidate list is never satisfied.
pub fn has_any_scope<S: AsRef<str>, C: AsRef<str>>(scopes: &[S], candidates: &[C]) -> bool {
    candidates.iter().any(|c| has_scope(scopes, c.as_ref()))
}

/// Check scopes requested at key creation
///
/// Rejects unknown scopes and empty lists; returns the list de-duplicated in
/// first-seen order.
pub fn validate_scopes<S: AsRef<str>>(scopes: &[S]) -> AuthResult<Vec<String>> {
    if scopes.is_empty() {
        return Err(AuthError::EmptyScopes);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(scopes.len());
    for raw in scopes {
        let scope: Scope = raw.as_ref().parse()?;
        if seen.insert(scope) {
            out.push(scope.as_str().to_string());
        }
    }
    Ok(out)
}

// =============================================================================
// Roles
// =============================================================================

/// Organization member role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    Owner,
}

impl Role {
    /// Numeric privilege level; higher includes lower
    pub fn level(&self) -> u8 {
        match self {
            Self::Owner => 4,
            Self::Admin => 3,
            Self::Operator => 2,
            Self::Viewer => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
        }
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level().cmp(&other.level())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            "viewer" => Ok(Self::Viewer),
            other => Err(AuthError::Internal(format!("unknown role: {}", other))),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant when `actual` is at least `required`
pub fn check_access(actual: Role, required: Role) -> AuthResult<()> {
    if actual.level() >= required.level() {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole {
            required: required.as_str(),
        })
    }
}

/// Membership lookup supplied by the organization service
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Role of `user_id` in `org_id`, or `None` if not a member
    async fn member_role(&self, org_id: Uuid, user_id: Uuid) -> AuthResult<Option<Role>>;
}

/// Look up a member's role and check it against `required`
pub async fn require_role(
    resolver: &dyn RoleResolver,
    org_id: Uuid,
    user_id: Uuid,
    required: Role,
) -> AuthResult<Role> {
    let role = resolver
        .member_role(org_id, user_id)
        .await?
        .ok_or(AuthError::NotAMember)?;

    if let Err(err) = check_access(role, required) {
        tracing::warn!(
            org_id = %org_id,
            user_id = %user_id,
            role = %role,
            required = %required,
            "Role check failed"
        );
        return Err(err);
    }

    Ok(role)
}
