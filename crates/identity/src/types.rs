//! Identifier types shared by the identity and ticket crates.

use serde::{Deserialize, Serialize};

/// Tenant (business entity) whose certificate material is managed.
///
/// Wraps the raw `i64` primary key of the tenant so it cannot be confused
/// with other numeric identifiers such as tax ids.
///
/// # Examples
///
/// ```
/// use facturador_common_identity::TenantId;
///
/// let tenant = TenantId::from(7);
/// assert_eq!(i64::from(tenant), 7);
/// assert_eq!(tenant.to_string(), "7");
/// ```
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantId(pub i64);

impl From<i64> for TenantId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<TenantId> for i64 {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TenantId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}
