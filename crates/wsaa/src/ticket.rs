//! Access tickets, their cache key, and the login request they are issued for.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use facturador_common_identity::TenantId;
use serde::{Deserialize, Serialize};

use crate::error::{TicketError, TicketResult};

/// Longest accepted service name.
const MAX_SERVICE_LEN: usize = 64;

/// Identifies one ticket: a tenant and the web service it grants access to.
///
/// Service names are restricted to ASCII letters, digits, `_`, `-` and `.`
/// (not leading) because they end up in file names and XML.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketKey {
    tenant_id: TenantId,
    service: String,
}

impl TicketKey {
    /// Creates a key, validating the service name.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidService`] for empty, overlong or
    /// non-conforming names.
    pub fn new(tenant_id: TenantId, service: impl Into<String>) -> TicketResult<Self> {
        let service = service.into();
        if !is_valid_service(&service) {
            return Err(TicketError::invalid_service(service));
        }
        Ok(Self { tenant_id, service })
    }

    /// Returns the tenant.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Returns the service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl std::fmt::Display for TicketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tenant:{}/service:{}", self.tenant_id, self.service)
    }
}

fn is_valid_service(service: &str) -> bool {
    !service.is_empty()
        && service.len() <= MAX_SERVICE_LEN
        && !service.starts_with('.')
        && service.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// A signed credential granting a tenant access to one service.
///
/// Immutable; a refresh always produces a new ticket.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessTicket {
    key: TicketKey,
    /// Opaque token issued by the authority.
    pub token: String,
    /// Authority signature over the token.
    pub signature: String,
    /// Instant after which the authority rejects the ticket.
    pub expiration_time: DateTime<Utc>,
}

impl AccessTicket {
    /// Creates a ticket for `key`.
    #[must_use]
    pub fn new(
        key: TicketKey,
        token: impl Into<String>,
        signature: impl Into<String>,
        expiration_time: DateTime<Utc>,
    ) -> Self {
        Self { key, token: token.into(), signature: signature.into(), expiration_time }
    }

    /// Returns the ticket's key.
    #[must_use]
    pub fn key(&self) -> &TicketKey {
        &self.key
    }

    /// Returns the tenant the ticket belongs to.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.key.tenant_id
    }

    /// Returns the service the ticket grants access to.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.key.service
    }

    /// Returns how long the ticket stays usable after `now`, keeping `margin`
    /// in reserve. Zero once the margin is reached.
    #[must_use]
    pub fn usable_for(&self, now: DateTime<Utc>, margin: Duration) -> Duration {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::TimeDelta::MAX);
        self.expiration_time
            .checked_sub_signed(margin)
            .and_then(|deadline| (deadline - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// Returns `true` while `expiration_time - margin` lies after `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        !self.usable_for(now, margin).is_zero()
    }
}

impl std::fmt::Debug for AccessTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTicket")
            .field("key", &self.key)
            .field("expiration_time", &self.expiration_time)
            .finish_non_exhaustive()
    }
}

/// The durable form of a ticket: `{token, signature, expirationTime}`.
///
/// Tenant and service are implied by the record's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    /// Opaque token.
    pub token: String,
    /// Authority signature.
    pub signature: String,
    /// Expiration instant.
    pub expiration_time: DateTime<Utc>,
}

impl TicketRecord {
    /// Rebuilds the ticket for `key`.
    #[must_use]
    pub fn into_ticket(self, key: TicketKey) -> AccessTicket {
        AccessTicket::new(key, self.token, self.signature, self.expiration_time)
    }
}

impl From<&AccessTicket> for TicketRecord {
    fn from(ticket: &AccessTicket) -> Self {
        Self {
            token: ticket.token.clone(),
            signature: ticket.signature.clone(),
            expiration_time: ticket.expiration_time,
        }
    }
}

/// The login request (TRA) signed and sent to obtain a ticket.
///
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTicketRequest {
    /// Request id, taken from the generation time in epoch seconds.
    pub unique_id: u32,
    /// When the request was built.
    pub generation_time: DateTime<Utc>,
    /// Requested ticket expiration.
    pub expiration_time: DateTime<Utc>,
    /// Target service.
    pub service: String,
}

impl LoginTicketRequest {
    /// Builds a request for `key` generated at `now` asking for `lifetime`.
    #[must_use]
    pub fn new(key: &TicketKey, now: DateTime<Utc>, lifetime: Duration) -> Self {
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::TimeDelta::MAX);
        Self {
            unique_id: unique_id(now),
            generation_time: now,
            expiration_time: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            service: key.service.clone(),
        }
    }

    /// Serializes the request to the XML document that gets signed.
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<loginTicketRequest version="1.0">"#,
                "<header>",
                "<uniqueId>{}</uniqueId>",
                "<generationTime>{}</generationTime>",
                "<expirationTime>{}</expirationTime>",
                "</header>",
                "<service>{}</service>",
                "</loginTicketRequest>",
            ),
            self.unique_id,
            self.generation_time.to_rfc3339_opts(SecondsFormat::Secs, false),
            self.expiration_time.to_rfc3339_opts(SecondsFormat::Secs, false),
            quick_xml::escape::escape(self.service.as_str()),
        )
    }
}

/// Epoch seconds of `now` wrapped into the schema's 32-bit unsigned
/// `uniqueId`. Times past 2106 (or before 1970) wrap around.
fn unique_id(now: DateTime<Utc>) -> u32 {
    let wrapped = now.timestamp().rem_euclid(i64::from(u32::MAX) + 1);
    u32::try_from(wrapped).unwrap_or(u32::MAX)
}
