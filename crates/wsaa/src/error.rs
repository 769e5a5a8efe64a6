//! Ticket acquisition error types and result alias.
//!
//! Every failure of [`TicketCache::request_ticket`](crate::TicketCache::request_ticket)
//! is returned as a [`TicketError`]; nothing is retried internally. The
//! classification helpers let an HTTP layer map failures without matching
//! every variant:
//!
//! | Helper | Meaning | Typical status |
//! |--------|---------|----------------|
//! | [`TicketError::is_caller_error`] | fix the tenant setup or wait | 4xx |
//! | [`TicketError::is_transient`] | the authority or network failed | 503 |
//!
//! # Example
//!
//! ```
//! use facturador_common_wsaa::{FaultKind, TicketError};
//!
//! let err = TicketError::authority_fault(FaultKind::Expired, "cms.cert.expired", "Certificado expirado");
//! assert!(err.is_caller_error());
//! assert!(!err.is_transient());
//! assert!(err.user_message().contains("expired"));
//! ```

use std::{sync::Arc, time::Duration};

use facturador_common_identity::{IdentityError, TenantId};
use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ticket operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Why the authority refused to issue a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The certificate is not recognized: unknown issuer, not associated
    /// with the service, or issued for the other environment.
    Untrusted,
    /// The certificate is past its validity window.
    Expired,
    /// Any other fault.
    Other,
}

impl FaultKind {
    /// Lowercase name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Untrusted => "untrusted",
            Self::Expired => "expired",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while producing an access ticket.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TicketError {
    /// The tenant has no certificate; no request was sent.
    #[error("No certificate configured for tenant {tenant_id}")]
    MissingCertificate {
        /// Tenant that was asked for.
        tenant_id: TenantId,
    },

    /// The certificate store failed for a reason other than "not found".
    #[error("Cannot read signing material: {source}")]
    Certificate {
        /// The underlying store error.
        #[source]
        source: IdentityError,
    },

    /// The service name cannot be used in a request or a file name.
    #[error("Invalid service name: {service:?}")]
    InvalidService {
        /// The rejected name.
        service: String,
    },

    /// The login request could not be signed.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the failed step.
        message: String,
        /// The underlying OpenSSL error.
        #[source]
        source: Option<BoxError>,
    },

    /// Network failure, timeout, or non-success HTTP status without a fault.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
        /// The underlying client error.
        #[source]
        source: Option<BoxError>,
    },

    /// The authority answered with a SOAP fault.
    #[error("Authority fault ({kind}): {code}: {message}")]
    AuthorityFault {
        /// Classification of the fault.
        kind: FaultKind,
        /// The `faultcode` value.
        code: String,
        /// The `faultstring` value.
        message: String,
    },

    /// The authority already issued a ticket for this service to another
    /// client and will not issue a second one until it lapses.
    #[error(
        "The authority already holds a valid ticket for service {service} (tenant {tenant_id}) \
         issued to another client; it cannot be retrieved and expires on its own within 12 hours"
    )]
    AlreadyIssued {
        /// Tenant that asked.
        tenant_id: TenantId,
        /// Service that was asked for.
        service: String,
    },

    /// A successful response lacked the token, signature or expiration.
    #[error("Malformed login response: {message}")]
    MalformedResponse {
        /// What was missing or unparsable.
        message: String,
    },

    /// The durable ticket tier failed.
    #[error("Ticket storage error: {message}")]
    Storage {
        /// Description of the failed operation.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The cache configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TicketError {
    /// Creates a `MissingCertificate` error.
    #[must_use]
    pub fn missing_certificate(tenant_id: TenantId) -> Self {
        Self::MissingCertificate { tenant_id }
    }

    /// Creates an `InvalidService` error.
    #[must_use]
    pub fn invalid_service(service: impl Into<String>) -> Self {
        Self::InvalidService { service: service.into() }
    }

    /// Creates a `Signing` error with a source error.
    #[must_use]
    pub fn signing(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Signing { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Transport` error with a source error.
    #[must_use]
    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Transport` error without a source.
    #[must_use]
    pub fn transport_message(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into(), source: None }
    }

    /// Creates a `Transport` error for a request that exceeded `after`.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::transport_message(format!("no response within {after:?}"))
    }

    /// Creates an `AuthorityFault` error.
    #[must_use]
    pub fn authority_fault(
        kind: FaultKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthorityFault { kind, code: code.into(), message: message.into() }
    }

    /// Creates an `AlreadyIssued` error.
    #[must_use]
    pub fn already_issued(tenant_id: TenantId, service: impl Into<String>) -> Self {
        Self::AlreadyIssued { tenant_id, service: service.into() }
    }

    /// Creates a `MalformedResponse` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Creates a `Storage` error with a source error.
    #[must_use]
    pub fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Storage` error without a source.
    #[must_use]
    pub fn storage_message(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(), source: None }
    }

    /// Returns the fault classification for `AuthorityFault` errors.
    #[must_use]
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::AuthorityFault { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` when the tenant's setup (or timing) must change before
    /// a retry can succeed.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        match self {
            Self::MissingCertificate { .. }
            | Self::InvalidService { .. }
            | Self::AlreadyIssued { .. } => true,
            Self::Certificate { source } => source.is_caller_error(),
            Self::AuthorityFault { kind, .. } => *kind != FaultKind::Other,
            _ => false,
        }
    }

    /// Returns `true` for failures where retrying later may succeed unchanged.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns a message suitable for showing to the tenant.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingCertificate { .. } => {
                "No certificate is configured for this company. Upload one before invoicing."
                    .to_owned()
            },
            Self::AuthorityFault { kind: FaultKind::Untrusted, .. } => {
                "The tax authority does not recognize the certificate. Check that it was issued \
                 for this environment (homologation or production) and that it is associated \
                 with the requested web service."
                    .to_owned()
            },
            Self::AuthorityFault { kind: FaultKind::Expired, .. } => {
                "The certificate has expired. Generate a new one and upload it.".to_owned()
            },
            Self::AuthorityFault { kind: FaultKind::Other, message, .. } => {
                format!("The tax authority rejected the login request: {message}")
            },
            Self::AlreadyIssued { .. } => {
                "The tax authority already issued an access ticket for this service to another \
                 client. That ticket cannot be reused here and expires on its own within 12 \
                 hours; try again after it lapses."
                    .to_owned()
            },
            Self::Transport { .. } => {
                "The tax authority is temporarily unavailable. Try again in a few minutes."
                    .to_owned()
            },
            other => other.to_string(),
        }
    }
}

impl From<IdentityError> for TicketError {
    fn from(source: IdentityError) -> Self {
        match source {
            IdentityError::NotFound { tenant_id } => Self::MissingCertificate { tenant_id },
            source => Self::Certificate { source },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error;

    use rstest::rstest;

    use super::*;

    #[test]
    fn test_already_issued_mentions_foreign_ticket_lifetime() {
        let err = TicketError::already_issued(TenantId::from(7), "wsfe");
        let message = err.to_string();
        assert!(message.contains("wsfe"), "{message}");
        assert!(message.contains("12 hours"), "{message}");
        assert!(err.user_message().contains("12 hours"));
    }

    #[rstest]
    #[case::untrusted(FaultKind::Untrusted, true)]
    #[case::expired(FaultKind::Expired, true)]
    #[case::other(FaultKind::Other, false)]
    fn test_fault_classification(#[case] kind: FaultKind, #[case] caller: bool) {
        let err = TicketError::authority_fault(kind, "code", "message");
        assert_eq!(err.is_caller_error(), caller);
        assert!(!err.is_transient());
        assert_eq!(err.fault_kind(), Some(kind));
    }

    #[test]
    fn test_user_messages_differ_per_fault_kind() {
        let untrusted = TicketError::authority_fault(FaultKind::Untrusted, "c", "m").user_message();
        let expired = TicketError::authority_fault(FaultKind::Expired, "c", "m").user_message();
        let other = TicketError::authority_fault(FaultKind::Other, "c", "m").user_message();
        assert_ne!(untrusted, expired);
        assert_ne!(expired, other);
        assert!(untrusted.contains("environment"));
    }

    #[test]
    fn test_not_found_converts_to_missing_certificate() {
        let err = TicketError::from(IdentityError::not_found(TenantId::from(3)));
        assert!(matches!(err, TicketError::MissingCertificate { tenant_id } if tenant_id == TenantId::from(3)));
    }

    #[test]
    fn test_other_identity_errors_keep_source() {
        let io = std::io::Error::other("disk gone");
        let err = TicketError::from(IdentityError::io("read cert.pem", io));
        assert!(matches!(err, TicketError::Certificate { .. }));
        assert!(err.source().is_some());
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_transport_is_transient() {
        let err = TicketError::timeout(Duration::from_secs(30));
        assert!(err.is_transient());
        assert!(err.to_string().contains("30s"), "{err}");
    }
}
