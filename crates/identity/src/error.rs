//! Identity error types and result alias.
//!
//! Every failure raised while ingesting or reading tenant certificate material
//! is mapped to one of the [`IdentityError`] variants below. Callers are
//! expected to treat [`IdentityError::NotFound`] as an ordinary outcome
//! ("no certificate configured") rather than a fault.
//!
//! # Example
//!
//! ```
//! use facturador_common_identity::{IdentityError, IdentityResult, TenantId};
//!
//! fn lookup(tenant_id: TenantId) -> IdentityResult<()> {
//!     Err(IdentityError::not_found(tenant_id))
//! }
//!
//! assert!(lookup(TenantId::from(7)).unwrap_err().is_not_found());
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::types::TenantId;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors raised by the certificate store.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// A container, certificate or key could not be decoded.
    ///
    /// Raised for corrupt PKCS#12 archives, wrong passphrases and
    /// certificates that are neither PEM nor DER.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what failed to decode.
        message: String,
        /// The underlying decoder error.
        #[source]
        source: Option<BoxError>,
    },

    /// A PKCS#12 container decoded but lacked a certificate or private key.
    #[error("Missing material: {what}")]
    MissingMaterial {
        /// Which piece of material is absent.
        what: &'static str,
    },

    /// No strategy could find an 11-digit tax id in the certificate.
    #[error("Tax id not found in certificate subject or issuer")]
    TaxIdNotFound,

    /// A caller-supplied tax id is not 11 digits.
    #[error("Invalid tax id: {value}")]
    InvalidTaxId {
        /// The rejected value.
        value: String,
    },

    /// The tenant has no persisted certificate material.
    #[error("No certificate configured for tenant {tenant_id}")]
    NotFound {
        /// Tenant that was looked up.
        tenant_id: TenantId,
    },

    /// The private key does not belong to the certificate.
    #[error("Certificate and private key do not form a pair: {message}")]
    KeyMismatch {
        /// Which pairing check failed.
        message: String,
    },

    /// Filesystem failure while reading or writing tenant material.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failed operation.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// `info.json` could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
        /// The underlying serde error.
        #[source]
        source: Option<BoxError>,
    },

    /// An OpenSSL operation other than decoding failed.
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the failed operation.
        message: String,
        /// The underlying OpenSSL error stack.
        #[source]
        source: Option<BoxError>,
    },

    /// The store configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl IdentityError {
    /// Creates a `Decode` error with a source error.
    #[must_use]
    pub fn decode(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Decode` error without a source.
    #[must_use]
    pub fn decode_message(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into(), source: None }
    }

    /// Creates a `MissingMaterial` error.
    #[must_use]
    pub fn missing_material(what: &'static str) -> Self {
        Self::MissingMaterial { what }
    }

    /// Creates an `InvalidTaxId` error.
    #[must_use]
    pub fn invalid_tax_id(value: impl Into<String>) -> Self {
        Self::InvalidTaxId { value: value.into() }
    }

    /// Creates a `NotFound` error for a tenant.
    #[must_use]
    pub fn not_found(tenant_id: TenantId) -> Self {
        Self::NotFound { tenant_id }
    }

    /// Creates a `KeyMismatch` error.
    #[must_use]
    pub fn key_mismatch(message: impl Into<String>) -> Self {
        Self::KeyMismatch { message: message.into() }
    }

    /// Creates an `Io` error with a source error.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Serialization` error with a source error.
    #[must_use]
    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a `Crypto` error with a source error.
    #[must_use]
    pub fn crypto(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Crypto { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Returns `true` when the tenant simply has no certificate.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the failure was caused by the uploaded material
    /// or caller input rather than by the host.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::MissingMaterial { .. }
                | Self::TaxIdNotFound
                | Self::InvalidTaxId { .. }
                | Self::NotFound { .. }
                | Self::KeyMismatch { .. }
        )
    }
}
