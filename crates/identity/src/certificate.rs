//! Tenant certificate material and its persisted metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::types::TenantId;

/// How the tenant's material was uploaded.
///
/// Persisted as `ingestMethod` in `info.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// A PKCS#12 (`.p12` / `.pfx`) archive holding certificate and key.
    Pkcs12,
    /// A certificate (PEM or DER) together with a PEM private key.
    PemPair,
    /// A certificate alone; the key already on disk (or a generated one) is used.
    CertificateOnly,
}

impl SourceFormat {
    /// Returns `true` for the paths that regenerate `cert.pfx`.
    #[must_use]
    pub fn writes_bundle(self) -> bool {
        matches!(self, Self::PemPair | Self::CertificateOnly)
    }
}

/// Metadata persisted next to the tenant's PEM files as `info.json`.
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// 11-digit tax id of the tenant.
    #[builder(into)]
    pub tax_id: String,
    /// Start of the certificate validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the certificate validity window.
    pub valid_to: DateTime<Utc>,
    /// Passphrase protecting `cert.pfx` (and the uploaded archive).
    #[serde(default)]
    pub passphrase: Option<Zeroizing<String>>,
    /// When the material was ingested.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    /// Ingestion path that produced the material.
    pub ingest_method: SourceFormat,
    /// Whether `key.pem` was minted during certificate-only ingestion and so
    /// does not match the certificate.
    #[serde(default)]
    #[builder(default)]
    pub key_generated: bool,
}

impl std::fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("tax_id", &self.tax_id)
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("created_at", &self.created_at)
            .field("ingest_method", &self.ingest_method)
            .field("key_generated", &self.key_generated)
            .finish()
    }
}

/// A tenant's identity material: certificate, private key and metadata.
///
/// The certificate and key are a verified pair at ingestion time. The value
/// is immutable; re-ingestion replaces it wholesale.
#[derive(Clone, PartialEq)]
pub struct TenantCertificate {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// 11-digit tax id bound to the certificate.
    pub tax_id: String,
    /// Certificate in PEM.
    pub certificate_pem: String,
    /// Unencrypted PKCS#8 private key in PEM, scrubbed on drop.
    pub private_key_pem: Zeroizing<String>,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window.
    pub valid_to: DateTime<Utc>,
    /// Ingestion path.
    pub source_format: SourceFormat,
}

impl TenantCertificate {
    /// Returns `true` when `now` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_to
    }

    /// Returns `true` when the certificate has not reached `valid_to` yet.
    #[must_use]
    pub fn is_unexpired_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_to
    }
}

impl std::fmt::Debug for TenantCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantCertificate")
            .field("tenant_id", &self.tenant_id)
            .field("tax_id", &self.tax_id)
            .field("valid_from", &self.valid_from)
            .field("valid_to", &self.valid_to)
            .field("source_format", &self.source_format)
            .finish_non_exhaustive()
    }
}
