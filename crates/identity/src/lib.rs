//! Per-tenant certificate and private key storage for tax authority access.
//!
//! A tenant's identity is an X.509 certificate issued by the tax authority,
//! the matching private key, and the 11-digit tax id (CUIT) the certificate
//! is bound to. [`CertificateStore`] accepts that material in three shapes and
//! normalizes it to one on-disk layout:
//!
//! | Upload | Operation | Tax id from |
//! |--------|-----------|-------------|
//! | PKCS#12 archive | [`CertificateStore::ingest_pkcs12`] | caller |
//! | Certificate + PEM key | [`CertificateStore::ingest_pem_certificate_and_key`] | certificate names |
//! | Certificate alone | [`CertificateStore::ingest_certificate_only`] | caller, else certificate names |
//!
//! Lookups are served from an in-process cache until the certificate
//! validity window closes.
//!
//! # Quick Start
//!
//! ```
//! use facturador_common_identity::{
//!     CertificateStore, CertificateStoreConfig, TenantId, testutil::TestCertificate,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = tempfile::tempdir()?;
//! let store = CertificateStore::new(CertificateStoreConfig::builder().root_dir(root.path()).build()?);
//!
//! let fixture = TestCertificate::builder().build();
//! store.ingest_pkcs12(TenantId::from(7), "30716539685", &fixture.to_pkcs12("clave"), "clave")?;
//!
//! let certificate = store.lookup(TenantId::from(7))?;
//! assert_eq!(certificate.tax_id, "30716539685");
//! assert!(store.is_currently_valid(TenantId::from(7))?);
//! # Ok(())
//! # }
//! ```
//!
//! # Tax ids
//!
//! Certificates carry the tax id in different places depending on the
//! issuer. Extraction is an explicit ordered list of [`TaxIdStrategy`] values;
//! see [`DEFAULT_TAX_ID_STRATEGIES`]. Extraction only checks the 11-digit
//! shape. [`is_valid_tax_id`] additionally checks the modulus-11 check digit.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module, which mints self-signed certificates at
//!   runtime for tests in this and dependent crates.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod certificate;
pub mod config;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod parse;
pub mod store;
pub mod tax_id;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

pub use certificate::{CertificateInfo, SourceFormat, TenantCertificate};
pub use config::{CertificateStoreConfig, MissingKeyPolicy};
pub use error::{BoxError, IdentityError, IdentityResult};
pub use keys::SigningRequestSubject;
pub use metrics::{CertificateStoreMetrics, CertificateStoreMetricsSnapshot};
pub use parse::{CERTIFICATE_PARSERS, CertificateEncoding};
pub use store::{CertificateSource, CertificateStore};
pub use tax_id::{
    CertificateNames, DEFAULT_TAX_ID_STRATEGIES, NameAttribute, TaxIdStrategy, is_valid_tax_id,
    normalize_tax_id, resolve_tax_id,
};
pub use types::TenantId;
pub use zeroize::Zeroizing;
