//! Configuration for [`CertificateStore`](crate::CertificateStore).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

/// Default RSA size for locally generated keys.
pub const DEFAULT_GENERATED_KEY_BITS: u32 = 2048;

/// Smallest RSA size accepted for generated keys.
const MIN_GENERATED_KEY_BITS: u32 = 2048;

/// Default number of tenants kept in the in-process cache.
pub const DEFAULT_CERTIFICATE_CACHE_CAPACITY: u64 = 10_000;

/// Default friendly name embedded in regenerated PKCS#12 bundles.
pub const DEFAULT_BUNDLE_FRIENDLY_NAME: &str = "facturador";

/// What certificate-only ingestion does when the tenant has no key on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Generate and persist a fresh key. The resulting pair was never
    /// jointly issued by the authority and will be rejected at login.
    #[default]
    Generate,
    /// Fail with [`IdentityError::MissingMaterial`].
    Reject,
}

/// Configuration for the on-disk certificate store.
///
/// # Example
///
/// ```
/// use facturador_common_identity::{CertificateStoreConfig, MissingKeyPolicy};
///
/// let config = CertificateStoreConfig::builder()
///     .root_dir("/var/lib/facturador/certs")
///     .missing_key_policy(MissingKeyPolicy::Reject)
///     .build()?;
/// assert_eq!(config.generated_key_bits(), 2048);
/// # Ok::<(), facturador_common_identity::IdentityError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateStoreConfig {
    /// Directory holding one subdirectory per tenant.
    pub(crate) root_dir: PathBuf,

    /// Behavior of certificate-only ingestion without a key on disk.
    #[serde(default)]
    pub(crate) missing_key_policy: MissingKeyPolicy,

    /// RSA size for generated keys.
    #[serde(default = "default_generated_key_bits")]
    pub(crate) generated_key_bits: u32,

    /// Maximum tenants held in the in-process cache.
    #[serde(default = "default_cache_capacity")]
    pub(crate) cache_capacity: u64,

    /// Friendly name written into regenerated PKCS#12 bundles.
    #[serde(default = "default_bundle_friendly_name")]
    pub(crate) bundle_friendly_name: String,
}

fn default_generated_key_bits() -> u32 {
    DEFAULT_GENERATED_KEY_BITS
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CERTIFICATE_CACHE_CAPACITY
}

fn default_bundle_friendly_name() -> String {
    DEFAULT_BUNDLE_FRIENDLY_NAME.to_owned()
}

#[bon::bon]
impl CertificateStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Config`] if the root directory is empty or the
    /// generated key size is below 2048 bits.
    #[builder]
    pub fn new(
        #[builder(into)] root_dir: PathBuf,
        #[builder(default)] missing_key_policy: MissingKeyPolicy,
        #[builder(default = DEFAULT_GENERATED_KEY_BITS)] generated_key_bits: u32,
        #[builder(default = DEFAULT_CERTIFICATE_CACHE_CAPACITY)] cache_capacity: u64,
        #[builder(into, default = DEFAULT_BUNDLE_FRIENDLY_NAME.to_owned())]
        bundle_friendly_name: String,
    ) -> IdentityResult<Self> {
        let config = Self {
            root_dir,
            missing_key_policy,
            generated_key_bits,
            cache_capacity,
            bundle_friendly_name,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants enforced by [`new`](Self::new).
    ///
    /// Needed for configurations produced by deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Config`] on the first violated invariant.
    pub fn validate(&self) -> IdentityResult<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(IdentityError::Config("root_dir cannot be empty".into()));
        }
        if self.generated_key_bits < MIN_GENERATED_KEY_BITS {
            return Err(IdentityError::Config(format!(
                "generated_key_bits must be at least {MIN_GENERATED_KEY_BITS}, got {}",
                self.generated_key_bits
            )));
        }
        Ok(())
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Returns the missing-key policy.
    #[must_use]
    pub fn missing_key_policy(&self) -> MissingKeyPolicy {
        self.missing_key_policy
    }

    /// Returns the RSA size for generated keys.
    #[must_use]
    pub fn generated_key_bits(&self) -> u32 {
        self.generated_key_bits
    }

    /// Returns the cache capacity.
    #[must_use]
    pub fn cache_capacity(&self) -> u64 {
        self.cache_capacity
    }

    /// Returns the PKCS#12 friendly name.
    #[must_use]
    pub fn bundle_friendly_name(&self) -> &str {
        &self.bundle_friendly_name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CertificateStoreConfig::builder().root_dir("/tmp/certs").build().unwrap();
        assert_eq!(config.missing_key_policy(), MissingKeyPolicy::Generate);
        assert_eq!(config.generated_key_bits(), DEFAULT_GENERATED_KEY_BITS);
        assert_eq!(config.cache_capacity(), DEFAULT_CERTIFICATE_CACHE_CAPACITY);
        assert_eq!(config.bundle_friendly_name(), DEFAULT_BUNDLE_FRIENDLY_NAME);
    }

    #[test]
    fn test_empty_root_rejected() {
        let err = CertificateStoreConfig::builder().root_dir("").build().unwrap_err();
        assert!(err.to_string().contains("root_dir"), "{err}");
    }

    #[test]
    fn test_weak_key_rejected() {
        let err = CertificateStoreConfig::builder()
            .root_dir("/tmp/certs")
            .generated_key_bits(1024)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("generated_key_bits"), "{err}");
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let json = r#"{ "root_dir": "/srv/certs", "missing_key_policy": "reject" }"#;
        let config: CertificateStoreConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.missing_key_policy(), MissingKeyPolicy::Reject);
        assert_eq!(config.generated_key_bits(), DEFAULT_GENERATED_KEY_BITS);
    }
}
