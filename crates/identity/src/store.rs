//! On-disk certificate store with an in-process cache.
//!
//! Every tenant owns one directory under the configured root:
//!
//! ```text
//! <root>/<tenant id>/
//!     cert.pem    certificate
//!     key.pem     unencrypted PKCS#8 private key
//!     cert.pfx    regenerated PKCS#12 bundle (certificate-file uploads only)
//!     info.json   tax id, validity window, passphrase, provenance
//! ```
//!
//! Ingestion validates everything (decoding, tax id, key pairing) before the
//! first byte is written. Files are written to a temporary file in the tenant
//! directory and renamed into place, `info.json` last. Writes for one tenant
//! are serialized behind a per-tenant lock whose read side guards lookups, so
//! a lookup never observes a half-replaced directory.
//!
//! # Example
//!
//! ```no_run
//! use facturador_common_identity::{CertificateStore, CertificateStoreConfig, TenantId};
//!
//! # fn example(archive: &[u8]) -> facturador_common_identity::IdentityResult<()> {
//! let store = CertificateStore::new(
//!     CertificateStoreConfig::builder().root_dir("/var/lib/facturador/certs").build()?,
//! );
//! store.ingest_pkcs12(TenantId::from(7), "30716539685", archive, "clave")?;
//! let certificate = store.lookup(TenantId::from(7))?;
//! assert_eq!(certificate.tax_id, "30716539685");
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use moka::sync::Cache;
use openssl::{
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    x509::X509,
};
use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::{
    certificate::{CertificateInfo, SourceFormat, TenantCertificate},
    config::{CertificateStoreConfig, MissingKeyPolicy},
    error::{IdentityError, IdentityResult},
    keys::{
        SigningRequestSubject, build_pkcs12, build_signing_request, generate_private_key,
        private_key_pem, verify_key_pair,
    },
    metrics::{CertificateStoreMetrics, CertificateStoreMetricsSnapshot},
    parse::{certificate_names, parse_certificate, parse_private_key, validity_window},
    tax_id::{DEFAULT_TAX_ID_STRATEGIES, is_tax_id_shaped, is_valid_tax_id, normalize_tax_id, resolve_tax_id},
    types::TenantId,
};

/// Certificate file name inside a tenant directory.
pub const CERTIFICATE_FILE: &str = "cert.pem";

/// Private key file name inside a tenant directory.
pub const KEY_FILE: &str = "key.pem";

/// Regenerated PKCS#12 bundle file name inside a tenant directory.
pub const BUNDLE_FILE: &str = "cert.pfx";

/// Metadata file name inside a tenant directory.
pub const INFO_FILE: &str = "info.json";

/// Read access to tenant signing material.
///
/// This is the contract the ticket layer consumes: "no certificate
/// configured" is `Ok(None)`, not an error.
pub trait CertificateSource: Send + Sync {
    /// Returns the tenant's certificate and key, or `None` when the tenant
    /// has none configured.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when stored material cannot be read.
    fn signing_material(&self, tenant_id: TenantId) -> IdentityResult<Option<Arc<TenantCertificate>>>;
}

/// Expires cached entries when the certificate validity window ends.
struct ValidityExpiry;

impl moka::Expiry<TenantId, Arc<TenantCertificate>> for ValidityExpiry {
    fn expire_after_create(
        &self,
        _key: &TenantId,
        value: &Arc<TenantCertificate>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(remaining_validity(value))
    }

    fn expire_after_update(
        &self,
        _key: &TenantId,
        value: &Arc<TenantCertificate>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(remaining_validity(value))
    }
}

fn remaining_validity(certificate: &TenantCertificate) -> Duration {
    (certificate.valid_to - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

type LockRegistry = Mutex<HashMap<TenantId, Arc<RwLock<()>>>>;

/// Handle on one tenant's lock.
///
/// Dropping the last handle removes the tenant from the registry.
struct TenantLock<'a> {
    registry: &'a LockRegistry,
    tenant_id: TenantId,
    lock: Arc<RwLock<()>>,
}

impl Drop for TenantLock<'_> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        // One reference in the registry, one here: nobody else holds it.
        if Arc::strong_count(&self.lock) == 2 {
            registry.remove(&self.tenant_id);
        }
    }
}

/// Validated material ready to be written.
struct Material {
    tax_id: String,
    certificate: X509,
    private_key: PKey<Private>,
    passphrase: Option<Zeroizing<String>>,
    source_format: SourceFormat,
    key_generated: bool,
}

/// Per-tenant certificate and private key storage.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct CertificateStore {
    config: CertificateStoreConfig,
    cache: Cache<TenantId, Arc<TenantCertificate>>,
    tenant_locks: LockRegistry,
    metrics: CertificateStoreMetrics,
}

impl CertificateStore {
    /// Creates a store rooted at `config.root_dir()`.
    ///
    /// The root directory is created lazily on first ingestion.
    #[must_use]
    pub fn new(config: CertificateStoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity())
            .expire_after(ValidityExpiry)
            .build();
        Self {
            config,
            cache,
            tenant_locks: Mutex::new(HashMap::new()),
            metrics: CertificateStoreMetrics::new(),
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &CertificateStoreConfig {
        &self.config
    }

    /// Returns the directory holding `tenant_id`'s material.
    #[must_use]
    pub fn tenant_dir(&self, tenant_id: TenantId) -> PathBuf {
        self.config.root_dir().join(tenant_id.to_string())
    }

    /// Ingests a PKCS#12 archive holding the tenant's certificate and key.
    ///
    /// The caller supplies the tax id; it must be 11 digits after
    /// [normalization](crate::normalize_tax_id). A stale `cert.pfx` from an
    /// earlier certificate-file upload is deleted.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::InvalidTaxId`] if `tax_id` is not 11 digits
    /// - [`IdentityError::Decode`] for a corrupt archive or wrong passphrase
    /// - [`IdentityError::MissingMaterial`] if the certificate or key bag is absent
    /// - [`IdentityError::KeyMismatch`] if the key does not belong to the certificate
    /// - [`IdentityError::Io`] if the tenant directory cannot be written
    #[tracing::instrument(skip(self, archive, passphrase), fields(archive_len = archive.len()))]
    pub fn ingest_pkcs12(
        &self,
        tenant_id: TenantId,
        tax_id: &str,
        archive: &[u8],
        passphrase: &str,
    ) -> IdentityResult<TenantCertificate> {
        self.ingest(tenant_id, SourceFormat::Pkcs12, |_| {
            let tax_id = shaped_tax_id(tax_id)?;
            let parsed = Pkcs12::from_der(archive)
                .map_err(|error| IdentityError::decode("archive is not a PKCS#12 container", error))?
                .parse2(passphrase)
                .map_err(|error| {
                    IdentityError::decode("cannot open PKCS#12 archive (wrong passphrase?)", error)
                })?;
            let certificate = parsed.cert.ok_or(IdentityError::missing_material("certificate"))?;
            let private_key = parsed.pkey.ok_or(IdentityError::missing_material("private key"))?;
            verify_key_pair(&certificate, &private_key)?;

            Ok(Material {
                tax_id,
                certificate,
                private_key,
                passphrase: Some(Zeroizing::new(passphrase.to_owned())),
                source_format: SourceFormat::Pkcs12,
                key_generated: false,
            })
        })
    }

    /// Ingests a certificate (PEM or DER) together with its PEM private key.
    ///
    /// The tax id is resolved from the certificate names with
    /// [`DEFAULT_TAX_ID_STRATEGIES`]. `passphrase` decrypts an encrypted key
    /// and protects the regenerated `cert.pfx`.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Decode`] if the certificate or key cannot be read
    /// - [`IdentityError::TaxIdNotFound`] if no strategy finds a tax id
    /// - [`IdentityError::KeyMismatch`] if the key does not belong to the certificate
    /// - [`IdentityError::Io`] if the tenant directory cannot be written
    #[tracing::instrument(skip(self, certificate, private_key, passphrase))]
    pub fn ingest_pem_certificate_and_key(
        &self,
        tenant_id: TenantId,
        certificate: &[u8],
        private_key: &[u8],
        passphrase: Option<&str>,
    ) -> IdentityResult<TenantCertificate> {
        self.ingest(tenant_id, SourceFormat::PemPair, |_| {
            let (certificate, encoding) = parse_certificate(certificate)?;
            tracing::debug!(encoding = encoding.as_str(), "certificate decoded");
            let private_key = parse_private_key(private_key, passphrase)?;
            let tax_id = resolved_tax_id(&certificate)?;
            verify_key_pair(&certificate, &private_key)?;

            Ok(Material {
                tax_id,
                certificate,
                private_key,
                passphrase: passphrase.map(|p| Zeroizing::new(p.to_owned())),
                source_format: SourceFormat::PemPair,
                key_generated: false,
            })
        })
    }

    /// Ingests a certificate alone, pairing it with the key already on disk.
    ///
    /// An `explicit_tax_id` takes precedence over the certificate names and
    /// must be 11 digits. When the tenant has no key on disk the
    /// [`MissingKeyPolicy`] decides: `Generate` mints a fresh RSA key (the
    /// resulting pair was never issued together and the authority will refuse
    /// it), `Reject` fails.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Decode`] if the certificate cannot be read
    /// - [`IdentityError::InvalidTaxId`] if `explicit_tax_id` is not 11 digits
    /// - [`IdentityError::TaxIdNotFound`] if no tax id is given or found
    /// - [`IdentityError::KeyMismatch`] if the key on disk belongs to another certificate
    /// - [`IdentityError::MissingMaterial`] if no key exists and the policy is `Reject`
    /// - [`IdentityError::Io`] if the tenant directory cannot be written
    #[tracing::instrument(skip(self, certificate, passphrase))]
    pub fn ingest_certificate_only(
        &self,
        tenant_id: TenantId,
        certificate: &[u8],
        passphrase: Option<&str>,
        explicit_tax_id: Option<&str>,
    ) -> IdentityResult<TenantCertificate> {
        self.ingest(tenant_id, SourceFormat::CertificateOnly, |dir| {
            let (certificate, encoding) = parse_certificate(certificate)?;
            tracing::debug!(encoding = encoding.as_str(), "certificate decoded");
            let tax_id = match explicit_tax_id {
                Some(explicit) => shaped_tax_id(explicit)?,
                None => resolved_tax_id(&certificate)?,
            };

            let (private_key, key_generated) = match read_optional(&dir.join(KEY_FILE))? {
                Some(existing) => {
                    let key = parse_private_key(existing.as_bytes(), None)?;
                    verify_key_pair(&certificate, &key)?;
                    (key, false)
                },
                None => match self.config.missing_key_policy() {
                    MissingKeyPolicy::Reject => {
                        return Err(IdentityError::missing_material("private key"));
                    },
                    MissingKeyPolicy::Generate => {
                        tracing::warn!(
                            tenant_id = %tenant_id,
                            "no private key on disk; generating one that does not match the certificate"
                        );
                        self.metrics.record_generated_key();
                        (generate_private_key(self.config.generated_key_bits())?, true)
                    },
                },
            };

            Ok(Material {
                tax_id,
                certificate,
                private_key,
                passphrase: passphrase.map(|p| Zeroizing::new(p.to_owned())),
                source_format: SourceFormat::CertificateOnly,
                key_generated,
            })
        })
    }

    /// Returns the tenant's material, from cache while its validity window is
    /// open, otherwise from disk.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NotFound`] if any of `cert.pem`, `key.pem` or
    ///   `info.json` is missing
    /// - [`IdentityError::Serialization`] if `info.json` is corrupt
    /// - [`IdentityError::Io`] on other read failures
    #[tracing::instrument(skip(self))]
    pub fn lookup(&self, tenant_id: TenantId) -> IdentityResult<Arc<TenantCertificate>> {
        if let Some(certificate) = self.cache.get(&tenant_id)
            && certificate.is_unexpired_at(Utc::now())
        {
            tracing::debug!(cache = "L1", "cache hit");
            self.metrics.record_cache_hit();
            return Ok(certificate);
        }
        tracing::debug!(cache = "L1", "cache miss");

        self.metrics.record_disk_read();
        if !self.tenant_dir(tenant_id).is_dir() {
            return Err(IdentityError::not_found(tenant_id));
        }
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock.read();
        let certificate = Arc::new(self.read_tenant(tenant_id)?);
        self.cache.insert(tenant_id, Arc::clone(&certificate));
        tracing::debug!(cache = "disk", "loaded tenant material");
        Ok(certificate)
    }

    /// Returns `true` when the tenant has a certificate whose `validTo` lies
    /// in the future. A tenant without material is simply not valid.
    ///
    /// # Errors
    ///
    /// Propagates [`lookup`](Self::lookup) failures other than `NotFound`.
    pub fn is_currently_valid(&self, tenant_id: TenantId) -> IdentityResult<bool> {
        match self.lookup(tenant_id) {
            Ok(certificate) => Ok(certificate.is_unexpired_at(Utc::now())),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Deletes the tenant directory and its cache entry.
    ///
    /// Returns `false` when there was nothing to delete. An audit event is
    /// emitted at INFO level.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Io`] if the directory cannot be removed.
    #[tracing::instrument(skip(self))]
    pub fn remove(&self, tenant_id: TenantId) -> IdentityResult<bool> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock.write();
        let dir = self.tenant_dir(tenant_id);
        let existed = match fs::remove_dir_all(&dir) {
            Ok(()) => true,
            Err(error) if error.kind() == io::ErrorKind::NotFound => false,
            Err(error) => {
                return Err(IdentityError::io(format!("remove {}", dir.display()), error));
            },
        };
        self.cache.invalidate(&tenant_id);
        tracing::info!(
            audit.action = "remove_certificate",
            audit.resource = %format_args!("tenant:{tenant_id}"),
            audit.result = "success",
            audit.existed = existed,
            "audit_event"
        );
        Ok(existed)
    }

    /// Builds a PKCS#10 signing request for the tenant, to be submitted to the
    /// authority's certificate portal.
    ///
    /// The tenant's key on disk is reused; when there is none a fresh key is
    /// generated and saved as `key.pem`, so the certificate the authority
    /// issues can later be ingested with
    /// [`ingest_certificate_only`](Self::ingest_certificate_only).
    ///
    /// # Errors
    ///
    /// - [`IdentityError::InvalidTaxId`] if the tax id fails the check digit
    /// - [`IdentityError::Decode`] if the key on disk is unreadable
    /// - [`IdentityError::Crypto`] if key or request generation fails
    /// - [`IdentityError::Io`] if the key cannot be saved
    #[tracing::instrument(skip(self, subject), fields(tax_id = %subject.tax_id))]
    pub fn generate_signing_request(
        &self,
        tenant_id: TenantId,
        subject: &SigningRequestSubject,
    ) -> IdentityResult<String> {
        let tax_id = normalize_tax_id(&subject.tax_id);
        if !is_valid_tax_id(&tax_id) {
            return Err(IdentityError::invalid_tax_id(subject.tax_id.clone()));
        }
        let subject = SigningRequestSubject { tax_id, ..subject.clone() };

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock.write();
        let dir = self.tenant_dir(tenant_id);
        let key = match read_optional(&dir.join(KEY_FILE))? {
            Some(existing) => parse_private_key(existing.as_bytes(), None)?,
            None => {
                let key = generate_private_key(self.config.generated_key_bits())?;
                let pem = private_key_pem(&key)?;
                create_tenant_dir(&dir)?;
                write_atomic(&dir, KEY_FILE, pem.as_bytes())?;
                self.metrics.record_generated_key();
                tracing::info!(tenant_id = %tenant_id, "generated private key for signing request");
                key
            },
        };
        let request = build_signing_request(&key, &subject)?;
        tracing::info!(
            audit.action = "generate_signing_request",
            audit.resource = %format_args!("tenant:{tenant_id}"),
            audit.result = "success",
            "audit_event"
        );
        Ok(request)
    }

    /// Returns a snapshot of the store counters.
    #[must_use]
    pub fn metrics(&self) -> CertificateStoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drops every cached entry; the next lookups read from disk.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    fn tenant_lock(&self, tenant_id: TenantId) -> TenantLock<'_> {
        let lock = Arc::clone(self.tenant_locks.lock().entry(tenant_id).or_default());
        TenantLock { registry: &self.tenant_locks, tenant_id, lock }
    }

    /// Runs `prepare` and writes its result under the tenant write lock.
    fn ingest(
        &self,
        tenant_id: TenantId,
        source_format: SourceFormat,
        prepare: impl FnOnce(&Path) -> IdentityResult<Material>,
    ) -> IdentityResult<TenantCertificate> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock.write();
        let dir = self.tenant_dir(tenant_id);

        let result = match prepare(&dir) {
            Ok(material) => {
                let result = self.persist(tenant_id, &dir, material);
                self.cache.invalidate(&tenant_id);
                result
            },
            Err(error) => {
                if error.is_caller_error() {
                    self.metrics.record_rejected_ingest();
                }
                Err(error)
            },
        };

        match &result {
            Ok(certificate) => {
                self.metrics.record_ingest();
                tracing::info!(
                    audit.action = "ingest_certificate",
                    audit.resource = %format_args!("tenant:{tenant_id}"),
                    audit.result = "success",
                    audit.method = ?source_format,
                    tax_id = %certificate.tax_id,
                    valid_to = %certificate.valid_to,
                    "audit_event"
                );
            },
            Err(error) => {
                tracing::warn!(
                    audit.action = "ingest_certificate",
                    audit.resource = %format_args!("tenant:{tenant_id}"),
                    audit.result = "failure",
                    audit.method = ?source_format,
                    error = %error,
                    "audit_event"
                );
            },
        }
        result
    }

    fn persist(
        &self,
        tenant_id: TenantId,
        dir: &Path,
        material: Material,
    ) -> IdentityResult<TenantCertificate> {
        let (valid_from, valid_to) = validity_window(&material.certificate)?;
        let certificate_pem = String::from_utf8(
            material
                .certificate
                .to_pem()
                .map_err(|error| IdentityError::crypto("encode certificate", error))?,
        )
        .map_err(|_| IdentityError::decode_message("certificate PEM is not UTF-8"))?;
        let key_pem = private_key_pem(&material.private_key)?;

        // A generated key does not match the certificate; OpenSSL refuses to
        // bundle such a pair.
        let bundle = if material.source_format.writes_bundle() && !material.key_generated {
            let passphrase = material.passphrase.as_deref().map_or("", String::as_str);
            Some(build_pkcs12(
                &material.certificate,
                &material.private_key,
                self.config.bundle_friendly_name(),
                passphrase,
            )?)
        } else {
            None
        };

        let info = CertificateInfo::builder()
            .tax_id(material.tax_id.clone())
            .valid_from(valid_from)
            .valid_to(valid_to)
            .maybe_passphrase(material.passphrase)
            .ingest_method(material.source_format)
            .key_generated(material.key_generated)
            .build();
        let info_json = serde_json::to_vec_pretty(&info)
            .map_err(|error| IdentityError::serialization(format!("encode {INFO_FILE}"), error))?;

        create_tenant_dir(dir)?;
        write_atomic(dir, CERTIFICATE_FILE, certificate_pem.as_bytes())?;
        write_atomic(dir, KEY_FILE, key_pem.as_bytes())?;
        match bundle {
            Some(bundle) => write_atomic(dir, BUNDLE_FILE, &bundle)?,
            None => remove_if_exists(&dir.join(BUNDLE_FILE))?,
        }
        write_atomic(dir, INFO_FILE, &info_json)?;

        Ok(TenantCertificate {
            tenant_id,
            tax_id: material.tax_id,
            certificate_pem,
            private_key_pem: key_pem,
            valid_from,
            valid_to,
            source_format: material.source_format,
        })
    }

    fn read_tenant(&self, tenant_id: TenantId) -> IdentityResult<TenantCertificate> {
        let dir = self.tenant_dir(tenant_id);
        let required = |name: &str| {
            read_optional(&dir.join(name))?.ok_or_else(|| IdentityError::not_found(tenant_id))
        };

        let certificate_pem = required(CERTIFICATE_FILE)?;
        let private_key_pem = Zeroizing::new(required(KEY_FILE)?);
        let info: CertificateInfo = serde_json::from_str(&required(INFO_FILE)?).map_err(|error| {
            IdentityError::serialization(format!("decode {INFO_FILE} for tenant {tenant_id}"), error)
        })?;

        Ok(TenantCertificate {
            tenant_id,
            tax_id: info.tax_id,
            certificate_pem,
            private_key_pem,
            valid_from: info.valid_from,
            valid_to: info.valid_to,
            source_format: info.ingest_method,
        })
    }
}

impl CertificateSource for CertificateStore {
    fn signing_material(&self, tenant_id: TenantId) -> IdentityResult<Option<Arc<TenantCertificate>>> {
        match self.lookup(tenant_id) {
            Ok(certificate) => Ok(Some(certificate)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("root_dir", &self.config.root_dir())
            .field("cached_tenants", &self.cache.entry_count())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

fn shaped_tax_id(raw: &str) -> IdentityResult<String> {
    let tax_id = normalize_tax_id(raw);
    if is_tax_id_shaped(&tax_id) { Ok(tax_id) } else { Err(IdentityError::invalid_tax_id(raw)) }
}

fn resolved_tax_id(certificate: &X509) -> IdentityResult<String> {
    let names = certificate_names(certificate);
    let (tax_id, strategy) =
        resolve_tax_id(&names, &DEFAULT_TAX_ID_STRATEGIES).ok_or(IdentityError::TaxIdNotFound)?;
    tracing::debug!(?strategy, "tax id resolved");
    Ok(tax_id)
}

fn read_optional(path: &Path) -> IdentityResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(IdentityError::io(format!("read {}", path.display()), error)),
    }
}

fn remove_if_exists(path: &Path) -> IdentityResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(IdentityError::io(format!("remove {}", path.display()), error)),
    }
}

fn create_tenant_dir(dir: &Path) -> IdentityResult<()> {
    fs::create_dir_all(dir)
        .map_err(|error| IdentityError::io(format!("create {}", dir.display()), error))
}

/// Writes `contents` to `dir/name` through a temporary file and a rename.
fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> IdentityResult<()> {
    let mut file = NamedTempFile::new_in(dir)
        .map_err(|error| IdentityError::io(format!("create temporary file for {name}"), error))?;
    file.write_all(contents)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|error| IdentityError::io(format!("write {name}"), error))?;
    file.persist(dir.join(name))
        .map_err(|error| IdentityError::io(format!("replace {name}"), error.error))?;
    Ok(())
}
