//! Read-through access ticket cache.
//!
//! [`TicketCache::request_ticket`] resolves a ticket through three tiers:
//!
//! ```text
//! L1 (moka, in-process) ──miss──▶ L2 (TicketStore) ──miss──▶ origin (LoginCms)
//!        ▲                              ▲                          │
//!        └────────── populate ──────────┴──────── write-through ───┘
//! ```
//!
//! A ticket is usable while `expiration_time - safety_margin` lies in the
//! future. Stale entries are dropped from the tier they were found in. Origin
//! calls are deduplicated per key: concurrent callers for the same tenant and
//! service wait for one acquisition and share its ticket, which matters
//! because the authority refuses a second ticket while the first is valid.
//!
//! The durable write after an acquisition is best-effort. A failure is
//! logged and counted; the caller still gets the ticket from L1.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use facturador_common_identity::{CertificateSource, IdentityError, TenantCertificate, TenantId};
use fail::fail_point;
use moka::future::Cache;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    cms::sign_login_request,
    config::TicketCacheConfig,
    durable::{FileTicketStore, MemoryTicketStore, TicketStore},
    error::{TicketError, TicketResult},
    metrics::{TicketCacheMetrics, TicketCacheMetricsSnapshot},
    soap::{FaultClass, LoginResponse, login_envelope, parse_login_response},
    ticket::{AccessTicket, LoginTicketRequest, TicketKey, TicketRecord},
    transport::{HttpLoginTransport, LoginTransport},
};

/// Expires L1 entries when they enter the safety margin.
struct TicketExpiry {
    margin: Duration,
}

impl moka::Expiry<TicketKey, Arc<AccessTicket>> for TicketExpiry {
    fn expire_after_create(
        &self,
        _key: &TicketKey,
        value: &Arc<AccessTicket>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.usable_for(Utc::now(), self.margin))
    }

    fn expire_after_update(
        &self,
        _key: &TicketKey,
        value: &Arc<AccessTicket>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.usable_for(Utc::now(), self.margin))
    }
}

/// Outcome of [`TicketCache::clear_cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Tickets removed from memory.
    pub l1_removed: usize,
    /// Records removed from the durable tier.
    pub l2_removed: usize,
    /// Deletions or listings that failed; the sweep continued past them.
    pub failures: usize,
}

/// Exclusive right to acquire the ticket for one key.
///
/// Dropping it releases waiters and, when nobody else is queued, removes the
/// key from the registry.
struct Flight<'a> {
    registry: &'a Mutex<HashMap<TicketKey, Arc<AsyncMutex<()>>>>,
    key: TicketKey,
    lock: Arc<AsyncMutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut registry = self.registry.lock();
        // One reference in the registry, one here: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            registry.remove(&self.key);
        }
    }
}

/// Produces and caches access tickets per tenant and service.
///
/// Construct one per process and share it behind an [`Arc`].
pub struct TicketCache {
    config: TicketCacheConfig,
    certificates: Arc<dyn CertificateSource>,
    transport: Arc<dyn LoginTransport>,
    store: Arc<dyn TicketStore>,
    l1: Cache<TicketKey, Arc<AccessTicket>>,
    inflight: Mutex<HashMap<TicketKey, Arc<AsyncMutex<()>>>>,
    metrics: TicketCacheMetrics,
}

#[bon::bon]
impl TicketCache {
    /// Creates a cache.
    ///
    /// Without an explicit `store`, tickets are kept in a
    /// [`FileTicketStore`] under `config.ticket_dir()` when set, else in a
    /// [`MemoryTicketStore`].
    #[builder]
    pub fn new(
        config: TicketCacheConfig,
        certificates: Arc<dyn CertificateSource>,
        transport: Arc<dyn LoginTransport>,
        store: Option<Arc<dyn TicketStore>>,
    ) -> Self {
        let store = store.unwrap_or_else(|| default_store(&config));
        let l1 = Cache::builder()
            .max_capacity(config.l1_capacity())
            .expire_after(TicketExpiry { margin: config.safety_margin() })
            .build();
        Self {
            config,
            certificates,
            transport,
            store,
            l1,
            inflight: Mutex::new(HashMap::new()),
            metrics: TicketCacheMetrics::new(),
        }
    }
}

fn default_store(config: &TicketCacheConfig) -> Arc<dyn TicketStore> {
    match config.ticket_dir() {
        Some(dir) => Arc::new(FileTicketStore::new(dir)),
        None => Arc::new(MemoryTicketStore::new()),
    }
}

impl TicketCache {
    /// Creates a cache that talks to the configured LoginCms endpoint over
    /// HTTPS.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Transport`] if the HTTP client cannot be built.
    pub fn from_config(
        config: TicketCacheConfig,
        certificates: Arc<dyn CertificateSource>,
    ) -> TicketResult<Self> {
        let transport = Arc::new(HttpLoginTransport::from_config(&config)?);
        Ok(Self::builder().config(config).certificates(certificates).transport(transport).build())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TicketCacheConfig {
        &self.config
    }

    /// Returns a usable ticket for `service`, acquiring one if neither tier
    /// holds it.
    ///
    /// A ticket that arrives from the authority already inside the safety
    /// margin is returned once but not kept in memory.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidService`] for unusable service names
    /// - [`TicketError::MissingCertificate`] if the tenant has no certificate;
    ///   nothing is sent
    /// - [`TicketError::Certificate`] if the certificate cannot be read
    /// - [`TicketError::Signing`] if the request cannot be signed
    /// - [`TicketError::Transport`] on network failure, timeout, or a
    ///   non-success status without a fault
    /// - [`TicketError::AuthorityFault`] when the authority refuses
    /// - [`TicketError::AlreadyIssued`] when the authority holds a ticket
    ///   issued to another client
    /// - [`TicketError::MalformedResponse`] when a success response lacks
    ///   the credentials
    #[tracing::instrument(skip(self))]
    pub async fn request_ticket(
        &self,
        tenant_id: TenantId,
        service: &str,
    ) -> TicketResult<Arc<AccessTicket>> {
        let key = TicketKey::new(tenant_id, service)?;

        if let Some(ticket) = self.read_l1(&key).await {
            return Ok(ticket);
        }

        let _flight = self.board(&key).await;
        // Another caller may have finished an acquisition while we waited.
        if let Some(ticket) = self.read_l1(&key).await {
            return Ok(ticket);
        }
        if let Some(ticket) = self.read_l2(&key).await {
            return Ok(ticket);
        }
        self.acquire(&key).await
    }

    /// Removes tickets from both tiers.
    ///
    /// | `tenant_id` | `service` | Removes |
    /// |-------------|-----------|---------|
    /// | `Some` | `Some` | that one ticket |
    /// | `Some` | `None` | every ticket of the tenant |
    /// | `None` | `Some` | the service's ticket for every tenant |
    /// | `None` | `None` | everything |
    ///
    /// A failed deletion is logged and counted in the report; the sweep
    /// continues. An audit event is emitted at INFO level.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cache(
        &self,
        tenant_id: Option<TenantId>,
        service: Option<&str>,
    ) -> ClearReport {
        let mut report = ClearReport::default();
        let exact = match (tenant_id, service) {
            (Some(tenant_id), Some(service)) => TicketKey::new(tenant_id, service).ok(),
            _ => None,
        };

        let keys: BTreeSet<TicketKey> = match exact {
            Some(key) => BTreeSet::from([key]),
            None => {
                let matches = |key: &TicketKey| {
                    tenant_id.is_none_or(|tenant_id| key.tenant_id() == tenant_id)
                        && service.is_none_or(|service| key.service() == service)
                };
                let mut keys: BTreeSet<TicketKey> = self
                    .l1
                    .iter()
                    .map(|(key, _)| TicketKey::clone(&key))
                    .filter(|key| matches(key))
                    .collect();
                match self.store.keys().await {
                    Ok(stored) => keys.extend(stored.into_iter().filter(|key| matches(key))),
                    Err(error) => {
                        report.failures += 1;
                        tracing::warn!(cache = "L2", error = %error, "cannot list durable tickets");
                    },
                }
                keys
            },
        };

        for key in &keys {
            if self.l1.remove(key).await.is_some() {
                report.l1_removed += 1;
            }
            match self.store.delete(key).await {
                Ok(true) => report.l2_removed += 1,
                Ok(false) => {},
                Err(error) => {
                    report.failures += 1;
                    tracing::warn!(cache = "L2", %key, error = %error, "cannot delete durable ticket");
                },
            }
        }

        let resource = match (tenant_id, service) {
            (Some(tenant_id), Some(service)) => format!("tenant:{tenant_id}/service:{service}"),
            (Some(tenant_id), None) => format!("tenant:{tenant_id}"),
            (None, Some(service)) => format!("service:{service}"),
            (None, None) => "all_tickets".to_owned(),
        };
        let result = if report.failures == 0 { "success" } else { "partial" };
        tracing::info!(
            audit.action = "clear_cache",
            audit.resource = %resource,
            audit.result = result,
            audit.l1_evicted = report.l1_removed,
            audit.l2_evicted = report.l2_removed,
            audit.failures = report.failures,
            "audit_event"
        );
        report
    }

    /// Drops every in-memory ticket. Durable records are kept so the next
    /// process can reuse them.
    pub async fn shutdown(&self) {
        self.l1.invalidate_all();
        self.l1.run_pending_tasks().await;
    }

    /// Returns the number of tickets in memory.
    ///
    /// Eventually consistent; call [`sync`](Self::sync) first for an exact
    /// count.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.l1.entry_count()
    }

    /// Applies pending L1 maintenance (expirations, evictions).
    pub async fn sync(&self) {
        self.l1.run_pending_tasks().await;
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> TicketCacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the live counters.
    #[must_use]
    pub fn metrics_handle(&self) -> &TicketCacheMetrics {
        &self.metrics
    }

    async fn read_l1(&self, key: &TicketKey) -> Option<Arc<AccessTicket>> {
        let Some(ticket) = self.l1.get(key).await else {
            tracing::debug!(cache = "L1", "cache miss");
            return None;
        };
        if ticket.is_usable_at(Utc::now(), self.config.safety_margin()) {
            tracing::debug!(cache = "L1", "cache hit");
            self.metrics.record_l1_hit();
            return Some(ticket);
        }
        self.l1.invalidate(key).await;
        tracing::debug!(
            cache = "L1",
            expiration_time = %ticket.expiration_time,
            "stale ticket dropped"
        );
        None
    }

    async fn read_l2(&self, key: &TicketKey) -> Option<Arc<AccessTicket>> {
        let record = match self.store.load(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(cache = "L2", "cache miss");
                return None;
            },
            Err(error) => {
                tracing::warn!(
                    cache = "L2",
                    error = %error,
                    "durable ticket unreadable, acquiring a new one"
                );
                return None;
            },
        };

        let ticket = record.into_ticket(key.clone());
        if !ticket.is_usable_at(Utc::now(), self.config.safety_margin()) {
            tracing::debug!(
                cache = "L2",
                expiration_time = %ticket.expiration_time,
                "stale ticket dropped"
            );
            if let Err(error) = self.store.delete(key).await {
                tracing::warn!(cache = "L2", error = %error, "cannot delete stale durable ticket");
            }
            return None;
        }

        let ticket = Arc::new(ticket);
        self.l1.insert(key.clone(), Arc::clone(&ticket)).await;
        self.metrics.record_l2_hit();
        tracing::debug!(cache = "L2", "cache hit, populated L1");
        Some(ticket)
    }

    /// Reads the tenant's material on the blocking pool: a source may touch
    /// the filesystem or wait on an ingest holding the tenant lock.
    async fn signing_material(
        &self,
        tenant_id: TenantId,
    ) -> TicketResult<Option<Arc<TenantCertificate>>> {
        let certificates = Arc::clone(&self.certificates);
        let material = tokio::task::spawn_blocking(move || certificates.signing_material(tenant_id))
            .await
            .map_err(|error| {
                IdentityError::io("certificate lookup task failed", std::io::Error::other(error))
            })??;
        Ok(material)
    }

    async fn acquire(&self, key: &TicketKey) -> TicketResult<Arc<AccessTicket>> {
        let material = self
            .signing_material(key.tenant_id())
            .await?
            .ok_or_else(|| TicketError::missing_certificate(key.tenant_id()))?;

        let request = LoginTicketRequest::new(key, Utc::now(), self.config.ticket_lifetime());
        let cms =
            sign_login_request(&material, request.to_xml().as_bytes(), self.config.signature_mode())?;
        let envelope = login_envelope(&BASE64.encode(cms));

        fail_point!("ticket-before-origin", |_| {
            Err(TicketError::transport_message("injected failure before origin call"))
        });

        let ticket = match self.login(key, envelope).await {
            Ok(ticket) => Arc::new(ticket),
            Err(error) => {
                self.metrics.record_acquisition_failure();
                tracing::warn!(cache = "origin", error = %error, "ticket acquisition failed");
                return Err(error);
            },
        };
        self.metrics.record_acquisition();
        tracing::debug!(
            cache = "origin",
            expiration_time = %ticket.expiration_time,
            unique_id = request.unique_id,
            "acquired ticket"
        );

        self.l1.insert(key.clone(), Arc::clone(&ticket)).await;
        self.write_through(key, &ticket).await;
        Ok(ticket)
    }

    async fn login(&self, key: &TicketKey, envelope: String) -> TicketResult<AccessTicket> {
        let timeout = self.config.request_timeout();
        let response = tokio::time::timeout(timeout, self.transport.send(envelope))
            .await
            .map_err(|_elapsed| TicketError::timeout(timeout))??;

        let credentials = match parse_login_response(&response.body) {
            Ok(LoginResponse::Credentials(credentials)) => credentials,
            Ok(LoginResponse::Fault(fault)) => {
                return Err(match fault.classify() {
                    FaultClass::AlreadyIssued => {
                        TicketError::already_issued(key.tenant_id(), key.service())
                    },
                    FaultClass::Rejected(kind) => {
                        TicketError::authority_fault(kind, fault.code, fault.message)
                    },
                });
            },
            Err(_) if !response.is_success() => {
                return Err(TicketError::transport_message(format!(
                    "login endpoint answered HTTP {} without a fault",
                    response.status
                )));
            },
            Err(error) => return Err(error),
        };

        Ok(AccessTicket::new(
            key.clone(),
            credentials.token,
            credentials.sign,
            credentials.expiration_time,
        ))
    }

    async fn write_through(&self, key: &TicketKey, ticket: &AccessTicket) {
        let result = async {
            fail_point!("ticket-before-durable-write", |_| {
                Err(TicketError::storage_message("injected failure before durable write"))
            });
            self.store.save(key, &TicketRecord::from(ticket)).await
        }
        .await;

        if let Err(error) = result {
            self.metrics.record_durable_write_failure();
            tracing::warn!(
                cache = "L2",
                error = %error,
                "durable ticket write failed, ticket kept in memory only"
            );
        }
    }

    /// Waits for the exclusive right to acquire `key`.
    async fn board(&self, key: &TicketKey) -> Flight<'_> {
        let lock = Arc::clone(self.inflight.lock().entry(key.clone()).or_default());
        let permit = Arc::clone(&lock).lock_owned().await;
        Flight { registry: &self.inflight, key: key.clone(), lock, permit: Some(permit) }
    }
}

impl std::fmt::Debug for TicketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCache")
            .field("login_url", &self.config.login_url())
            .field("l1_entries", &self.l1.entry_count())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
