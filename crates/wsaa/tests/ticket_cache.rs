//! Read-through ticket cache behavior against a scripted login transport.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use facturador_common_identity::{
    CertificateStore, CertificateStoreConfig, TenantId, testutil::TestCertificate,
};
use facturador_common_wsaa::{
    FaultKind, FileTicketStore, MemoryTicketStore, TicketCache, TicketCacheConfig, TicketError,
    TicketKey, TicketRecord, TicketStore,
    testutil::{FailingTicketStore, MockLoginTransport, MockReply, StaticCertificateSource, TEST_TOKEN},
};
use rstest::rstest;

const TENANT: TenantId = TenantId(7);
const OTHER_TENANT: TenantId = TenantId(8);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn fresh() -> MockReply {
    MockReply::success_in(chrono::Duration::hours(12))
}

fn certificates() -> Arc<StaticCertificateSource> {
    let certificates = StaticCertificateSource::new();
    certificates.insert_generated(TENANT);
    certificates.insert_generated(OTHER_TENANT);
    Arc::new(certificates)
}

struct Harness {
    cache: TicketCache,
    transport: Arc<MockLoginTransport>,
    store: Arc<MemoryTicketStore>,
}

fn harness(transport: MockLoginTransport) -> Harness {
    harness_with(transport, TicketCacheConfig::builder().build().expect("config"))
}

fn harness_with(transport: MockLoginTransport, config: TicketCacheConfig) -> Harness {
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryTicketStore::new());
    let cache = TicketCache::builder()
        .config(config)
        .certificates(certificates())
        .transport(transport.clone())
        .store(store.clone())
        .build();
    Harness { cache, transport, store }
}

fn key(tenant_id: TenantId, service: &str) -> TicketKey {
    TicketKey::new(tenant_id, service).expect("key")
}

fn record_expiring_in(remaining: chrono::Duration) -> TicketRecord {
    TicketRecord {
        token: "stored-token".into(),
        signature: "stored-sign".into(),
        expiration_time: Utc::now() + remaining,
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_certificate_sends_nothing() {
    let h = harness(MockLoginTransport::new(fresh()));

    let err = h.cache.request_ticket(TenantId(99), "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::MissingCertificate { tenant_id } if tenant_id == TenantId(99)));
    assert!(err.is_caller_error());
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn acquired_ticket_is_served_from_memory() {
    let h = harness(MockLoginTransport::new(fresh()));

    let first = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    let second = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();

    assert_eq!(first.token, TEST_TOKEN);
    assert_eq!(first.tenant_id(), TENANT);
    assert_eq!(first.service(), "wsfe");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.transport.calls(), 1);

    let metrics = h.cache.metrics();
    assert_eq!(metrics.acquisitions, 1);
    assert_eq!(metrics.l1_hits, 1);

    let stored = h.store.load(&key(TENANT, "wsfe")).await.unwrap().expect("durable record");
    assert_eq!(stored.token, TEST_TOKEN);
    assert_eq!(stored.expiration_time, first.expiration_time);
}

#[tokio::test]
async fn envelope_targets_login_cms() {
    let h = harness(MockLoginTransport::new(fresh()));

    h.cache.request_ticket(TENANT, "ws_sr_padron_a13").await.unwrap();

    let envelope = h.transport.last_envelope().expect("envelope");
    assert!(envelope.contains("http://wsaa.view.sua.dvadac.desein.afip.gov"));
    assert!(envelope.contains("<wsaa:loginCms><wsaa:in0>"));
}

#[tokio::test]
async fn services_are_cached_independently() {
    let h = harness(MockLoginTransport::new(fresh()));

    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    h.cache.request_ticket(TENANT, "ws_sr_padron_a13").await.unwrap();
    h.cache.request_ticket(OTHER_TENANT, "wsfe").await.unwrap();

    assert_eq!(h.transport.calls(), 3);
    assert_eq!(h.store.len(), 3);
}

#[tokio::test]
async fn already_issued_fault_is_terminal() {
    let h = harness(MockLoginTransport::new(MockReply::fault(
        "ns1:coe.alreadyAuthenticated",
        "El CEE ya posee un TA valido para el acceso al WSN solicitado",
    )));

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::AlreadyIssued { .. }), "got {err:?}");
    assert!(err.to_string().contains("12 hours"), "{err}");
    assert!(h.store.is_empty());
    assert_eq!(h.cache.metrics().acquisition_failures, 1);

    // Not retried internally; each call reaches the authority once.
    let _ = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();
    assert_eq!(h.transport.calls(), 2);
}

#[rstest]
#[case::untrusted("ns1:cms.cert.untrusted", "Certificado no emitido por AC de confianza", FaultKind::Untrusted)]
#[case::unauthorized(
    "ns1:coe.notAuthorized",
    "Computador no autorizado a acceder al servicio",
    FaultKind::Untrusted
)]
#[case::expired("ns1:cms.cert.expired", "Certificado expirado", FaultKind::Expired)]
#[case::other("ns1:xml.bad", "No se ha podido interpretar el XML", FaultKind::Other)]
#[tokio::test]
async fn faults_are_classified(#[case] code: &str, #[case] message: &str, #[case] kind: FaultKind) {
    let h = harness(MockLoginTransport::new(MockReply::fault(code, message)));

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert_eq!(err.fault_kind(), Some(kind), "got {err:?}");
    assert!(!err.is_transient());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn error_status_without_fault_is_transport_error() {
    let h = harness(MockLoginTransport::new(MockReply::status(503, "Service Unavailable")));

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::Transport { .. }), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn success_without_credentials_is_malformed() {
    let h = harness(MockLoginTransport::new(MockReply::status(
        200,
        "<Envelope><Body><loginCmsResponse/></Body></Envelope>",
    )));

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::MalformedResponse { .. }), "got {err:?}");
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let h = harness(MockLoginTransport::new(MockReply::Unreachable("connection refused".into())));

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(err.is_transient(), "got {err:?}");
    assert!(err.user_message().contains("temporarily unavailable"));
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let config = TicketCacheConfig::builder()
        .request_timeout(Duration::from_millis(50))
        .build()
        .expect("config");
    let h = harness_with(
        MockLoginTransport::new(fresh()).with_delay(Duration::from_secs(5)),
        config,
    );

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::Transport { .. }), "got {err:?}");
    assert!(err.to_string().contains("50ms"), "{err}");
}

#[tokio::test]
async fn broken_certificate_source_is_not_a_caller_error() {
    let certificates = certificates();
    certificates.break_with("disk gone");
    let transport = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(certificates)
        .transport(transport.clone())
        .build();

    let err = cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::Certificate { .. }), "got {err:?}");
    assert!(!err.is_caller_error());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn slow_certificate_source_does_not_stall_the_executor() {
    let certificates = certificates();
    certificates.stall_for(Duration::from_millis(500));
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(certificates)
        .transport(Arc::new(MockLoginTransport::new(fresh())))
        .build();

    let ticker = tokio::spawn(async {
        let mut max_gap = Duration::ZERO;
        let mut last = std::time::Instant::now();
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let now = std::time::Instant::now();
            max_gap = max_gap.max(now - last);
            last = now;
        }
        max_gap
    });
    tokio::task::yield_now().await;

    cache.request_ticket(TENANT, "wsfe").await.unwrap();
    let max_gap = ticker.await.unwrap();

    assert!(max_gap < Duration::from_millis(250), "executor stalled for {max_gap:?}");
}

// ---------------------------------------------------------------------------
// Tiers and expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ticket_inside_margin_is_replaced() {
    let h = harness(MockLoginTransport::new(MockReply::success_in(chrono::Duration::minutes(4))));

    let first = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert!(first.expiration_time < Utc::now() + chrono::Duration::minutes(5));

    h.transport.push(fresh());
    let second = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();

    assert_eq!(h.transport.calls(), 2);
    assert!(second.expiration_time > Utc::now() + chrono::Duration::hours(11));
    let stored = h.store.load(&key(TENANT, "wsfe")).await.unwrap().expect("record");
    assert_eq!(stored.expiration_time, second.expiration_time);
}

#[tokio::test]
async fn durable_record_repopulates_memory() {
    let h = harness(MockLoginTransport::new(fresh()));
    h.store
        .save(&key(TENANT, "wsfe"), &record_expiring_in(chrono::Duration::hours(6)))
        .await
        .unwrap();

    let first = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    let second = h.cache.request_ticket(TENANT, "wsfe").await.unwrap();

    assert_eq!(first.token, "stored-token");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.transport.calls(), 0);
    let metrics = h.cache.metrics();
    assert_eq!(metrics.l2_hits, 1);
    assert_eq!(metrics.l1_hits, 1);
}

#[tokio::test]
async fn stale_durable_record_is_deleted() {
    let h = harness(MockLoginTransport::new(MockReply::Unreachable("down".into())));
    h.store
        .save(&key(TENANT, "wsfe"), &record_expiring_in(chrono::Duration::minutes(2)))
        .await
        .unwrap();

    let err = h.cache.request_ticket(TENANT, "wsfe").await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(h.transport.calls(), 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn durable_write_failure_still_returns_ticket() {
    let transport = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(certificates())
        .transport(transport.clone())
        .store(Arc::new(FailingTicketStore))
        .build();

    let ticket = cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert_eq!(ticket.token, TEST_TOKEN);
    cache.request_ticket(TENANT, "wsfe").await.unwrap();

    assert_eq!(transport.calls(), 1);
    let metrics = cache.metrics();
    assert_eq!(metrics.durable_write_failures, 1);
    assert_eq!(metrics.l1_hits, 1);
}

#[tokio::test]
async fn file_tier_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = || {
        TicketCacheConfig::builder().ticket_dir(dir.path().join("tickets")).build().expect("config")
    };

    let first_process = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(config())
        .certificates(certificates())
        .transport(first_process.clone())
        .build();
    let issued = cache.request_ticket(TENANT, "wsfe").await.unwrap();
    cache.shutdown().await;
    drop(cache);

    let second_process = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(config())
        .certificates(certificates())
        .transport(second_process.clone())
        .build();
    let reused = cache.request_ticket(TENANT, "wsfe").await.unwrap();

    assert_eq!(second_process.calls(), 0);
    assert_eq!(reused.token, issued.token);
    assert_eq!(reused.expiration_time, issued.expiration_time);
    assert!(FileTicketStore::new(dir.path().join("tickets"))
        .record_path(&key(TENANT, "wsfe"))
        .exists());
}

#[tokio::test]
async fn shutdown_keeps_durable_tier() {
    let h = harness(MockLoginTransport::new(fresh()));
    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();

    h.cache.shutdown().await;
    assert_eq!(h.cache.entry_count(), 0);

    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.cache.metrics().l2_hits, 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_one_acquisition() {
    let h = harness(MockLoginTransport::new(fresh()).with_delay(Duration::from_millis(100)));
    let cache = Arc::new(h.cache);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move { cache.request_ticket(TENANT, "wsfe").await });
    }

    let mut tokens = Vec::new();
    while let Some(result) = tasks.join_next().await {
        tokens.push(result.expect("task").expect("ticket").token.clone());
    }

    assert_eq!(tokens.len(), 8);
    assert!(tokens.iter().all(|token| token == TEST_TOKEN));
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(cache.metrics().acquisitions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_acquire_in_parallel() {
    let h = harness(MockLoginTransport::new(fresh()).with_delay(Duration::from_millis(100)));
    let cache = Arc::new(h.cache);

    let a = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.request_ticket(TENANT, "wsfe").await })
    };
    let b = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.request_ticket(OTHER_TENANT, "wsfe").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(h.transport.calls(), 2);
}

// ---------------------------------------------------------------------------
// clear_cache
// ---------------------------------------------------------------------------

async fn populated() -> Harness {
    let h = harness(MockLoginTransport::new(fresh()));
    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    h.cache.request_ticket(TENANT, "ws_sr_padron_a13").await.unwrap();
    h.cache.request_ticket(OTHER_TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 3);
    h
}

#[tokio::test]
async fn clear_exact_key_leaves_siblings() {
    let h = populated().await;

    let report = h.cache.clear_cache(Some(TENANT), Some("wsfe")).await;

    assert_eq!(report.l1_removed, 1);
    assert_eq!(report.l2_removed, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(
        h.store.keys().await.unwrap(),
        vec![key(TENANT, "ws_sr_padron_a13"), key(OTHER_TENANT, "wsfe")]
    );

    h.cache.request_ticket(TENANT, "ws_sr_padron_a13").await.unwrap();
    h.cache.request_ticket(OTHER_TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 3);

    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 4);
}

#[tokio::test]
async fn clear_tenant_removes_all_its_services() {
    let h = populated().await;

    let report = h.cache.clear_cache(Some(TENANT), None).await;

    assert_eq!(report.l1_removed, 2);
    assert_eq!(report.l2_removed, 2);
    assert_eq!(h.store.keys().await.unwrap(), vec![key(OTHER_TENANT, "wsfe")]);

    h.cache.request_ticket(OTHER_TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 3);
}

#[tokio::test]
async fn clear_service_spans_tenants() {
    let h = populated().await;

    let report = h.cache.clear_cache(None, Some("wsfe")).await;

    assert_eq!(report.l2_removed, 2);
    assert_eq!(h.store.keys().await.unwrap(), vec![key(TENANT, "ws_sr_padron_a13")]);
}

#[tokio::test]
async fn clear_everything() {
    let h = populated().await;

    let report = h.cache.clear_cache(None, None).await;

    assert_eq!(report.l1_removed, 3);
    assert_eq!(report.l2_removed, 3);
    assert!(h.store.is_empty());

    h.cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert_eq!(h.transport.calls(), 4);
}

#[tokio::test]
async fn clear_finds_durable_records_not_in_memory() {
    let h = harness(MockLoginTransport::new(fresh()));
    h.store
        .save(&key(TENANT, "wsfe"), &record_expiring_in(chrono::Duration::hours(6)))
        .await
        .unwrap();

    let report = h.cache.clear_cache(Some(TENANT), None).await;

    assert_eq!(report.l1_removed, 0);
    assert_eq!(report.l2_removed, 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn clear_continues_past_durable_failures() {
    let transport = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(certificates())
        .transport(transport.clone())
        .store(Arc::new(FailingTicketStore))
        .build();
    cache.request_ticket(TENANT, "wsfe").await.unwrap();
    cache.request_ticket(TENANT, "ws_sr_padron_a13").await.unwrap();

    let report = cache.clear_cache(Some(TENANT), None).await;

    assert_eq!(report.l1_removed, 2);
    assert_eq!(report.l2_removed, 0);
    // Listing fails once, then each of the two deletions.
    assert_eq!(report.failures, 3);

    cache.request_ticket(TENANT, "wsfe").await.unwrap();
    assert_eq!(transport.calls(), 3);
}

// ---------------------------------------------------------------------------
// With the real certificate store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signs_with_ingested_certificate() {
    let root = tempfile::tempdir().unwrap();
    let store = CertificateStore::new(
        CertificateStoreConfig::builder().root_dir(root.path()).build().expect("config"),
    );
    let fixture = TestCertificate::builder().tax_id("30716539685").build();
    store.ingest_pkcs12(TENANT, "30716539685", &fixture.to_pkcs12("clave"), "clave").unwrap();

    let transport = Arc::new(MockLoginTransport::new(fresh()));
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(Arc::new(store))
        .transport(transport.clone())
        .build();

    cache.request_ticket(TENANT, "wsfe").await.unwrap();
    let err = cache.request_ticket(OTHER_TENANT, "wsfe").await.unwrap_err();

    assert!(matches!(err, TicketError::MissingCertificate { .. }), "got {err:?}");
    assert_eq!(transport.calls(), 1);
}
