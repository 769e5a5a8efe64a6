#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
//! Integration tests for fail-point injection in the ticket cache.
//!
//! These tests require both `failpoints` and `testutil` features:
//! ```bash
//! cargo test -p facturador-common-wsaa --features failpoints,testutil --test failpoint_tests
//! ```

use std::sync::Arc;

use facturador_common_identity::TenantId;
use facturador_common_wsaa::{
    MemoryTicketStore, TicketCache, TicketCacheConfig, TicketError,
    testutil::{MockLoginTransport, MockReply, StaticCertificateSource},
};

const TENANT: TenantId = TenantId(7);

fn setup() -> (TicketCache, Arc<MockLoginTransport>, Arc<MemoryTicketStore>) {
    let certificates = StaticCertificateSource::new();
    certificates.insert_generated(TENANT);
    let transport =
        Arc::new(MockLoginTransport::new(MockReply::success_in(chrono::Duration::hours(12))));
    let store = Arc::new(MemoryTicketStore::new());
    let cache = TicketCache::builder()
        .config(TicketCacheConfig::builder().build().expect("config"))
        .certificates(Arc::new(certificates))
        .transport(transport.clone())
        .store(store.clone())
        .build();
    (cache, transport, store)
}

#[tokio::test]
async fn origin_failpoint_stops_before_sending() {
    let scenario = fail::FailScenario::setup();
    let (cache, transport, store) = setup();

    fail::cfg("ticket-before-origin", "return").expect("failed to configure fail point");

    let err = cache.request_ticket(TENANT, "wsfe").await.unwrap_err();
    assert!(matches!(err, TicketError::Transport { .. }), "got {err:?}");
    assert_eq!(transport.calls(), 0);
    assert!(store.is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn durable_write_failpoint_keeps_ticket_in_memory() {
    let scenario = fail::FailScenario::setup();
    let (cache, transport, store) = setup();

    fail::cfg("ticket-before-durable-write", "return").expect("failed to configure fail point");

    let ticket = cache.request_ticket(TENANT, "wsfe").await.expect("ticket despite durable failure");
    assert!(store.is_empty(), "durable write should have been skipped");
    assert_eq!(cache.metrics().durable_write_failures, 1);

    let again = cache.request_ticket(TENANT, "wsfe").await.expect("served from memory");
    assert!(Arc::ptr_eq(&ticket, &again));
    assert_eq!(transport.calls(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn without_failpoints_ticket_reaches_both_tiers() {
    let scenario = fail::FailScenario::setup();
    let (cache, transport, store) = setup();

    cache.request_ticket(TENANT, "wsfe").await.expect("ticket");
    assert_eq!(store.len(), 1);
    assert_eq!(transport.calls(), 1);

    scenario.teardown();
}
