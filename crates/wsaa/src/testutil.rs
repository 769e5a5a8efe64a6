//! Test doubles for the ticket cache: a scripted login transport, canned
//! SOAP bodies, an in-memory certificate source and a failing ticket store.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use facturador_common_identity::TenantId;
//! use facturador_common_wsaa::{
//!     TicketCache, TicketCacheConfig,
//!     testutil::{MockLoginTransport, MockReply, StaticCertificateSource},
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let certificates = StaticCertificateSource::new();
//! certificates.insert_generated(TenantId::from(7));
//! let transport = Arc::new(MockLoginTransport::new(MockReply::success_in(chrono::Duration::hours(12))));
//!
//! let cache = TicketCache::builder()
//!     .config(TicketCacheConfig::builder().build().unwrap())
//!     .certificates(Arc::new(certificates))
//!     .transport(transport.clone())
//!     .build();
//!
//! let ticket = cache.request_ticket(TenantId::from(7), "wsfe").await.unwrap();
//! assert_eq!(ticket.token, "test-token");
//! assert_eq!(transport.calls(), 1);
//! # });
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use facturador_common_identity::{
    CertificateSource, IdentityError, IdentityResult, SourceFormat, TenantCertificate, TenantId,
    Zeroizing, parse::validity_window, testutil::TestCertificate,
};
use parking_lot::Mutex;

use crate::{
    durable::TicketStore,
    error::{TicketError, TicketResult},
    ticket::{TicketKey, TicketRecord},
    transport::{LoginTransport, TransportResponse},
};

/// Token returned by [`MockReply::success_in`].
pub const TEST_TOKEN: &str = "test-token";

/// Signature returned by [`MockReply::success_in`].
pub const TEST_SIGN: &str = "test-sign";

/// Builds a LoginCms success body carrying the given credentials.
#[must_use]
pub fn success_body(token: &str, sign: &str, expiration: DateTime<Utc>) -> String {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false);
    let inner = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<loginTicketResponse version="1.0">"#,
            "<header>",
            "<source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source>",
            "<destination>SERIALNUMBER=CUIT 20123456786, CN=facturador-test</destination>",
            "<uniqueId>4242424242</uniqueId>",
            "<generationTime>{now}</generationTime>",
            "<expirationTime>{expiration}</expirationTime>",
            "</header>",
            "<credentials><token>{token}</token><sign>{sign}</sign></credentials>",
            "</loginTicketResponse>",
        ),
        now = now,
        expiration = expiration.to_rfc3339_opts(SecondsFormat::Millis, false),
        token = quick_xml::escape::escape(token),
        sign = quick_xml::escape::escape(sign),
    );
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soapenv:Body>",
            r#"<loginCmsResponse xmlns="http://wsaa.view.sua.dvadac.desein.afip.gov">"#,
            "<loginCmsReturn>{}</loginCmsReturn>",
            "</loginCmsResponse>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        quick_xml::escape::escape(inner.as_str()),
    )
}

/// Builds a SOAP fault body.
#[must_use]
pub fn fault_body(code: &str, message: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soapenv:Body>",
            "<soapenv:Fault>",
            r#"<faultcode xmlns:ns1="http://xml.apache.org/axis/">{}</faultcode>"#,
            "<faultstring>{}</faultstring>",
            "<detail><ns2:hostname xmlns:ns2=\"http://xml.apache.org/axis/\">wsaa</ns2:hostname></detail>",
            "</soapenv:Fault>",
            "</soapenv:Body>",
            "</soapenv:Envelope>",
        ),
        quick_xml::escape::escape(code),
        quick_xml::escape::escape(message),
    )
}

/// One scripted answer of [`MockLoginTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this status and body.
    Respond(TransportResponse),
    /// Fail as if the endpoint could not be reached.
    Unreachable(String),
}

impl MockReply {
    /// HTTP 200 carrying the given credentials.
    #[must_use]
    pub fn success(token: &str, sign: &str, expiration: DateTime<Utc>) -> Self {
        Self::status(200, success_body(token, sign, expiration))
    }

    /// HTTP 200 with [`TEST_TOKEN`] expiring `remaining` from now.
    #[must_use]
    pub fn success_in(remaining: chrono::Duration) -> Self {
        Self::success(TEST_TOKEN, TEST_SIGN, Utc::now() + remaining)
    }

    /// HTTP 500 carrying a SOAP fault.
    #[must_use]
    pub fn fault(code: &str, message: &str) -> Self {
        Self::status(500, fault_body(code, message))
    }

    /// Arbitrary status and body.
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Respond(TransportResponse { status, body: body.into() })
    }
}

/// A [`LoginTransport`] that records envelopes and replays scripted answers.
///
/// Queued replies are used first, in order; afterwards every call gets the
/// default reply.
#[derive(Debug)]
pub struct MockLoginTransport {
    default: MockReply,
    queued: Mutex<VecDeque<MockReply>>,
    envelopes: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockLoginTransport {
    /// Creates a transport answering every call with `default`.
    #[must_use]
    pub fn new(default: MockReply) -> Self {
        Self {
            default,
            queued: Mutex::new(VecDeque::new()),
            envelopes: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Makes every call wait `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues a reply for the next unanswered call.
    pub fn push(&self, reply: MockReply) {
        self.queued.lock().push_back(reply);
    }

    /// Returns how many envelopes were sent.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.envelopes.lock().len()
    }

    /// Returns the most recent envelope.
    #[must_use]
    pub fn last_envelope(&self) -> Option<String> {
        self.envelopes.lock().last().cloned()
    }
}

#[async_trait]
impl LoginTransport for MockLoginTransport {
    async fn send(&self, envelope: String) -> TicketResult<TransportResponse> {
        self.envelopes.lock().push(envelope);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.queued.lock().pop_front().unwrap_or_else(|| self.default.clone());
        match reply {
            MockReply::Respond(response) => Ok(response),
            MockReply::Unreachable(message) => Err(TicketError::transport_message(message)),
        }
    }
}

/// A [`CertificateSource`] over a fixed map of tenants.
#[derive(Default)]
pub struct StaticCertificateSource {
    certificates: Mutex<HashMap<TenantId, Arc<TenantCertificate>>>,
    broken: Mutex<Option<String>>,
    stall: Mutex<Duration>,
}

impl StaticCertificateSource {
    /// Creates a source with no tenants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `fixture` as the tenant's material.
    pub fn insert(&self, tenant_id: TenantId, tax_id: &str, fixture: &TestCertificate) {
        let (valid_from, valid_to) =
            validity_window(&fixture.certificate).expect("fixture validity window");
        let certificate = TenantCertificate {
            tenant_id,
            tax_id: tax_id.to_owned(),
            certificate_pem: fixture.certificate_pem.clone(),
            private_key_pem: Zeroizing::new(fixture.private_key_pem.clone()),
            valid_from,
            valid_to,
            source_format: SourceFormat::PemPair,
        };
        self.certificates.lock().insert(tenant_id, Arc::new(certificate));
    }

    /// Mints a fresh certificate for the tenant and registers it.
    pub fn insert_generated(&self, tenant_id: TenantId) -> TestCertificate {
        let fixture = TestCertificate::builder().tax_id("20123456786").build();
        self.insert(tenant_id, "20123456786", &fixture);
        fixture
    }

    /// Makes every lookup block its thread for `duration` before answering,
    /// like a store waiting on an ingest that holds the tenant lock.
    pub fn stall_for(&self, duration: Duration) {
        *self.stall.lock() = duration;
    }

    /// Makes every lookup fail with an I/O error carrying `message`.
    pub fn break_with(&self, message: &str) {
        *self.broken.lock() = Some(message.to_owned());
    }
}

impl CertificateSource for StaticCertificateSource {
    fn signing_material(
        &self,
        tenant_id: TenantId,
    ) -> IdentityResult<Option<Arc<TenantCertificate>>> {
        let stall = *self.stall.lock();
        if !stall.is_zero() {
            std::thread::sleep(stall);
        }
        if let Some(message) = self.broken.lock().clone() {
            return Err(IdentityError::io("read tenant material", std::io::Error::other(message)));
        }
        Ok(self.certificates.lock().get(&tenant_id).cloned())
    }
}

/// A [`TicketStore`] whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingTicketStore;

#[async_trait]
impl TicketStore for FailingTicketStore {
    async fn load(&self, _key: &TicketKey) -> TicketResult<Option<TicketRecord>> {
        Err(TicketError::storage_message("durable tier unavailable"))
    }

    async fn save(&self, _key: &TicketKey, _record: &TicketRecord) -> TicketResult<()> {
        Err(TicketError::storage_message("durable tier unavailable"))
    }

    async fn delete(&self, _key: &TicketKey) -> TicketResult<bool> {
        Err(TicketError::storage_message("durable tier unavailable"))
    }

    async fn keys(&self) -> TicketResult<Vec<TicketKey>> {
        Err(TicketError::storage_message("durable tier unavailable"))
    }
}
