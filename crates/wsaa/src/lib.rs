//! Access tickets for the tax authority's web services.
//!
//! Every call to an authority web service (electronic invoicing, taxpayer
//! registry) must carry an access ticket: a token and signature issued by the
//! authentication service (WSAA) for one tenant and one service, valid for
//! about twelve hours. [`TicketCache`] obtains tickets on demand and keeps them
//! in two tiers so each tenant asks for a new ticket at most once per
//! lifetime:
//!
//! 1. **L1**: in-process `moka` cache
//! 2. **L2**: durable [`TicketStore`], one record per ticket
//! 3. **origin**: a signed login request sent to LoginCms
//!
//! Acquisition signs a [`LoginTicketRequest`] with the tenant's certificate
//! from a [`CertificateSource`](facturador_common_identity::CertificateSource)
//! into a CMS envelope, posts it in a SOAP envelope and parses either the
//! credentials or a fault. Faults are classified into [`FaultKind`]s and the
//! "ticket already issued elsewhere" case into
//! [`TicketError::AlreadyIssued`]. Nothing is retried internally.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use facturador_common_identity::{CertificateStore, CertificateStoreConfig, TenantId};
//! use facturador_common_wsaa::{Environment, TicketCache, TicketCacheConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let certificates = Arc::new(CertificateStore::new(
//!     CertificateStoreConfig::builder().root_dir("/var/lib/facturador/certs").build()?,
//! ));
//! let config = TicketCacheConfig::builder()
//!     .environment(Environment::Production)
//!     .ticket_dir("/var/lib/facturador/tickets")
//!     .build()?;
//! let cache = TicketCache::from_config(config, certificates)?;
//!
//! let ticket = cache.request_ticket(TenantId::from(7), "wsfe").await?;
//! println!("token expires at {}", ticket.expiration_time);
//! # Ok(())
//! # }
//! ```
//!
//! # Fail Points
//!
//! With the `failpoints` feature, the `fail` crate can inject errors at
//! `ticket-before-origin` and `ticket-before-durable-write`.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module: a scripted login transport, canned SOAP
//!   bodies and an in-memory certificate source.
//! - **`failpoints`**: Compiles the fail points listed above.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cms;
pub mod config;
pub mod durable;
pub mod error;
pub mod metrics;
pub mod soap;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod ticket;
pub mod ticket_cache;
pub mod transport;

pub use config::{
    DEFAULT_L1_CAPACITY, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SAFETY_MARGIN, DEFAULT_TICKET_LIFETIME,
    Environment, HOMOLOGATION_LOGIN_URL, PRODUCTION_LOGIN_URL, SignatureMode, TicketCacheConfig,
};
pub use durable::{FileTicketStore, MemoryTicketStore, TicketStore};
pub use error::{BoxError, FaultKind, TicketError, TicketResult};
pub use metrics::{TicketCacheMetrics, TicketCacheMetricsSnapshot};
pub use ticket::{AccessTicket, LoginTicketRequest, TicketKey, TicketRecord};
pub use ticket_cache::{ClearReport, TicketCache};
pub use transport::{HttpLoginTransport, LoginTransport, TransportResponse};
