//! Configuration for [`TicketCache`](crate::TicketCache).

use std::{net::IpAddr, path::PathBuf, time::Duration};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{TicketError, TicketResult};

/// LoginCms endpoint of the homologation (testing) environment.
pub const HOMOLOGATION_LOGIN_URL: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";

/// LoginCms endpoint of the production environment.
pub const PRODUCTION_LOGIN_URL: &str = "https://wsaa.afip.gov.ar/ws/services/LoginCms";

/// Default bound on one login call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default buffer subtracted from a ticket's expiration before it is
/// considered unusable.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Default lifetime requested for new tickets.
pub const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Default number of tickets held in memory.
pub const DEFAULT_L1_CAPACITY: u64 = 10_000;

/// Operating environment of the tax authority.
///
/// Each environment has its own endpoints and trust roots; a certificate
/// issued for one is rejected by the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Pre-production environment for integration testing.
    #[default]
    Homologation,
    /// Production environment.
    Production,
}

impl Environment {
    /// Returns the environment's LoginCms endpoint.
    #[must_use]
    pub fn login_url(self) -> &'static str {
        match self {
            Self::Homologation => HOMOLOGATION_LOGIN_URL,
            Self::Production => PRODUCTION_LOGIN_URL,
        }
    }
}

/// How the login request is placed in the CMS envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    /// The request is embedded in the signed-data structure. LoginCms reads
    /// the request from the envelope, so this is what it accepts.
    #[default]
    Attached,
    /// The signed-data structure carries only the signature.
    Detached,
}

/// Configuration for the ticket cache and its login transport.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use facturador_common_wsaa::{Environment, TicketCacheConfig};
///
/// let config = TicketCacheConfig::builder()
///     .environment(Environment::Production)
///     .ticket_dir("/var/lib/facturador/tickets")
///     .build()?;
/// assert_eq!(config.login_url(), "https://wsaa.afip.gov.ar/ws/services/LoginCms");
/// assert_eq!(config.safety_margin(), Duration::from_secs(300));
/// # Ok::<(), facturador_common_wsaa::TicketError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TicketCacheConfig {
    /// Authority environment.
    #[serde(default)]
    pub(crate) environment: Environment,

    /// Endpoint override, mainly for tests against a local server.
    #[serde(default)]
    pub(crate) endpoint: Option<String>,

    /// Bound on one login call.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub(crate) request_timeout: Duration,

    /// Remaining lifetime below which a ticket is treated as expired.
    #[serde(default = "default_safety_margin", with = "humantime_serde")]
    pub(crate) safety_margin: Duration,

    /// Lifetime requested in each login request.
    #[serde(default = "default_ticket_lifetime", with = "humantime_serde")]
    pub(crate) ticket_lifetime: Duration,

    /// Tickets held in memory.
    #[serde(default = "default_l1_capacity")]
    pub(crate) l1_capacity: u64,

    /// Directory of the durable ticket tier; `None` keeps tickets in memory
    /// only.
    #[serde(default)]
    pub(crate) ticket_dir: Option<PathBuf>,

    /// CMS envelope layout.
    #[serde(default)]
    pub(crate) signature_mode: SignatureMode,
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_safety_margin() -> Duration {
    DEFAULT_SAFETY_MARGIN
}

fn default_ticket_lifetime() -> Duration {
    DEFAULT_TICKET_LIFETIME
}

fn default_l1_capacity() -> u64 {
    DEFAULT_L1_CAPACITY
}

#[bon::bon]
impl TicketCacheConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if:
    /// - `request_timeout` is zero
    /// - `safety_margin` is not shorter than `ticket_lifetime`
    /// - `endpoint` is not an `https://` URL (plain `http://` is accepted for
    ///   loopback hosts only)
    #[builder]
    pub fn new(
        #[builder(default)] environment: Environment,
        #[builder(into)] endpoint: Option<String>,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default = DEFAULT_SAFETY_MARGIN)] safety_margin: Duration,
        #[builder(default = DEFAULT_TICKET_LIFETIME)] ticket_lifetime: Duration,
        #[builder(default = DEFAULT_L1_CAPACITY)] l1_capacity: u64,
        #[builder(into)] ticket_dir: Option<PathBuf>,
        #[builder(default)] signature_mode: SignatureMode,
    ) -> TicketResult<Self> {
        let config = Self {
            environment,
            endpoint,
            request_timeout,
            safety_margin,
            ticket_lifetime,
            l1_capacity,
            ticket_dir,
            signature_mode,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants enforced by [`new`](Self::new).
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] on the first violated invariant.
    pub fn validate(&self) -> TicketResult<()> {
        if self.request_timeout.is_zero() {
            return Err(TicketError::Config("request_timeout must be non-zero".into()));
        }
        if self.safety_margin >= self.ticket_lifetime {
            return Err(TicketError::Config(format!(
                "safety_margin ({:?}) must be shorter than ticket_lifetime ({:?})",
                self.safety_margin, self.ticket_lifetime
            )));
        }
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }

    /// Returns the environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns the LoginCms URL: the override if set, else the environment's.
    #[must_use]
    pub fn login_url(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(self.environment.login_url())
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the safety margin.
    #[must_use]
    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Returns the requested ticket lifetime.
    #[must_use]
    pub fn ticket_lifetime(&self) -> Duration {
        self.ticket_lifetime
    }

    /// Returns the in-memory ticket capacity.
    #[must_use]
    pub fn l1_capacity(&self) -> u64 {
        self.l1_capacity
    }

    /// Returns the durable tier directory.
    #[must_use]
    pub fn ticket_dir(&self) -> Option<&std::path::Path> {
        self.ticket_dir.as_deref()
    }

    /// Returns the CMS layout.
    #[must_use]
    pub fn signature_mode(&self) -> SignatureMode {
        self.signature_mode
    }
}

fn validate_endpoint(endpoint: &str) -> TicketResult<()> {
    let url = Url::parse(endpoint)
        .map_err(|error| TicketError::Config(format!("endpoint {endpoint:?} is not a URL: {error}")))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        scheme => Err(TicketError::Config(format!(
            "endpoint must use https (http only for loopback hosts), got {scheme}://"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost")
        || host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}
