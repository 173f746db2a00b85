//! Proxy configuration and proxy credential resolution.
//!
//! A connection is handed a [`Proxy`] by the transport that created it.
//! `Proxy::Direct` is the "no proxy" sentinel: the connection dials the
//! target itself. When a real proxy is configured, the credentials for it
//! are resolved from four process-wide properties keyed by the target URL's
//! scheme, the same shape the JVM-style `<scheme>.proxyHost` family uses:
//!
//! - `<scheme>.proxyHost`
//! - `<scheme>.proxyPort`
//! - `<scheme>.proxyUser`
//! - `<scheme>.proxyPassword`
//!
//! All four must resolve for credentials to be installed; there is no
//! partial-credential fallback.

use log::{debug, trace};

use crate::credentials::{AuthScope, Credentials, ExecutionContext};
use crate::properties::PropertySource;

/// Where a connection's traffic should go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proxy {
    /// The "no proxy" sentinel: connect directly to the target.
    Direct,
    /// An HTTP proxy. Plain requests are forwarded in absolute form;
    /// https targets are reached through a CONNECT tunnel.
    Http {
        /// Proxy host name or address.
        host: String,
        /// Proxy port.
        port: u16,
    },
}

impl Proxy {
    /// An HTTP proxy at `host:port`.
    pub fn http(host: impl Into<String>, port: u16) -> Proxy {
        Proxy::Http {
            host: host.into(),
            port,
        }
    }

    /// Whether this is the direct (no proxy) sentinel.
    pub fn is_direct(&self) -> bool {
        matches!(self, Proxy::Direct)
    }

    pub(crate) fn host_port(&self) -> Option<(&str, u16)> {
        match self {
            Proxy::Direct => None,
            Proxy::Http { host, port } => Some((host, *port)),
        }
    }
}

/// Resolve proxy credentials for `scheme` from `properties` and install them
/// into `context`.
///
/// If `<scheme>.proxyHost`, `.proxyPort`, `.proxyUser` and `.proxyPassword`
/// all resolve, Basic credentials scoped to that host/port are merged into
/// the context's credentials provider, preserving any entries already
/// present. If any of the four is missing the context is left untouched. A
/// port value that does not parse counts as missing.
pub fn install_proxy_credentials(
    context: &mut ExecutionContext,
    properties: &dyn PropertySource,
    scheme: &str,
) {
    let scheme = scheme.to_ascii_lowercase();

    let host = properties.get(&format!("{}.proxyHost", scheme));
    let port = properties
        .get(&format!("{}.proxyPort", scheme))
        .and_then(|p| p.trim().parse::<u16>().ok());
    let user = properties.get(&format!("{}.proxyUser", scheme));
    let password = properties.get(&format!("{}.proxyPassword", scheme));

    match (host, port, user, password) {
        (Some(host), Some(port), Some(user), Some(password)) => {
            debug!("installing {}.proxy credentials for {}:{}", scheme, host, port);
            context.ensure_credentials_provider().insert(
                AuthScope::host_port(host, port),
                Credentials::basic(user, password),
            );
        }
        _ => {
            trace!("no complete {}.proxy credential set", scheme);
        }
    }
}
