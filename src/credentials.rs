//! Per-request credential state.
//!
//! An [`ExecutionContext`] carries credentials across a single
//! request/response cycle, the way the underlying client's request context
//! would. Credentials are registered under an [`AuthScope`] and looked up by
//! the host/port the request (or its proxy) targets.

use std::fmt;

use http::HeaderValue;

use crate::util;

/// The host/port scope a set of credentials applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AuthScope {
    /// Credentials valid for any host and port.
    Any,
    /// Credentials valid for one host/port pair.
    HostPort {
        /// Host the credentials are scoped to.
        host: String,
        /// Port the credentials are scoped to.
        port: u16,
    },
}

impl AuthScope {
    /// A scope covering a single host/port pair.
    pub fn host_port(host: impl Into<String>, port: u16) -> AuthScope {
        AuthScope::HostPort {
            host: host.into(),
            port,
        }
    }

    fn matches(&self, host: &str, port: u16) -> bool {
        match self {
            AuthScope::Any => true,
            AuthScope::HostPort { host: h, port: p } => h.eq_ignore_ascii_case(host) && *p == port,
        }
    }
}

/// A set of credentials that can be attached to an [`AuthScope`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username/password, sent as an RFC 7617 `Basic` header.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// NTLM credentials. The adapter only carries these for the surrounding
    /// transport's negotiation; it never performs the challenge-response
    /// handshake itself.
    Ntlm {
        /// User name.
        username: String,
        /// Password.
        password: String,
        /// Windows domain, if any.
        domain: Option<String>,
    },
}

impl Credentials {
    /// Basic credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Credentials {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// NTLM credentials.
    pub fn ntlm(
        username: impl Into<String>,
        password: impl Into<String>,
        domain: Option<String>,
    ) -> Credentials {
        Credentials::Ntlm {
            username: username.into(),
            password: password.into(),
            domain,
        }
    }

    /// The `Basic` authorization header for these credentials, if they are
    /// expressible as one.
    pub(crate) fn basic_header(&self) -> Option<HeaderValue> {
        match self {
            Credentials::Basic { username, password } => {
                Some(util::basic_auth(username, Some(password)))
            }
            Credentials::Ntlm { .. } => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"..")
                .finish(),
            Credentials::Ntlm {
                username, domain, ..
            } => f
                .debug_struct("Ntlm")
                .field("username", username)
                .field("password", &"..")
                .field("domain", domain)
                .finish(),
        }
    }
}

/// An ordered set of scoped credentials.
///
/// Inserting under an existing scope replaces that entry; lookups prefer a
/// host/port match over [`AuthScope::Any`].
#[derive(Clone, Debug, Default)]
pub struct CredentialsProvider {
    entries: Vec<(AuthScope, Credentials)>,
}

impl CredentialsProvider {
    /// An empty provider.
    pub fn new() -> CredentialsProvider {
        CredentialsProvider::default()
    }

    /// Register credentials for a scope, replacing any previous entry for
    /// the same scope.
    pub fn insert(&mut self, scope: AuthScope, credentials: Credentials) {
        if let Some(entry) = self.entries.iter_mut().find(|(s, _)| *s == scope) {
            entry.1 = credentials;
        } else {
            self.entries.push((scope, credentials));
        }
    }

    /// Look up credentials for a host/port pair.
    pub fn lookup(&self, host: &str, port: u16) -> Option<&Credentials> {
        self.entries
            .iter()
            .find(|(s, _)| matches!(s, AuthScope::HostPort { .. }) && s.matches(host, port))
            .or_else(|| self.entries.iter().find(|(s, _)| s.matches(host, port)))
            .map(|(_, c)| c)
    }

    /// Whether the provider holds no credentials.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of scoped entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-request scope carrying credentials across a single request/response
/// cycle.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    credentials: Option<CredentialsProvider>,
}

impl ExecutionContext {
    /// A fresh context with no credentials.
    pub fn new() -> ExecutionContext {
        ExecutionContext::default()
    }

    /// The context's credentials provider, if one was installed.
    pub fn credentials_provider(&self) -> Option<&CredentialsProvider> {
        self.credentials.as_ref()
    }

    /// Install a credentials provider, replacing any existing one.
    pub fn set_credentials_provider(&mut self, provider: CredentialsProvider) {
        self.credentials = Some(provider);
    }

    /// The context's credentials provider, installing an empty one first if
    /// none is present. Merging entry points use this so existing
    /// credentials survive.
    pub fn ensure_credentials_provider(&mut self) -> &mut CredentialsProvider {
        self.credentials.get_or_insert_with(CredentialsProvider::new)
    }
}
