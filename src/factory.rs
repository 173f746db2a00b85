//! Connection factories.
//!
//! A transport stack asks a factory for one connection per request, sharing
//! a connection-manager factory (pool settings for the underlying client)
//! and a fixed connect timeout across all of them. NTLM credential
//! injection goes through the connection's capability query instead of a
//! process-global hook: the factory asks the connection whether it accepts
//! injected credentials and hands them over only if it does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::connection::{HttpConnection, HyperConnection};
use crate::credentials::{AuthScope, Credentials, CredentialsProvider};
use crate::proxy::Proxy;

/// Produces configured [`HttpConnection`] instances for a transport stack.
pub trait HttpConnectionFactory: Send + Sync {
    /// A direct connection to `url`.
    fn create(&self, url: &Url) -> crate::Result<Box<dyn HttpConnection>>;

    /// A connection to `url` through `proxy`.
    fn create_with_proxy(
        &self,
        url: &Url,
        proxy: Proxy,
    ) -> crate::Result<Box<dyn HttpConnection>>;
}

/// Seeds the underlying client's connection pool for each new connection.
///
/// The hyper client builder stands in for the wrapped library's connection
/// manager; embedders tune pooling by configuring it here.
pub trait ConnectionManagerFactory: Send + Sync {
    /// Apply pool settings to the client builder used for a new connection.
    fn configure(&self, builder: &mut hyper::client::Builder);
}

/// The hyper-backed [`HttpConnectionFactory`].
pub struct HyperConnectionFactory {
    manager: Option<Arc<dyn ConnectionManagerFactory>>,
    connect_timeout: Duration,
}

impl HyperConnectionFactory {
    /// A factory with no shared connection manager and no fixed connect
    /// timeout (connections stay settable).
    pub fn new() -> HyperConnectionFactory {
        HyperConnectionFactory {
            manager: None,
            connect_timeout: Duration::ZERO,
        }
    }

    /// A factory sharing `manager` across its connections.
    pub fn with_manager(manager: Arc<dyn ConnectionManagerFactory>) -> HyperConnectionFactory {
        HyperConnectionFactory {
            manager: Some(manager),
            connect_timeout: Duration::ZERO,
        }
    }

    /// Fix the connect timeout for every produced connection. A non-zero
    /// value freezes it against later setter calls on the connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> HyperConnectionFactory {
        self.connect_timeout = timeout;
        self
    }

    /// Inject NTLM credentials into a connection, if it supports credential
    /// injection.
    ///
    /// Returns whether the connection accepted them. The credentials are
    /// carried in the connection's execution context for the transport's
    /// authentication negotiation; the handshake itself is not performed
    /// here.
    pub fn configure_ntlm(
        conn: &mut dyn HttpConnection,
        username: &str,
        password: &str,
        domain: Option<&str>,
    ) -> bool {
        match conn.credentials_sink() {
            Some(sink) => {
                let mut provider = CredentialsProvider::new();
                provider.insert(
                    AuthScope::Any,
                    Credentials::ntlm(username, password, domain.map(str::to_owned)),
                );
                sink.set_credentials_provider(provider);
                true
            }
            None => false,
        }
    }
}

impl Default for HyperConnectionFactory {
    fn default() -> HyperConnectionFactory {
        HyperConnectionFactory::new()
    }
}

impl HttpConnectionFactory for HyperConnectionFactory {
    fn create(&self, url: &Url) -> crate::Result<Box<dyn HttpConnection>> {
        self.create_with_proxy(url, Proxy::Direct)
    }

    fn create_with_proxy(
        &self,
        url: &Url,
        proxy: Proxy,
    ) -> crate::Result<Box<dyn HttpConnection>> {
        let conn =
            HyperConnection::with_manager(url, self.connect_timeout, proxy, self.manager.clone())?;
        Ok(Box::new(conn))
    }
}

impl fmt::Debug for HyperConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HyperConnectionFactory")
            .field("connect_timeout", &self.connect_timeout)
            .field("manager", &self.manager.is_some())
            .finish()
    }
}
