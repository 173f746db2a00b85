//! The connection seam consumed by the transport stack.
//!
//! A [`HyperConnection`] is configured through setters, executes exactly one
//! request the first time anything needs a response, and answers every later
//! accessor from the cached result. The underlying hyper client is built
//! lazily on a dedicated runtime thread when that first execution happens,
//! with whatever proxy, TLS, timeout and pool settings have accumulated by
//! then.

use std::cmp;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use hyper::body::HttpBody;
use hyper::Body;
use url::Url;

use crate::client::Config;
use crate::connect::ProxyServer;
use crate::credentials::{CredentialsProvider, ExecutionContext};
use crate::error;
use crate::factory::ConnectionManagerFactory;
use crate::handle::{ClientHandle, KeepThreadAlive};
use crate::into_url::{expect_uri, IntoUrl};
use crate::properties::{EnvProperties, PropertySource};
use crate::proxy::{install_proxy_credentials, Proxy};
use crate::redirect;
use crate::spool::Spool;
use crate::tls::{CertStore, HostnameVerifier, Identity};

/// The narrow HTTP connection interface the surrounding transport drives.
///
/// One instance, one request: configure, execute (at most once), read the
/// response, discard. Accessors that need a response trigger execution on
/// first use; afterwards they answer from the cached response.
pub trait HttpConnection: fmt::Debug + Send {
    /// The URL this connection will request.
    fn url(&self) -> &Url;

    /// Select the request method. Supported verbs are `GET`, `HEAD`, `POST`
    /// and `PUT` (case-insensitive); anything else is an immediate
    /// configuration error and leaves the method unset.
    fn set_request_method(&mut self, method: &str) -> crate::Result<()>;

    /// The currently selected request method, if one is set.
    fn request_method(&self) -> Option<&Method>;

    /// Append a request header. Repeated names accumulate.
    fn add_request_header(&mut self, name: &str, value: &str) -> crate::Result<()>;

    /// Set the connect timeout.
    ///
    /// A positive timeout supplied at construction wins: in that case this
    /// call is deliberately a no-op, so a transport that unconditionally
    /// calls it cannot override the embedder's choice. Constructing with a
    /// zero timeout leaves the value open to this setter.
    fn set_connect_timeout(&mut self, timeout: Duration);

    /// Set the timeout applied while waiting for the response and while
    /// reading its body.
    fn set_read_timeout(&mut self, timeout: Duration);

    /// Enable or disable following redirects. Enabled by default, with a
    /// bounded chain.
    fn set_follow_redirects(&mut self, follow: bool);

    /// Attach a fixed-length request body buffer. Fails if a body buffer is
    /// already attached.
    fn set_fixed_length_streaming_mode(&mut self, len: u64) -> crate::Result<()>;

    /// Mark the request body for chunked transfer encoding, creating the
    /// body buffer if none exists yet.
    fn set_chunked_streaming_mode(&mut self);

    /// Writable sink for the request body, creating the buffer on demand.
    /// Bytes spill to a temporary file past the in-core limit.
    fn output_stream(&mut self) -> crate::Result<&mut dyn Write>;

    /// Execute the request if it has not executed yet.
    fn connect(&mut self) -> crate::Result<()>;

    /// Response status code.
    fn response_code(&mut self) -> crate::Result<StatusCode>;

    /// Canonical reason phrase for the response status.
    fn response_message(&mut self) -> crate::Result<String>;

    /// First value of a response header.
    fn header_field(&mut self, name: &str) -> crate::Result<Option<String>>;

    /// All values of a response header.
    fn header_fields(&mut self, name: &str) -> crate::Result<Vec<String>>;

    /// All response headers, name to values.
    fn header_map(&mut self) -> crate::Result<HashMap<String, Vec<String>>>;

    /// The response `Content-Type`, if any.
    fn content_type(&mut self) -> crate::Result<Option<String>>;

    /// The response `Content-Length`. Missing, negative and malformed
    /// values all read as `None`.
    fn content_length(&mut self) -> crate::Result<Option<u64>>;

    /// Streaming reader over the response body. Can be taken once.
    fn input_stream(&mut self) -> crate::Result<Box<dyn Read + Send>>;

    /// Replace hostname verification for this connection. Chain validation
    /// against the trust store still runs; installing a verifier also gives
    /// the connection a dedicated TLS connector and a fresh pool.
    fn set_hostname_verifier(&mut self, verifier: Arc<dyn HostnameVerifier>);

    /// Supply client key material and/or server trust material for TLS.
    fn configure_tls(&mut self, identity: Option<Identity>, trust: Option<CertStore>);

    /// Whether the executed request went through a proxy.
    fn using_proxy(&self) -> bool;

    /// Capability query: the credential-injection seam, if this connection
    /// supports one. The factory uses this to inject NTLM credentials
    /// without a global hook.
    fn credentials_sink(&mut self) -> Option<&mut dyn CredentialsSink> {
        None
    }
}

/// Capability interface for connections that accept injected credentials.
pub trait CredentialsSink {
    /// Install the credentials provider consulted when the request executes.
    fn set_credentials_provider(&mut self, provider: CredentialsProvider);
}

/// An [`HttpConnection`] implemented over hyper.
pub struct HyperConnection {
    url: Url,
    proxy: Proxy,
    method: Option<Method>,
    headers: HeaderMap,
    connect_timeout: Option<Duration>,
    connect_timeout_frozen: bool,
    read_timeout: Option<Duration>,
    follow_redirects: bool,
    spool: Option<Spool>,
    identity: Option<Identity>,
    trust: Option<CertStore>,
    verifier: Option<Arc<dyn HostnameVerifier>>,
    credentials: Option<CredentialsProvider>,
    properties: Arc<dyn PropertySource>,
    manager: Option<Arc<dyn ConnectionManagerFactory>>,
    using_proxy: bool,
    handle: Option<ClientHandle>,
    response: Option<CachedResponse>,
}

impl HyperConnection {
    /// A direct connection to `url`.
    ///
    /// A non-zero `connect_timeout` is frozen: later
    /// [`set_connect_timeout`](HttpConnection::set_connect_timeout) calls
    /// are ignored. Pass `Duration::ZERO` to leave the timeout settable.
    pub fn new<U: IntoUrl>(url: U, connect_timeout: Duration) -> crate::Result<HyperConnection> {
        HyperConnection::with_proxy(url, connect_timeout, Proxy::Direct)
    }

    /// A connection to `url` through `proxy`.
    pub fn with_proxy<U: IntoUrl>(
        url: U,
        connect_timeout: Duration,
        proxy: Proxy,
    ) -> crate::Result<HyperConnection> {
        HyperConnection::with_manager(url, connect_timeout, proxy, None)
    }

    /// A connection sharing a caller-supplied connection manager factory,
    /// which seeds the underlying client's pool settings.
    pub fn with_manager<U: IntoUrl>(
        url: U,
        connect_timeout: Duration,
        proxy: Proxy,
        manager: Option<Arc<dyn ConnectionManagerFactory>>,
    ) -> crate::Result<HyperConnection> {
        let url = url.into_url()?;
        let frozen = connect_timeout > Duration::ZERO;
        Ok(HyperConnection {
            url,
            proxy,
            method: Some(Method::GET),
            headers: HeaderMap::new(),
            connect_timeout: frozen.then_some(connect_timeout),
            connect_timeout_frozen: frozen,
            read_timeout: None,
            follow_redirects: true,
            spool: None,
            identity: None,
            trust: None,
            verifier: None,
            credentials: None,
            properties: Arc::new(EnvProperties),
            manager,
            using_proxy: false,
            handle: None,
            response: None,
        })
    }

    /// The effective connect timeout.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// The effective read timeout.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Replace the property source proxy credentials are resolved from.
    /// Defaults to the process environment.
    pub fn set_property_source(&mut self, properties: Arc<dyn PropertySource>) {
        self.properties = properties;
    }

    fn response(&mut self) -> crate::Result<&mut CachedResponse> {
        if self.response.is_none() {
            self.do_execute()?;
        }
        Ok(self.response.as_mut().expect("response cached by execute"))
    }

    fn do_execute(&mut self) -> crate::Result<()> {
        let method = match self.method.clone() {
            Some(method) => method,
            None => return Err(error::builder("request method not set")),
        };

        // Per-request execution context: whatever the factory injected
        // through the credentials sink, plus proxy credentials resolved from
        // the configured properties for the target scheme.
        let mut context = ExecutionContext::new();
        if let Some(ref provider) = self.credentials {
            context.set_credentials_provider(provider.clone());
        }

        let mut proxy_server = None;
        if let Some((host, port)) = self.proxy.host_port() {
            self.using_proxy = true;
            install_proxy_credentials(&mut context, self.properties.as_ref(), self.url.scheme());
            let auth = context
                .credentials_provider()
                .and_then(|p| p.lookup(host, port))
                .and_then(|c| c.basic_header());
            proxy_server = Some(ProxyServer::new(host, port, auth)?);
        }

        // The body buffer is consumed here no matter what happens next;
        // dropping it releases the backing temporary file.
        let takes_body = method == Method::POST || method == Method::PUT;
        let (content_length, body, has_body) = match self.spool.take() {
            Some(spool) if takes_body => {
                let (len, body) = spool.into_body()?;
                (len, body, true)
            }
            _ => (None, Body::empty(), false),
        };

        let uri = expect_uri(&self.url)?;
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .map_err(error::builder)?;
        *req.headers_mut() = self.headers.clone();
        if let Some(len) = content_length {
            req.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        }

        if self.handle.is_none() {
            let config = Config {
                proxy: proxy_server,
                connect_timeout: self.connect_timeout,
                redirect: if self.follow_redirects {
                    redirect::Policy::default()
                } else {
                    redirect::Policy::none()
                },
                identity: self.identity.take(),
                trust: self.trust.take(),
                verifier: self.verifier.clone(),
                manager: self.manager.clone(),
            };
            self.handle = Some(ClientHandle::new(config)?);
        }
        let handle = self.handle.as_ref().expect("client handle just created");

        let res = handle.execute(req, has_body, self.read_timeout, &self.url)?;
        let (parts, body) = res.into_parts();
        self.response = Some(CachedResponse {
            status: parts.status,
            headers: parts.headers,
            body: Some(BodyReader {
                body,
                chunk: None,
                timeout: self.read_timeout,
                _thread: handle.keep_alive(),
            }),
        });
        Ok(())
    }
}

impl HttpConnection for HyperConnection {
    fn url(&self) -> &Url {
        &self.url
    }

    fn set_request_method(&mut self, method: &str) -> crate::Result<()> {
        let parsed = match method {
            m if m.eq_ignore_ascii_case("GET") => Method::GET,
            m if m.eq_ignore_ascii_case("HEAD") => Method::HEAD,
            m if m.eq_ignore_ascii_case("POST") => Method::POST,
            m if m.eq_ignore_ascii_case("PUT") => Method::PUT,
            other => {
                self.method = None;
                return Err(error::builder(format!(
                    "unsupported request method {:?}",
                    other
                )));
            }
        };
        self.method = Some(parsed);
        Ok(())
    }

    fn request_method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    fn add_request_header(&mut self, name: &str, value: &str) -> crate::Result<()> {
        let name = name.parse::<HeaderName>().map_err(error::builder)?;
        let value = HeaderValue::from_str(value).map_err(error::builder)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn set_connect_timeout(&mut self, timeout: Duration) {
        if self.connect_timeout_frozen {
            return;
        }
        self.connect_timeout = Some(timeout);
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = Some(timeout);
    }

    fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = follow;
    }

    fn set_fixed_length_streaming_mode(&mut self, len: u64) -> crate::Result<()> {
        if self.spool.is_some() {
            return Err(error::builder("request body already attached"));
        }
        let mut spool = Spool::new();
        spool.set_declared_len(len);
        self.spool = Some(spool);
        Ok(())
    }

    fn set_chunked_streaming_mode(&mut self) {
        self.spool.get_or_insert_with(Spool::new).set_chunked();
    }

    fn output_stream(&mut self) -> crate::Result<&mut dyn Write> {
        Ok(self.spool.get_or_insert_with(Spool::new))
    }

    fn connect(&mut self) -> crate::Result<()> {
        self.response()?;
        Ok(())
    }

    fn response_code(&mut self) -> crate::Result<StatusCode> {
        Ok(self.response()?.status)
    }

    fn response_message(&mut self) -> crate::Result<String> {
        let status = self.response()?.status;
        Ok(status.canonical_reason().unwrap_or("").to_owned())
    }

    fn header_field(&mut self, name: &str) -> crate::Result<Option<String>> {
        let response = self.response()?;
        Ok(response
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned))
    }

    fn header_fields(&mut self, name: &str) -> crate::Result<Vec<String>> {
        let response = self.response()?;
        Ok(response
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect())
    }

    fn header_map(&mut self) -> crate::Result<HashMap<String, Vec<String>>> {
        let response = self.response()?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers.iter() {
            if let Ok(value) = value.to_str() {
                map.entry(name.as_str().to_owned())
                    .or_default()
                    .push(value.to_owned());
            }
        }
        Ok(map)
    }

    fn content_type(&mut self) -> crate::Result<Option<String>> {
        let response = self.response()?;
        Ok(response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned))
    }

    fn content_length(&mut self) -> crate::Result<Option<u64>> {
        let response = self.response()?;
        Ok(parse_content_length(&response.headers))
    }

    fn input_stream(&mut self) -> crate::Result<Box<dyn Read + Send>> {
        let response = self.response()?;
        match response.body.take() {
            Some(reader) => Ok(Box::new(reader)),
            None => Err(error::body("response body already taken")),
        }
    }

    fn set_hostname_verifier(&mut self, verifier: Arc<dyn HostnameVerifier>) {
        self.verifier = Some(verifier);
    }

    fn configure_tls(&mut self, identity: Option<Identity>, trust: Option<CertStore>) {
        if identity.is_some() {
            self.identity = identity;
        }
        if trust.is_some() {
            self.trust = trust;
        }
    }

    fn using_proxy(&self) -> bool {
        self.using_proxy
    }

    fn credentials_sink(&mut self) -> Option<&mut dyn CredentialsSink> {
        Some(self)
    }
}

impl CredentialsSink for HyperConnection {
    fn set_credentials_provider(&mut self, provider: CredentialsProvider) {
        self.credentials = Some(provider);
    }
}

impl fmt::Debug for HyperConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HyperConnection")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("proxy", &self.proxy)
            .field("executed", &self.response.is_some())
            .finish()
    }
}

struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<BodyReader>,
}

/// Blocking reader over the streaming response body. Holds the runtime
/// thread alive until dropped.
struct BodyReader {
    body: Body,
    chunk: Option<Bytes>,
    timeout: Option<Duration>,
    _thread: KeepThreadAlive,
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(ref mut chunk) = self.chunk {
                if chunk.has_remaining() {
                    let n = cmp::min(chunk.remaining(), buf.len());
                    chunk.copy_to_slice(&mut buf[..n]);
                    return Ok(n);
                }
                self.chunk = None;
            }

            let timeout = self.timeout;
            let body = &mut self.body;
            match crate::wait::timeout(async { body.data().await.transpose() }, timeout) {
                Ok(Some(chunk)) => self.chunk = Some(chunk),
                Ok(None) => return Ok(0),
                Err(crate::wait::Waited::TimedOut(e)) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, e.to_string()))
                }
                Err(crate::wait::Waited::Inner(e)) => {
                    return Err(io::Error::new(io::ErrorKind::Other, e))
                }
            }
        }
    }
}

fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_LENGTH)?;
    let value = value.to_str().ok()?;
    // A negative or malformed value degrades to "unknown", it never raises.
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> HyperConnection {
        HyperConnection::new("http://example.local/info/refs", Duration::ZERO).unwrap()
    }

    #[test]
    fn constructor_timeout_wins() {
        let mut conn =
            HyperConnection::new("http://example.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(conn.connect_timeout(), Some(Duration::from_secs(5)));

        conn.set_connect_timeout(Duration::from_secs(1));
        assert_eq!(conn.connect_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_constructor_timeout_stays_settable() {
        let mut conn = connection();
        assert_eq!(conn.connect_timeout(), None);

        conn.set_connect_timeout(Duration::from_secs(1));
        assert_eq!(conn.connect_timeout(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn unsupported_method_unsets_method() {
        let mut conn = connection();
        assert_eq!(conn.request_method(), Some(&Method::GET));

        let err = conn.set_request_method("TRACE").unwrap_err();
        assert!(err.is_builder());
        assert_eq!(conn.request_method(), None);

        conn.set_request_method("post").unwrap();
        assert_eq!(conn.request_method(), Some(&Method::POST));
    }

    #[test]
    fn second_body_attachment_fails() {
        let mut conn = connection();
        conn.output_stream().unwrap().write_all(b"data").unwrap();

        let err = conn.set_fixed_length_streaming_mode(4).unwrap_err();
        assert!(err.is_builder());
    }

    #[test]
    fn chunked_mode_reuses_existing_buffer() {
        let mut conn = connection();
        conn.set_fixed_length_streaming_mode(4).unwrap();
        // switching an existing buffer to chunked is not an error
        conn.set_chunked_streaming_mode();
    }

    #[test]
    fn content_length_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_content_length(&headers), None);

        headers.insert(CONTENT_LENGTH, "42".parse().unwrap());
        assert_eq!(parse_content_length(&headers), Some(42));

        headers.insert(CONTENT_LENGTH, "-5".parse().unwrap());
        assert_eq!(parse_content_length(&headers), None);

        headers.insert(CONTENT_LENGTH, "banana".parse().unwrap());
        assert_eq!(parse_content_length(&headers), None);
    }

    #[test]
    fn credentials_sink_capability_is_present() {
        let mut conn = connection();
        assert!(conn.credentials_sink().is_some());
    }
}
