use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderValue, LOCATION, PROXY_AUTHORIZATION};
use http::uri::Scheme;
use http::{Method, Request, Response, StatusCode, Uri};
use hyper::Body;
use log::{debug, trace};
use url::Url;

use crate::connect::{Connector, ProxyServer};
use crate::error;
use crate::factory::ConnectionManagerFactory;
use crate::into_url::expect_uri;
use crate::redirect::{self, remove_sensitive_headers};
use crate::tls::{self, CertStore, HostnameVerifier, Identity};

/// Everything the runtime thread needs to assemble the underlying client.
/// Snapshotted from the connection's setters at first execution.
pub(crate) struct Config {
    pub(crate) proxy: Option<ProxyServer>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) redirect: redirect::Policy,
    pub(crate) identity: Option<Identity>,
    pub(crate) trust: Option<CertStore>,
    pub(crate) verifier: Option<Arc<dyn HostnameVerifier>>,
    pub(crate) manager: Option<Arc<dyn ConnectionManagerFactory>>,
}

#[derive(Clone)]
pub(crate) struct Client {
    hyper: hyper::Client<Connector, Body>,
    redirect: redirect::Policy,
    proxy_auth: Option<HeaderValue>,
    proxied: bool,
}

impl Client {
    pub(crate) fn new(config: Config) -> crate::Result<Client> {
        let tls = tls::client_config(config.identity, config.trust, config.verifier.clone())?;
        let connector = Connector::new(
            Arc::new(tls),
            config.proxy.clone(),
            config.connect_timeout,
            true,
        );

        let mut builder = hyper::Client::builder();
        if config.verifier.is_some() {
            // A custom hostname verifier gets its own connector and a fresh
            // pool; the shared connection manager is not consulted.
            trace!("custom hostname verifier set, using a dedicated pool");
        } else if let Some(ref manager) = config.manager {
            manager.configure(&mut builder);
        }

        Ok(Client {
            hyper: builder.build(connector),
            redirect: config.redirect,
            proxy_auth: config.proxy.as_ref().and_then(|p| p.auth.clone()),
            proxied: config.proxy.is_some(),
        })
    }

    pub(crate) async fn execute(
        &self,
        req: Request<Body>,
        has_body: bool,
    ) -> crate::Result<Response<Body>> {
        let (parts, first_body) = req.into_parts();
        let mut method = parts.method;
        let mut headers = parts.headers;
        let mut uri = parts.uri;
        let mut url = to_url(&uri)?;
        let mut body = Some(first_body);
        let mut urls = Vec::new();

        // Forwarded (non-tunneled) requests authenticate at the proxy with a
        // header on the request itself; tunnels carry it in CONNECT instead.
        if self.proxied && uri.scheme() == Some(&Scheme::HTTP) {
            if let Some(ref auth) = self.proxy_auth {
                headers
                    .entry(PROXY_AUTHORIZATION)
                    .or_insert_with(|| auth.clone());
            }
        }

        loop {
            let mut request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .body(body.take().unwrap_or_else(Body::empty))
                .map_err(error::builder)?;
            *request.headers_mut() = headers.clone();

            debug!("{} {}", request.method(), url);
            let res = self
                .hyper
                .request(request)
                .await
                .map_err(|e| error::request(e).with_url(url.clone()))?;

            let status = res.status();
            let follow = match status {
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                    if method != Method::GET && method != Method::HEAD {
                        method = Method::GET;
                    }
                    true
                }
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                    // The spooled request body is consumed by the first hop
                    // and cannot be replayed.
                    !has_body
                }
                _ => false,
            };

            if !follow {
                return Ok(res);
            }

            let loc = match res.headers().get(LOCATION).and_then(|l| l.to_str().ok()) {
                Some(loc) => loc,
                None => return Ok(res),
            };
            let next = url.join(loc).map_err(|e| error::redirect(e, url.clone()))?;

            urls.push(url.clone());
            match self.redirect.check(status, &next, &urls) {
                redirect::Action::Follow => {}
                redirect::Action::Stop => return Ok(res),
                redirect::Action::Error(e) => return Err(error::redirect(e, next)),
            }

            trace!("redirecting '{}' to '{}'", url, next);
            remove_sensitive_headers(&mut headers, &next, &urls);
            if next.scheme() == "https" {
                // A tunnel authenticates in CONNECT; never send the proxy
                // header to the destination server.
                headers.remove(PROXY_AUTHORIZATION);
            }
            uri = expect_uri(&next)?;
            url = next;
        }
    }
}

fn to_url(uri: &Uri) -> crate::Result<Url> {
    Url::parse(&uri.to_string()).map_err(error::builder)
}
