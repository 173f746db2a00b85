#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

//! # git-http-hyper
//!
//! An adapter implementing the HTTP connection abstraction used by a
//! version-control smart-HTTP transport on top of [hyper].
//!
//! The transport drives a narrow, blocking interface: pick a method, add
//! headers, optionally stream a request body, execute, read the response.
//! This crate translates those calls onto hyper's client, lazily building it
//! on a dedicated runtime thread with whatever TLS, proxy and timeout
//! settings were configured before the first round-trip. Each connection
//! issues exactly one request; the response is cached so every later
//! accessor answers without touching the network again.
//!
//! ## Making a request
//!
//! ```no_run
//! use std::io::Read;
//! use std::time::Duration;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use git_http_hyper::{HttpConnection, HyperConnection};
//!
//! let mut conn = HyperConnection::new(
//!     "https://example.com/repo.git/info/refs?service=git-upload-pack",
//!     Duration::from_secs(30),
//! )?;
//! conn.add_request_header("Accept", "application/x-git-upload-pack-advertisement")?;
//! conn.connect()?;
//!
//! println!("{}", conn.response_code()?);
//! let mut body = String::new();
//! conn.input_stream()?.read_to_string(&mut body)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Factories
//!
//! Transports that open many connections go through a
//! [`HyperConnectionFactory`], which shares a [`ConnectionManagerFactory`]
//! (pool tuning for the underlying client) and a fixed connect timeout
//! across every connection it creates.
//!
//! ## Proxies
//!
//! A connection handed a [`Proxy`] resolves credentials for it from the
//! `<scheme>.proxyHost` / `proxyPort` / `proxyUser` / `proxyPassword`
//! properties of its [`PropertySource`] (the process environment by
//! default) and authenticates at the proxy with them; https targets are
//! reached through a CONNECT tunnel.
//!
//! [hyper]: https://hyper.rs

mod client;
mod connect;
mod connection;
mod error;
mod factory;
mod handle;
mod into_url;
mod properties;
mod spool;
mod util;
mod wait;

pub mod credentials;
pub mod proxy;
pub mod redirect;
pub mod tls;

pub use http::{Method, StatusCode};
pub use url::Url;

pub use self::connection::{CredentialsSink, HttpConnection, HyperConnection};
pub use self::credentials::{
    AuthScope, Credentials, CredentialsProvider, ExecutionContext,
};
pub use self::error::{Error, Result};
pub use self::factory::{
    ConnectionManagerFactory, HttpConnectionFactory, HyperConnectionFactory,
};
pub use self::into_url::IntoUrl;
pub use self::properties::{EnvProperties, MapProperties, PropertySource};
pub use self::proxy::{install_proxy_credentials, Proxy};
pub use self::spool::Spool;
pub use self::tls::{CertStore, Certificate, HostnameVerifier, Identity};
