//! Redirect handling.
//!
//! hyper does not follow redirects itself, so the bounded follow behavior
//! behind the connection's redirect flag lives here. The default policy
//! follows a chain of at most 10 hops; `none` disables following entirely.

use std::{error::Error as StdError, fmt};

use http::header::{
    HeaderMap, AUTHORIZATION, CONTENT_LENGTH, COOKIE, PROXY_AUTHORIZATION, TRANSFER_ENCODING,
    WWW_AUTHENTICATE,
};
use http::StatusCode;
use url::Url;

use crate::error::BoxError;

/// A type that controls the policy on how to handle the following of
/// redirects.
#[derive(Clone, Debug)]
pub struct Policy {
    inner: PolicyKind,
}

#[derive(Clone, Debug)]
enum PolicyKind {
    Limit(usize),
    None,
}

impl Policy {
    /// Create a `Policy` with a maximum number of redirects.
    ///
    /// A redirect error is returned if the max is reached.
    pub fn limited(max: usize) -> Policy {
        Policy {
            inner: PolicyKind::Limit(max),
        }
    }

    /// Create a `Policy` that does not follow any redirect.
    pub fn none() -> Policy {
        Policy {
            inner: PolicyKind::None,
        }
    }

    pub(crate) fn check(&self, _status: StatusCode, _next: &Url, previous: &[Url]) -> Action {
        match self.inner {
            PolicyKind::Limit(max) => {
                // The first entry in `previous` is the initial URL, not a hop.
                if previous.len() > max {
                    Action::Error(Box::new(TooManyRedirects))
                } else {
                    Action::Follow
                }
            }
            PolicyKind::None => Action::Stop,
        }
    }
}

impl Default for Policy {
    fn default() -> Policy {
        // Keep the default in sync with the doc comment above.
        Policy::limited(10)
    }
}

pub(crate) enum Action {
    Follow,
    Stop,
    Error(BoxError),
}

#[derive(Debug)]
struct TooManyRedirects;

impl fmt::Display for TooManyRedirects {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("too many redirects")
    }
}

impl StdError for TooManyRedirects {}

/// Strip credentials and body framing from headers carried into the next hop.
pub(crate) fn remove_sensitive_headers(headers: &mut HeaderMap, next: &Url, previous: &[Url]) {
    // Follow-up requests are always bodyless; framing headers from the
    // original request must not leak onto them.
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);

    if let Some(previous) = previous.last() {
        let cross_host = next.host_str() != previous.host_str()
            || next.port_or_known_default() != previous.port_or_known_default();
        if cross_host {
            headers.remove(AUTHORIZATION);
            headers.remove(COOKIE);
            headers.remove(PROXY_AUTHORIZATION);
            headers.remove(WWW_AUTHENTICATE);
        }
    }
}
