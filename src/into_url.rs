use http::Uri;
use url::Url;

use crate::error;

/// A trait to try to convert some type into a `Url`.
///
/// This trait is "sealed", such that only types within this crate can
/// implement it.
pub trait IntoUrl: IntoUrlSealed {}

impl IntoUrl for Url {}
impl IntoUrl for String {}
impl IntoUrl for &Url {}
impl IntoUrl for &str {}
impl IntoUrl for &String {}

pub trait IntoUrlSealed {
    // Besides parsing as a valid `Url`, the `Url` must be a valid
    // `http::Uri`, in that it makes sense to use in a network request.
    fn into_url(self) -> crate::Result<Url>;

    fn as_str(&self) -> &str;
}

impl IntoUrlSealed for Url {
    fn into_url(self) -> crate::Result<Url> {
        // A connection only speaks http and https; anything else cannot be
        // dialed and is rejected up front.
        if self.has_host() && matches!(self.scheme(), "http" | "https") {
            Ok(self)
        } else {
            Err(error::url_bad_scheme(self))
        }
    }

    fn as_str(&self) -> &str {
        self.as_ref()
    }
}

impl IntoUrlSealed for &Url {
    fn into_url(self) -> crate::Result<Url> {
        self.clone().into_url()
    }

    fn as_str(&self) -> &str {
        self.as_ref()
    }
}

impl IntoUrlSealed for &str {
    fn into_url(self) -> crate::Result<Url> {
        Url::parse(self).map_err(error::builder)?.into_url()
    }

    fn as_str(&self) -> &str {
        self
    }
}

impl IntoUrlSealed for &String {
    fn into_url(self) -> crate::Result<Url> {
        (&**self).into_url()
    }

    fn as_str(&self) -> &str {
        self.as_ref()
    }
}

impl IntoUrlSealed for String {
    fn into_url(self) -> crate::Result<Url> {
        (&*self).into_url()
    }

    fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Convert an already-parsed `Url` into the `http::Uri` hyper expects.
pub(crate) fn expect_uri(url: &Url) -> crate::Result<Uri> {
    url.as_str()
        .parse()
        .map_err(|_| error::builder("url is not a valid uri"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_url_file_scheme() {
        let err = "file:///etc/hosts".into_url().unwrap_err();
        assert_eq!(
            err.to_string(),
            "builder error for url (file:///etc/hosts): URL scheme is not allowed"
        );
    }

    #[test]
    fn into_url_ssh_scheme() {
        let err = "ssh://git@example.local/repo.git".into_url().unwrap_err();
        assert!(err.is_builder());
    }

    #[test]
    fn into_url_accepts_http_and_https() {
        assert!("http://example.local/repo.git".into_url().is_ok());
        assert!("https://example.local/repo.git".into_url().is_ok());
    }

    #[test]
    fn expect_uri_roundtrip() {
        let url = Url::parse("https://example.local:8443/info/refs?service=x").unwrap();
        let uri = expect_uri(&url).unwrap();
        assert_eq!(uri.host(), Some("example.local"));
        assert_eq!(uri.port_u16(), Some(8443));
    }
}
