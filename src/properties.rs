//! Process-wide configuration properties.
//!
//! Proxy credentials are looked up through a [`PropertySource`] rather than
//! read from ambient global state, so the resolver can be exercised with
//! injected values. [`EnvProperties`] is the process-wide source used by
//! default; it reads the environment fresh on every call and never caches.

use std::collections::HashMap;

/// A read-only source of string properties.
pub trait PropertySource: Send + Sync {
    /// Look up a property by key, e.g. `http.proxyHost`.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads properties from the process environment.
///
/// No caching: every lookup goes to the environment, so external changes are
/// observed by the next request. Concurrent mutation of the environment while
/// a request is in flight is undefined, as with any environment read.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvProperties;

impl PropertySource for EnvProperties {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// An in-memory property source, mainly useful in tests and embedders that
/// manage their own configuration.
#[derive(Clone, Debug, Default)]
pub struct MapProperties {
    entries: HashMap<String, String>,
}

impl MapProperties {
    /// An empty property map.
    pub fn new() -> MapProperties {
        MapProperties::default()
    }

    /// Add a property, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> MapProperties {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }
}

impl PropertySource for MapProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_properties_roundtrip() {
        let props = MapProperties::new()
            .with("http.proxyHost", "proxy.local")
            .with("http.proxyPort", "3128");
        assert_eq!(props.get("http.proxyHost").as_deref(), Some("proxy.local"));
        assert_eq!(props.get("https.proxyHost"), None);
    }

    #[test]
    fn env_properties_reads_fresh() {
        let key = "git_http_hyper_test_property";
        std::env::set_var(key, "one");
        assert_eq!(EnvProperties.get(key).as_deref(), Some("one"));
        std::env::set_var(key, "two");
        assert_eq!(EnvProperties.get(key).as_deref(), Some("two"));
        std::env::remove_var(key);
        assert_eq!(EnvProperties.get(key), None);
    }
}
