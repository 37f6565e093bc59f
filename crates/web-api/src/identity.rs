//! Viewer resolution for incoming connections.
//!
//! Authentication is out of scope for this service; whatever sits in front of
//! it is trusted to set the owner header.

use axum::http::{HeaderMap, HeaderName};
use parlay_core::Viewer;

pub const OWNER_HEADER: &str = "x-parlay-owner";

pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Viewer;
}

/// Reads the owner id from a request header. Missing, empty or non-UTF-8
/// values resolve to [`Viewer::Anonymous`].
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    #[must_use]
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderIdentity {
    fn default() -> Self {
        Self::new(HeaderName::from_static(OWNER_HEADER))
    }
}

impl IdentityProvider for HeaderIdentity {
    fn resolve(&self, headers: &HeaderMap) -> Viewer {
        headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map_or(Viewer::Anonymous, |owner| Viewer::Owner(owner.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn owner_header_resolves_owner() {
        let mut headers = HeaderMap::new();
        headers.insert(OWNER_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(
            HeaderIdentity::default().resolve(&headers),
            Viewer::Owner("alice".to_string())
        );
    }

    #[test]
    fn missing_or_blank_header_is_anonymous() {
        let identity = HeaderIdentity::default();
        assert_eq!(identity.resolve(&HeaderMap::new()), Viewer::Anonymous);

        let mut headers = HeaderMap::new();
        headers.insert(OWNER_HEADER, HeaderValue::from_static("   "));
        assert_eq!(identity.resolve(&headers), Viewer::Anonymous);
    }

    #[test]
    fn custom_header_name() {
        let identity = HeaderIdentity::new(HeaderName::from_static("x-user"));
        let mut headers = HeaderMap::new();
        headers.insert("x-user", HeaderValue::from_static("bob"));
        headers.insert(OWNER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(identity.resolve(&headers), Viewer::Owner("bob".to_string()));
    }
}
