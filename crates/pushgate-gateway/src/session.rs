use axum::http::{header, HeaderMap};
use serde::Deserialize;

/// Cookie carrying the authenticated identity, set by the host
/// application's session layer. Its value is opaque to the gateway.
pub const IDENTITY_COOKIE: &str = "pushgate_id";

/// Query parameters accepted by /events. The identity fallback exists
/// for load-test clients that do not manage cookies.
#[derive(Debug, Deserialize, Default)]
pub struct SessionQuery {
    pub identity: Option<String>,
}

/// Resolve the caller's identity from session state. Returns None for
/// anonymous, broadcast-only clients.
pub fn resolve_identity(headers: &HeaderMap, query: &SessionQuery) -> Option<String> {
    if let Some(identity) = cookie_value(headers, IDENTITY_COOKIE) {
        return Some(identity);
    }
    query.identity.clone().filter(|s| !s.is_empty())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        if parts.next() == Some(name) {
            let value = parts.next().unwrap_or("");
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn no_session_means_anonymous() {
        let identity = resolve_identity(&HeaderMap::new(), &SessionQuery::default());
        assert_eq!(identity, None);
    }

    #[test]
    fn identity_from_cookie() {
        let headers = headers_with_cookie("pushgate_id=alice");
        let identity = resolve_identity(&headers, &SessionQuery::default());
        assert_eq!(identity.as_deref(), Some("alice"));
    }

    #[test]
    fn cookie_found_among_others() {
        let headers = headers_with_cookie("theme=dark; pushgate_id=bob; lang=en");
        let identity = resolve_identity(&headers, &SessionQuery::default());
        assert_eq!(identity.as_deref(), Some("bob"));
    }

    #[test]
    fn empty_cookie_value_is_anonymous() {
        let headers = headers_with_cookie("pushgate_id=");
        let identity = resolve_identity(&headers, &SessionQuery::default());
        assert_eq!(identity, None);
    }

    #[test]
    fn query_fallback_when_no_cookie() {
        let query = SessionQuery {
            identity: Some("carol".into()),
        };
        let identity = resolve_identity(&HeaderMap::new(), &query);
        assert_eq!(identity.as_deref(), Some("carol"));
    }

    #[test]
    fn cookie_wins_over_query() {
        let headers = headers_with_cookie("pushgate_id=alice");
        let query = SessionQuery {
            identity: Some("carol".into()),
        };
        let identity = resolve_identity(&headers, &query);
        assert_eq!(identity.as_deref(), Some("alice"));
    }
}
