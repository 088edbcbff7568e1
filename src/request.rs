//! The live request as seen by matching, delay conditions and templates.

use axum::http::request::Parts;
use std::collections::HashMap;

/// An inbound request, decoupled from the HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    /// Upper-case HTTP method
    pub method: String,
    /// Request path, without query string
    pub path: String,
    /// Path plus query string, as received
    pub uri: String,
    /// Absolute URL reconstructed from the `Host` header
    pub url: String,
    /// Lower-cased header names to values, in arrival order
    pub headers: HashMap<String, Vec<String>>,
    /// Decoded query parameters to values, in arrival order
    pub query: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl MockRequest {
    /// Build a request from a method and a path with optional query string.
    pub fn new(method: &str, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            uri: uri.to_string(),
            url: format!("http://localhost{}", uri),
            headers: HashMap::new(),
            query: parse_query_string(query),
            body: Vec::new(),
        }
    }

    /// Build a request from the head of an HTTP request and its buffered body.
    pub fn from_parts(parts: &Parts, body: Vec<u8>) -> Self {
        let uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let mut request = Self::new(parts.method.as_str(), &uri);
        for (name, value) in &parts.headers {
            if let Ok(value) = value.to_str() {
                request
                    .headers
                    .entry(name.as_str().to_lowercase())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let host = request.header("host").unwrap_or("localhost").to_string();
        let scheme = parts.uri.scheme_str().unwrap_or("http");
        request.url = format!("{}://{}{}", scheme, host, uri);
        request.body = body;
        request
    }

    /// Add a header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Headers flattened to their first value.
    pub fn first_headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect()
    }

    /// Body as UTF-8 text, if it is any.
    pub fn body_text(&self) -> Option<&str> {
        if self.body.is_empty() {
            return None;
        }
        std::str::from_utf8(&self.body).ok()
    }
}

/// Parse a query string into decoded, multi-valued parameters.
fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string("foo=bar&baz=qux&foo=again");
        assert_eq!(params["foo"], vec!["bar", "again"]);
        assert_eq!(params["baz"], vec!["qux"]);

        let params = parse_query_string("name=John%20Doe&flag");
        assert_eq!(params["name"], vec!["John Doe"]);
        assert_eq!(params["flag"], vec![""]);
    }

    #[test]
    fn test_new_splits_uri() {
        let request = MockRequest::new("get", "/users/42?page=2");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/users/42");
        assert_eq!(request.uri, "/users/42?page=2");
        assert_eq!(request.query_param("page"), Some("2"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = MockRequest::new("GET", "/")
            .with_header("X-Trace", "abc")
            .with_header("x-trace", "def");
        assert_eq!(request.header("x-TRACE"), Some("abc"));
        assert_eq!(request.first_headers()["x-trace"], "abc");
    }

    #[test]
    fn test_from_parts() {
        let (parts, _) = axum::http::Request::builder()
            .method("POST")
            .uri("/orders?id=7")
            .header("Host", "example.test:8080")
            .body(())
            .unwrap()
            .into_parts();

        let request = MockRequest::from_parts(&parts, b"{}".to_vec());
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/orders");
        assert_eq!(request.url, "http://example.test:8080/orders?id=7");
        assert_eq!(request.body_text(), Some("{}"));
    }
}
