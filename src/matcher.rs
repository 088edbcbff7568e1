//! Request matching logic.
//!
//! Matches request paths against endpoint templates and evaluates the
//! optional per-endpoint request predicates.

use crate::config::{BodyMatcher, HeaderMatcher, QueryMatcher, RequestMatchers};
use crate::request::MockRequest;
use std::collections::HashMap;

/// Outcome of matching a path template against a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMatch {
    pub matched: bool,
    /// Variable name to the bound path segment
    pub bindings: HashMap<String, String>,
}

impl PathMatch {
    fn no_match() -> Self {
        Self::default()
    }
}

/// Name of a `${name}` template segment, if the segment is one.
pub fn variable_name(segment: &str) -> Option<&str> {
    segment
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .filter(|name| !name.is_empty())
}

fn segments(path: &str) -> Vec<&str> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    path.split('/').collect()
}

/// Match a path template against an actual request path.
///
/// Segments are compared positionally; `${name}` segments bind any non-empty
/// segment, all others must be equal byte for byte.
pub fn match_path(template: &str, actual: &str) -> PathMatch {
    let expected = segments(template);
    let received = segments(actual);
    if expected.len() != received.len() {
        return PathMatch::no_match();
    }

    let mut bindings = HashMap::new();
    for (pattern, value) in expected.iter().zip(received.iter()) {
        match variable_name(pattern) {
            Some(name) => {
                if value.is_empty() {
                    return PathMatch::no_match();
                }
                bindings.insert(name.to_string(), value.to_string());
            }
            None => {
                if pattern != value {
                    return PathMatch::no_match();
                }
            }
        }
    }

    PathMatch {
        matched: true,
        bindings,
    }
}

impl RequestMatchers {
    /// Whether the live request satisfies every predicate.
    pub fn matches(&self, request: &MockRequest) -> bool {
        if !self.method.is_empty()
            && !self
                .method
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&request.method))
        {
            return false;
        }

        for (name, qm) in &self.query {
            if !matches_query(request.query_param(name), qm) {
                return false;
            }
        }

        for (name, hm) in &self.headers {
            if !matches_header(request.header(name), hm) {
                return false;
            }
        }

        if let Some(bm) = &self.body {
            if !matches_body(&request.body, bm) {
                return false;
            }
        }

        true
    }
}

fn matches_query(value: Option<&str>, matcher: &QueryMatcher) -> bool {
    match matcher {
        QueryMatcher::Exact { value: expected } => value == Some(expected.as_str()),
        QueryMatcher::Regex { pattern } => value.is_some_and(|v| pattern.is_match(v)),
        QueryMatcher::Present => value.is_some(),
        QueryMatcher::Absent => value.is_none(),
    }
}

fn matches_header(value: Option<&str>, matcher: &HeaderMatcher) -> bool {
    match matcher {
        HeaderMatcher::Exact { value: expected } => value == Some(expected.as_str()),
        HeaderMatcher::Regex { pattern } => value.is_some_and(|v| pattern.is_match(v)),
        HeaderMatcher::Present => value.is_some(),
        HeaderMatcher::Absent => value.is_none(),
        HeaderMatcher::Contains { value: needle } => {
            value.map(|v| v.contains(needle.as_str())).unwrap_or(false)
        }
    }
}

fn matches_body(body: &[u8], matcher: &BodyMatcher) -> bool {
    let body_str = std::str::from_utf8(body).ok();

    match matcher {
        BodyMatcher::Exact { value } => body_str == Some(value.as_str()),
        BodyMatcher::Regex { pattern } => body_str.is_some_and(|bs| pattern.is_match(bs)),
        BodyMatcher::JsonPath { expressions } => body_str
            .and_then(|bs| serde_json::from_str::<serde_json::Value>(bs).ok())
            .map(|json| matches_json_paths(&json, expressions))
            .unwrap_or(false),
        BodyMatcher::Contains { value } => body_str
            .map(|bs| bs.contains(value.as_str()))
            .unwrap_or(false),
        BodyMatcher::Json => body_str
            .map(|bs| serde_json::from_str::<serde_json::Value>(bs).is_ok())
            .unwrap_or(false),
        BodyMatcher::Empty => body.is_empty(),
    }
}

fn matches_json_paths(
    json: &serde_json::Value,
    expressions: &HashMap<String, serde_json::Value>,
) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(path_expr, expected)| {
        let path = match JsonPath::try_from(path_expr.as_str()) {
            Ok(p) => p,
            Err(_) => return false,
        };

        // `find` wraps every hit in an array, or yields null when nothing resolves
        let found = match path.find(json) {
            serde_json::Value::Array(values) => values,
            _ => Vec::new(),
        };

        // A null expectation only asks for the path to resolve
        if expected.is_null() {
            !found.is_empty()
        } else {
            found.iter().any(|value| value == expected)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Pattern;
    use serde_json::json;

    fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_literal_path_matching() {
        assert!(match_path("/api/users", "/api/users").matched);
        assert!(match_path("/api/users/", "/api/users").matched);
        assert!(match_path("api/users", "/api/users/").matched);
        assert!(!match_path("/api/users", "/api/posts").matched);
        assert!(!match_path("/api/users", "/API/users").matched);
    }

    #[test]
    fn test_variable_path_matching() {
        let result = match_path("/users/${id}", "/users/123");
        assert!(result.matched);
        assert_eq!(result.bindings, bindings(&[("id", "123")]));

        let result = match_path("/orgs/${org}/users/${id}", "/orgs/acme/users/7");
        assert_eq!(result.bindings, bindings(&[("org", "acme"), ("id", "7")]));
    }

    #[test]
    fn test_segment_count_must_match() {
        assert!(!match_path("/users/${id}", "/users").matched);
        assert!(!match_path("/users/${id}", "/users/").matched);
        assert!(!match_path("/users/${id}", "/users/1/posts").matched);
    }

    #[test]
    fn test_empty_segment_never_binds() {
        assert!(!match_path("/a/${x}/b", "/a//b").matched);
    }

    #[test]
    fn test_root_path() {
        assert!(match_path("/", "/").matched);
        assert!(!match_path("/", "/x").matched);
    }

    #[test]
    fn test_variable_name() {
        assert_eq!(variable_name("${id}"), Some("id"));
        assert_eq!(variable_name("${}"), None);
        assert_eq!(variable_name("id"), None);
        assert_eq!(variable_name("{id}"), None);
    }

    #[test]
    fn test_method_predicate() {
        let matchers = RequestMatchers {
            method: vec!["get".to_string(), "POST".to_string()],
            ..Default::default()
        };
        assert!(matchers.matches(&MockRequest::new("GET", "/")));
        assert!(!matchers.matches(&MockRequest::new("DELETE", "/")));
    }

    #[test]
    fn test_query_predicate() {
        let mut matchers = RequestMatchers::default();
        matchers.query.insert(
            "page".to_string(),
            QueryMatcher::Exact {
                value: "1".to_string(),
            },
        );
        assert!(matchers.matches(&MockRequest::new("GET", "/users?page=1")));
        assert!(!matchers.matches(&MockRequest::new("GET", "/users?page=2")));
        assert!(!matchers.matches(&MockRequest::new("GET", "/users")));
    }

    #[test]
    fn test_header_predicate() {
        let mut matchers = RequestMatchers::default();
        matchers
            .headers
            .insert("authorization".to_string(), HeaderMatcher::Present);
        matchers.headers.insert(
            "x-client".to_string(),
            HeaderMatcher::Regex {
                pattern: Pattern::new("^cli-\\d+$").unwrap(),
            },
        );

        let request = MockRequest::new("GET", "/")
            .with_header("Authorization", "Bearer token")
            .with_header("X-Client", "cli-42");
        assert!(matchers.matches(&request));

        let request = MockRequest::new("GET", "/").with_header("X-Client", "cli-42");
        assert!(!matchers.matches(&request));
    }

    #[test]
    fn test_body_json_predicate() {
        let matchers = RequestMatchers {
            body: Some(BodyMatcher::Json),
            ..Default::default()
        };
        let request = MockRequest::new("POST", "/").with_body(r#"{"name": "John"}"#);
        assert!(matchers.matches(&request));

        let request = MockRequest::new("POST", "/").with_body("not json");
        assert!(!matchers.matches(&request));
    }

    #[test]
    fn test_body_empty_predicate() {
        let matchers = RequestMatchers {
            body: Some(BodyMatcher::Empty),
            ..Default::default()
        };
        assert!(matchers.matches(&MockRequest::new("POST", "/")));
        assert!(!matchers.matches(&MockRequest::new("POST", "/").with_body("x")));
    }

    fn body_matchers(matcher: BodyMatcher) -> RequestMatchers {
        RequestMatchers {
            body: Some(matcher),
            ..Default::default()
        }
    }

    fn post(body: &str) -> MockRequest {
        MockRequest::new("POST", "/").with_body(body.to_string())
    }

    #[test]
    fn test_query_regex_and_absent() {
        let mut matchers = RequestMatchers::default();
        matchers.query.insert(
            "sort".to_string(),
            QueryMatcher::Regex {
                pattern: Pattern::new("^(asc|desc)$").unwrap(),
            },
        );
        matchers
            .query
            .insert("debug".to_string(), QueryMatcher::Absent);

        assert!(matchers.matches(&MockRequest::new("GET", "/items?sort=asc")));
        assert!(!matchers.matches(&MockRequest::new("GET", "/items?sort=random")));
        assert!(!matchers.matches(&MockRequest::new("GET", "/items")));
        assert!(!matchers.matches(&MockRequest::new("GET", "/items?sort=desc&debug=1")));
    }

    #[test]
    fn test_header_contains_and_absent() {
        let mut matchers = RequestMatchers::default();
        matchers.headers.insert(
            "accept".to_string(),
            HeaderMatcher::Contains {
                value: "json".to_string(),
            },
        );
        matchers
            .headers
            .insert("x-debug".to_string(), HeaderMatcher::Absent);

        let request = MockRequest::new("GET", "/").with_header("Accept", "application/json");
        assert!(matchers.matches(&request));

        let request = MockRequest::new("GET", "/").with_header("Accept", "text/html");
        assert!(!matchers.matches(&request));

        assert!(!matchers.matches(&MockRequest::new("GET", "/")));

        let request = MockRequest::new("GET", "/")
            .with_header("Accept", "application/json")
            .with_header("X-Debug", "1");
        assert!(!matchers.matches(&request));
    }

    #[test]
    fn test_body_exact_predicate() {
        let matchers = body_matchers(BodyMatcher::Exact {
            value: "ping".to_string(),
        });
        assert!(matchers.matches(&post("ping")));
        assert!(!matchers.matches(&post("ping ")));
        assert!(!matchers.matches(&MockRequest::new("POST", "/")));
    }

    #[test]
    fn test_body_regex_predicate() {
        let matchers = body_matchers(BodyMatcher::Regex {
            pattern: Pattern::new(r#""count":\s*\d+"#).unwrap(),
        });
        assert!(matchers.matches(&post(r#"{"count": 3}"#)));
        assert!(!matchers.matches(&post(r#"{"count": "three"}"#)));
    }

    #[test]
    fn test_body_contains_predicate() {
        let matchers = body_matchers(BodyMatcher::Contains {
            value: "urgent".to_string(),
        });
        assert!(matchers.matches(&post("this is urgent!")));
        assert!(!matchers.matches(&post("whenever")));
    }

    #[test]
    fn test_body_json_path_scalar_equality() {
        let mut expressions = HashMap::new();
        expressions.insert("$.user.name".to_string(), json!("John"));
        expressions.insert("$.user.age".to_string(), json!(30));
        let matchers = body_matchers(BodyMatcher::JsonPath { expressions });

        assert!(matchers.matches(&post(r#"{"user": {"name": "John", "age": 30}}"#)));
        assert!(!matchers.matches(&post(r#"{"user": {"name": "Jane", "age": 30}}"#)));
        assert!(!matchers.matches(&post(r#"{"user": {"name": "John"}}"#)));
        assert!(!matchers.matches(&post("not json")));
    }

    #[test]
    fn test_body_json_path_existence() {
        let mut expressions = HashMap::new();
        expressions.insert("$.order.id".to_string(), serde_json::Value::Null);
        let matchers = body_matchers(BodyMatcher::JsonPath { expressions });

        assert!(matchers.matches(&post(r#"{"order": {"id": "A-1"}}"#)));
        assert!(!matchers.matches(&post(r#"{"order": {}}"#)));
    }

    #[test]
    fn test_body_json_path_any_element() {
        let mut expressions = HashMap::new();
        expressions.insert("$.items[*].sku".to_string(), json!("B2"));
        let matchers = body_matchers(BodyMatcher::JsonPath { expressions });

        assert!(matchers.matches(&post(r#"{"items": [{"sku": "A1"}, {"sku": "B2"}]}"#)));
        assert!(!matchers.matches(&post(r#"{"items": [{"sku": "A1"}]}"#)));
    }
}
