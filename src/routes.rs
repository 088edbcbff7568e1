//! Route index over a configuration.
//!
//! A [`RouteTable`] pairs a configuration with the lookup built from it, so the
//! two are always swapped together on reload.

use crate::config::{Configuration, EndpointDefinition};
use crate::matcher::match_path;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

/// Index key of an endpoint: `METHOD:path`.
pub fn route_key(method: &str, path: &str) -> String {
    format!("{}:{}", method.to_uppercase(), path)
}

/// An endpoint resolved for a live request.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub endpoint: &'a EndpointDefinition,
    /// Variable bindings of the endpoint's path template
    pub path_variables: HashMap<String, String>,
}

/// Configuration plus its derived index.
#[derive(Debug, Default)]
pub struct RouteTable {
    config: Arc<Configuration>,
    /// Route key to endpoint position in `config.endpoints`
    index: HashMap<String, usize>,
    /// Registered positions, in registration order
    registered: Vec<usize>,
    /// Modification time of the source at load, when it is a file
    modified: Option<SystemTime>,
}

impl RouteTable {
    /// Build the index for a configuration.
    ///
    /// When two endpoints share a key the first one is kept.
    pub fn new(config: Configuration, modified: Option<SystemTime>) -> Self {
        let mut index = HashMap::with_capacity(config.endpoints.len());
        let mut registered = Vec::with_capacity(config.endpoints.len());
        for (position, endpoint) in config.endpoints.iter().enumerate() {
            let key = route_key(&endpoint.method, &endpoint.path);
            if index.contains_key(&key) {
                warn!(route = %key, "Duplicate endpoint ignored");
                continue;
            }
            index.insert(key, position);
            registered.push(position);
        }

        Self {
            config: Arc::new(config),
            index,
            registered,
            modified,
        }
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Registered route keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Endpoint registered under exactly this method and template path.
    pub fn get(&self, method: &str, path: &str) -> Option<&EndpointDefinition> {
        self.index
            .get(&route_key(method, path))
            .map(|&position| &self.config.endpoints[position])
    }

    /// Resolve a live request to an endpoint.
    ///
    /// An exact key hit wins; otherwise templates of the same method are tried
    /// in registration order.
    pub fn resolve(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        if let Some(endpoint) = self.get(method, path) {
            let path_variables = match_path(&endpoint.path, path).bindings;
            return Some(RouteMatch {
                endpoint,
                path_variables,
            });
        }

        self.registered
            .iter()
            .map(|&position| &self.config.endpoints[position])
            .filter(|endpoint| endpoint.method.eq_ignore_ascii_case(method))
            .find_map(|endpoint| {
                let result = match_path(&endpoint.path, path);
                result.matched.then(|| RouteMatch {
                    endpoint,
                    path_variables: result.bindings,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseDefinition;

    fn endpoint(method: &str, path: &str, status: u16) -> EndpointDefinition {
        let mut response = ResponseDefinition::new("default");
        response.status = status;
        EndpointDefinition {
            method: method.to_string(),
            path: path.to_string(),
            original_path: None,
            response_type: None,
            matchers: None,
            responses: vec![response],
        }
    }

    fn table(endpoints: Vec<EndpointDefinition>) -> RouteTable {
        RouteTable::new(Configuration { endpoints }, None)
    }

    #[test]
    fn test_keys() {
        let table = table(vec![
            endpoint("GET", "/users", 200),
            endpoint("post", "/users", 201),
        ]);
        let mut keys: Vec<_> = table.keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["GET:/users", "POST:/users"]);
    }

    #[test]
    fn test_exact_lookup() {
        let table = table(vec![endpoint("GET", "/users", 200)]);
        let found = table.resolve("GET", "/users").unwrap();
        assert_eq!(found.endpoint.path, "/users");
        assert!(found.path_variables.is_empty());
        assert!(table.resolve("DELETE", "/users").is_none());
    }

    #[test]
    fn test_template_resolution() {
        let table = table(vec![endpoint("GET", "/users/${id}", 200)]);
        let found = table.resolve("GET", "/users/42").unwrap();
        assert_eq!(found.path_variables.get("id").map(String::as_str), Some("42"));
        assert!(table.resolve("GET", "/users/42/posts").is_none());
    }

    #[test]
    fn test_literal_beats_template() {
        let table = table(vec![
            endpoint("GET", "/users/${id}", 200),
            endpoint("GET", "/users/me", 299),
        ]);
        let found = table.resolve("GET", "/users/me").unwrap();
        assert_eq!(found.endpoint.responses[0].status, 299);
    }

    #[test]
    fn test_templates_in_registration_order() {
        let table = table(vec![
            endpoint("GET", "/items/${a}", 201),
            endpoint("GET", "/items/${b}", 202),
        ]);
        let found = table.resolve("GET", "/items/x").unwrap();
        assert_eq!(found.endpoint.responses[0].status, 201);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let table = table(vec![
            endpoint("GET", "/dup", 201),
            endpoint("GET", "/dup", 202),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("get", "/dup").unwrap().responses[0].status, 201);
    }
}
