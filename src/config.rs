//! Configuration for the mock server.
//!
//! Defines endpoints, their candidate responses, delay conditions and the
//! process-level server settings.

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

/// Root configuration document.
///
/// Replaced wholesale on reload, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Endpoint definitions, in registration order
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

impl Configuration {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| ConfigError::invalid(format!("Endpoint {}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Summaries of every configured endpoint, in registration order.
    pub fn list_endpoints(&self) -> Vec<EndpointSummary> {
        self.endpoints.iter().map(EndpointSummary::from).collect()
    }

    /// Look up an endpoint by method and registered path.
    pub fn endpoint(&self, method: &str, path: &str) -> Option<&EndpointDefinition> {
        self.endpoints
            .iter()
            .find(|e| e.method.eq_ignore_ascii_case(method) && e.path == path)
    }

    /// Look up a single response of an endpoint by its id.
    pub fn response(&self, method: &str, path: &str, id: &str) -> Option<&ResponseDefinition> {
        self.endpoint(method, path)?
            .responses
            .iter()
            .find(|r| r.id == id)
    }
}

/// A (method, path template) pair with its candidate responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EndpointDefinition {
    /// HTTP method, upper-cased at registration
    pub method: String,

    /// Path template with literal and `${name}` segments
    pub path: String,

    /// Path as written before property substitution, when substitution changed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,

    /// Descriptive response type, display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    /// Request predicates the live request must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matchers: Option<RequestMatchers>,

    /// Candidate responses
    #[serde(default)]
    pub responses: Vec<ResponseDefinition>,
}

impl EndpointDefinition {
    /// Validate the endpoint definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.method.trim().is_empty() {
            return Err(ConfigError::invalid("method cannot be empty"));
        }
        if self.path.trim().is_empty() {
            return Err(ConfigError::invalid("path cannot be empty"));
        }
        for response in &self.responses {
            response
                .validate()
                .map_err(|e| ConfigError::invalid(format!("response '{}': {}", response.id, e)))?;
        }

        let defaults = self.responses.iter().filter(|r| r.is_default).count();
        if defaults > 1 {
            warn!(
                method = %self.method,
                path = %self.path,
                defaults,
                "Several responses flagged default, the first one wins"
            );
        }
        Ok(())
    }

    /// The response served for this endpoint: the first one flagged default.
    pub fn default_response(&self) -> Option<&ResponseDefinition> {
        self.responses.iter().find(|r| r.is_default)
    }
}

/// Administrative view of an endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    pub responses: usize,
}

impl From<&EndpointDefinition> for EndpointSummary {
    fn from(endpoint: &EndpointDefinition) -> Self {
        Self {
            method: endpoint.method.clone(),
            path: endpoint.path.clone(),
            original_path: endpoint
                .original_path
                .clone()
                .filter(|original| *original != endpoint.path),
            responses: endpoint.responses.len(),
        }
    }
}

/// Request predicates for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RequestMatchers {
    /// HTTP method(s) to accept (empty = any)
    #[serde(default)]
    pub method: Vec<String>,

    /// Query parameter matching
    #[serde(default)]
    pub query: HashMap<String, QueryMatcher>,

    /// Header matching
    #[serde(default)]
    pub headers: HashMap<String, HeaderMatcher>,

    /// Body matching
    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

/// A regular expression compiled when the configuration is parsed.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Self)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(|e| {
            serde::de::Error::custom(format!("invalid regex '{}': {}", source, e))
        })
    }
}

/// Regex built on first use and kept for later requests.
///
/// Ignored by equality. A cached regex is only reused for the same source.
#[derive(Debug, Clone, Default)]
pub struct CompiledRegex(OnceLock<Regex>);

impl CompiledRegex {
    pub fn get(&self, source: &str) -> Result<Cow<'_, Regex>, regex::Error> {
        let cached = match self.0.get() {
            Some(re) => re,
            None => {
                let re = Regex::new(source)?;
                self.0.get_or_init(|| re)
            }
        };
        if cached.as_str() == source {
            Ok(Cow::Borrowed(cached))
        } else {
            Regex::new(source).map(Cow::Owned)
        }
    }
}

impl PartialEq for CompiledRegex {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// Query parameter matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: Pattern },
    /// Parameter must be present (any value)
    Present,
    /// Parameter must be absent
    Absent,
}

/// Header matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: Pattern },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: Pattern },
    /// JSON path matching
    JsonPath {
        /// JSON path expressions and expected values
        expressions: HashMap<String, serde_json::Value>,
    },
    /// Body must contain substring
    Contains { value: String },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

/// A candidate response of an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResponseDefinition {
    /// Identifier, unique within the endpoint
    #[serde(default)]
    pub id: String,

    /// Whether this is the response served for the endpoint
    #[serde(default)]
    pub is_default: bool,

    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Literal body, serialized as-is
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Body template, rendered per request
    #[serde(default)]
    pub body_template: Option<String>,

    /// Engine used for `body_template`
    #[serde(default)]
    pub body_template_engine: TemplateEngineKind,

    /// Fixed delay in milliseconds (0 = not set)
    #[serde(default)]
    pub delay: u64,

    /// Use `min_delay..=max_delay` instead of the fixed delay
    #[serde(default)]
    pub delay_range: bool,

    /// Lower bound of the delay range (ms)
    #[serde(default)]
    pub min_delay: u64,

    /// Upper bound of the delay range (ms)
    #[serde(default)]
    pub max_delay: u64,

    /// Conditions gating the configured delay
    #[serde(default)]
    pub delay_conditions: Vec<DelayCondition>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// A default-flagged 200 response with no body, used as a starting point.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_default: true,
            status: default_status(),
            headers: HashMap::new(),
            body: None,
            body_template: None,
            body_template_engine: TemplateEngineKind::default(),
            delay: 0,
            delay_range: false,
            min_delay: 0,
            max_delay: 0,
            delay_conditions: Vec::new(),
            tags: Vec::new(),
            category: String::new(),
            description: String::new(),
        }
    }

    /// Validate the response definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status < 100 || self.status > 599 {
            return Err(ConfigError::invalid(format!(
                "Invalid status code: {}",
                self.status
            )));
        }
        for condition in &self.delay_conditions {
            condition.validate()?;
        }
        Ok(())
    }
}

/// Template engine used to render a response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngineKind {
    /// `${name}` substitution
    #[default]
    Simple,
    /// Handlebars with the helper registry
    #[serde(alias = "rich")]
    Handlebars,
}

/// Request attribute a delay condition inspects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AttributeSource {
    Header,
    #[serde(alias = "queryParam")]
    Query,
    PathVariable,
    Method,
    Path,
}

impl AttributeSource {
    /// Whether the condition's `name` selects the attribute.
    pub fn is_named(self) -> bool {
        matches!(
            self,
            AttributeSource::Header | AttributeSource::Query | AttributeSource::PathVariable
        )
    }
}

/// Comparison applied to a request attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Exists,
}

/// Predicate over request attributes gating whether a configured delay applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DelayCondition {
    /// Attribute source
    #[serde(rename = "type")]
    pub source: AttributeSource,

    /// Attribute name (ignored for method and path)
    #[serde(default)]
    pub name: String,

    pub operator: ConditionOperator,

    /// Comparison value
    #[serde(default)]
    pub value: Option<String>,

    /// Pattern for the regex operator (falls back to `value`)
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    /// A failing required condition disables the configured delay
    #[serde(default)]
    pub required: bool,

    #[serde(skip)]
    pub compiled: CompiledRegex,
}

fn default_true() -> bool {
    true
}

impl DelayCondition {
    /// Validate the delay condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.is_named() && self.name.is_empty() {
            return Err(ConfigError::invalid(format!(
                "delay condition on {:?} needs a name",
                self.source
            )));
        }
        match self.operator {
            ConditionOperator::Exists => {}
            ConditionOperator::Regex => {
                let source = self.regex_source().ok_or_else(|| {
                    ConfigError::invalid("regex delay condition needs a pattern")
                })?;
                self.compiled
                    .get(&source)
                    .map_err(|e| ConfigError::invalid(format!("Invalid regex: {}", e)))?;
            }
            op => {
                if self.value.is_none() {
                    return Err(ConfigError::invalid(format!(
                        "{:?} delay condition needs a value",
                        op
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pattern used by the regex operator.
    pub fn regex_pattern(&self) -> Option<&str> {
        self.pattern.as_deref().or(self.value.as_deref())
    }

    /// Anchored source of the regex operator, case flag included.
    fn regex_source(&self) -> Option<String> {
        let flags = if self.case_sensitive { "" } else { "(?i)" };
        self.regex_pattern()
            .map(|pattern| format!("{}^(?:{})$", flags, pattern))
    }

    /// Full-match regex of the regex operator, compiled once by `validate`.
    pub fn regex(&self) -> Option<Cow<'_, Regex>> {
        let source = self.regex_source()?;
        self.compiled.get(&source).ok()
    }
}

/// Process-level settings of the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerSettings {
    /// Name reported by the root summary
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port (0 = ephemeral)
    #[serde(default)]
    pub port: u16,

    /// Prefix under which endpoints are mounted
    #[serde(default)]
    pub base_path: String,

    /// Delay used when a response sets none, or its conditions fail (ms)
    #[serde(default)]
    pub default_delay_ms: u64,

    /// Watch the configuration file and reload on change
    #[serde(default)]
    pub auto_reload: bool,

    #[serde(default = "default_reload_interval")]
    pub reload_interval_ms: u64,

    /// Largest request body read for matching and templating
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// Content type applied when a response sets none
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Log all matched endpoints
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: 0,
            base_path: String::new(),
            default_delay_ms: 0,
            auto_reload: false,
            reload_interval_ms: default_reload_interval(),
            max_body_bytes: default_max_body(),
            default_content_type: default_content_type(),
            log_matches: true,
            log_unmatched: true,
        }
    }
}

impl ServerSettings {
    /// Base path normalized to `/prefix` form, or empty when unset.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }
}

fn default_name() -> String {
    "mock-server".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_reload_interval() -> u64 {
    1000
}

fn default_max_body() -> usize {
    1024 * 1024
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_endpoint() {
        let yaml = r#"
endpoints:
  - method: GET
    path: /hello
    responses:
      - id: ok
        isDefault: true
        status: 200
        body:
          message: "Hello, World!"
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.endpoints.len(), 1);
        let response = &config.endpoints[0].responses[0];
        assert!(response.is_default);
        assert_eq!(response.body.as_ref().unwrap()["message"], "Hello, World!");
        assert_eq!(response.body_template_engine, TemplateEngineKind::Simple);
    }

    #[test]
    fn test_parse_json_document() {
        let json = r#"{"endpoints":[{"method":"POST","path":"/orders","responses":[
            {"id":"created","isDefault":true,"status":201,
             "bodyTemplate":"{{json request.json}}","bodyTemplateEngine":"handlebars",
             "delayRange":true,"minDelay":10,"maxDelay":20}]}]}"#;
        let config: Configuration = serde_yaml::from_str(json).unwrap();
        let response = &config.endpoints[0].responses[0];
        assert_eq!(response.status, 201);
        assert_eq!(response.body_template_engine, TemplateEngineKind::Handlebars);
        assert!(response.delay_range);
        assert_eq!((response.min_delay, response.max_delay), (10, 20));
    }

    #[test]
    fn test_parse_delay_conditions() {
        let yaml = r#"
endpoints:
  - method: GET
    path: /slow
    responses:
      - id: slow
        isDefault: true
        delay: 500
        delayConditions:
          - type: header
            name: X-Slow
            operator: equals
            value: "yes"
            required: true
          - type: queryParam
            name: mode
            operator: startsWith
            value: slo
            caseSensitive: false
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let conditions = &config.endpoints[0].responses[0].delay_conditions;
        assert_eq!(conditions[0].source, AttributeSource::Header);
        assert!(conditions[0].required);
        assert!(conditions[0].case_sensitive);
        assert_eq!(conditions[1].source, AttributeSource::Query);
        assert_eq!(conditions[1].operator, ConditionOperator::StartsWith);
        assert!(!conditions[1].case_sensitive);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let yaml = r#"
endpoints:
  - method: GET
    path: /slow
    responses:
      - id: slow
        delayConditions:
          - type: header
            name: X-Slow
            operator: lessThan
            value: "3"
"#;
        assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
    }

    #[test]
    fn test_invalid_condition_regex() {
        let mut response = ResponseDefinition::new("r");
        response.delay_conditions.push(DelayCondition {
            source: AttributeSource::Path,
            name: String::new(),
            operator: ConditionOperator::Regex,
            value: None,
            pattern: Some("(unclosed".to_string()),
            case_sensitive: true,
            required: false,
            compiled: CompiledRegex::default(),
        });
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_condition_regex_compiled_at_validation() {
        let mut condition = DelayCondition {
            source: AttributeSource::Path,
            name: String::new(),
            operator: ConditionOperator::Regex,
            value: None,
            pattern: Some("/users/\\d+".to_string()),
            case_sensitive: false,
            required: false,
            compiled: CompiledRegex::default(),
        };
        condition.validate().unwrap();
        let regex = condition.regex().unwrap();
        assert!(matches!(regex, Cow::Borrowed(_)));
        assert_eq!(regex.as_str(), "(?i)^(?:/users/\\d+)$");

        // Edited after validation: the stale cache is not reused
        condition.pattern = Some("/orders".to_string());
        let regex = condition.regex().unwrap();
        assert!(matches!(regex, Cow::Owned(_)));
        assert!(regex.is_match("/ORDERS"));
    }

    #[test]
    fn test_matcher_regex_compiled_at_parse() {
        let yaml = r#"
endpoints:
  - method: GET
    path: /search
    matchers:
      query:
        q:
          type: regex
          pattern: "^[a-z]+$"
    responses: []
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        let matchers = config.endpoints[0].matchers.as_ref().unwrap();
        match &matchers.query["q"] {
            QueryMatcher::Regex { pattern } => {
                assert_eq!(pattern.as_str(), "^[a-z]+$");
                assert!(pattern.is_match("rust"));
            }
            other => panic!("unexpected matcher {:?}", other),
        }

        let invalid = yaml.replace("^[a-z]+$", "([a-z");
        assert!(serde_yaml::from_str::<Configuration>(&invalid).is_err());
    }

    #[test]
    fn test_condition_needs_value() {
        let condition = DelayCondition {
            source: AttributeSource::Header,
            name: "x-a".to_string(),
            operator: ConditionOperator::Contains,
            value: None,
            pattern: None,
            case_sensitive: true,
            required: false,
            compiled: CompiledRegex::default(),
        };
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_invalid_status() {
        let mut response = ResponseDefinition::new("r");
        response.status = 42;
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_first_default_wins() {
        let mut first = ResponseDefinition::new("first");
        first.status = 201;
        let mut second = ResponseDefinition::new("second");
        second.status = 202;
        let mut other = ResponseDefinition::new("other");
        other.is_default = false;

        let endpoint = EndpointDefinition {
            method: "GET".to_string(),
            path: "/x".to_string(),
            original_path: None,
            response_type: None,
            matchers: None,
            responses: vec![other, first, second],
        };
        endpoint.validate().unwrap();
        assert_eq!(endpoint.default_response().unwrap().id, "first");
    }

    #[test]
    fn test_admin_accessors() {
        let yaml = r#"
endpoints:
  - method: GET
    path: /users/${id}
    originalPath: /${api.prefix}/users/${id}
    responses:
      - id: ok
        isDefault: true
      - id: missing
        status: 404
"#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();
        let summaries = config.list_endpoints();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].responses, 2);
        assert_eq!(
            summaries[0].original_path.as_deref(),
            Some("/${api.prefix}/users/${id}")
        );

        assert!(config.endpoint("get", "/users/${id}").is_some());
        assert_eq!(
            config.response("GET", "/users/${id}", "missing").unwrap().status,
            404
        );
        assert!(config.response("GET", "/users/${id}", "nope").is_none());
    }

    #[test]
    fn test_base_path_normalization() {
        let mut settings = ServerSettings::default();
        assert_eq!(settings.normalized_base_path(), "");
        settings.base_path = "mock/".to_string();
        assert_eq!(settings.normalized_base_path(), "/mock");
        settings.base_path = "/".to_string();
        assert_eq!(settings.normalized_base_path(), "");
    }
}
