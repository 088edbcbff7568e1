//! Latency simulation.
//!
//! Computes how long a response is held back, optionally gated by delay
//! conditions over request attributes.

use crate::config::{AttributeSource, ConditionOperator, DelayCondition, ResponseDefinition};
use crate::request::MockRequest;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Request attributes visible to delay conditions.
pub struct RequestAttributes<'a> {
    request: &'a MockRequest,
    path_variables: &'a HashMap<String, String>,
}

impl<'a> RequestAttributes<'a> {
    pub fn new(request: &'a MockRequest, path_variables: &'a HashMap<String, String>) -> Self {
        Self {
            request,
            path_variables,
        }
    }

    /// Value of the attribute a condition inspects, if present.
    pub fn lookup(&self, source: AttributeSource, name: &str) -> Option<&'a str> {
        match source {
            AttributeSource::Method => Some(self.request.method.as_str()),
            AttributeSource::Path => Some(self.request.path.as_str()),
            AttributeSource::Header => self.request.header(name),
            AttributeSource::Query => self.request.query_param(name),
            AttributeSource::PathVariable => self.path_variables.get(name).map(String::as_str),
        }
    }
}

impl DelayCondition {
    /// Evaluate this condition against the request attributes.
    ///
    /// An absent attribute only matches a non-required `exists` condition.
    pub fn matches(&self, attributes: &RequestAttributes<'_>) -> bool {
        let actual = match attributes.lookup(self.source, &self.name) {
            Some(actual) => actual,
            None => return self.operator == ConditionOperator::Exists && !self.required,
        };

        if self.operator == ConditionOperator::Exists {
            return true;
        }

        if self.operator == ConditionOperator::Regex {
            return self.regex().is_some_and(|re| re.is_match(actual));
        }

        let Some(expected) = self.value.as_deref() else {
            return false;
        };
        let (actual, expected) = if self.case_sensitive {
            (actual.to_string(), expected.to_string())
        } else {
            (actual.to_lowercase(), expected.to_lowercase())
        };

        match self.operator {
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::Contains => actual.contains(&expected),
            ConditionOperator::StartsWith => actual.starts_with(&expected),
            ConditionOperator::EndsWith => actual.ends_with(&expected),
            ConditionOperator::Regex | ConditionOperator::Exists => true,
        }
    }
}

/// Whether a condition set lets the configured delay apply.
///
/// Stops at the first required condition that fails; non-required
/// conditions are evaluated but never gate the outcome.
pub fn conditions_satisfied(
    conditions: &[DelayCondition],
    attributes: &RequestAttributes<'_>,
) -> bool {
    for condition in conditions {
        let matched = condition.matches(attributes);
        if !matched && condition.required {
            debug!(
                source = ?condition.source,
                name = %condition.name,
                operator = ?condition.operator,
                "Required delay condition failed"
            );
            return false;
        }
    }
    true
}

/// Computes simulated latency for responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayEngine {
    default_delay_ms: u64,
}

impl DelayEngine {
    /// Create an engine falling back to `default_delay_ms`.
    pub fn new(default_delay_ms: u64) -> Self {
        Self { default_delay_ms }
    }

    pub fn default_delay_ms(&self) -> u64 {
        self.default_delay_ms
    }

    /// Delay in milliseconds for a response to this request.
    pub fn compute(
        &self,
        response: &ResponseDefinition,
        request: &MockRequest,
        path_variables: &HashMap<String, String>,
    ) -> u64 {
        if !response.delay_conditions.is_empty() {
            let attributes = RequestAttributes::new(request, path_variables);
            if !conditions_satisfied(&response.delay_conditions, &attributes) {
                return self.default_delay_ms;
            }
        }

        if response.delay_range
            && response.min_delay <= response.max_delay
            && response.max_delay > 0
        {
            let mut rng = rand::thread_rng();
            return rng.gen_range(response.min_delay..=response.max_delay);
        }

        if response.delay > 0 {
            return response.delay;
        }

        self.default_delay_ms
    }

    /// Compute the delay and wait it out.
    ///
    /// There is no cancellation: once started the wait runs to completion.
    pub async fn apply(
        &self,
        response: &ResponseDefinition,
        request: &MockRequest,
        path_variables: &HashMap<String, String>,
    ) -> u64 {
        let delay_ms = self.compute(response, request, path_variables);
        if delay_ms > 0 {
            debug!(response_id = %response.id, delay_ms, "Applying delay");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        delay_ms
    }
}
