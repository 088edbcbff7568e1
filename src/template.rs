//! Template engine for dynamic responses.
//!
//! Two engines render a response body against the same request context: a
//! `${name}` substitution engine and Handlebars with a fixed helper set.
//! Rendering never fails from the caller's point of view; on error the raw
//! template text is returned.

use crate::config::TemplateEngineKind;
use crate::request::MockRequest;
use handlebars::{handlebars_helper, Handlebars};
use rand::Rng;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::warn;

/// Default pattern of the `date` helper.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Request-derived values exposed to templates as `request.*`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub uri: String,
    pub url: String,
    /// Lower-cased header names to their first value
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, Vec<String>>,
    pub path_variables: HashMap<String, String>,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Json>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    pub request: RequestContext,
    /// Epoch milliseconds at context creation
    pub timestamp: i64,
    /// Uniform in `[0, 1)`
    pub random: f64,
    /// Freshly generated v4 UUID
    pub uuid: String,
}

impl TemplateContext {
    /// Assemble the context for one request.
    pub fn new(request: &MockRequest, path_variables: &HashMap<String, String>) -> Self {
        let body = request.body_text().map(String::from);
        let json = body.as_deref().and_then(|s| serde_json::from_str(s).ok());

        Self {
            request: RequestContext {
                method: request.method.clone(),
                path: request.path.clone(),
                uri: request.uri.clone(),
                url: request.url.clone(),
                headers: request.first_headers(),
                query_params: request.query.clone(),
                path_variables: path_variables.clone(),
                body,
                json,
            },
            timestamp: chrono::Utc::now().timestamp_millis(),
            random: rand::thread_rng().gen::<f64>(),
            uuid: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    placeholder: Regex,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        register_helpers(&mut handlebars);

        // Don't escape HTML by default (we're not rendering HTML)
        handlebars.register_escape_fn(handlebars::no_escape);

        Self {
            handlebars,
            placeholder: Regex::new(r"\$\{([^{}]+)\}").expect("placeholder pattern is valid"),
        }
    }

    /// Render `template` with the chosen engine, falling back to the raw text on error.
    pub fn render(
        &self,
        kind: TemplateEngineKind,
        template: &str,
        ctx: &TemplateContext,
    ) -> String {
        match kind {
            TemplateEngineKind::Simple => self.render_simple(template, &ctx.to_json()),
            TemplateEngineKind::Handlebars => match self.render_handlebars(template, ctx) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!(error = %e, "Template rendering failed, returning raw template");
                    template.to_string()
                }
            },
        }
    }

    /// Replace every `${name}` whose dotted name resolves in `ctx`.
    ///
    /// Unresolved placeholders are kept verbatim.
    pub fn render_simple(&self, template: &str, ctx: &Json) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures| {
                match lookup(ctx, caps[1].trim()) {
                    Some(Json::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Render with Handlebars, surfacing errors.
    pub fn render_handlebars(
        &self,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render_template(template, ctx)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a dotted path through objects and list indexes.
fn lookup<'a>(ctx: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('.').try_fold(ctx, |value, key| match value {
        Json::Object(map) => map.get(key),
        Json::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Install the fixed helper set.
///
/// `and`, `or` and `not` are Handlebars built-ins; the comparison helpers are
/// replaced so numbers compare numerically and strings lexically.
fn register_helpers(handlebars: &mut Handlebars<'static>) {
    handlebars.register_helper("equals", Box::new(equals));
    handlebars.register_helper("not-equals", Box::new(not_equals));
    handlebars.register_helper("less-than", Box::new(less_than));
    handlebars.register_helper("greater-than", Box::new(greater_than));
    handlebars.register_helper("lte", Box::new(lte));
    handlebars.register_helper("gte", Box::new(gte));

    handlebars.register_helper("json", Box::new(json_helper));
    handlebars.register_helper("random", Box::new(random_helper));
    handlebars.register_helper("timestamp", Box::new(timestamp_helper));
    handlebars.register_helper("date", Box::new(date_helper));
}

fn compare(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

handlebars_helper!(equals: |a: Json, b: Json| a == b);
handlebars_helper!(not_equals: |a: Json, b: Json| a != b);
handlebars_helper!(less_than: |a: Json, b: Json| compare(a, b) == Some(Ordering::Less));
handlebars_helper!(greater_than: |a: Json, b: Json| compare(a, b) == Some(Ordering::Greater));
handlebars_helper!(lte: |a: Json, b: Json| {
    matches!(compare(a, b), Some(Ordering::Less | Ordering::Equal))
});
handlebars_helper!(gte: |a: Json, b: Json| {
    matches!(compare(a, b), Some(Ordering::Greater | Ordering::Equal))
});

// Custom Handlebars helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    match h.param(0).map(|p| p.value()) {
        Some(value) if !value.is_null() => {
            let rendered = serde_json::to_string(value).map_err(|e| {
                handlebars::RenderErrorReason::Other(format!("json helper: {}", e))
            })?;
            out.write(&rendered)?;
        }
        _ => out.write("null")?,
    }
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let (low, high) = if min <= max { (min, max) } else { (max, min) };

    let mut rng = rand::thread_rng();
    let value = rng.gen_range(low..=high);
    out.write(&value.to_string())?;
    Ok(())
}

fn timestamp_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&chrono::Utc::now().timestamp_millis().to_string())?;
    Ok(())
}

fn date_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use std::fmt::Write;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or(DEFAULT_DATE_FORMAT);

    let mut formatted = String::new();
    write!(formatted, "{}", chrono::Utc::now().format(format)).map_err(|_| {
        handlebars::RenderErrorReason::Other(format!("invalid date format '{}'", format))
    })?;
    out.write(&formatted)?;
    Ok(())
}
