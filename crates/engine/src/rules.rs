//! Leaf rule evaluation: regex matches against participant properties and
//! remote HTTP checks with a single retry.
//!
//! Every outcome is a plain `bool`. Remote failures (transport errors,
//! timeouts, 5xx/429 after the retry) are "not satisfied" and never surface
//! as errors, regardless of the rule's `negate` flag.

use cohort_core::experiment::{FetchRule, RegexRule, Rule};
use cohort_core::types::Properties;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::placeholders::{resolve, resolve_str, stringify};

/// Per-attempt timeout when none is configured.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Evaluates single access-control rules.
#[derive(Debug, Clone)]
pub struct RuleChecker {
    client: reqwest::Client,
}

/// Status and body of one completed HTTP exchange.
#[derive(Debug, Clone)]
struct FetchReply {
    status: u16,
    body: String,
}

impl RuleChecker {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        // No idle pool: concurrent checks never share a connection.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client })
    }

    /// Evaluate `rule` against `properties`; `negate` applies after the base result.
    pub async fn check(&self, rule: &Rule, properties: &Properties) -> bool {
        let base = match rule {
            Rule::Regex(regex_rule) => Some(check_regex(regex_rule, properties)),
            Rule::Fetch(fetch_rule) => self.check_fetch(fetch_rule, properties).await,
        };
        match base {
            Some(result) => result != rule.negate(),
            None => false,
        }
    }

    /// `None` when the remote check could not produce an answer.
    async fn check_fetch(&self, rule: &FetchRule, properties: &Properties) -> Option<bool> {
        let url = resolve_str(&rule.url, properties);
        let method = match Method::from_bytes(rule.method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                warn!(method = %rule.method, "Invalid HTTP method in fetch rule");
                return None;
            }
        };
        let headers = build_headers(rule, properties);
        let body = resolve(&rule.body, properties);
        let body = (!is_empty_body(&body)).then(|| body.to_string());

        let mut reply = self.send(&method, &url, &headers, body.as_deref()).await?;
        if is_retryable(reply.status) {
            debug!(url = %url, status = reply.status, "Retrying fetch rule");
            metrics::counter!("router.rules.fetch_retries").increment(1);
            reply = self.send(&method, &url, &headers, body.as_deref()).await?;
            if is_retryable(reply.status) {
                warn!(url = %url, status = reply.status, "Fetch rule failed after retry");
                metrics::counter!("router.rules.fetch_failures").increment(1);
                return None;
            }
        }

        Some(evaluate_reply(reply.status, &reply.body, rule.expected_status))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&str>,
    ) -> Option<FetchReply> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone());
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                Some(FetchReply { status, body })
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Fetch rule request failed");
                metrics::counter!("router.rules.fetch_failures").increment(1);
                None
            }
        }
    }
}

/// Unanchored search of `pattern` in the stringified field value.
pub fn check_regex(rule: &RegexRule, properties: &Properties) -> bool {
    let value = properties
        .get(&rule.field)
        .and_then(stringify)
        .unwrap_or_default();
    match Regex::new(&rule.pattern) {
        Ok(re) => re.is_match(&value),
        Err(e) => {
            warn!(pattern = %rule.pattern, error = %e, "Invalid regex in access rule");
            false
        }
    }
}

fn build_headers(rule: &FetchRule, properties: &Properties) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &rule.headers {
        let Some(value) = stringify(&resolve(value, properties)) else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid header in fetch rule"),
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_retryable(status: u16) -> bool {
    status >= 500 || status == 429
}

/// Decide a rule from a non-retryable reply.
fn evaluate_reply(status: u16, body: &str, expected_status: Option<u16>) -> bool {
    if let Some(expected) = expected_status {
        return status == expected;
    }
    let verdict = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("return").and_then(truthy));
    verdict.unwrap_or((200..300).contains(&status))
}

/// Loose truthiness of a JSON verdict; `None` for null.
fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().map_or(false, |f| f != 0.0)),
        Value::String(s) => Some(!s.is_empty() && s != "0"),
        Value::Array(items) => Some(!items.is_empty()),
        Value::Object(map) => Some(!map.is_empty()),
    }
}
