//! RED (rate, errors, duration) metrics for every routed request
//!
//! Each request produces exactly one duration observation and one counter
//! increment labelled with status code, method and matched route template.
//! Configured additional labels are derived from the query string: the label
//! is `"true"` when the query key is present (even with an empty value) and
//! `"false"` otherwise.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Query, Request, State},
    http::Uri,
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use regex::Regex;
use tokio::time::Instant;

use crate::observability::recorder::{
    LABEL_METHOD, LABEL_ROUTE, LABEL_STATUS_CODE, MetricsRegistry, RequestSample,
};

/// Route label for requests that matched no route template
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Names that would collide with base or global labels
const RESERVED_LABELS: &[&str] = &[
    LABEL_STATUS_CODE,
    LABEL_METHOD,
    LABEL_ROUTE,
    "service",
    "namespace",
    "environment",
    "le",
    "quantile",
];

lazy_static! {
    static ref LABEL_NAME: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label regex");
}

/// Whether `name` can be used as an additional label
pub fn is_valid_label_name(name: &str) -> bool {
    LABEL_NAME.is_match(name) && !name.starts_with("__") && !RESERVED_LABELS.contains(&name)
}

/// State for [`red_metrics_middleware`]
#[derive(Debug, Clone)]
pub struct RedMetrics {
    registry: MetricsRegistry,
    additional_labels: Arc<[String]>,
}

impl RedMetrics {
    /// Invalid, reserved and duplicate label names are dropped with a warning
    pub fn new(registry: MetricsRegistry, additional_labels: &[String]) -> Self {
        let mut seen = HashSet::new();
        let labels: Vec<String> = additional_labels
            .iter()
            .filter(|name| {
                if !is_valid_label_name(name) {
                    tracing::warn!(label = %name, "Ignoring invalid additional metric label");
                    return false;
                }
                seen.insert(name.as_str())
            })
            .cloned()
            .collect();

        Self {
            registry,
            additional_labels: labels.into(),
        }
    }

    pub fn additional_labels(&self) -> &[String] {
        &self.additional_labels
    }

    /// Presence of each configured label's key in the query string of `uri`
    pub fn label_presence(&self, uri: &Uri) -> Vec<(String, bool)> {
        if self.additional_labels.is_empty() {
            return Vec::new();
        }

        let keys: HashSet<String> = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|Query(pairs)| pairs.into_iter().map(|(key, _)| key).collect())
            .unwrap_or_default();

        self.additional_labels
            .iter()
            .map(|name| (name.clone(), keys.contains(name)))
            .collect()
    }
}

/// Status recorded when the client goes away before a response exists
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// One request in flight
///
/// Dropping the guard records the observation and releases the in-flight
/// gauge, so a request whose future is cancelled is still counted, with
/// [`CLIENT_CLOSED_REQUEST`] as its status.
struct PendingRequest<'a> {
    registry: &'a MetricsRegistry,
    method: String,
    route: String,
    extra: Vec<(String, bool)>,
    start: Instant,
    status: Option<u16>,
}

impl<'a> PendingRequest<'a> {
    fn start(registry: &'a MetricsRegistry, method: String, route: String, extra: Vec<(String, bool)>) -> Self {
        registry.request_started();
        Self {
            registry,
            method,
            route,
            extra,
            start: Instant::now(),
            status: None,
        }
    }

    fn complete(mut self, status: u16) {
        self.status = Some(status);
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.registry.observe_request(&RequestSample {
            method: std::mem::take(&mut self.method),
            route: std::mem::take(&mut self.route),
            status: self.status.unwrap_or(CLIENT_CLOSED_REQUEST),
            duration: self.start.elapsed(),
            extra: std::mem::take(&mut self.extra),
        });
        self.registry.request_finished();
    }
}

/// Middleware recording RED metrics for the wrapped routes
pub async fn red_metrics_middleware(
    State(red): State<RedMetrics>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let extra = red.label_presence(req.uri());

    let pending = PendingRequest::start(&red.registry, method, route, extra);
    let response = next.run(req).await;
    pending.complete(response.status().as_u16());

    response
}
