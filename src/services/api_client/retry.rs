use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use tokio::time::{Instant, sleep};

use super::ClientError;
use super::backoff::{BackoffStrategy, strategy_from_config};
use crate::config::RetryConfig;
use crate::observability::context::CorrelationContext;
use crate::observability::tracing::inject_trace_context;

/// HTTP client that retries transient failures
///
/// Cloning is cheap; clones share the connection pool. Calls share no
/// mutable state, so one client can serve any number of concurrent tasks.
#[derive(Debug, Clone)]
pub struct RetryingClient {
    http: reqwest::Client,
    strategy: Arc<dyn BackoffStrategy>,
    default_attempts: u32,
    default_waits: Arc<[Duration]>,
    retryable_statuses: Arc<[StatusCode]>,
    attempt_timeout: Duration,
}

impl RetryingClient {
    pub fn new(config: &RetryConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            strategy: Arc::from(strategy_from_config(config)),
            default_attempts: config.max_attempts,
            default_waits: config
                .waits_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            retryable_statuses: config
                .retryable_status_codes
                .iter()
                .filter_map(|code| StatusCode::from_u16(*code).ok())
                .collect(),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
        })
    }

    /// Replace the backoff strategy used for default plans
    pub fn with_strategy(mut self, strategy: impl BackoffStrategy + 'static) -> Self {
        self.set_strategy(strategy);
        self
    }

    pub fn set_strategy(&mut self, strategy: impl BackoffStrategy + 'static) {
        self.strategy = Arc::new(strategy);
        self.default_waits = Arc::from([]);
    }

    /// Plan used when a request carries no waits of its own
    pub fn default_plan(&self) -> Vec<Duration> {
        if self.default_waits.is_empty() {
            self.strategy.plan(self.default_attempts)
        } else {
            self.default_waits.to_vec()
        }
    }

    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            waits: Vec::new(),
            deadline: None,
            context: None,
            error: None,
        }
    }

    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, url)
    }

    /// One attempt. `Err` carries the reason the attempt counts as failed.
    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&Bytes>,
        timeout: Duration,
    ) -> Result<Bytes, String> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .headers(headers.clone())
            .timeout(timeout);
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if self.retryable_statuses.contains(&status) {
            return Err(format!("retryable status {}", status.as_u16()));
        }

        response.bytes().await.map_err(|e| e.to_string())
    }

    async fn run(&self, request: Call, cx: &CorrelationContext) -> Result<Bytes, ClientError> {
        let logger = cx.logger();
        let plan = if request.waits.is_empty() {
            self.default_plan()
        } else {
            request.waits
        };
        if plan.is_empty() {
            return Err(ClientError::InvalidRequest("retry plan is empty".to_string()));
        }

        let mut headers = request.headers;
        inject_trace_context(cx.otel_context(), &mut headers);

        let total = plan.len() as u32;
        let mut last_error = String::new();

        for (index, wait) in plan.iter().enumerate() {
            let attempt = index as u32 + 1;

            let timeout = match request.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ClientError::DeadlineExceeded { attempts: index as u32 });
                    }
                    remaining.min(self.attempt_timeout)
                }
                None => self.attempt_timeout,
            };

            match self
                .attempt(&request.method, &request.url, &headers, request.body.as_ref(), timeout)
                .await
            {
                Ok(body) => {
                    cx.set_attribute(KeyValue::new("http.request.resend_count", i64::from(index as u32)));
                    if attempt > 1 {
                        logger.info(&format!(
                            "{} {} succeeded on attempt {}/{}",
                            request.method, request.url, attempt, total
                        ));
                    }
                    return Ok(body);
                }
                Err(reason) => {
                    logger.warn(&format!(
                        "{} {} attempt {}/{} failed: {}",
                        request.method, request.url, attempt, total, reason
                    ));
                    last_error = reason;
                }
            }

            if let Some(deadline) = request.deadline {
                let now = Instant::now();
                if now >= deadline || (attempt < total && now + *wait >= deadline) {
                    return Err(ClientError::DeadlineExceeded { attempts: attempt });
                }
            }

            if attempt < total {
                sleep(*wait).await;
            }
        }

        Err(ClientError::MaxRetriesExceeded {
            attempts: total,
            last_error,
        })
    }

    async fn execute(&self, call: Call, context: CorrelationContext) -> Result<Bytes, ClientError> {
        let cx = context.start_span_with_kind(
            format!("HTTP {}", call.method),
            SpanKind::Client,
            vec![
                KeyValue::new("http.request.method", call.method.to_string()),
                KeyValue::new("url.full", call.url.to_string()),
            ],
        );

        let result = self.run(call, &cx).await;
        if let Err(e) = &result {
            cx.set_error_status(e.to_string());
        }
        cx.end_span();
        result
    }
}

/// Fully specified call, ready for the retry loop
struct Call {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    waits: Vec<Duration>,
    deadline: Option<Instant>,
}

/// Builder for one retried call, created by the verbs on [`RetryingClient`]
#[must_use = "a request does nothing until sent"]
pub struct RequestBuilder<'a> {
    client: &'a RetryingClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    waits: Vec<Duration>,
    deadline: Option<Instant>,
    context: Option<CorrelationContext>,
    error: Option<ClientError>,
}

impl RequestBuilder<'_> {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Some(body.into());
            }
            Err(e) => self.error = Some(ClientError::InvalidRequest(e.to_string())),
        }
        self
    }

    /// Per-attempt waits; empty keeps the client's default plan
    pub fn waits(mut self, waits: Vec<Duration>) -> Self {
        self.waits = waits;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Correlate the call with `cx`: its logger, trace and deadline
    pub fn context(mut self, cx: &CorrelationContext) -> Self {
        self.context = Some(cx.clone());
        self
    }

    pub async fn send(self) -> Result<Bytes, ClientError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let url = Url::parse(&self.url)
            .map_err(|e| ClientError::InvalidRequest(format!("{}: {}", self.url, e)))?;
        let context = self.context.unwrap_or_default();
        let deadline = self.deadline.or_else(|| context.deadline());

        let call = Call {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            waits: self.waits,
            deadline,
        };

        self.client.execute(call, context).await
    }
}
