//! The request pipeline controller.
//!
//! A `tower` layer orchestrating the three signal subsystems around the
//! inner service: admit -> instrument -> complete/fail. Excluded paths are a
//! hard short-circuit (no correlation id, span, metric, or log record).
//!
//! Terminal accounting is owned by [`RequestTelemetry`], an RAII guard: the
//! completion path and the error path each consume it exactly once, and its
//! `Drop` covers panics and abandoned requests, so the active-request gauge
//! decrements exactly once for every admission no matter how the request
//! exits. Instrumentation is infallible by construction - a telemetry
//! outage degrades to no-ops and can never change the business response or
//! error.

use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{HeaderMap, HeaderValue, Request, Response, header};
use futures::future::BoxFuture;
use opentelemetry::Context;
use opentelemetry::trace::TraceContextExt as _;
use tower::{Layer, Service};

use crate::config::ConfigProvider;
use crate::correlation::{self, CORRELATION_HEADER};
use crate::logging::StructuredLogger;
use crate::metrics::MetricsRegistry;
use crate::trace::{RequestSpan, TracingManager};

/// The shared, process-wide components every request borrows.
pub struct PipelineShared {
    pub config: ConfigProvider,
    pub metrics: Arc<MetricsRegistry>,
    pub tracing: Arc<TracingManager>,
    pub logger: Arc<StructuredLogger>,
}

impl fmt::Debug for PipelineShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineShared")
            .field("metrics", &self.metrics.is_available())
            .field("tracing", &self.tracing.is_available())
            .field("logging", &self.logger.is_available())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ObservabilityLayer {
    shared: Arc<PipelineShared>,
}

impl ObservabilityLayer {
    pub fn new(shared: Arc<PipelineShared>) -> Self {
        Self { shared }
    }
}

impl<S> Layer<S> for ObservabilityLayer {
    type Service = ObservabilityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservabilityService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObservabilityService<S> {
    inner: S,
    shared: Arc<PipelineShared>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ObservabilityService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness; leave the clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let config = self.shared.config.current();
        let path = req.uri().path().to_string();

        if !config.enabled || config.is_excluded(&path) {
            return Box::pin(inner.call(req));
        }

        let correlation_id = correlation::new_correlation_id();
        let parent = correlation::extract_context(req.headers());
        let method = req.method().to_string();
        let view = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let request_size = content_length(req.headers());

        // Admission order: gauge, span, start log. The matching decrement is
        // owned by the guard from here on.
        self.shared.metrics.start_request();
        let span = self.shared.tracing.start_span(
            req.method(),
            req.uri(),
            req.headers(),
            &parent,
            &correlation_id,
            &config,
        );
        self.shared
            .logger
            .request_start(&correlation_id, &method, &path, req.headers());

        let mut telemetry = RequestTelemetry {
            shared: self.shared.clone(),
            span,
            correlation_id,
            method,
            path,
            view,
            request_size,
            started: Instant::now(),
            add_correlation_header: config.add_correlation_header,
            finished: false,
        };

        Box::pin(async move {
            match inner.call(req).await {
                Ok(mut response) => {
                    telemetry.complete(&mut response);
                    Ok(response)
                }
                Err(error) => {
                    telemetry.fail(type_name_of::<S::Error>(), &error.to_string());
                    Err(error)
                }
            }
        })
    }
}

/// Per-request context: created at admission, consumed by exactly one
/// terminal transition. `Drop` is the safety net for panics and requests
/// the host abandons without a terminal event.
struct RequestTelemetry {
    shared: Arc<PipelineShared>,
    span: RequestSpan,
    correlation_id: String,
    method: String,
    path: String,
    view: String,
    request_size: u64,
    started: Instant,
    add_correlation_header: bool,
    finished: bool,
}

impl RequestTelemetry {
    fn complete<B>(&mut self, response: &mut Response<B>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let duration = self.started.elapsed();
        let status = response.status().as_u16();
        let response_size = content_length(response.headers());
        let span_context = self.span.span_context();

        self.span.end(status, duration);
        self.shared.metrics.record_completion(
            &self.method,
            &self.path,
            status,
            &self.view,
            duration,
            self.request_size,
            response_size,
        );
        self.shared.logger.request_end(
            &self.correlation_id,
            &self.method,
            &self.path,
            status,
            duration.as_secs_f64() * 1000.0,
        );

        let headers = response.headers_mut();
        if let Some(span_context) = span_context.filter(|sc| sc.is_valid()) {
            let cx = Context::new().with_remote_span_context(span_context);
            correlation::inject_context(&cx, headers);
        }
        if self.add_correlation_header {
            if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
                headers.insert(CORRELATION_HEADER, value);
            }
        }
    }

    fn fail(&mut self, exception_type: &str, message: &str) {
        if self.finished {
            return;
        }
        self.finished = true;

        let duration = self.started.elapsed();
        self.span.record_exception(exception_type, message);
        self.span.end_errored(message, duration);
        self.shared
            .metrics
            .record_exception(&self.method, &self.path, exception_type);
        self.shared.logger.request_exception(
            &self.correlation_id,
            &self.method,
            &self.path,
            exception_type,
            message,
            duration.as_secs_f64() * 1000.0,
        );
    }
}

impl Drop for RequestTelemetry {
    fn drop(&mut self) {
        if !self.finished {
            self.fail("abandoned", "request terminated without a terminal event");
        }
    }
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Last path segment of a type name, the way an exception class would be
/// labeled: `core::convert::Infallible` -> `Infallible`.
fn type_name_of<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}
