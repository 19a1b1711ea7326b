//! HTTP dispatch.
//!
//! The [`Dispatcher`] binds every routable trigger descriptor to an axum
//! route. A request is flattened into an [`HttpStimulus`], synthesized into
//! the trigger's event, run through the [`InvocationAdapter`] and the
//! outcome translated per the trigger's response mode.

mod response;

pub use response::{failure_response, translate};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{Query, RawPathParams};
use axum::http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::invoke::InvocationAdapter;
use crate::triggers::synthesize;
use crate::types::{
    FunctionRecord, HttpStimulus, InvocationOutcome, Stimulus, TriggerDescriptor, TriggerKind,
};

const ANY_METHOD: &str = "ANY";
const PREFLIGHT_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

// ---------------------------------------------------------------------------
// Bound routes
// ---------------------------------------------------------------------------

/// One `(method, path)` pair the dispatcher accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundRoute {
    pub method: String,
    pub path: String,
    pub function: String,
    pub kind: TriggerKind,
}

impl fmt::Display for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Clone)]
struct RouteBinding {
    record: Arc<FunctionRecord>,
    descriptor: Arc<TriggerDescriptor>,
    adapter: Arc<InvocationAdapter>,
    cors: bool,
}

impl RouteBinding {
    async fn handle(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        params: Result<RawPathParams, RawPathParamsRejection>,
        body: Bytes,
    ) -> Response {
        let stimulus = HttpStimulus {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            headers: flatten_headers(&headers),
            query: Query::<BTreeMap<String, String>>::try_from_uri(&uri)
                .map(|Query(query)| query)
                .unwrap_or_default(),
            path_params: params
                .map(|params| {
                    params
                        .iter()
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            body,
        };

        let function = &self.record.name;
        tracing::info!(function = %function, trigger = %self.descriptor, method = %method, "invoking");

        let event = synthesize(&self.descriptor, &Stimulus::Http(stimulus));
        let mut response = match self.adapter.invoke(&self.record, event).await {
            InvocationOutcome::Success(value) => {
                tracing::info!(function = %function, outcome = "success", "Success");
                tracing::debug!(function = %function, value = %value, "handler result");
                match translate(self.descriptor.response_mode, value) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(function = %function, error = %e, "Failure: {e}");
                        failure_response(&e.to_string())
                    }
                }
            }
            InvocationOutcome::Failure(e) => {
                tracing::warn!(function = %function, outcome = "failure", "Failure: {e}");
                failure_response(&e.message)
            }
        };

        if self.cors {
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        response
    }
}

/// Multi-valued headers are joined with `", "`.
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

async fn preflight(headers: HeaderMap) -> Response {
    let allow_headers = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(PREFLIGHT_METHODS),
            ),
            (ACCESS_CONTROL_ALLOW_HEADERS, allow_headers),
        ],
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct PathRoutes {
    router: MethodRouter,
    claimed: BTreeSet<String>,
}

/// Collects trigger routes and produces the axum [`Router`].
///
/// Descriptors that cannot be bound (missing method or path, an unroutable
/// path, a method or parameter name that clashes with an earlier binding)
/// are logged and skipped; the first binding of a route wins.
pub struct Dispatcher {
    adapter: Arc<InvocationAdapter>,
    global_cors: bool,
    paths: BTreeMap<String, PathRoutes>,
    bound: Vec<BoundRoute>,
}

impl Dispatcher {
    pub fn new(adapter: Arc<InvocationAdapter>, global_cors: bool) -> Self {
        Self {
            adapter,
            global_cors,
            paths: BTreeMap::new(),
            bound: Vec::new(),
        }
    }

    /// Bind `descriptor`'s route to `record`. Returns whether anything was bound.
    pub fn attach(&mut self, record: &Arc<FunctionRecord>, descriptor: &TriggerDescriptor) -> bool {
        let (Some(method), Some(path)) = (&descriptor.method, &descriptor.path) else {
            tracing::warn!(
                function = %record.name,
                trigger = %descriptor,
                "trigger has no method or path, skipping route"
            );
            return false;
        };

        if let Err(reason) = validate_path(path) {
            tracing::warn!(function = %record.name, route = %path, "unroutable path ({reason}), skipping");
            return false;
        }
        if let Some(existing) = self
            .paths
            .keys()
            .find(|existing| *existing != path && params_conflict(existing, path))
        {
            tracing::warn!(
                function = %record.name,
                route = %path,
                existing = %existing,
                "route parameters conflict with an existing route, skipping"
            );
            return false;
        }

        let mut methods = vec![method.clone()];
        if descriptor.passthrough_post && method != "POST" && method != ANY_METHOD {
            methods.push("POST".to_string());
        }

        let binding = RouteBinding {
            record: Arc::clone(record),
            descriptor: Arc::new(descriptor.clone()),
            adapter: Arc::clone(&self.adapter),
            cors: descriptor.cors_enabled && !self.global_cors,
        };

        let entry = self.paths.entry(path.clone()).or_insert_with(|| PathRoutes {
            router: MethodRouter::new(),
            claimed: BTreeSet::new(),
        });

        let mut attached = false;
        for method in methods {
            if entry.claimed.contains(&method) {
                tracing::warn!(
                    function = %record.name,
                    route = %format!("{method} {path}"),
                    "route already bound, skipping"
                );
                continue;
            }

            let filter = if method == ANY_METHOD {
                None
            } else {
                match Method::from_bytes(method.as_bytes())
                    .ok()
                    .and_then(|m| MethodFilter::try_from(m).ok())
                {
                    Some(filter) => Some(filter),
                    None => {
                        tracing::warn!(function = %record.name, method = %method, "unsupported method, skipping");
                        continue;
                    }
                }
            };

            let binding = binding.clone();
            let handler = move |method: Method,
                                uri: Uri,
                                headers: HeaderMap,
                                params: Result<RawPathParams, RawPathParamsRejection>,
                                body: Bytes| async move {
                binding.handle(method, uri, headers, params, body).await
            };

            let router = std::mem::replace(&mut entry.router, MethodRouter::new());
            entry.router = match filter {
                Some(filter) => router.on(filter, handler),
                None => router.fallback(handler),
            };
            entry.claimed.insert(method.clone());
            self.bound.push(BoundRoute {
                method,
                path: path.clone(),
                function: record.name.clone(),
                kind: descriptor.kind,
            });
            attached = true;
        }

        if attached && binding.cors && !entry.claimed.contains("OPTIONS") {
            let router = std::mem::replace(&mut entry.router, MethodRouter::new());
            entry.router = router.options(preflight);
            entry.claimed.insert("OPTIONS".to_string());
        }

        attached
    }

    /// Every route bound so far, in attach order.
    pub fn routes(&self) -> &[BoundRoute] {
        &self.bound
    }

    pub fn into_router(self) -> Router {
        let mut router = Router::new();
        for (path, routes) in self.paths {
            router = router.route(&path, routes.router);
        }
        if self.global_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([
                        Method::GET,
                        Method::HEAD,
                        Method::PUT,
                        Method::PATCH,
                        Method::POST,
                        Method::DELETE,
                    ])
                    .allow_headers(Any),
            );
        }
        router
    }
}

// ---------------------------------------------------------------------------
// Path checks
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Static(&'a str),
    Param(&'a str),
    CatchAll(&'a str),
}

fn segment(raw: &str) -> Segment<'_> {
    match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        Some(inner) => match inner.strip_prefix('*') {
            Some(name) => Segment::CatchAll(name),
            None => Segment::Param(inner),
        },
        None => Segment::Static(raw),
    }
}

fn segments(path: &str) -> impl Iterator<Item = Segment<'_>> {
    path.trim_start_matches('/').split('/').map(segment)
}

/// Reject paths the router would refuse to register.
fn validate_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("path must start with '/'");
    }
    let parts: Vec<_> = segments(path).collect();
    let last = parts.len().saturating_sub(1);
    for (index, part) in parts.iter().enumerate() {
        match part {
            Segment::Static(text) => {
                if text.contains(['{', '}']) {
                    return Err("parameters must span a whole segment");
                }
                if text.starts_with([':', '*']) {
                    return Err("segments must not start with ':' or '*'");
                }
            }
            Segment::Param(name) | Segment::CatchAll(name) => {
                if name.is_empty() || name.contains(['{', '}', '*', '/']) {
                    return Err("invalid parameter name");
                }
                if matches!(part, Segment::CatchAll(_)) && index != last {
                    return Err("catch-all must be the last segment");
                }
            }
        }
    }
    Ok(())
}

/// Whether two paths share a prefix and then bind differently named (or
/// differently shaped) parameters at the same position.
fn params_conflict(a: &str, b: &str) -> bool {
    for (left, right) in segments(a).zip(segments(b)) {
        match (left, right) {
            (Segment::Static(x), Segment::Static(y)) if x == y => continue,
            (Segment::Static(_), _) | (_, Segment::Static(_)) => return false,
            (left, right) if left == right => continue,
            _ => return true,
        }
    }
    false
}
