//! HTTP parameter pollution guard
//!
//! Repeated query parameters (`?sort=asc&sort=desc`) collapse to their last
//! occurrence before the request reaches a handler, so extractors always see
//! a single value per key.

use axum::http::{uri::PathAndQuery, Request, Uri};
use std::collections::HashMap;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

/// Layer that de-duplicates query parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamPollutionLayer;

impl<S> Layer<S> for ParamPollutionLayer {
    type Service = ParamPollutionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ParamPollutionService { inner }
    }
}

/// Service produced by [`ParamPollutionLayer`]
#[derive(Debug, Clone)]
pub struct ParamPollutionService<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for ParamPollutionService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if let Some(uri) = dedupe_uri(req.uri()) {
            debug!(original = %req.uri(), rewritten = %uri, "Collapsed repeated query parameters");
            *req.uri_mut() = uri;
        }
        self.inner.call(req)
    }
}

/// Rebuild `uri` with a de-duplicated query, or `None` if nothing repeats
fn dedupe_uri(uri: &Uri) -> Option<Uri> {
    let deduped = dedupe_query(uri.query()?)?;
    let path_and_query: PathAndQuery = format!("{}?{}", uri.path(), deduped).parse().ok()?;

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).ok()
}

/// Keep the last value of each key, in order of first appearance
pub(crate) fn dedupe_query(query: &str) -> Option<String> {
    let pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();

    let mut order: Vec<&str> = Vec::with_capacity(pairs.len());
    let mut last: HashMap<&str, &str> = HashMap::with_capacity(pairs.len());
    for &pair in &pairs {
        let key = pair.split_once('=').map_or(pair, |(key, _)| key);
        if last.insert(key, pair).is_none() {
            order.push(key);
        }
    }

    if order.len() == pairs.len() {
        return None;
    }

    Some(
        order
            .iter()
            .filter_map(|key| last.get(key).copied())
            .collect::<Vec<_>>()
            .join("&"),
    )
}
