//! HTTP route definition and path-pattern matching for the framework router.
//!
//! Patterns use `{name}` for a single path segment and a trailing `{*name}`
//! for a catch-all that captures the remainder of the path, which is what
//! the gateway's own `/g/{route_name}/{*rest}` entry point needs.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use http::Method;

use crate::{
    handler::BoxHandler,
    middleware::Next,
    responder::Responder,
    types::{BoxMiddleware, Request},
};

/// Path parameters captured during matching, inserted into request extensions.
#[derive(Clone, Debug, Default)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

pub struct Route {
    pub path: String,
    pub method: Method,
    pub handler: BoxHandler,
    pub middlewares: RwLock<VecDeque<BoxMiddleware>>,
    pub tsr: bool,
}

impl Route {
    pub fn new(path: String, method: Method, handler: BoxHandler, tsr: Option<bool>) -> Self {
        Self {
            path,
            method,
            handler,
            middlewares: RwLock::new(VecDeque::new()),
            tsr: tsr.unwrap_or(false),
        }
    }

    pub fn middleware<F, Fut, R>(&self, f: F) -> &Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: std::future::Future<Output = R> + Send + 'static,
        R: Responder + Send + 'static,
    {
        let mw: BoxMiddleware = Arc::new(move |req, next| {
            let fut = f(req, next);
            Box::pin(async move { fut.await.into_response() })
        });
        self.middlewares.write().unwrap().push_back(mw);
        self
    }

    /// Matches `path` against this route's pattern, returning captured
    /// params on success. An empty map still counts as a match.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        match_pattern(&self.path, path)
    }
}

pub(crate) fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pat_segs: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut params = HashMap::new();
    let mut pi = 0usize;
    let mut vi = 0usize;

    while pi < pat_segs.len() {
        let seg = pat_segs[pi];

        if let Some(name) = seg.strip_prefix("{*").and_then(|s| s.strip_suffix('}')) {
            let rest = path_segs.get(vi..).unwrap_or(&[]).join("/");
            params.insert(name.to_string(), rest);
            return Some(params);
        }

        let Some(value) = path_segs.get(vi) else {
            return None;
        };

        if let Some(name) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            params.insert(name.to_string(), (*value).to_string());
        } else if seg != *value {
            return None;
        }

        pi += 1;
        vi += 1;
    }

    if vi == path_segs.len() { Some(params) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_catch_all_tail() {
        let params = match_pattern("/g/{route_name}/{*rest}", "/g/billing/v1/invoices/42").unwrap();
        assert_eq!(params.get("route_name").unwrap(), "billing");
        assert_eq!(params.get("rest").unwrap(), "v1/invoices/42");
    }

    #[test]
    fn matches_catch_all_empty_tail() {
        let params = match_pattern("/g/{route_name}/{*rest}", "/g/billing/").unwrap();
        assert_eq!(params.get("rest").unwrap(), "");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(match_pattern("/health", "/health/extra").is_none());
    }

    #[test]
    fn literal_segments_must_match() {
        assert!(match_pattern("/metrics", "/metric").is_none());
        assert!(match_pattern("/metrics", "/metrics").is_some());
    }
}
