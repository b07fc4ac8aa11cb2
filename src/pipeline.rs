//! Request Pipeline — the gateway's single proxy entry point,
//! `ANY /g/{route_name}/{path...}`, composing authentication, routing,
//! abuse/rate/quota admission, the response cache and the upstream fetch
//! into one handler.
//!
//! Rather than leaning on the framework's middleware chain for cross-cutting
//! concerns, this pipeline is a single sequential function: every stage here
//! can short-circuit the next, and several stages (abuse, rate limit, quota,
//! cache) need the same resolved `(ApiKey, Tenant, Route)` triple, which a
//! generic middleware chain would otherwise have to smuggle through request
//! extensions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use http_body_util::BodyExt;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::responder::Responder;

use crate::abuse::AbuseDetector;
use crate::bloom::BloomFilter;
use crate::cache::entry::{CacheEntry, now_epoch_secs};
use crate::cache::key::{self, KeyInput};
use crate::cache::{Lookup, ResponseCache};
use crate::config::{ApiKey, CachePolicy, ConfigCache, Route};
use crate::error::{GatewayError, Result as GwResult};
use crate::kv::KvStore;
use crate::log::{CacheStatus, LogSink, RequestLog};
use crate::metrics::Metrics;
use crate::quota::QuotaCounter;
use crate::ratelimit::RateLimiter;
use crate::route::PathParams;
use crate::types::{Request, Response};
use crate::upstream::{Outcome, UpstreamClient};

const KV_SOFT_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;
const FETCH_LEASE_TTL: Duration = Duration::from_secs(10);
const FETCH_WAIT_SLACK: Duration = Duration::from_millis(500);

/// Everything the pipeline needs, constructed once at startup and shared
/// across every request via the handler closure registered on the router.
pub struct GatewayState {
    pub config: Arc<ConfigCache>,
    pub kv: Arc<dyn KvStore>,
    pub cache: ResponseCache,
    pub bloom: BloomFilter,
    pub upstream: UpstreamClient,
    pub abuse_alpha: f64,
    pub abuse_z_threshold: f64,
    pub abuse_block_duration: Duration,
    pub default_rate_limit_rps: f64,
    pub default_rate_limit_burst: f64,
    pub metrics: Arc<Metrics>,
    pub log: LogSink,
}

impl GatewayState {
    fn abuse_detector(&self) -> AbuseDetector<'_> {
        AbuseDetector::new(
            self.kv.as_ref(),
            self.abuse_alpha,
            self.abuse_z_threshold,
            self.abuse_block_duration,
        )
    }

    fn rate_limiter(&self) -> RateLimiter<'_> {
        RateLimiter::new(self.kv.as_ref())
    }

    fn quota_counter(&self) -> QuotaCounter<'_> {
        QuotaCounter::new(self.kv.as_ref())
    }
}

/// Runs a KV-backed check with a soft deadline; a slow or failing backend
/// degrades the stage to `None` rather than failing the request, per the
/// 250ms hot-path bound.
async fn soft<T>(stage: &'static str, fut: impl std::future::Future<Output = anyhow::Result<T>>) -> Option<T> {
    match tokio::time::timeout(KV_SOFT_TIMEOUT, fut).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            tracing::warn!(stage, error = %e, "pipeline stage failed, degrading");
            None
        }
        Err(_) => {
            tracing::warn!(stage, "pipeline stage exceeded soft timeout, degrading");
            None
        }
    }
}

fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// Matches `path_pattern` (a literal path, or a literal prefix ending in
/// `*`) against `path`, returning the length of the literal prefix on a
/// match so callers can rank matches by specificity.
fn pattern_specificity(pattern: &str, path: &str) -> Option<usize> {
    let path = normalize(path);
    if let Some(prefix) = pattern.strip_suffix('*') {
        let prefix = normalize(prefix);
        if path.starts_with(prefix) {
            Some(prefix.len())
        } else {
            None
        }
    } else if normalize(pattern) == path {
        Some(pattern.len())
    } else {
        None
    }
}

fn is_cacheable_status(entry_status: u16, policy: &CachePolicy) -> bool {
    policy.cacheable_statuses.contains(&entry_status)
}

fn is_error_status(status: u16) -> bool {
    status >= 500
}

/// A response carrying `Cache-Control: no-store` must never be written to
/// the cache, regardless of status or policy.
fn response_allows_store(headers: &[(String, String)]) -> bool {
    !headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("cache-control")
            && value.split(',').any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    })
}

#[derive(Clone)]
pub struct Pipeline(Arc<GatewayState>);

impl Pipeline {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self(state)
    }

    pub async fn handle(self, req: Request) -> Response {
        match self.run(req).await {
            Ok(resp) => resp,
            Err(e) => e.into_response(),
        }
    }

    async fn run(&self, req: Request) -> GwResult<Response> {
        let request_id = Uuid::new_v4().to_string();
        let started = std::time::Instant::now();
        let state = &self.0;

        let route_name = req
            .extensions()
            .get::<PathParams>()
            .and_then(|p| p.get("route_name").map(str::to_string))
            .unwrap_or_default();
        let rest = req
            .extensions()
            .get::<PathParams>()
            .and_then(|p| p.get("rest").map(str::to_string))
            .unwrap_or_default();
        let downstream_path = format!("/{rest}");
        let method = req.method().clone();
        let query = req
            .uri()
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect::<Vec<_>>())
            .unwrap_or_default();

        let outcome = self
            .run_admitted(&request_id, &route_name, &downstream_path, &method, &query, req)
            .await;

        let (response, api_key_id, route_id, status, cache_status, error_type) = match outcome {
            Ok((resp, api_key_id, route_id, cache_status)) => {
                let status = resp_status(&resp);
                (resp, api_key_id, route_id, status, cache_status, None)
            }
            Err(e) => {
                let status = e.status().as_u16();
                let error_type = Some(e.kind_str().to_string());
                let e = e.with_request_id(request_id.clone());
                (e.into_response(), None, None, status, CacheStatus::NotApplicable, error_type)
            }
        };

        state.log.emit(RequestLog::now(
            request_id,
            api_key_id,
            route_id,
            method.to_string(),
            downstream_path,
            status,
            started.elapsed().as_millis() as u64,
            cache_status,
            error_type,
        ));

        Ok(response)
    }

    /// The actual admission + proxy state machine, run once the request id
    /// is known. Returns the response plus bookkeeping the caller needs for
    /// the request log (the error path carries its own bookkeeping).
    #[allow(clippy::too_many_arguments)]
    async fn run_admitted(
        &self,
        request_id: &str,
        route_name: &str,
        downstream_path: &str,
        method: &Method,
        query: &[(String, String)],
        req: Request,
    ) -> GwResult<(Response, Option<String>, Option<String>, CacheStatus)> {
        let state = &self.0;

        // 1. Extract credentials.
        let presented = req
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(GatewayError::missing_api_key)?;

        // 2. Authenticate.
        let snapshot = state.config.snapshot();
        let hashed = hash_secret(&presented);
        let (api_key, _tenant) = snapshot
            .authenticate(&hashed)
            .map(|(k, t)| (k.clone(), t.clone()))
            .ok_or_else(GatewayError::invalid_api_key)?;

        // 3. Route match.
        let route = best_matching_route(&snapshot.routes, route_name, downstream_path, method)
            .cloned()
            .ok_or_else(GatewayError::no_route)?;
        let policy = snapshot.policy_for(&route).cloned();
        let tail = with_query(downstream_path, query);

        state.metrics.admissions_total.inc();

        // 4. Abuse precheck.
        if let Some(record) = soft("abuse_precheck", state.abuse_detector().is_blocked(&api_key.id))
            .await
            .flatten()
        {
            state.metrics.abuse_blocks_total.inc();
            let retry_after = record.blocked_until_epoch_secs.saturating_sub(now_epoch_secs());
            return Err(GatewayError::abuse_blocked(retry_after.max(1)).with_request_id(request_id));
        }

        // 5. Rate limit.
        let rate_key = format!("{}:{}", api_key.id, route.id);
        let rate_decision = soft(
            "rate_limit",
            state.rate_limiter().check(
                api_key.rate_limit_algorithm,
                &rate_key,
                if api_key.rate_limit_rps > 0.0 {
                    api_key.rate_limit_rps
                } else {
                    state.default_rate_limit_rps
                },
                if api_key.rate_limit_burst > 0.0 {
                    api_key.rate_limit_burst
                } else {
                    state.default_rate_limit_burst
                },
            ),
        )
        .await;
        if let Some(decision) = rate_decision {
            if !decision.allowed {
                state.metrics.rate_limit_denials_total.inc();
                return Err(GatewayError::rate_limited(decision.retry_after_secs).with_request_id(request_id));
            }
        }

        // 6. Quota.
        let quota_decision = soft(
            "quota",
            state
                .quota_counter()
                .check_and_increment(&api_key.id, api_key.quota_daily, api_key.quota_monthly),
        )
        .await;
        if let Some(decision) = quota_decision {
            if !decision.allowed {
                state.metrics.quota_denials_total.inc();
                return Err(GatewayError::quota_exceeded(decision.retry_after_secs).with_request_id(request_id));
            }
        }

        // Tick the rate EWMA for this admitted request. A block installed
        // here only gates *future* requests, since this one already passed
        // the precheck above.
        if soft("abuse_record_request", state.abuse_detector().record_request(&api_key.id))
            .await
            .flatten()
            .is_some()
        {
            state.metrics.abuse_blocks_total.inc();
        }

        // Collect the inbound body once admission has passed; small and
        // bounded, mirroring the upstream client's own body cap.
        let (parts, incoming) = req.into_parts();
        let body = collect_bounded(incoming, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(|e| GatewayError::from(e).with_request_id(request_id))?;

        let cacheable_method = matches!(*method, Method::GET | Method::HEAD);
        let policy_allows_cache = policy
            .as_ref()
            .map(|p| !p.cache_no_store && p.cacheable_methods.iter().any(|m| m.eq_ignore_ascii_case(method.as_str())))
            .unwrap_or(false);

        if cacheable_method && policy_allows_cache {
            let policy_ref = policy.as_ref().unwrap();
            let cache_key_input = KeyInput {
                method: method.as_str(),
                tenant_id: &api_key.tenant_id,
                route_name: &route.name,
                path: downstream_path,
                query,
                vary: &vary_pairs(&parts.headers, &policy_ref.vary_headers),
            };
            let cache_key = key::canonicalize(&cache_key_input);
            let negative_key = key::canonicalize_negative(&cache_key_input);

            match soft("cache_lookup", state.cache.lookup(&cache_key)).await {
                Some(Lookup::Hit(entry)) => {
                    state.metrics.cache_outcomes_total.with_label_values(&["HIT"]).inc();
                    return Ok((
                        build_response(entry, CacheStatus::Hit, request_id, &route.name),
                        Some(api_key.id),
                        Some(route.id),
                        CacheStatus::Hit,
                    ));
                }
                Some(Lookup::Stale(entry)) => {
                    state.metrics.cache_outcomes_total.with_label_values(&["STALE"]).inc();
                    self.spawn_revalidation(cache_key.clone(), route.clone(), policy_ref.clone(), parts.headers.clone(), tail.clone());
                    return Ok((
                        build_response(entry, CacheStatus::Stale, request_id, &route.name),
                        Some(api_key.id),
                        Some(route.id),
                        CacheStatus::Stale,
                    ));
                }
                Some(Lookup::Miss) | None => {
                    if let Some(entry) = soft("bloom_negative_lookup", async {
                        if state.bloom.probe(&cache_key).await? {
                            state.cache.lookup_negative(&negative_key).await
                        } else {
                            Ok(None)
                        }
                    })
                    .await
                    .flatten()
                    {
                        state.metrics.cache_outcomes_total.with_label_values(&["MISS"]).inc();
                        return Ok((
                            build_response(entry, CacheStatus::Miss, request_id, &route.name),
                            Some(api_key.id),
                            Some(route.id),
                            CacheStatus::Miss,
                        ));
                    }

                    state.metrics.cache_outcomes_total.with_label_values(&["MISS"]).inc();
                    let outcome = self
                        .fetch_single_flight(
                            &cache_key,
                            &route,
                            Some(policy_ref.clone()),
                            &parts.headers,
                            body,
                            method.clone(),
                            &tail,
                        )
                        .await;
                    let response = self
                        .finish(
                            outcome,
                            &api_key,
                            &route,
                            request_id,
                            CacheStatus::Miss,
                            Some((&cache_key, &negative_key)),
                            policy_ref.ttl_seconds,
                        )
                        .await?;
                    return Ok((response, Some(api_key.id), Some(route.id), CacheStatus::Miss));
                }
            }
        }

        // Not cacheable: direct fetch, bypassing the cache entirely.
        state.metrics.cache_outcomes_total.with_label_values(&["BYPASS"]).inc();
        let outcome = state
            .upstream
            .forward(
                &route.upstream_base_url,
                &tail,
                method.clone(),
                parts.headers.clone(),
                body,
                Duration::from_millis(route.timeout_ms),
            )
            .await;
        let response = self
            .finish(outcome, &api_key, &route, request_id, CacheStatus::Bypass, None, 0)
            .await?;
        Ok((response, Some(api_key.id), Some(route.id), CacheStatus::Bypass))
    }

    /// Single-flight MISS handling: the lease holder fetches and stores;
    /// everyone else waits for the `cache:done` notification and re-reads,
    /// falling back to an uncoalesced direct fetch if the holder never
    /// shows up.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_single_flight(
        &self,
        cache_key: &str,
        route: &Route,
        policy: Option<CachePolicy>,
        headers: &HeaderMap,
        body: Bytes,
        method: Method,
        tail: &str,
    ) -> Outcome {
        let state = &self.0;
        let lease_id = Uuid::new_v4().to_string();
        let timeout = Duration::from_millis(route.timeout_ms);

        let acquired = soft(
            "cache_lease_acquire",
            state.cache.acquire_fetch_lease(cache_key, &lease_id, FETCH_LEASE_TTL),
        )
        .await
        .unwrap_or(true); // degrade: treat as acquired rather than stall behind a lease we can't see

        if acquired {
            let outcome = state
                .upstream
                .forward(&route.upstream_base_url, tail, method, headers.clone(), body, timeout)
                .await;
            if let (Outcome::Ok { status, headers, body }, Some(policy)) = (&outcome, policy.as_ref()) {
                if is_cacheable_status(*status, policy) && body.len() <= policy.max_body_bytes && response_allows_store(headers) {
                    let entry = CacheEntry::new(*status, headers.clone(), body.clone(), policy.ttl_seconds, policy.stale_seconds);
                    let _ = soft("cache_store", state.cache.store(cache_key, &entry)).await;
                }
            }
            let _ = soft(
                "cache_lease_release",
                state.cache.release_fetch_lease(cache_key, &lease_id),
            )
            .await;
            return outcome;
        }

        let _ = soft(
            "cache_wait_for_fetch",
            state.cache.wait_for_fetch(cache_key, FETCH_LEASE_TTL + FETCH_WAIT_SLACK),
        )
        .await;
        if let Some(Lookup::Hit(entry) | Lookup::Stale(entry)) = soft("cache_recheck", state.cache.lookup(cache_key)).await {
            return Outcome::Ok {
                status: entry.status,
                headers: entry.headers,
                body: entry.body,
            };
        }

        // The holder never published a result; fetch directly without
        // storing rather than stall the caller further.
        state
            .upstream
            .forward(&route.upstream_base_url, tail, method, headers.clone(), body, timeout)
            .await
    }

    /// Spawns a background revalidation for a STALE entry, guarded by the
    /// `revalidate:<hex>` lease so only one instance refreshes it at a time.
    fn spawn_revalidation(&self, cache_key: String, route: Route, policy: CachePolicy, headers: HeaderMap, tail: String) {
        let state = self.0.clone();
        tokio::spawn(async move {
            let lease_id = Uuid::new_v4().to_string();
            let acquired = state
                .cache
                .acquire_revalidate_lease(&cache_key, &lease_id, Duration::from_secs(policy.stale_seconds.max(1)))
                .await
                .unwrap_or(false);
            if !acquired {
                return;
            }

            let outcome = state
                .upstream
                .forward(
                    &route.upstream_base_url,
                    &tail,
                    Method::GET,
                    headers,
                    Bytes::new(),
                    Duration::from_millis(route.timeout_ms),
                )
                .await;
            if let Outcome::Ok { status, headers, body } = outcome {
                if is_cacheable_status(status, &policy) && body.len() <= policy.max_body_bytes && response_allows_store(&headers) {
                    let entry = CacheEntry::new(status, headers, body, policy.ttl_seconds, policy.stale_seconds);
                    let _ = state.cache.store(&cache_key, &entry).await;
                }
            }
            // Errors are swallowed: the stale entry remains valid until its
            // own stale_until regardless of whether this refresh succeeded.
            let _ = state.cache.release_revalidate_lease(&cache_key, &lease_id).await;
        });
    }

    /// Turns an [`Outcome`] into a client response, updates the abuse
    /// error-rate EWMA, and (for GET requests landing on 404/410) records
    /// the negative-cache hint.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        outcome: Outcome,
        api_key: &ApiKey,
        route: &Route,
        request_id: &str,
        cache_status: CacheStatus,
        negative_keys: Option<(&str, &str)>,
        negative_ttl_seconds: u64,
    ) -> GwResult<Response> {
        let state = &self.0;

        let (status_label, result) = match outcome {
            Outcome::Ok { status, headers, body } => {
                let is_error = is_error_status(status);
                state.metrics.upstream_outcomes_total.with_label_values(&["ok"]).inc();
                let _ = soft("abuse_record_outcome", state.abuse_detector().record_outcome(&api_key.id, is_error)).await;

                if let Some((cache_key, negative_key)) = negative_keys {
                    if matches!(status, 404 | 410) {
                        // The bloom filter must be probed and added under the same
                        // string (`cache_key`) — adding under `negative_key` would
                        // hash a different string than `probe` checks.
                        let _ = soft("bloom_add", state.bloom.add(cache_key)).await;
                        let entry = CacheEntry::new(status, headers.clone(), body.clone(), negative_ttl_seconds.max(1), 0);
                        let _ = soft("cache_store_negative", state.cache.store_negative(negative_key, &entry)).await;
                    }
                }

                let mut builder = http::Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
                for (name, value) in &headers {
                    if let (Ok(name), Ok(value)) = (http::HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                        builder = builder.header(name, value);
                    }
                }
                let response = builder
                    .body(crate::body::GatewayBody::from(body))
                    .unwrap_or_else(|_| http::Response::new(crate::body::GatewayBody::empty()));
                ("ok", Ok(response))
            }
            Outcome::Timeout => {
                state.metrics.upstream_outcomes_total.with_label_values(&["timeout"]).inc();
                let _ = soft("abuse_record_outcome", state.abuse_detector().record_outcome(&api_key.id, true)).await;
                ("timeout", Err(GatewayError::upstream_timeout()))
            }
            Outcome::ConnectError(detail) => {
                state.metrics.upstream_outcomes_total.with_label_values(&["connect_error"]).inc();
                let _ = soft("abuse_record_outcome", state.abuse_detector().record_outcome(&api_key.id, true)).await;
                ("connect_error", Err(GatewayError::upstream_error(detail)))
            }
            Outcome::ProtocolError(detail) => {
                state.metrics.upstream_outcomes_total.with_label_values(&["protocol_error"]).inc();
                let _ = soft("abuse_record_outcome", state.abuse_detector().record_outcome(&api_key.id, true)).await;
                ("protocol_error", Err(GatewayError::upstream_error(detail)))
            }
        };
        tracing::debug!(outcome = status_label, route = %route.name, "upstream fetch completed");

        let mut response = result.map_err(|e| e.with_request_id(request_id))?;
        decorate(&mut response, request_id, &route.name, cache_status, None);
        Ok(response)
    }
}

fn with_query(path: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        format!("{path}?{encoded}")
    }
}

fn vary_pairs(headers: &HeaderMap, vary_headers: &[String]) -> Vec<(String, String)> {
    vary_headers
        .iter()
        .map(|name| {
            let value = headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_lowercase)
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

fn best_matching_route<'a>(routes: &'a [Route], route_name: &str, path: &str, method: &Method) -> Option<&'a Route> {
    routes
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_active && r.name == route_name)
        .filter(|(_, r)| r.methods.iter().any(|m| m.eq_ignore_ascii_case(method.as_str())))
        .filter_map(|(i, r)| pattern_specificity(&r.path_pattern, path).map(|specificity| (i, specificity, r)))
        .max_by(|(i_a, spec_a, r_a), (i_b, spec_b, r_b)| {
            r_a.priority
                .cmp(&r_b.priority)
                .then(spec_a.cmp(spec_b))
                .then(i_b.cmp(i_a)) // earlier registration wins ties -> later index compares "less"
        })
        .map(|(_, _, r)| r)
}

fn build_response(entry: CacheEntry, cache_status: CacheStatus, request_id: &str, route_name: &str) -> Response {
    let age = entry.age_seconds(now_epoch_secs());
    let mut builder = http::Response::builder().status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK));
    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (http::HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            builder = builder.header(name, value);
        }
    }
    let mut response = builder
        .body(crate::body::GatewayBody::from(entry.body))
        .unwrap_or_else(|_| http::Response::new(crate::body::GatewayBody::empty()));
    decorate(&mut response, request_id, route_name, cache_status, Some(age));
    response
}

fn decorate(response: &mut Response, request_id: &str, route_name: &str, cache_status: CacheStatus, age: Option<u64>) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", v);
    }
    if let Ok(v) = HeaderValue::from_str(route_name) {
        headers.insert("x-route", v);
    }
    let cache_label = match cache_status {
        CacheStatus::Hit => Some("HIT"),
        CacheStatus::Stale => Some("STALE"),
        CacheStatus::Miss => Some("MISS"),
        CacheStatus::Bypass => Some("BYPASS"),
        CacheStatus::NotApplicable => None,
    };
    if let Some(label) = cache_label {
        headers.insert("x-cache", HeaderValue::from_static(label));
    }
    if let Some(age) = age {
        if let Ok(v) = HeaderValue::from_str(&age.to_string()) {
            headers.insert(header::AGE, v);
        }
    }
}

fn resp_status(response: &Response) -> u16 {
    response.status().as_u16()
}

async fn collect_bounded(incoming: hyper::body::Incoming, max_bytes: usize) -> anyhow::Result<Bytes> {
    let collected = incoming.collect().await?;
    let bytes = collected.to_bytes();
    if bytes.len() > max_bytes {
        anyhow::bail!("request body exceeds {max_bytes} bytes");
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_exact_path() {
        assert_eq!(pattern_specificity("/v1/items", "/v1/items"), Some(9));
        assert_eq!(pattern_specificity("/v1/items", "/v1/items/42"), None);
    }

    #[test]
    fn wildcard_pattern_matches_by_prefix() {
        assert_eq!(pattern_specificity("/v1/items/*", "/v1/items/42"), Some(9));
        assert_eq!(pattern_specificity("/*", "/anything/at/all"), Some(0));
        assert_eq!(pattern_specificity("/v1/items/*", "/v1/other"), None);
    }

    #[test]
    fn more_specific_pattern_wins_at_equal_priority() {
        let routes = vec![
            Route {
                id: "r1".into(),
                name: "demo".into(),
                path_pattern: "/*".into(),
                methods: vec!["GET".into()],
                upstream_base_url: "http://a".into(),
                timeout_ms: 1000,
                policy_id: None,
                priority: 0,
                is_active: true,
            },
            Route {
                id: "r2".into(),
                name: "demo".into(),
                path_pattern: "/v1/items/*".into(),
                methods: vec!["GET".into()],
                upstream_base_url: "http://b".into(),
                timeout_ms: 1000,
                policy_id: None,
                priority: 0,
                is_active: true,
            },
        ];
        let matched = best_matching_route(&routes, "demo", "/v1/items/42", &Method::GET).unwrap();
        assert_eq!(matched.id, "r2");
    }

    #[test]
    fn inactive_routes_are_never_selected() {
        let routes = vec![Route {
            id: "r1".into(),
            name: "demo".into(),
            path_pattern: "/*".into(),
            methods: vec!["GET".into()],
            upstream_base_url: "http://a".into(),
            timeout_ms: 1000,
            policy_id: None,
            priority: 0,
            is_active: false,
        }];
        assert!(best_matching_route(&routes, "demo", "/x", &Method::GET).is_none());
    }
}
