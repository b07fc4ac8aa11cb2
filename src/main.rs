use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use apexgate::bloom::BloomFilter;
use apexgate::cache::ResponseCache;
use apexgate::config::{ApiKey, CachePolicy, ConfigCache, ConfigSource, DeploymentMode, Route, Settings, StaticConfigSource, Tenant};
use apexgate::kv::fallback::FallbackKvStore;
use apexgate::kv::redis_store::RedisKvStore;
use apexgate::kv::{self, KvStore};
use apexgate::metrics::Metrics;
use apexgate::pipeline::{GatewayState, Pipeline};
use apexgate::router::Router;
use apexgate::{Method, StatusCode};

#[tokio::main]
async fn main() {
    apexgate::tracing::init_tracing();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "missing or invalid startup configuration");
            std::process::exit(1);
        }
    };

    let kv: Arc<dyn KvStore> = match settings.deployment_mode {
        DeploymentMode::Demo => FallbackKvStore::new(),
        DeploymentMode::Normal => connect_shared_kv(&settings.shared_kv_url).await,
    };

    let config_source = load_config_source(&settings.persistence_url);
    let config_cache = match ConfigCache::new(config_source).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load initial configuration");
            std::process::exit(1);
        }
    };
    config_cache.clone().spawn_refresh_loop(std::time::Duration::from_secs(30));

    let metrics = Metrics::new();
    let log = apexgate::log::spawn(());

    let state = Arc::new(GatewayState {
        config: config_cache.clone(),
        kv: kv.clone(),
        cache: ResponseCache::new(kv.clone()),
        bloom: BloomFilter::new(kv.clone(), "bloom:negatives", settings.bloom_expected_items, settings.bloom_false_positive_rate),
        upstream: apexgate::upstream::UpstreamClient::new(),
        abuse_alpha: settings.abuse_ewma_alpha,
        abuse_z_threshold: settings.abuse_zscore_threshold,
        abuse_block_duration: std::time::Duration::from_secs(settings.abuse_block_duration_seconds),
        default_rate_limit_rps: settings.default_rate_limit_rps,
        default_rate_limit_burst: settings.default_rate_limit_burst,
        metrics: metrics.clone(),
        log,
    });
    let health_state = state.clone();
    let pipeline = Pipeline::new(state);

    let admin = Arc::new(apexgate::admin::AdminConsumer::new(config_cache.clone(), kv.clone()));
    tokio::spawn(async move {
        if let Err(e) = admin.run().await {
            tracing::warn!(error = %e, "admin event consumer exited");
        }
    });

    let mut router = Router::new();
    router.any("/g/{route_name}/{*rest}", move |req| {
        let pipeline = pipeline.clone();
        async move { pipeline.handle(req).await }
    });
    router.route(Method::GET, "/health", move |_req| {
        let kv = kv.clone();
        let health_state = health_state.clone();
        async move {
            let kv_ok = kv::probe(kv.as_ref()).await;
            let db_ok = health_state.config.is_healthy();
            let bloom_component = if health_state.bloom.is_enabled() { "ok" } else { "disabled" };
            let healthy = kv_ok && db_ok;
            let body = serde_json::json!({
                "status": if healthy { "healthy" } else { "degraded" },
                "components": {
                    "kv": if kv_ok { "ok" } else { "degraded" },
                    "db": if db_ok { "ok" } else { "degraded" },
                    "bloom": bloom_component,
                },
            });
            let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
            let mut response = http::Response::new(apexgate::body::GatewayBody::from(body.to_string()));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
            response
        }
    });
    router.route(Method::GET, "/metrics", move |_req| {
        let metrics = metrics.clone();
        async move {
            let mut response = http::Response::new(apexgate::body::GatewayBody::from(metrics.render()));
            response
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain; version=0.0.4"));
            response
        }
    });

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind listener");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl_c received, starting graceful shutdown");
            shutdown_signal.store(true, Ordering::Relaxed);
        }
    });

    apexgate::serve(listener, router, shutdown).await;
}

async fn connect_shared_kv(shared_kv_url: &str) -> Arc<dyn KvStore> {
    match RedisKvStore::connect(shared_kv_url).await {
        Ok(store) => {
            let store: Arc<dyn KvStore> = Arc::new(store);
            if kv::probe(store.as_ref()).await {
                store
            } else {
                tracing::warn!("shared KV store unreachable at startup, degrading to in-process fallback");
                FallbackKvStore::new()
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to connect to shared KV store, degrading to in-process fallback");
            FallbackKvStore::new()
        }
    }
}

/// Loads the initial configuration snapshot from the JSON file named by
/// `PERSISTENCE_URL`. The admin surface that actually mutates tenants, keys,
/// routes and policies lives outside this crate; this gives the required
/// `persistence_url` setting a real, if minimal, consumer.
fn load_config_source(persistence_url: &str) -> Arc<dyn ConfigSource> {
    #[derive(serde::Deserialize, Default)]
    struct Seed {
        #[serde(default)]
        tenants: Vec<Tenant>,
        #[serde(default)]
        api_keys: Vec<ApiKey>,
        #[serde(default)]
        routes: Vec<Route>,
        #[serde(default)]
        policies: Vec<CachePolicy>,
    }

    let seed = Path::new(persistence_url)
        .canonicalize()
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|raw| serde_json::from_str::<Seed>(&raw).ok())
        .unwrap_or_else(|| {
            tracing::warn!(persistence_url, "could not load seed configuration, starting with an empty table");
            Seed::default()
        });

    Arc::new(StaticConfigSource::new(seed.tenants, seed.api_keys, seed.routes, seed.policies))
}
