//! apexgate — a multi-tenant API gateway: opaque bearer-key auth, per-tenant
//! route matching, rate limiting, quota enforcement, abuse detection and a
//! stampede-safe TTL + stale-while-revalidate response cache in front of
//! upstream HTTP services.
//!
//! Built on top of an in-house async HTTP micro-framework (router,
//! responder, middleware) carried over from its origin as a general-purpose
//! web framework and narrowed to the gateway's own needs: the admission and
//! proxy pipeline lives in [`pipeline`] as a single sequential state machine
//! rather than a generic middleware chain, because its stages share a
//! resolved `(ApiKey, Tenant, Route)` triple that a chain would otherwise
//! have to smuggle through request extensions. The admin-notification
//! surface and `/metrics` endpoint are ordinary routes on the same router.
//!
//! # Modules
//! - [router] / [route] / [handler] / [middleware] / [responder] / [body] —
//!   the HTTP plumbing the pipeline runs on top of.
//! - [server] — the accept loop, including cooperative shutdown.
//! - [config] — tenants, API keys, routes and cache policies, refreshed
//!   copy-on-write from a pluggable source.
//! - [kv] — the shared-state abstraction (Redis or an in-process fallback)
//!   every stateful component is built against.
//! - [cache] — the TTL + stale-while-revalidate response cache.
//! - [ratelimit], [quota], [bloom], [abuse] — the admission stages.
//! - [upstream] — the pooled HTTP client that forwards admitted requests.
//! - [pipeline] — composes all of the above into the gateway's one handler.
//! - [log], [metrics] — request logging and Prometheus counters.
//! - [admin] — the `config:changed` pub/sub consumer and cache-purge surface.
//! - [error] — the client-visible error taxonomy.

pub mod body;
pub mod responder;
mod handler;
pub mod middleware;
mod route;
pub mod router;
mod server;
pub mod types;

pub mod error;
pub mod kv;
pub mod cache;
pub mod ratelimit;
pub mod quota;
pub mod bloom;
pub mod abuse;
pub mod upstream;
pub mod config;
pub mod pipeline;
pub mod log;
pub mod metrics;
pub mod admin;
pub mod tracing;

pub use bytes::Bytes;
pub use http::{Method, StatusCode, header};
pub use server::serve;
