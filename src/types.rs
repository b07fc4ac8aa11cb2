//! Core type aliases shared across the gateway's HTTP plumbing.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::{body::GatewayBody, middleware::Next};

/// Inbound HTTP request with a streaming Hyper body.
pub type Request = hyper::Request<Incoming>;

/// Outbound HTTP response using the gateway's boxed body.
pub type Response = hyper::Response<GatewayBody>;

pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A middleware step: given a request and the rest of the chain, produce a response.
pub type BoxMiddleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;
