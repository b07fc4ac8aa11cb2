//! Converts handler/middleware return values into HTTP responses.

use std::convert::Infallible;
use std::fmt::Display;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;

use crate::body::GatewayBody;

/// Implemented by anything a handler or middleware step can return.
pub trait Responder {
    fn into_response(self) -> Response<GatewayBody>;
}

impl Responder for Response<GatewayBody> {
    fn into_response(self) -> Response<GatewayBody> {
        self
    }
}

impl Responder for &'static str {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::new(Full::from(Bytes::from_static(
            self.as_bytes(),
        ))))
    }
}

impl Responder for String {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::new(Full::from(Bytes::from(self))))
    }
}

impl Responder for () {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(GatewayBody::empty())
    }
}

impl Responder for Infallible {
    fn into_response(self) -> Response<GatewayBody> {
        match self {}
    }
}

/// Static header name/value pairs, cheap to attach without heap allocation.
pub struct StaticHeaders<const N: usize>(pub [(HeaderName, &'static str); N]);

impl<const N: usize> Responder for (StatusCode, StaticHeaders<N>) {
    fn into_response(self) -> Response<GatewayBody> {
        let (status, StaticHeaders(headers)) = self;
        let mut res = Response::new(GatewayBody::empty());
        *res.status_mut() = status;
        for (name, value) in headers {
            res.headers_mut()
                .append(name, HeaderValue::from_static(value));
        }
        res
    }
}

impl<R> Responder for (StatusCode, R)
where
    R: Display,
{
    fn into_response(self) -> Response<GatewayBody> {
        let (status, body) = self;
        let mut res = Response::new(GatewayBody::new(Full::from(Bytes::from(body.to_string()))));
        *res.status_mut() = status;
        res
    }
}

impl Responder for GatewayBody {
    fn into_response(self) -> Response<GatewayBody> {
        Response::new(self)
    }
}

/// Catch-all for `?`-propagated errors that aren't already `GatewayError`.
impl Responder for anyhow::Error {
    fn into_response(self) -> Response<GatewayBody> {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
