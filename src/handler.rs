//! Request handler traits backing the router's dispatch table.

use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
    responder::Responder,
    types::{Request, Response},
};

/// Implemented for async functions usable as route handlers.
///
/// Two shapes are supported: zero-argument handlers and handlers taking the
/// raw `Request`. The gateway's own handlers parse what they need (path
/// params, headers, body) directly out of the request rather than through a
/// generic extractor system.
pub trait Handler<T>: Send + Sync + 'static {
    type Future: Future<Output = Response> + Send + 'static;

    fn call(self, req: Request) -> Self::Future;
}

/// Type-erased handler for storage in the route table.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl BoxHandler {
    pub(crate) fn new<H, T>(h: H) -> Self
    where
        H: Handler<T> + Clone,
    {
        let inner = Arc::new(move |req: Request| {
            let handler = h.clone();
            Box::pin(async move { handler.call(req).await }) as BoxFuture<'_, Response>
        });
        Self { inner }
    }

    pub(crate) fn call(&self, req: Request) -> BoxFuture<'_, Response> {
        (self.inner)(req)
    }
}

impl<F, Fut, R> Handler<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, _req: Request) -> Self::Future {
        Box::pin(async move { (self)().await.into_response() })
    }
}

impl<F, Fut, R> Handler<(Request,)> for F
where
    F: FnOnce(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request) -> Self::Future {
        Box::pin(async move { (self)(req).await.into_response() })
    }
}
