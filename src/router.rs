//! Route table and request dispatch.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use http::StatusCode;
use hyper::Method;

use crate::{
    body::GatewayBody,
    handler::{BoxHandler, Handler},
    middleware::Next,
    responder::Responder,
    route::{PathParams, Route},
    types::{BoxMiddleware, Request, Response},
};

/// Holds the route table, global middleware and dispatches requests.
pub struct Router {
    routes: DashMap<(Method, String), Arc<Route>>,
    middlewares: RwLock<Vec<BoxMiddleware>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

const ANY_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

impl Router {
    pub fn new() -> Self {
        Self {
            routes: DashMap::default(),
            middlewares: RwLock::new(Vec::new()),
        }
    }

    pub fn route<H, T>(&mut self, method: Method, path: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone + 'static,
    {
        let route = Arc::new(Route::new(
            path.to_string(),
            method.clone(),
            BoxHandler::new(handler),
            None,
        ));
        self.routes
            .insert((method, path.to_owned()), route.clone());
        route
    }

    /// Registers `handler` for every conventional HTTP method, used for the
    /// single `/g/{route_name}/{*rest}` proxy entry point whose own method
    /// admission is decided by the matched gateway route, not the framework.
    pub fn any<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T> + Clone + 'static,
    {
        for method in ANY_METHODS {
            let route = Arc::new(Route::new(
                path.to_string(),
                method.clone(),
                BoxHandler::new(handler.clone()),
                None,
            ));
            self.routes.insert((method, path.to_owned()), route);
        }
    }

    pub fn route_with_tsr<H, T>(&mut self, method: Method, path: &str, handler: H) -> Arc<Route>
    where
        H: Handler<T> + Clone + 'static,
    {
        if path == "/" {
            panic!("cannot route with TSR for root path");
        }
        let route = Arc::new(Route::new(
            path.to_string(),
            method.clone(),
            BoxHandler::new(handler),
            Some(true),
        ));
        self.routes
            .insert((method, path.to_owned()), route.clone());
        route
    }

    pub async fn dispatch(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        for route in self.routes.iter() {
            if route.method != method {
                continue;
            }
            if let Some(params) = route.match_path(&path) {
                if !params.is_empty() {
                    req.extensions_mut().insert(PathParams(params));
                }

                let g_mws = self.middlewares.read().unwrap().clone();
                let r_mws = route.middlewares.read().unwrap().clone();
                let mut chain = Vec::with_capacity(g_mws.len() + r_mws.len());
                chain.extend(g_mws);
                chain.extend(r_mws);

                let next = Next {
                    middlewares: Arc::new(chain),
                    endpoint: Arc::new(route.handler.clone()),
                };
                return next.run(req).await;
            }
        }

        let tsr_path = if path.ends_with('/') {
            path.trim_end_matches('/').to_string()
        } else {
            format!("{path}/")
        };

        for route in self.routes.iter() {
            if route.method == method && route.tsr && route.match_path(&tsr_path).is_some() {
                return hyper::Response::builder()
                    .status(StatusCode::TEMPORARY_REDIRECT)
                    .header("Location", tsr_path)
                    .body(GatewayBody::empty())
                    .unwrap();
            }
        }

        hyper::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(GatewayBody::empty())
            .unwrap()
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
        self.middlewares.write().unwrap().push(mw);
        self
    }

    pub fn merge(&mut self, other: Router) {
        other.routes.iter().for_each(|entry| {
            let (key, route) = entry.pair();
            for mw in other.middlewares.read().unwrap().iter().rev() {
                route.middlewares.write().unwrap().push_front(mw.clone());
            }
            self.routes.insert(key.to_owned(), route.to_owned());
        });
    }
}
