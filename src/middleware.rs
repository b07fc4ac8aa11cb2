//! Middleware chain execution.
//!
//! The gateway's own admission and proxy logic runs as one sequential
//! function in [`crate::pipeline`] rather than a chain of these, since its
//! stages share state a generic chain would have to pass through request
//! extensions. This module remains the router's general-purpose mechanism
//! for anything registered via `Router::middleware`/`Route::middleware`
//! (e.g. access logging wrapped around `/health` and `/metrics`).

use std::sync::Arc;

use crate::{
    handler::BoxHandler,
    types::{BoxMiddleware, Request, Response},
};

/// The remaining middleware chain plus the final route handler.
pub struct Next {
    pub middlewares: Arc<Vec<BoxMiddleware>>,
    pub endpoint: Arc<BoxHandler>,
}

impl Next {
    pub async fn run(self, req: Request) -> Response {
        if let Some((mw, rest)) = self.middlewares.split_first() {
            let rest = Arc::new(rest.to_vec());
            mw(
                req,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint.clone(),
                },
            )
            .await
        } else {
            self.endpoint.call(req).await
        }
    }
}
