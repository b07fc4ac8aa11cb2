//! HTTP server loop: accept connections, dispatch through the router.

use hyper::{Request, server::conn::http1, service::service_fn};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

use crate::router::Router;
use crate::types::BoxError;

/// Runs the accept loop until `shutdown` is flipped to `true`.
///
/// Unlike the upstream framework's `serve`, this variant checks a shared
/// shutdown flag between accepts so the gateway binary can stop cleanly on
/// `ctrl_c` without dropping in-flight connections.
pub async fn serve(listener: TcpListener, router: Router, shutdown: Arc<AtomicBool>) {
    if let Err(err) = run(listener, router, shutdown).await {
        tracing::error!(%err, "server loop exited with error");
    }
}

async fn run(
    listener: TcpListener,
    router: Router,
    shutdown: Arc<AtomicBool>,
) -> Result<(), BoxError> {
    let router = Arc::new(router);
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested, stopping accept loop");
            return Ok(());
        }

        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => continue,
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let router = router.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |mut req: Request<_>| {
                let router = router.clone();
                async move {
                    req.extensions_mut().insert(addr);
                    Ok::<_, Infallible>(router.dispatch(req).await)
                }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            if let Err(err) = http.serve_connection(io, svc).with_upgrades().await {
                tracing::warn!(%err, "connection closed with error");
            }
        });
    }
}
