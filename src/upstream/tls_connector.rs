//! Minimal HTTPS connector for the pooled upstream client, hand-built from
//! `rustls` + `webpki-roots` root store and `tokio_rustls::TlsConnector`,
//! wired up as a `tower_service::Service<Uri>` so it can be plugged into
//! `hyper_util::client::legacy::Client` instead of owning one connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};

#[derive(Clone)]
pub struct HttpsConnector {
    http: HttpConnector,
    tls: Arc<ClientConfig>,
}

impl HttpsConnector {
    pub fn new() -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            http,
            tls: Arc::new(tls),
        }
    }
}

pub struct TlsIo(TokioIo<TlsStream<TcpStream>>);

impl Connection for TlsIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for TlsIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for TlsIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

impl tower_service::Service<Uri> for HttpsConnector {
    type Response = TlsIo;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        tower_service::Service::<Uri>::poll_ready(&mut self.http, cx).map_err(|e| e.into())
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let mut http = self.http.clone();
        let tls = self.tls.clone();

        Box::pin(async move {
            let host = uri
                .host()
                .ok_or_else(|| anyhow::anyhow!("upstream uri has no host"))?
                .to_string();

            let tcp = tower_service::Service::<Uri>::call(&mut http, uri)
                .await
                .map_err(|e| anyhow::anyhow!("tcp connect failed: {e}"))?;

            let connector = TlsConnector::from(tls);
            let server_name = ServerName::try_from(host)
                .map_err(|e| anyhow::anyhow!("invalid tls server name: {e}"))?
                .to_owned();

            let tls_stream = connector
                .connect(server_name, tcp.into_inner())
                .await
                .map_err(|e| anyhow::anyhow!("tls handshake failed: {e}"))?;

            Ok(TlsIo(TokioIo::new(tls_stream)))
        })
    }
}
