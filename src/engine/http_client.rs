use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::engine::request::LoadRequest;
use crate::error::TransportError;

/// What the runner needs back from one exchange. Bodies are drained and
/// discarded; only their sizes survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub request_size: usize,
    pub response_size: usize,
}

/// Sends one request and reports its status code.
///
/// Implementations must be shareable by every virtual user at once. The
/// per-request deadline is enforced by the caller, not here.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: LoadRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpClient {
    pub fn new() -> io::Result<Self> {
        Self::with_pool_and_workers(2000, 1000)
    }

    /// Client sized for the expected concurrency.
    /// pool_size: maximum idle connections per host.
    /// At high virtual user counts (>5K) smaller HTTP/2 windows keep memory flat.
    pub fn with_pool_and_workers(pool_size: usize, total_workers: usize) -> io::Result<Self> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let builder = match hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(rustls::crypto::ring::default_provider())
        {
            Ok(builder) => builder,
            Err(e) => {
                // Plain http targets still work without a trust store.
                tracing::warn!(error = %e, "no native root certificates, https targets will fail");
                let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
                    rustls::crypto::ring::default_provider(),
                ))
                .with_safe_default_protocol_versions()
                .map_err(io::Error::other)?
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(tls)
            }
        };
        let https = builder
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let (conn_window, stream_window) = if total_workers > 5000 {
            (128 * 1024, 64 * 1024)
        } else if total_workers > 2000 {
            (256 * 1024, 128 * 1024)
        } else {
            (512 * 1024, 256 * 1024)
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(pool_size)
            .http2_initial_connection_window_size(conn_window)
            .http2_initial_stream_window_size(stream_window)
            .build(https);

        Ok(Self { client })
    }

    async fn exchange(&self, request: LoadRequest) -> Result<TransportResponse, TransportError> {
        // Approximate wire size of the request line, headers and body.
        let mut request_size = request.body.len();
        request_size += request.method.as_str().len() + 1 + request.url.len() + 11;
        for (k, v) in request.headers.iter() {
            request_size += k.as_str().len() + 2 + v.len() + 2;
        }
        request_size += 2;

        let mut builder = Request::builder()
            .method(request.method)
            .uri(request.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let req = builder
            .body(Full::new(Bytes::from(request.body)))
            .map_err(|e| TransportError::Other(e.to_string()))?;

        let response = self.client.request(req).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let (parts, mut body) = response.into_parts();

        // Drain the body so the connection can go back to the pool.
        let mut response_size = 0usize;
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| TransportError::Other(e.to_string()))?;
            if let Some(data) = frame.data_ref() {
                response_size += data.len();
            }
        }
        response_size += 15;
        for (k, v) in parts.headers.iter() {
            response_size += k.as_str().len() + 2 + v.len() + 2;
        }
        response_size += 2;

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            request_size,
            response_size,
        })
    }
}

impl Transport for HttpClient {
    fn send(
        &self,
        request: LoadRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        self.exchange(request)
    }
}
