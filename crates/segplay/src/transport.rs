// HTTP transport: the single network dependency of the playlist loader and segment fetcher.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::config::HttpConfig;
use crate::error::FetchError;
use crate::hls::playlist::ByteRange;
use crate::proxy::build_proxy;

/// Retrieves raw resource bytes. Implementations do not retry; retry, backoff
/// and timeouts are layered on top by the callers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, range: Option<ByteRange>) -> Result<Bytes, FetchError>;
}

/// Runs a single request with a bounded wait. Exceeding `timeout` yields
/// [`FetchError::Timeout`], which callers treat like any other network fault.
/// A zero timeout disables the bound.
pub async fn get_with_timeout(
    transport: &dyn Transport,
    url: &Url,
    range: Option<ByteRange>,
    timeout: Duration,
) -> Result<Bytes, FetchError> {
    if timeout.is_zero() {
        return transport.get(url, range).await;
    }
    match tokio::time::timeout(timeout, transport.get(url, range)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }),
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

/// Installs the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpConfig) -> Result<Client, FetchError> {
    install_rustls_provider();
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        client_builder = client_builder.proxy(build_proxy(proxy_config)?);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder
        .build()
        .map_err(|e| FetchError::network("<client>", format!("failed to build client: {e}"), false))
}

/// [`Transport`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    params: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_client(config)?,
            params: config.params.clone(),
        })
    }

    pub fn with_client(client: Client, params: Vec<(String, String)>) -> Self {
        Self { client, params }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
        let mut request = self.client.get(url.clone());
        if !self.params.is_empty() {
            request = request.query(&self.params);
        }
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.header_value());
        }

        let response = request.send().await.map_err(|e| {
            FetchError::network(url.as_str(), e.to_string(), is_retryable_reqwest_error(&e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(status.as_u16(), url.as_str()));
        }
        trace!(url = %url, http_version = ?response.version(), "Response received");

        response.bytes().await.map_err(|e| {
            FetchError::network(url.as_str(), e.to_string(), is_retryable_reqwest_error(&e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn get(&self, _url: &Url, _range: Option<ByteRange>) -> Result<Bytes, FetchError> {
            std::future::pending().await
        }
    }

    struct Counting(AtomicU32);

    #[async_trait]
    impl Transport for Counting {
        async fn get(&self, _url: &Url, range: Option<ByteRange>) -> Result<Bytes, FetchError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(Bytes::from(range.map(|r| r.header_value()).unwrap_or_default()))
        }
    }

    fn url() -> Url {
        Url::parse("https://cdn.example/seg0.ts").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_times_out() {
        let result = get_with_timeout(&Stalled, &url(), None, Duration::from_secs(10)).await;
        match result {
            Err(err @ FetchError::Timeout { .. }) => assert!(err.is_retryable()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn range_is_forwarded() {
        let transport = Counting(AtomicU32::new(0));
        let range = ByteRange {
            offset: 100,
            length: 50,
        };
        let body = get_with_timeout(&transport, &url(), Some(range), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(&body[..], b"bytes=100-149");
        assert_eq!(transport.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn client_builds_from_default_config() {
        assert!(HttpTransport::new(&HttpConfig::default()).is_ok());
    }
}
