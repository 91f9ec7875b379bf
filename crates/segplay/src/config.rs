use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = concat!("segplay/", env!("CARGO_PKG_VERSION"));

/// HTTP client options shared by playlist and segment requests.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout (time to establish the initial connection)
    pub connect_timeout: Duration,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Headers sent with every request. Custom headers override the defaults.
    pub headers: HeaderMap,

    /// Query parameters appended to every request
    pub params: Vec<(String, String)>,

    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings when no explicit proxy is set
    pub use_system_proxy: bool,

    pub danger_accept_invalid_certs: bool,

    /// Maximum idle connections kept per host. Segment requests to a single
    /// CDN host benefit from connection reuse.
    pub pool_max_idle_per_host: usize,

    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::default_headers(),
            params: Vec::new(),
            proxy: None,
            use_system_proxy: true,
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "application/vnd.apple.mpegurl,application/x-mpegurl,video/*;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }

    /// Merges `custom` over the default header set.
    pub fn with_headers(mut self, custom: HeaderMap) -> Self {
        for (name, value) in custom.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_headers_override_defaults() {
        let mut custom = HeaderMap::new();
        custom.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        custom.insert(
            reqwest::header::REFERER,
            HeaderValue::from_static("https://player.example/"),
        );

        let config = HttpConfig::default().with_headers(custom);
        assert_eq!(config.headers[reqwest::header::ACCEPT], "*/*");
        assert_eq!(
            config.headers[reqwest::header::REFERER],
            "https://player.example/"
        );
        assert!(config.headers.contains_key(reqwest::header::CONNECTION));
    }
}
