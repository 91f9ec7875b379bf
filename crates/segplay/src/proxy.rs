use reqwest::Proxy;

use crate::error::FetchError;

/// Proxy protocol used to reach the origin.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

/// Build a reqwest Proxy from the configuration.
pub fn build_proxy(config: &ProxyConfig) -> Result<Proxy, FetchError> {
    let proxy_url = &config.url;

    let mut proxy = match config.proxy_type {
        ProxyType::Http => Proxy::http(proxy_url)
            .map_err(|e| FetchError::invalid_url(proxy_url, format!("invalid HTTP proxy: {e}")))?,
        ProxyType::Https => Proxy::https(proxy_url)
            .map_err(|e| FetchError::invalid_url(proxy_url, format!("invalid HTTPS proxy: {e}")))?,
        ProxyType::Socks5 => {
            let url = if proxy_url.starts_with("socks5://") || proxy_url.starts_with("socks5h://") {
                proxy_url.to_string()
            } else {
                format!("socks5://{proxy_url}")
            };
            Proxy::all(&url)
                .map_err(|e| FetchError::invalid_url(&url, format!("invalid SOCKS5 proxy: {e}")))?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks_scheme_is_added_when_missing() {
        let config = ProxyConfig {
            url: "127.0.0.1:1080".to_string(),
            proxy_type: ProxyType::Socks5,
            auth: None,
        };
        assert!(build_proxy(&config).is_ok());
    }

    #[test]
    fn malformed_http_proxy_is_rejected() {
        let config = ProxyConfig {
            url: "http://[::1".to_string(),
            proxy_type: ProxyType::Http,
            auth: None,
        };
        assert!(matches!(
            build_proxy(&config),
            Err(FetchError::InvalidUrl { .. })
        ));
    }
}
