use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::error::AppError;

/// Parses `key=value` strings into query parameters.
pub fn parse_params(params: &[String]) -> Result<Vec<(String, String)>, AppError> {
    params
        .iter()
        .map(|param| {
            param
                .split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "invalid parameter format: {param}. Expected format: key=value"
                    ))
                })
        })
        .collect()
}

/// Parses `Name: value` strings into a header map.
pub fn parse_headers(headers: &[String]) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::new();
    for header in headers {
        let (name, value) = header.split_once(':').ok_or_else(|| {
            AppError::InvalidInput(format!(
                "invalid header format: {header}. Expected format: Name: value"
            ))
        })?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| AppError::InvalidInput(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| AppError::InvalidInput(format!("invalid header value for {name}: {e}")))?;
        debug!(header = %name, "Added custom header");
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_at_first_equals() {
        let parsed = parse_params(&["token=a=b".to_string()]).unwrap();
        assert_eq!(parsed, vec![("token".to_string(), "a=b".to_string())]);
        assert!(parse_params(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn headers_are_trimmed() {
        let parsed = parse_headers(&["Referer:  https://player.example/ ".to_string()]).unwrap();
        assert_eq!(parsed[reqwest::header::REFERER], "https://player.example/");
        assert!(parse_headers(&["broken".to_string()]).is_err());
    }
}
