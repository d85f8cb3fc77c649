use url::Url;

use crate::error::TransportError;

/// Path of the persistent chat socket on a conduit server.
pub const SOCKET_PATH: &str = "/ws";
/// Path of the OpenAI-compatible streaming endpoint.
pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Normalize a profile endpoint into the WebSocket URL of the chat socket.
///
/// `http`/`https` map to `ws`/`wss`; a bare `host:port` is treated as `ws`.
/// An endpoint that already names a path is used as given.
pub fn socket_url(endpoint: &str) -> Result<Url, TransportError> {
    let mut url = parse_with_default_scheme(endpoint, "ws")?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::invalid_endpoint(
                endpoint,
                format!("unsupported scheme '{other}'"),
            ))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::invalid_endpoint(endpoint, "cannot change scheme"))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(SOCKET_PATH);
    }
    Ok(url)
}

/// Normalize a profile endpoint into the chat-completions URL.
pub fn completions_url(endpoint: &str) -> Result<Url, TransportError> {
    let url = parse_with_default_scheme(endpoint, "http")?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::invalid_endpoint(
            endpoint,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    let path = url.path().trim_end_matches('/');
    if path.ends_with("/chat/completions") {
        return Ok(url);
    }

    let mut normalized = url.clone();
    if path.ends_with("/v1") {
        normalized.set_path(&format!("{path}/chat/completions"));
    } else {
        normalized.set_path(&format!("{path}{COMPLETIONS_PATH}"));
    }
    Ok(normalized)
}

fn parse_with_default_scheme(endpoint: &str, scheme: &str) -> Result<Url, TransportError> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(TransportError::invalid_endpoint(endpoint, "endpoint is empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{scheme}://{trimmed}")
    };
    Url::parse(&candidate).map_err(|error| TransportError::invalid_endpoint(endpoint, error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_maps_http_schemes_and_default_path() {
        assert_eq!(
            socket_url("http://10.0.0.2:8080").unwrap().as_str(),
            "ws://10.0.0.2:8080/ws"
        );
        assert_eq!(
            socket_url("https://conduit.example.com/").unwrap().as_str(),
            "wss://conduit.example.com/ws"
        );
        assert_eq!(
            socket_url("localhost:8080").unwrap().as_str(),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            socket_url("wss://host/custom").unwrap().as_str(),
            "wss://host/custom"
        );
    }

    #[test]
    fn socket_url_rejects_empty_and_foreign_schemes() {
        assert!(socket_url("  ").is_err());
        assert!(socket_url("ftp://host").is_err());
    }

    #[test]
    fn completions_url_appends_missing_segments() {
        assert_eq!(
            completions_url("https://api.example.com").unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.example.com/v1/").unwrap().as_str(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:11434/v1/chat/completions")
                .unwrap()
                .as_str(),
            "http://localhost:11434/v1/chat/completions"
        );
    }
}
