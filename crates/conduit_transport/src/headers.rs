use std::collections::BTreeMap;

use crate::error::TransportError;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const DEFAULT_USER_AGENT: &str = concat!("conduit/", env!("CARGO_PKG_VERSION"));

/// Headers sent when opening the chat socket.
pub fn socket_headers(
    bearer_token: Option<&str>,
) -> Result<BTreeMap<String, String>, TransportError> {
    let mut headers = BTreeMap::new();
    insert_authorization(&mut headers, bearer_token)?;
    headers.insert(HEADER_USER_AGENT.to_owned(), DEFAULT_USER_AGENT.to_owned());
    Ok(headers)
}

/// Headers for a streaming chat-completions request.
pub fn stream_headers(
    bearer_token: Option<&str>,
) -> Result<BTreeMap<String, String>, TransportError> {
    let mut headers = BTreeMap::new();
    insert_authorization(&mut headers, bearer_token)?;
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );
    headers.insert(HEADER_USER_AGENT.to_owned(), DEFAULT_USER_AGENT.to_owned());
    Ok(headers)
}

fn insert_authorization(
    headers: &mut BTreeMap<String, String>,
    bearer_token: Option<&str>,
) -> Result<(), TransportError> {
    let Some(token) = bearer_token else {
        return Ok(());
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(TransportError::InvalidHeader {
            name: HEADER_AUTHORIZATION.to_owned(),
            message: "bearer token is empty".to_owned(),
        });
    }
    if token.chars().any(char::is_control) {
        return Err(TransportError::InvalidHeader {
            name: HEADER_AUTHORIZATION.to_owned(),
            message: "bearer token contains control characters".to_owned(),
        });
    }

    headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
    Ok(())
}
