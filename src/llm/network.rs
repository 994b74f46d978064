use reqwest::{RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, error};

use crate::llm::BackendError;

const ERROR_BODY_SNIPPET: usize = 200;

pub(crate) fn build_http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()?;
    Ok(client)
}

/// Sends a request and returns the response body of a 2xx reply.
/// Non-success statuses and transport failures are classified.
pub(crate) async fn send_for_text(request: RequestBuilder) -> Result<String, BackendError> {
    let resp = request.send().await.map_err(|e| {
        error!(err=%e, "backend send error");
        classify_transport(&e)
    })?;
    let status = resp.status();
    let body = resp.text().await.map_err(|e| {
        error!(err=%e, "backend read body error");
        classify_transport(&e)
    })?;

    if !status.is_success() {
        error!(status=%status.as_u16(), body=%snippet(&body), "backend non-success status");
        return Err(classify_status(status, &body));
    }
    debug!(bytes = body.len(), "backend response received");
    Ok(body)
}

pub(crate) fn classify_transport(err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        return BackendError::Timeout(err.to_string());
    }
    if err.is_decode() {
        return BackendError::InvalidResponse(err.to_string());
    }
    // connect, request and body errors all mean the service could not be reached
    BackendError::Unreachable(err.to_string())
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("{} - {}", status, snippet(body));
    let lower = body.to_lowercase();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return BackendError::Unauthorized(detail);
    }
    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("insufficient_quota")
        || lower.contains("resource_exhausted")
    {
        return BackendError::RateLimited(detail);
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return BackendError::Timeout(detail);
    }
    if status == StatusCode::BAD_REQUEST
        && (lower.contains("api key") || lower.contains("api_key"))
    {
        return BackendError::Unauthorized(detail);
    }
    if status.is_server_error() {
        return BackendError::Unreachable(detail);
    }
    BackendError::InvalidResponse(detail)
}

pub(crate) fn snippet(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_SNIPPET {
        return body.to_string();
    }
    let mut s: String = body.chars().take(ERROR_BODY_SNIPPET).collect();
    s.push_str("...");
    s
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| {
        error!(err=%e, "backend envelope decode error");
        BackendError::InvalidResponse(format!("decode response envelope: {e}"))
    })
}

/// Whitespace-only completions count as failures.
pub(crate) fn non_empty(text: String) -> Result<String, BackendError> {
    if text.trim().is_empty() {
        Err(BackendError::EmptyResponse)
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            BackendError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            BackendError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"error":{"code":"insufficient_quota"}}"#),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "API key not valid. Please pass a valid API key."),
            BackendError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, ""),
            BackendError::Timeout(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            BackendError::Unreachable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "no such route"),
            BackendError::InvalidResponse(_)
        ));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(500);
        let s = snippet(&body);
        assert_eq!(s.chars().count(), ERROR_BODY_SNIPPET + 3);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn blank_text_is_empty_response() {
        assert_eq!(non_empty("  \n".into()), Err(BackendError::EmptyResponse));
        assert_eq!(non_empty("{}".into()), Ok("{}".to_string()));
    }
}
