//! Shared HTTP plumbing for the network backends.

use std::time::Duration;

use lore_core::{LoreError, Result};

/// Build a client with a per-request timeout.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LoreError::embedding(format!("Failed to build HTTP client: {}", e)))
}

/// Classify a transport failure.
pub(crate) fn request_error(e: reqwest::Error, operation: &str, timeout: Duration) -> LoreError {
    if e.is_timeout() {
        LoreError::Timeout {
            operation: operation.to_string(),
            millis: timeout.as_millis() as u64,
        }
    } else {
        LoreError::network(format!("{}: {}", operation, e))
    }
}

/// Pass successful responses through, classify the rest.
///
/// 404s and bodies mentioning a missing model become `ModelNotFound`;
/// everything else is a `Remote` error whose transience follows the status.
pub(crate) async fn check_status(
    response: reqwest::Response,
    model: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let lowered = body.to_lowercase();
    if status.as_u16() == 404 || (lowered.contains("not found") && lowered.contains("model")) {
        return Err(LoreError::ModelNotFound {
            model: model.to_string(),
        });
    }

    Err(LoreError::Remote {
        status: status.as_u16(),
        message: body,
    })
}

/// Parse a JSON array of numbers into a vector.
pub(crate) fn parse_vector(value: Option<&serde_json::Value>, backend: &str) -> Result<Vec<f32>> {
    let values = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            LoreError::embedding(format!("Invalid {} response: missing embedding", backend))
        })?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| {
                    LoreError::embedding(format!(
                        "Invalid {} response: non-numeric value",
                        backend
                    ))
                })
        })
        .collect()
}
