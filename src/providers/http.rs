use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};

pub fn build_client(config: &ProviderConfig) -> ProviderResult<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    Ok(client)
}

/// Decode a successful response body, or turn a non-2xx status into `ProviderError::Api`.
pub fn read_json<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    let response = check_status(response)?;
    let url = response.url().to_string();
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|e| {
        debug!(url = %url, error = %e, "response did not match expected shape");
        ProviderError::Decode(format!("{url}: {e}"))
    })
}

pub fn check_status(response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message: vendor_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

/// Pull the human-readable message out of a vendor error body.
pub fn vendor_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.pointer("/error/message"),
        value.pointer("/responseError/returnMessage"),
        value.pointer("/message"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str())
        .map(str::to_string);
    message
}
