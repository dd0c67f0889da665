use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

/// Well-known metadata path every DevTools endpoint serves.
pub const VERSION_PATH: &str = "/json/version";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("expected json result: {0}")]
    NotJson(#[from] serde_json::Error),
}

/// Fetch `http://<remote>/json/version` and check the body is a flat JSON
/// object of strings. Returns the raw body for logging.
pub async fn check_version(client: &reqwest::Client, remote: &str) -> Result<Bytes, ProbeError> {
    let url = version_url(remote);
    let request_error = |source| ProbeError::Request {
        url: url.clone(),
        source,
    };

    let body = client
        .get(&url)
        .send()
        .await
        .map_err(request_error)?
        .bytes()
        .await
        .map_err(request_error)?;

    validate_version_body(&body)?;
    Ok(body)
}

pub fn version_url(remote: &str) -> String {
    format!("http://{remote}{VERSION_PATH}")
}

fn validate_version_body(body: &[u8]) -> Result<(), ProbeError> {
    serde_json::from_slice::<HashMap<String, String>>(body)?;
    Ok(())
}
