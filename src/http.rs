//! Shared HTTP client setup.
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};

use crate::{Error, Result};

/// User agent reported to the server.
pub(crate) const SDK_USER_AGENT: &str = concat!("Rust/", env!("CARGO_PKG_VERSION"));

/// Build a client that authenticates every request with the server SDK key.
pub(crate) fn build_client(
    server_sdk_key: &str,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let mut authorization =
        HeaderValue::from_str(server_sdk_key).map_err(|_| Error::InvalidSdkKey)?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(USER_AGENT, HeaderValue::from_static(SDK_USER_AGENT));

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()?;
    Ok(client)
}
