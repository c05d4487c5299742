//! An HTTP client that fetches the toggle repository from the server.
use std::time::Duration;

use reqwest::StatusCode;
use url::Url;

use crate::{http::build_client, model::Repository, Error, Result};

/// A client that fetches the toggle repository from the server.
#[derive(Debug, Clone)]
pub struct RepositoryFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    url: Url,
}

impl RepositoryFetcher {
    /// Create a fetcher for `url`, authenticating with `server_sdk_key`.
    pub fn new(
        url: Url,
        server_sdk_key: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<RepositoryFetcher> {
        let client = build_client(server_sdk_key, connect_timeout, request_timeout)?;
        Ok(RepositoryFetcher { client, url })
    }

    /// Fetch and parse the repository.
    ///
    /// Returns [`Error::Unauthorized`] on 401 and 403 responses and [`Error::Http`] on other
    /// non-2xx responses.
    pub async fn fetch(&self) -> Result<Repository> {
        log::debug!(target: "featureprobe", url = self.url.as_str(); "fetching repository");
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "featureprobe", "client is not authorized. Check your server SDK key");
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            log::warn!(target: "featureprobe", status = status.as_u16(); "received non-2xx response while fetching repository");
            return Err(Error::Http(status));
        }

        let body = response.bytes().await?;
        let repository: Repository = serde_json::from_slice(&body)?;

        log::debug!(target: "featureprobe", version:serde = repository.version; "successfully fetched repository");
        Ok(repository)
    }
}
