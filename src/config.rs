use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::{Error, FeatureProbe, Result};

/// How the client keeps its repository up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Poll the server at a fixed interval.
    Polling {
        /// Time between two polls.
        interval: Duration,
    },
    /// Poll the server and additionally poll immediately when the realtime channel reports an
    /// update.
    Streaming {
        /// Time between two scheduled polls.
        interval: Duration,
    },
    /// Load the repository once from a local JSON file.
    LocalFile {
        /// Path of the repository file.
        path: PathBuf,
    },
}

/// Configuration for [`FeatureProbe`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use featureprobe::ClientConfig;
/// let config = ClientConfig::from_server_sdk_key("server-sdk-key")
///     .remote_url("https://featureprobe.example.com/server")
///     .polling_mode(Duration::from_secs(10))
///     .start_wait(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) server_sdk_key: String,
    pub(crate) remote_url: String,
    pub(crate) synchronizer_url: Option<String>,
    pub(crate) event_url: Option<String>,
    pub(crate) realtime_url: Option<String>,
    pub(crate) sync_mode: SyncMode,
    pub(crate) start_wait: Duration,
    pub(crate) flush_interval: Duration,
    pub(crate) prerequisite_max_depth: u8,
    pub(crate) connect_timeout: Duration,
    pub(crate) request_timeout: Duration,
}

/// Fully resolved endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    pub synchronizer: Url,
    pub event: Url,
    pub realtime: Url,
}

impl ClientConfig {
    /// Default remote URL, pointing to a local FeatureProbe server.
    pub const DEFAULT_REMOTE_URL: &'static str = "http://localhost:4009/server";
    /// Default interval between polls in polling mode.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
    /// Default interval between polls in streaming mode.
    pub const DEFAULT_STREAMING_POLL_INTERVAL: Duration = Duration::from_secs(10);
    /// Default time [`FeatureProbe::new`] waits for the first repository.
    pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(5);
    /// Default interval between event flushes.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default maximum length of a prerequisite chain.
    pub const DEFAULT_PREREQUISITE_MAX_DEPTH: u8 = 20;
    /// Default HTTP connect and request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
    /// Default location of the repository file in local file mode.
    pub const DEFAULT_LOCAL_FILE: &'static str = "datasource/repo.json";

    /// Create a default configuration using the specified server SDK key.
    ///
    /// ```
    /// # use featureprobe::ClientConfig;
    /// ClientConfig::from_server_sdk_key("server-sdk-key");
    /// ```
    pub fn from_server_sdk_key(server_sdk_key: impl Into<String>) -> Self {
        ClientConfig {
            server_sdk_key: server_sdk_key.into(),
            remote_url: ClientConfig::DEFAULT_REMOTE_URL.to_owned(),
            synchronizer_url: None,
            event_url: None,
            realtime_url: None,
            sync_mode: SyncMode::Streaming {
                interval: ClientConfig::DEFAULT_STREAMING_POLL_INTERVAL,
            },
            start_wait: ClientConfig::DEFAULT_START_WAIT,
            flush_interval: ClientConfig::DEFAULT_FLUSH_INTERVAL,
            prerequisite_max_depth: ClientConfig::DEFAULT_PREREQUISITE_MAX_DEPTH,
            connect_timeout: ClientConfig::DEFAULT_TIMEOUT,
            request_timeout: ClientConfig::DEFAULT_TIMEOUT,
        }
    }

    /// Base URL all endpoints are derived from unless overridden individually.
    pub fn remote_url(mut self, remote_url: impl Into<String>) -> Self {
        self.remote_url = remote_url.into();
        self
    }

    /// Override the repository endpoint. Defaults to `<remote_url>/api/server-sdk/toggles`.
    pub fn synchronizer_url(mut self, url: impl Into<String>) -> Self {
        self.synchronizer_url = Some(url.into());
        self
    }

    /// Override the event endpoint. Defaults to `<remote_url>/api/events`.
    pub fn event_url(mut self, url: impl Into<String>) -> Self {
        self.event_url = Some(url.into());
        self
    }

    /// Override the realtime endpoint. Defaults to `<remote_url>/realtime`.
    pub fn realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Poll the server every `interval`.
    pub fn polling_mode(mut self, interval: Duration) -> Self {
        self.sync_mode = SyncMode::Polling { interval };
        self
    }

    /// Listen for realtime updates and poll every `interval` as a fallback.
    pub fn streaming_mode(mut self, interval: Duration) -> Self {
        self.sync_mode = SyncMode::Streaming { interval };
        self
    }

    /// Load the repository once from a local file. Events are still sent to the server.
    pub fn local_file_mode(mut self, path: impl Into<PathBuf>) -> Self {
        self.sync_mode = SyncMode::LocalFile { path: path.into() };
        self
    }

    /// How long [`FeatureProbe::new`] blocks waiting for the first repository.
    pub fn start_wait(mut self, start_wait: Duration) -> Self {
        self.start_wait = start_wait;
        self
    }

    /// Interval between scheduled event flushes.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Maximum length of a prerequisite chain before evaluation fails.
    pub fn prerequisite_max_depth(mut self, depth: u8) -> Self {
        self.prerequisite_max_depth = depth;
        self
    }

    /// HTTP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The configured synchronization mode.
    pub fn sync_mode(&self) -> &SyncMode {
        &self.sync_mode
    }

    pub(crate) fn endpoints(&self) -> Result<Endpoints> {
        let remote = self.remote_url.trim_end_matches('/');
        let resolve = |custom: &Option<String>, path: &str| -> Result<Url> {
            let url = match custom {
                Some(url) => url.clone(),
                None => format!("{remote}{path}"),
            };
            Url::parse(&url).map_err(Error::InvalidUrl)
        };

        Ok(Endpoints {
            synchronizer: resolve(&self.synchronizer_url, "/api/server-sdk/toggles")?,
            event: resolve(&self.event_url, "/api/events")?,
            realtime: resolve(&self.realtime_url, "/realtime")?,
        })
    }

    /// Create a new [`FeatureProbe`] client using this configuration.
    ///
    /// Blocks up to [`ClientConfig::start_wait`] for the first repository.
    pub fn to_client(self) -> Result<FeatureProbe> {
        FeatureProbe::new(self)
    }
}
