use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    events::{now_millis, Event, EventProcessor, EventProcessorConfig},
    http,
    model::{Repository, Toggle},
    repository::DataRepository,
    sync::{
        FileSynchronizer, PollerConfig, PollingSynchronizer, RepositoryFetcher,
        StreamingSynchronizer, Synchronizer,
    },
    ClientConfig, Error, EvaluationResult, FPUser, Result, SyncMode,
};

const REASON_TOGGLE_NOT_EXIST: &str = "Toggle not exist";
const REASON_UNINITIALIZED: &str = "FeatureProbe repository uninitialized";
const REASON_TYPE_MISMATCH: &str = "Toggle data type mismatch";
const REASON_HANDLE_ERROR: &str = "FeatureProbe handle error";

/// Evaluated value together with an explanation of how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FPDetail<T> {
    /// The evaluated value, or the caller's default.
    pub value: T,
    /// Index of the rule that matched, if any.
    pub rule_index: Option<usize>,
    /// Index of the served variation. `None` when the default was returned.
    pub variation_index: Option<usize>,
    /// Version of the toggle that was evaluated.
    pub version: Option<i64>,
    /// Human-readable explanation, e.g. `"rule 0"` or `"Toggle not exist"`.
    pub reason: String,
}

impl<T> FPDetail<T> {
    fn fallback(value: T, reason: &str) -> FPDetail<T> {
        FPDetail {
            value,
            rule_index: None,
            variation_index: None,
            version: None,
            reason: reason.to_owned(),
        }
    }
}

/// A client for the FeatureProbe server.
///
/// The client keeps a local copy of all toggles, refreshed in the background, and evaluates them
/// without network round-trips. Evaluations are reported back to the server as events.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```no_run
/// # use featureprobe::{ClientConfig, FPUser};
/// let client = ClientConfig::from_server_sdk_key("server-sdk-key")
///     .to_client()
///     .unwrap();
/// let user = FPUser::new().with("city", "Paris");
/// if client.bool_value("new_checkout", &user, false) {
///     // ...
/// }
/// ```
pub struct FeatureProbe {
    repository: Arc<DataRepository>,
    synchronizer: Mutex<Option<Box<dyn Synchronizer>>>,
    events: Option<EventProcessor>,
    prerequisite_max_depth: u8,
    closed: AtomicBool,
}

impl FeatureProbe {
    /// Create a new client, start synchronizing and wait up to `config.start_wait` for the first
    /// repository.
    ///
    /// A failed or slow first synchronization is logged, not returned: the client serves
    /// defaults until a repository arrives. Errors are returned for invalid configuration only.
    ///
    /// This blocks the current thread. Call it from a blocking context when using an async
    /// runtime.
    pub fn new(config: ClientConfig) -> Result<FeatureProbe> {
        if config.server_sdk_key.trim().is_empty() {
            return Err(Error::InvalidSdkKey);
        }
        let endpoints = config.endpoints()?;
        let repository = Arc::new(DataRepository::new());

        let client = http::build_client(
            &config.server_sdk_key,
            config.connect_timeout,
            config.request_timeout,
        )?;
        let events = EventProcessor::start(
            client,
            endpoints.event.clone(),
            EventProcessorConfig::new().with_flush_interval(config.flush_interval),
        )?;

        let fetcher = || {
            RepositoryFetcher::new(
                endpoints.synchronizer.clone(),
                &config.server_sdk_key,
                config.connect_timeout,
                config.request_timeout,
            )
        };
        let mut synchronizer: Box<dyn Synchronizer> = match config.sync_mode() {
            SyncMode::Polling { interval } => Box::new(PollingSynchronizer::new(
                fetcher()?,
                repository.clone(),
                PollerConfig::new().with_interval(*interval),
            )),
            SyncMode::Streaming { interval } => Box::new(StreamingSynchronizer::new(
                PollingSynchronizer::new(
                    fetcher()?,
                    repository.clone(),
                    PollerConfig::new().with_interval(*interval),
                ),
                endpoints.realtime.clone(),
                config.server_sdk_key.as_str(),
            )),
            SyncMode::LocalFile { path } => {
                Box::new(FileSynchronizer::new(path.clone(), repository.clone()))
            }
        };

        let signal = synchronizer.start()?;
        match signal.wait_timeout(config.start_wait) {
            Some(Ok(())) => {
                log::info!(target: "featureprobe", "FeatureProbe client started")
            }
            Some(Err(err)) => {
                log::warn!(target: "featureprobe", "FeatureProbe client started, first synchronization failed: {err}")
            }
            None => {
                log::warn!(target: "featureprobe", start_wait_ms = config.start_wait.as_millis() as u64; "timed out waiting for the first repository, serving defaults meanwhile")
            }
        }

        Ok(FeatureProbe {
            repository,
            synchronizer: Mutex::new(Some(synchronizer)),
            events: Some(events),
            prerequisite_max_depth: config.prerequisite_max_depth,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a client serving a fixed repository, without synchronization or event reporting.
    ///
    /// ```
    /// # use featureprobe::{FeatureProbe, FPUser, model::Repository};
    /// let client = FeatureProbe::from_repository(Repository::default());
    /// assert!(!client.bool_value("missing", &FPUser::new(), false));
    /// ```
    pub fn from_repository(repository: Repository) -> FeatureProbe {
        let store = Arc::new(DataRepository::new());
        store.refresh(repository);
        FeatureProbe {
            repository: store,
            synchronizer: Mutex::new(None),
            events: None,
            prerequisite_max_depth: ClientConfig::DEFAULT_PREREQUISITE_MAX_DEPTH,
            closed: AtomicBool::new(false),
        }
    }

    /// Evaluate a boolean toggle.
    pub fn bool_value(&self, toggle: &str, user: &FPUser, default: bool) -> bool {
        self.bool_detail(toggle, user, default).value
    }

    /// Evaluate a string toggle.
    pub fn string_value(&self, toggle: &str, user: &FPUser, default: &str) -> String {
        self.string_detail(toggle, user, default).value
    }

    /// Evaluate a number toggle.
    pub fn number_value(&self, toggle: &str, user: &FPUser, default: f64) -> f64 {
        self.number_detail(toggle, user, default).value
    }

    /// Evaluate a JSON toggle, deserializing the served variation into `T`.
    pub fn json_value<T>(&self, toggle: &str, user: &FPUser, default: T) -> T
    where
        T: Serialize + DeserializeOwned,
    {
        self.json_detail(toggle, user, default).value
    }

    /// Evaluate a boolean toggle and explain the result.
    pub fn bool_detail(&self, toggle: &str, user: &FPUser, default: bool) -> FPDetail<bool> {
        self.evaluate(toggle, user, default, Some(Value::Bool(default)), Value::as_bool)
    }

    /// Evaluate a string toggle and explain the result.
    pub fn string_detail(&self, toggle: &str, user: &FPUser, default: &str) -> FPDetail<String> {
        self.evaluate(
            toggle,
            user,
            default.to_owned(),
            Some(Value::from(default)),
            |value| value.as_str().map(str::to_owned),
        )
    }

    /// Evaluate a number toggle and explain the result.
    pub fn number_detail(&self, toggle: &str, user: &FPUser, default: f64) -> FPDetail<f64> {
        self.evaluate(toggle, user, default, Some(Value::from(default)), Value::as_f64)
    }

    /// Evaluate a JSON toggle and explain the result.
    ///
    /// A variation that does not deserialize into `T` is a type mismatch: the default is returned.
    pub fn json_detail<T>(&self, toggle: &str, user: &FPUser, default: T) -> FPDetail<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let default_value = serde_json::to_value(&default).ok();
        self.evaluate(toggle, user, default, default_value, |value| {
            serde_json::from_value(value.clone()).ok()
        })
    }

    fn evaluate<T>(
        &self,
        toggle_key: &str,
        user: &FPUser,
        default: T,
        default_value: Option<Value>,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> FPDetail<T> {
        let Some(repository) = self.repository.snapshot() else {
            log::warn!(target: "featureprobe", toggle = toggle_key; "evaluating a toggle before the repository has been fetched");
            return FPDetail::fallback(default, REASON_UNINITIALIZED);
        };
        let Some(toggle) = repository.toggle(toggle_key) else {
            log::debug!(target: "featureprobe", toggle = toggle_key; "toggle not found");
            return FPDetail::fallback(default, REASON_TOGGLE_NOT_EXIST);
        };

        let empty_toggles = HashMap::new();
        let empty_segments = HashMap::new();
        let result = toggle.eval(
            user,
            repository.toggles.as_ref().unwrap_or(&empty_toggles),
            repository.segments.as_ref().unwrap_or(&empty_segments),
            default_value.as_ref(),
            self.prerequisite_max_depth,
        );
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                log::error!(target: "featureprobe", toggle = toggle_key, user = user.key(); "failed to evaluate toggle: {err}");
                return FPDetail::fallback(default, REASON_HANDLE_ERROR);
            }
        };

        log::trace!(target: "featureprobe",
            toggle = toggle_key,
            user = user.key(),
            result:serde = result;
            "evaluated a toggle");
        self.track_evaluation(toggle, user, &result, repository.debug_until_time);

        let value = match result.value.as_ref().map(convert) {
            Some(Some(value)) => value,
            Some(None) => {
                log::error!(target: "featureprobe", toggle = toggle_key; "toggle value does not match the requested type");
                return FPDetail {
                    reason: REASON_TYPE_MISMATCH.to_owned(),
                    ..detail(default, result)
                };
            }
            None => default,
        };
        detail(value, result)
    }

    fn track_evaluation(
        &self,
        toggle: &Toggle,
        user: &FPUser,
        result: &EvaluationResult,
        debug_until_time: Option<i64>,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        events.push(Event::access(user, &toggle.key, result, toggle.track_access_events));
        if debug_until_time.is_some_and(|until| until >= now_millis()) {
            events.push(Event::debug(user, &toggle.key, result));
        }
    }

    /// Report a custom event, optionally carrying a numeric value.
    pub fn track(&self, name: &str, user: &FPUser, value: Option<f64>) {
        if let Some(events) = &self.events {
            events.push(Event::custom(user, name, value));
        }
    }

    /// Request an asynchronous flush of pending events.
    pub fn flush(&self) {
        if let Some(events) = &self.events {
            events.flush();
        }
    }

    /// Whether a repository has been received at least once.
    pub fn initialized(&self) -> bool {
        self.repository.initialized()
    }

    /// Flush pending events and stop all background work.
    ///
    /// Blocks for a bounded amount of time. Called automatically on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!(target: "featureprobe", "closing FeatureProbe client");

        if let Some(events) = &self.events {
            events.shutdown();
        }
        let synchronizer = match self.synchronizer.lock() {
            Ok(mut synchronizer) => synchronizer.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut synchronizer) = synchronizer {
            synchronizer.stop();
        }
        self.repository.clear();
    }
}

impl Drop for FeatureProbe {
    fn drop(&mut self) {
        self.close();
    }
}

fn detail<T>(value: T, result: EvaluationResult) -> FPDetail<T> {
    FPDetail {
        value,
        rule_index: result.rule_index,
        variation_index: result.variation_index,
        version: result.version,
        reason: result.reason,
    }
}
