//! A background poller thread that periodically requests the repository from the server and
//! stores it in a [`DataRepository`].
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{RecvTimeoutError, SyncSender, TrySendError},
        Arc,
    },
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{
    repository::DataRepository,
    sync::{fetcher::RepositoryFetcher, ReadySignal, Synchronizer},
    Error, Result,
};

/// Configuration for [`PollingSynchronizer`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval to wait between requests for the repository.
    ///
    /// Defaults to [`PollerConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Randomized duration subtracted from `interval`. Helps to avoid multiple server instances
    /// synchronizing and producing spiky network load.
    ///
    /// Defaults to zero: polls happen at a fixed interval.
    pub jitter: Duration,
}

impl PollerConfig {
    /// Default value for [`PollerConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Create a configuration with default values.
    pub fn new() -> PollerConfig {
        PollerConfig::default()
    }

    /// Override [`PollerConfig::interval`].
    pub fn with_interval(mut self, interval: Duration) -> PollerConfig {
        self.interval = interval;
        self
    }

    /// Override [`PollerConfig::jitter`].
    pub fn with_jitter(mut self, jitter: Duration) -> PollerConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerConfig {
    fn default() -> PollerConfig {
        PollerConfig {
            interval: PollerConfig::DEFAULT_POLL_INTERVAL,
            jitter: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollerCommand {
    Poll,
    Stop,
}

/// Handle that requests an out-of-cycle poll.
///
/// Requests are coalesced: while a poll is pending or running, further requests are merged into
/// it. All fetches run on the poller thread, so there is never more than one in flight.
#[derive(Debug, Clone)]
pub struct PollTrigger {
    sender: SyncSender<PollerCommand>,
}

impl PollTrigger {
    /// Request a poll as soon as the poller thread is free. Never blocks.
    pub fn poll_now(&self) {
        match self.sender.try_send(PollerCommand::Poll) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::debug!(target: "featureprobe", "poll requested after poller thread exited");
            }
        }
    }
}

struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,
    command_sender: SyncSender<PollerCommand>,
    stopping: Arc<AtomicBool>,
}

/// Synchronizer that polls the server at a fixed interval.
pub struct PollingSynchronizer {
    fetcher: RepositoryFetcher,
    repository: Arc<DataRepository>,
    config: PollerConfig,
    signal: ReadySignal,
    thread: Option<PollerThread>,
}

impl PollingSynchronizer {
    /// Create a synchronizer storing fetched repositories in `repository`. Nothing runs until
    /// [`Synchronizer::start`] is called.
    pub fn new(
        fetcher: RepositoryFetcher,
        repository: Arc<DataRepository>,
        config: PollerConfig,
    ) -> PollingSynchronizer {
        PollingSynchronizer {
            fetcher,
            repository,
            config,
            signal: ReadySignal::new(),
            thread: None,
        }
    }

    /// A handle to request immediate polls. `None` until the synchronizer is started.
    pub fn trigger(&self) -> Option<PollTrigger> {
        self.thread.as_ref().map(|thread| PollTrigger {
            sender: thread.command_sender.clone(),
        })
    }

    fn spawn(&self) -> std::io::Result<PollerThread> {
        // Room for a pending poll plus a stop command. Extra poll requests are dropped since a
        // pending one already covers them.
        let (command_sender, command_receiver) = std::sync::mpsc::sync_channel(2);
        let stopping = Arc::new(AtomicBool::new(false));

        let fetcher = self.fetcher.clone();
        let repository = Arc::clone(&self.repository);
        let config = self.config.clone();
        let signal = self.signal.clone();
        let stop_flag = Arc::clone(&stopping);

        let join_handle = std::thread::Builder::new()
            .name("featureprobe-poller".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime,
                        Err(err) => {
                            signal.complete(Err(Error::from(err)));
                            return;
                        }
                    };

                    loop {
                        if stop_flag.load(Ordering::Acquire) {
                            return;
                        }
                        // Pending poll requests are satisfied by the fetch below.
                        while let Ok(command) = command_receiver.try_recv() {
                            if command == PollerCommand::Stop {
                                log::debug!(target: "featureprobe", "poller thread received stop command");
                                return;
                            }
                        }

                        match runtime.block_on(fetcher.fetch()) {
                            Ok(new_repository) => {
                                repository.refresh(new_repository);
                                if repository.initialized() {
                                    signal.complete(Ok(()));
                                }
                            }
                            Err(err @ Error::Unauthorized) => {
                                // Report to whoever waits for the first repository, but keep
                                // polling in case the key gets authorized later.
                                signal.complete(Err(err));
                            }
                            Err(err) => {
                                log::warn!(target: "featureprobe", "failed to fetch repository: {err}");
                            }
                        }

                        let timeout = jittered(config.interval, config.jitter);
                        match command_receiver.recv_timeout(timeout) {
                            Err(RecvTimeoutError::Timeout) => {
                                // Timed out. Loop back to fetch a new repository.
                            }
                            Ok(PollerCommand::Poll) => {
                                log::debug!(target: "featureprobe", "out-of-cycle poll requested");
                            }
                            Ok(PollerCommand::Stop) => {
                                log::debug!(target: "featureprobe", "poller thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "featureprobe", "poller thread received disconnected");
                                return;
                            }
                        }
                    }
                }));

                if result.is_err() {
                    signal.complete(Err(Error::ThreadPanicked));
                }
            })?;

        Ok(PollerThread {
            join_handle,
            command_sender,
            stopping,
        })
    }
}

impl Synchronizer for PollingSynchronizer {
    fn start(&mut self) -> Result<ReadySignal> {
        if self.thread.is_none() {
            log::info!(target: "featureprobe", interval_ms = self.config.interval.as_millis() as u64; "starting polling synchronizer");
            self.thread = Some(self.spawn()?);
        }
        Ok(self.signal.clone())
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        thread.stopping.store(true, Ordering::Release);
        // A full channel means a command is pending; the thread checks the flag before fetching.
        let _ = thread.command_sender.try_send(PollerCommand::Stop);
        if thread.join_handle.join().is_err() {
            log::warn!(target: "featureprobe", "poller thread panicked");
        }
    }
}

impl Drop for PollingSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shorten `interval` by a random amount of at most `jitter`.
pub(crate) fn jittered(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let offset = thread_rng().gen_range(Duration::ZERO..=jitter);
    interval.saturating_sub(offset)
}
