//! Synchronizers keep the [`DataRepository`](crate::DataRepository) in sync with the server.
use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use crate::{Error, Result};

mod fetcher;
mod file;
mod poller;
pub(crate) mod realtime;
mod streaming;

pub use fetcher::RepositoryFetcher;
pub use file::FileSynchronizer;
pub use poller::{PollTrigger, PollerConfig, PollingSynchronizer};
pub use streaming::StreamingSynchronizer;

/// A background task that populates the repository.
pub trait Synchronizer: Send {
    /// Start synchronizing. The returned signal completes once the first repository is loaded.
    fn start(&mut self) -> Result<ReadySignal>;

    /// Stop synchronizing and wait for background threads to exit.
    fn stop(&mut self);
}

/// Completion signal of the first repository load.
///
/// Holds `None` while nothing has been loaded yet. Holds `Some(Ok(()))` once a repository has been
/// loaded, and `Some(Err(...))` if the latest attempt to load the first repository failed in a way
/// worth reporting to the waiter. Once `Ok`, the signal never changes again.
#[derive(Debug, Clone, Default)]
pub struct ReadySignal {
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl ReadySignal {
    /// Create a signal that has not completed yet.
    pub fn new() -> ReadySignal {
        ReadySignal::default()
    }

    pub(crate) fn complete(&self, value: Result<()>) {
        let Ok(mut lock) = self.result.0.lock() else {
            return;
        };
        if !matches!(*lock, Some(Ok(()))) {
            *lock = Some(value);
            self.result.1.notify_all();
        }
    }

    /// Whether the first repository has been loaded.
    pub fn is_ready(&self) -> bool {
        self.result
            .0
            .lock()
            .map(|lock| matches!(*lock, Some(Ok(()))))
            .unwrap_or(false)
    }

    /// Block until the signal completes.
    pub fn wait(&self) -> Result<()> {
        let lock = self.result.0.lock().map_err(|_| Error::ThreadPanicked)?;
        let lock = self
            .result
            .1
            .wait_while(lock, |result| result.is_none())
            .map_err(|_| Error::ThreadPanicked)?;
        lock.clone().unwrap_or(Ok(()))
    }

    /// Block until the signal completes or `timeout` elapses. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let lock = match self.result.0.lock() {
            Ok(lock) => lock,
            Err(_) => return Some(Err(Error::ThreadPanicked)),
        };
        match self
            .result
            .1
            .wait_timeout_while(lock, timeout, |result| result.is_none())
        {
            Ok((lock, _)) => lock.clone(),
            Err(_) => Some(Err(Error::ThreadPanicked)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::Error;

    use super::ReadySignal;

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let signal = ReadySignal::new();
        assert!(signal
            .wait_timeout(Duration::from_millis(10))
            .is_none());
        assert!(!signal.is_ready());
    }

    #[test]
    fn completes_from_another_thread() {
        let signal = ReadySignal::new();
        {
            let signal = signal.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                signal.complete(Ok(()));
            });
        }

        assert!(signal.wait().is_ok());
        assert!(signal.is_ready());
    }

    #[test]
    fn ok_is_final() {
        let signal = ReadySignal::new();
        signal.complete(Err(Error::Unauthorized));
        assert!(matches!(
            signal.wait_timeout(Duration::ZERO),
            Some(Err(Error::Unauthorized))
        ));

        signal.complete(Ok(()));
        signal.complete(Err(Error::Unauthorized));
        assert!(matches!(signal.wait_timeout(Duration::ZERO), Some(Ok(()))));
    }
}
