//! Bounded, non-blocking event pipeline.
//!
//! Producers enqueue with `try_send` so evaluation never waits on I/O. A single consumer thread
//! drains the queue in batches into an [`EventRecorder`] and hands snapshots to the
//! [`EventDispatcher`] on flush. A timer thread requests a flush periodically.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
        Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use url::Url;

use crate::{
    events::{dispatcher::EventDispatcher, recorder::EventRecorder, Event},
    Result,
};

/// Tuning knobs for [`EventProcessor`].
#[derive(Debug, Clone)]
pub struct EventProcessorConfig {
    /// Maximum number of queued actions before new events are dropped.
    pub queue_capacity: usize,
    /// Maximum number of actions the consumer handles per wake-up.
    pub batch_size: usize,
    /// Interval between scheduled flushes.
    pub flush_interval: Duration,
    /// How long shutdown waits for the consumer and pending requests.
    pub shutdown_timeout: Duration,
}

impl EventProcessorConfig {
    /// Default value for [`EventProcessorConfig::queue_capacity`].
    pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
    /// Default value for [`EventProcessorConfig::batch_size`].
    pub const DEFAULT_BATCH_SIZE: usize = 50;
    /// Default value for [`EventProcessorConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
    /// Default value for [`EventProcessorConfig::shutdown_timeout`].
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

    /// Create a configuration with default values.
    pub fn new() -> EventProcessorConfig {
        EventProcessorConfig {
            queue_capacity: EventProcessorConfig::DEFAULT_QUEUE_CAPACITY,
            batch_size: EventProcessorConfig::DEFAULT_BATCH_SIZE,
            flush_interval: EventProcessorConfig::DEFAULT_FLUSH_INTERVAL,
            shutdown_timeout: EventProcessorConfig::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Override [`EventProcessorConfig::flush_interval`].
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> EventProcessorConfig {
        self.flush_interval = flush_interval;
        self
    }

    /// Override [`EventProcessorConfig::queue_capacity`]. A capacity of zero is raised to one.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> EventProcessorConfig {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
}

impl Default for EventProcessorConfig {
    fn default() -> EventProcessorConfig {
        EventProcessorConfig::new()
    }
}

enum EventAction {
    Event(Event),
    Flush,
    Shutdown,
}

/// Collects events and periodically reports them to the server.
pub struct EventProcessor {
    sender: SyncSender<EventAction>,
    closed: AtomicBool,
    shutdown_timeout: Duration,
    threads: Mutex<Option<Threads>>,
}

struct Threads {
    consumer: JoinHandle<()>,
    consumer_done: Receiver<()>,
    timer: JoinHandle<()>,
    timer_stop: SyncSender<()>,
}

impl EventProcessor {
    /// Start the consumer and flush timer threads. Batches are POSTed to `url` with `client`.
    pub fn start(client: reqwest::Client, url: Url, config: EventProcessorConfig) -> Result<EventProcessor> {
        let dispatcher = EventDispatcher::new(client, url)?;
        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity);

        let (done_sender, consumer_done) = mpsc::sync_channel(1);
        let batch_size = config.batch_size.max(1);
        let drain_timeout = config.shutdown_timeout;
        let consumer = std::thread::Builder::new()
            .name("featureprobe-events".to_owned())
            .spawn(move || {
                consume(receiver, dispatcher, batch_size, drain_timeout);
                let _ = done_sender.send(());
            })?;

        let (timer_stop, stop_receiver) = mpsc::sync_channel(1);
        let timer_sender = sender.clone();
        let flush_interval = config.flush_interval;
        let timer = std::thread::Builder::new()
            .name("featureprobe-flush-timer".to_owned())
            .spawn(move || loop {
                match stop_receiver.recv_timeout(flush_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // A full queue already has a consumer busy; skipping one tick is fine.
                        let _ = timer_sender.try_send(EventAction::Flush);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        log::debug!(target: "featureprobe", queue_capacity = config.queue_capacity, batch_size = batch_size; "started event processor");

        Ok(EventProcessor {
            sender,
            closed: AtomicBool::new(false),
            shutdown_timeout: config.shutdown_timeout,
            threads: Mutex::new(Some(Threads {
                consumer,
                consumer_done,
                timer,
                timer_stop,
            })),
        })
    }

    /// Enqueue `event` without blocking. Returns `false` if the event was dropped because the
    /// queue is full or the processor is shut down.
    pub fn push(&self, event: Event) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match self.sender.try_send(EventAction::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "featureprobe", "Event processing is busy, some will be dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Request an asynchronous flush of everything enqueued so far.
    pub fn flush(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.sender.try_send(EventAction::Flush).is_err() {
            log::warn!(target: "featureprobe", "Event processing is busy, flush request skipped");
        }
    }

    /// Whether [`EventProcessor::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush remaining events and stop background threads, waiting a bounded amount of time.
    ///
    /// Idempotent; subsequent calls return immediately.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let threads = match self.threads.lock() {
            Ok(mut threads) => threads.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(threads) = threads else {
            return;
        };

        let _ = threads.timer_stop.send(());
        if threads.timer.join().is_err() {
            log::warn!(target: "featureprobe", "flush timer thread panicked");
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        if !self.send_before(EventAction::Flush, deadline)
            || !self.send_before(EventAction::Shutdown, deadline)
        {
            log::warn!(target: "featureprobe", "event queue did not drain before shutdown timeout");
            return;
        }

        // Consumer also waits on pending requests, allow for both.
        let remaining = deadline.saturating_duration_since(Instant::now()) + self.shutdown_timeout;
        match threads.consumer_done.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(target: "featureprobe", "timed out waiting for event processor to stop");
            }
            _ => {
                if threads.consumer.join().is_err() {
                    log::warn!(target: "featureprobe", "event processor thread panicked");
                }
            }
        }
        log::debug!(target: "featureprobe", "event processor stopped");
    }

    /// Internal actions bypass the closed flag but must not block forever on a full queue.
    fn send_before(&self, action: EventAction, deadline: Instant) -> bool {
        let mut action = action;
        loop {
            match self.sender.try_send(action) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    action = returned;
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume(
    receiver: Receiver<EventAction>,
    dispatcher: EventDispatcher,
    batch_size: usize,
    drain_timeout: Duration,
) {
    let mut recorder = EventRecorder::default();
    let mut batch = Vec::with_capacity(batch_size);

    'outer: while let Ok(first) = receiver.recv() {
        batch.push(first);
        while batch.len() < batch_size {
            match receiver.try_recv() {
                Ok(action) => batch.push(action),
                Err(_) => break,
            }
        }

        for action in batch.drain(..) {
            match action {
                EventAction::Event(event) => recorder.add(event),
                EventAction::Flush => flush(&mut recorder, &dispatcher),
                EventAction::Shutdown => {
                    flush(&mut recorder, &dispatcher);
                    break 'outer;
                }
            }
        }
    }

    dispatcher.shutdown(drain_timeout);
}

fn flush(recorder: &mut EventRecorder, dispatcher: &EventDispatcher) {
    if recorder.is_empty() {
        return;
    }
    dispatcher.dispatch(recorder.take());
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::Value;
    use url::Url;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    use crate::{
        eval::EvaluationResult,
        events::Event,
        http::build_client,
        FPUser,
    };

    use super::{EventProcessor, EventProcessorConfig};

    fn processor(server: &MockServer, config: EventProcessorConfig) -> EventProcessor {
        let client =
            build_client("server-key", Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        let url = Url::parse(&format!("{}/api/events", server.uri())).unwrap();
        EventProcessor::start(client, url, config).unwrap()
    }

    fn access(user: &FPUser) -> Event {
        let result = EvaluationResult {
            value: Some(Value::Bool(true)),
            rule_index: None,
            variation_index: Some(0),
            version: Some(1),
            reason: String::new(),
        };
        Event::access(user, "toggle", &result, false)
    }

    async fn mock_events(server: &MockServer) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    async fn received_bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    fn access_count(bodies: &[Value]) -> u64 {
        bodies
            .iter()
            .flat_map(|body| body.as_array().unwrap())
            .filter_map(|batch| batch["access"]["counters"]["toggle"].as_array())
            .flatten()
            .map(|counter| counter["count"].as_u64().unwrap())
            .sum()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_sends_aggregated_events() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = MockServer::start().await;
        mock_events(&server).await;

        let processor = processor(
            &server,
            EventProcessorConfig::new().with_flush_interval(Duration::from_secs(60)),
        );
        let user = FPUser::new().stable_rollout("u1");
        for _ in 0..10 {
            assert!(processor.push(access(&user)));
        }
        assert!(processor.push(Event::custom(&user, "purchase", Some(2.0))));
        processor.flush();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut bodies = received_bodies(&server).await;
        while bodies.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bodies = received_bodies(&server).await;
        }

        assert_eq!(bodies.len(), 1);
        assert_eq!(access_count(&bodies), 10);
        assert_eq!(bodies[0][0]["events"][0]["name"], "purchase");

        tokio::task::spawn_blocking(move || processor.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_flush_sends_nothing() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = MockServer::start().await;
        mock_events(&server).await;

        let processor = processor(
            &server,
            EventProcessorConfig::new().with_flush_interval(Duration::from_millis(20)),
        );
        processor.flush();
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::spawn_blocking(move || processor.shutdown())
            .await
            .unwrap();

        assert!(received_bodies(&server).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timer_flushes_periodically() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = MockServer::start().await;
        mock_events(&server).await;

        let processor = processor(
            &server,
            EventProcessorConfig::new().with_flush_interval(Duration::from_millis(50)),
        );
        processor.push(access(&FPUser::new()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while received_bodies(&server).await.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(access_count(&received_bodies(&server).await), 1);

        tokio::task::spawn_blocking(move || processor.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_flushes_and_disables_push() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = MockServer::start().await;
        mock_events(&server).await;

        let processor = processor(
            &server,
            EventProcessorConfig::new().with_flush_interval(Duration::from_secs(60)),
        );
        let user = FPUser::new();
        processor.push(access(&user));
        processor.push(access(&user));

        let processor = tokio::task::spawn_blocking(move || {
            processor.shutdown();
            processor.shutdown();
            processor
        })
        .await
        .unwrap();

        assert!(processor.is_closed());
        assert!(!processor.push(access(&user)));
        processor.flush();
        assert_eq!(access_count(&received_bodies(&server).await), 2);

        tokio::task::spawn_blocking(move || drop(processor))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_events_and_flushes_without_blocking() {
        let _ = env_logger::builder().is_test(true).try_init();

        let server = MockServer::start().await;
        mock_events(&server).await;

        let processor = processor(
            &server,
            EventProcessorConfig::new()
                .with_queue_capacity(4)
                .with_flush_interval(Duration::from_secs(60)),
        );

        let (accepted, processor) = tokio::task::spawn_blocking(move || {
            let user = FPUser::new();
            let started = Instant::now();
            let accepted = (0..10_000).filter(|_| processor.push(access(&user))).count();
            // Flush requests on a saturated queue are dropped rather than waited on.
            for _ in 0..1_000 {
                processor.flush();
            }
            assert!(started.elapsed() < Duration::from_secs(5));
            processor.shutdown();
            (accepted, processor)
        })
        .await
        .unwrap();

        assert!(accepted > 0);
        assert_eq!(access_count(&received_bodies(&server).await), accepted as u64);

        tokio::task::spawn_blocking(move || drop(processor))
            .await
            .unwrap();
    }
}
