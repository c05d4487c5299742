//! Streaming synchronizer: polling plus a realtime websocket that triggers immediate polls.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::{
    sync::{
        poller::{jittered, PollTrigger, PollingSynchronizer},
        realtime::{self, EnginePacket, SocketPacket},
        ReadySignal, Synchronizer,
    },
    Error, Result,
};

/// Delay before reconnecting a dropped realtime connection.
pub const REALTIME_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REALTIME_RECONNECT_JITTER: Duration = Duration::from_secs(1);

/// Synchronizer that polls at a fixed interval and additionally listens on the realtime channel.
///
/// Polling stays the source of truth; the realtime channel only shortens the time it takes for an
/// update to reach this client.
pub struct StreamingSynchronizer {
    poller: PollingSynchronizer,
    realtime_url: Url,
    server_sdk_key: String,
    realtime: Option<RealtimeThread>,
}

struct RealtimeThread {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: watch::Sender<bool>,
}

impl StreamingSynchronizer {
    /// Wrap `poller`, adding a realtime connection to `realtime_url` that registers with
    /// `server_sdk_key`.
    pub fn new(
        poller: PollingSynchronizer,
        realtime_url: Url,
        server_sdk_key: impl Into<String>,
    ) -> StreamingSynchronizer {
        StreamingSynchronizer {
            poller,
            realtime_url,
            server_sdk_key: server_sdk_key.into(),
            realtime: None,
        }
    }

    fn spawn_realtime(&self, trigger: PollTrigger) -> Result<RealtimeThread> {
        let url = realtime::websocket_url(&self.realtime_url)?;
        let namespace = realtime::namespace(&self.realtime_url);
        let server_sdk_key = self.server_sdk_key.clone();
        let (stop_sender, stop_receiver) = watch::channel(false);

        let join_handle = std::thread::Builder::new()
            .name("featureprobe-realtime".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::warn!(target: "featureprobe", "failed to start realtime runtime: {err}");
                        return;
                    }
                };
                runtime.block_on(run(url, namespace, server_sdk_key, trigger, stop_receiver));
            })?;

        Ok(RealtimeThread {
            join_handle,
            stop_sender,
        })
    }
}

impl Synchronizer for StreamingSynchronizer {
    fn start(&mut self) -> Result<ReadySignal> {
        let signal = self.poller.start()?;
        if self.realtime.is_none() {
            if let Some(trigger) = self.poller.trigger() {
                log::info!(target: "featureprobe", url = self.realtime_url.as_str(); "starting realtime channel");
                self.realtime = Some(self.spawn_realtime(trigger)?);
            }
        }
        Ok(signal)
    }

    fn stop(&mut self) {
        if let Some(realtime) = self.realtime.take() {
            let _ = realtime.stop_sender.send(true);
            if realtime.join_handle.join().is_err() {
                log::warn!(target: "featureprobe", "realtime thread panicked");
            }
        }
        self.poller.stop();
    }
}

impl Drop for StreamingSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keep a realtime session open, reconnecting after failures, until stopped.
async fn run(
    url: Url,
    namespace: String,
    server_sdk_key: String,
    trigger: PollTrigger,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }

        tokio::select! {
            result = session(&url, &namespace, &server_sdk_key, &trigger) => match result {
                Ok(()) => log::info!(target: "featureprobe", "realtime connection closed"),
                Err(err) => log::warn!(target: "featureprobe", "realtime connection failed: {err}"),
            },
            _ = stop.changed() => return,
        }

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay()) => {}
            _ = stop.changed() => return,
        }
    }
}

fn reconnect_delay() -> Duration {
    jittered(REALTIME_RECONNECT_DELAY, REALTIME_RECONNECT_JITTER)
}

/// Run one realtime session. Only packets for `namespace` are acted upon.
async fn session(url: &Url, namespace: &str, server_sdk_key: &str, trigger: &PollTrigger) -> Result<()> {
    let (stream, _response) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = stream.split();

    while let Some(message) = read.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let packet = match realtime::decode(text.as_str()) {
            Some(EnginePacket::Message { namespace: ns, packet }) => {
                if ns != namespace {
                    log::debug!(target: "featureprobe", namespace = ns.as_str(); "ignoring packet for other namespace");
                    continue;
                }
                packet
            }
            Some(EnginePacket::Open(handshake)) => {
                log::debug!(target: "featureprobe", handshake = handshake.as_str(); "realtime handshake received");
                write.send(Message::text(realtime::encode_connect(namespace))).await?;
                continue;
            }
            Some(EnginePacket::Ping(data)) => {
                write.send(Message::text(realtime::encode_pong(&data))).await?;
                continue;
            }
            Some(EnginePacket::Close) => break,
            _ => continue,
        };

        match packet {
            SocketPacket::Connect => {
                log::info!(target: "featureprobe", namespace; "realtime connected, registering");
                let register = realtime::encode_event(
                    namespace,
                    "register",
                    &json!({ "key": server_sdk_key }),
                );
                write.send(Message::text(register)).await?;
            }
            SocketPacket::Event { name, .. } if name == "update" => {
                log::debug!(target: "featureprobe", "realtime update received");
                trigger.poll_now();
            }
            SocketPacket::ConnectError(err) => return Err(Error::Realtime(err)),
            SocketPacket::Disconnect => break,
            _ => {}
        }
    }

    Ok(())
}
