//! Reconnecting roster subscription.
//!
//! A [`RosterChannel`] owns one background task. The task holds at most one
//! transport at a time, asks for a snapshot every time a connection opens and
//! reconnects after a fixed delay whenever the connection goes away. Only
//! [`RosterChannel::dispose`] (or dropping the handle) ends it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{GymError, GymResult};
use crate::network::protocol::{RosterFrame, RosterRequest};

use super::transport::{RosterConnector, RosterTransport};

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Disposed,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub topic: String,
    pub retry_delay: Duration,
    /// Extra fields sent with every snapshot request.
    pub filter: Map<String, Value>,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>, topic: impl Into<String>, retry_delay: Duration) -> Self {
        Self {
            url: url.into(),
            topic: topic.into(),
            retry_delay,
            filter: Map::new(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }
}

pub type Snapshot = Arc<Vec<Value>>;

enum Command {
    Refresh(oneshot::Sender<bool>),
}

enum Exit {
    Closed,
    Disposed,
}

/// Handle to a running roster subscription.
///
/// Snapshots are shared read-only; a reconnecting channel keeps the last one.
pub struct RosterChannel {
    topic: String,
    commands: mpsc::Sender<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    snapshot: Arc<watch::Sender<Snapshot>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RosterChannel {
    /// Start the subscription. Must be called inside a tokio runtime.
    pub fn open(connector: Arc<dyn RosterConnector>, config: ChannelConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let state = Arc::new(watch::Sender::new(ConnectionState::Connecting));
        let snapshot = Arc::new(watch::Sender::new(Snapshot::default()));
        let cancel = CancellationToken::new();

        let worker = Worker {
            connector,
            topic: config.topic.clone(),
            url: config.url,
            retry_delay: config.retry_delay,
            filter: config.filter,
            commands: command_rx,
            state: state.clone(),
            snapshot: snapshot.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            topic: config.topic,
            commands,
            state,
            snapshot,
            cancel,
            task: Some(task),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Last snapshot received, empty until the first one arrives.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever a new snapshot replaces the current one.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Ask the server for a fresh snapshot.
    ///
    /// Returns `false` when the channel is not open or the request could not
    /// be written; the caller then has to fetch the roster some other way.
    pub async fn request_refresh(&self) -> bool {
        if !self.is_open() {
            return false;
        }

        let (ack, answer) = oneshot::channel();
        if self.commands.send(Command::Refresh(ack)).await.is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }

    /// Install a snapshot obtained outside the channel.
    pub fn replace_snapshot(&self, entries: Vec<Value>) {
        self.snapshot.send_replace(Arc::new(entries));
    }

    /// Close the transport, cancel any pending reconnect and stop for good.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(topic = %self.topic, error = %e, "Roster task ended abnormally");
        }
        self.state.send_replace(ConnectionState::Disposed);
        tracing::info!(topic = %self.topic, "Roster channel disposed");
    }
}

impl Drop for RosterChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    connector: Arc<dyn RosterConnector>,
    topic: String,
    url: String,
    retry_delay: Duration,
    filter: Map<String, Value>,
    commands: mpsc::Receiver<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    snapshot: Arc<watch::Sender<Snapshot>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            tracing::debug!(topic = %self.topic, url = %self.url, "Connecting roster channel");

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(mut transport) => {
                    self.state.send_replace(ConnectionState::Open);
                    tracing::info!(topic = %self.topic, "Roster channel open");

                    if let Err(e) = self.request_snapshot(transport.as_mut()).await {
                        tracing::warn!(topic = %self.topic, error = %e, "Initial snapshot request failed");
                    }

                    let exit = self.pump(transport.as_mut()).await;
                    transport.close().await;
                    if let Exit::Disposed = exit {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "Roster connection failed");
                }
            }

            self.state.send_replace(ConnectionState::Closed);
            tracing::info!(
                topic = %self.topic,
                delay_ms = self.retry_delay.as_millis() as u64,
                "Roster channel closed, scheduling reconnect"
            );

            if let Exit::Disposed = self.wait_for_retry().await {
                return;
            }
        }
    }

    /// Serve one open connection until it closes or the channel is disposed.
    async fn pump(&mut self, transport: &mut dyn RosterTransport) -> Exit {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Exit::Disposed,

                command = self.commands.recv() => match command {
                    Some(Command::Refresh(ack)) => {
                        let sent = match self.request_snapshot(transport).await {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!(topic = %self.topic, error = %e, "Snapshot request failed");
                                false
                            }
                        };
                        let _ = ack.send(sent);
                    }
                    None => return Exit::Disposed,
                },

                frame = transport.recv_text() => match frame {
                    Some(Ok(text)) => self.apply(&text),
                    Some(Err(GymError::Protocol(message))) => {
                        tracing::warn!(topic = %self.topic, %message, "Ignoring undecodable frame");
                    }
                    Some(Err(e)) => {
                        tracing::warn!(topic = %self.topic, error = %e, "Roster transport error");
                        return Exit::Closed;
                    }
                    None => return Exit::Closed,
                },
            }
        }
    }

    /// Sleep out the reconnect delay. Refresh requests arriving meanwhile are
    /// declined so callers fall back immediately.
    async fn wait_for_retry(&mut self) -> Exit {
        let delay = tokio::time::sleep(self.retry_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Disposed,
                _ = &mut delay => return Exit::Closed,
                command = self.commands.recv() => match command {
                    Some(Command::Refresh(ack)) => {
                        let _ = ack.send(false);
                    }
                    None => return Exit::Disposed,
                },
            }
        }
    }

    async fn request_snapshot(&self, transport: &mut dyn RosterTransport) -> GymResult<()> {
        let request = RosterRequest {
            topic: &self.topic,
            filter: &self.filter,
        }
        .encode()?;
        transport.send_text(request).await?;
        tracing::debug!(topic = %self.topic, "Snapshot requested");
        Ok(())
    }

    fn apply(&self, raw: &str) {
        let frame = match RosterFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Ignoring malformed roster frame");
                return;
            }
        };

        let frame_topic = frame.topic.clone();
        match frame.into_snapshot_for(&self.topic) {
            Some(entries) => {
                tracing::debug!(topic = %self.topic, entries = entries.len(), "Snapshot received");
                self.snapshot.send_replace(Arc::new(entries));
            }
            None => {
                tracing::debug!(topic = %self.topic, frame_topic = %frame_topic, "Ignoring frame for another roster");
            }
        }
    }
}
