//! Scripted in-memory backends for tests.
//!
//! [`ScriptedTransport`] answers HTTP requests from per-route queues and
//! records everything it was sent. [`ScriptedConnector`] hands the test a
//! [`ServerEnd`] for every roster connection the channel opens.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::{GymError, GymResult};
use crate::network::http::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::realtime::{RosterConnector, RosterTransport};

enum Reply {
    Response(ApiResponse),
    Delayed(Duration, ApiResponse),
    Error(GymError),
}

/// [`HttpTransport`] that replays queued responses per `(method, path)`.
///
/// An unscripted route answers 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn push(&self, method: Method, path: &str, response: ApiResponse) {
        self.enqueue(method, path, Reply::Response(response));
    }

    /// Answer only after `delay` has elapsed.
    pub fn push_delayed(&self, method: Method, path: &str, delay: Duration, response: ApiResponse) {
        self.enqueue(method, path, Reply::Delayed(delay, response));
    }

    pub fn push_error(&self, method: Method, path: &str, error: GymError) {
        self.enqueue(method, path, Reply::Error(error));
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.sent.lock().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> GymResult<ApiResponse> {
        self.sent.lock().push(request.clone());

        let reply = self
            .routes
            .lock()
            .get_mut(&(request.method, request.path.clone()))
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Reply::Error(error)) => Err(error),
            None => Ok(ApiResponse::json_body(
                404,
                &json!({ "detail": format!("no scripted reply for {} {}", request.method.as_str(), request.path) }),
            )),
        }
    }
}

#[derive(Default)]
struct ConnectorStats {
    connects: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
    failures: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

/// [`RosterConnector`] whose connections are driven by the test.
#[derive(Clone)]
pub struct ScriptedConnector {
    stats: Arc<ConnectorStats>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl ScriptedConnector {
    /// The receiver yields one [`ServerEnd`] per successful connect.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, servers) = mpsc::unbounded_channel();
        let connector = Self {
            stats: Arc::new(ConnectorStats::default()),
            accepted,
        };
        (connector, servers)
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.stats.failures.store(n, Ordering::SeqCst);
    }

    /// Connection attempts, failed ones included.
    pub fn connects(&self) -> usize {
        self.stats.connects.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open transports seen.
    pub fn max_open(&self) -> usize {
        self.stats.max_open.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.stats.urls.lock().clone()
    }
}

#[async_trait]
impl RosterConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> GymResult<Box<dyn RosterTransport>> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        self.stats.urls.lock().push(url.to_string());

        let failing = self
            .stats
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GymError::Transport(format!("scripted connect failure for {url}")));
        }

        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_open.fetch_max(open, Ordering::SeqCst);

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerEnd {
            to_client: Some(to_client),
            from_client,
        });

        Ok(Box::new(ScriptedSocket {
            inbound,
            outbound,
            stats: self.stats.clone(),
            closed: false,
        }))
    }
}

/// Test-side end of one scripted connection.
pub struct ServerEnd {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, raw: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(raw.to_string());
        }
    }

    /// Next message written by the client.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Server-initiated close. Frames already pushed are still delivered.
    pub fn close(mut self) {
        self.to_client.take();
    }
}

struct ScriptedSocket {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    stats: Arc<ConnectorStats>,
    closed: bool,
}

impl ScriptedSocket {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RosterTransport for ScriptedSocket {
    async fn send_text(&mut self, text: String) -> GymResult<()> {
        if self.closed {
            return Err(GymError::Transport("socket closed".to_string()));
        }
        self.outbound
            .send(text)
            .map_err(|_| GymError::Transport("peer went away".to_string()))
    }

    async fn recv_text(&mut self) -> Option<GymResult<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.mark_closed();
    }
}

impl Drop for ScriptedSocket {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
