//! Connection manager: transport lifecycle, outbox and the public client API.
//!
//! The link walks Idle → Connecting → Open → Closed(retry scheduled) →
//! Connecting → … with a fixed, non-backoff retry interval (default 10 s).
//! Requests issued while the link is not open land in the outbox; on open the
//! outbox is flushed in enqueue order and persistent subscriptions are
//! replayed, atomically with respect to concurrent sends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use querysync_shared::{ClientRequest, Error, QueryId, QuerySpec, ServerReply};

use crate::lock;
use crate::outbox::Outbox;
use crate::repository::{Callback, Repository, Subscriber, SubscriptionId};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Connection lifecycle as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

/// Client configuration.
///
/// The retry interval is fixed (no backoff); `QUERYSYNC_RETRY_SECS` overrides
/// the 10 second default.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub url: String,
    /// Bearer token appended as a `token` query parameter.
    pub token: Option<String>,
    /// Database targeted by the collection-level helpers.
    pub database: String,
    pub retry_interval: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let retry_interval = std::env::var("QUERYSYNC_RETRY_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_INTERVAL);

        ClientConfig {
            url: url.into(),
            token: None,
            database: "app".into(),
            retry_interval,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    fn ws_url(&self) -> Result<String, Error> {
        let mut url =
            url::Url::parse(&self.url).map_err(|err| Error::Transport(err.to_string()))?;
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url.to_string())
    }
}

struct Link {
    state: ConnectionState,
    sender: Option<UnboundedSender<String>>,
    outbox: Outbox,
}

struct ClientInner {
    config: ClientConfig,
    link: Mutex<Link>,
    repository: Arc<Repository>,
    /// Wakes a pending retry sleep when `connect` is called explicitly.
    wake: Notify,
    started: AtomicBool,
}

/// Handle to the broker: cheap to clone, safe to share.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            inner: Arc::new(ClientInner {
                config,
                link: Mutex::new(Link {
                    state: ConnectionState::Idle,
                    sender: None,
                    outbox: Outbox::new(),
                }),
                repository: Arc::new(Repository::new()),
                wake: Notify::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Start the connection loop. A no-op while already connecting or open;
    /// while a retry is scheduled this wakes it immediately. Must be called
    /// from within a tokio runtime.
    pub fn connect(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            // Only a scheduled retry gets cancelled; connecting or open links
            // are left alone.
            if self.state() == ConnectionState::Closed {
                self.inner.wake.notify_one();
            }
            return;
        }
        {
            let mut link = lock(&self.inner.link);
            link.state = ConnectionState::Connecting;
        }
        let inner = self.inner.clone();
        tokio::spawn(connection_loop(inner));
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.link).state
    }

    /// Requests buffered while the link is down.
    pub fn pending(&self) -> usize {
        lock(&self.inner.link).outbox.len()
    }

    pub fn repository(&self) -> Arc<Repository> {
        self.inner.repository.clone()
    }

    /// Last known result for a query id.
    pub fn last_result(&self, id: &QueryId) -> Option<Value> {
        self.inner.repository.last_result(id)
    }

    /// One-shot find: the callback fires once with the first reply for this
    /// query id.
    pub fn query(
        &self,
        collection: &str,
        params: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::find(self.inner.config.database.clone(), collection, params),
            callback,
        )
    }

    /// Persistent find: the callback fires on the initial result and on every
    /// recompute pushed after a write.
    pub fn subscribe(
        &self,
        collection: &str,
        params: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.subscribe_spec(
            QuerySpec::find(self.inner.config.database.clone(), collection, params),
            callback,
        )
    }

    /// Persistent subscription to any read query.
    pub fn subscribe_spec(
        &self,
        spec: QuerySpec,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        if !spec.kind.is_read() {
            return Err(Error::InvalidSpec(
                "only read queries can be subscribed".into(),
            ));
        }
        let id = spec.compute_id()?;
        let subscription = self.inner.repository.register(
            Subscriber::Persistent(id.clone()),
            &spec.collection,
            Some(spec.clone()),
            Arc::new(callback) as Callback,
        );
        let request = ClientRequest {
            id: id.to_string(),
            spec,
        };
        if let Err(err) = self.send_request(Some(id), request) {
            self.inner.repository.unsubscribe(subscription);
            return Err(err);
        }
        Ok(subscription)
    }

    /// One-shot execution of any spec, read or write.
    pub fn fetch(
        &self,
        spec: QuerySpec,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        let (wire_id, key) = self.wire_identity(&spec)?;
        let subscription = self.inner.repository.register(
            Subscriber::OneShot(QueryId::from(wire_id.as_str())),
            &spec.collection,
            None,
            Arc::new(callback) as Callback,
        );
        let request = ClientRequest { id: wire_id, spec };
        if let Err(err) = self.send_request(key, request) {
            self.inner.repository.unsubscribe(subscription);
            return Err(err);
        }
        Ok(subscription)
    }

    /// Fire-and-forget execution; returns the wire id of the request.
    pub fn send(&self, spec: QuerySpec) -> Result<String, Error> {
        let (wire_id, key) = self.wire_identity(&spec)?;
        let request = ClientRequest {
            id: wire_id.clone(),
            spec,
        };
        self.send_request(key, request)?;
        Ok(wire_id)
    }

    /// Channel-level listener: fires on every read-kind reply for the
    /// collection, regardless of query id. Purely local — nothing is sent.
    pub fn listen(
        &self,
        collection: &str,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.repository.register(
            Subscriber::Channel(collection.to_string()),
            collection,
            None,
            Arc::new(callback) as Callback,
        )
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.repository.unsubscribe(id)
    }

    pub fn unsubscribe_all(&self, collection: &str) -> usize {
        self.inner.repository.unsubscribe_all(collection)
    }

    pub fn find_one(
        &self,
        collection: &str,
        params: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::find_one(self.inner.config.database.clone(), collection, params),
            callback,
        )
    }

    pub fn count(
        &self,
        collection: &str,
        params: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::count(self.inner.config.database.clone(), collection, params),
            callback,
        )
    }

    pub fn distinct(
        &self,
        collection: &str,
        field: &str,
        params: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::distinct(self.inner.config.database.clone(), collection, field, params),
            callback,
        )
    }

    pub fn aggregate(
        &self,
        collection: &str,
        pipeline: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::aggregate(self.inner.config.database.clone(), collection, pipeline),
            callback,
        )
    }

    pub fn insert(
        &self,
        collection: &str,
        docs: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::insert(self.inner.config.database.clone(), collection, docs),
            callback,
        )
    }

    pub fn update(
        &self,
        collection: &str,
        selector: Value,
        changes: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::update(
                self.inner.config.database.clone(),
                collection,
                selector,
                changes,
            ),
            callback,
        )
    }

    pub fn remove(
        &self,
        collection: &str,
        selector: Value,
        callback: impl Fn(&ServerReply) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, Error> {
        self.fetch(
            QuerySpec::remove(self.inner.config.database.clone(), collection, selector),
            callback,
        )
    }

    /// Read kinds are identified by their QueryId; writes get a fresh wire id
    /// so they are never deduplicated.
    fn wire_identity(&self, spec: &QuerySpec) -> Result<(String, Option<QueryId>), Error> {
        if spec.kind.is_read() {
            let id = spec.compute_id()?;
            Ok((id.to_string(), Some(id)))
        } else {
            spec.validate()?;
            Ok((Uuid::new_v4().to_string(), None))
        }
    }

    fn send_request(&self, key: Option<QueryId>, request: ClientRequest) -> Result<(), Error> {
        let json = request.to_json()?;
        let mut link = lock(&self.inner.link);
        if link.state == ConnectionState::Open {
            if let Some(sender) = &link.sender {
                if sender.unbounded_send(json).is_ok() {
                    return Ok(());
                }
            }
            // Writer went away under us; buffer and let the loop reconnect.
            link.sender = None;
            link.state = ConnectionState::Closed;
        }
        link.outbox.push(key, request);
        Ok(())
    }
}

async fn connection_loop(inner: Arc<ClientInner>) {
    loop {
        set_state(&inner, ConnectionState::Connecting);

        let url = match inner.config.ws_url() {
            Ok(url) => url,
            Err(err) => {
                tracing::error!("invalid server url: {err}");
                set_state(&inner, ConnectionState::Closed);
                wait_retry(&inner).await;
                continue;
            }
        };

        match connect_async(&url).await {
            Ok((stream, _response)) => {
                tracing::info!("connected to {}", inner.config.url);
                run_session(&inner, stream).await;
                tracing::info!(
                    "connection to {} closed, retrying in {:?}",
                    inner.config.url,
                    inner.config.retry_interval
                );
            }
            Err(err) => {
                set_state(&inner, ConnectionState::Closed);
                tracing::warn!("connect to {} failed: {err}", inner.config.url);
            }
        }

        wait_retry(&inner).await;
    }
}

/// Single-shot, fixed-interval retry timer. An explicit `connect` wakes it
/// early; at most one is ever pending because the loop is the only sleeper.
async fn wait_retry(inner: &Arc<ClientInner>) {
    tokio::select! {
        _ = tokio::time::sleep(inner.config.retry_interval) => {}
        _ = inner.wake.notified() => {}
    }
}

async fn run_session(inner: &Arc<ClientInner>, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = unbounded::<String>();

    // Flush the outbox in enqueue order, replay persistent subscriptions not
    // already buffered, then open the link. Everything happens under the link
    // lock so a concurrent send cannot interleave ahead of the buffer.
    {
        let mut link = lock(&inner.link);
        let mut sent: HashSet<String> = HashSet::new();
        for request in link.outbox.drain() {
            sent.insert(request.id.clone());
            match request.to_json() {
                Ok(json) => {
                    let _ = tx.unbounded_send(json);
                }
                Err(err) => tracing::error!("dropping unserializable outbox entry: {err}"),
            }
        }
        for request in inner.repository.resubscribe_requests() {
            if sent.insert(request.id.clone()) {
                if let Ok(json) = request.to_json() {
                    let _ = tx.unbounded_send(json);
                }
            }
        }
        link.sender = Some(tx);
        link.state = ConnectionState::Open;
    }

    let write_task = tokio::spawn(async move {
        while let Some(json) = rx.next().await {
            if write.send(Message::text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match ServerReply::from_json(text.as_str()) {
                Ok(reply) => inner.repository.dispatch(&reply),
                Err(err) => tracing::warn!("undecodable push: {err}"),
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::warn!("read error: {err}");
                break;
            }
            _ => {}
        }
    }

    {
        let mut link = lock(&inner.link);
        link.sender = None;
        link.state = ConnectionState::Closed;
    }
    write_task.abort();
}

fn set_state(inner: &Arc<ClientInner>, state: ConnectionState) {
    lock(&inner.link).state = state;
}
