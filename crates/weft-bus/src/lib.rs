// In-process event bus: named channels, each drained by its own dispatch task.
// Sends are synchronous and never await, so any callback context can publish;
// per-channel FIFO ordering comes from the queue the dispatch task drains.
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;
use weft_common::{Request, Response};

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel stopped: {0}")]
    ChannelStopped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Request,
    Response,
    Error,
}

/// Payload carried by a bus message.
///
/// The bus is payload-agnostic: producers hand over whichever shape they
/// have, and consumers dispatch over the variants instead of reflecting on
/// an opaque value.
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Bytes(Bytes),
    Request(Request),
    Response(Response),
    Value(Value),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<Request> for Payload {
    fn from(request: Request) -> Self {
        Payload::Request(request)
    }
}

impl From<Response> for Payload {
    fn from(response: Response) -> Self {
        Payload::Response(response)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

/// Message flowing through a bus channel.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Option<Uuid>,
    pub direction: MessageDirection,
    pub payload: Payload,
    // Correlation target for request/response pairing; carried through untouched.
    pub destination_id: Option<Uuid>,
    // Error text; set only on `Error`-direction messages.
    pub error: Option<String>,
}

type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenMode {
    // Response and error traffic.
    Responses,
    // Request traffic only.
    Requests,
}

#[derive(Clone)]
struct HandlerEntry {
    id: Uuid,
    mode: ListenMode,
    on_message: MessageCallback,
    on_error: ErrorCallback,
}

/// Named pub/sub channel backed by one dispatch task.
pub struct Channel {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
    handlers: Arc<Mutex<Vec<HandlerEntry>>>,
    closed: AtomicBool,
    dispatch: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Channel {
    // Must be called from within a tokio runtime; the dispatch task is
    // spawned here and lives until the channel is stopped.
    fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let handlers: Arc<Mutex<Vec<HandlerEntry>>> = Arc::default();
        let task = tokio::spawn(run_dispatch(name.clone(), rx, Arc::clone(&handlers)));
        Arc::new(Self {
            name,
            tx,
            handlers,
            closed: AtomicBool::new(false),
            dispatch: Mutex::new(Some(task)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ChannelStopped(self.name.clone()));
        }
        self.tx
            .send(message)
            .map_err(|_| BusError::ChannelStopped(self.name.clone()))?;
        metrics::counter!("weft_bus_messages_total").increment(1);
        Ok(())
    }

    /// Number of listeners currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().expect("handler lock").len()
    }

    fn register(&self, entry: HandlerEntry) {
        let mut handlers = self.handlers.lock().expect("handler lock");
        // Re-handling an existing stream replaces its callbacks.
        handlers.retain(|existing| existing.id != entry.id);
        handlers.push(entry);
    }

    fn unregister(&self, id: Uuid) {
        let mut handlers = self.handlers.lock().expect("handler lock");
        handlers.retain(|existing| existing.id != id);
    }

    fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.dispatch.lock().expect("dispatch lock").take() {
            task.abort();
        }
        self.handlers.lock().expect("handler lock").clear();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

async fn run_dispatch(
    name: String,
    mut rx: mpsc::UnboundedReceiver<Message>,
    handlers: Arc<Mutex<Vec<HandlerEntry>>>,
) {
    while let Some(message) = rx.recv().await {
        // Snapshot under the lock, invoke outside it: callbacks may take
        // their own locks or publish back onto the bus.
        let snapshot: Vec<HandlerEntry> = handlers.lock().expect("handler lock").clone();
        for entry in &snapshot {
            match (message.direction, entry.mode) {
                (MessageDirection::Request, ListenMode::Requests)
                | (MessageDirection::Response, ListenMode::Responses) => {
                    (entry.on_message)(&message);
                }
                (MessageDirection::Error, ListenMode::Responses) => {
                    if let Some(error) = &message.error {
                        (entry.on_error)(error);
                    }
                }
                _ => {}
            }
        }
    }
    tracing::debug!(channel = %name, "dispatch task stopped");
}

/// Listener handle scoped to one channel.
///
/// The handle is exclusively owned by whoever attached it; dropping it (or
/// calling [`ListenStream::close`]) detaches the callbacks and no further
/// deliveries occur.
pub struct ListenStream {
    id: Uuid,
    mode: ListenMode,
    channel: Arc<Channel>,
    active: AtomicBool,
}

impl ListenStream {
    fn new(channel: Arc<Channel>, mode: ListenMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            channel,
            active: AtomicBool::new(true),
        }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Install the delivery callbacks. Nothing is delivered until this is
    /// called; calling it again replaces the previous callbacks. A closed
    /// stream cannot be re-armed.
    pub fn handle(
        &self,
        on_message: impl Fn(&Message) + Send + Sync + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        self.channel.register(HandlerEntry {
            id: self.id,
            mode: self.mode,
            on_message: Arc::new(on_message),
            on_error: Arc::new(on_error),
        });
    }

    /// Detach from the channel. Idempotent.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.channel.unregister(self.id);
        }
    }
}

impl Drop for ListenStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ListenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenStream")
            .field("id", &self.id)
            .field("channel", &self.channel.name)
            .finish()
    }
}

/// Registry of live channels.
#[derive(Debug, Default)]
pub struct ChannelManager {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel if absent; existing channels are returned as-is.
    pub fn create_channel(&self, name: &str) -> Arc<Channel> {
        let entry = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name));
        Arc::clone(entry.value())
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Stop dispatch and drop the channel. Sends through retained handles
    /// fail with `ChannelStopped` afterwards.
    pub fn destroy_channel(&self, name: &str) -> bool {
        match self.channels.remove(name) {
            Some((_, channel)) => {
                channel.stop();
                true
            }
            None => false,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// In-process event bus facade.
///
/// ```
/// use weft_bus::EventBus;
///
/// let bus = EventBus::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     bus.channel_manager().create_channel("orders");
///     bus.send_response_message("orders", "fill", None).expect("send");
/// });
/// ```
#[derive(Debug, Default)]
pub struct EventBus {
    manager: Arc<ChannelManager>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    /// Listener for response and error traffic on `channel`.
    pub fn listen_stream(&self, channel: &str) -> Result<ListenStream> {
        let channel = self.lookup(channel)?;
        Ok(ListenStream::new(channel, ListenMode::Responses))
    }

    /// Listener for request traffic on `channel`.
    pub fn listen_request_stream(&self, channel: &str) -> Result<ListenStream> {
        let channel = self.lookup(channel)?;
        Ok(ListenStream::new(channel, ListenMode::Requests))
    }

    pub fn send_request_message(
        &self,
        channel: &str,
        payload: impl Into<Payload>,
        destination_id: Option<Uuid>,
    ) -> Result<()> {
        self.send(
            channel,
            Message {
                id: Some(Uuid::new_v4()),
                direction: MessageDirection::Request,
                payload: payload.into(),
                destination_id,
                error: None,
            },
        )
    }

    pub fn send_response_message(
        &self,
        channel: &str,
        payload: impl Into<Payload>,
        destination_id: Option<Uuid>,
    ) -> Result<()> {
        self.send(
            channel,
            Message {
                id: Some(Uuid::new_v4()),
                direction: MessageDirection::Response,
                payload: payload.into(),
                destination_id,
                error: None,
            },
        )
    }

    pub fn send_error_message(
        &self,
        channel: &str,
        error: impl Into<String>,
        destination_id: Option<Uuid>,
    ) -> Result<()> {
        self.send(
            channel,
            Message {
                id: Some(Uuid::new_v4()),
                direction: MessageDirection::Error,
                payload: Payload::Value(Value::Null),
                destination_id,
                error: Some(error.into()),
            },
        )
    }

    fn lookup(&self, channel: &str) -> Result<Arc<Channel>> {
        self.manager
            .get_channel(channel)
            .ok_or_else(|| BusError::ChannelNotFound(channel.to_string()))
    }

    fn send(&self, channel: &str, message: Message) -> Result<()> {
        self.lookup(channel)?.send(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    // Collect callback deliveries through an unbounded channel so tests can
    // await them without polling.
    fn collector<T: Send + 'static>() -> (
        mpsc::UnboundedSender<T>,
        mpsc::UnboundedReceiver<T>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(WAIT, rx.recv())
            .await
            .expect("delivery timeout")
            .expect("collector closed")
    }

    #[tokio::test]
    async fn responses_reach_listener_in_order() {
        let bus = EventBus::new();
        bus.channel_manager().create_channel("orders");
        let listener = bus.listen_stream("orders").expect("listen");

        let (tx, mut rx) = collector();
        listener.handle(
            move |message| {
                if let Payload::Text(text) = &message.payload {
                    tx.send(text.clone()).expect("collect");
                }
            },
            |_| {},
        );

        bus.send_response_message("orders", "one", None).expect("send");
        bus.send_response_message("orders", "two", None).expect("send");

        assert_eq!(recv(&mut rx).await, "one");
        assert_eq!(recv(&mut rx).await, "two");
    }

    #[tokio::test]
    async fn errors_route_to_error_callback() {
        let bus = EventBus::new();
        bus.channel_manager().create_channel("orders");
        let listener = bus.listen_stream("orders").expect("listen");

        let (msg_tx, mut msg_rx) = collector::<String>();
        let (err_tx, mut err_rx) = collector::<String>();
        listener.handle(
            move |message| {
                if let Payload::Text(text) = &message.payload {
                    msg_tx.send(text.clone()).expect("collect");
                }
            },
            move |error| {
                err_tx.send(error.to_string()).expect("collect");
            },
        );

        bus.send_error_message("orders", "bad fill", None).expect("send");
        bus.send_response_message("orders", "ok", None).expect("send");

        assert_eq!(recv(&mut err_rx).await, "bad fill");
        assert_eq!(recv(&mut msg_rx).await, "ok");
    }

    #[tokio::test]
    async fn request_stream_only_sees_requests() {
        let bus = EventBus::new();
        bus.channel_manager().create_channel("orders");
        let listener = bus.listen_request_stream("orders").expect("listen");

        let (tx, mut rx) = collector();
        listener.handle(
            move |message| {
                tx.send(message.clone()).expect("collect");
            },
            |_| panic!("request stream must not see errors"),
        );

        bus.send_response_message("orders", "ignored", None).expect("send");
        let request = Request {
            request: Some("reserve".into()),
            ..Request::default()
        };
        bus.send_request_message("orders", request, None).expect("send");

        let received = recv(&mut rx).await;
        assert_eq!(received.direction, MessageDirection::Request);
        match received.payload {
            Payload::Request(request) => assert_eq!(request.request.as_deref(), Some("reserve")),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_listener_receives_nothing() {
        let bus = EventBus::new();
        bus.channel_manager().create_channel("orders");
        let channel = bus.channel_manager().get_channel("orders").expect("channel");
        let listener = bus.listen_stream("orders").expect("listen");

        let (tx, mut rx) = collector::<String>();
        listener.handle(
            move |_| {
                tx.send("delivered".into()).expect("collect");
            },
            |_| {},
        );
        assert_eq!(channel.subscriber_count(), 1);

        listener.close();
        listener.close();
        assert_eq!(channel.subscriber_count(), 0);

        bus.send_response_message("orders", "late", None).expect("send");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_listener_detaches_it() {
        let bus = EventBus::new();
        bus.channel_manager().create_channel("orders");
        let channel = bus.channel_manager().get_channel("orders").expect("channel");

        let listener = bus.listen_stream("orders").expect("listen");
        listener.handle(|_| {}, |_| {});
        assert_eq!(channel.subscriber_count(), 1);
        drop(listener);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn create_channel_is_idempotent() {
        let bus = EventBus::new();
        let first = bus.channel_manager().create_channel("orders");
        let second = bus.channel_manager().create_channel("orders");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bus.channel_manager().channel_count(), 1);
    }

    #[tokio::test]
    async fn sends_to_missing_channel_fail() {
        let bus = EventBus::new();
        let err = bus
            .send_response_message("missing", "payload", None)
            .expect_err("missing channel");
        assert!(matches!(err, BusError::ChannelNotFound(name) if name == "missing"));
        assert!(bus.listen_stream("missing").is_err());
    }

    #[tokio::test]
    async fn destroyed_channel_rejects_sends() {
        let bus = EventBus::new();
        let channel = bus.channel_manager().create_channel("orders");
        assert!(bus.channel_manager().destroy_channel("orders"));
        assert!(!bus.channel_manager().destroy_channel("orders"));

        let err = channel
            .send(Message {
                id: None,
                direction: MessageDirection::Response,
                payload: Payload::Text("late".into()),
                destination_id: None,
                error: None,
            })
            .expect_err("stopped channel");
        assert!(matches!(err, BusError::ChannelStopped(_)));
        assert!(!bus.channel_manager().has_channel("orders"));
    }
}
