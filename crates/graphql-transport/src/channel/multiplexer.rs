//! Many subscriptions over one socket.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::message::{ClientMessage, ServerMessage};
use super::socket::{self, ChannelConfig, SocketEvent};
use crate::error::{Result, TransportError};
use crate::graphql::{GraphQLResponse, Operation};

const TARGET: &str = "graphql_transport::channel";

/// Lifecycle of a channel. Moves forward only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// The socket is opening, or `connection_init` has been sent.
    #[default]
    Connecting,
    /// The server sent `connection_ack`; subscriptions may start.
    Acknowledged,
    /// The socket is gone. Nothing is processed any more.
    Closed,
}

/// Channel-level notifications.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The server acknowledged the session. Delivered at most once.
    Acknowledged(Subscriber),
    /// The server sent `connection_error`. The channel stays open.
    Error(TransportError),
    /// The channel closed, with an error unless the close was clean.
    /// Delivered exactly once and last.
    Closed(Option<TransportError>),
}

/// Notifications for one subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionMessage {
    /// A result. Partial results carry their `errors` alongside `data`.
    Data(GraphQLResponse),
    /// The server reported an error for this subscription. The subscription
    /// stays registered until `complete` or an unsubscribe.
    Error(TransportError),
    /// The server completed the subscription, or the channel closed cleanly.
    Complete,
    /// The channel closed abnormally.
    Disconnected(TransportError),
}

impl SubscriptionMessage {
    /// Check if nothing follows this message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Disconnected(_))
    }

    fn closed(error: &Option<TransportError>) -> Self {
        match error {
            None => Self::Complete,
            Some(error) => Self::Disconnected(error.clone()),
        }
    }
}

type ConnectionCallback = Box<dyn FnMut(ConnectionEvent) + Send>;
type SubscriptionCallback = Box<dyn FnMut(SubscriptionMessage) + Send>;

enum Command {
    Subscribe {
        id: String,
        operation: Operation,
        callback: SubscriptionCallback,
    },
    Unsubscribe {
        id: String,
    },
    Shutdown,
}

struct Shared {
    state: Mutex<ConnectionState>,
    next_id: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connecting),
            next_id: AtomicU64::new(1),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// A persistent channel multiplexing subscriptions over one socket.
///
/// The socket is owned by a single task that processes socket events and
/// caller commands in arrival order. Handles are cheap to clone. When every
/// handle (including [`Subscriber`]s and [`Unsubscribe`]s) is dropped the
/// channel shuts down.
///
/// # Example
///
/// ```ignore
/// use graphql_transport::channel::{ChannelConfig, ChannelMultiplexer, ConnectionEvent};
///
/// let config = ChannelConfig::new("ws://localhost:4000/graphql");
/// let channel = ChannelMultiplexer::connect(config, |event| match event {
///     ConnectionEvent::Acknowledged(subscriber) => {
///         let operation = Operation::subscription("subscription { ticks }");
///         let _ = subscriber.subscribe(operation, |message| println!("{message:?}"));
///     }
///     ConnectionEvent::Error(error) => eprintln!("connection error: {error}"),
///     ConnectionEvent::Closed(error) => println!("closed: {error:?}"),
/// });
///
/// // later
/// channel.shutdown();
/// ```
#[derive(Clone)]
pub struct ChannelMultiplexer {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl ChannelMultiplexer {
    /// Open a websocket to `config.url` and run the channel on it.
    ///
    /// Returns immediately. A failed handshake is reported as
    /// [`ConnectionEvent::Closed`] with the error.
    pub fn connect(
        config: ChannelConfig,
        on_connection: impl FnMut(ConnectionEvent) + Send + 'static,
    ) -> Self {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let weak = commands.downgrade();
        let task_shared = shared.clone();
        let mut on_connection: ConnectionCallback = Box::new(on_connection);

        tokio::spawn(async move {
            // Only a shutdown can be queued before the acknowledgement.
            let connected = tokio::select! {
                result = socket::connect(&config) => Some(result),
                _ = receiver.recv() => None,
            };

            match connected {
                Some(Ok((sink, events))) => {
                    let actor = Actor::new(sink, weak, task_shared, on_connection, config.init_payload);
                    actor.run(events, receiver).await;
                }
                Some(Err(error)) => {
                    tracing::debug!(target: TARGET, url = %config.url, %error, "handshake failed");
                    task_shared.set_state(ConnectionState::Closed);
                    on_connection(ConnectionEvent::Closed(Some(error)));
                }
                None => {
                    tracing::debug!(target: TARGET, url = %config.url, "shut down during handshake");
                    task_shared.set_state(ConnectionState::Closed);
                    on_connection(ConnectionEvent::Closed(None));
                }
            }
        });

        Self { commands, shared }
    }

    /// Run a channel over an already open socket.
    ///
    /// `events` must start with [`SocketEvent::Open`] once frames can be
    /// sent; `connection_init` is sent at that point.
    pub fn spawn<Si, St>(
        sink: Si,
        events: St,
        init_payload: Option<Value>,
        on_connection: impl FnMut(ConnectionEvent) + Send + 'static,
    ) -> Self
    where
        Si: Sink<String, Error = TransportError> + Send + Unpin + 'static,
        St: Stream<Item = SocketEvent> + Send + Unpin + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let actor = Actor::new(
            sink,
            commands.downgrade(),
            shared.clone(),
            Box::new(on_connection),
            init_payload,
        );
        tokio::spawn(actor.run(events, receiver));

        Self { commands, shared }
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// A subscriber, once the channel is acknowledged.
    pub fn subscriber(&self) -> Option<Subscriber> {
        (self.state() == ConnectionState::Acknowledged).then(|| Subscriber {
            commands: self.commands.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Send `connection_terminate` and close the socket.
    ///
    /// Remaining subscriptions are completed. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl std::fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("state", &self.state())
            .finish()
    }
}

/// Starts subscriptions on an acknowledged channel.
#[derive(Clone)]
pub struct Subscriber {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Subscriber {
    /// Start a subscription.
    ///
    /// Ids are allocated as `"1"`, `"2"`, ... and never reused on this
    /// channel. `callback` receives every message for the subscription;
    /// after a terminal message it is never called again.
    pub fn subscribe(
        &self,
        operation: Operation,
        callback: impl FnMut(SubscriptionMessage) + Send + 'static,
    ) -> Result<Unsubscribe> {
        if self.shared.state() == ConnectionState::Closed {
            return Err(TransportError::Connection("channel is closed".into()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        self.commands
            .send(Command::Subscribe {
                id: id.clone(),
                operation,
                callback: Box::new(callback),
            })
            .map_err(|_| TransportError::Connection("channel is closed".into()))?;

        Ok(Unsubscribe {
            id,
            commands: self.commands.clone(),
        })
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Stops one subscription.
#[derive(Clone)]
pub struct Unsubscribe {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Unsubscribe {
    /// The subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the subscription and send `stop`.
    ///
    /// `stop` is sent only while the subscription is registered, so a second
    /// call, or a call after the server's `complete` or after the channel
    /// closed, sends nothing and calls nothing.
    pub fn unsubscribe(&self) {
        let _ = self.commands.send(Command::Unsubscribe {
            id: self.id.clone(),
        });
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

struct SubscriptionHandle {
    callback: SubscriptionCallback,
}

/// Owns the socket and the subscription table.
struct Actor<Si> {
    sink: Si,
    commands: mpsc::WeakUnboundedSender<Command>,
    shared: Arc<Shared>,
    on_connection: ConnectionCallback,
    init_payload: Option<Value>,
    subscriptions: HashMap<String, SubscriptionHandle>,
}

impl<Si> Actor<Si>
where
    Si: Sink<String, Error = TransportError> + Unpin,
{
    fn new(
        sink: Si,
        commands: mpsc::WeakUnboundedSender<Command>,
        shared: Arc<Shared>,
        on_connection: ConnectionCallback,
        init_payload: Option<Value>,
    ) -> Self {
        Self {
            sink,
            commands,
            shared,
            on_connection,
            init_payload,
            subscriptions: HashMap::new(),
        }
    }

    async fn run<St>(mut self, mut events: St, mut commands: mpsc::UnboundedReceiver<Command>)
    where
        St: Stream<Item = SocketEvent> + Unpin,
    {
        let outcome = loop {
            let flow = tokio::select! {
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => ControlFlow::Break(Some(TransportError::ConnectionClosed {
                        code: socket::CloseCode::Abnormal.as_u16(),
                        reason: String::new(),
                    })),
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!(target: TARGET, "all handles dropped");
                        self.terminate().await;
                        ControlFlow::Break(None)
                    }
                },
            };
            if let ControlFlow::Break(outcome) = flow {
                break outcome;
            }
        };

        self.close(outcome, &mut commands);
    }

    async fn handle_event(&mut self, event: SocketEvent) -> ControlFlow<Option<TransportError>> {
        match event {
            SocketEvent::Open => {
                tracing::debug!(target: TARGET, "socket open, initializing");
                let payload = self.init_payload.take();
                self.send(ClientMessage::ConnectionInit { payload }).await
            }
            SocketEvent::Text(text) => self.handle_text(&text),
            SocketEvent::Closed { code, reason } => {
                tracing::debug!(target: TARGET, code = code.as_u16(), %reason, "socket closed by peer");
                if code.is_clean() {
                    ControlFlow::Break(None)
                } else {
                    ControlFlow::Break(Some(TransportError::ConnectionClosed {
                        code: code.as_u16(),
                        reason,
                    }))
                }
            }
            SocketEvent::Error(message) => {
                ControlFlow::Break(Some(TransportError::WebSocket(message)))
            }
        }
    }

    fn handle_text(&mut self, text: &str) -> ControlFlow<Option<TransportError>> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(target: TARGET, %error, "ignoring malformed message");
                return ControlFlow::Continue(());
            }
        };
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let message: ServerMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(target: TARGET, %kind, %error, "ignoring unrecognized message");
                return ControlFlow::Continue(());
            }
        };
        tracing::trace!(target: TARGET, %kind, "message received");

        match message {
            ServerMessage::ConnectionAck { .. } => self.acknowledge(),
            ServerMessage::ConnectionError { payload } => {
                let error = TransportError::remote(payload);
                tracing::warn!(target: TARGET, %error, "connection error");
                (self.on_connection)(ConnectionEvent::Error(error));
            }
            ServerMessage::KeepAlive => {}
            message => self.route(message),
        }
        ControlFlow::Continue(())
    }

    fn acknowledge(&mut self) {
        if self.shared.state() != ConnectionState::Connecting {
            tracing::debug!(target: TARGET, "ignoring repeated acknowledgement");
            return;
        }
        self.shared.set_state(ConnectionState::Acknowledged);
        tracing::debug!(target: TARGET, "connection acknowledged");

        if let Some(commands) = self.commands.upgrade() {
            let subscriber = Subscriber {
                commands,
                shared: self.shared.clone(),
            };
            (self.on_connection)(ConnectionEvent::Acknowledged(subscriber));
        }
    }

    fn route(&mut self, message: ServerMessage) {
        if self.shared.state() != ConnectionState::Acknowledged {
            tracing::debug!(target: TARGET, id = ?message.subscription_id(), "dropping message before acknowledgement");
            return;
        }

        match message {
            ServerMessage::Data { id, payload } => match self.subscriptions.get_mut(&id) {
                Some(handle) => (handle.callback)(SubscriptionMessage::Data(
                    GraphQLResponse::from_payload(payload),
                )),
                None => tracing::debug!(target: TARGET, %id, "data for unknown subscription"),
            },
            ServerMessage::Error { id, payload } => match self.subscriptions.get_mut(&id) {
                Some(handle) => {
                    (handle.callback)(SubscriptionMessage::Error(TransportError::remote(payload)))
                }
                None => tracing::debug!(target: TARGET, %id, "error for unknown subscription"),
            },
            ServerMessage::Complete { id } => match self.subscriptions.remove(&id) {
                Some(mut handle) => {
                    tracing::debug!(target: TARGET, %id, "subscription complete");
                    (handle.callback)(SubscriptionMessage::Complete);
                }
                None => tracing::debug!(target: TARGET, %id, "complete for unknown subscription"),
            },
            _ => {}
        }
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<Option<TransportError>> {
        match command {
            Command::Subscribe {
                id,
                operation,
                callback,
            } => {
                tracing::debug!(target: TARGET, %id, "starting subscription");
                self.subscriptions
                    .insert(id.clone(), SubscriptionHandle { callback });
                self.send(ClientMessage::Start {
                    id,
                    payload: operation,
                })
                .await
            }
            Command::Unsubscribe { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    tracing::debug!(target: TARGET, %id, "stopping subscription");
                    self.send(ClientMessage::Stop { id }).await
                } else {
                    ControlFlow::Continue(())
                }
            }
            Command::Shutdown => {
                tracing::debug!(target: TARGET, "shutting down");
                self.terminate().await;
                ControlFlow::Break(None)
            }
        }
    }

    async fn send(&mut self, message: ClientMessage) -> ControlFlow<Option<TransportError>> {
        let result = match message.to_text() {
            Ok(text) => self.sink.send(text).await,
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(error) => {
                tracing::debug!(target: TARGET, %error, "send failed");
                ControlFlow::Break(Some(error))
            }
        }
    }

    async fn terminate(&mut self) {
        let _ = self.send(ClientMessage::ConnectionTerminate).await;
        if let Err(error) = self.sink.close().await {
            tracing::debug!(target: TARGET, %error, "close failed");
        }
    }

    fn close(mut self, outcome: Option<TransportError>, commands: &mut mpsc::UnboundedReceiver<Command>) {
        commands.close();
        self.shared.set_state(ConnectionState::Closed);
        tracing::debug!(
            target: TARGET,
            error = ?outcome,
            subscriptions = self.subscriptions.len(),
            "channel closed"
        );

        (self.on_connection)(ConnectionEvent::Closed(outcome.clone()));

        for (_, mut handle) in self.subscriptions.drain() {
            (handle.callback)(SubscriptionMessage::closed(&outcome));
        }
        while let Ok(command) = commands.try_recv() {
            if let Command::Subscribe { mut callback, .. } = command {
                callback(SubscriptionMessage::closed(&outcome));
            }
        }
    }
}
