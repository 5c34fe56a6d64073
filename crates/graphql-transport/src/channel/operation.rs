//! One operation on a dedicated channel.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::multiplexer::{ChannelMultiplexer, ConnectionEvent, SubscriptionMessage, Unsubscribe};
use super::socket::ChannelConfig;
use crate::graphql::Operation;
use crate::observer::Delivery;

const TARGET: &str = "graphql_transport::channel";

enum Signal {
    Connection(ConnectionEvent),
    Message(SubscriptionMessage),
}

/// Open a channel for `operation` alone and report it to `delivery`.
pub(crate) async fn run_channel_operation(
    config: ChannelConfig,
    operation: Operation,
    cancel: CancellationToken,
    delivery: &mut Delivery,
) {
    let (signals, receiver) = mpsc::unbounded_channel();
    let connection_signals = signals.clone();
    let channel = ChannelMultiplexer::connect(config, move |event| {
        let _ = connection_signals.send(Signal::Connection(event));
    });
    drive(channel, signals, receiver, operation, cancel, delivery).await;
}

/// Subscribe on acknowledgement and map the subscription to the observer.
///
/// The channel is shut down when the operation ends for any reason.
async fn drive(
    channel: ChannelMultiplexer,
    signals: mpsc::UnboundedSender<Signal>,
    mut receiver: mpsc::UnboundedReceiver<Signal>,
    operation: Operation,
    cancel: CancellationToken,
    delivery: &mut Delivery,
) {
    let mut operation = Some(operation);
    let mut subscription: Option<Unsubscribe> = None;

    loop {
        let signal = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(target: TARGET, "operation cancelled");
                if let Some(subscription) = subscription.take() {
                    subscription.unsubscribe();
                }
                channel.shutdown();
                delivery.complete();
                return;
            }
            signal = receiver.recv() => signal,
        };

        match signal {
            Some(Signal::Connection(ConnectionEvent::Acknowledged(subscriber))) => {
                let Some(operation) = operation.take() else {
                    continue;
                };
                let messages = signals.clone();
                let started = subscriber.subscribe(operation, move |message| {
                    let _ = messages.send(Signal::Message(message));
                });
                match started {
                    Ok(unsubscribe) => subscription = Some(unsubscribe),
                    Err(error) => {
                        channel.shutdown();
                        delivery.error(error);
                        return;
                    }
                }
            }
            Some(Signal::Connection(ConnectionEvent::Error(error))) => {
                channel.shutdown();
                delivery.error(error);
                return;
            }
            Some(Signal::Connection(ConnectionEvent::Closed(error))) => {
                delivery.finish(error.map_or(Ok(()), Err));
                return;
            }
            Some(Signal::Message(SubscriptionMessage::Data(response))) => {
                match serde_json::to_value(&response) {
                    Ok(value) => delivery.next(value),
                    Err(error) => {
                        channel.shutdown();
                        delivery.error(error.into());
                        return;
                    }
                }
            }
            Some(Signal::Message(SubscriptionMessage::Error(error))) => {
                if let Some(subscription) = subscription.take() {
                    subscription.unsubscribe();
                }
                channel.shutdown();
                delivery.error(error);
                return;
            }
            Some(Signal::Message(SubscriptionMessage::Complete)) => {
                channel.shutdown();
                delivery.complete();
                return;
            }
            Some(Signal::Message(SubscriptionMessage::Disconnected(error))) => {
                delivery.error(error);
                return;
            }
            None => {
                delivery.complete();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SocketEvent;
    use crate::channel::socket::CloseCode;
    use crate::error::TransportError;
    use crate::observer::OperationEvent;
    use futures_util::{SinkExt, stream};
    use serde_json::{Value, json};
    use tokio_util::sync::PollSender;

    struct Harness {
        server_rx: mpsc::Receiver<String>,
        server_tx: mpsc::UnboundedSender<SocketEvent>,
        events: mpsc::UnboundedReceiver<OperationEvent>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn start(operation: Operation) -> Self {
            let (client_tx, server_rx) = mpsc::channel::<String>(16);
            let (server_tx, mut client_rx) = mpsc::unbounded_channel::<SocketEvent>();
            let sink = PollSender::new(client_tx)
                .sink_map_err(|e| TransportError::WebSocket(e.to_string()));
            let socket_events = stream::poll_fn(move |cx| client_rx.poll_recv(cx));

            let (signals, receiver) = mpsc::unbounded_channel();
            let connection_signals = signals.clone();
            let channel = ChannelMultiplexer::spawn(sink, socket_events, None, move |event| {
                let _ = connection_signals.send(Signal::Connection(event));
            });

            let (events_tx, events) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move {
                let mut delivery = Delivery::new(events_tx);
                drive(channel, signals, receiver, operation, token, &mut delivery).await;
            });

            Self {
                server_rx,
                server_tx,
                events,
                cancel,
            }
        }

        async fn next_sent(&mut self) -> Value {
            let text = self.server_rx.recv().await.unwrap();
            serde_json::from_str(&text).unwrap()
        }

        fn reply(&self, message: Value) {
            self.server_tx
                .send(SocketEvent::Text(message.to_string()))
                .unwrap();
        }

        async fn handshake(&mut self) -> Value {
            self.server_tx.send(SocketEvent::Open).unwrap();
            assert_eq!(self.next_sent().await["type"], "connection_init");
            self.reply(json!({"type": "connection_ack"}));
            let start = self.next_sent().await;
            assert_eq!(start["type"], "start");
            start
        }
    }

    #[tokio::test]
    async fn test_data_then_complete() {
        let mut harness = Harness::start(Operation::subscription("subscription { n }"));
        let start = harness.handshake().await;
        assert_eq!(start["id"], "1");
        assert_eq!(start["payload"]["query"], "subscription { n }");

        harness.reply(json!({"type": "data", "id": "1", "payload": {"data": {"n": 1}}}));
        harness.reply(json!({"type": "complete", "id": "1"}));

        assert!(matches!(
            harness.events.recv().await,
            Some(OperationEvent::Next(v)) if v == json!({"data": {"n": 1}})
        ));
        assert!(matches!(harness.events.recv().await, Some(OperationEvent::Complete)));
        assert_eq!(harness.next_sent().await["type"], "connection_terminate");
    }

    #[tokio::test]
    async fn test_cancel_stops_and_terminates() {
        let mut harness = Harness::start(Operation::subscription("subscription { n }"));
        harness.handshake().await;

        harness.cancel.cancel();
        harness.cancel.cancel();

        assert!(matches!(harness.events.recv().await, Some(OperationEvent::Complete)));
        assert_eq!(harness.next_sent().await, json!({"type": "stop", "id": "1"}));
        assert_eq!(
            harness.next_sent().await,
            json!({"type": "connection_terminate"})
        );
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_ack_completes_once() {
        let mut harness = Harness::start(Operation::subscription("subscription { n }"));
        harness.server_tx.send(SocketEvent::Open).unwrap();
        assert_eq!(harness.next_sent().await["type"], "connection_init");

        harness.cancel.cancel();

        assert!(matches!(harness.events.recv().await, Some(OperationEvent::Complete)));
        assert!(harness.events.recv().await.is_none());
        assert_eq!(
            harness.next_sent().await,
            json!({"type": "connection_terminate"})
        );
    }

    #[tokio::test]
    async fn test_abnormal_close_is_error() {
        let mut harness = Harness::start(Operation::subscription("subscription { n }"));
        harness.handshake().await;

        harness
            .server_tx
            .send(SocketEvent::Closed {
                code: CloseCode::from_u16(4500),
                reason: "boom".into(),
            })
            .unwrap();

        assert!(matches!(
            harness.events.recv().await,
            Some(OperationEvent::Error(TransportError::ConnectionClosed { code: 4500, .. }))
        ));
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscription_error_ends_operation() {
        let mut harness = Harness::start(Operation::subscription("subscription { n }"));
        harness.handshake().await;

        harness.reply(json!({"type": "error", "id": "1", "payload": {"message": "denied"}}));

        assert!(matches!(
            harness.events.recv().await,
            Some(OperationEvent::Error(TransportError::Remote { ref message, .. })) if message == "denied"
        ));
        assert_eq!(harness.next_sent().await["type"], "stop");
    }
}
