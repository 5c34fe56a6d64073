//! Delivery of a long-lived response body to a single observer.
//!
//! One connection carries exactly one logical stream. Each decoded frame is
//! passed to `on_next`; the end of the body completes the operation, and a
//! cancelled operation also completes rather than failing.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::decoder::decode_frames;
use crate::error::Result;
use crate::observer::{Delivery, Observer, OperationHandle};

/// Route a newline-delimited JSON body to `observer` on a new task.
///
/// Dropping the body when the returned handle is cancelled aborts the
/// underlying connection.
///
/// # Example
///
/// ```ignore
/// let response = client.post(url).text(body).send().await?;
/// let handle = route_stream(response.into_body(), Callbacks::new(
///     |frame| println!("{frame}"),
///     |error| eprintln!("{error}"),
///     || println!("done"),
/// ));
/// // later
/// handle.cancel();
/// ```
pub fn route_stream<S>(body: S, observer: impl Observer) -> OperationHandle
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let handle = OperationHandle::new();
    let cancel = handle.token();
    let id = handle.id;
    tokio::spawn(async move {
        let mut delivery = Delivery::new(observer);
        tracing::debug!(target: "graphql_transport::stream", %id, "routing streamed body");
        route_frames(decode_frames(body), cancel, &mut delivery).await;
    });
    handle
}

/// Drive decoded frames into `delivery` until the stream ends, fails, or
/// `cancel` fires. Exactly one terminal callback is made.
pub(crate) async fn route_frames<S>(frames: S, cancel: CancellationToken, delivery: &mut Delivery)
where
    S: Stream<Item = Result<Value>>,
{
    let mut frames = std::pin::pin!(frames);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(target: "graphql_transport::stream", "stream cancelled");
                delivery.complete();
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(value)) => delivery.next(value),
                Some(Err(error)) => {
                    tracing::debug!(target: "graphql_transport::stream", %error, "stream failed");
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
}
