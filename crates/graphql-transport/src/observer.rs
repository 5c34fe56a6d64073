//! The three-callback observer contract and operation cancellation.
//!
//! Every entry point reports through an [`Observer`]: any number of
//! `on_next` calls followed by exactly one of `on_error` or `on_complete`.
//! Entry points return an [`OperationHandle`] whose `cancel` is the only
//! way to stop an operation; cancelling is reported as completion.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Receives the results of one operation.
pub trait Observer: Send + 'static {
    /// Called once per delivered message, in arrival order.
    fn on_next(&mut self, value: Value);

    /// Called at most once when the operation fails. Nothing follows it.
    fn on_error(&mut self, error: TransportError);

    /// Called at most once when the operation ends normally or is cancelled.
    fn on_complete(&mut self);
}

/// An [`Observer`] built from three closures.
///
/// # Example
///
/// ```ignore
/// let observer = Callbacks::new(
///     |value| println!("next: {value}"),
///     |error| eprintln!("error: {error}"),
///     || println!("done"),
/// );
/// ```
pub struct Callbacks<N, E, C> {
    on_next: N,
    on_error: E,
    on_complete: C,
}

impl<N, E, C> Callbacks<N, E, C>
where
    N: FnMut(Value) + Send + 'static,
    E: FnMut(TransportError) + Send + 'static,
    C: FnMut() + Send + 'static,
{
    /// Create an observer from `on_next`, `on_error` and `on_complete`.
    pub fn new(on_next: N, on_error: E, on_complete: C) -> Self {
        Self {
            on_next,
            on_error,
            on_complete,
        }
    }
}

impl<N, E, C> Observer for Callbacks<N, E, C>
where
    N: FnMut(Value) + Send + 'static,
    E: FnMut(TransportError) + Send + 'static,
    C: FnMut() + Send + 'static,
{
    fn on_next(&mut self, value: Value) {
        (self.on_next)(value);
    }

    fn on_error(&mut self, error: TransportError) {
        (self.on_error)(error);
    }

    fn on_complete(&mut self) {
        (self.on_complete)();
    }
}

impl<N, E, C> std::fmt::Debug for Callbacks<N, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// One observer notification, for consumers that prefer a channel.
#[derive(Debug, Clone)]
pub enum OperationEvent {
    /// A delivered message.
    Next(Value),
    /// The operation failed.
    Error(TransportError),
    /// The operation completed or was cancelled.
    Complete,
}

impl OperationEvent {
    /// Check if this event ends the operation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next(_))
    }
}

/// Forwards notifications into a channel. A dropped receiver is ignored.
impl Observer for mpsc::UnboundedSender<OperationEvent> {
    fn on_next(&mut self, value: Value) {
        let _ = self.send(OperationEvent::Next(value));
    }

    fn on_error(&mut self, error: TransportError) {
        let _ = self.send(OperationEvent::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.send(OperationEvent::Complete);
    }
}

/// Wraps an observer so the terminal callback fires once and nothing follows it.
pub(crate) struct Delivery {
    observer: Option<Box<dyn Observer>>,
}

impl Delivery {
    pub(crate) fn new(observer: impl Observer) -> Self {
        Self {
            observer: Some(Box::new(observer)),
        }
    }

    pub(crate) fn next(&mut self, value: Value) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_next(value);
        }
    }

    pub(crate) fn error(&mut self, error: TransportError) {
        if let Some(mut observer) = self.observer.take() {
            observer.on_error(error);
        }
    }

    pub(crate) fn complete(&mut self) {
        if let Some(mut observer) = self.observer.take() {
            observer.on_complete();
        }
    }

    /// Report `Ok` as completion and `Err` as failure.
    pub(crate) fn finish(&mut self, outcome: crate::Result<()>) {
        match outcome {
            Ok(()) => self.complete(),
            Err(error) => self.error(error),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.observer.is_none()
    }
}

/// Unique identifier for an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// A handle to an in-flight operation that can be cancelled.
///
/// Cancelling is idempotent and safe after the operation has already
/// finished. The same token follows the operation across a handoff, so a
/// cancel issued at any point reaches whichever component is running.
#[derive(Clone, Debug)]
pub struct OperationHandle {
    /// The unique ID of this operation.
    pub id: OperationId,
    token: CancellationToken,
}

impl OperationHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: OperationId::next(),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the operation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cancellation as a zero-argument function.
    pub fn canceller(&self) -> impl Fn() + Send + Sync + 'static {
        let token = self.token.clone();
        move || token.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use parking_lot::Mutex;

    fn recording() -> (Arc<Mutex<Vec<String>>>, impl Observer) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let observer = Callbacks::new(
            move |v: Value| a.lock().push(format!("next {v}")),
            move |e: TransportError| b.lock().push(format!("error {e}")),
            move || c.lock().push("complete".to_string()),
        );
        (log, observer)
    }

    #[test]
    fn test_delivery_single_terminal() {
        let (log, observer) = recording();
        let mut delivery = Delivery::new(observer);

        delivery.next(json!(1));
        delivery.complete();
        delivery.error(TransportError::Timeout);
        delivery.next(json!(2));
        delivery.complete();

        assert!(delivery.is_finished());
        assert_eq!(*log.lock(), vec!["next 1".to_string(), "complete".to_string()]);
    }

    #[test]
    fn test_delivery_error_then_nothing() {
        let (log, observer) = recording();
        let mut delivery = Delivery::new(observer);

        delivery.finish(Err(TransportError::MissingLocation));
        delivery.finish(Ok(()));

        assert_eq!(log.lock().len(), 1);
        assert!(log.lock()[0].starts_with("error"));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let handle = OperationHandle::new();
        let cancel = handle.canceller();
        assert!(!handle.is_cancelled());
        cancel();
        cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let a = OperationHandle::new();
        let b = OperationHandle::new();
        assert_ne!(a.id, b.id);
    }
}
