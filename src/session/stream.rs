//! Typed stream subscriptions.
//!
//! A [`Subscription`] is the consumer end of one logical stream: elements
//! arrive in production order and end with exactly one terminal (normal
//! completion or error). Dropping a subscription cancels the producer: for
//! remote streams that sends a `Cancel` frame upstream, for in-memory
//! streams it trips the producer's cancellation token.
//!
//! [`Subscription::channel`] builds an in-memory producer/subscription pair
//! with the same semantics, so services and combinators are testable without
//! a transport.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::MsgPackCodec;
use crate::error::{PeerwireError, Result};

/// One event on a stream's internal channel. Elements stay as raw payload
/// bytes until the consumer pulls them, so combinators forward without
/// re-encoding.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// One element.
    Next(Bytes),
    /// Normal terminal.
    Complete,
    /// Error terminal.
    Error(PeerwireError),
}

/// Consumer end of one logical stream of `T` values.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub(crate) fn from_parts(
        rx: mpsc::UnboundedReceiver<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            cancel,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Create an in-memory producer/subscription pair.
    pub fn channel() -> (StreamProducer<T>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let producer = StreamProducer {
            tx,
            cancel: cancel.clone(),
            _marker: PhantomData,
        };
        (producer, Self::from_parts(rx, cancel))
    }

    /// Cancel the stream without waiting for a terminal.
    ///
    /// Idempotent; also triggered by drop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receive the next raw event, without decoding.
    ///
    /// `None` means the stream is over (terminal already seen, or producer
    /// gone). At most one terminal event is ever returned.
    pub(crate) async fn recv_event(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamEvent::Next(bytes)) => Some(StreamEvent::Next(bytes)),
            Some(terminal) => {
                self.done = true;
                Some(terminal)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Receive the next element.
    ///
    /// Returns `None` once the stream has terminated normally (bounded
    /// completion, producer gone, or upstream cancellation observed as
    /// completion). A terminal error is returned once as `Some(Err(..))`,
    /// after which `recv` returns `None`.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        match self.recv_event().await? {
            StreamEvent::Next(bytes) => match MsgPackCodec::decode(&bytes) {
                Ok(value) => Some(Ok(value)),
                Err(e) => {
                    // Undecodable element: terminal for this consumer, and the
                    // producer is cancelled so it stops ticking.
                    self.done = true;
                    self.cancel.cancel();
                    Some(Err(e))
                }
            },
            StreamEvent::Complete => None,
            StreamEvent::Error(e) => Some(Err(e)),
        }
    }

    /// Drain the stream to completion, collecting every element.
    ///
    /// Stops at the first error.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Producer end of an in-memory stream.
///
/// Mirrors the wire contract: send elements, then exactly one terminal.
/// Sending fails once the consumer has cancelled or dropped the
/// subscription.
pub struct StreamProducer<T> {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> StreamProducer<T> {
    /// Send one element.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` once the consumer is gone or has cancelled.
    pub fn send(&self, item: &T) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PeerwireError::ConnectionClosed);
        }
        let bytes = MsgPackCodec::encode(item)?;
        self.tx
            .send(StreamEvent::Next(Bytes::from(bytes)))
            .map_err(|_| PeerwireError::ConnectionClosed)
    }
}

impl<T> StreamProducer<T> {
    /// Terminate the stream normally.
    pub fn complete(self) {
        let _ = self.tx.send(StreamEvent::Complete);
    }

    /// Terminate the stream with an error.
    pub fn fail(self, err: PeerwireError) {
        let _ = self.tx.send(StreamEvent::Error(err));
    }

    /// Whether the consumer has cancelled the stream.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspend until the consumer cancels.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elements_then_complete() {
        let (producer, mut sub) = Subscription::<u32>::channel();

        producer.send(&1).unwrap();
        producer.send(&2).unwrap();
        producer.complete();

        assert_eq!(sub.recv().await.unwrap().unwrap(), 1);
        assert_eq!(sub.recv().await.unwrap().unwrap(), 2);
        assert!(sub.recv().await.is_none());
        // Terminal is sticky.
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_error_terminal_returned_once() {
        let (producer, mut sub) = Subscription::<u32>::channel();

        producer.send(&7).unwrap();
        producer.fail(PeerwireError::Remote("boom".to_string()));

        assert_eq!(sub.recv().await.unwrap().unwrap(), 7);
        assert!(matches!(
            sub.recv().await,
            Some(Err(PeerwireError::Remote(_)))
        ));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_drop_completes_stream() {
        let (producer, mut sub) = Subscription::<u32>::channel();
        producer.send(&1).unwrap();
        drop(producer);

        assert_eq!(sub.recv().await.unwrap().unwrap(), 1);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_observed_by_producer() {
        let (producer, sub) = Subscription::<u32>::channel();

        assert!(!producer.is_cancelled());
        sub.cancel();
        assert!(producer.is_cancelled());
        assert!(matches!(
            producer.send(&1),
            Err(PeerwireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_drop_cancels_producer() {
        let (producer, sub) = Subscription::<u32>::channel();
        drop(sub);

        producer.cancelled().await;
        assert!(producer.is_cancelled());
    }

    #[tokio::test]
    async fn test_collect() {
        let (producer, sub) = Subscription::<u32>::channel();
        for i in 0..5 {
            producer.send(&i).unwrap();
        }
        producer.complete();

        assert_eq!(sub.collect().await.unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
