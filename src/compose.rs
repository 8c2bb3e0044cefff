//! Stream composition.
//!
//! Combinators here operate on raw stream events, so composed elements are
//! forwarded without decoding or re-encoding.

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::MsgPackCodec;
use crate::session::{StreamEvent, Subscription};

/// Forward `primary` until `trigger` produces its first element, then
/// terminate normally.
///
/// The composed stream completes when whichever of these happens first:
/// `primary` terminates (its terminal is forwarded as-is), or `trigger`
/// produces an element (the composed stream completes normally and both
/// inputs are cancelled upstream). When both are ready at once the trigger
/// wins and the primary element is not delivered.
///
/// A `trigger` that terminates without ever producing an element stops
/// influencing the composition; `primary` keeps flowing.
///
/// Cancelling or dropping the composed stream cancels both inputs.
pub fn race_cancel<T, U>(
    mut primary: Subscription<T>,
    mut trigger: Subscription<U>,
) -> Subscription<T>
where
    T: Send + 'static,
    U: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let watch = cancel.clone();

    tokio::spawn(async move {
        let mut trigger_live = true;
        loop {
            tokio::select! {
                // Trigger polled first so it wins ties against the primary.
                biased;
                _ = watch.cancelled() => {
                    // Dropping both subscriptions cancels their producers.
                    return;
                }
                event = trigger.recv_event(), if trigger_live => match event {
                    Some(StreamEvent::Next(_)) => {
                        let _ = tx.send(StreamEvent::Complete);
                        return;
                    }
                    Some(StreamEvent::Error(e)) => {
                        tracing::debug!("cancellation trigger failed: {}", e);
                        trigger_live = false;
                    }
                    Some(StreamEvent::Complete) | None => {
                        trigger_live = false;
                    }
                },
                event = primary.recv_event() => match event {
                    Some(StreamEvent::Next(bytes)) => {
                        if tx.send(StreamEvent::Next(bytes)).is_err() {
                            return;
                        }
                    }
                    Some(terminal @ StreamEvent::Error(_)) => {
                        let _ = tx.send(terminal);
                        return;
                    }
                    Some(StreamEvent::Complete) | None => {
                        let _ = tx.send(StreamEvent::Complete);
                        return;
                    }
                },
            }
        }
    });

    Subscription::from_parts(rx, cancel)
}

/// Keep only the elements matching `predicate`.
///
/// Elements are decoded for the predicate but forwarded as their original
/// bytes. An undecodable element terminates the filtered stream with the
/// decode error. Cancelling or dropping the filtered stream cancels the
/// source.
pub fn filter<T, F>(mut source: Subscription<T>, predicate: F) -> Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let watch = cancel.clone();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = watch.cancelled() => return,
                event = source.recv_event() => event,
            };

            match event {
                Some(StreamEvent::Next(bytes)) => match MsgPackCodec::decode::<T>(&bytes) {
                    Ok(value) if predicate(&value) => {
                        if tx.send(StreamEvent::Next(bytes)).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e));
                        return;
                    }
                },
                Some(terminal @ StreamEvent::Error(_)) => {
                    let _ = tx.send(terminal);
                    return;
                }
                Some(StreamEvent::Complete) | None => {
                    let _ = tx.send(StreamEvent::Complete);
                    return;
                }
            }
        }
    });

    Subscription::from_parts(rx, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerwireError;

    #[tokio::test]
    async fn test_forwards_primary_until_trigger_fires() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (trigger_tx, trigger) = Subscription::<bool>::channel();

        let mut composed = race_cancel(primary, trigger);

        primary_tx.send(&1).unwrap();
        primary_tx.send(&2).unwrap();
        assert_eq!(composed.recv().await.unwrap().unwrap(), 1);
        assert_eq!(composed.recv().await.unwrap().unwrap(), 2);

        trigger_tx.send(&true).unwrap();
        assert!(composed.recv().await.is_none());

        // Both producers observe the upstream cancellation.
        primary_tx.cancelled().await;
        trigger_tx.cancelled().await;
    }

    #[tokio::test]
    async fn test_trigger_wins_tie() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (trigger_tx, trigger) = Subscription::<bool>::channel();

        // Both inputs have an event queued before the composition runs.
        primary_tx.send(&99).unwrap();
        trigger_tx.send(&true).unwrap();

        let mut composed = race_cancel(primary, trigger);

        // The queued primary element is discarded.
        assert!(composed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_primary_completion_forwarded() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (_trigger_tx, trigger) = Subscription::<bool>::channel();

        let mut composed = race_cancel(primary, trigger);

        primary_tx.send(&5).unwrap();
        primary_tx.complete();

        assert_eq!(composed.recv().await.unwrap().unwrap(), 5);
        assert!(composed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_primary_error_forwarded() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (_trigger_tx, trigger) = Subscription::<bool>::channel();

        let mut composed = race_cancel(primary, trigger);
        primary_tx.fail(PeerwireError::Remote("boom".to_string()));

        assert!(matches!(
            composed.recv().await,
            Some(Err(PeerwireError::Remote(_)))
        ));
        assert!(composed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_trigger_termination_without_element_keeps_primary() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (trigger_tx, trigger) = Subscription::<bool>::channel();

        let mut composed = race_cancel(primary, trigger);

        trigger_tx.complete();
        primary_tx.send(&1).unwrap();
        assert_eq!(composed.recv().await.unwrap().unwrap(), 1);

        primary_tx.send(&2).unwrap();
        assert_eq!(composed.recv().await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_filter_drops_nonmatching_elements() {
        let (tx, source) = Subscription::<u32>::channel();
        let mut filtered = filter(source, |n: &u32| n % 2 == 0);

        for i in 0..6u32 {
            tx.send(&i).unwrap();
        }
        tx.complete();

        assert_eq!(filtered.recv().await.unwrap().unwrap(), 0);
        assert_eq!(filtered.recv().await.unwrap().unwrap(), 2);
        assert_eq!(filtered.recv().await.unwrap().unwrap(), 4);
        assert!(filtered.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_filter_cancellation_reaches_source() {
        let (tx, source) = Subscription::<u32>::channel();
        let filtered = filter(source, |_: &u32| true);

        drop(filtered);
        tx.cancelled().await;
    }

    #[tokio::test]
    async fn test_filtered_stream_as_cancellation_trigger() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (trigger_tx, trigger) = Subscription::<bool>::channel();

        // Only a `false` element fires the trigger.
        let mut composed = race_cancel(primary, filter(trigger, |alive: &bool| !alive));

        primary_tx.send(&1).unwrap();
        trigger_tx.send(&true).unwrap();
        assert_eq!(composed.recv().await.unwrap().unwrap(), 1);

        primary_tx.send(&2).unwrap();
        assert_eq!(composed.recv().await.unwrap().unwrap(), 2);

        trigger_tx.send(&false).unwrap();
        assert!(composed.recv().await.is_none());
        primary_tx.cancelled().await;
    }

    #[tokio::test]
    async fn test_dropping_composed_cancels_inputs() {
        let (primary_tx, primary) = Subscription::<u32>::channel();
        let (trigger_tx, trigger) = Subscription::<bool>::channel();

        let composed = race_cancel(primary, trigger);
        drop(composed);

        primary_tx.cancelled().await;
        trigger_tx.cancelled().await;
    }
}
