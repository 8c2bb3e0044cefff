//! Per-invocation context handed to route handlers.

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::Cardinality;
use crate::auth::Principal;
use crate::codec::MsgPackCodec;
use crate::error::{PeerwireError, Result};
use crate::protocol::{ErrorBody, FrameKind};
use crate::session::{Session, StreamEvent, Subscription};

enum Link {
    /// Live invocation; emissions go out as frames on the session.
    Session(Session),
    /// No session behind the context. Emissions are discarded.
    Detached,
}

/// Context for one inbound invocation.
///
/// Carries the invocation's stream id, the authenticated identity of the
/// requesting peer (when this side performed the handshake verification),
/// a handle back to the session for reverse invocations, and the
/// cancellation token that fires when the requester cancels the stream or
/// the session closes.
pub struct RequestContext {
    stream_id: u32,
    cardinality: Cardinality,
    cancel: CancellationToken,
    link: Link,
}

impl RequestContext {
    pub(crate) fn attached(
        stream_id: u32,
        cardinality: Cardinality,
        session: Session,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream_id,
            cardinality,
            cancel,
            link: Link::Session(session),
        }
    }

    /// Context with no session behind it, for exercising handlers directly.
    pub fn detached(stream_id: u32, cardinality: Cardinality) -> Self {
        Self {
            stream_id,
            cardinality,
            cancel: CancellationToken::new(),
            link: Link::Detached,
        }
    }

    /// Stream id of this invocation.
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Shape this invocation was made with.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Authenticated identity of the requesting peer, if this side verified
    /// its credentials during the handshake.
    pub fn principal(&self) -> Option<&Principal> {
        match &self.link {
            Link::Session(session) => session.principal(),
            Link::Detached => None,
        }
    }

    /// Handle to the session, for invoking routes back on the requester.
    pub fn requester(&self) -> Option<Session> {
        match &self.link {
            Link::Session(session) => Some(session.clone()),
            Link::Detached => None,
        }
    }

    /// Whether the requester has cancelled this invocation (or the session
    /// has closed).
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspend until the requester cancels or the session closes.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Send the single response of a ONE_TO_ONE invocation.
    pub async fn respond<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.cardinality != Cardinality::OneToOne {
            return Err(PeerwireError::Protocol(
                "respond on a streaming invocation".to_string(),
            ));
        }
        self.emit(FrameKind::Payload, value).await
    }

    /// Emit one element of a ONE_TO_MANY invocation.
    pub async fn next<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.cardinality != Cardinality::OneToMany {
            return Err(PeerwireError::Protocol(
                "element emission on a request/response invocation".to_string(),
            ));
        }
        self.emit(FrameKind::Next, value).await
    }

    /// Terminate a ONE_TO_MANY invocation normally.
    pub async fn complete(&self) -> Result<()> {
        match &self.link {
            Link::Session(session) => {
                session
                    .send_frame(FrameKind::Complete, self.stream_id, Bytes::new())
                    .await
            }
            Link::Detached => Ok(()),
        }
    }

    /// Terminate the invocation with an error.
    pub async fn error(&self, err: &PeerwireError) -> Result<()> {
        match &self.link {
            Link::Session(session) => {
                let body = MsgPackCodec::encode(&ErrorBody::from_error(err))?;
                session
                    .send_frame(FrameKind::Error, self.stream_id, Bytes::from(body))
                    .await
            }
            Link::Detached => Ok(()),
        }
    }

    /// Drive a subscription out as this invocation's response stream.
    ///
    /// Elements are forwarded as raw payload bytes, so the subscription's
    /// item type never round-trips through the codec. Cancellation by the
    /// requester drops the subscription, which cancels its producer.
    pub async fn forward<T>(&self, mut source: Subscription<T>) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Dropping `source` cancels its producer.
                    return Ok(());
                }
                event = source.recv_event() => event,
            };

            match event {
                Some(StreamEvent::Next(bytes)) => match &self.link {
                    Link::Session(session) => {
                        session
                            .send_frame(FrameKind::Next, self.stream_id, bytes)
                            .await?
                    }
                    Link::Detached => {}
                },
                Some(StreamEvent::Complete) | None => return self.complete().await,
                Some(StreamEvent::Error(e)) => return self.error(&e).await,
            }
        }
    }

    async fn emit<T: Serialize>(&self, kind: FrameKind, value: &T) -> Result<()> {
        match &self.link {
            Link::Session(session) => {
                let body = MsgPackCodec::encode(value)?;
                session
                    .send_frame(kind, self.stream_id, Bytes::from(body))
                    .await
            }
            Link::Detached => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_context_has_no_identity() {
        let ctx = RequestContext::detached(1, Cardinality::OneToOne);
        assert!(ctx.principal().is_none());
        assert!(ctx.requester().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_respond_rejected_on_streaming_invocation() {
        let ctx = RequestContext::detached(1, Cardinality::OneToMany);
        let result = ctx.respond(&"hi").await;
        assert!(matches!(result, Err(PeerwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_next_rejected_on_request_response_invocation() {
        let ctx = RequestContext::detached(1, Cardinality::OneToOne);
        let result = ctx.next(&"hi").await;
        assert!(matches!(result, Err(PeerwireError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_forward_drains_source() {
        let (producer, sub) = Subscription::<u32>::channel();
        producer.send(&1).unwrap();
        producer.send(&2).unwrap();
        producer.complete();

        let ctx = RequestContext::detached(1, Cardinality::OneToMany);
        ctx.forward(sub).await.unwrap();
    }
}
