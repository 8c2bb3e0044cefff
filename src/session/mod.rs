//! Duplex session: one handshake, multiplexed streams in both directions.
//!
//! A [`Session`] is the live state of one authenticated connection. Both
//! peers hold the same machinery (a route registry for inbound invocations,
//! requester methods for outbound ones), so a "server" handler can open
//! a reverse stream back into the "client" over the same transport.
//!
//! Lifecycle: created by [`Session::connect`] / [`Session::accept`] after a
//! successful `Setup` exchange, destroyed on transport closure. Closing the
//! session (either peer, or a transport fault) terminates every outstanding
//! stream in both directions: outbound subscriptions receive a terminal
//! `ConnectionClosed`, inbound handler tokens are cancelled.

mod stream;
mod writer;

pub use stream::{StreamProducer, Subscription};
pub(crate) use stream::StreamEvent;
pub use writer::{spawn_writer_task, OutboundFrame, WriterHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::auth::{CredentialStore, Credentials, Metadata, Principal};
use crate::codec::MsgPackCodec;
use crate::error::{PeerwireError, Result};
use crate::protocol::{
    decode_request, encode_request, ErrorBody, Frame, FrameBuffer, FrameKind, Header, SetupBody,
    PROTOCOL_VERSION, SETUP_STREAM_ID,
};
use crate::route::{Cardinality, RequestContext, RouteRegistry};

/// Read buffer size for the session read loop.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum concurrently running inbound handlers.
    pub max_concurrent_handlers: usize,
    /// Maximum accepted frame payload size.
    pub max_payload_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 64,
            max_payload_size: crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

struct PendingStream {
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

struct SessionInner {
    writer: WriterHandle,
    /// Outbound invocations awaiting responses, by stream id.
    pending: Mutex<HashMap<u32, PendingStream>>,
    /// Inbound handler cancellation tokens, by stream id.
    inbound: Mutex<HashMap<u32, CancellationToken>>,
    /// Next stream id; initiator allocates odd, acceptor even.
    next_stream_id: AtomicU32,
    /// Identity of the remote peer, present on the accepting side.
    principal: Option<Principal>,
    /// Cancelled when the session shuts down.
    closed: CancellationToken,
}

impl SessionInner {
    fn allocate_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(2, Ordering::Relaxed)
    }

    async fn send_frame(&self, kind: FrameKind, stream_id: u32, payload: Bytes) -> Result<()> {
        let header = Header::new(kind, stream_id, payload.len() as u32);
        self.writer.send(OutboundFrame::new(&header, payload)).await
    }

    async fn send_error(&self, stream_id: u32, err: &PeerwireError) {
        let body = match MsgPackCodec::encode(&ErrorBody::from_error(err)) {
            Ok(b) => b,
            Err(_) => return,
        };
        let _ = self
            .send_frame(FrameKind::Error, stream_id, Bytes::from(body))
            .await;
    }

    /// Tear down every stream on the session, in both directions.
    fn shutdown(&self) {
        let pending: Vec<PendingStream> = {
            let mut map = self.pending.lock().unwrap();
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in pending {
            let _ = entry
                .tx
                .send(StreamEvent::Error(PeerwireError::ConnectionClosed));
            entry.cancel.cancel();
        }

        let inbound: Vec<CancellationToken> = {
            let mut map = self.inbound.lock().unwrap();
            map.drain().map(|(_, token)| token).collect()
        };
        for token in inbound {
            token.cancel();
        }

        self.closed.cancel();
    }
}

/// The live state of one authenticated duplex connection.
///
/// Cheaply cloneable; all clones refer to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Initiate a connection: send `Setup` with encoded credentials and wait
    /// for the acceptor's verdict.
    ///
    /// # Errors
    ///
    /// `Authentication` if the acceptor rejects the credentials; no session
    /// exists in that case.
    pub(crate) async fn connect<S>(
        io: S,
        credentials: Credentials,
        registry: Arc<RouteRegistry>,
        config: SessionConfig,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, write_half) = tokio::io::split(io);
        let (writer, writer_task) = spawn_writer_task(write_half);

        let metadata = credentials.encode()?;
        let setup = SetupBody {
            version: PROTOCOL_VERSION.to_string(),
            mime_type: metadata.mime_type,
            metadata: metadata.data,
        };
        let body = MsgPackCodec::encode(&setup)?;
        let header = Header::new(FrameKind::Setup, SETUP_STREAM_ID, body.len() as u32);
        writer
            .send(OutboundFrame::new(&header, Bytes::from(body)))
            .await?;

        let mut frame_buffer = FrameBuffer::with_max_payload(config.max_payload_size);
        let (verdict, queued) = read_handshake_frame(&mut reader, &mut frame_buffer).await?;

        match verdict.kind() {
            FrameKind::SetupOk => {}
            FrameKind::SetupReject => {
                let body: ErrorBody = MsgPackCodec::decode(&verdict.payload)?;
                return Err(body.into_error());
            }
            other => {
                return Err(PeerwireError::Protocol(format!(
                    "expected handshake verdict, got {:?}",
                    other
                )));
            }
        }

        Ok(Self::establish(
            reader,
            frame_buffer,
            queued,
            writer,
            writer_task,
            registry,
            config,
            None,
            1, // initiator allocates odd stream ids
        ))
    }

    /// Accept a connection: read `Setup`, decode and verify the credentials,
    /// and reply with the verdict.
    ///
    /// A malformed credential blob is rejected the same way as a wrong
    /// password; an unauthenticated handshake never produces a session.
    pub(crate) async fn accept<S>(
        io: S,
        store: Arc<dyn CredentialStore>,
        registry: Arc<RouteRegistry>,
        config: SessionConfig,
    ) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, write_half) = tokio::io::split(io);
        let (writer, writer_task) = spawn_writer_task(write_half);

        let mut frame_buffer = FrameBuffer::with_max_payload(config.max_payload_size);
        let (setup, queued) = read_handshake_frame(&mut reader, &mut frame_buffer).await?;

        if setup.kind() != FrameKind::Setup {
            return Err(PeerwireError::Protocol(format!(
                "expected Setup frame, got {:?}",
                setup.kind()
            )));
        }

        let body: SetupBody = MsgPackCodec::decode(&setup.payload)?;
        if body.version != PROTOCOL_VERSION {
            let err = PeerwireError::Protocol(format!(
                "unsupported protocol version: {}",
                body.version
            ));
            reject_setup(&writer, &err).await;
            return Err(err);
        }

        let principal = match authenticate(&store, &body) {
            Ok(principal) => principal,
            Err(err) => {
                tracing::warn!("handshake rejected: {}", err);
                reject_setup(&writer, &err).await;
                return Err(err);
            }
        };

        let ok_header = Header::new(FrameKind::SetupOk, SETUP_STREAM_ID, 0);
        writer.send(OutboundFrame::empty(&ok_header)).await?;

        Ok(Self::establish(
            reader,
            frame_buffer,
            queued,
            writer,
            writer_task,
            registry,
            config,
            Some(principal),
            2, // acceptor allocates even stream ids
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn establish<R>(
        reader: R,
        frame_buffer: FrameBuffer,
        queued: Vec<Frame>,
        writer: WriterHandle,
        writer_task: tokio::task::JoinHandle<Result<()>>,
        registry: Arc<RouteRegistry>,
        config: SessionConfig,
        principal: Option<Principal>,
        first_stream_id: u32,
    ) -> Session
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::new(SessionInner {
            writer,
            pending: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU32::new(first_stream_id),
            principal,
            closed: CancellationToken::new(),
        });

        // Shutdown must release the transport write half so the remote
        // observes EOF and fails its own active streams.
        let closed = inner.closed.clone();
        tokio::spawn(async move {
            closed.cancelled().await;
            writer_task.abort();
        });

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers));
        tokio::spawn(read_loop(
            reader,
            frame_buffer,
            queued,
            inner.clone(),
            registry,
            semaphore,
        ));

        Session { inner }
    }

    /// Identity of the remote peer, if this side authenticated it.
    pub fn principal(&self) -> Option<&Principal> {
        self.inner.principal.as_ref()
    }

    /// Whether the session has shut down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Suspend until the session shuts down.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Close the session, cancelling every stream on it in both directions.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Invoke a ONE_TO_ONE route on the remote peer.
    pub async fn request_response<Req, Resp>(&self, route: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut sub: Subscription<Resp> = self
            .open_stream(FrameKind::RequestResponse, route, request)
            .await?;

        match sub.recv().await {
            Some(result) => result,
            None => Err(PeerwireError::Protocol(
                "response stream completed without a value".to_string(),
            )),
        }
    }

    /// Invoke a ONE_TO_MANY route on the remote peer.
    ///
    /// The returned subscription owns the invocation: dropping or cancelling
    /// it sends a `Cancel` frame so the remote producer stops.
    pub async fn request_stream<Req, Resp>(
        &self,
        route: &str,
        request: &Req,
    ) -> Result<Subscription<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.open_stream(FrameKind::RequestStream, route, request)
            .await
    }

    async fn open_stream<Req, Resp>(
        &self,
        kind: FrameKind,
        route: &str,
        request: &Req,
    ) -> Result<Subscription<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.is_closed() {
            return Err(PeerwireError::ConnectionClosed);
        }

        let body = MsgPackCodec::encode(request)?;
        let payload = encode_request(route, &body)?;
        let stream_id = self.inner.allocate_stream_id();

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.inner.closed.child_token();
        self.inner.pending.lock().unwrap().insert(
            stream_id,
            PendingStream {
                tx,
                cancel: cancel.clone(),
            },
        );

        // Tie the remote producer to this subscription's lifetime: first
        // cancellation that still finds the stream pending sends Cancel.
        let inner = self.inner.clone();
        let watch = cancel.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            if inner.pending.lock().unwrap().remove(&stream_id).is_some() {
                let header = Header::new(FrameKind::Cancel, stream_id, 0);
                let _ = inner.writer.send(OutboundFrame::empty(&header)).await;
            }
        });

        if let Err(e) = self
            .inner
            .send_frame(kind, stream_id, Bytes::from(payload))
            .await
        {
            self.inner.pending.lock().unwrap().remove(&stream_id);
            cancel.cancel();
            return Err(e);
        }

        Ok(Subscription::from_parts(rx, cancel))
    }

    pub(crate) async fn send_frame(
        &self,
        kind: FrameKind,
        stream_id: u32,
        payload: Bytes,
    ) -> Result<()> {
        self.inner.send_frame(kind, stream_id, payload).await
    }
}

fn authenticate(store: &Arc<dyn CredentialStore>, setup: &SetupBody) -> Result<Principal> {
    let metadata = Metadata {
        mime_type: setup.mime_type.clone(),
        data: setup.metadata.clone(),
    };

    // Codec-level failures are authentication failures from the initiator's
    // point of view: no session, connection closed.
    let credentials = Credentials::decode(&metadata)
        .map_err(|e| PeerwireError::Authentication(e.to_string()))?;

    store
        .verify(credentials.username(), credentials.password())
        .ok_or_else(|| PeerwireError::Authentication("invalid credentials".to_string()))
}

async fn reject_setup(writer: &WriterHandle, err: &PeerwireError) {
    if let Ok(body) = MsgPackCodec::encode(&ErrorBody::from_error(err)) {
        let header = Header::new(FrameKind::SetupReject, SETUP_STREAM_ID, body.len() as u32);
        let _ = writer
            .send(OutboundFrame::new(&header, Bytes::from(body)))
            .await;
    }
}

/// Read exactly one frame during the handshake, returning any frames the
/// remote coalesced behind it for the read loop to process first.
async fn read_handshake_frame<R>(
    reader: &mut R,
    frame_buffer: &mut FrameBuffer,
) -> Result<(Frame, Vec<Frame>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(PeerwireError::ConnectionClosed);
        }

        let mut frames = frame_buffer.push(&buf[..n])?;
        if !frames.is_empty() {
            let first = frames.remove(0);
            return Ok((first, frames));
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    mut frame_buffer: FrameBuffer,
    queued: Vec<Frame>,
    inner: Arc<SessionInner>,
    registry: Arc<RouteRegistry>,
    semaphore: Arc<Semaphore>,
) where
    R: AsyncRead + Unpin,
{
    let result: Result<()> = async {
        for frame in queued {
            handle_frame(frame, &inner, &registry, &semaphore).await?;
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = tokio::select! {
                _ = inner.closed.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }

            for frame in frame_buffer.push(&buf[..n])? {
                handle_frame(frame, &inner, &registry, &semaphore).await?;
            }
        }
    }
    .await;

    match result {
        Ok(()) => tracing::debug!("session read loop finished"),
        Err(e) => tracing::error!("session read loop error: {}", e),
    }

    inner.shutdown();
}

/// Handle one inbound frame. `Err` is a connection-fatal protocol violation;
/// invocation-level failures are reported on their stream and return `Ok`.
async fn handle_frame(
    frame: Frame,
    inner: &Arc<SessionInner>,
    registry: &Arc<RouteRegistry>,
    semaphore: &Arc<Semaphore>,
) -> Result<()> {
    let stream_id = frame.stream_id();

    match frame.kind() {
        FrameKind::Setup | FrameKind::SetupOk | FrameKind::SetupReject => {
            Err(PeerwireError::Protocol(format!(
                "{:?} frame after handshake",
                frame.kind()
            )))
        }

        FrameKind::RequestResponse | FrameKind::RequestStream => {
            let cardinality = match frame.kind() {
                FrameKind::RequestResponse => Cardinality::OneToOne,
                _ => Cardinality::OneToMany,
            };

            let (route, body) = match decode_request(&frame.payload) {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!("undecodable request on stream {}: {}", stream_id, e);
                    inner.send_error(stream_id, &e).await;
                    return Ok(());
                }
            };

            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    tracing::warn!(
                        "handler capacity reached, rejecting {:?} on stream {}",
                        route,
                        stream_id
                    );
                    inner
                        .send_error(
                            stream_id,
                            &PeerwireError::Remote("handler capacity reached".to_string()),
                        )
                        .await;
                    return Ok(());
                }
            };

            let token = inner.closed.child_token();
            inner
                .inbound
                .lock()
                .unwrap()
                .insert(stream_id, token.clone());

            let session = Session {
                inner: inner.clone(),
            };
            let ctx = RequestContext::attached(stream_id, cardinality, session, token);
            let registry = registry.clone();
            let inner = inner.clone();

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = registry.dispatch(&route, cardinality, body, ctx).await {
                    tracing::debug!("invocation of {:?} failed: {}", route, e);
                    inner.send_error(stream_id, &e).await;
                }
                inner.inbound.lock().unwrap().remove(&stream_id);
            });
            Ok(())
        }

        FrameKind::Payload => {
            if let Some(entry) = inner.pending.lock().unwrap().remove(&stream_id) {
                let _ = entry.tx.send(StreamEvent::Next(frame.payload));
                let _ = entry.tx.send(StreamEvent::Complete);
                entry.cancel.cancel();
            }
            Ok(())
        }

        FrameKind::Next => {
            let pending = inner.pending.lock().unwrap();
            match pending.get(&stream_id) {
                Some(entry) => {
                    let _ = entry.tx.send(StreamEvent::Next(frame.payload));
                }
                // Element racing our Cancel; the stream is already gone.
                None => tracing::debug!("element for unknown stream {}", stream_id),
            }
            Ok(())
        }

        FrameKind::Complete => {
            if let Some(entry) = inner.pending.lock().unwrap().remove(&stream_id) {
                let _ = entry.tx.send(StreamEvent::Complete);
                entry.cancel.cancel();
            }
            Ok(())
        }

        FrameKind::Error => {
            if let Some(entry) = inner.pending.lock().unwrap().remove(&stream_id) {
                let err = match MsgPackCodec::decode::<ErrorBody>(&frame.payload) {
                    Ok(body) => body.into_error(),
                    Err(_) => PeerwireError::Remote("undecodable error frame".to_string()),
                };
                let _ = entry.tx.send(StreamEvent::Error(err));
                entry.cancel.cancel();
            }
            Ok(())
        }

        FrameKind::Cancel => {
            // Late cancel racing a terminal is normal; unknown ids are ignored.
            if let Some(token) = inner.inbound.lock().unwrap().remove(&stream_id) {
                token.cancel();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    fn empty_registry() -> Arc<RouteRegistry> {
        Arc::new(RouteRegistry::new())
    }

    fn store(username: &str, password: &str) -> Arc<dyn CredentialStore> {
        Arc::new(MemoryCredentialStore::new().with_user(username, password))
    }

    async fn handshake(
        credentials: Credentials,
    ) -> (Result<Session>, Result<Session>) {
        let (acceptor_io, initiator_io) = tokio::io::duplex(4096);

        let accepting = tokio::spawn(Session::accept(
            acceptor_io,
            store("soumen", "soumen"),
            empty_registry(),
            SessionConfig::default(),
        ));
        let initiator = Session::connect(
            initiator_io,
            credentials,
            empty_registry(),
            SessionConfig::default(),
        )
        .await;
        let acceptor = accepting.await.unwrap();

        (initiator, acceptor)
    }

    #[tokio::test]
    async fn test_handshake_attaches_principal_on_acceptor() {
        let (initiator, acceptor) = handshake(Credentials::new("soumen", "soumen")).await;

        let initiator = initiator.unwrap();
        let acceptor = acceptor.unwrap();

        // Only the verifying side knows who the remote is.
        assert!(initiator.principal().is_none());
        assert_eq!(acceptor.principal().unwrap().username, "soumen");
        assert!(!initiator.is_closed());
    }

    #[tokio::test]
    async fn test_handshake_rejects_bad_credentials_on_both_sides() {
        let (initiator, acceptor) = handshake(Credentials::new("soumen", "nope")).await;

        assert!(matches!(
            initiator,
            Err(PeerwireError::Authentication(_))
        ));
        assert!(matches!(
            acceptor,
            Err(PeerwireError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_new_invocations() {
        let (initiator, acceptor) = handshake(Credentials::new("soumen", "soumen")).await;
        let session = initiator.unwrap();
        let _acceptor = acceptor.unwrap();

        session.close();
        assert!(session.is_closed());

        let result: Result<String> = session.request_response("echo", &"hi").await;
        assert!(matches!(result, Err(PeerwireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_peer_disappearing_fails_active_invocation() {
        let (initiator, acceptor) = handshake(Credentials::new("soumen", "soumen")).await;
        let session = initiator.unwrap();

        // Dropping the acceptor's session does not close the transport by
        // itself, but closing it does.
        let acceptor = acceptor.unwrap();
        acceptor.close();

        session.closed().await;
        let result: Result<String> = session.request_response("echo", &"hi").await;
        assert!(matches!(result, Err(PeerwireError::ConnectionClosed)));
    }
}
