//! Peer assembly.
//!
//! A [`Peer`] bundles everything a side needs before any connection exists:
//! its route registry, the credential store it verifies inbound handshakes
//! against, and session tuning. The same peer can initiate and accept any
//! number of connections; each produces an independent [`Session`].

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::auth::{CredentialStore, Credentials};
use crate::error::{PeerwireError, Result};
use crate::route::{Cardinality, HandlerResult, RequestContext, RouteRegistry};
use crate::session::{Session, SessionConfig};
use crate::transport::TcpAcceptor;

/// Builder for [`Peer`].
///
/// ```no_run
/// # use peerwire::{MemoryCredentialStore, PeerBuilder};
/// # fn build() -> peerwire::Result<()> {
/// let peer = PeerBuilder::new()
///     .route("echo", |name: String, ctx| async move {
///         ctx.respond(&name).await
///     })?
///     .credential_store(MemoryCredentialStore::new().with_user("soumen", "soumen"))
///     .build();
/// # Ok(())
/// # }
/// ```
pub struct PeerBuilder {
    registry: RouteRegistry,
    store: Option<Arc<dyn CredentialStore>>,
    config: SessionConfig,
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerBuilder {
    /// Start with an empty registry and default session tuning.
    pub fn new() -> Self {
        Self {
            registry: RouteRegistry::new(),
            store: None,
            config: SessionConfig::default(),
        }
    }

    /// Register a ONE_TO_ONE route.
    ///
    /// # Errors
    ///
    /// `RouteConflict` if the name is already taken.
    pub fn route<F, T, Fut>(mut self, name: &str, handler: F) -> Result<Self>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry
            .register(name, Cardinality::OneToOne, handler)?;
        Ok(self)
    }

    /// Register a ONE_TO_MANY route.
    ///
    /// # Errors
    ///
    /// `RouteConflict` if the name is already taken.
    pub fn route_stream<F, T, Fut>(mut self, name: &str, handler: F) -> Result<Self>
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry
            .register(name, Cardinality::OneToMany, handler)?;
        Ok(self)
    }

    /// Register routes through a service's own registration hook.
    pub fn service<F>(mut self, register: F) -> Result<Self>
    where
        F: FnOnce(&mut RouteRegistry) -> Result<()>,
    {
        register(&mut self.registry)?;
        Ok(self)
    }

    /// Credential store used to verify inbound handshakes. Required for
    /// accepting connections.
    pub fn credential_store(mut self, store: impl CredentialStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Cap on concurrently running inbound handlers per session.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Cap on accepted frame payload size.
    pub fn max_payload_size(mut self, bytes: u32) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Assemble the peer.
    pub fn build(self) -> Peer {
        Peer {
            registry: Arc::new(self.registry),
            store: self.store,
            config: self.config,
        }
    }
}

/// A configured endpoint, ready to initiate or accept connections.
#[derive(Clone)]
pub struct Peer {
    registry: Arc<RouteRegistry>,
    store: Option<Arc<dyn CredentialStore>>,
    config: SessionConfig,
}

impl Peer {
    /// Initiate a connection over an established transport, presenting
    /// `credentials`.
    ///
    /// # Errors
    ///
    /// `Authentication` if the remote rejects the credentials.
    pub async fn connect<S>(&self, io: S, credentials: Credentials) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Session::connect(io, credentials, self.registry.clone(), self.config.clone()).await
    }

    /// Accept a connection over an established transport, verifying the
    /// initiator's credentials against the configured store.
    ///
    /// # Errors
    ///
    /// `Authentication` if no credential store is configured or the
    /// credentials do not verify.
    pub async fn accept<S>(&self, io: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let store = self.store.clone().ok_or_else(|| {
            PeerwireError::Authentication("no credential store configured".to_string())
        })?;
        Session::accept(io, store, self.registry.clone(), self.config.clone()).await
    }

    /// Connect to `addr` over TCP.
    pub async fn connect_tcp(
        &self,
        addr: impl ToSocketAddrs,
        credentials: Credentials,
    ) -> Result<Session> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.connect(stream, credentials).await
    }

    /// Accept the next TCP connection from `acceptor`.
    pub async fn accept_tcp(&self, acceptor: &TcpAcceptor) -> Result<Session> {
        let (stream, _addr) = acceptor.accept().await?;
        self.accept(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_route_is_a_build_error() {
        let result = PeerBuilder::new()
            .route("echo", |_: (), _ctx| async { Ok(()) })
            .and_then(|b| b.route("echo", |_: (), _ctx| async { Ok(()) }));

        assert!(matches!(result, Err(PeerwireError::RouteConflict(_))));
    }

    #[tokio::test]
    async fn test_accept_without_store_fails() {
        let peer = PeerBuilder::new().build();
        let (io, _other) = tokio::io::duplex(64);

        let result = peer.accept(io).await;
        assert!(matches!(result, Err(PeerwireError::Authentication(_))));
    }
}
