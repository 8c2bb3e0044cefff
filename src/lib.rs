//! # peerwire
//!
//! Duplex streaming RPC between symmetric peers over a single connection.
//!
//! One side initiates and one side accepts, but after the authenticated
//! handshake both hold the same thing: a [`Session`] that can invoke routes
//! on the other peer and serve routes to it, with any number of concurrent
//! streams multiplexed in each direction.
//!
//! ## Features
//!
//! - **Single-connection duplex**: requests flow both ways over one
//!   transport, so an accepting peer can stream from a route registered on
//!   the initiator.
//! - **Two invocation shapes**: request/response ([`Session::request_response`])
//!   and request/stream ([`Session::request_stream`]).
//! - **Handshake authentication**: credentials travel once in the setup
//!   frame; a rejected handshake never produces a session.
//! - **Cancellation all the way up**: dropping a [`Subscription`] cancels the
//!   remote producer, and composed streams propagate cancellation into every
//!   input.
//! - **Stream composition**: [`race_cancel`] gates one stream on another's
//!   first element, [`filter`] selects elements without re-encoding.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use peerwire::{
//!     Credentials, GreetingRequest, GreetingResponse, GreetingService, HealthSampler,
//!     MemoryCredentialStore, PeerBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() -> peerwire::Result<()> {
//!     // The initiating peer serves `health`; the accepting peer will call
//!     // it back over the same connection while streaming greetings.
//!     let peer = PeerBuilder::new()
//!         .service(|registry| HealthSampler::default().register(registry))?
//!         .build();
//!
//!     let session = peer
//!         .connect_tcp("127.0.0.1:7878", Credentials::new("soumen", "soumen"))
//!         .await?;
//!
//!     let mut greetings = session
//!         .request_stream::<_, GreetingResponse>(
//!             "greetings",
//!             &GreetingRequest { name: "ignored".to_string() },
//!         )
//!         .await?;
//!
//!     while let Some(greeting) = greetings.recv().await {
//!         println!("{}", greeting?.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod compose;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod route;
pub mod service;
pub mod session;
pub mod transport;

pub use auth::{CredentialStore, Credentials, MemoryCredentialStore, Principal};
pub use compose::{filter, race_cancel};
pub use error::{PeerwireError, Result};
pub use peer::{Peer, PeerBuilder};
pub use route::{Cardinality, RequestContext, RouteRegistry};
pub use service::{
    GreetingRequest, GreetingResponse, GreetingService, HealthSample, HealthSampler,
    GREETINGS_ROUTE, HEALTH_ROUTE,
};
pub use session::{Session, SessionConfig, StreamProducer, Subscription};
pub use transport::TcpAcceptor;
