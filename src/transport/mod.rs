//! Transports a session can run over.
//!
//! A session only needs `AsyncRead + AsyncWrite`; TCP is the transport real
//! deployments use, and tests run over in-memory duplex pipes.

mod tcp;

pub use tcp::TcpAcceptor;
