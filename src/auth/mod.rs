//! Connection-setup authentication.
//!
//! [`Credentials`] encode into content-type-tagged setup [`Metadata`] carried
//! by the handshake; the accepting peer decodes them and consults its
//! [`CredentialStore`] before any session exists.

mod credentials;
mod store;

pub use credentials::{Credentials, Metadata, AUTHENTICATION_MIME_TYPE};
pub use store::{CredentialStore, MemoryCredentialStore, Principal};
