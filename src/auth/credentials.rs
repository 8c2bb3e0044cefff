//! Credential codec for connection-setup metadata.
//!
//! Credentials travel once, inside the `Setup` frame, as an opaque blob tagged
//! with a well-known content type:
//!
//! ```text
//! ┌────────────────┬──────────┬──────────┐
//! │ Username len   │ Username │ Password │
//! │ 2 bytes u16 BE │ UTF-8    │ UTF-8    │
//! └────────────────┴──────────┴──────────┘
//! ```
//!
//! Encoding is deterministic; decoding rejects blobs with the wrong content
//! type or a username length that overruns the blob.

use crate::error::{PeerwireError, Result};

/// Content type identifying the simple-authentication metadata format.
pub const AUTHENTICATION_MIME_TYPE: &str = "message/x.peerwire.authentication.v0";

/// A username/password pair presented at connection setup.
///
/// Created once by the initiating peer, consumed when the setup metadata is
/// produced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

/// Content-type-tagged setup metadata blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Declared content type of `data`.
    pub mime_type: String,
    /// Opaque encoded bytes.
    pub data: Vec<u8>,
}

impl Credentials {
    /// Create a new credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Get the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Encode into setup metadata.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCredentials` if the username exceeds the u16 length
    /// prefix.
    pub fn encode(&self) -> Result<Metadata> {
        let user = self.username.as_bytes();
        let pass = self.password.as_bytes();

        if user.len() > u16::MAX as usize {
            return Err(PeerwireError::MalformedCredentials(
                "username too long".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(2 + user.len() + pass.len());
        data.extend_from_slice(&(user.len() as u16).to_be_bytes());
        data.extend_from_slice(user);
        data.extend_from_slice(pass);

        Ok(Metadata {
            mime_type: AUTHENTICATION_MIME_TYPE.to_string(),
            data,
        })
    }

    /// Decode setup metadata back into credentials.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCredentials` if the content type does not match or
    /// the blob is structurally invalid.
    pub fn decode(metadata: &Metadata) -> Result<Self> {
        if metadata.mime_type != AUTHENTICATION_MIME_TYPE {
            return Err(PeerwireError::MalformedCredentials(format!(
                "unexpected content type: {}",
                metadata.mime_type
            )));
        }

        let data = &metadata.data;
        if data.len() < 2 {
            return Err(PeerwireError::MalformedCredentials(
                "blob shorter than length prefix".to_string(),
            ));
        }

        let user_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        if data.len() < 2 + user_len {
            return Err(PeerwireError::MalformedCredentials(
                "username length overruns blob".to_string(),
            ));
        }

        let username = std::str::from_utf8(&data[2..2 + user_len])
            .map_err(|_| PeerwireError::MalformedCredentials("username not UTF-8".to_string()))?;
        let password = std::str::from_utf8(&data[2 + user_len..])
            .map_err(|_| PeerwireError::MalformedCredentials("password not UTF-8".to_string()))?;

        Ok(Self::new(username, password))
    }
}
