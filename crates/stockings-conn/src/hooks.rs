//! Message transformation hooks applied around framing.
//!
//! A pre-write hook turns whatever the caller hands to
//! [`crate::Connection::write`] into payload bytes; a post-read hook turns a
//! decoded payload into the value [`crate::Connection::read`] returns. The
//! defaults are identity functions over [`Bytes`].

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ConnError, Result};

pub type PreWrite<W> = Box<dyn Fn(W) -> Result<Bytes> + Send + Sync>;
pub type PostRead<R> = Box<dyn Fn(Bytes) -> Result<R> + Send + Sync>;

pub(crate) struct Hooks<W, R> {
    pub(crate) pre_write: PreWrite<W>,
    pub(crate) post_read: PostRead<R>,
}

impl Hooks<Bytes, Bytes> {
    pub(crate) fn identity() -> Self {
        Self {
            pre_write: Box::new(|payload: Bytes| -> Result<Bytes> { Ok(payload) }),
            post_read: Box::new(|payload: Bytes| -> Result<Bytes> { Ok(payload) }),
        }
    }
}

/// Send a `String` as its UTF-8 bytes.
pub fn utf8_pre_write(text: String) -> Result<Bytes> {
    Ok(Bytes::from(text))
}

/// Decode a payload as UTF-8 text.
pub fn utf8_post_read(payload: Bytes) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|err| ConnError::Hook(format!("payload is not valid UTF-8: {err}")))
}

/// Serialize a value as JSON.
pub fn json_pre_write<T: Serialize>(value: T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

/// Deserialize a JSON payload.
pub fn json_post_read<T: DeserializeOwned>(payload: Bytes) -> Result<T> {
    Ok(serde_json::from_slice(&payload)?)
}
