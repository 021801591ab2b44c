//! Built-in version-exchange handshake.
//!
//! Both ends send a JSON [`Hello`] and then wait for the peer's. The
//! connection becomes ready only if the protocol names match, the major
//! versions match and both sides use the same `max_msg_len`, which is what
//! fixes the header width on the wire.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::RawChannel;
use crate::error::{ConnError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;

/// Settings for [`version_exchange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// How long to wait for the peer's hello.
    pub timeout: Duration,
    pub protocol_name: String,
    /// `<major>.<minor>`; only the major component has to match.
    pub protocol_version: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "stockings".to_string(),
            protocol_version: "1.0".to_string(),
        }
    }
}

/// The message each side sends during [`version_exchange`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub protocol: String,
    pub version: String,
    pub max_msg_len: usize,
}

/// Build a handshake closure for [`crate::ConnectionBuilder::handshake`].
///
/// The closure returns `Ok(false)` when the peer is incompatible and an error
/// when the peer never answers or sends garbage.
pub fn version_exchange(
    config: HandshakeConfig,
) -> impl FnOnce(&RawChannel) -> Result<bool> + Send + 'static {
    move |channel: &RawChannel| match exchange_hello(channel, &config) {
        Ok(_) => Ok(true),
        Err(ConnError::HandshakeFailed(reason)) => {
            debug!(peer = %channel.peer(), reason = %reason, "peer rejected");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Send our hello, wait for the peer's and check compatibility.
///
/// Returns the peer's hello on success.
pub fn exchange_hello(channel: &RawChannel, config: &HandshakeConfig) -> Result<Hello> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let local = Hello {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        max_msg_len: channel.max_msg_len(),
    };
    channel.write(&serde_json::to_vec(&local)?)?;

    let payload = recv_before(channel, Instant::now() + config.timeout, config.timeout)?;
    let remote: Hello = serde_json::from_slice(&payload)?;
    check_compatible(&local, &remote)?;

    debug!(
        peer = %channel.peer(),
        protocol = %remote.protocol,
        version = %remote.version,
        "version exchange complete"
    );
    Ok(remote)
}

fn recv_before(channel: &RawChannel, deadline: Instant, timeout: Duration) -> Result<Bytes> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ConnError::Timeout(timeout));
        }
        if let Some(payload) = channel.recv_timeout(remaining)? {
            return Ok(payload);
        }
    }
}

fn check_compatible(local: &Hello, remote: &Hello) -> Result<()> {
    validate_protocol_name(&remote.protocol)?;
    validate_version(&remote.version)?;

    if remote.protocol != local.protocol {
        return Err(ConnError::HandshakeFailed(format!(
            "protocol mismatch: expected {}, got {}",
            local.protocol, remote.protocol
        )));
    }

    let (local_major, _) = parse_version(&local.version)?;
    let (remote_major, _) = parse_version(&remote.version)?;
    if local_major != remote_major {
        return Err(ConnError::HandshakeFailed(format!(
            "incompatible version: local {}, peer {}",
            local.version, remote.version
        )));
    }

    if remote.max_msg_len != local.max_msg_len {
        return Err(ConnError::HandshakeFailed(format!(
            "max_msg_len mismatch: local {}, peer {}",
            local.max_msg_len, remote.max_msg_len
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(ConnError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(ConnError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    parse_version(version).map(|_| ())
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid =
        |what: &str| ConnError::HandshakeFailed(format!("invalid version '{version}': {what}"));

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| invalid("expected '<major>.<minor>'"))?;
    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}
