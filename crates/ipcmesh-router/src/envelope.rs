use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RouterError};

/// Separator between the name and the payload of a routed message.
pub const NAME_SEPARATOR: u8 = 0;

/// Validate a client name for use in handshakes and routed messages.
///
/// Names must be non-empty and free of the NUL separator; UTF-8 validity is
/// guaranteed by the `&str` type.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RouterError::EmptyName);
    }
    if name.bytes().any(|b| b == NAME_SEPARATOR) {
        return Err(RouterError::NameContainsSeparator);
    }
    Ok(())
}

/// Build one routed frame: `name NUL payload`.
pub fn encode_envelope(name: &str, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(name.len() + 1 + payload.len());
    buf.put_slice(name.as_bytes());
    buf.put_u8(NAME_SEPARATOR);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split one routed frame on the FIRST NUL into `(name, payload)`.
///
/// The payload may itself contain NUL bytes; only the first one delimits.
/// The name segment must be non-empty valid UTF-8.
pub fn split_envelope(frame: Bytes) -> Result<(String, Bytes)> {
    let sep = frame
        .iter()
        .position(|&b| b == NAME_SEPARATOR)
        .ok_or(RouterError::MissingSeparator)?;
    if sep == 0 {
        return Err(RouterError::EmptyName);
    }
    let name = std::str::from_utf8(&frame[..sep])
        .map_err(|_| RouterError::NameNotUtf8)?
        .to_string();
    let payload = frame.slice(sep + 1..);
    Ok((name, payload))
}
