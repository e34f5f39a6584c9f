//! Envelope encoding and decoding.
//!
//! One transport message carries exactly one envelope; there is no length
//! prefix around the frame and no reassembly.
//!
//! Wire format (big-endian):
//! - `version: u8`
//! - `id: u64`
//! - `status: u8`
//! - `instance_id: u16 length + UTF-8`
//! - `payload_type: u16 length + UTF-8`
//! - `payload: u32 length + bytes`
//! - `has_error: u8` (0 or 1), then if 1:
//!   `message: u32 length + UTF-8`, `cause: u32 length + UTF-8`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{MAX_ENVELOPE_SIZE, WIRE_VERSION};
use crate::envelope::{Envelope, ErrorInfo, Status};
use crate::errors::CodecError;
use crate::ids::TransactionId;

/// Fixed-size part of every frame: version, id, status, the three length
/// prefixes, and the error flag.
const FIXED_LEN: usize = 1 + 8 + 1 + 2 + 2 + 4 + 1;

/// Encode an envelope into a single frame.
///
/// An error-status envelope without an [`ErrorInfo`] is written with an empty
/// error block so that decoding always yields `Some` for error replies.
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let error = match envelope.status {
        Status::Error => Some(envelope.error.clone().unwrap_or_default()),
        Status::Complete | Status::InProgress => None,
    };

    let error_len = error
        .as_ref()
        .map_or(0, |e| 8 + e.message.len() + e.cause.len());
    let size = FIXED_LEN
        + envelope.instance_id.len()
        + envelope.payload_type.len()
        + envelope.payload.len()
        + error_len;
    if size > MAX_ENVELOPE_SIZE {
        return Err(CodecError::TooLarge {
            size,
            max: MAX_ENVELOPE_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(WIRE_VERSION);
    buf.put_u64(envelope.id.get());
    buf.put_u8(envelope.status.as_u8());
    put_short_str(&mut buf, &envelope.instance_id)?;
    put_short_str(&mut buf, &envelope.payload_type)?;
    put_long_bytes(&mut buf, &envelope.payload);
    match error {
        Some(info) => {
            buf.put_u8(1);
            put_long_bytes(&mut buf, info.message.as_bytes());
            put_long_bytes(&mut buf, info.cause.as_bytes());
        }
        None => buf.put_u8(0),
    }
    Ok(buf.freeze())
}

/// Decode a single frame into an envelope.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    if frame.len() > MAX_ENVELOPE_SIZE {
        return Err(CodecError::TooLarge {
            size: frame.len(),
            max: MAX_ENVELOPE_SIZE,
        });
    }
    let mut buf = frame;

    ensure(&buf, 1, "version")?;
    let version = buf.get_u8();
    if version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    ensure(&buf, 8, "id")?;
    let id = TransactionId::new(buf.get_u64());

    ensure(&buf, 1, "status")?;
    let raw_status = buf.get_u8();
    let status = Status::from_u8(raw_status).ok_or(CodecError::UnknownStatus(raw_status))?;

    let instance_id = get_short_str(&mut buf, "instance_id")?;
    let payload_type = get_short_str(&mut buf, "payload_type")?;
    let payload = Bytes::copy_from_slice(get_long_bytes(&mut buf, "payload")?);

    ensure(&buf, 1, "error flag")?;
    let error = match buf.get_u8() {
        0 => None,
        1 => {
            if status != Status::Error {
                return Err(CodecError::UnexpectedError { status });
            }
            let message = utf8(get_long_bytes(&mut buf, "error.message")?, "error.message")?;
            let cause = utf8(get_long_bytes(&mut buf, "error.cause")?, "error.cause")?;
            Some(ErrorInfo { message, cause })
        }
        flag => return Err(CodecError::InvalidErrorFlag(flag)),
    };

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }

    Ok(Envelope {
        id,
        status,
        instance_id,
        payload_type,
        payload,
        error,
    })
}

fn ensure(buf: &&[u8], needed: usize, field: &'static str) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u16::try_from(value.len()).map_err(|_| CodecError::TooLarge {
        size: value.len(),
        max: usize::from(u16::MAX),
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

// Lengths are bounded by MAX_ENVELOPE_SIZE, which fits in a u32.
#[allow(clippy::cast_possible_truncation)]
fn put_long_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn get_short_str(buf: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    ensure(buf, 2, field)?;
    let len = usize::from(buf.get_u16());
    ensure(buf, len, field)?;
    let slice: &[u8] = *buf;
    let value = utf8(&slice[..len], field)?;
    buf.advance(len);
    Ok(value)
}

fn get_long_bytes<'a>(buf: &mut &'a [u8], field: &'static str) -> Result<&'a [u8], CodecError> {
    ensure(buf, 4, field)?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, field)?;
    let slice: &'a [u8] = *buf;
    let (value, rest) = slice.split_at(len);
    *buf = rest;
    Ok(value)
}

fn utf8(bytes: &[u8], field: &'static str) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}
