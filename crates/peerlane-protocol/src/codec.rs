//! Channel-tag framing.
//!
//! The backend delivers opaque byte messages and does not know which
//! host-framework lane a message belongs to, so the lane travels inside
//! the message as one trailing byte:
//!
//! ```text
//! +----------------------+-----------+
//! | payload (N bytes)    | channel   |
//! +----------------------+-----------+
//! ```
//!
//! The tag goes at the end rather than the front so that framing an
//! outbound buffer is a single `push` and unframing an owned inbound
//! buffer is a single `pop`. Neither side moves the payload.

use crate::{Channel, ProtocolError};

/// Appends the channel tag to a buffer that holds a payload.
///
/// Amortized cost is a capacity check plus one write; the buffer only
/// reallocates when it is full.
pub fn encode_in_place(buf: &mut Vec<u8>, channel: Channel) {
    buf.push(channel.0);
}

/// Frames a borrowed payload into a new buffer of exactly
/// `payload.len() + 1` bytes.
pub fn frame(payload: &[u8], channel: Channel) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    encode_in_place(&mut buf, channel);
    buf
}

/// Splits a wire message into its payload and channel.
///
/// # Errors
/// Returns [`ProtocolError::EmptyFrame`] for a zero-length message,
/// which a well-behaved peer never sends.
pub fn decode(wire: &[u8]) -> Result<(&[u8], Channel), ProtocolError> {
    match wire.split_last() {
        Some((tag, payload)) => Ok((payload, Channel(*tag))),
        None => Err(ProtocolError::EmptyFrame),
    }
}

/// Like [`decode`], but strips the tag from an owned buffer in place.
///
/// # Errors
/// Returns [`ProtocolError::EmptyFrame`] for a zero-length message.
pub fn decode_owned(
    mut wire: Vec<u8>,
) -> Result<(Vec<u8>, Channel), ProtocolError> {
    match wire.pop() {
        Some(tag) => Ok((wire, Channel(tag))),
        None => Err(ProtocolError::EmptyFrame),
    }
}
