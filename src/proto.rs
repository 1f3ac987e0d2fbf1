//! Wire format for the framed messages exchanged over the tunnel's WebSocket.
//!
//! After the initial TEXT auth frame, every message on the socket is BINARY
//! and carries a 4-byte correlation id followed by an opaque DNS datagram.
//! The id is serialized big-endian; both peers are the same binary so the
//! only real requirement is agreement, and network byte order matches the
//! convention DNS message ids themselves use on the wire.

/// Length in bytes of the correlation id prefix on every framed message.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest DNS datagram this system will carry, matching the UDP payload
/// ceiling a stub resolver or upstream resolver can send in one packet.
pub const MAX_DNS_MESSAGE_SIZE: usize = 65_507;

/// Read buffer size for inbound WebSocket frames; comfortably covers the
/// header plus any DNS message carried over UDP, EDNS0 included.
pub const FRAME_READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub enum FrameError {
    Truncated,
    TooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated => {
                write!(f, "frame shorter than the {FRAME_HEADER_LEN} byte correlation-id header")
            }
            FrameError::TooLarge(n) => {
                write!(f, "frame payload of {n} bytes exceeds the {MAX_DNS_MESSAGE_SIZE} byte limit")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Serialize `(id, payload)` into a single BINARY WebSocket message body.
pub fn encode_frame(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a received BINARY message body into its correlation id and payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let (head, payload) = bytes.split_at(FRAME_HEADER_LEN);
    if payload.len() > MAX_DNS_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let id = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
    Ok((id, payload))
}
