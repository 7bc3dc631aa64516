// triton-wire: Wire-frame meta header for the non-blocking forwarder path.
//
// Every message sent from a client to tritond is a two-part message: part
// one is the fixed-width meta header defined here, part two is the
// MessagePack-encoded record body.  The header is deliberately cheap to
// parse so the daemon can route on stream name without decoding the body.

use thiserror::Error;

/// Version byte carried in every meta header.  Frozen at `0x04`.
pub const META_VERSION: u8 = 0x04;

/// Maximum payload width of each Pascal-string field.
pub const FIELD_WIDTH: usize = 64;

/// Total header size: version byte + two length-prefixed 64-byte fields.
pub const META_HEADER_LEN: usize = 1 + (1 + FIELD_WIDTH) * 2;

/// A decoded meta header.
///
/// `stream_name` routes the record to a per-stream batch inside the
/// daemon; `partition_key` is carried through to the backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaHeader {
    pub stream_name: String,
    pub partition_key: String,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("meta header must be {META_HEADER_LEN} bytes, got {0}")]
    BadLength(usize),
    #[error("unsupported meta version {0:#04x}")]
    BadVersion(u8),
    #[error("field length prefix {0} exceeds {FIELD_WIDTH}")]
    BadFieldLength(u8),
    #[error("field is not valid UTF-8")]
    BadUtf8,
}

/// Pack a meta header, big-endian field order: version, stream name,
/// partition key.
///
/// Each field is one length byte (`min(len, 64)`) followed by 64 data
/// bytes, zero-padded.  Inputs longer than 64 bytes are truncated at the
/// byte level; producers are expected to reject over-long names and keys
/// before framing, so truncation never happens on the happy path.
pub fn pack_meta(stream_name: &str, partition_key: &str) -> [u8; META_HEADER_LEN] {
    let mut buf = [0u8; META_HEADER_LEN];
    buf[0] = META_VERSION;
    pack_field(&mut buf[1..=FIELD_WIDTH + 1], stream_name.as_bytes());
    pack_field(&mut buf[FIELD_WIDTH + 2..], partition_key.as_bytes());
    buf
}

/// Parse and validate a meta header.
///
/// Rejects wrong total length, a version byte other than
/// [`META_VERSION`], a length prefix past the field width, and non-UTF-8
/// field content.
pub fn parse_meta(buf: &[u8]) -> Result<MetaHeader, FrameError> {
    if buf.len() != META_HEADER_LEN {
        return Err(FrameError::BadLength(buf.len()));
    }
    if buf[0] != META_VERSION {
        return Err(FrameError::BadVersion(buf[0]));
    }
    let stream_name = parse_field(&buf[1..=FIELD_WIDTH + 1])?;
    let partition_key = parse_field(&buf[FIELD_WIDTH + 2..])?;
    Ok(MetaHeader {
        stream_name,
        partition_key,
    })
}

fn pack_field(out: &mut [u8], data: &[u8]) {
    let n = data.len().min(FIELD_WIDTH);
    out[0] = n as u8;
    out[1..=n].copy_from_slice(&data[..n]);
}

fn parse_field(field: &[u8]) -> Result<String, FrameError> {
    let n = field[0] as usize;
    if n > FIELD_WIDTH {
        return Err(FrameError::BadFieldLength(field[0]));
    }
    std::str::from_utf8(&field[1..=n])
        .map(str::to_owned)
        .map_err(|_| FrameError::BadUtf8)
}
