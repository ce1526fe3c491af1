//! Application packets carried inside I-frames.
//!
//! A file transfer is a START control packet, any number of DATA packets,
//! and an END control packet.  This module is responsible for:
//! - Defining the on-wire layout of both packet families.
//! - Encoding packets, rejecting fields that do not fit.
//! - Decoding a received I-frame payload back into a [`Packet`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  Control (START / END):
//!  +------+-----+---+----------------+-----+-----+------------------+
//!  | kind | 0x00| 4 | file size (u32)| 0x01| len | file name (len)  |
//!  +------+-----+---+----------------+-----+-----+------------------+
//!           \__ TLV: file size ____/  \______ TLV: file name ______/
//!
//!  Data:
//!  +------+-------------+------------------------------+
//!  | 0x02 | length (u16)| chunk (length bytes)         |
//!  +------+-------------+------------------------------+
//! ```

use std::borrow::Cow;

/// Largest packet handed to the link layer.
pub const MAX_PACKET_SIZE: usize = 1024;
/// Longest file name a control packet can carry.
pub const MAX_FILENAME_LEN: usize = 255;
/// kind(1) + length(2).
pub const DATA_HEADER_LEN: usize = 3;
/// Largest chunk one DATA packet can carry.
pub const MAX_DATA_CHUNK: usize = MAX_PACKET_SIZE - DATA_HEADER_LEN;
/// kind(1) + size TLV(2 + 4) + name TLV(2 + 255).
pub const MAX_CONTROL_PACKET_LEN: usize = 1 + 2 + 4 + 2 + MAX_FILENAME_LEN;

/// First-byte discriminants.
pub mod kind {
    pub const START: u8 = 0x01;
    pub const DATA: u8 = 0x02;
    pub const END: u8 = 0x03;
}

/// TLV tags used by control packets.
pub mod tag {
    pub const FILE_SIZE: u8 = 0x00;
    pub const FILE_NAME: u8 = 0x01;
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Start,
    End,
}

impl ControlKind {
    pub fn to_byte(self) -> u8 {
        match self {
            ControlKind::Start => kind::START,
            ControlKind::End => kind::END,
        }
    }
}

/// START or END packet describing the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub kind: ControlKind,
    /// Zero if the packet carried no size TLV.
    pub file_size: u32,
    /// Raw name bytes; empty if the packet carried no name TLV.
    pub file_name: Vec<u8>,
}

impl ControlPacket {
    /// File name for display and file-system use.
    pub fn file_name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.file_name)
    }
}

/// One chunk of file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub payload: Vec<u8>,
}

/// Any packet the application layer exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Control(ControlPacket),
    Data(DataPacket),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fields that cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("file name is {0} bytes; at most {MAX_FILENAME_LEN} allowed")]
    FileNameTooLong(usize),
    #[error("data chunk is {0} bytes; at most {MAX_DATA_CHUNK} allowed")]
    ChunkTooLarge(usize),
}

/// Malformed packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet kind 0x{0:02x}")]
    UnknownKind(u8),
    #[error("packet truncated: need {needed} more bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("{0} unexpected bytes after the data chunk")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a START or END packet.
pub fn encode_control(
    kind: ControlKind,
    file_size: u32,
    file_name: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if file_name.len() > MAX_FILENAME_LEN {
        return Err(EncodeError::FileNameTooLong(file_name.len()));
    }

    let mut buf = Vec::with_capacity(1 + 2 + 4 + 2 + file_name.len());
    buf.push(kind.to_byte());

    buf.push(tag::FILE_SIZE);
    buf.push(4);
    buf.extend_from_slice(&file_size.to_be_bytes());

    buf.push(tag::FILE_NAME);
    buf.push(file_name.len() as u8);
    buf.extend_from_slice(file_name);

    Ok(buf)
}

/// Encode a DATA packet.
pub fn encode_data(chunk: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if chunk.len() > MAX_DATA_CHUNK {
        return Err(EncodeError::ChunkTooLarge(chunk.len()));
    }

    let mut buf = Vec::with_capacity(DATA_HEADER_LEN + chunk.len());
    buf.push(kind::DATA);
    buf.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
    buf.extend_from_slice(chunk);
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse a packet from an I-frame payload.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    let (&first, rest) = buf.split_first().ok_or(DecodeError::Empty)?;
    match first {
        kind::DATA => decode_data(rest).map(Packet::Data),
        kind::START => decode_control(ControlKind::Start, rest).map(Packet::Control),
        kind::END => decode_control(ControlKind::End, rest).map(Packet::Control),
        other => Err(DecodeError::UnknownKind(other)),
    }
}

fn decode_data(body: &[u8]) -> Result<DataPacket, DecodeError> {
    let len = take(body, 1, 2)?;
    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
    let payload = take(body, 3, len)?;
    let trailing = body.len() - 2 - len;
    if trailing != 0 {
        return Err(DecodeError::TrailingBytes(trailing));
    }
    Ok(DataPacket {
        payload: payload.to_vec(),
    })
}

fn decode_control(kind: ControlKind, body: &[u8]) -> Result<ControlPacket, DecodeError> {
    let mut packet = ControlPacket {
        kind,
        file_size: 0,
        file_name: Vec::new(),
    };

    // Offsets are reported relative to the whole packet (kind byte = 0).
    let mut pos = 0;
    while pos < body.len() {
        let header = take_at(body, pos, 2)?;
        let (t, l) = (header[0], header[1] as usize);
        let value = take_at(body, pos + 2, l)?;

        match (t, l) {
            (tag::FILE_SIZE, 4) => {
                packet.file_size = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            }
            (tag::FILE_NAME, _) => packet.file_name = value.to_vec(),
            _ => log::debug!("[packet] skipping unknown TLV tag=0x{t:02x} len={l}"),
        }
        pos += 2 + l;
    }

    Ok(packet)
}

/// `len` bytes of `body` starting at packet offset `offset` (body starts at 1).
fn take(body: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    take_at(body, offset - 1, len)
}

fn take_at(body: &[u8], pos: usize, len: usize) -> Result<&[u8], DecodeError> {
    body.get(pos..pos + len).ok_or(DecodeError::Truncated {
        offset: pos + 1,
        needed: len,
        available: body.len().saturating_sub(pos),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_roundtrip_recovers_size_and_name() {
        let bytes = encode_control(ControlKind::Start, 1_000_000, b"report.pdf").unwrap();
        match decode(&bytes).unwrap() {
            Packet::Control(c) => {
                assert_eq!(c.kind, ControlKind::Start);
                assert_eq!(c.file_size, 1_000_000);
                assert_eq!(c.file_name, b"report.pdf");
                assert_eq!(c.file_name_lossy(), "report.pdf");
            }
            other => panic!("expected control packet, got {other:?}"),
        }
    }

    #[test]
    fn control_layout_on_the_wire() {
        let bytes = encode_control(ControlKind::End, 0x0102_0304, b"ab").unwrap();
        assert_eq!(
            bytes,
            vec![kind::END, 0x00, 4, 0x01, 0x02, 0x03, 0x04, 0x01, 2, b'a', b'b']
        );
    }

    #[test]
    fn file_name_limit() {
        assert!(encode_control(ControlKind::Start, 1, &[b'x'; 255]).is_ok());
        assert_eq!(
            encode_control(ControlKind::Start, 1, &[b'x'; 256]),
            Err(EncodeError::FileNameTooLong(256))
        );
    }

    #[test]
    fn largest_control_packet_matches_constant() {
        let bytes = encode_control(ControlKind::Start, 1, &[b'x'; 255]).unwrap();
        assert_eq!(bytes.len(), MAX_CONTROL_PACKET_LEN);
    }

    #[test]
    fn data_chunk_boundary() {
        let max = vec![0xAB; MAX_PACKET_SIZE - 3];
        let bytes = encode_data(&max).unwrap();
        assert_eq!(bytes.len(), MAX_PACKET_SIZE);
        assert_eq!(&bytes[..3], &[kind::DATA, 0x03, 0xFD]);

        let too_big = vec![0xAB; MAX_PACKET_SIZE - 2];
        assert_eq!(
            encode_data(&too_big),
            Err(EncodeError::ChunkTooLarge(MAX_PACKET_SIZE - 2))
        );
    }

    #[test]
    fn data_decode_and_truncation() {
        let bytes = encode_data(b"chunk").unwrap();
        assert_eq!(
            decode(&bytes).unwrap(),
            Packet::Data(DataPacket {
                payload: b"chunk".to_vec()
            })
        );

        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated { needed: 5, available: 4, .. })
        ));
        assert!(matches!(
            decode(&[kind::DATA, 0x00]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn data_with_trailing_bytes_is_rejected() {
        let mut bytes = encode_data(b"abc").unwrap();
        bytes.push(0);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn unknown_tlv_is_skipped() {
        let mut bytes = vec![kind::START, 0x07, 3, 9, 9, 9];
        bytes.extend_from_slice(&encode_control(ControlKind::Start, 42, b"f").unwrap()[1..]);
        match decode(&bytes).unwrap() {
            Packet::Control(c) => {
                assert_eq!(c.file_size, 42);
                assert_eq!(c.file_name, b"f");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tlv_length_overrun_is_an_error() {
        let bytes = [kind::END, tag::FILE_NAME, 10, b'a', b'b'];
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Truncated {
                offset: 3,
                needed: 10,
                available: 2
            })
        );
        // Tag with no length byte.
        assert!(matches!(
            decode(&[kind::START, tag::FILE_SIZE]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn empty_and_unknown_kind() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert_eq!(decode(&[0x09]), Err(DecodeError::UnknownKind(0x09)));
    }
}
