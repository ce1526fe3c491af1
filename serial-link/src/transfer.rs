//! File transfer over an open link.
//!
//! A file travels as one START packet, a run of DATA packets in order, and
//! one END packet, each in its own I-frame.  START and END both carry the
//! file size and name.

use crate::channel::SerialChannel;
use crate::connection::{Connection, Delivery, LinkError};
use crate::packet::{
    self, ControlKind, ControlPacket, DecodeError, EncodeError, Packet, DATA_HEADER_LEN,
    MAX_PACKET_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("malformed packet: {0}")]
    Decode(#[from] DecodeError),
    #[error("file of {0} bytes is too large to announce")]
    TooLarge(usize),
    #[error("unexpected packet: {0}")]
    Unexpected(&'static str),
    #[error("sender announced {announced} bytes but {received} arrived")]
    SizeMismatch { announced: u32, received: usize },
}

/// Most the receiver reserves up front on the strength of an announced size.
const MAX_PREALLOC: usize = 1 << 20;

/// A file reassembled by [`receive_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Name announced in the START packet.
    pub name: String,
    /// Size announced in the START packet.
    pub size: u32,
    pub data: Vec<u8>,
}

/// Largest DATA chunk that fits both the packet limit and the link's
/// payload limit.
pub fn chunk_size(max_payload: usize) -> usize {
    MAX_PACKET_SIZE.min(max_payload) - DATA_HEADER_LEN
}

/// Send `data` as file `name`.  Returns the number of DATA packets sent.
pub async fn send_file<C: SerialChannel>(
    conn: &mut Connection<C>,
    name: &str,
    data: &[u8],
) -> Result<usize, TransferError> {
    let size = u32::try_from(data.len()).map_err(|_| TransferError::TooLarge(data.len()))?;
    let start = packet::encode_control(ControlKind::Start, size, name.as_bytes())?;
    let end = packet::encode_control(ControlKind::End, size, name.as_bytes())?;

    log::info!("[xfer] sending {name:?} ({size} bytes)");
    conn.send(&start).await?;

    let mut packets = 0;
    for chunk in data.chunks(chunk_size(conn.config().max_payload)) {
        conn.send(&packet::encode_data(chunk)?).await?;
        packets += 1;
        log::debug!("[xfer] DATA #{packets} ({} bytes)", chunk.len());
    }

    conn.send(&end).await?;
    log::info!("[xfer] sent {name:?} in {packets} DATA packets");
    Ok(packets)
}

/// Receive one file, returning once its END packet has arrived.
///
/// Duplicates and damaged frames are skipped; the sender retransmits them.
pub async fn receive_file<C: SerialChannel>(
    conn: &mut Connection<C>,
) -> Result<ReceivedFile, TransferError> {
    let mut assembler = Assembler::default();
    loop {
        let payload = match conn.receive().await {
            Ok(Delivery::Data(payload)) => payload,
            Ok(Delivery::Duplicate) => continue,
            Err(e) if !e.is_fatal() => {
                log::debug!("[xfer] {e}; waiting for retransmission");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(file) = assembler.push(packet::decode(&payload)?)? {
            log::info!("[xfer] received {:?} ({} bytes)", file.name, file.data.len());
            return Ok(file);
        }
    }
}

/// Receive-side packet sequencing.
#[derive(Debug, Default)]
struct Assembler {
    start: Option<ControlPacket>,
    data: Vec<u8>,
}

impl Assembler {
    fn push(&mut self, packet: Packet) -> Result<Option<ReceivedFile>, TransferError> {
        let control = match packet {
            Packet::Data(d) => {
                if self.start.is_none() {
                    return Err(TransferError::Unexpected("DATA before START"));
                }
                self.data.extend_from_slice(&d.payload);
                return Ok(None);
            }
            Packet::Control(p) => p,
        };

        match (control.kind, self.start.take()) {
            (ControlKind::Start, None) => {
                log::info!(
                    "[xfer] START {:?} ({} bytes)",
                    control.file_name_lossy(),
                    control.file_size
                );
                self.data
                    .reserve((control.file_size as usize).min(MAX_PREALLOC));
                self.start = Some(control);
                Ok(None)
            }
            (ControlKind::Start, Some(_)) => Err(TransferError::Unexpected("second START")),
            (ControlKind::End, None) => Err(TransferError::Unexpected("END before START")),
            (ControlKind::End, Some(start)) => {
                if control.file_size != start.file_size || control.file_name != start.file_name {
                    log::warn!("[xfer] END does not match START; using START");
                }
                if self.data.len() != start.file_size as usize {
                    return Err(TransferError::SizeMismatch {
                        announced: start.file_size,
                        received: self.data.len(),
                    });
                }
                Ok(Some(ReceivedFile {
                    name: start.file_name_lossy().into_owned(),
                    size: start.file_size,
                    data: std::mem::take(&mut self.data),
                }))
            }
        }
    }
}
