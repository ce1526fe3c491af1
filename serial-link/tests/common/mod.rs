//! Shared helpers for the integration tests.
//!
//! A [`RawPeer`] plays the far end of a link byte by byte, so a test can
//! script exactly which frames the connection under test sees and inspect
//! exactly which frames it sent.

#![allow(dead_code)]

use std::time::Duration;

use serial_link::{
    channel::StreamChannel,
    config::LinkConfig,
    frame::{self, Decoder, Frame},
    SerialChannel,
};
use tokio::io::DuplexStream;

pub type Pipe = StreamChannel<DuplexStream>;

/// Two connected in-memory channels.
pub fn pipe() -> (Pipe, Pipe) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (StreamChannel::new(a), StreamChannel::new(b))
}

/// One-second timeout keeps paused-clock arithmetic readable.
pub fn config() -> LinkConfig {
    LinkConfig::default().with_timeout(Duration::from_secs(1))
}

/// Scripted far end of a link.
pub struct RawPeer {
    chan: Pipe,
    decoder: Decoder,
}

impl RawPeer {
    pub fn new(chan: Pipe) -> Self {
        Self {
            chan,
            decoder: Decoder::new(4096),
        }
    }

    /// Write one frame.
    pub async fn send(&mut self, address: u8, control: u8, payload: Option<&[u8]>) {
        self.send_raw(&frame::encode(address, control, payload)).await;
    }

    /// Write arbitrary bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.chan.write_bytes(bytes).await.expect("peer write");
    }

    /// Read the next complete frame.
    pub async fn frame(&mut self) -> Frame {
        loop {
            let byte = self.chan.read_byte().await.expect("peer read");
            if let Some(frame) = self.decoder.push(byte) {
                return frame;
            }
        }
    }

    /// Read the next frame and return its `(address, control)` pair.
    pub async fn header(&mut self) -> (u8, u8) {
        let f = self.frame().await;
        (f.address, f.control)
    }
}
