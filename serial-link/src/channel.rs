//! Serial channel abstraction.
//!
//! [`SerialChannel`] is the narrow byte-level interface the link layer
//! consumes: read one byte, write a buffer.  All protocol logic lives
//! elsewhere; implementations own only byte I/O.
//!
//! Provided implementations:
//! - [`StreamChannel`]: any tokio `AsyncRead + AsyncWrite` stream, e.g. a
//!   real port from [`open_serial`] or one half of `tokio::io::duplex`.
//! - `&mut C` for any channel `C`, so a caller can keep the port after a
//!   connection built on it is closed and open a new session on it.
//! - [`crate::simulator::Simulator`]: fault injection for tests.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Byte source/sink underneath a link.
pub trait SerialChannel {
    /// Wait for the next byte from the line.
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose a byte.  The connection races this against its retransmit timer.
    fn read_byte(&mut self) -> impl Future<Output = io::Result<u8>> + Send;

    /// Write all of `buf` and return the number of bytes written.
    fn write_bytes(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl<C: SerialChannel + ?Sized + Send> SerialChannel for &mut C {
    fn read_byte(&mut self) -> impl Future<Output = io::Result<u8>> + Send {
        (**self).read_byte()
    }

    fn write_bytes(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).write_bytes(buf)
    }
}

// ---------------------------------------------------------------------------
// StreamChannel
// ---------------------------------------------------------------------------

/// Adapts a tokio byte stream to [`SerialChannel`].
#[derive(Debug)]
pub struct StreamChannel<S> {
    inner: S,
}

impl<S> StreamChannel<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> SerialChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_byte(&mut self) -> io::Result<u8> {
        // A single-byte read either completes or consumes nothing.
        self.inner.read_u8().await
    }

    async fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        Ok(buf.len())
    }
}

/// A serial port opened as a [`SerialChannel`].
pub type SerialPort = StreamChannel<SerialStream>;

/// Open `path` at `baud_rate`, 8 data bits, no parity, one stop bit.
///
/// Dropping the returned channel closes the port.
pub fn open_serial(path: &str, baud_rate: u32) -> io::Result<SerialPort> {
    let stream = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(io::Error::from)?;
    log::info!("[serial] opened {path} at {baud_rate} baud");
    Ok(StreamChannel::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_halves_exchange_bytes() {
        let (a, b) = tokio::io::duplex(64);
        let mut a = StreamChannel::new(a);
        let mut b = StreamChannel::new(b);

        assert_eq!(a.write_bytes(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(b.read_byte().await.unwrap(), 1);
        assert_eq!(b.read_byte().await.unwrap(), 2);

        // Through a mutable reference.
        let mut by_ref = &mut b;
        assert_eq!(SerialChannel::read_byte(&mut by_ref).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn closed_peer_reports_eof() {
        let (a, b) = tokio::io::duplex(8);
        drop(a);
        let mut b = StreamChannel::new(b);
        let err = b.read_byte().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_port_is_an_io_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(open_serial("/dev/does-not-exist-serial-link", 38400).is_err());
    }
}
