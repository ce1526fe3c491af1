//! `serial-link`: reliable file transfer over a raw serial line.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────────────────────┐
//!  │     transfer (START/DATA/END)      │
//!  └────┬───────────────────────────────┘
//!       │ packets (TLV)
//!  ┌────▼──────┐  I-frames  ┌──────────┐
//!  │  Sender   │───────────▶│ Receiver │
//!  └────┬──────┘            └─────┬────┘
//!       │        RR / REJ         │
//!       │◀────────────────────────┘
//!       │
//!  ┌────▼───────────────────────────────┐
//!  │            Connection              │
//!  │ (owns state machine, timer, chan)  │
//!  └────┬───────────────────────────────┘
//!       │ stuffed frames
//!  ┌────▼──────────┐
//!  │ SerialChannel │  (serial port, duplex pipe or Simulator)
//!  └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]      frame wire format, byte stuffing, incremental decoder
//! - [`packet`]     application packet format (START / DATA / END)
//! - [`connection`] link establishment, stop-and-wait ARQ, teardown
//! - [`state`]      finite-state-machine and role types
//! - [`sender`]     stop-and-wait outbound frame state
//! - [`receiver`]   stop-and-wait inbound acceptance
//! - [`timer`]      retransmit timer
//! - [`config`]     link parameters
//! - [`channel`]    byte-level serial abstraction
//! - [`simulator`]  lossy/corrupting line for testing
//! - [`transfer`]   file send / receive on top of a connection

pub mod channel;
pub mod config;
pub mod connection;
pub mod frame;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod transfer;

pub use channel::{open_serial, SerialChannel, StreamChannel};
pub use config::LinkConfig;
pub use connection::{Connection, Delivery, LinkError, Teardown};
pub use state::{ConnectionState, Role};
pub use transfer::{receive_file, send_file, ReceivedFile, TransferError};
