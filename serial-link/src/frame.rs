//! Wire format for link frames.
//!
//! Every unit exchanged over the serial line is a [`Frame`].  This module is
//! responsible for:
//! - Defining the control-byte and address encodings.
//! - Encoding a frame into a byte-stuffed, FLAG-delimited byte sequence.
//! - Decoding a raw byte stream back into frames, one byte at a time, via the
//!   incremental [`Decoder`].
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! ```text
//!  +------+---------+---------+------+- - - - - - - -+------+------+
//!  | FLAG | Address | Control | BCC1 | Information…  | BCC2 | FLAG |
//!  +------+---------+---------+------+- - - - - - - -+------+------+
//!                                     \_____ I-frames only _____/
//! ```
//!
//! BCC1 = Address ⊕ Control.  BCC2 = XOR of every information byte, computed
//! before stuffing.  Everything between the two FLAGs is byte-stuffed: FLAG
//! becomes `ESC 0x5E` and ESC becomes `ESC 0x5D`.

use std::fmt;

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;
/// Escape byte introducing a stuffed byte.
pub const ESC: u8 = 0x7D;
/// XOR mask applied to a stuffed byte (`FLAG ^ ESC_MASK == 0x5E`).
pub const ESC_MASK: u8 = 0x20;

/// Address byte values.
pub mod address {
    /// Commands from the Initiator, replies from the Responder.
    pub const INITIATOR: u8 = 0x03;
    /// Commands from the Responder, replies from the Initiator.
    pub const RESPONDER: u8 = 0x01;
}

/// Raw control byte values.
pub mod control {
    pub const SET: u8 = 0x03;
    pub const UA: u8 = 0x07;
    pub const DISC: u8 = 0x0B;
    pub const I_0: u8 = 0x00;
    pub const I_1: u8 = 0x40;
    pub const RR_0: u8 = 0x05;
    pub const RR_1: u8 = 0x85;
    pub const REJ_0: u8 = 0x01;
    pub const REJ_1: u8 = 0x81;
}

// ---------------------------------------------------------------------------
// Sequence bit
// ---------------------------------------------------------------------------

/// One-bit sequence number used by stop-and-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seq {
    #[default]
    Zero,
    One,
}

impl Seq {
    /// The other sequence value.
    pub fn next(self) -> Self {
        match self {
            Seq::Zero => Seq::One,
            Seq::One => Seq::Zero,
        }
    }

    pub fn as_bit(self) -> u8 {
        match self {
            Seq::Zero => 0,
            Seq::One => 1,
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_bit())
    }
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

/// Decoded meaning of a control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Set,
    Ua,
    Disc,
    /// Information frame carrying `N(s)`.
    Info(Seq),
    /// Receiver ready, asking for `N(r)`.
    Rr(Seq),
    /// Reject, asking for a retransmission of `N(r)`.
    Rej(Seq),
}

impl Control {
    pub fn to_byte(self) -> u8 {
        match self {
            Control::Set => control::SET,
            Control::Ua => control::UA,
            Control::Disc => control::DISC,
            Control::Info(Seq::Zero) => control::I_0,
            Control::Info(Seq::One) => control::I_1,
            Control::Rr(Seq::Zero) => control::RR_0,
            Control::Rr(Seq::One) => control::RR_1,
            Control::Rej(Seq::Zero) => control::REJ_0,
            Control::Rej(Seq::One) => control::REJ_1,
        }
    }

    /// Parse a control byte; `None` for values this protocol never sends.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            control::SET => Control::Set,
            control::UA => Control::Ua,
            control::DISC => Control::Disc,
            control::I_0 => Control::Info(Seq::Zero),
            control::I_1 => Control::Info(Seq::One),
            control::RR_0 => Control::Rr(Seq::Zero),
            control::RR_1 => Control::Rr(Seq::One),
            control::REJ_0 => Control::Rej(Seq::Zero),
            control::REJ_1 => Control::Rej(Seq::One),
            _ => return None,
        })
    }

    /// SET, DISC and I-frames are commands; UA, RR and REJ are replies.
    pub fn is_command(self) -> bool {
        matches!(self, Control::Set | Control::Disc | Control::Info(_))
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Set => write!(f, "SET"),
            Control::Ua => write!(f, "UA"),
            Control::Disc => write!(f, "DISC"),
            Control::Info(s) => write!(f, "I({s})"),
            Control::Rr(s) => write!(f, "RR({s})"),
            Control::Rej(s) => write!(f, "REJ({s})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Information field of an I-frame, as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub payload: Vec<u8>,
    /// BCC2 byte received after the payload.
    pub bcc2: u8,
}

impl Info {
    /// `true` when the received BCC2 matches the payload.
    pub fn is_intact(&self) -> bool {
        bcc2(&self.payload) == self.bcc2
    }
}

/// A frame whose header passed the BCC1 check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub control: u8,
    /// `Some` for frames that carried an information field.
    pub info: Option<Info>,
}

/// XOR of every byte in `payload`.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode a frame.
///
/// `payload` is `None` for supervisory and unnumbered frames, which carry no
/// information field and no BCC2.  `Some(&[])` produces an I-frame with an
/// empty information field (BCC2 = 0).
pub fn encode(address: u8, control: u8, payload: Option<&[u8]>) -> Vec<u8> {
    let body_len = payload.map_or(0, |p| p.len() + 1);
    let mut out = Vec::with_capacity(2 + (3 + body_len) * 2);

    out.push(FLAG);
    stuff(&mut out, address);
    stuff(&mut out, control);
    stuff(&mut out, address ^ control);
    if let Some(payload) = payload {
        for &b in payload {
            stuff(&mut out, b);
        }
        stuff(&mut out, bcc2(payload));
    }
    out.push(FLAG);
    out
}

#[inline]
fn stuff(out: &mut Vec<u8>, byte: u8) {
    match byte {
        FLAG | ESC => {
            out.push(ESC);
            out.push(byte ^ ESC_MASK);
        }
        _ => out.push(byte),
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Position of the [`Decoder`] within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Hunting for an opening FLAG.
    Start,
    /// FLAG seen; next content byte is the address.
    FlagSeen,
    AddressSeen,
    /// Address and control seen; next content byte is BCC1.
    ControlSeen,
    /// Header verified; accumulating information bytes.
    InPayload,
}

/// Incremental frame decoder.
///
/// Feed it one byte at a time with [`push`](Decoder::push); it returns a
/// [`Frame`] whenever a closing FLAG completes a frame whose BCC1 verified.
/// Every byte either advances or resets the state, so garbage on the line can
/// delay a frame but never wedge the decoder.
///
/// An ESC sets an escape-pending flag that applies to the next byte wherever
/// it falls (header or payload).  The only valid continuations are `0x5E` and
/// `0x5D`; anything else drops the frame.
#[derive(Debug)]
pub struct Decoder {
    state: DecodeState,
    escaping: bool,
    address: u8,
    control: u8,
    buf: Vec<u8>,
    /// Largest information field accepted (BCC2 excluded).
    max_payload: usize,
}

impl Decoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            state: DecodeState::Start,
            escaping: false,
            address: 0,
            control: 0,
            buf: Vec::with_capacity(max_payload + 1),
            max_payload,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = DecodeState::Start;
        self.escaping = false;
        self.buf.clear();
    }

    /// Consume one byte from the line.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if byte == FLAG {
            return self.on_flag();
        }
        if self.state == DecodeState::Start {
            return None;
        }

        let byte = if self.escaping {
            self.escaping = false;
            match byte {
                0x5E | 0x5D => byte ^ ESC_MASK,
                _ => {
                    log::trace!("[frame] invalid escape 0x{byte:02x}; dropping frame");
                    self.reset();
                    return None;
                }
            }
        } else if byte == ESC {
            self.escaping = true;
            return None;
        } else {
            byte
        };

        self.on_content(byte);
        None
    }

    fn on_flag(&mut self) -> Option<Frame> {
        let escaping = std::mem::replace(&mut self.escaping, false);
        let state = std::mem::replace(&mut self.state, DecodeState::FlagSeen);

        match state {
            DecodeState::InPayload if !escaping => {
                let info = self.buf.pop().map(|bcc2| Info {
                    payload: std::mem::take(&mut self.buf),
                    bcc2,
                });
                self.buf.clear();
                Some(Frame {
                    address: self.address,
                    control: self.control,
                    info,
                })
            }
            DecodeState::Start | DecodeState::FlagSeen => None,
            _ => {
                // Partial frame; this FLAG may open the next one.
                log::trace!("[frame] FLAG in {state:?}; resynchronising");
                self.buf.clear();
                None
            }
        }
    }

    fn on_content(&mut self, byte: u8) {
        match self.state {
            DecodeState::Start => {}
            DecodeState::FlagSeen => {
                self.address = byte;
                self.state = DecodeState::AddressSeen;
            }
            DecodeState::AddressSeen => {
                self.control = byte;
                self.state = DecodeState::ControlSeen;
            }
            DecodeState::ControlSeen => {
                if byte == self.address ^ self.control {
                    self.buf.clear();
                    self.state = DecodeState::InPayload;
                } else {
                    log::trace!(
                        "[frame] BCC1 mismatch a=0x{:02x} c=0x{:02x} bcc1=0x{byte:02x}",
                        self.address,
                        self.control
                    );
                    self.reset();
                }
            }
            DecodeState::InPayload => {
                // +1 for the trailing BCC2.
                if self.buf.len() > self.max_payload {
                    log::trace!("[frame] oversized frame; dropping");
                    self.reset();
                } else {
                    self.buf.push(byte);
                }
            }
        }
    }
}
