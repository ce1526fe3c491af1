//! Inbound I-frame acceptance for stop-and-wait.
//!
//! The [`Receiver`] decides what happens to an I-frame *after* the decoder
//! has verified its header and *before* the payload reaches the caller:
//! - Damaged payloads (BCC2 mismatch) are rejected with REJ(expected).
//! - A frame carrying the expected bit is delivered and acknowledged with
//!   RR(1 − expected).
//! - A frame carrying the previous bit is a retransmission whose RR was lost;
//!   it is acknowledged again but never redelivered.
//!
//! The [`Receiver`] does **not** send replies itself; it returns the control
//! field that [`crate::connection::Connection`] should send.

use crate::frame::{Control, Seq};

/// Outcome of an inbound I-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New data: hand the payload up, then send `reply`.
    Deliver { reply: Control },
    /// Already delivered: send `reply`, drop the payload.
    Duplicate { reply: Control },
    /// Payload damaged: send `reply`, drop the payload.
    Reject { reply: Control },
}

impl Verdict {
    pub fn reply(self) -> Control {
        match self {
            Verdict::Deliver { reply } | Verdict::Duplicate { reply } | Verdict::Reject { reply } => {
                reply
            }
        }
    }
}

/// Manages the receive side of a single connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Sequence bit of the next new I-frame.
    pub expected: Seq,
    /// Payloads delivered so far.
    pub delivered: u64,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an I-frame carrying `seq` whose BCC2 check gave `intact`.
    pub fn on_frame(&mut self, seq: Seq, intact: bool) -> Verdict {
        if !intact {
            return Verdict::Reject {
                reply: Control::Rej(self.expected),
            };
        }
        if seq == self.expected {
            self.expected = self.expected.next();
            self.delivered += 1;
            Verdict::Deliver {
                reply: Control::Rr(self.expected),
            }
        } else {
            Verdict::Duplicate {
                reply: Control::Rr(self.expected),
            }
        }
    }

    /// `true` if an I-frame carrying `seq` would be a retransmission.
    pub fn is_duplicate(&self, seq: Seq) -> bool {
        seq != self.expected
    }

    /// RR for the current expected bit, used to re-acknowledge.
    pub fn ack(&self) -> Control {
        Control::Rr(self.expected)
    }
}
