//! Outbound I-frame state for stop-and-wait reliability.
//!
//! [`Sender`] tracks the send sequence bit and the single in-flight frame.
//! It does **not** touch the channel; [`crate::connection::Connection`] calls
//! these methods and owns the actual transmit/await loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** I-frame is in flight at any moment (`unacked`).
//! - A new frame may only be sent once `unacked` is `None`.
//! - On RR(1 − Ns): toggle Ns; clear `unacked`.
//! - On REJ(Ns) or timeout: increment `tx_count`; resend the same frame.

use crate::frame::{Control, Seq};

// ---------------------------------------------------------------------------
// RetransmitEntry
// ---------------------------------------------------------------------------

/// An I-frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// Sequence bit the frame carries.
    pub seq: Seq,
    /// How many times this frame has been transmitted (1 = first send).
    pub tx_count: u32,
}

/// How a reply relates to the in-flight frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// RR(1 − Ns): the frame was accepted.
    Acked,
    /// REJ(Ns): the receiver saw a damaged copy; resend now.
    Rejected,
    /// Anything else (old RR, REJ for the other bit, nothing in flight).
    Stale,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit of the **next** I-frame, or of the one in flight.
    pub ns: Seq,

    /// The in-flight frame, or `None` when the sender is idle.
    pub unacked: Option<RetransmitEntry>,

    /// I-frames acknowledged over the life of the connection.
    pub acked: u64,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control field for the next I-frame.
    pub fn control(&self) -> Control {
        Control::Info(self.ns)
    }

    /// Mark the next I-frame as transmitted once.
    pub fn record_sent(&mut self) {
        debug_assert!(
            self.unacked.is_none(),
            "record_sent called while a frame is already in flight"
        );
        self.unacked = Some(RetransmitEntry {
            seq: self.ns,
            tx_count: 1,
        });
    }

    /// Increment the transmission count of the in-flight frame.
    pub fn on_retransmit(&mut self) {
        if let Some(ref mut e) = self.unacked {
            e.tx_count += 1;
        }
    }

    /// Classify a supervisory reply against the in-flight frame.
    ///
    /// On [`ReplyOutcome::Acked`] the sequence bit toggles and the slot is
    /// cleared.
    pub fn on_reply(&mut self, reply: Control) -> ReplyOutcome {
        let Some(seq) = self.unacked.as_ref().map(|e| e.seq) else {
            return ReplyOutcome::Stale;
        };
        match reply {
            Control::Rr(nr) if nr == seq.next() => {
                self.ns = self.ns.next();
                self.unacked = None;
                self.acked += 1;
                ReplyOutcome::Acked
            }
            Control::Rej(nr) if nr == seq => ReplyOutcome::Rejected,
            _ => ReplyOutcome::Stale,
        }
    }

    /// Give up on the in-flight frame without advancing Ns.
    pub fn abandon(&mut self) {
        self.unacked = None;
    }

    /// Transmissions of the in-flight frame, or `0` when idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    pub fn has_unacked(&self) -> bool {
        self.unacked.is_some()
    }
}
