//! Connection finite-state machine types.
//!
//! This module defines the states a [`crate::connection::Connection`] can
//! occupy and the two roles a peer can play.  Transitions are driven by
//! [`crate::connection`]; nothing here performs I/O.
//!
//! ```text
//!  Closed ──open()──▶ Establishing ──SET/UA──▶ Open
//!    ▲                     │                    │
//!    │      retries spent  │           close()  │
//!    ├─────────────────────┘                    ▼
//!    └──────────────── DISC/DISC/UA ─────── Closing
//! ```

use std::fmt;

use crate::frame::{address, Control};

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link exists; initial and final state.
    #[default]
    Closed,
    /// Initiator waiting for UA, or Responder waiting for SET.
    Establishing,
    /// Handshake complete; I-frames may flow.
    Open,
    /// DISC exchange in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which end of the link this peer is.
///
/// The Initiator opens and closes the link; the Responder answers.  Either
/// side may send I-frames once the link is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    /// Address this role stamps on the commands it sends.
    pub fn command_address(self) -> u8 {
        match self {
            Role::Initiator => address::INITIATOR,
            Role::Responder => address::RESPONDER,
        }
    }

    /// Address for an outgoing frame.
    ///
    /// Commands carry our own command address; replies carry the address of
    /// the commands they answer, i.e. the peer's.
    pub fn outgoing_address(self, control: Control) -> u8 {
        if control.is_command() {
            self.command_address()
        } else {
            self.peer().command_address()
        }
    }

    /// Address an incoming frame must carry to have come from the peer.
    pub fn incoming_address(self, control: Control) -> u8 {
        self.peer().outgoing_address(control)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Seq;

    #[test]
    fn handshake_frames_share_the_initiator_address() {
        // SET from the Initiator and the UA answering it both carry 0x03.
        assert_eq!(Role::Initiator.outgoing_address(Control::Set), 0x03);
        assert_eq!(Role::Responder.outgoing_address(Control::Ua), 0x03);
        assert_eq!(Role::Responder.incoming_address(Control::Set), 0x03);
        assert_eq!(Role::Initiator.incoming_address(Control::Ua), 0x03);
    }

    #[test]
    fn responder_disc_and_final_ua_use_the_responder_address() {
        assert_eq!(Role::Responder.outgoing_address(Control::Disc), 0x01);
        assert_eq!(Role::Initiator.outgoing_address(Control::Ua), 0x01);
        assert_eq!(Role::Initiator.incoming_address(Control::Disc), 0x01);
    }

    #[test]
    fn acknowledgements_answer_the_data_sender() {
        // Responder sends data: I-frames at 0x01, Initiator's RR at 0x01.
        assert_eq!(Role::Responder.outgoing_address(Control::Info(Seq::One)), 0x01);
        assert_eq!(Role::Initiator.outgoing_address(Control::Rr(Seq::Zero)), 0x01);
        assert_eq!(Role::Responder.incoming_address(Control::Rr(Seq::Zero)), 0x01);
    }

    #[test]
    fn default_state_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert_eq!(ConnectionState::Open.to_string(), "Open");
    }
}
