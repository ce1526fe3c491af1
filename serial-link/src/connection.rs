//! Per-link lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one point-to-point session
//! over a [`SerialChannel`].  Its responsibilities are:
//! - Driving the link FSM (see [`crate::state`]): SET/UA to open, DISC/DISC/UA
//!   to close.
//! - Running the stop-and-wait ARQ engine: [`Connection::send`] transmits one
//!   I-frame and waits for its RR; [`Connection::receive`] accepts one I-frame
//!   and acknowledges it.
//! - Coordinating [`crate::sender`] and [`crate::receiver`] state.
//! - Arming and cancelling the retransmit [`Timer`].
//!
//! # Waiting for a reply
//!
//! Every wait is a `tokio::select!` between the next byte from the channel and
//! the timer.  The timer is therefore observed before each decoder step and
//! never interrupts a frame mid-processing.  Frames that fail the BCC1 check,
//! carry an unknown control byte or the wrong address are dropped silently;
//! the peer's own timer recovers them.
//!
//! # Retry budget
//!
//! `LinkConfig::retries` is the total number of transmissions of a SET, DISC
//! or I-frame.  Timeout- and REJ-triggered retransmissions both draw from it.

use std::fmt;

use crate::channel::SerialChannel;
use crate::config::{ConfigError, LinkConfig};
use crate::frame::{self, Control, Decoder, Frame, Seq};
use crate::receiver::{Receiver, Verdict};
use crate::sender::{ReplyOutcome, Sender};
use crate::state::{ConnectionState, Role};
use crate::timer::Timer;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Errors surfaced by the link layer.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Handshake got no UA within the retry budget.
    #[error("connection not established after {attempts} SET transmissions")]
    Connection { attempts: u32 },
    /// Teardown did not complete within the retry budget.
    #[error("disconnect not completed after {attempts} attempts")]
    Close { attempts: u32 },
    /// An I-frame was not acknowledged within the retry budget.
    #[error("frame not acknowledged after {attempts} transmissions")]
    Transmit { attempts: u32 },
    /// An I-frame arrived with a bad BCC2 and was rejected.  Not fatal.
    #[error("I({seq}) failed its payload check; REJ sent")]
    Receive { seq: Seq },
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("operation requires an open link (state: {0})")]
    NotOpen(ConnectionState),
    #[error("serial I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// `false` only for errors after which the same call may simply be
    /// repeated on the same link.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::Receive { .. })
    }
}

/// What [`Connection::receive`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A new payload, in order.
    Data(Vec<u8>),
    /// A retransmission of the previous payload; re-acknowledged, not
    /// redelivered.  Call `receive` again.
    Duplicate,
}

/// How a successful [`Connection::close`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Both sides exchanged DISC and the final UA.
    Clean,
    /// Responder only: DISC exchanged but the Initiator's UA never arrived.
    /// The link is closed anyway.
    MissingUa,
}

/// Counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub rejects_sent: u64,
    pub rejects_received: u64,
    pub duplicates: u64,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} retransmissions={} timeouts={} rej_sent={} rej_received={} duplicates={}",
            self.frames_sent,
            self.retransmissions,
            self.timeouts,
            self.rejects_sent,
            self.rejects_received,
            self.duplicates
        )
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One end of a stop-and-wait link.
///
/// Obtain one with [`Connection::new`], bring the link up with
/// [`open`](Connection::open), exchange payloads with
/// [`send`](Connection::send) / [`receive`](Connection::receive), and tear
/// it down with [`close`](Connection::close), which consumes the connection
/// and releases the channel.
pub struct Connection<C> {
    /// Current FSM state.
    pub state: ConnectionState,
    /// Outbound stop-and-wait state.
    pub sender: Sender,
    /// Inbound acceptance state.
    pub receiver: Receiver,
    role: Role,
    config: LinkConfig,
    channel: C,
    decoder: Decoder,
    timer: Timer,
    stats: LinkStats,
    /// Set by the Initiator's handshake; a single late UA is tolerated
    /// during the first `send` after it.
    late_ua_tolerated: bool,
}

impl<C: SerialChannel> Connection<C> {
    /// Create a connection in the [`ConnectionState::Closed`] state.
    pub fn new(channel: C, role: Role, config: LinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: ConnectionState::Closed,
            sender: Sender::new(),
            receiver: Receiver::new(),
            role,
            decoder: Decoder::new(config.max_payload),
            timer: Timer::new(config.timeout),
            stats: LinkStats::default(),
            late_ua_tolerated: false,
            config,
            channel,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    // -----------------------------------------------------------------------
    // Establishment
    // -----------------------------------------------------------------------

    /// Bring the link up.
    ///
    /// The Initiator sends SET until a UA arrives or the retry budget is
    /// spent.  The Responder waits, without a timer, for a SET and answers
    /// with UA.  On failure the connection stays [`ConnectionState::Closed`].
    pub async fn open(&mut self) -> Result<(), LinkError> {
        if self.state != ConnectionState::Closed {
            return Err(LinkError::NotOpen(self.state));
        }

        self.state = ConnectionState::Establishing;
        self.decoder.reset();
        let result = match self.role {
            Role::Initiator => self.connect().await,
            Role::Responder => self.accept().await,
        };
        self.timer.cancel();

        match result {
            Ok(()) => {
                self.state = ConnectionState::Open;
                self.sender = Sender::new();
                self.receiver = Receiver::new();
                log::info!("[link] open as {}", self.role);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let set = self.encode_control(Control::Set);
        let retries = self.config.retries;

        for attempt in 1..=retries {
            if attempt > 1 {
                self.stats.retransmissions += 1;
            }
            self.transmit(&set).await?;
            log::debug!("[link] → SET (attempt {attempt}/{retries})");
            self.timer.arm();

            while let Some(frame) = self.next_frame().await? {
                if self.classify(&frame) == Some(Control::Ua) {
                    log::debug!("[link] ← UA");
                    self.late_ua_tolerated = true;
                    return Ok(());
                }
            }
            self.stats.timeouts += 1;
            log::warn!("[link] no UA within {:?} (attempt {attempt}/{retries})", self.config.timeout);
        }

        log::error!("[link] handshake failed after {retries} attempts");
        Err(LinkError::Connection { attempts: retries })
    }

    async fn accept(&mut self) -> Result<(), LinkError> {
        self.timer.cancel();
        log::debug!("[link] waiting for SET");
        loop {
            let Some(frame) = self.next_frame().await? else {
                continue;
            };
            if self.classify(&frame) == Some(Control::Set) {
                log::debug!("[link] ← SET; → UA");
                return self.send_control(Control::Ua).await;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send one payload as an I-frame and wait for its acknowledgement.
    ///
    /// Returns the number of payload bytes delivered.  A REJ triggers an
    /// immediate retransmission; a timeout triggers a retransmission of the
    /// unchanged frame.  When `retries` transmissions go unacknowledged the
    /// call fails with [`LinkError::Transmit`]; the link should then be
    /// closed.  Whatever the error, the frame is no longer in flight
    /// afterwards and the next `send` reuses its sequence bit.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        self.ensure_open()?;
        if payload.len() > self.config.max_payload {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max: self.config.max_payload,
            });
        }

        self.sender.record_sent();
        let result = self.send_until_acked(payload).await;
        if result.is_err() {
            self.timer.cancel();
            self.sender.abandon();
        }
        result
    }

    async fn send_until_acked(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        let control = self.sender.control();
        let frame = frame::encode(
            self.role.outgoing_address(control),
            control.to_byte(),
            Some(payload),
        );
        let retries = self.config.retries;

        for attempt in 1..=retries {
            if attempt > 1 {
                self.sender.on_retransmit();
                self.stats.retransmissions += 1;
            }
            self.transmit(&frame).await?;
            log::debug!(
                "[arq] → {control} len={} (transmission {}/{retries})",
                payload.len(),
                self.sender.retransmit_count()
            );
            self.timer.arm();

            loop {
                let Some(reply) = self.next_frame().await? else {
                    self.stats.timeouts += 1;
                    log::warn!("[arq] timeout waiting for ack of {control}");
                    break;
                };
                let Some(reply) = self.classify(&reply) else {
                    continue;
                };

                match reply {
                    Control::Rr(_) | Control::Rej(_) => match self.sender.on_reply(reply) {
                        ReplyOutcome::Acked => {
                            self.timer.cancel();
                            self.late_ua_tolerated = false;
                            log::debug!("[arq] ← {reply}");
                            return Ok(payload.len());
                        }
                        ReplyOutcome::Rejected => {
                            self.stats.rejects_received += 1;
                            log::debug!("[arq] ← {reply}; retransmitting");
                            break;
                        }
                        ReplyOutcome::Stale => log::trace!("[arq] ← stale {reply}"),
                    },
                    Control::Ua if self.late_ua_tolerated => {
                        self.late_ua_tolerated = false;
                        log::debug!("[arq] ← late UA from handshake; ignored");
                    }
                    other => self.answer_stray(other).await?,
                }
            }
        }

        log::error!("[arq] {control} unacknowledged after {retries} transmissions");
        Err(LinkError::Transmit { attempts: retries })
    }

    /// Wait for the next I-frame from the peer.
    ///
    /// Returns [`Delivery::Data`] for a new in-order payload and
    /// [`Delivery::Duplicate`] for a retransmission of the previous one (both
    /// are acknowledged).  A payload that fails its BCC2 check is answered
    /// with REJ and reported as [`LinkError::Receive`], which is not fatal.
    pub async fn receive(&mut self) -> Result<Delivery, LinkError> {
        self.ensure_open()?;
        self.timer.cancel();

        loop {
            let Some(frame) = self.next_frame().await? else {
                continue;
            };
            let Some(control) = self.classify(&frame) else {
                continue;
            };
            let (Control::Info(seq), Some(info)) = (control, frame.info) else {
                self.answer_stray(control).await?;
                continue;
            };

            let verdict = self.receiver.on_frame(seq, info.is_intact());
            let reply = verdict.reply();
            match verdict {
                Verdict::Deliver { .. } => {
                    log::debug!("[arq] ← I({seq}) len={}; → {reply}", info.payload.len());
                    self.send_control(reply).await?;
                    return Ok(Delivery::Data(info.payload));
                }
                Verdict::Duplicate { .. } => {
                    self.stats.duplicates += 1;
                    log::debug!("[arq] ← duplicate I({seq}); → {reply}");
                    self.send_control(reply).await?;
                    return Ok(Delivery::Duplicate);
                }
                Verdict::Reject { .. } => {
                    self.stats.rejects_sent += 1;
                    log::warn!("[arq] ← I({seq}) with bad BCC2; → {reply}");
                    self.send_control(reply).await?;
                    return Err(LinkError::Receive { seq });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Tear the link down and release the channel.
    ///
    /// The Initiator sends DISC until the Responder's DISC arrives, then
    /// answers with UA.  The Responder waits for DISC, answers with its own,
    /// and waits one more timeout for the final UA; if that UA never comes
    /// the link is still closed and [`Teardown::MissingUa`] is returned.
    /// The channel is dropped whatever the outcome.
    pub async fn close(mut self) -> Result<Teardown, LinkError> {
        if self.state != ConnectionState::Open {
            log::debug!("[link] close in state {}; releasing channel", self.state);
            self.state = ConnectionState::Closed;
            return Ok(Teardown::Clean);
        }

        self.state = ConnectionState::Closing;
        let result = match self.role {
            Role::Initiator => self.disconnect().await,
            Role::Responder => self.await_disconnect().await,
        };
        self.timer.cancel();
        self.state = ConnectionState::Closed;

        match &result {
            Ok(Teardown::Clean) => log::info!("[link] closed ({})", self.stats),
            Ok(Teardown::MissingUa) => {
                log::warn!("[link] closed without final UA ({})", self.stats)
            }
            Err(e) => log::error!("[link] close failed: {e} ({})", self.stats),
        }
        result
    }

    async fn disconnect(&mut self) -> Result<Teardown, LinkError> {
        let disc = self.encode_control(Control::Disc);
        let retries = self.config.retries;

        for attempt in 1..=retries {
            if attempt > 1 {
                self.stats.retransmissions += 1;
            }
            self.transmit(&disc).await?;
            log::debug!("[link] → DISC (attempt {attempt}/{retries})");
            self.timer.arm();

            while let Some(frame) = self.next_frame().await? {
                match self.classify(&frame) {
                    Some(Control::Disc) => {
                        self.timer.cancel();
                        log::debug!("[link] ← DISC; → UA");
                        self.send_control(Control::Ua).await?;
                        return Ok(Teardown::Clean);
                    }
                    Some(other) => self.answer_stray(other).await?,
                    None => {}
                }
            }
            self.stats.timeouts += 1;
            log::warn!("[link] no DISC reply (attempt {attempt}/{retries})");
        }

        Err(LinkError::Close { attempts: retries })
    }

    async fn await_disconnect(&mut self) -> Result<Teardown, LinkError> {
        let retries = self.config.retries;

        let mut got_disc = false;
        'wait: for window in 1..=retries {
            self.timer.arm();
            while let Some(frame) = self.next_frame().await? {
                match self.classify(&frame) {
                    Some(Control::Disc) => {
                        got_disc = true;
                        break 'wait;
                    }
                    Some(other) => self.answer_stray(other).await?,
                    None => {}
                }
            }
            self.stats.timeouts += 1;
            log::warn!("[link] waiting for DISC (window {window}/{retries})");
        }
        if !got_disc {
            return Err(LinkError::Close { attempts: retries });
        }

        // Our DISC may be lost; the Initiator then repeats its own.
        let disc = self.encode_control(Control::Disc);
        for reply in 1..=retries {
            if reply > 1 {
                self.stats.retransmissions += 1;
            }
            self.transmit(&disc).await?;
            log::debug!("[link] ← DISC; → DISC");
            self.timer.arm();

            let mut repeated = false;
            while let Some(frame) = self.next_frame().await? {
                match self.classify(&frame) {
                    Some(Control::Ua) => {
                        log::debug!("[link] ← UA");
                        return Ok(Teardown::Clean);
                    }
                    Some(Control::Disc) => {
                        repeated = true;
                        break;
                    }
                    _ => {}
                }
            }
            if !repeated {
                self.stats.timeouts += 1;
                break;
            }
        }

        Ok(Teardown::MissingUa)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), LinkError> {
        if self.state == ConnectionState::Open {
            Ok(())
        } else {
            Err(LinkError::NotOpen(self.state))
        }
    }

    /// Read bytes until a frame completes or the armed timer expires.
    ///
    /// Returns `None` on expiry.  With the timer cancelled this only returns
    /// on a frame or an I/O error.
    async fn next_frame(&mut self) -> Result<Option<Frame>, LinkError> {
        loop {
            if self.timer.is_expired() {
                self.timer.cancel();
                return Ok(None);
            }
            tokio::select! {
                biased;
                _ = self.timer.expired() => {
                    self.timer.cancel();
                    return Ok(None);
                }
                byte = self.channel.read_byte() => {
                    if let Some(frame) = self.decoder.push(byte?) {
                        return Ok(Some(frame));
                    }
                }
            }
        }
    }

    /// Interpret a frame from the peer, or `None` if it is not one we accept.
    fn classify(&self, frame: &Frame) -> Option<Control> {
        let control = Control::from_byte(frame.control)?;
        if frame.address != self.role.incoming_address(control) {
            log::trace!("[link] {control} with foreign address 0x{:02x}", frame.address);
            return None;
        }
        // Only I-frames carry an information field.
        if matches!(control, Control::Info(_)) != frame.info.is_some() {
            return None;
        }
        Some(control)
    }

    /// Answer frames that show the peer missed one of our replies.
    ///
    /// - SET while open: our UA was lost; repeat it.
    /// - Retransmitted I-frame: our RR was lost; repeat it.  (Only reached
    ///   outside `receive`, i.e. while sending or closing.)
    async fn answer_stray(&mut self, control: Control) -> Result<(), LinkError> {
        match control {
            Control::Set if self.role == Role::Responder => {
                log::debug!("[link] ← repeated SET; → UA");
                self.send_control(Control::Ua).await
            }
            Control::Info(seq) if self.receiver.is_duplicate(seq) => {
                let ack = self.receiver.ack();
                self.stats.duplicates += 1;
                log::debug!("[arq] ← duplicate I({seq}); → {ack}");
                self.send_control(ack).await
            }
            other => {
                log::trace!("[link] ignoring {other} in state {}", self.state);
                Ok(())
            }
        }
    }

    fn encode_control(&self, control: Control) -> Vec<u8> {
        frame::encode(self.role.outgoing_address(control), control.to_byte(), None)
    }

    async fn send_control(&mut self, control: Control) -> Result<(), LinkError> {
        let bytes = self.encode_control(control);
        self.transmit(&bytes).await
    }

    async fn transmit(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.channel.write_bytes(bytes).await?;
        self.stats.frames_sent += 1;
        Ok(())
    }
}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("ns", &self.sender.ns)
            .field("expected", &self.receiver.expected)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::channel::StreamChannel;
    use tokio::io::DuplexStream;

    /// Channel whose `fail_on`-th write (1-based) returns an error.
    struct FlakyWrites {
        inner: StreamChannel<DuplexStream>,
        writes: usize,
        fail_on: usize,
    }

    impl SerialChannel for FlakyWrites {
        async fn read_byte(&mut self) -> io::Result<u8> {
            self.inner.read_byte().await
        }

        async fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            if self.writes == self.fail_on {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "line glitch"));
            }
            self.inner.write_bytes(buf).await
        }
    }

    fn conn(role: Role) -> (Connection<StreamChannel<DuplexStream>>, DuplexStream) {
        let (a, b) = tokio::io::duplex(1024);
        let conn = Connection::new(StreamChannel::new(a), role, LinkConfig::default()).unwrap();
        (conn, b)
    }

    #[tokio::test]
    async fn send_requires_open_link() {
        let (mut c, _peer) = conn(Role::Initiator);
        assert!(matches!(
            c.send(b"x").await,
            Err(LinkError::NotOpen(ConnectionState::Closed))
        ));
        assert!(matches!(c.receive().await, Err(LinkError::NotOpen(_))));
    }

    #[tokio::test]
    async fn oversized_payload_is_refused_before_transmission() {
        let (mut c, _peer) = conn(Role::Initiator);
        c.state = ConnectionState::Open;
        let big = vec![0u8; c.config().max_payload + 1];
        assert!(matches!(
            c.send(&big).await,
            Err(LinkError::PayloadTooLarge { len: 1025, max: 1024 })
        ));
        assert_eq!(c.stats().frames_sent, 0);
    }

    #[tokio::test]
    async fn write_error_releases_the_in_flight_frame() {
        let (a, b) = tokio::io::duplex(1024);
        let flaky = FlakyWrites {
            inner: StreamChannel::new(a),
            writes: 0,
            fail_on: 1,
        };
        let mut c = Connection::new(flaky, Role::Initiator, LinkConfig::default()).unwrap();
        c.state = ConnectionState::Open;

        let err = c.send(b"x").await.unwrap_err();
        assert!(matches!(&err, LinkError::Io(e) if e.kind() == io::ErrorKind::Interrupted));
        assert!(!c.sender.has_unacked());
        assert_eq!(c.sender.ns, Seq::Zero);

        // The retry of the same payload goes out as I(0) and is acknowledged.
        let ack = Control::Rr(Seq::One);
        let rr = frame::encode(Role::Responder.outgoing_address(ack), ack.to_byte(), None);
        let mut peer = StreamChannel::new(b);
        peer.write_bytes(&rr).await.unwrap();

        assert_eq!(c.send(b"x").await.unwrap(), 1);
        assert_eq!(c.sender.ns, Seq::One);
        assert_eq!(c.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn closing_an_unopened_link_just_releases_it() {
        let (c, _peer) = conn(Role::Responder);
        assert_eq!(c.close().await.unwrap(), Teardown::Clean);
    }

    #[test]
    fn classify_checks_direction_and_shape() {
        let (c, _peer) = conn(Role::Responder);
        let set = Frame { address: 0x03, control: 0x03, info: None };
        assert_eq!(c.classify(&set), Some(Control::Set));

        // SET stamped with the Responder's own address is not from the peer.
        let foreign = Frame { address: 0x01, control: 0x03, info: None };
        assert_eq!(c.classify(&foreign), None);

        // I-frame without an information field is malformed.
        let bare_info = Frame { address: 0x03, control: 0x00, info: None };
        assert_eq!(c.classify(&bare_info), None);
    }

    #[test]
    fn only_checksum_failures_are_recoverable() {
        assert!(!LinkError::Receive { seq: Seq::Zero }.is_fatal());
        assert!(LinkError::Transmit { attempts: 3 }.is_fatal());
        assert!(LinkError::Connection { attempts: 3 }.is_fatal());
    }
}
