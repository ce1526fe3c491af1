//! Retransmission timer.
//!
//! Stop-and-wait needs exactly one timer per connection: it is armed when a
//! frame that expects a reply goes out and cancelled when the reply arrives.
//! [`Timer`] is a plain value owned by the connection.  Expiry is observed
//! cooperatively, either by polling [`Timer::is_expired`] or by awaiting
//! [`Timer::expired`] inside a `tokio::select!` next to the channel read, so it
//! never interrupts a half-processed frame.
//!
//! The timer runs on `tokio::time`, which lets tests drive it with a paused
//! clock (`#[tokio::test(start_paused = true)]`).

use std::time::Duration;

use tokio::time::{self, Instant};

/// Single-shot timer with a fixed per-attempt duration.
#[derive(Debug)]
pub struct Timer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the timer for one full period from now.
    ///
    /// A deadline beyond what the clock can represent is never reached, so
    /// the timer stays unarmed.
    pub fn arm(&mut self) {
        self.deadline = Instant::now().checked_add(self.duration);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// `true` once an armed timer has reached its deadline.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve when the armed deadline passes.
    ///
    /// Never resolves while the timer is cancelled, so it can sit in a
    /// `select!` unconditionally.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let mut timer = Timer::new(Duration::from_secs(2));
        timer.arm();
        assert!(!timer.is_expired());

        let started = Instant::now();
        timer.expired().await;
        assert!(timer.is_expired());
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut timer = Timer::new(Duration::from_millis(10));
        timer.arm();
        timer.cancel();
        assert!(!timer.is_expired());

        let res = time::timeout(Duration::from_secs(60), timer.expired()).await;
        assert!(res.is_err(), "cancelled timer must not resolve");
        assert!(!timer.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_pushes_deadline_out() {
        let mut timer = Timer::new(Duration::from_secs(1));
        timer.arm();
        time::advance(Duration::from_millis(900)).await;
        timer.arm();
        time::advance(Duration::from_millis(900)).await;
        assert!(!timer.is_expired());
        time::advance(Duration::from_millis(100)).await;
        assert!(timer.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadline_never_fires() {
        let mut timer = Timer::new(Duration::from_secs(u64::MAX));
        timer.arm();
        assert!(!timer.is_expired());

        let res = time::timeout(Duration::from_secs(60), timer.expired()).await;
        assert!(res.is_err());
    }
}
