//! Time base and timers that are used by the protocol layer and policy engine.
//!
//! The engine never sleeps. Instead, each pending timeout is stored as a [`Deadline`],
//! that is checked against the current [`Instant`] on every poll.
use core::ops::Add;

/// A point in time, in milliseconds since an arbitrary epoch.
///
/// Provided by the application on every poll, typically from a monotonic system timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant(u64);

impl Instant {
    /// Create an instant from a millisecond tick count.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// The millisecond tick count.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since an earlier instant, or zero if `earlier` is in the future.
    pub fn saturating_duration_since(&self, earlier: Instant) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<u64> for Instant {
    type Output = Instant;

    fn add(self, millis: u64) -> Self::Output {
        Instant(self.0.saturating_add(millis))
    }
}

/// Types of timers that are used for timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    /// CC must stay stable for this long before attach is confirmed.
    CcDebounce,
    /// CC must stay lost for this long before detach is confirmed (tPDDebounce).
    PdDebounce,
    /// Wait for GoodCRC, or for the reply to a request.
    SenderResponse,
    /// Wait for source capabilities after attach.
    SinkWaitCap,
    /// Minimum time between a Wait/Reject and the next request.
    SinkRequest,
    /// Wait for PS_RDY after Accept.
    PSTransition,
    /// Settling time before the negotiated power is considered stable.
    PowerSettle,
    /// Time for the source to recover from a hard reset.
    HardResetRecovery,
}

impl TimerType {
    /// Timeout duration for a given type, in milliseconds.
    pub const fn duration_millis(self) -> u64 {
        match self {
            TimerType::CcDebounce => 100,
            TimerType::PdDebounce => 15,
            TimerType::SenderResponse => 30,
            TimerType::SinkWaitCap => 465,
            TimerType::SinkRequest => 100,
            TimerType::PSTransition => 500,
            TimerType::PowerSettle => 1000,
            TimerType::HardResetRecovery => 1000,
        }
    }
}

/// A running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    /// The kind of timer.
    pub timer_type: TimerType,
    /// When the timer expires.
    pub expires_at: Instant,
}

impl Deadline {
    /// Start a timer of the given type at `now`.
    pub fn start(timer_type: TimerType, now: Instant) -> Self {
        Self {
            timer_type,
            expires_at: now + timer_type.duration_millis(),
        }
    }

    /// Whether the timer has run out at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expires_at_duration() {
        let start = Instant::from_millis(1_000);
        let deadline = Deadline::start(TimerType::SinkWaitCap, start);

        assert!(!deadline.is_expired(start));
        assert!(!deadline.is_expired(Instant::from_millis(1_464)));
        assert!(deadline.is_expired(Instant::from_millis(1_465)));
    }

    #[test]
    fn instant_addition_saturates() {
        let late = Instant::from_millis(u64::MAX - 1) + 30;
        assert_eq!(late.as_millis(), u64::MAX);
    }
}
