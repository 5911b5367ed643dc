//! Definition of counters, used for retry attempts, and message IDs.

/// Errors that can occur when using counters.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter wrapped around past its maximum value.
    #[error("counter overrun")]
    Overrun,
}

/// A counter with a type-specific maximum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// Types of counters, and their maxima.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Consecutive Wait/Reject replies (`N_BUSY_COUNT`).
    Busy,
    /// Hard resets without reaching a contract (`N_HARD_RESET_COUNT`).
    HardReset,
    /// Rolling message ID.
    MessageId,
    /// Retransmissions of a message without GoodCRC (`N_RETRY_COUNT`).
    Retry,
}

impl Counter {
    /// Create a new counter of a given type, starting at zero.
    pub fn new(counter_type: CounterType) -> Self {
        // USB PD R3.2, [Table 6.70]
        let max_value = match counter_type {
            CounterType::Busy => 5,
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
            CounterType::Retry => 3,
        };

        Self { value: 0, max_value }
    }

    /// Create a new counter, starting at a given value.
    pub fn new_from_value(counter_type: CounterType, value: u8) -> Self {
        let mut counter = Self::new(counter_type);
        counter.set(value);
        counter
    }

    /// Set the counter value. Values beyond the maximum wrap.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// The maximum value before wrapping.
    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    /// Increment the counter.
    ///
    /// Returns an error when the counter wrapped back to zero.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 { Err(Error::Overrun) } else { Ok(()) }
    }

    /// Whether the counter sits at its maximum value.
    pub fn is_exhausted(&self) -> bool {
        self.value == self.max_value
    }

    /// Reset the counter to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, CounterType, Error};

    #[test]
    fn message_id_wraps_after_seven() {
        let mut counter = Counter::new_from_value(CounterType::MessageId, 6);

        assert_eq!(counter.increment(), Ok(()));
        assert_eq!(counter.value(), 7);
        assert_eq!(counter.increment(), Err(Error::Overrun));
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn set_wraps_large_values() {
        let counter = Counter::new_from_value(CounterType::MessageId, 9);
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn hard_reset_counter_exhausts() {
        let mut counter = Counter::new(CounterType::HardReset);
        assert!(!counter.is_exhausted());

        counter.increment().unwrap();
        counter.increment().unwrap();
        assert!(counter.is_exhausted());

        counter.reset();
        assert_eq!(counter.value(), 0);
    }
}
