//! Counters for message IDs, capability advertisements and hard resets.

/// Counter errors.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter wrapped past its maximum value.
    Exceeded,
}

/// A wrapping counter with a type-specific maximum.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// Types of counters.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Source capability advertisements within one attach episode.
    Caps,
    /// Hard resets within one attach episode.
    HardReset,
    /// The 3-bit rolling message ID.
    MessageId,
}

impl Counter {
    /// Create a zeroed counter of the given type.
    pub fn new(counter_type: CounterType) -> Self {
        let max_value = match counter_type {
            CounterType::Caps => 50,
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
        };

        Self { value: 0, max_value }
    }

    /// Set the counter, wrapping at the maximum.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// Current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Maximum value before wrapping.
    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    /// Increment, reporting [`Error::Exceeded`] on wrap-around.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 { Err(Error::Exceeded) } else { Ok(()) }
    }

    /// Reset to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}
