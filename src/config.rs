//! Construction-time configuration of a sink port.
//!
//! The voltage ceiling can also be changed at runtime, see
//! [`Sink::request_voltage`](crate::sink::policy_engine::Sink::request_voltage).
use core::ops::RangeInclusive;

/// Default I2C address of a FUSB302B transceiver.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x22;

/// Voltages that may be requested, in volts.
pub const VOLTAGE_RANGE: RangeInclusive<u8> = 5..=20;

/// Errors in the sink configuration.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The requested voltage is outside of 5..=20 V.
    #[error("requested voltage {0} V is out of range (5..=20 V)")]
    VoltageOutOfRange(u8),
}

/// Validate a requested voltage ceiling, in volts.
pub fn validate_voltage(volts: u8) -> Result<u8, ConfigError> {
    if VOLTAGE_RANGE.contains(&volts) {
        Ok(volts)
    } else {
        Err(ConfigError::VoltageOutOfRange(volts))
    }
}

/// Configuration of a sink port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// The GPIO that carries the transceiver's interrupt line.
    pub interrupt_pin: u8,
    /// The highest voltage to request from the source, in volts.
    pub request_voltage: u8,
    /// The transceiver's I2C address.
    #[cfg_attr(feature = "serde", serde(default = "default_i2c_address"))]
    pub i2c_address: u8,
}

#[cfg(feature = "serde")]
fn default_i2c_address() -> u8 {
    DEFAULT_I2C_ADDRESS
}

impl Config {
    /// Create a new validated configuration, using the default I2C address.
    pub fn new(interrupt_pin: u8, request_voltage: u8) -> Result<Self, ConfigError> {
        Self {
            interrupt_pin,
            request_voltage,
            i2c_address: DEFAULT_I2C_ADDRESS,
        }
        .validate()
    }

    /// Use a different transceiver address.
    pub fn with_i2c_address(mut self, i2c_address: u8) -> Self {
        self.i2c_address = i2c_address;
        self
    }

    /// Check that all values are in range.
    ///
    /// Useful for configurations that were deserialized, rather than built with [`Config::new`].
    pub fn validate(self) -> Result<Self, ConfigError> {
        validate_voltage(self.request_voltage)?;
        Ok(self)
    }
}
