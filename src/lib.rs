//! A `no_std` USB Power Delivery sink negotiation engine.
//!
//! The engine sits on top of a PD transceiver (e.g. a FUSB302B), that is accessed through
//! the [`usbpd_sink_traits::Driver`] trait. It is driven by calling [`sink::policy_engine::Sink::poll`]
//! periodically from a single task, and reports its progress through typed events.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

#[macro_use]
extern crate uom;

pub mod config;
pub mod counters;
pub mod protocol_layer;
pub mod sink;
pub mod timers;

#[cfg(test)]
pub(crate) mod dummy;

pub use usbpd_sink_traits as traits;

#[allow(missing_docs)]
pub mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

#[allow(missing_docs)]
pub mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamperes", "_50milliamperes";
    }
}

#[allow(missing_docs)]
pub mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

/// Quantities with integer storage, based on milli-units.
///
/// Voltages are stored in mV, currents in mA.
#[allow(missing_docs)]
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

/// The present power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerRole {
    /// The port consumes power.
    Sink,
    /// The port provides power.
    Source,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// The present data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataRole {
    /// Upstream facing port.
    Ufp,
    /// Downstream facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
