//! Definitions of sink capabilities data message content.
//!
//! Sink capabilities are sent in response to Get_Sink_Cap messages. They describe
//! the power levels that the sink can operate at.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use super::source_capabilities::VSAFE_5V_RAW;
use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::protocol_layer::message::MAX_DATA_OBJECTS;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// Operational current of the default vSafe5V sink PDO, in 10 mA units.
pub const DEFAULT_OPERATIONAL_CURRENT_RAW: u16 = 500;

bitfield! {
    /// A Sink Fixed Supply PDO.
    ///
    /// Different from the source Fixed Supply PDO in bits 28-20.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SinkFixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply (00b)
        pub kind: u8 @ 30..=31,
        /// Dual-Role Power - set if Dual-Role Power supported
        pub dual_role_power: bool @ 29,
        /// Higher Capability - set if sink needs more than vSafe5V for full functionality
        pub higher_capability: bool @ 28,
        /// Unconstrained Power - set if external power source is available
        pub unconstrained_power: bool @ 27,
        /// USB Communications Capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-Role Data
        pub dual_role_data: bool @ 25,
        /// Fast Role Swap required USB Type-C Current (bits 24:23)
        pub raw_fast_role_swap: u8 @ 23..=24,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Operational Current in 10 mA units
        pub raw_operational_current: u16 @ 0..=9,
    }
}

#[allow(clippy::derivable_impls)]
impl Default for SinkFixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl SinkFixedSupply {
    /// Create a new SinkFixedSupply PDO for the required vSafe5V entry.
    ///
    /// All sinks must include at least one PDO at 5V.
    pub fn new_vsafe5v(operational_current_10ma: u16) -> Self {
        Self::new(VSAFE_5V_RAW, operational_current_10ma)
    }

    /// Create a new SinkFixedSupply PDO at a specific voltage.
    pub fn new(voltage_50mv: u16, operational_current_10ma: u16) -> Self {
        Self::default()
            .with_kind(0b00)
            .with_raw_voltage(voltage_50mv)
            .with_raw_operational_current(operational_current_10ma)
    }

    /// Get the voltage in standard units.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Get the operational current in standard units.
    pub fn operational_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operational_current().into())
    }
}

bitfield! {
    /// A Sink Battery Supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SinkBattery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery (01b)
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Operational Power in 250 mW units
        pub raw_operational_power: u16 @ 0..=9,
    }
}

impl SinkBattery {
    /// Get the maximum voltage in standard units.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// Get the minimum voltage in standard units.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// Get the operational power in standard units.
    pub fn operational_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_operational_power().into())
    }
}

/// A power data object that describes one sink operating point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkPowerDataObject {
    /// Fixed voltage operating point.
    FixedSupply(SinkFixedSupply),
    /// Battery operating range.
    Battery(SinkBattery),
    /// Any other kind, kept raw.
    Unknown(u32),
}

impl SinkPowerDataObject {
    /// The raw 32 bit representation.
    pub fn raw(&self) -> u32 {
        match self {
            Self::FixedSupply(supply) => supply.0,
            Self::Battery(battery) => battery.0,
            Self::Unknown(raw) => *raw,
        }
    }
}

/// Parse a raw sink PDO.
pub fn parse_raw_pdo(raw: u32) -> SinkPowerDataObject {
    match raw >> 30 {
        0b00 => SinkPowerDataObject::FixedSupply(SinkFixedSupply(raw)),
        0b01 => SinkPowerDataObject::Battery(SinkBattery(raw)),
        _ => SinkPowerDataObject::Unknown(raw),
    }
}

/// The capabilities of this sink, as reported to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SinkCapabilities(pub Vec<SinkPowerDataObject, MAX_DATA_OBJECTS>);

impl SinkCapabilities {
    /// A single USB communications capable vSafe5V operating point.
    pub fn new_vsafe5v_only(operational_current_10ma: u16) -> Self {
        let mut pdos = Vec::new();
        // A fresh vector always has room for one object.
        let _ = pdos.push(SinkPowerDataObject::FixedSupply(
            SinkFixedSupply::new_vsafe5v(operational_current_10ma).with_usb_communications_capable(true),
        ));

        Self(pdos)
    }

    /// Get the sink PDOs.
    pub fn pdos(&self) -> &[SinkPowerDataObject] {
        &self.0
    }

    /// Serialize all PDOs, returning the number of written bytes.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        for (index, pdo) in self.0.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[4 * index..], pdo.raw());
        }

        4 * self.0.len()
    }
}

impl Default for SinkCapabilities {
    fn default() -> Self {
        Self::new_vsafe5v_only(DEFAULT_OPERATIONAL_CURRENT_RAW)
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;

    use super::*;

    #[test]
    fn default_sink_capabilities_encoding() {
        let capabilities = SinkCapabilities::default();
        let mut buf = [0u8; 4];

        assert_eq!(capabilities.to_bytes(&mut buf), 4);
        // 5 V, 5 A, USB communications capable.
        assert_eq!(u32::from_le_bytes(buf), (1 << 26) | (100 << 10) | 500);
    }

    #[test]
    fn sink_fixed_supply_units() {
        let supply = SinkFixedSupply::new(240, 150);

        assert_eq!(supply.voltage().get::<millivolt>(), 12_000);
        assert_eq!(supply.operational_current().get::<milliampere>(), 1_500);
    }

    #[test]
    fn parse_sink_kinds() {
        assert!(matches!(parse_raw_pdo(0x0401_91F4), SinkPowerDataObject::FixedSupply(_)));
        assert!(matches!(parse_raw_pdo(0x4000_0000), SinkPowerDataObject::Battery(_)));
        assert!(matches!(parse_raw_pdo(0xC000_0000), SinkPowerDataObject::Unknown(_)));
    }
}
