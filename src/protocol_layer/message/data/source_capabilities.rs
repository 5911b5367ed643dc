//! Definitions of source capabilities data message content.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::decivolt;

use crate::_50milliamperes_mod::_50milliamperes;
use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::protocol_layer::message::MAX_DATA_OBJECTS;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// vSafe5V, in 50 mV units.
pub const VSAFE_5V_RAW: u16 = 100;

/// A power data object holds information about one type of source capability.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerDataObject {
    /// Fixed voltage supply.
    FixedSupply(FixedSupply),
    /// Battery supply.
    Battery(Battery),
    /// Variable voltage supply.
    VariableSupply(VariableSupply),
    /// Augmented supply.
    Augmented(Augmented),
    /// Unknown kind of power data object.
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// The raw 32 bit representation.
    pub fn raw(&self) -> u32 {
        match self {
            PowerDataObject::FixedSupply(f) => f.0,
            PowerDataObject::Battery(b) => b.0,
            PowerDataObject::VariableSupply(v) => v.0,
            PowerDataObject::Augmented(Augmented::Spr(s)) => s.0,
            PowerDataObject::Augmented(Augmented::Unknown(u)) => *u,
            PowerDataObject::Unknown(u) => u.0,
        }
    }
}

bitfield! {
    /// A raw power data object.
    ///
    /// Used as a fallback for encoding unknown source types.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The kind of power data object.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply
        pub kind: u8 @ 30..=31,
        /// Dual-role power
        pub dual_role_power: bool @ 29,
        /// USB suspend supported
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power
        pub unconstrained_power: bool @ 27,
        /// USB communications capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data
        pub dual_role_data: bool @ 25,
        /// Unchunked extended messages supported
        pub unchunked_extended_messages_supported: bool @ 24,
        /// Peak current
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(clippy::derivable_impls)]
impl Default for FixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupply {
    /// The fixed output voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// The maximum current at that voltage.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }

    /// Whether this is the mandatory vSafe5V supply.
    pub fn is_vsafe_5v(&self) -> bool {
        self.raw_voltage() == VSAFE_5V_RAW
    }
}

bitfield! {
    /// A battery supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum Allowable Power in 250 mW units
        pub raw_max_power: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl Battery {
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    /// A variable (non-battery) supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply (non-battery)
        pub kind: u8 @ 30..=31,
        /// Maximum Voltage in 50mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum Voltage in 50mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(missing_docs)]
impl VariableSupply {
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

/// An augmented PDO.
///
/// Only SPR programmable supplies are decoded, since EPR is not supported.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Augmented {
    /// SPR programmable power supply.
    Spr(SprProgrammablePowerSupply),
    /// Any other augmented supply.
    Unknown(u32),
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[allow(missing_docs)]
    pub struct AugmentedRaw(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented power data object
        pub kind: u8 @ 30..=31,
        pub supply: u8 @ 28..=29,
        pub power_capabilities: u32 @ 0..=27,
    }
}

bitfield! {
    /// An SPR programmable power supply APDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct SprProgrammablePowerSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Augmented power data object
        pub kind: u8 @ 30..=31,
        /// SPR programmable power supply
        pub supply: u8 @ 28..=29,
        /// Power limited
        pub pps_power_limited: bool @ 27,
        /// Maximum voltage in 100mV increments
        pub raw_max_voltage: u8 @ 17..=24,
        /// Minimum Voltage in 100mV increments
        pub raw_min_voltage: u8 @ 8..=15,
        /// Maximum Current in 50mA increments
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl Default for SprProgrammablePowerSupply {
    fn default() -> Self {
        Self(0).with_kind(0b11).with_supply(0b00)
    }
}

#[allow(missing_docs)]
impl SprProgrammablePowerSupply {
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_max_current().into())
    }
}

/// The capabilities of a source, as advertised in a Source_Capabilities message.
///
/// Replaced as a whole, whenever the source sends new capabilities.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceCapabilities(pub Vec<PowerDataObject, MAX_DATA_OBJECTS>);

impl SourceCapabilities {
    /// The first PDO, if it is a fixed supply.
    ///
    /// Per [6.4.1.2.3], this shall always be the vSafe5V supply.
    pub fn vsafe_5v(&self) -> Option<&FixedSupply> {
        self.0.first().and_then(|supply| {
            if let PowerDataObject::FixedSupply(supply) = supply {
                Some(supply)
            } else {
                None
            }
        })
    }

    /// Whether the capabilities are well-formed.
    ///
    /// They must not be empty, and must start with a fixed 5 V supply.
    pub fn is_valid(&self) -> bool {
        self.vsafe_5v().is_some_and(FixedSupply::is_vsafe_5v)
    }

    /// Whether the source is dual-role power capable.
    pub fn dual_role_power(&self) -> bool {
        self.vsafe_5v().map(FixedSupply::dual_role_power).unwrap_or_default()
    }

    /// Whether the source supports USB suspend.
    pub fn usb_suspend_supported(&self) -> bool {
        self.vsafe_5v()
            .map(FixedSupply::usb_suspend_supported)
            .unwrap_or_default()
    }

    /// Whether the source has unconstrained power.
    pub fn unconstrained_power(&self) -> bool {
        self.vsafe_5v()
            .map(FixedSupply::unconstrained_power)
            .unwrap_or_default()
    }

    /// Get power data objects (PDOs) from the source.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// Iterate over fixed supplies, together with their 1-based object position.
    pub fn fixed_supplies(&self) -> impl Iterator<Item = (u8, &FixedSupply)> {
        self.0.iter().enumerate().filter_map(|(index, pdo)| match pdo {
            PowerDataObject::FixedSupply(supply) => Some(((index + 1) as u8, supply)),
            _ => None,
        })
    }

    /// Serialize all PDOs, returning the number of written bytes.
    pub fn to_bytes(&self, buf: &mut [u8]) -> usize {
        for (index, pdo) in self.0.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[4 * index..], pdo.raw());
        }

        4 * self.0.len()
    }
}

/// Parse a raw PDO into a typed power data object.
pub fn parse_raw_pdo(raw: u32) -> PowerDataObject {
    let pdo = RawPowerDataObject(raw);
    match pdo.kind() {
        0b00 => PowerDataObject::FixedSupply(FixedSupply(raw)),
        0b01 => PowerDataObject::Battery(Battery(raw)),
        0b10 => PowerDataObject::VariableSupply(VariableSupply(raw)),
        0b11 => PowerDataObject::Augmented(match AugmentedRaw(raw).supply() {
            0b00 => Augmented::Spr(SprProgrammablePowerSupply(raw)),
            x => {
                warn!("Unsupported augmented PDO supply {}", x);
                Augmented::Unknown(raw)
            }
        }),
        _ => {
            warn!("Unknown PowerDataObject kind");
            PowerDataObject::Unknown(pdo)
        }
    }
}
