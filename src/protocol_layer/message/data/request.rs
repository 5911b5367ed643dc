//! Definitions of request message content, and selection of a source capability to request.
use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::volt;

use super::source_capabilities::{FixedSupply, SourceCapabilities};
use crate::units::{ElectricCurrent, ElectricPotential};

bitfield! {
    /// A request data object for a fixed or variable supply.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedVariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Valid range 1..=14
        pub object_position: u8 @ 28..=31,
        /// GiveBack flag
        pub giveback_flag: bool @ 27,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
        /// USB communications capable
        pub usb_communications_capable: bool @ 25,
        /// No USB Suspend
        pub no_usb_suspend: bool @ 24,
        /// Unchunked extended messages supported
        pub unchunked_extended_messages_supported: bool @ 23,
        /// Operating current in 10mA units
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10mA units
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableSupply {
    /// Serialize the data object, returning the number of written bytes.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(buf, self.0);
        4
    }

    /// The operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    /// The maximum operating current.
    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

/// A fixed supply chosen from the source capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Selection {
    /// 1-based position of the PDO in the source capabilities.
    pub object_position: u8,
    /// The selected supply.
    pub supply: FixedSupply,
}

impl Selection {
    /// Build the request data object that asks for the full current of the selected supply.
    pub fn to_request(&self) -> FixedVariableSupply {
        let current = self.supply.raw_max_current();

        FixedVariableSupply(0)
            .with_object_position(self.object_position)
            .with_raw_operating_current(current)
            .with_raw_max_operating_current(current)
            .with_no_usb_suspend(true)
            .with_usb_communications_capable(true)
    }
}

/// Convert a voltage in whole volts.
pub fn volts(value: u8) -> ElectricPotential {
    ElectricPotential::new::<volt>(value.into())
}

/// Select the highest fixed supply that does not exceed `ceiling`.
///
/// Supplies without current are skipped. Among supplies with equal voltage, the one with
/// the higher current wins, and the first one on a full tie. If nothing matches, the
/// vSafe5V supply is selected, provided that it offers current.
///
/// Returns `None` for invalid capabilities (empty, or not starting with vSafe5V).
pub fn highest_fixed_at_most(capabilities: &SourceCapabilities, ceiling: ElectricPotential) -> Option<Selection> {
    if !capabilities.is_valid() {
        return None;
    }

    let mut best: Option<Selection> = None;

    for (object_position, supply) in capabilities.fixed_supplies() {
        if supply.raw_max_current() == 0 || supply.voltage() > ceiling {
            continue;
        }

        let better = match &best {
            None => true,
            Some(best) => {
                (supply.raw_voltage(), supply.raw_max_current())
                    > (best.supply.raw_voltage(), best.supply.raw_max_current())
            }
        };

        if better {
            best = Some(Selection {
                object_position,
                supply: *supply,
            });
        }
    }

    best.or_else(|| vsafe_5v_fallback(capabilities))
}

/// Select the fixed supply with the voltage closest to `target`.
///
/// Unlike [`highest_fixed_at_most`], the result may exceed `target`. On equal distance,
/// the lower voltage wins. Supplies without current are skipped.
pub fn closest_fixed(capabilities: &SourceCapabilities, target: ElectricPotential) -> Option<Selection> {
    if !capabilities.is_valid() {
        return None;
    }

    let distance = |supply: &FixedSupply| {
        let voltage = supply.voltage();
        if voltage > target { voltage - target } else { target - voltage }
    };

    capabilities
        .fixed_supplies()
        .filter(|(_, supply)| supply.raw_max_current() > 0)
        .min_by(|(_, a), (_, b)| {
            distance(*a)
                .partial_cmp(&distance(*b))
                .unwrap_or(core::cmp::Ordering::Equal)
                .then(a.raw_voltage().cmp(&b.raw_voltage()))
        })
        .map(|(object_position, supply)| Selection {
            object_position,
            supply: *supply,
        })
        .or_else(|| vsafe_5v_fallback(capabilities))
}

fn vsafe_5v_fallback(capabilities: &SourceCapabilities) -> Option<Selection> {
    capabilities
        .vsafe_5v()
        .filter(|supply| supply.is_vsafe_5v() && supply.raw_max_current() > 0)
        .map(|supply| Selection {
            object_position: 1,
            supply: *supply,
        })
}
