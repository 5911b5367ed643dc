//! The sink implementation.
use core::sync::atomic::{AtomicBool, Ordering};

use uom::si::electric_current::centiampere;

use crate::_50millivolts_mod::_50millivolts;
use crate::protocol_layer::message::data::request::Selection;
use crate::units::{ElectricCurrent, ElectricPotential};

pub mod device_policy_manager;
pub mod dispatcher;
pub mod policy_engine;

/// The Type-C attach state of the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachState {
    /// Nothing attached, or recovering from a hard reset.
    #[default]
    Detached,
    /// A source was seen on CC, and is being debounced.
    AttachWaitSink,
    /// A source is attached.
    AttachedSink,
}

/// An explicit power contract with the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Contract {
    /// 1-based position of the accepted PDO in the source capabilities.
    pub object_position: u8,
    /// Negotiated voltage in 50 mV units.
    pub raw_voltage: u16,
    /// Negotiated current in 10 mA units.
    pub raw_current: u16,
}

impl Contract {
    /// The negotiated voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage.into())
    }

    /// The negotiated current.
    pub fn current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_current.into())
    }
}

impl From<&Selection> for Contract {
    fn from(selection: &Selection) -> Self {
        Self {
            object_position: selection.object_position,
            raw_voltage: selection.supply.raw_voltage(),
            raw_current: selection.supply.raw_max_current(),
        }
    }
}

/// Set from the transceiver's interrupt handler, to tell the engine that frames are waiting.
///
/// Can be placed in a `static`:
///
/// ```
/// use usbpd_sink::sink::InterruptFlag;
///
/// static FUSB302_IRQ: InterruptFlag = InterruptFlag::new();
///
/// // In the interrupt handler:
/// FUSB302_IRQ.signal();
/// ```
#[derive(Debug, Default)]
pub struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    /// A flag that is not set.
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Set the flag. Safe to call from interrupt context.
    pub fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Whether the flag is set, without clearing it.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
