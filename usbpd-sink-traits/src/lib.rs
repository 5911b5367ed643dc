//! USB PD sink PHY traits.
//!
//! Provides a polled driver trait that allows to run the sink engine on top of various
//! USB PD transceivers (for example a FUSB302B).
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

/// Receive Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverRxError {
    /// Received message discarded, e.g. due to CRC errors.
    Discarded,

    /// Hard Reset received before or during reception.
    HardReset,
}

/// Transmit Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverTxError {
    /// The PHY is busy, faulted, or excessive noise on the line.
    Discarded,

    /// Hard Reset received before or during transmission.
    HardReset,
}

/// The CC pin that carries BMC communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcPin {
    /// CC1 is connected (normal orientation).
    Cc1,
    /// CC2 is connected (flipped orientation).
    Cc2,
}

/// Voltage level seen on one CC pin, as advertised by the source's Rp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcLevel {
    /// Nothing attached (below vRd-Connect).
    #[default]
    Open,
    /// Default USB power.
    Default,
    /// Type-C current at 1.5 A.
    Current1A5,
    /// Type-C current at 3.0 A.
    Current3A0,
}

impl CcLevel {
    /// Whether a source pull-up is present on the pin.
    pub fn is_attached(&self) -> bool {
        !matches!(self, CcLevel::Open)
    }
}

/// A raw sample of both CC lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttachSignal {
    /// Level on CC1.
    pub cc1: CcLevel,
    /// Level on CC2.
    pub cc2: CcLevel,
}

impl AttachSignal {
    /// Both CC pins open.
    pub const OPEN: Self = Self {
        cc1: CcLevel::Open,
        cc2: CcLevel::Open,
    };

    /// A source attached on one pin with the given advertisement.
    pub fn attached(pin: CcPin, level: CcLevel) -> Self {
        match pin {
            CcPin::Cc1 => Self {
                cc1: level,
                cc2: CcLevel::Open,
            },
            CcPin::Cc2 => Self {
                cc1: CcLevel::Open,
                cc2: level,
            },
        }
    }

    /// The orientation of an attached source.
    ///
    /// Returns `None` if nothing is attached, or if both pins are pulled up
    /// (debug accessory), which a sink does not support.
    pub fn orientation(&self) -> Option<CcPin> {
        match (self.cc1.is_attached(), self.cc2.is_attached()) {
            (true, false) => Some(CcPin::Cc1),
            (false, true) => Some(CcPin::Cc2),
            _ => None,
        }
    }
}

/// Driver trait, through which the protocol layer and policy engine talk to the PHY.
///
/// All methods must return immediately. They are only ever called from the single
/// task that polls the sink, never from interrupt context.
pub trait Driver {
    /// If this is `true`, the protocol layer will not send its own
    /// GoodCRC messages and will instead rely on the hardware.
    const HAS_AUTO_GOOD_CRC: bool = false;

    /// Sample the CC lines.
    fn sample_attach(&mut self) -> AttachSignal;

    /// Route BMC communication to the given CC pin.
    fn select_cc(&mut self, _pin: CcPin) {}

    /// Whether the PHY has pending status (e.g. received frames) to service.
    fn interrupt_pending(&mut self) -> bool;

    /// Receive the next decoded frame into `buffer`.
    ///
    /// Returns `Ok(None)` if no frame is available.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, DriverRxError>;

    /// Queue an encoded frame for transmission.
    fn transmit(&mut self, data: &[u8]) -> Result<(), DriverTxError>;

    /// Transmit a hard reset signal.
    fn transmit_hard_reset(&mut self) -> Result<(), DriverTxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_from_single_pin() {
        assert_eq!(
            AttachSignal::attached(CcPin::Cc1, CcLevel::Default).orientation(),
            Some(CcPin::Cc1)
        );
        assert_eq!(
            AttachSignal::attached(CcPin::Cc2, CcLevel::Current3A0).orientation(),
            Some(CcPin::Cc2)
        );
    }

    #[test]
    fn no_orientation_when_open_or_both_pulled() {
        assert_eq!(AttachSignal::OPEN.orientation(), None);

        let both = AttachSignal {
            cc1: CcLevel::Default,
            cc2: CcLevel::Current1A5,
        };
        assert_eq!(both.orientation(), None);
    }
}
