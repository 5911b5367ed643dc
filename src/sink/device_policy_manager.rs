//! The device policy manager (DPM) allows a device to control the policy engine, and be informed about status changes.
//!
//! For example, through the DPM, a device can pick which source capability to request,
//! or prepare for a change of the supply voltage.
use super::Contract;
use crate::protocol_layer::message::data::request::{self, Selection};
use crate::protocol_layer::message::data::sink_capabilities::SinkCapabilities;
use crate::protocol_layer::message::data::source_capabilities::SourceCapabilities;
use crate::units::ElectricPotential;

/// Trait for the device policy manager.
///
/// All methods have defaults, so that an empty implementation gives the standard behavior.
pub trait DevicePolicyManager {
    /// Select a source capability to request.
    ///
    /// Defaults to the highest fixed supply that does not exceed `ceiling`.
    /// Returning `None` makes the sink enter error recovery.
    fn select(&mut self, source_capabilities: &SourceCapabilities, ceiling: ElectricPotential) -> Option<Selection> {
        request::highest_fixed_at_most(source_capabilities, ceiling)
    }

    /// The capabilities that are reported on Get_Sink_Cap.
    ///
    /// Defaults to a single vSafe5V operating point.
    fn sink_capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::default()
    }

    /// Notify the device that it shall transition to a new power level.
    fn transition_power(&mut self, _contract: &Contract) {}

    /// Notify the device that a hard reset occurred, and power returns to vSafe5V.
    fn hard_reset(&mut self) {}
}
