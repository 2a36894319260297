//! Application callbacks the state machine drives during transitions.

use crate::{
    al_state::AlState, al_status_code::AlStatusCode, sm_check::SmFault, sync_mode::SyncOverride,
};
use core::task::Poll;

bitflags::bitflags! {
    /// AL event mask register (`0x0204`).
    ///
    /// Selects which ESC events are routed to the PDI interrupt.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AlEventMask: u32 {
        /// AL control register written.
        const AL_CONTROL = 0x0001;
        /// DC latch event.
        const DC_LATCH = 0x0002;
        /// DC SYNC0 event.
        const DC_SYNC0 = 0x0004;
        /// DC SYNC1 event.
        const DC_SYNC1 = 0x0008;
        /// Sync manager activation register changed.
        const SM_ACTIVATION = 0x0010;
        /// EEPROM emulation command pending.
        const EEPROM = 0x0020;
        /// Process data watchdog expired.
        const WATCHDOG_PD = 0x0040;
        /// Sync manager 0 (mailbox out) event.
        const SM0 = 0x0100;
        /// Sync manager 1 (mailbox in) event.
        const SM1 = 0x0200;
        /// Sync manager 2 (outputs) event.
        const SM2 = 0x0400;
        /// Sync manager 3 (inputs) event.
        const SM3 = 0x0800;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AlEventMask {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "AlEventMask({=u32:#x})", self.bits())
    }
}

impl AlEventMask {
    /// Mask used in `INIT` and `PRE-OP`: AL control and sync manager changes only.
    pub const BASE: Self = Self::AL_CONTROL.union(Self::SM_ACTIVATION);

    /// Event bit of sync manager `index`.
    pub fn sync_manager(index: u8) -> Self {
        Self::from_bits_retain(0x0100 << u32::from(index.min(15)))
    }
}

/// Process data image sizes produced by [`Application::generate_mapping`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessDataSizes {
    /// Size of the input image (SubDevice to MainDevice) in bytes.
    pub inputs: u16,
    /// Size of the output image (MainDevice to SubDevice) in bytes.
    pub outputs: u16,
}

impl ProcessDataSizes {
    /// Create a new size pair.
    pub const fn new(inputs: u16, outputs: u16) -> Self {
        Self { inputs, outputs }
    }
}

/// Application side of the AL state machine.
///
/// Start handlers may complete asynchronously by returning [`Poll::Pending`]. They are then polled
/// again from [`Controller::poll_pending_transition`](crate::Controller::poll_pending_transition)
/// until they complete or the transition times out. Stop handlers are synchronous: stopping a
/// service cannot be refused, but an error is still published.
pub trait Application {
    /// `INIT -> PRE-OP`: start mailbox services.
    fn start_mailbox_handler(&mut self) -> Poll<Result<(), AlStatusCode>>;

    /// `PRE-OP -> INIT`: stop mailbox services.
    fn stop_mailbox_handler(&mut self) -> Result<(), AlStatusCode>;

    /// `INIT -> BOOT`: enter the firmware update mode.
    fn start_bootstrap_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        Poll::Ready(Err(AlStatusCode::BootstrapNotSupported))
    }

    /// `BOOT -> INIT`.
    fn stop_bootstrap_handler(&mut self) -> Result<(), AlStatusCode> {
        Ok(())
    }

    /// Compute the process data image sizes from the current PDO mapping.
    ///
    /// Called once per `PRE-OP -> SAFE-OP` attempt, before the process data sync managers are
    /// validated.
    fn generate_mapping(&mut self) -> Result<ProcessDataSizes, AlStatusCode>;

    /// `PRE-OP -> SAFE-OP`: start cyclic input updates.
    ///
    /// The application may add events to `event_mask` which is written to the ESC when the
    /// transition commits.
    fn start_input_handler(&mut self, event_mask: &mut AlEventMask)
    -> Poll<Result<(), AlStatusCode>>;

    /// `SAFE-OP -> PRE-OP`.
    fn stop_input_handler(&mut self) -> Result<(), AlStatusCode>;

    /// `SAFE-OP -> OP`: start cyclic output updates.
    fn start_output_handler(&mut self) -> Poll<Result<(), AlStatusCode>>;

    /// `OP -> SAFE-OP`. Outputs must be set to a safe value.
    fn stop_output_handler(&mut self) -> Result<(), AlStatusCode>;

    /// Sync types negotiated over the mailbox (CoE objects `0x1C32`/`0x1C33`), if any were
    /// written by the MainDevice.
    fn sync_type_override(&self) -> Option<SyncOverride> {
        None
    }

    /// A sync manager channel failed validation.
    fn on_sync_manager_fault(&mut self, fault: SmFault) {
        let _ = fault;
    }

    /// The published AL state or status code changed.
    fn on_state_change(&mut self, from: AlState, to: AlState, code: AlStatusCode) {
        let _ = (from, to, code);
    }

    /// Drive the RUN LED.
    fn set_run_indicator(&mut self, on: bool) {
        let _ = on;
    }

    /// Drive the ERR LED.
    fn set_error_indicator(&mut self, on: bool) {
        let _ = on;
    }
}

impl<A> Application for &mut A
where
    A: Application,
{
    fn start_mailbox_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        (**self).start_mailbox_handler()
    }

    fn stop_mailbox_handler(&mut self) -> Result<(), AlStatusCode> {
        (**self).stop_mailbox_handler()
    }

    fn start_bootstrap_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        (**self).start_bootstrap_handler()
    }

    fn stop_bootstrap_handler(&mut self) -> Result<(), AlStatusCode> {
        (**self).stop_bootstrap_handler()
    }

    fn generate_mapping(&mut self) -> Result<ProcessDataSizes, AlStatusCode> {
        (**self).generate_mapping()
    }

    fn start_input_handler(
        &mut self,
        event_mask: &mut AlEventMask,
    ) -> Poll<Result<(), AlStatusCode>> {
        (**self).start_input_handler(event_mask)
    }

    fn stop_input_handler(&mut self) -> Result<(), AlStatusCode> {
        (**self).stop_input_handler()
    }

    fn start_output_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        (**self).start_output_handler()
    }

    fn stop_output_handler(&mut self) -> Result<(), AlStatusCode> {
        (**self).stop_output_handler()
    }

    fn sync_type_override(&self) -> Option<SyncOverride> {
        (**self).sync_type_override()
    }

    fn on_sync_manager_fault(&mut self, fault: SmFault) {
        (**self).on_sync_manager_fault(fault)
    }

    fn on_state_change(&mut self, from: AlState, to: AlState, code: AlStatusCode) {
        (**self).on_state_change(from, to, code)
    }

    fn set_run_indicator(&mut self, on: bool) {
        (**self).set_run_indicator(on)
    }

    fn set_error_indicator(&mut self, on: bool) {
        (**self).set_error_indicator(on)
    }
}
