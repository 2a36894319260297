//! ESC register addresses and the small register types the application layer reads.

/// SubDevice register address abstraction.
///
/// Only the registers the application layer touches are listed here. Sync manager channels are
/// addressed with [`RegisterAddress::sync_manager`].
///
/// Defined in ETG1000.4, Table 31.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RegisterAddress {
    // AKA DLS-user R1, `u8`.
    /// Application Layer (AL) control register. See ETG1000.4 Table 35.
    AlControl = 0x0120,
    // AKA DLS-user R3, `u8`.
    /// Application Layer (AL) status register. See ETG1000.4 Table 35.
    AlStatus = 0x0130,
    // AKA DLS-user R6, `u16`.
    /// Application Layer (AL) status code register.
    AlStatusCode = 0x0134,

    /// AL event mask, `u32`. Selects which AL events drive the PDI interrupt.
    AlEventMask = 0x0204,

    /// Watchdog divider, `u16`.
    ///
    /// See ETG1000.4 section 6.3 Watchdogs.
    WatchdogDivider = 0x0400,

    /// Sync manager watchdog timeout, `u16`.
    SyncManagerWatchdog = 0x0420,

    /// Sync Manager (SM) 0.
    ///
    /// Defined in ETG1000.4 Table 59.
    Sm0 = 0x0800,

    /// DC system time difference, `u32`.
    DcSystemTimeDifference = 0x092C,

    /// ETG1000.6 Table 27 – Distributed Clock sync parameter, `u8`.
    ///
    /// AKA ETG1000.4 Table 61 DC user P1.
    DcSyncActive = 0x0981,

    /// ETG1000.6 Table 27 – Distributed Clock sync parameter, `u32`.
    ///
    /// AKA ETG1000.4 Table 61 DC user P5.
    DcSync0CycleTime = 0x09A0,

    /// SYNC1 cycle time in ns relative to SYNC0, `u32`.
    DcSync1CycleTime = 0x09A4,
}

impl From<RegisterAddress> for u16 {
    fn from(reg: RegisterAddress) -> Self {
        reg as u16
    }
}

impl RegisterAddress {
    /// Start of the 8 byte register block of sync manager `index`.
    pub fn sync_manager(index: u8) -> u16 {
        u16::from(Self::Sm0) + u16::from(index) * 8
    }

    /// Sync manager PDI control byte by SM index.
    ///
    /// The PDI control register is the 8th byte of the SM block. Bit 0 deactivates the channel
    /// from the PDI side.
    pub fn sync_manager_pdi_control(index: u8) -> u16 {
        Self::sync_manager(index) + 7
    }
}

/// DC sync activation register (`0x0981`), written by the MainDevice before SAFE-OP.
///
/// Defined in ETG1000.6 Table 27.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[wire(bytes = 1)]
pub struct DcActivation {
    /// Cyclic unit enabled.
    #[wire(bits = 1)]
    pub cyclic_operation: bool,
    /// SYNC0 pulse generation active.
    #[wire(bits = 1)]
    pub sync0: bool,
    /// SYNC1 pulse generation active.
    #[wire(bits = 1)]
    pub sync1: bool,
    /// Auto-activation by writing the start time.
    #[wire(bits = 1)]
    pub auto_activation: bool,
    /// Extension of the start time to 64 bit.
    #[wire(bits = 1)]
    pub start_time_extension: bool,
    /// Start time plausibility check.
    #[wire(bits = 1)]
    pub start_time_check: bool,
    /// Near future configuration.
    #[wire(bits = 1)]
    pub near_future: bool,
    /// SyncSignal debug pulse.
    #[wire(bits = 1)]
    pub debug_pulse: bool,
}

impl DcActivation {
    /// The ESC is generating SYNC pulses: the cyclic unit runs with at least SYNC0 enabled.
    pub fn generates_sync(&self) -> bool {
        self.cyclic_operation && self.sync0
    }

    /// Any sync activation bit is set, consistent or not.
    pub fn any_sync_requested(&self) -> bool {
        self.cyclic_operation || self.sync0 || self.sync1
    }
}

/// Decode the sign-magnitude DC system time difference register into nanoseconds.
///
/// Bit 31 set means the local copy of the system time is smaller than the received time.
pub fn system_time_difference_ns(raw: u32) -> i32 {
    let magnitude = (raw & 0x7fff_ffff) as i32;

    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Convert the SM watchdog registers into a threshold in 1ms ticks.
///
/// One watchdog increment lasts `(divider + 2) * 40ns`. A non-zero timeout shorter than one tick
/// still yields a threshold of 1 so the watchdog stays enabled. Zero means disabled.
pub fn watchdog_ticks(divider: u16, timeout: u16) -> u16 {
    if timeout == 0 {
        return 0;
    }

    let ns = u64::from(timeout) * (u64::from(divider) + 2) * 40;

    (ns / 1_000_000).clamp(1, u64::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireWriteSized};

    #[test]
    fn sm_addresses() {
        assert_eq!(RegisterAddress::sync_manager(0), 0x0800);
        assert_eq!(RegisterAddress::sync_manager(3), 0x0818);
        assert_eq!(RegisterAddress::sync_manager_pdi_control(2), 0x0817);
    }

    #[test]
    fn default_watchdog() {
        // ESC defaults: divider 2498 gives 100us increments, 1000 increments is 100ms.
        assert_eq!(watchdog_ticks(2498, 1000), 100);
        assert_eq!(watchdog_ticks(2498, 1), 1);
        assert_eq!(watchdog_ticks(2498, 0), 0);
    }

    #[test]
    fn time_difference_sign() {
        assert_eq!(system_time_difference_ns(0x0000_0010), 16);
        assert_eq!(system_time_difference_ns(0x8000_0010), -16);
    }

    #[test]
    fn decode_activation() {
        let parsed = DcActivation::unpack_from_slice(&[0x03]).unwrap();

        assert!(parsed.generates_sync());
        assert!(!parsed.sync1);

        let only_sync1 = DcActivation::unpack_from_slice(&[0x05]).unwrap();

        assert!(!only_sync1.generates_sync());
        assert!(only_sync1.any_sync_requested());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn activation_fuzz() {
        heckcheck::check(|activation: DcActivation| {
            let packed = activation.pack();

            let unpacked = DcActivation::unpack_from_slice(&packed).expect("Unpack");

            pretty_assertions::assert_eq!(activation, unpacked);

            Ok(())
        });
    }
}
