//! Synchronisation mode selection for `PRE-OP -> SAFE-OP`.

use crate::{
    al_status_code::AlStatusCode,
    config::{SubordinateRounding, SyncConfig},
    error::Error,
    esc::Esc,
    handler::ProcessDataSizes,
    register::{DcActivation, RegisterAddress},
};

const NS_PER_MS: u64 = 1_000_000;

/// What drives the cyclic update of one process data direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    /// Not synchronised to any event.
    FreeRun,
    /// Driven by the SM2 (outputs) or SM3 (inputs) event.
    SmSynchronous,
    /// Inputs driven by the SM2 event, when both directions are in use.
    SmSynchronousSecondary,
    /// Driven by the DC SYNC0 pulse.
    DcSync0,
    /// Driven by the DC SYNC1 pulse.
    DcSync1,
}

impl SyncMode {
    /// Sync type value of CoE objects `0x1C32:01` and `0x1C33:01`.
    pub fn sync_type(self) -> u16 {
        match self {
            SyncMode::FreeRun => 0x00,
            SyncMode::SmSynchronous => 0x01,
            SyncMode::DcSync0 => 0x02,
            SyncMode::DcSync1 => 0x03,
            SyncMode::SmSynchronousSecondary => 0x22,
        }
    }

    /// Parse a CoE sync type value.
    pub fn from_sync_type(value: u16) -> Option<Self> {
        match value {
            0x00 => Some(SyncMode::FreeRun),
            0x01 => Some(SyncMode::SmSynchronous),
            0x02 => Some(SyncMode::DcSync0),
            0x03 => Some(SyncMode::DcSync1),
            0x22 => Some(SyncMode::SmSynchronousSecondary),
            _ => None,
        }
    }

    /// Whether this mode is driven by a DC SYNC pulse.
    pub fn is_dc(self) -> bool {
        matches!(self, SyncMode::DcSync0 | SyncMode::DcSync1)
    }
}

/// Sync types pinned by the MainDevice over the mailbox.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncOverride {
    /// Sync type of the outputs, from `0x1C32:01`.
    pub outputs: Option<SyncMode>,
    /// Sync type of the inputs, from `0x1C33:01`.
    pub inputs: Option<SyncMode>,
}

/// Distributed clock registers relevant to the sync mode.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DcRegisters {
    /// Sync activation register.
    pub activation: DcActivation,
    /// SYNC0 cycle time in ns.
    pub sync0_cycle_ns: u32,
    /// SYNC1 cycle time in ns.
    pub sync1_cycle_ns: u32,
}

impl DcRegisters {
    /// Read the DC sync registers from the ESC.
    pub fn read<E>(esc: &mut E) -> Result<Self, Error>
    where
        E: Esc,
    {
        Ok(Self {
            activation: esc.read_register(RegisterAddress::DcSyncActive)?,
            sync0_cycle_ns: esc.read_register(RegisterAddress::DcSync0CycleTime)?,
            sync1_cycle_ns: esc.read_register(RegisterAddress::DcSync1CycleTime)?,
        })
    }
}

/// Number of SYNC0 pulses per cycle when SYNC1 runs at a multiple of SYNC0.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subordinated {
    /// SYNC0 events between two output updates.
    pub output_sync0_count: u16,
    /// SYNC0 events after which the inputs are latched.
    pub input_latch_count: u16,
}

/// Result of [`select`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncDecision {
    /// Sync mode of the outputs.
    pub outputs: SyncMode,
    /// Sync mode of the inputs.
    pub inputs: SyncMode,
    /// DC SYNC pulses are generated by the ESC.
    pub dc_active: bool,
    /// Set when SYNC1 runs at a multiple of SYNC0.
    pub subordinated: Option<Subordinated>,
    /// SYNC0 watchdog threshold in 1ms ticks, 0 when off.
    pub sync0_watchdog: u16,
    /// SYNC1 watchdog threshold in 1ms ticks, 0 when off.
    pub sync1_watchdog: u16,
    /// Expected SYNC0 events per SM2 event, 0 when SM/SYNC sequence supervision is off.
    pub sm_sync0_value: u16,
}

impl Default for SyncDecision {
    fn default() -> Self {
        Self {
            outputs: SyncMode::FreeRun,
            inputs: SyncMode::FreeRun,
            dc_active: false,
            subordinated: None,
            sync0_watchdog: 0,
            sync1_watchdog: 0,
            sm_sync0_value: 0,
        }
    }
}

/// Derive the sync mode of both process data directions.
///
/// Without DC, the sized directions follow their SM event if the application supports it. With DC,
/// outputs follow SYNC1 for subordinated cycles and SYNC0 otherwise, inputs follow SYNC1 whenever
/// it is generated.
///
/// Sync types pinned by the MainDevice are checked against the DC registers and used as is, or the
/// transition is refused.
pub fn select(
    sizes: ProcessDataSizes,
    dc: &DcRegisters,
    user_override: Option<SyncOverride>,
    config: &SyncConfig,
) -> Result<SyncDecision, AlStatusCode> {
    let activation = dc.activation;

    let dc_active = if activation.any_sync_requested() {
        if !config.dc_supported || !activation.generates_sync() {
            return Err(AlStatusCode::InvalidDcSyncConfiguration);
        }

        if dc.sync0_cycle_ns < config.min_cycle_time_ns {
            return Err(AlStatusCode::DcInvalidSyncCycleTime);
        }

        true
    } else {
        false
    };

    let subordinated = (dc_active
        && activation.sync1
        && dc.sync1_cycle_ns >= dc.sync0_cycle_ns)
        .then(|| subordinate_counts(dc, config.subordinate_rounding));

    let (auto_outputs, auto_inputs) = if dc_active {
        (
            if subordinated.is_some() {
                SyncMode::DcSync1
            } else {
                SyncMode::DcSync0
            },
            if activation.sync1 {
                SyncMode::DcSync1
            } else {
                SyncMode::DcSync0
            },
        )
    } else if config.sm_synchronous {
        let outputs = if sizes.outputs > 0 {
            SyncMode::SmSynchronous
        } else {
            SyncMode::FreeRun
        };

        let inputs = match (sizes.inputs > 0, sizes.outputs > 0) {
            (true, true) => SyncMode::SmSynchronousSecondary,
            (true, false) => SyncMode::SmSynchronous,
            (false, _) => SyncMode::FreeRun,
        };

        (outputs, inputs)
    } else {
        (SyncMode::FreeRun, SyncMode::FreeRun)
    };

    let pinned = user_override.unwrap_or_default();

    let outputs = match pinned.outputs {
        Some(mode) => check_pinned(mode, dc, config)?,
        None => auto_outputs,
    };

    let inputs = match pinned.inputs {
        Some(mode) => check_pinned(mode, dc, config)?,
        None => auto_inputs,
    };

    let sized_free_run = (outputs == SyncMode::FreeRun && sizes.outputs > 0)
        || (inputs == SyncMode::FreeRun && sizes.inputs > 0);

    if sized_free_run && !config.free_run {
        return Err(AlStatusCode::FreeRunNotSupported);
    }

    let factor = u64::from(config.dc_watchdog_factor);

    let (sync0_watchdog, sync1_watchdog) = if dc_active {
        let sync1_period = match subordinated {
            Some(counts) => u64::from(dc.sync0_cycle_ns) * u64::from(counts.output_sync0_count),
            None => u64::from(dc.sync0_cycle_ns),
        };

        (
            watchdog_threshold(u64::from(dc.sync0_cycle_ns) * factor),
            if activation.sync1 {
                watchdog_threshold(sync1_period * factor)
            } else {
                0
            },
        )
    } else {
        (0, 0)
    };

    let sm_sync0_value = match subordinated {
        Some(counts) if sizes.outputs > 0 => counts.output_sync0_count,
        None if dc_active && sizes.outputs > 0 => 1,
        _ => 0,
    };

    Ok(SyncDecision {
        outputs,
        inputs,
        dc_active,
        subordinated,
        sync0_watchdog,
        sync1_watchdog,
        sm_sync0_value,
    })
}

/// A pinned mode must be possible with the current DC registers.
fn check_pinned(
    mode: SyncMode,
    dc: &DcRegisters,
    config: &SyncConfig,
) -> Result<SyncMode, AlStatusCode> {
    let dc_active = dc.activation.generates_sync();

    match mode {
        SyncMode::FreeRun if !config.free_run => Err(AlStatusCode::FreeRunNotSupported),
        SyncMode::SmSynchronous | SyncMode::SmSynchronousSecondary if !config.sm_synchronous => {
            Err(AlStatusCode::SyncModeNotSupported)
        }
        SyncMode::DcSync0 | SyncMode::DcSync1 if !config.dc_supported => {
            Err(AlStatusCode::SyncModeNotSupported)
        }
        // DC pinned but not running, or running but the MainDevice asked for something else.
        m if m.is_dc() != dc_active => Err(AlStatusCode::InvalidDcSyncConfiguration),
        SyncMode::DcSync1 if !dc.activation.sync1 => Err(AlStatusCode::InvalidDcSyncConfiguration),
        m => Ok(m),
    }
}

fn subordinate_counts(dc: &DcRegisters, rounding: SubordinateRounding) -> Subordinated {
    let sync0 = dc.sync0_cycle_ns.max(1);
    let sync1 = dc.sync1_cycle_ns;

    let whole = sync1 / sync0;
    let divisible = sync1 % sync0 == 0;
    let ceil = if divisible { whole } else { whole + 1 };

    let (output, input) = match rounding {
        SubordinateRounding::Legacy => (ceil, if divisible { whole + 1 } else { whole }),
        SubordinateRounding::Ceil => (ceil, ceil),
    };

    Subordinated {
        output_sync0_count: saturate(u64::from(output)),
        input_latch_count: saturate(u64::from(input)),
    }
}

/// `ns` as 1ms ticks, at least 1.
fn watchdog_threshold(ns: u64) -> u16 {
    saturate(ns / NS_PER_MS).max(1)
}

fn saturate(value: u64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
