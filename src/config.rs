//! Configuration passed to [`Controller`](crate::Controller).

use crate::{
    al_state::AlState,
    error::{ConfigError, Error},
};
use core::time::Duration;

/// Smallest mailbox that can hold a mailbox header plus a minimal CoE frame.
pub const MIN_MAILBOX_LEN: u16 = 0x22;

/// Largest number of sync manager channels an ESC can provide.
pub const MAX_SYNC_MANAGERS: usize = 16;

/// SubDevice configuration.
///
/// Everything here describes what this SubDevice supports. What the MainDevice actually programmed
/// is read from the ESC and checked against these values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubDeviceConfig {
    /// Timeouts for transitions whose start handler completes asynchronously.
    pub timeouts: Timeouts,

    /// Mailbox sync manager constraints.
    pub mailbox: MailboxConfig,

    /// Process data sync manager constraints.
    pub process_data: ProcessDataConfig,

    /// PDI access width. Sync manager addresses and mailbox lengths must be aligned to it.
    pub access_width: AccessWidth,

    /// Number of sync manager channels the ESC provides.
    ///
    /// Defaults to 4. Channels above SM3 are only checked for overlap.
    pub sync_manager_count: u8,

    /// Supported synchronisation modes and DC supervision parameters.
    pub sync: SyncConfig,

    /// Explicit device ID, reported in the AL status code register when the MainDevice requests
    /// it. `None` disables explicit device identification.
    pub device_id: Option<u16>,
}

impl Default for SubDeviceConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            mailbox: MailboxConfig::default(),
            process_data: ProcessDataConfig::default(),
            access_width: AccessWidth::default(),
            sync_manager_count: 4,
            sync: SyncConfig::default(),
            device_id: None,
        }
    }
}

impl SubDeviceConfig {
    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), Error> {
        if !(4..=MAX_SYNC_MANAGERS).contains(&usize::from(self.sync_manager_count)) {
            return Err(ConfigError::SyncManagerCount(self.sync_manager_count).into());
        }

        self.timeouts.validate()?;
        self.mailbox.standard.validate()?;

        if let Some(bootstrap) = &self.mailbox.bootstrap {
            bootstrap.validate()?;
        }

        self.process_data.outputs.validate()?;
        self.process_data.inputs.validate()?;

        if self.sync.sync_error_limit == 0 {
            return Err(ConfigError::SyncErrorLimit.into());
        }

        if self.sync.dc_watchdog_factor == 0 {
            return Err(ConfigError::WatchdogFactor.into());
        }

        Ok(())
    }
}

/// Transition timeouts.
///
/// Only used while a start handler returns [`Poll::Pending`](core::task::Poll::Pending).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeouts {
    /// `INIT -> PRE-OP`, i.e. mailbox startup.
    ///
    /// Defaults to 2000ms.
    pub preop: Duration,

    /// `INIT -> BOOT`.
    ///
    /// Defaults to 2000ms.
    pub bootstrap: Duration,

    /// `PRE-OP -> SAFE-OP`.
    ///
    /// Defaults to 2000ms.
    pub safeop: Duration,

    /// `SAFE-OP -> OP`. This includes waiting for the first outputs and for DC synchronisation.
    ///
    /// Defaults to 1000ms.
    pub op: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            preop: Duration::from_millis(2000),
            bootstrap: Duration::from_millis(2000),
            safeop: Duration::from_millis(2000),
            op: Duration::from_millis(1000),
        }
    }
}

impl Timeouts {
    /// Timeout in 1ms ticks for a transition into `target`.
    pub(crate) fn ticks_for(&self, target: AlState) -> u32 {
        let timeout = match target {
            AlState::PreOp => self.preop,
            AlState::Bootstrap => self.bootstrap,
            AlState::SafeOp => self.safeop,
            AlState::Op => self.op,
            AlState::Init | AlState::Other(_) => Duration::ZERO,
        };

        u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if [self.preop, self.bootstrap, self.safeop, self.op]
            .iter()
            .any(|t| t.is_zero())
        {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(())
    }
}

/// An address range in ESC process RAM, `start..end`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmWindow {
    /// First usable address.
    pub start: u16,
    /// One past the last usable address.
    pub end: u16,
}

impl SmWindow {
    /// Create a window.
    pub const fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether `len` bytes starting at `address` lie entirely in this window.
    pub fn contains(&self, address: u16, len: u32) -> bool {
        address >= self.start && u32::from(address) + len <= u32::from(self.end)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.start >= self.end {
            return Err(ConfigError::Window {
                start: self.start,
                end: self.end,
            });
        }

        Ok(())
    }
}

impl Default for SmWindow {
    fn default() -> Self {
        Self::new(0x1000, 0x2000)
    }
}

/// Constraints for one pair of mailbox channels (SM0 write, SM1 read).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MailboxChannels {
    /// Window for the mailbox written by the MainDevice (SM0).
    pub write: SmWindow,
    /// Window for the mailbox read by the MainDevice (SM1).
    pub read: SmWindow,
    /// Smallest accepted mailbox length.
    pub min_len: u16,
    /// Largest accepted mailbox length.
    pub max_len: u16,
}

impl Default for MailboxChannels {
    fn default() -> Self {
        Self {
            write: SmWindow::default(),
            read: SmWindow::default(),
            min_len: MIN_MAILBOX_LEN,
            max_len: 0x0100,
        }
    }
}

impl MailboxChannels {
    fn validate(&self) -> Result<(), ConfigError> {
        self.write.validate()?;
        self.read.validate()?;

        if self.min_len > self.max_len || self.min_len < MIN_MAILBOX_LEN {
            return Err(ConfigError::MailboxLength {
                min: self.min_len,
                max: self.max_len,
            });
        }

        Ok(())
    }
}

/// Mailbox constraints.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MailboxConfig {
    /// Mailbox used in `PRE-OP` and above.
    pub standard: MailboxChannels,
    /// Mailbox used in `BOOT`. `None` means bootstrap mode is not supported.
    pub bootstrap: Option<MailboxChannels>,
}

/// Process data constraints.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessDataConfig {
    /// Window for SM2, the outputs written by the MainDevice.
    pub outputs: SmWindow,
    /// Window for SM3, the inputs read by the MainDevice.
    pub inputs: SmWindow,
}

/// PDI access width.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessWidth {
    /// 8 bit access.
    Byte,
    /// 16 bit access.
    #[default]
    Word,
    /// 32 bit access.
    DWord,
}

impl AccessWidth {
    /// Whether `value` is a multiple of the access width.
    pub fn is_aligned(self, value: u16) -> bool {
        let mask = match self {
            AccessWidth::Byte => 0x0,
            AccessWidth::Word => 0x1,
            AccessWidth::DWord => 0x3,
        };

        value & mask == 0
    }
}

/// How subordinated cycle counts are derived from the SYNC0 and SYNC1 cycle times.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubordinateRounding {
    /// Outputs round up, inputs add one when the cycle times divide evenly.
    ///
    /// Matches the behaviour of deployed SubDevices, where the two counts were computed
    /// differently.
    #[default]
    Legacy,
    /// Both counts round up.
    Ceil,
}

/// Synchronisation support and DC supervision.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncConfig {
    /// The application can run without any synchronisation event.
    pub free_run: bool,
    /// The application can be driven by the SM2/SM3 interrupt.
    pub sm_synchronous: bool,
    /// The ESC and application support DC SYNC0/SYNC1 operation.
    pub dc_supported: bool,
    /// Shortest supported SYNC0 cycle time in ns.
    ///
    /// Defaults to 100us.
    pub min_cycle_time_ns: u32,
    /// Missed SM/SYNC event counter limit before the sequence is considered invalid.
    ///
    /// Each miss adds 3, each good cycle subtracts 1. Defaults to 4.
    pub sync_error_limit: u16,
    /// DC watchdogs expire after this many missed cycles.
    ///
    /// Defaults to 2.
    pub dc_watchdog_factor: u16,
    /// Rounding of subordinated cycle counts.
    pub subordinate_rounding: SubordinateRounding,
    /// Largest accepted DC system time difference in ns while in `OP`. `None` disables PLL
    /// supervision.
    pub pll_window_ns: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            free_run: true,
            sm_synchronous: true,
            dc_supported: true,
            min_cycle_time_ns: 100_000,
            sync_error_limit: 4,
            dc_watchdog_factor: 2,
            subordinate_rounding: SubordinateRounding::Legacy,
            pll_window_ns: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(SubDeviceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn reject_inverted_window() {
        let mut config = SubDeviceConfig::default();

        config.process_data.inputs = SmWindow::new(0x1800, 0x1000);

        assert_eq!(
            config.validate(),
            Err(Error::Config(ConfigError::Window {
                start: 0x1800,
                end: 0x1000
            }))
        );
    }

    #[test]
    fn reject_tiny_mailbox() {
        let mut config = SubDeviceConfig::default();

        config.mailbox.standard.min_len = 8;

        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::MailboxLength { min: 8, .. }))
        ));
    }

    #[test]
    fn timeout_ticks() {
        let timeouts = Timeouts {
            op: Duration::from_micros(100),
            ..Timeouts::default()
        };

        assert_eq!(timeouts.ticks_for(AlState::PreOp), 2000);
        // Sub-millisecond timeouts still allow one poll.
        assert_eq!(timeouts.ticks_for(AlState::Op), 1);
    }

    #[test]
    fn alignment() {
        assert!(AccessWidth::Word.is_aligned(0x1000));
        assert!(!AccessWidth::Word.is_aligned(0x1001));
        assert!(AccessWidth::Byte.is_aligned(0x1001));
        assert!(!AccessWidth::DWord.is_aligned(0x1002));
    }
}
