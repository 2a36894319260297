//! Crate errors.
//!
//! These only cover misuse of the crate itself. Anything the MainDevice should see is published as
//! an [`AlStatusCode`](crate::AlStatusCode) instead.

use ethercrab_wire::WireError;

/// A crate error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A register read from the ESC could not be decoded.
    Wire(WireError),
    /// [`AlStorage::try_split`](crate::AlStorage::try_split) was called more than once.
    AlreadySplit,
    /// The SubDevice configuration is inconsistent.
    Config(ConfigError),
}

/// Reason a [`SubDeviceConfig`](crate::SubDeviceConfig) was rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A sync manager address window is empty or inverted.
    Window {
        /// Window start address.
        start: u16,
        /// Window end address, exclusive.
        end: u16,
    },
    /// Mailbox minimum length is larger than its maximum, or below the mailbox header size.
    MailboxLength {
        /// Configured minimum.
        min: u16,
        /// Configured maximum.
        max: u16,
    },
    /// Sync manager count outside `4..=16`.
    SyncManagerCount(u8),
    /// A transition timeout of zero would fail every pending transition immediately.
    ZeroTimeout,
    /// The SM/Sync missed event limit must be at least 1.
    SyncErrorLimit,
    /// The DC watchdog multiplier must be at least 1.
    WatchdogFactor,
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Wire(e) => write!(f, "wire: {}", e),
            Error::AlreadySplit => f.write_str("storage has already been split"),
            Error::Config(e) => write!(f, "config: {}", e),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Window { start, end } => {
                write!(f, "invalid address window {:#06x}..{:#06x}", start, end)
            }
            ConfigError::MailboxLength { min, max } => {
                write!(f, "invalid mailbox length bounds {}..={}", min, max)
            }
            ConfigError::SyncManagerCount(count) => {
                write!(f, "unsupported sync manager count {}", count)
            }
            ConfigError::ZeroTimeout => f.write_str("transition timeout must not be zero"),
            ConfigError::SyncErrorLimit => f.write_str("sync error limit must not be zero"),
            ConfigError::WatchdogFactor => f.write_str("DC watchdog factor must not be zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}
