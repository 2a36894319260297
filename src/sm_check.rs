//! Sync manager configuration checks.
//!
//! Before every upward transition the channels the MainDevice programmed are read back from the
//! ESC and checked against what this SubDevice supports.

use crate::{
    al_status_code::AlStatusCode,
    config::{MAX_SYNC_MANAGERS, MailboxChannels, SmWindow, SubDeviceConfig},
    esc::Esc,
    fmt,
    handler::ProcessDataSizes,
    register::RegisterAddress,
    sync_manager_channel::{Direction, OperationMode, SyncManagerChannel},
};

/// Index of the mailbox channel written by the MainDevice.
pub const MAILBOX_WRITE: u8 = 0;
/// Index of the mailbox channel read by the MainDevice.
pub const MAILBOX_READ: u8 = 1;
/// Index of the process data output channel.
pub const PROCESS_DATA_OUT: u8 = 2;
/// Index of the process data input channel.
pub const PROCESS_DATA_IN: u8 = 3;

/// Which channels to check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CheckScope {
    /// SM0 and SM1 against the standard mailbox constraints. Used for `INIT -> PRE-OP`.
    Mailbox,
    /// SM0 and SM1 against the bootstrap mailbox constraints. Used for `INIT -> BOOT`.
    Bootstrap,
    /// Every channel. Used for `PRE-OP -> SAFE-OP` and `SAFE-OP -> OP`.
    ProcessData,
}

/// What is wrong with a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmFaultKind {
    /// The channel is needed but not enabled.
    Disabled,
    /// The channel is enabled but its direction carries no data.
    Enabled,
    /// Misaligned address, or the channel lies outside its window.
    Address,
    /// Length does not match the mapped size or mailbox bounds.
    Size,
    /// Wrong operation mode or direction.
    Settings,
    /// The channel overlaps channel `other`.
    Overlap {
        /// Index of the channel overlapped.
        other: u8,
    },
    /// Single buffer mode on a process data channel while free run is possible.
    BufferMode,
    /// The channel registers could not be read.
    Decode,
}

/// A channel that failed validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SmFault {
    /// Sync manager index.
    pub channel: u8,
    /// Failure.
    pub kind: SmFaultKind,
}

impl SmFault {
    fn new(channel: u8, kind: SmFaultKind) -> Self {
        Self { channel, kind }
    }

    /// AL status code published for this fault.
    pub fn status_code(&self, scope: CheckScope) -> AlStatusCode {
        match (self.kind, self.channel) {
            (SmFaultKind::BufferMode, _) => AlStatusCode::FreeRunNeeds3BufferMode,
            (SmFaultKind::Overlap { .. }, _) | (SmFaultKind::Decode, _) => {
                AlStatusCode::InvalidSyncManagerConfiguration
            }
            (_, MAILBOX_WRITE | MAILBOX_READ) if scope == CheckScope::Bootstrap => {
                AlStatusCode::InvalidMailboxConfiguration
            }
            (_, MAILBOX_WRITE | MAILBOX_READ) => AlStatusCode::InvalidMailboxConfigurationPreOp,
            (_, PROCESS_DATA_OUT) => AlStatusCode::InvalidOutputConfiguration,
            (_, PROCESS_DATA_IN) => AlStatusCode::InvalidInputConfiguration,
            _ => AlStatusCode::InvalidSyncManagerConfiguration,
        }
    }

    /// Whether the fault is in a mailbox channel.
    pub fn is_mailbox(&self) -> bool {
        matches!(self.channel, MAILBOX_WRITE | MAILBOX_READ)
    }
}

impl core::fmt::Display for SmFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SM{}: ", self.channel)?;

        match self.kind {
            SmFaultKind::Disabled => f.write_str("required channel is disabled"),
            SmFaultKind::Enabled => f.write_str("unused channel is enabled"),
            SmFaultKind::Address => f.write_str("bad address"),
            SmFaultKind::Size => f.write_str("bad size"),
            SmFaultKind::Settings => f.write_str("bad settings"),
            SmFaultKind::Overlap { other } => write!(f, "overlaps SM{}", other),
            SmFaultKind::BufferMode => f.write_str("free run requires 3 buffer mode"),
            SmFaultKind::Decode => f.write_str("invalid register content"),
        }
    }
}

/// Checks sync manager channels against a [`SubDeviceConfig`].
#[derive(Debug, Copy, Clone)]
pub struct SyncManagerValidator<'config> {
    config: &'config SubDeviceConfig,
}

impl<'config> SyncManagerValidator<'config> {
    /// Create a validator for the given configuration.
    pub fn new(config: &'config SubDeviceConfig) -> Self {
        Self { config }
    }

    /// Read the channels from the ESC and check them.
    pub fn check<E>(
        &self,
        esc: &mut E,
        scope: CheckScope,
        sizes: ProcessDataSizes,
    ) -> Result<(), SmFault>
    where
        E: Esc,
    {
        let mut channels = heapless::Vec::<SyncManagerChannel, MAX_SYNC_MANAGERS>::new();

        let count = match scope {
            CheckScope::Mailbox | CheckScope::Bootstrap => 2,
            CheckScope::ProcessData => self.config.sync_manager_count.min(MAX_SYNC_MANAGERS as u8),
        };

        for index in 0..count {
            let channel = esc
                .read_register::<SyncManagerChannel>(RegisterAddress::sync_manager(index))
                .map_err(|e| {
                    fmt::error!("Failed to decode SM{}: {}", index, e);

                    SmFault::new(index, SmFaultKind::Decode)
                })?;

            // Capacity is guaranteed by the `min` above.
            let _ = channels.push(channel);
        }

        self.validate(&channels, scope, sizes)
    }

    /// Check already decoded channels. `channels[n]` is SMn.
    pub fn validate(
        &self,
        channels: &[SyncManagerChannel],
        scope: CheckScope,
        sizes: ProcessDataSizes,
    ) -> Result<(), SmFault> {
        let mailbox = match scope {
            CheckScope::Mailbox | CheckScope::ProcessData => &self.config.mailbox.standard,
            CheckScope::Bootstrap => self
                .config
                .mailbox
                .bootstrap
                .as_ref()
                .ok_or(SmFault::new(MAILBOX_WRITE, SmFaultKind::Settings))?,
        };

        let checked = match scope {
            CheckScope::Mailbox | CheckScope::Bootstrap => 2,
            CheckScope::ProcessData => 4,
        };

        if channels.len() < checked {
            return Err(SmFault::new(channels.len() as u8, SmFaultKind::Disabled));
        }

        self.check_mailbox(
            MAILBOX_WRITE,
            &channels[usize::from(MAILBOX_WRITE)],
            mailbox,
            &mailbox.write,
            Direction::MainDeviceWrite,
        )?;
        self.check_mailbox(
            MAILBOX_READ,
            &channels[usize::from(MAILBOX_READ)],
            mailbox,
            &mailbox.read,
            Direction::MainDeviceRead,
        )?;

        if scope == CheckScope::ProcessData {
            self.check_process_data(
                PROCESS_DATA_OUT,
                &channels[usize::from(PROCESS_DATA_OUT)],
                sizes.outputs,
                &self.config.process_data.outputs,
                Direction::MainDeviceWrite,
            )?;
            self.check_process_data(
                PROCESS_DATA_IN,
                &channels[usize::from(PROCESS_DATA_IN)],
                sizes.inputs,
                &self.config.process_data.inputs,
                Direction::MainDeviceRead,
            )?;
        }

        let in_scope = match scope {
            CheckScope::Mailbox | CheckScope::Bootstrap => &channels[..2],
            CheckScope::ProcessData => channels,
        };

        check_overlap(in_scope)
    }

    fn check_mailbox(
        &self,
        index: u8,
        channel: &SyncManagerChannel,
        limits: &MailboxChannels,
        window: &SmWindow,
        direction: Direction,
    ) -> Result<(), SmFault> {
        let fault = |kind| {
            fmt::debug!("Mailbox SM{} rejected: {}", index, channel);

            Err(SmFault::new(index, kind))
        };

        if !channel.is_enabled() {
            return fault(SmFaultKind::Disabled);
        }

        if channel.control.operation_mode != OperationMode::Mailbox
            || channel.control.direction != direction
        {
            return fault(SmFaultKind::Settings);
        }

        let width = self.config.access_width;

        if !width.is_aligned(channel.length_bytes)
            || channel.length_bytes < limits.min_len
            || channel.length_bytes > limits.max_len
        {
            return fault(SmFaultKind::Size);
        }

        if !width.is_aligned(channel.physical_start_address)
            || !window.contains(channel.physical_start_address, channel.occupied_len())
        {
            return fault(SmFaultKind::Address);
        }

        Ok(())
    }

    fn check_process_data(
        &self,
        index: u8,
        channel: &SyncManagerChannel,
        size: u16,
        window: &SmWindow,
        direction: Direction,
    ) -> Result<(), SmFault> {
        let fault = |kind| {
            fmt::debug!(
                "Process data SM{} rejected for {} byte image: {}",
                index,
                size,
                channel
            );

            Err(SmFault::new(index, kind))
        };

        if size == 0 {
            // An unused direction must not be active.
            return if channel.is_enabled() {
                fault(SmFaultKind::Enabled)
            } else {
                Ok(())
            };
        }

        if !channel.enable.enable {
            return fault(SmFaultKind::Disabled);
        }

        if channel.length_bytes != size {
            return fault(SmFaultKind::Size);
        }

        if channel.control.direction != direction
            || channel.control.operation_mode.is_reserved()
        {
            return fault(SmFaultKind::Settings);
        }

        if channel.control.operation_mode != OperationMode::Buffered && self.config.sync.free_run
        {
            return fault(SmFaultKind::BufferMode);
        }

        if !self.config.access_width.is_aligned(channel.physical_start_address)
            || !window.contains(channel.physical_start_address, channel.occupied_len())
        {
            return fault(SmFaultKind::Address);
        }

        Ok(())
    }
}

/// Pairwise overlap check of all enabled channels.
fn check_overlap(channels: &[SyncManagerChannel]) -> Result<(), SmFault> {
    for (index, channel) in channels.iter().enumerate().filter(|(_, c)| c.is_enabled()) {
        let overlapping = channels[..index]
            .iter()
            .enumerate()
            .filter(|(_, other)| other.is_enabled())
            .find(|(_, other)| channel.overlaps(other));

        if let Some((other, _)) = overlapping {
            fmt::debug!("SM{} overlaps SM{}", index, other);

            return Err(SmFault::new(
                index as u8,
                SmFaultKind::Overlap { other: other as u8 },
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AccessWidth,
        sync_manager_channel::{Control, Enable},
    };

    fn mailbox(address: u16, direction: Direction) -> SyncManagerChannel {
        SyncManagerChannel {
            physical_start_address: address,
            length_bytes: 0x80,
            control: Control {
                operation_mode: OperationMode::Mailbox,
                direction,
                ..Control::default()
            },
            enable: Enable {
                enable: true,
                ..Enable::default()
            },
            ..SyncManagerChannel::default()
        }
    }

    fn process_data(address: u16, len: u16, direction: Direction) -> SyncManagerChannel {
        SyncManagerChannel {
            physical_start_address: address,
            length_bytes: len,
            control: Control {
                operation_mode: OperationMode::Buffered,
                direction,
                ..Control::default()
            },
            enable: Enable {
                enable: len > 0,
                ..Enable::default()
            },
            ..SyncManagerChannel::default()
        }
    }

    fn channels(outputs: u16, inputs: u16) -> [SyncManagerChannel; 4] {
        [
            mailbox(0x1000, Direction::MainDeviceWrite),
            mailbox(0x1080, Direction::MainDeviceRead),
            process_data(0x1100, outputs, Direction::MainDeviceWrite),
            process_data(0x1180, inputs, Direction::MainDeviceRead),
        ]
    }

    #[test]
    fn valid_configuration() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        assert_eq!(
            validator.validate(
                &channels(4, 6),
                CheckScope::ProcessData,
                ProcessDataSizes::new(6, 4)
            ),
            Ok(())
        );
    }

    #[test]
    fn mailbox_scope_ignores_process_data() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        let mut sms = channels(4, 6);
        sms[2].length_bytes = 0x333;

        assert_eq!(
            validator.validate(&sms[..2], CheckScope::Mailbox, ProcessDataSizes::default()),
            Ok(())
        );
    }

    #[test]
    fn mailbox_too_small() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        let mut sms = channels(0, 0);
        sms[1].length_bytes = 0x10;

        let fault = validator
            .validate(&sms, CheckScope::Mailbox, ProcessDataSizes::default())
            .unwrap_err();

        assert_eq!(fault, SmFault::new(1, SmFaultKind::Size));
        assert_eq!(
            fault.status_code(CheckScope::Mailbox),
            AlStatusCode::InvalidMailboxConfigurationPreOp
        );
        assert_eq!(
            fault.status_code(CheckScope::Bootstrap),
            AlStatusCode::InvalidMailboxConfiguration
        );
    }

    #[test]
    fn mailbox_wrong_direction() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        let mut sms = channels(0, 0);
        sms[0].control.direction = Direction::MainDeviceRead;

        assert_eq!(
            validator.validate(&sms, CheckScope::Mailbox, ProcessDataSizes::default()),
            Err(SmFault::new(0, SmFaultKind::Settings))
        );
    }

    #[test]
    fn reserved_settings_are_rejected() {
        let mut config = SubDeviceConfig::default();
        let sizes = ProcessDataSizes::new(6, 4);

        let mut sms = channels(4, 6);
        sms[3].control.direction = Direction::Reserved2;

        let fault = SyncManagerValidator::new(&config)
            .validate(&sms, CheckScope::ProcessData, sizes)
            .unwrap_err();

        assert_eq!(fault, SmFault::new(3, SmFaultKind::Settings));
        assert_eq!(
            fault.status_code(CheckScope::ProcessData),
            AlStatusCode::InvalidInputConfiguration
        );

        let mut sms = channels(4, 6);
        sms[1].control.direction = Direction::Reserved3;

        assert_eq!(
            SyncManagerValidator::new(&config).validate(&sms, CheckScope::Mailbox, sizes),
            Err(SmFault::new(1, SmFaultKind::Settings))
        );

        // Not mistaken for single buffer mode, even when three buffers are optional.
        config.sync.free_run = false;

        let mut sms = channels(4, 6);
        sms[2].control.operation_mode = OperationMode::Reserved1;

        assert_eq!(
            SyncManagerValidator::new(&config).validate(&sms, CheckScope::ProcessData, sizes),
            Err(SmFault::new(2, SmFaultKind::Settings))
        );
    }

    #[test]
    fn bootstrap_without_bootstrap_mailbox() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        assert!(
            validator
                .validate(&channels(0, 0), CheckScope::Bootstrap, ProcessDataSizes::default())
                .is_err()
        );
    }

    #[test]
    fn misaligned_address() {
        let config = SubDeviceConfig {
            access_width: AccessWidth::DWord,
            ..SubDeviceConfig::default()
        };
        let validator = SyncManagerValidator::new(&config);

        let mut sms = channels(4, 6);
        sms[3].physical_start_address = 0x1182;

        let fault = validator
            .validate(&sms, CheckScope::ProcessData, ProcessDataSizes::new(6, 4))
            .unwrap_err();

        assert_eq!(fault, SmFault::new(3, SmFaultKind::Address));
        assert_eq!(
            fault.status_code(CheckScope::ProcessData),
            AlStatusCode::InvalidInputConfiguration
        );
    }

    #[test]
    fn size_must_match_mapping() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        assert_eq!(
            validator.validate(
                &channels(4, 6),
                CheckScope::ProcessData,
                ProcessDataSizes::new(6, 8)
            ),
            Err(SmFault::new(2, SmFaultKind::Size))
        );
    }

    #[test]
    fn unused_direction_must_be_disabled() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        assert_eq!(
            validator.validate(
                &channels(4, 6),
                CheckScope::ProcessData,
                ProcessDataSizes::new(6, 0)
            ),
            Err(SmFault::new(2, SmFaultKind::Enabled))
        );

        // Enabled with zero length is accepted.
        let mut sms = channels(0, 6);
        sms[2].enable.enable = true;

        assert_eq!(
            validator.validate(&sms, CheckScope::ProcessData, ProcessDataSizes::new(6, 0)),
            Ok(())
        );
    }

    #[test]
    fn free_run_needs_three_buffers() {
        let mut config = SubDeviceConfig::default();
        let mut sms = channels(4, 6);
        sms[2].control.operation_mode = OperationMode::Mailbox;

        let fault = SyncManagerValidator::new(&config)
            .validate(&sms, CheckScope::ProcessData, ProcessDataSizes::new(6, 4))
            .unwrap_err();

        assert_eq!(fault.kind, SmFaultKind::BufferMode);
        assert_eq!(
            fault.status_code(CheckScope::ProcessData),
            AlStatusCode::FreeRunNeeds3BufferMode
        );

        config.sync.free_run = false;

        assert_eq!(
            SyncManagerValidator::new(&config).validate(
                &sms,
                CheckScope::ProcessData,
                ProcessDataSizes::new(6, 4)
            ),
            Ok(())
        );
    }

    #[test]
    fn extra_channel_overlap() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        let [sm0, sm1, sm2, sm3] = channels(4, 6);
        let sm4 = process_data(0x1084, 2, Direction::MainDeviceRead);

        let fault = validator
            .validate(
                &[sm0, sm1, sm2, sm3, sm4],
                CheckScope::ProcessData,
                ProcessDataSizes::new(6, 4),
            )
            .unwrap_err();

        assert_eq!(fault, SmFault::new(4, SmFaultKind::Overlap { other: 1 }));
        assert_eq!(
            fault.status_code(CheckScope::ProcessData),
            AlStatusCode::InvalidSyncManagerConfiguration
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn intersecting_channels_always_fault() {
        let config = SubDeviceConfig::default();
        let validator = SyncManagerValidator::new(&config);

        heckcheck::check(|(offset, len): (u8, u8)| {
            let len = u16::from(len.max(1));

            let mut sms = channels(len, len);

            // Place the inputs somewhere inside the triple buffered outputs.
            let occupied = sms[2].occupied_len() as u16;
            sms[3].physical_start_address =
                sms[2].physical_start_address + u16::from(offset) % occupied;

            let result =
                validator.validate(&sms, CheckScope::ProcessData, ProcessDataSizes::new(len, len));

            assert!(result.is_err(), "{:?} {:?}", sms[2], sms[3]);

            Ok(())
        });
    }
}
