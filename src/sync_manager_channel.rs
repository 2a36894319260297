use core::fmt;

/// Sync manager channel, as programmed by the MainDevice into the ESC.
///
/// Defined in ETG1000.4 6.7.2
#[derive(Default, Copy, Clone, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 8)]
pub struct SyncManagerChannel {
    #[wire(bytes = 2)]
    pub physical_start_address: u16,
    #[wire(bytes = 2)]
    pub length_bytes: u16,
    #[wire(bytes = 1)]
    pub control: Control,
    #[wire(bytes = 1)]
    pub status: Status,
    #[wire(bytes = 2)]
    pub enable: Enable,
}

impl fmt::Debug for SyncManagerChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncManagerChannel")
            .field(
                "physical_start_address",
                &format_args!("{:#06x}", self.physical_start_address),
            )
            .field(
                "length_bytes",
                &format_args!("{:#06x} ({})", self.length_bytes, self.length_bytes),
            )
            .field("control", &self.control)
            .field("status", &self.status)
            .field("enable", &self.enable)
            .finish()
    }
}

impl fmt::Display for SyncManagerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "start {:#06x}, size {:#06x} ({}), direction {:?}, mode {:?}, {}",
            self.physical_start_address,
            self.length_bytes,
            self.length_bytes,
            self.control.direction,
            self.control.operation_mode,
            if self.is_enabled() {
                "enabled"
            } else {
                "disabled"
            },
        ))
    }
}

impl SyncManagerChannel {
    /// The MainDevice activated this channel and it covers at least one byte.
    pub fn is_enabled(&self) -> bool {
        self.enable.enable && self.length_bytes > 0
    }

    /// Number of bytes of process RAM the channel occupies.
    ///
    /// Buffered channels are tripled by the ESC, so they use three times their configured
    /// length.
    pub fn occupied_len(&self) -> u32 {
        let len = u32::from(self.length_bytes);

        match self.control.operation_mode {
            OperationMode::Buffered => len * 3,
            OperationMode::Mailbox | OperationMode::Reserved1 | OperationMode::Reserved3 => len,
        }
    }

    /// One past the last byte of process RAM the channel occupies.
    pub fn end_address(&self) -> u32 {
        u32::from(self.physical_start_address) + self.occupied_len()
    }

    /// Whether the occupied ranges of two channels intersect.
    pub fn overlaps(&self, other: &Self) -> bool {
        u32::from(self.physical_start_address) < other.end_address()
            && u32::from(other.physical_start_address) < self.end_address()
    }
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 1)]
pub struct Control {
    #[wire(bits = 2)]
    pub operation_mode: OperationMode,
    #[wire(bits = 2)]
    pub direction: Direction,
    #[wire(bits = 1)]
    pub ecat_event_enable: bool,
    #[wire(bits = 1)]
    pub dls_user_event_enable: bool,
    #[wire(bits = 1, post_skip = 1)]
    pub watchdog_enable: bool,
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 1)]
pub struct Status {
    #[wire(bits = 1)]
    pub has_write_event: bool,
    #[wire(bits = 1, post_skip = 1)]
    pub has_read_event: bool,
    #[wire(bits = 1)]
    pub mailbox_full: bool,
    #[wire(bits = 2)]
    pub buffer_state: BufferState,
    #[wire(bits = 1)]
    pub read_buffer_open: bool,
    #[wire(bits = 1)]
    pub write_buffer_open: bool,
}

/// Described in ETG1000.4 6.7.2 Sync Manager Attributes
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct Enable {
    // ---
    // Activate register, written by the MainDevice.
    // ---
    #[wire(bits = 1)]
    pub enable: bool,
    #[wire(bits = 1, post_skip = 4)]
    pub repeat: bool,
    /// DC Event 0 with EtherCAT write.
    #[wire(bits = 1)]
    pub enable_dc_event_bus_write: bool,
    /// DC Event 0 with local write.
    #[wire(bits = 1)]
    pub enable_dc_event_local_write: bool,
    // ---
    // PDI control register, written by this SubDevice.
    // ---
    /// Set to deactivate the channel from the PDI side.
    #[wire(bits = 1)]
    pub channel_pdi_disabled: bool,
    #[wire(bits = 1, post_skip = 6)]
    pub repeat_ack: bool,
}

/// Buffer type of a sync manager channel.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bits = 2)]
#[repr(u8)]
pub enum OperationMode {
    /// Three buffer mode, used for cyclic process data.
    #[default]
    Buffered = 0x00,
    /// Reserved.
    Reserved1 = 0x01,
    /// Single buffer mode, used for mailboxes.
    Mailbox = 0x02,
    /// Reserved.
    Reserved3 = 0x03,
}

impl OperationMode {
    /// Whether the MainDevice wrote a reserved bit pattern.
    pub fn is_reserved(self) -> bool {
        matches!(self, OperationMode::Reserved1 | OperationMode::Reserved3)
    }
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bits = 2)]
#[repr(u8)]
pub enum Direction {
    /// Data flows from this SubDevice to the MainDevice, e.g. inputs or the mailbox-in channel.
    #[default]
    MainDeviceRead = 0x00,
    /// Data flows from the MainDevice to this SubDevice, e.g. outputs or the mailbox-out channel.
    MainDeviceWrite = 0x01,
    /// Reserved.
    Reserved2 = 0x02,
    /// Reserved.
    Reserved3 = 0x03,
}

impl Direction {
    /// Whether the MainDevice wrote a reserved bit pattern.
    pub fn is_reserved(self) -> bool {
        matches!(self, Direction::Reserved2 | Direction::Reserved3)
    }
}

/// Buffer state.
///
/// Somewhat described in ETG1000.4 Figure 32 – SyncM mailbox interaction.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bits = 2)]
#[repr(u8)]
pub enum BufferState {
    /// First buffer.
    #[default]
    First = 0x00,
    /// Second buffer.
    Second = 0x01,
    /// Third buffer.
    Third = 0x02,
    /// Next buffer.
    Next = 0x03,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized};

    #[test]
    fn size() {
        // Packed size
        assert_eq!(SyncManagerChannel::PACKED_LEN, 8);
    }

    #[test]
    fn decode_one() {
        // Fields are little endian
        // Taken from `soem-single-lan9252.pcap`
        let raw = [
            // Start address
            0x00, 0x10, //
            // Length
            0x80, 0x00, //
            // Control
            0x26, //
            // Status
            0x00, //
            // Enable
            0x01, 0x00,
        ];

        let parsed = SyncManagerChannel::unpack_from_slice(&raw).unwrap();

        assert_eq!(
            parsed,
            SyncManagerChannel {
                physical_start_address: 0x1000,
                length_bytes: 0x0080,
                control: Control {
                    operation_mode: OperationMode::Mailbox,
                    direction: Direction::MainDeviceWrite,
                    ecat_event_enable: false,
                    dls_user_event_enable: true,
                    watchdog_enable: false,
                },
                status: Status::default(),
                enable: Enable {
                    enable: true,
                    ..Enable::default()
                }
            }
        )
    }

    #[test]
    fn decode_process_data_outputs() {
        // SM2 with watchdog enabled, as written by most MainDevices for outputs.
        let raw = [0x00, 0x11, 0x02, 0x00, 0x64, 0x00, 0x01, 0x01];

        let parsed = SyncManagerChannel::unpack_from_slice(&raw).unwrap();

        assert_eq!(parsed.control.operation_mode, OperationMode::Buffered);
        assert_eq!(parsed.control.direction, Direction::MainDeviceWrite);
        assert!(parsed.control.watchdog_enable);
        assert!(parsed.enable.channel_pdi_disabled);
        assert_eq!(parsed.occupied_len(), 6);
    }

    #[test]
    fn reserved_bits_are_kept() {
        // Direction bits `0b10` are reserved.
        let raw = [0x00, 0x10, 0x80, 0x00, 0x08, 0x00, 0x01, 0x00];

        let parsed = SyncManagerChannel::unpack_from_slice(&raw).unwrap();

        assert_eq!(parsed.control.direction, Direction::Reserved2);
        assert!(parsed.control.direction.is_reserved());
        assert!(!parsed.control.operation_mode.is_reserved());

        // Operation mode `0b11`.
        let raw = [0x00, 0x10, 0x80, 0x00, 0x07, 0x00, 0x01, 0x00];

        let parsed = SyncManagerChannel::unpack_from_slice(&raw).unwrap();

        assert_eq!(parsed.control.operation_mode, OperationMode::Reserved3);
        assert_eq!(parsed.control.direction, Direction::MainDeviceWrite);
    }

    #[test]
    fn overlap_uses_tripled_buffers() {
        let outputs = SyncManagerChannel {
            physical_start_address: 0x1100,
            length_bytes: 0x10,
            enable: Enable {
                enable: true,
                ..Enable::default()
            },
            ..SyncManagerChannel::default()
        };

        let inputs = SyncManagerChannel {
            physical_start_address: 0x1120,
            ..outputs
        };

        assert!(outputs.overlaps(&inputs));

        let inputs = SyncManagerChannel {
            physical_start_address: 0x1130,
            ..outputs
        };

        assert!(!outputs.overlaps(&inputs));
        assert!(!inputs.overlaps(&outputs));
    }
}
