//! Access to the EtherCAT SubDevice Controller (ESC) register space.

use crate::{
    al_control::AlStatus, al_status_code::AlStatusCode, error::Error,
    register::RegisterAddress,
};
use ethercrab_wire::{EtherCrabWireRead, EtherCrabWireSized, EtherCrabWireWriteSized};

/// Raw register access over the PDI.
///
/// Implementations talk to the ESC through SPI, a parallel bus or shared memory. Access is
/// infallible at this level: a broken PDI is a hardware fault outside the scope of the AL.
pub trait Esc {
    /// Read `buf.len()` bytes starting at `address`.
    fn read(&mut self, address: u16, buf: &mut [u8]);

    /// Write `data` starting at `address`.
    fn write(&mut self, address: u16, data: &[u8]);

    /// Read and decode a register.
    fn read_register<T>(&mut self, address: impl Into<u16>) -> Result<T, Error>
    where
        Self: Sized,
        T: EtherCrabWireRead + EtherCrabWireSized,
    {
        let mut buf = T::buffer();

        self.read(address.into(), buf.as_mut());

        T::unpack_from_slice(buf.as_ref()).map_err(Error::from)
    }

    /// Encode and write a register.
    fn write_register<T>(&mut self, address: impl Into<u16>, value: T)
    where
        Self: Sized,
        T: EtherCrabWireWriteSized,
    {
        self.write(address.into(), value.pack().as_ref());
    }
}

impl<E> Esc for &mut E
where
    E: Esc,
{
    fn read(&mut self, address: u16, buf: &mut [u8]) {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u16, data: &[u8]) {
        (**self).write(address, data)
    }
}

/// Size of the register and process RAM image held by [`RamEsc`].
pub const RAM_ESC_SIZE: usize = 0x2000;

/// An ESC simulated in RAM.
///
/// Writes from the MainDevice side are simulated with [`RamEsc::poke`] and friends. Useful for
/// host side testing of the application layer.
pub struct RamEsc {
    memory: [u8; RAM_ESC_SIZE],
}

impl Default for RamEsc {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for RamEsc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RamEsc")
            .field("al_status", &AlStatus::from_byte(self.memory[0x0130]))
            .field("al_status_code", &self.al_status_code())
            .finish_non_exhaustive()
    }
}

impl RamEsc {
    /// Create a zeroed register image.
    pub const fn new() -> Self {
        Self {
            memory: [0u8; RAM_ESC_SIZE],
        }
    }

    /// Read bytes without going through the [`Esc`] trait, e.g. to check what the SubDevice
    /// published.
    pub fn peek(&self, address: u16, len: usize) -> &[u8] {
        let start = usize::from(address).min(RAM_ESC_SIZE);
        let end = (start + len).min(RAM_ESC_SIZE);

        &self.memory[start..end]
    }

    /// Write bytes as the MainDevice would.
    pub fn poke(&mut self, address: u16, data: &[u8]) {
        let start = usize::from(address).min(RAM_ESC_SIZE);
        let end = (start + data.len()).min(RAM_ESC_SIZE);

        self.memory[start..end].copy_from_slice(&data[..end - start]);
    }

    /// Write a register value as the MainDevice would.
    pub fn poke_register<T>(&mut self, address: impl Into<u16>, value: T)
    where
        T: EtherCrabWireWriteSized,
    {
        self.poke(address.into(), value.pack().as_ref());
    }

    /// Current content of the AL status register.
    pub fn al_status(&self) -> AlStatus {
        AlStatus::from_byte(self.memory[usize::from(u16::from(RegisterAddress::AlStatus))])
    }

    /// Current content of the AL status code register.
    pub fn al_status_code(&self) -> AlStatusCode {
        let raw = self.peek(RegisterAddress::AlStatusCode.into(), 2);

        AlStatusCode::from(u16::from_le_bytes([raw[0], raw[1]]))
    }

    /// Raw AL status code register, for when it carries the device ID.
    pub fn al_status_code_raw(&self) -> u16 {
        let raw = self.peek(RegisterAddress::AlStatusCode.into(), 2);

        u16::from_le_bytes([raw[0], raw[1]])
    }

    /// Whether the SubDevice deactivated sync manager `index` from the PDI side.
    pub fn sync_manager_pdi_disabled(&self, index: u8) -> bool {
        self.memory[usize::from(RegisterAddress::sync_manager_pdi_control(index))] & 0x01 > 0
    }
}

impl Esc for RamEsc {
    fn read(&mut self, address: u16, buf: &mut [u8]) {
        let src = self.peek(address, buf.len());

        buf[..src.len()].copy_from_slice(src);
    }

    fn write(&mut self, address: u16, data: &[u8]) {
        self.poke(address, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{al_state::AlState, al_control::AlControl};

    #[test]
    fn typed_round_trip() {
        let mut esc = RamEsc::new();

        esc.poke_register(RegisterAddress::AlControl, AlControl::acknowledge(AlState::PreOp));

        let control = esc
            .read_register::<AlControl>(RegisterAddress::AlControl)
            .unwrap();

        assert_eq!(control, AlControl::acknowledge(AlState::PreOp));
        assert_eq!(esc.peek(0x0120, 2), &[0x12, 0x00]);
    }

    #[test]
    fn status_code_accessor() {
        let mut esc = RamEsc::new();

        esc.write_register(RegisterAddress::AlStatusCode, AlStatusCode::SyncManagerWatchdog);

        assert_eq!(esc.al_status_code(), AlStatusCode::SyncManagerWatchdog);
    }
}
