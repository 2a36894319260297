//! AL control (`0x0120`) and AL status (`0x0130`) registers.

use crate::al_state::AlState;

/// AL control register, written by the MainDevice to request a state change.
///
/// Defined in ETG1000.4 Table 35.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct AlControl {
    /// Requested AL state.
    #[wire(bits = 4)]
    pub state: AlState,
    /// Error indication acknowledge.
    #[wire(bits = 1)]
    pub error: bool,
    /// Explicit device identification request.
    #[wire(bits = 1, post_skip = 10)]
    pub id_request: bool,
}

impl AlControl {
    /// Request a state without acknowledging a pending error.
    pub fn new(state: AlState) -> Self {
        Self {
            state,
            error: false,
            id_request: false,
        }
    }

    /// Request a state and acknowledge the current error indication.
    pub fn acknowledge(state: AlState) -> Self {
        Self {
            state,
            error: true,
            id_request: false,
        }
    }
}

/// AL status register, written by this SubDevice.
///
/// Defined in ETG1000.4 Table 35.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[wire(bytes = 2)]
pub struct AlStatus {
    /// Current AL state.
    #[wire(bits = 4)]
    pub state: AlState,
    /// Set when the last state change failed or a local error occurred. The reason is held in the
    /// AL status code register.
    #[wire(bits = 1)]
    pub error: bool,
    /// Set when the AL status code register holds the explicit device ID instead of an error.
    #[wire(bits = 1, post_skip = 10)]
    pub id_loaded: bool,
}

impl AlStatus {
    /// Pack into the low byte of the register.
    pub(crate) fn to_byte(self) -> u8 {
        (u8::from(self.state) & 0x0f) | (u8::from(self.error) << 4) | (u8::from(self.id_loaded) << 5)
    }

    /// Unpack from the low byte of the register.
    pub(crate) fn from_byte(byte: u8) -> Self {
        Self {
            state: AlState::from(byte & 0x0f),
            error: byte & (1 << 4) > 0,
            id_loaded: byte & (1 << 5) > 0,
        }
    }
}
