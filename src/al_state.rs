/// AL (application layer) state of this SubDevice.
///
/// Requested by the MainDevice through register `0x0120`
/// ([`RegisterAddress::AlControl`](crate::register::RegisterAddress::AlControl)) and reported back
/// in register `0x0130` ([`RegisterAddress::AlStatus`](crate::register::RegisterAddress::AlStatus)).
///
/// Defined in ETG1000.6 6.4.1, ETG1000.6 Table 9.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ethercrab_wire::EtherCrabWireReadWrite)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum AlState {
    /// EtherCAT `INIT` state.
    Init = 0x01,
    /// EtherCAT `PRE-OP` state.
    PreOp = 0x02,
    /// EtherCAT `BOOT` state.
    Bootstrap = 0x03,
    /// EtherCAT `SAFE-OP` state.
    SafeOp = 0x04,
    /// EtherCAT `OP` state.
    Op = 0x08,
    /// A value the MainDevice requested that is not a known state.
    #[wire(catch_all)]
    Other(u8),
}

impl Default for AlState {
    fn default() -> Self {
        Self::Init
    }
}

impl AlState {
    /// Position of this state in the INIT -> OP ladder.
    ///
    /// `BOOT` sits one rung above `INIT` as it can only be reached from, and left towards, `INIT`.
    /// Unknown values rank as `INIT`.
    pub(crate) fn rank(self) -> u8 {
        match self {
            AlState::Init | AlState::Other(_) => 0,
            AlState::PreOp | AlState::Bootstrap => 1,
            AlState::SafeOp => 2,
            AlState::Op => 3,
        }
    }

    /// Whether this is one of the five states defined by ETG1000.6.
    pub fn is_known(self) -> bool {
        !matches!(self, AlState::Other(_))
    }
}

impl core::fmt::Display for AlState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AlState::Init => f.write_str("Init"),
            AlState::PreOp => f.write_str("Pre-Operational"),
            AlState::Bootstrap => f.write_str("Bootstrap"),
            AlState::SafeOp => f.write_str("Safe-Operational"),
            AlState::Op => f.write_str("Operational"),
            AlState::Other(value) => write!(f, "Other({:#04x})", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethercrab_wire::EtherCrabWireRead;

    #[test]
    fn unknown_request_is_caught() {
        assert_eq!(AlState::unpack_from_slice(&[0x05]), Ok(AlState::Other(0x05)));
        assert_eq!(AlState::unpack_from_slice(&[0x08]), Ok(AlState::Op));
        assert!(!AlState::Other(0).is_known());
    }

    #[test]
    fn display() {
        assert_eq!(AlState::SafeOp.to_string(), "Safe-Operational");
        assert_eq!(AlState::Other(0x0e).to_string(), "Other(0x0e)");
    }
}
