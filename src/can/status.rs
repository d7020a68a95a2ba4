//! Fault confinement and error reporting

use super::regs::{Registers, ECR, ESR1};
use super::FlexCan;

/// Fault confinement state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum ErrorState {
    /// Error counters below 128, the node sends active error flags
    ErrorActive,
    /// An error counter reached 128, the node sends passive error flags
    ErrorPassive,
    /// The transmit error counter exceeded 255, the node is off the bus.
    ///
    /// Automatic recovery is disabled; the module has to be reinitialized.
    BusOff,
}

impl ErrorState {
    const FLTCONF_SHIFT: u32 = 4;

    /// Decodes the `FLTCONF` field of ESR1
    pub fn from_esr1(esr1: u32) -> Self {
        match (esr1 >> Self::FLTCONF_SHIFT) & 0b11 {
            0b00 => ErrorState::ErrorActive,
            0b01 => ErrorState::ErrorPassive,
            _ => ErrorState::BusOff,
        }
    }
}

/// Transmit and receive error counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    pub tx: u8,
    pub rx: u8,
}

impl ErrorCounters {
    /// Decodes ECR
    pub fn from_ecr(ecr: u32) -> Self {
        ErrorCounters {
            tx: ecr as u8,
            rx: (ecr >> 8) as u8,
        }
    }
}

bitflags::bitflags! {
    /// Status bits of ESR1
    ///
    /// The protocol error bits are cleared by reading ESR1, the interrupt bits
    /// by writing 1.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ErrorFlags: u32 {
        /// Error interrupt
        const ERRINT = 1 << 1;
        /// Bus off interrupt
        const BOFFINT = 1 << 2;
        /// Receiving a frame
        const RX = 1 << 3;
        /// Transmitting a frame
        const TX = 1 << 6;
        /// Bus idle
        const IDLE = 1 << 7;
        /// Receive error counter at or above 96
        const RXWRN = 1 << 8;
        /// Transmit error counter at or above 96
        const TXWRN = 1 << 9;
        /// Stuffing error
        const STFERR = 1 << 10;
        /// Form error
        const FRMERR = 1 << 11;
        /// CRC error
        const CRCERR = 1 << 12;
        /// Acknowledge error
        const ACKERR = 1 << 13;
        /// A recessive bit was read back as dominant
        const BIT0ERR = 1 << 14;
        /// A dominant bit was read back as recessive
        const BIT1ERR = 1 << 15;
        /// Rx warning interrupt
        const RWRNINT = 1 << 16;
        /// Tx warning interrupt
        const TWRNINT = 1 << 17;
        /// Synchronized to the bus
        const SYNCH = 1 << 18;
        /// Bus off done interrupt
        const BOFFDONEINT = 1 << 19;
    }
}

impl ErrorFlags {
    /// Protocol errors seen on the bus
    pub const PROTOCOL: ErrorFlags = ErrorFlags::STFERR
        .union(ErrorFlags::FRMERR)
        .union(ErrorFlags::CRCERR)
        .union(ErrorFlags::ACKERR)
        .union(ErrorFlags::BIT0ERR)
        .union(ErrorFlags::BIT1ERR);

    /// Whether any protocol error was recorded
    pub fn has_protocol_error(&self) -> bool {
        self.intersects(Self::PROTOCOL)
    }
}

#[cfg(feature = "unstable-defmt")]
impl defmt::Format for ErrorFlags {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "ErrorFlags({=u32:#x})", self.bits());
    }
}

/// Error event handed to the error callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct ErrorEvent {
    /// Fault confinement state when the event was dispatched
    pub state: ErrorState,
    /// ESR1 status when the event was dispatched
    pub flags: ErrorFlags,
}

impl ErrorEvent {
    pub(crate) fn from_esr1(esr1: u32) -> Self {
        ErrorEvent {
            state: ErrorState::from_esr1(esr1),
            flags: ErrorFlags::from_bits_truncate(esr1),
        }
    }
}

impl<R: Registers, C> FlexCan<R, C> {
    /// Reads ESR1. The protocol error bits the read clears are latched until
    /// [`FlexCan::error_flags`] or an error event reports them.
    pub(crate) fn read_esr1(&self) -> u32 {
        let esr1 = self.regs.read(ESR1);
        let cleared = ErrorFlags::from_bits_truncate(esr1) & ErrorFlags::PROTOCOL;
        self.latched_errors
            .set(self.latched_errors.get() | cleared);
        esr1
    }

    pub(crate) fn take_latched_errors(&self) -> ErrorFlags {
        self.latched_errors.replace(ErrorFlags::empty())
    }

    /// Current fault confinement state.
    ///
    /// Protocol errors cleared by the status read are kept for
    /// [`FlexCan::error_flags`].
    pub fn error_state(&self) -> ErrorState {
        ErrorState::from_esr1(self.read_esr1())
    }

    /// Current error counters
    pub fn error_counters(&self) -> ErrorCounters {
        ErrorCounters::from_ecr(self.regs.read(ECR))
    }

    /// Reads the error status, including protocol errors seen by an earlier
    /// [`FlexCan::error_state`]. Reported protocol errors are cleared.
    pub fn error_flags(&self) -> ErrorFlags {
        let esr1 = self.read_esr1();
        ErrorFlags::from_bits_truncate(esr1) | self.take_latched_errors()
    }
}
