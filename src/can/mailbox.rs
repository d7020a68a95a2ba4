//! Mailbox pool
//!
//! The module has [`MAILBOX_COUNT`] message buffers. The lower half is used
//! for reception, the upper half for transmission. Each buffer is four words:
//!
//! | Word | Content |
//! |------|---------|
//! | CS   | CODE[27:24] SRR[22] IDE[21] RTR[20] DLC[19:16] TIMESTAMP[15:0] |
//! | ID   | PRIO[31:29], standard ID at [28:18], extended ID at [28:0] |
//! | DATA0 | bytes 0..4, byte 0 in bits [31:24] |
//! | DATA1 | bytes 4..8, byte 4 in bits [31:24] |
//!
//! The CODE field tells who owns a buffer. Reading CS locks the buffer
//! against move-in by the hardware until [`TIMER`](super::regs::TIMER) is
//! read; [`MailboxLock`] ties both reads to a scope.

use core::hint::spin_loop;
use core::ops::Range;

use super::frame::Frame;
use super::regs::{self, Registers};
use super::{Error, ExtendedId, Id, StandardId};

/// Number of message buffers
pub const MAILBOX_COUNT: usize = 32;

/// Mailboxes reserved for reception
pub const RX_MAILBOXES: Range<u8> = 0..16;

/// Mailboxes reserved for transmission
pub const TX_MAILBOXES: Range<u8> = 16..32;

/// Bits of IFLAG1/IMASK1 that belong to the receive region
pub const RX_REGION_MASK: u32 = 0x0000_FFFF;

/// Bits of IFLAG1/IMASK1 that belong to the transmit region
pub const TX_REGION_MASK: u32 = 0xFFFF_0000;

/// Index of a message buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct Mailbox(u8);

impl Mailbox {
    /// Returns the mailbox with `index`, if it exists.
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < MAILBOX_COUNT {
            Some(Mailbox(index))
        } else {
            None
        }
    }

    /// Validates that `index` is a transmit mailbox
    pub(crate) fn tx(index: u8) -> Result<Self, Error> {
        if TX_MAILBOXES.contains(&index) {
            Ok(Mailbox(index))
        } else {
            Err(Error::InvalidParameter)
        }
    }

    /// Validates that `index` is a receive mailbox
    pub(crate) fn rx(index: u8) -> Result<Self, Error> {
        if RX_MAILBOXES.contains(&index) {
            Ok(Mailbox(index))
        } else {
            Err(Error::InvalidParameter)
        }
    }

    /// Mailbox index
    pub const fn index(self) -> u8 {
        self.0
    }

    /// `true` for mailboxes of the transmit region
    pub fn is_tx(self) -> bool {
        TX_MAILBOXES.contains(&self.0)
    }

    /// `true` for mailboxes of the receive region
    pub fn is_rx(self) -> bool {
        RX_MAILBOXES.contains(&self.0)
    }

    /// Bit of this mailbox in IFLAG1 and IMASK1
    #[inline]
    pub(crate) const fn bit(self) -> u32 {
        1 << self.0
    }

    #[inline]
    pub(crate) const fn n(self) -> usize {
        self.0 as usize
    }
}

/// Contents of the CODE field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct Code(u8);

impl Code {
    /// Receive mailbox not active
    pub const RX_INACTIVE: Code = Code(0b0000);
    /// Receive mailbox armed, waiting for a frame
    pub const RX_EMPTY: Code = Code(0b0100);
    /// Receive mailbox holds a frame
    pub const RX_FULL: Code = Code(0b0010);
    /// Receive mailbox was overwritten before being serviced
    pub const RX_OVERRUN: Code = Code(0b0110);
    /// Receive mailbox answering a remote request
    pub const RX_RANSWER: Code = Code(0b1010);
    /// Transmit mailbox not active
    pub const TX_INACTIVE: Code = Code(0b1000);
    /// Transmit mailbox being aborted
    pub const TX_ABORT: Code = Code(0b1001);
    /// Transmit once. Sends a remote frame when RTR is set.
    pub const TX_DATA: Code = Code(0b1100);
    /// Transmit a response to a remote request
    pub const TX_TANSWER: Code = Code(0b1110);

    const RX_BUSY: u8 = 0b0001;
    const TX: u8 = 0b1000;
    const SHIFT: u32 = 24;

    /// Extracts the CODE field from a control/status word
    #[inline]
    pub const fn from_cs(cs: u32) -> Self {
        Code(((cs >> Self::SHIFT) & 0xF) as u8)
    }

    /// Places the code in a control/status word
    #[inline]
    pub const fn cs_bits(self) -> u32 {
        (self.0 as u32) << Self::SHIFT
    }

    /// Replaces the CODE field of a control/status word
    #[inline]
    pub(crate) const fn replace_in(self, cs: u32) -> u32 {
        (cs & !(0xF << Self::SHIFT)) | self.cs_bits()
    }

    /// Raw four bit value
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The hardware is moving a frame into or out of a receive mailbox
    pub fn is_rx_busy(self) -> bool {
        self.0 & Self::TX == 0 && self.0 & Self::RX_BUSY != 0
    }

    /// Transmit code
    pub fn is_tx(self) -> bool {
        self.0 & Self::TX != 0
    }

    /// A transmit mailbox may be written.
    ///
    /// Besides `TX_INACTIVE` this holds for receive codes: zero is the value
    /// after reset, and a sent remote frame turns its mailbox into `RX_EMPTY`
    /// to catch the response.
    pub fn is_tx_idle(self) -> bool {
        self == Code::TX_INACTIVE || !(self.is_tx() || self.is_rx_busy())
    }

    /// A receive mailbox holds a frame, possibly overwritten
    pub fn is_rx_full(self) -> bool {
        let code = Code(self.0 & !Self::RX_BUSY);
        code == Code::RX_FULL || code == Code::RX_OVERRUN
    }
}

/// Fields of a mailbox control/status word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ControlStatus {
    pub code: Code,
    pub srr: bool,
    pub ide: bool,
    pub rtr: bool,
    pub dlc: u8,
    pub timestamp: u16,
}

impl ControlStatus {
    const SRR: u32 = 1 << 22;
    const IDE: u32 = 1 << 21;
    const RTR: u32 = 1 << 20;
    const DLC_SHIFT: u32 = 16;
    const DLC_MASK: u32 = 0xF;

    pub fn from_bits(cs: u32) -> Self {
        ControlStatus {
            code: Code::from_cs(cs),
            srr: cs & Self::SRR != 0,
            ide: cs & Self::IDE != 0,
            rtr: cs & Self::RTR != 0,
            dlc: ((cs >> Self::DLC_SHIFT) & Self::DLC_MASK) as u8,
            timestamp: cs as u16,
        }
    }

    /// Control/status word that arms a transmit mailbox for `frame`
    pub fn for_transmit(frame: &Frame) -> Self {
        let ide = matches!(frame.id, Id::Extended(_));
        ControlStatus {
            code: Code::TX_DATA,
            srr: ide,
            ide,
            rtr: frame.remote,
            dlc: frame.dlc,
            timestamp: 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut cs = self.code.cs_bits();
        if self.srr {
            cs |= Self::SRR;
        }
        if self.ide {
            cs |= Self::IDE;
        }
        if self.rtr {
            cs |= Self::RTR;
        }
        cs | (u32::from(self.dlc) & Self::DLC_MASK) << Self::DLC_SHIFT | u32::from(self.timestamp)
    }
}

/// Identifier word encoding
pub(crate) struct IdWord;

impl IdWord {
    const STANDARD_SHIFT: u32 = 18;
    const STANDARD_MASK: u32 = 0x7FF;
    const EXTENDED_MASK: u32 = 0x1FFF_FFFF;

    pub fn encode(id: Id) -> u32 {
        match id {
            Id::Standard(id) => u32::from(id.as_raw()) << Self::STANDARD_SHIFT,
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// Places an identifier-width mask in identifier word layout
    pub fn encode_mask(mask: u32, extended: bool) -> u32 {
        if extended {
            mask & Self::EXTENDED_MASK
        } else {
            (mask & Self::STANDARD_MASK) << Self::STANDARD_SHIFT
        }
    }

    pub fn decode(word: u32, extended: bool) -> Id {
        if extended {
            Id::Extended(ExtendedId::new(word & Self::EXTENDED_MASK).unwrap_or(ExtendedId::ZERO))
        } else {
            let raw = (word >> Self::STANDARD_SHIFT) & Self::STANDARD_MASK;
            Id::Standard(StandardId::new(raw as u16).unwrap_or(StandardId::ZERO))
        }
    }
}

/// Packs the payload into the two data words
pub(crate) fn pack_data(data: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
    )
}

/// Inverse of [`pack_data`]
pub(crate) fn unpack_data(word0: u32, word1: u32) -> [u8; 8] {
    let mut data = [0; 8];
    data[..4].copy_from_slice(&word0.to_be_bytes());
    data[4..].copy_from_slice(&word1.to_be_bytes());
    data
}

/// A locked mailbox.
///
/// Creating the lock reads the control/status word, which locks the mailbox.
/// Dropping it reads the free running timer, which unlocks it again.
pub(crate) struct MailboxLock<'a, R: Registers> {
    regs: &'a R,
    mailbox: Mailbox,
    cs: ControlStatus,
}

impl<'a, R: Registers> MailboxLock<'a, R> {
    pub fn new(regs: &'a R, mailbox: Mailbox) -> Self {
        let cs = ControlStatus::from_bits(regs.read(regs::mb_cs(mailbox.n())));
        MailboxLock { regs, mailbox, cs }
    }

    pub fn control_status(&self) -> ControlStatus {
        self.cs
    }

    /// Re-reads the control/status word until the hardware finished moving a
    /// frame in, at most `budget` times. The mailbox stays locked.
    pub fn settle(&mut self, budget: u32) -> Result<(), Error> {
        let mut budget = budget;
        while self.cs.code.is_rx_busy() {
            if budget == 0 {
                return Err(Error::Timeout);
            }
            budget -= 1;
            spin_loop();
            self.cs = ControlStatus::from_bits(self.regs.read(regs::mb_cs(self.mailbox.n())));
        }

        Ok(())
    }

    /// Reads the frame held by the mailbox
    pub fn frame(&self) -> Frame {
        let n = self.mailbox.n();
        let id = IdWord::decode(self.regs.read(regs::mb_id(n)), self.cs.ide);
        let data = unpack_data(
            self.regs.read(regs::mb_word0(n)),
            self.regs.read(regs::mb_word1(n)),
        );

        Frame {
            id,
            remote: self.cs.rtr,
            dlc: self.cs.dlc.min(8),
            data,
            timestamp: self.cs.timestamp,
        }
    }
}

impl<'a, R: Registers> Drop for MailboxLock<'a, R> {
    fn drop(&mut self) {
        let _ = self.regs.read(regs::TIMER);
    }
}

/// Writes `frame` to a transmit mailbox. The control/status word goes last
/// since it hands the buffer to the hardware.
pub(crate) fn arm_transmit<R: Registers>(regs: &mut R, mailbox: Mailbox, frame: &Frame) {
    let n = mailbox.n();
    let (word0, word1) = pack_data(&frame.data);

    regs.write(regs::mb_id(n), IdWord::encode(frame.id));
    regs.write(regs::mb_word0(n), word0);
    regs.write(regs::mb_word1(n), word1);
    regs.barrier();
    regs.write(regs::mb_cs(n), ControlStatus::for_transmit(frame).bits());
}

/// Puts every mailbox into a known idle state. Must run in freeze mode.
///
/// Receive mailboxes end up inactive with an all-ones individual mask, so
/// nothing is accepted until a filter is configured.
pub(crate) fn reset_pool<R: Registers>(regs: &mut R) {
    for n in 0..MAILBOX_COUNT {
        regs.write(regs::mb_cs(n), 0);
        regs.write(regs::mb_id(n), 0);
        regs.write(regs::mb_word0(n), 0);
        regs.write(regs::mb_word1(n), 0);
        regs.write(regs::rximr(n), 0xFFFF_FFFF);
    }

    for index in TX_MAILBOXES {
        let n = usize::from(index);
        regs.write(regs::mb_cs(n), Code::TX_INACTIVE.cs_bits());
    }

    regs.write(regs::RXMGMASK, 0xFFFF_FFFF);
    regs.write(regs::IMASK1, 0);
    regs.write(regs::IFLAG1, 0xFFFF_FFFF);
}
