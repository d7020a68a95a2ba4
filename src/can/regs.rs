//! Register access
//!
//! The driver never touches memory directly. Every access goes through the
//! [`Registers`] trait, which is implemented by [`Mmio`] for the real
//! peripheral. Offsets are relative to the module base address.

use core::ptr;

/// Module Configuration Register
pub const MCR: usize = 0x00;
/// Control 1 Register
pub const CTRL1: usize = 0x04;
/// Free Running Timer. Reading it releases the mailbox lock.
pub const TIMER: usize = 0x08;
/// Rx Mailboxes Global Mask Register
pub const RXMGMASK: usize = 0x10;
/// Error Counter
pub const ECR: usize = 0x1C;
/// Error and Status 1 Register
pub const ESR1: usize = 0x20;
/// Interrupt Masks 1 Register
pub const IMASK1: usize = 0x28;
/// Interrupt Flags 1 Register
pub const IFLAG1: usize = 0x30;

const MB_BASE: usize = 0x80;
const MB_STRIDE: usize = 0x10;
const RXIMR_BASE: usize = 0x880;

/// Control and status word of mailbox `n`
#[inline]
pub const fn mb_cs(n: usize) -> usize {
    MB_BASE + n * MB_STRIDE
}

/// Identifier word of mailbox `n`
#[inline]
pub const fn mb_id(n: usize) -> usize {
    mb_cs(n) + 0x4
}

/// First data word (bytes 0..4) of mailbox `n`
#[inline]
pub const fn mb_word0(n: usize) -> usize {
    mb_cs(n) + 0x8
}

/// Second data word (bytes 4..8) of mailbox `n`
#[inline]
pub const fn mb_word1(n: usize) -> usize {
    mb_cs(n) + 0xC
}

/// Individual mask register of mailbox `n`
#[inline]
pub const fn rximr(n: usize) -> usize {
    RXIMR_BASE + n * 4
}

bitflags::bitflags! {
    /// MCR bits
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mcr: u32 {
        /// Module disable
        const MDIS = 1 << 31;
        /// Freeze enable
        const FRZ = 1 << 30;
        /// Rx FIFO enable
        const RFEN = 1 << 29;
        /// Halt FlexCAN
        const HALT = 1 << 28;
        /// FlexCAN not ready
        const NOTRDY = 1 << 27;
        /// Soft reset
        const SOFTRST = 1 << 25;
        /// Freeze mode acknowledge
        const FRZACK = 1 << 24;
        /// Supervisor mode
        const SUPV = 1 << 23;
        /// Low-power mode acknowledge
        const LPMACK = 1 << 20;
        /// Self reception disable
        const SRXDIS = 1 << 17;
        /// Individual Rx masking and queue enable
        const IRMQ = 1 << 16;
        /// Abort enable
        const AEN = 1 << 12;
        /// Number of the last mailbox
        const MAXMB = 0x7F;
    }
}

bitflags::bitflags! {
    /// CTRL1 single-bit fields. Timing fields are handled by `BitTiming`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Ctrl1: u32 {
        /// Bus off interrupt mask
        const BOFFMSK = 1 << 15;
        /// Error interrupt mask
        const ERRMSK = 1 << 14;
        /// Protocol engine clock source: peripheral clock when set
        const CLKSRC = 1 << 13;
        /// Loop back mode
        const LPB = 1 << 12;
        /// Tx warning interrupt mask
        const TWRNMSK = 1 << 11;
        /// Rx warning interrupt mask
        const RWRNMSK = 1 << 10;
        /// Sampling mode: three samples per bit
        const SMP = 1 << 7;
        /// Bus off recovery disabled
        const BOFFREC = 1 << 6;
        /// Timer sync
        const TSYN = 1 << 5;
        /// Lowest buffer transmitted first
        const LBUF = 1 << 4;
        /// Listen-only mode
        const LOM = 1 << 3;
    }
}

/// Access to a FlexCAN register block.
///
/// Reads take `&self` but are not free of side effects: reading a mailbox
/// control/status word locks that mailbox and reading [`TIMER`] unlocks it.
pub trait Registers {
    /// Reads the 32-bit register at `offset`
    fn read(&self, offset: usize) -> u32;

    /// Writes the 32-bit register at `offset`
    fn write(&mut self, offset: usize, value: u32);

    /// Read-modify-write of the register at `offset`
    #[inline]
    fn modify<F>(&mut self, offset: usize, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let value = self.read(offset);
        self.write(offset, f(value));
    }

    /// Orders all previous writes before any following write.
    ///
    /// Issued before the control/status word that arms a mailbox.
    #[inline]
    fn barrier(&self) {}
}

/// FlexCAN modules of the S32K1xx family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum Instance {
    /// FlexCAN0
    Can0,
    /// FlexCAN1
    Can1,
    /// FlexCAN2
    Can2,
}

impl Instance {
    /// Base address of the module's register block
    pub const fn base_address(self) -> usize {
        match self {
            Instance::Can0 => 0x4002_4000,
            Instance::Can1 => 0x4002_5000,
            Instance::Can2 => 0x4002_B000,
        }
    }
}

/// Memory mapped register block of a FlexCAN module
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Creates an accessor for the register block of `instance`.
    ///
    /// # Safety
    ///
    /// The caller must own the module: nothing else may access its registers
    /// for as long as the returned value (or the driver built from it) lives.
    pub const unsafe fn new(instance: Instance) -> Self {
        Mmio {
            base: instance.base_address(),
        }
    }

    /// Creates an accessor for a register block at an arbitrary address.
    ///
    /// # Safety
    ///
    /// Same as [`Mmio::new`]; additionally `base` must be the address of a
    /// FlexCAN register block.
    pub const unsafe fn from_address(base: usize) -> Self {
        Mmio { base }
    }

    /// Base address of the register block
    pub const fn base_address(&self) -> usize {
        self.base
    }
}

impl Registers for Mmio {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        // NOTE(unsafe) `Mmio` owns the register block, see `Mmio::new`
        unsafe { ptr::read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    fn write(&mut self, offset: usize, value: u32) {
        // NOTE(unsafe) `Mmio` owns the register block, see `Mmio::new`
        unsafe { ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    #[inline]
    fn barrier(&self) {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::dmb();
        #[cfg(not(target_arch = "arm"))]
        core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_layout() {
        assert_eq!(mb_cs(0), 0x80);
        assert_eq!(mb_id(0), 0x84);
        assert_eq!(mb_word0(0), 0x88);
        assert_eq!(mb_word1(0), 0x8C);
        assert_eq!(mb_cs(31), 0x270);
        assert_eq!(rximr(0), 0x880);
        assert_eq!(rximr(31), 0x8FC);
    }

    #[test]
    fn instance_addresses() {
        // NOTE(unsafe) never dereferenced
        let mmio = unsafe { Mmio::new(Instance::Can2) };
        assert_eq!(mmio.base_address(), 0x4002_B000);
        assert_eq!(Instance::Can1.base_address(), 0x4002_5000);
    }
}
