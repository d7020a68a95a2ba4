//! Module mode control
//!
//! Configuration registers are only writable in freeze mode. Every transition
//! is a request bit followed by a busy wait on an acknowledge bit. The waits
//! are bounded by an iteration budget; when it runs out the transition fails
//! with [`Error::Timeout`] and the module is left in whatever state it
//! reached.
//!
//! None of this may run from interrupt context.

use super::regs::{Mcr, Registers, MCR};
use super::Error;

/// Mode of the module as reported by MCR
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum State {
    /// Module disabled (low power)
    Disabled,
    /// Participating in bus activity
    Normal,
    /// Freeze requested, not yet acknowledged
    FreezeRequested,
    /// Frozen, configuration registers writable
    Frozen,
    /// Soft reset in progress
    SoftReset,
    /// Leaving freeze or disable, module not ready yet
    NotReady,
}

impl State {
    /// Decodes the state from MCR
    pub fn from_mcr(mcr: u32) -> Self {
        let mcr = Mcr::from_bits_retain(mcr);

        if mcr.contains(Mcr::SOFTRST) {
            State::SoftReset
        } else if mcr.contains(Mcr::LPMACK) {
            State::Disabled
        } else if mcr.contains(Mcr::FRZACK) {
            State::Frozen
        } else if mcr.contains(Mcr::FRZ | Mcr::HALT) {
            State::FreezeRequested
        } else if mcr.contains(Mcr::NOTRDY) {
            State::NotReady
        } else {
            State::Normal
        }
    }
}

#[inline]
fn mcr<R: Registers>(regs: &R) -> Mcr {
    Mcr::from_bits_retain(regs.read(MCR))
}

/// Polls `done` up to `budget + 1` times
fn spin_until<R, F>(regs: &R, budget: u32, mut done: F) -> Result<(), Error>
where
    R: Registers,
    F: FnMut(Mcr) -> bool,
{
    for _ in 0..budget {
        if done(mcr(regs)) {
            return Ok(());
        }
        core::hint::spin_loop();
    }

    if done(mcr(regs)) {
        Ok(())
    } else {
        Err(Error::Timeout)
    }
}

/// Takes the module out of low power mode
pub(crate) fn enable<R: Registers>(regs: &mut R, budget: u32) -> Result<(), Error> {
    regs.modify(MCR, |r| r & !Mcr::MDIS.bits());
    spin_until(regs, budget, |mcr| !mcr.contains(Mcr::LPMACK)).map_err(|e| {
        warn!("module did not leave disable mode");
        e
    })
}

/// Puts the module into low power mode
pub(crate) fn disable<R: Registers>(regs: &mut R, budget: u32) -> Result<(), Error> {
    regs.modify(MCR, |r| r | Mcr::MDIS.bits());
    spin_until(regs, budget, |mcr| mcr.contains(Mcr::LPMACK)).map_err(|e| {
        warn!("module did not acknowledge disable mode");
        e
    })
}

/// Requests freeze mode and waits for the acknowledge.
///
/// Requesting freeze while frozen is harmless and succeeds again.
pub(crate) fn enter_freeze<R: Registers>(regs: &mut R, budget: u32) -> Result<(), Error> {
    trace!("entering freeze mode");
    regs.modify(MCR, |r| r | (Mcr::FRZ | Mcr::HALT).bits());
    spin_until(regs, budget, |mcr| mcr.contains(Mcr::FRZACK)).map_err(|e| {
        warn!("freeze mode not acknowledged");
        e
    })
}

/// Resets the module's internal state. Configuration in CTRL1 and the
/// mailbox RAM survive.
pub(crate) fn soft_reset<R: Registers>(regs: &mut R, budget: u32) -> Result<(), Error> {
    trace!("soft reset");
    regs.modify(MCR, |r| r | Mcr::SOFTRST.bits());
    spin_until(regs, budget, |mcr| !mcr.contains(Mcr::SOFTRST)).map_err(|e| {
        warn!("soft reset did not complete");
        e
    })
}

/// Leaves freeze mode and waits until the module is synchronized to the bus
pub(crate) fn exit_freeze<R: Registers>(regs: &mut R, budget: u32) -> Result<(), Error> {
    trace!("leaving freeze mode");
    regs.modify(MCR, |r| r & !(Mcr::FRZ | Mcr::HALT).bits());
    spin_until(regs, budget, |mcr| !mcr.contains(Mcr::FRZACK)).map_err(|e| {
        warn!("freeze acknowledge did not clear");
        e
    })?;
    spin_until(regs, budget, |mcr| !mcr.contains(Mcr::NOTRDY)).map_err(|e| {
        warn!("module stayed not ready");
        e
    })
}
