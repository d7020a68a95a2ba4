//! # Controller Area Network (CAN) Interface
//!
//! Driver for the FlexCAN modules of the S32K1xx family, operated with 32
//! message buffers and no receive FIFO.
//!
//! ## Mailbox partition
//!
//! | Mailboxes | Role     |
//! |-----------|----------|
//! | 0..16     | Receive  |
//! | 16..32    | Transmit |
//!
//! Receive mailboxes stay inactive until a filter is configured with
//! [`FlexCan::config_rx_filter`]. Every receive mailbox has its own
//! individual mask.
//!
//! ## Usage
//!
//! Frames can be moved either by polling ([`FlexCan::send`],
//! [`FlexCan::receive`] and their blocking variants) or from the interrupt
//! handler through [`FlexCan::on_interrupt`] and installed callbacks. Polling
//! a mailbox that also has a callback installed races with the interrupt
//! handler and is not supported.
//!
//! Clocks and pins are configured by the application before calling
//! [`FlexCan::init`].

pub mod config;
pub mod filter;
pub mod frame;
mod hal;
pub mod interrupt;
pub mod mailbox;
pub mod mode;
pub mod regs;
pub mod status;
pub mod timing;

#[cfg(test)]
mod sim;

use core::cell::Cell;
use core::hint::spin_loop;

use fugit::{HertzU32, MillisDurationU32};

pub use crate::hal::can::{ExtendedId, Id, StandardId};
pub use config::{ClockSource, Config, Mode};
pub use filter::RxFilter;
pub use frame::{Frame, IdWidth};
pub use interrupt::{Dispatched, ErrorCallback, RxCallback, TxCallback};
pub use mailbox::{Code, Mailbox, MAILBOX_COUNT, RX_MAILBOXES, TX_MAILBOXES};
pub use mode::State;
pub use regs::{Instance, Mmio, Registers};
pub use status::{ErrorCounters, ErrorEvent, ErrorFlags, ErrorState};
pub use timing::{calculate_timing, BitTiming};

use crate::hal::blocking::delay::DelayMs;
use frame::MAX_DLC;
use interrupt::Callbacks;
use mailbox::{ControlStatus, MailboxLock};
use regs::{Ctrl1, Mcr, CTRL1, IFLAG1, IMASK1, MCR};

/// CAN driver error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Mailbox outside of its region, or a parameter out of range
    InvalidParameter,
    /// The module is disabled
    NotInitialized,
    /// The transmit mailbox still holds a pending frame
    Busy,
    /// A mode handshake or a blocking call ran out of time
    Timeout,
}

impl crate::hal::can::Error for Error {
    fn kind(&self) -> crate::hal::can::ErrorKind {
        crate::hal::can::ErrorKind::Other
    }
}

/// Result of [`FlexCan::abort_transmission`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum AbortOutcome {
    /// The pending frame was withdrawn
    Aborted,
    /// The frame went out before the abort took effect
    Transmitted,
    /// Nothing was pending
    Idle,
}

/// An initialized FlexCAN module.
///
/// `R` is the register block, `C` the context handed to callbacks by
/// [`FlexCan::on_interrupt`].
pub struct FlexCan<R: Registers, C = ()> {
    regs: R,
    clock: HertzU32,
    bitrate: HertzU32,
    timing: BitTiming,
    mode: Mode,
    self_reception: bool,
    mode_timeout: u32,
    callbacks: Callbacks<C>,
    /// Protocol errors cleared by a read of ESR1 but not reported yet
    latched_errors: Cell<ErrorFlags>,
}

impl<R: Registers, C> FlexCan<R, C> {
    /// Initializes the module.
    ///
    /// The module ends up running in the configured mode with every receive
    /// mailbox inactive, every transmit mailbox idle and all mailbox
    /// interrupts masked.
    pub fn init(mut regs: R, config: Config) -> Result<Self, Error> {
        let timing = BitTiming::calculate(config.clock, config.bitrate)?;
        let budget = config.mode_timeout;

        // The clock source can only be selected while the module is disabled
        mode::disable(&mut regs, budget)?;
        regs.modify(CTRL1, |r| match config.clock_source {
            ClockSource::Peripheral => r | Ctrl1::CLKSRC.bits(),
            ClockSource::Oscillator => r & !Ctrl1::CLKSRC.bits(),
        });
        mode::enable(&mut regs, budget)?;

        mode::enter_freeze(&mut regs, budget)?;
        mode::soft_reset(&mut regs, budget)?;
        mode::enter_freeze(&mut regs, budget)?;

        let mut can = FlexCan {
            regs,
            clock: config.clock,
            bitrate: config.bitrate,
            timing,
            mode: config.mode,
            self_reception: config.self_reception,
            mode_timeout: budget,
            callbacks: Callbacks::new(),
            latched_errors: Cell::new(ErrorFlags::empty()),
        };

        can.write_mcr();
        can.write_ctrl1();
        mailbox::reset_pool(&mut can.regs);

        mode::exit_freeze(&mut can.regs, budget)?;

        debug!(
            "initialized: {=u32} bit/s, prescaler {=u16}, {=u8} tq",
            can.bitrate.raw(),
            can.timing.prescaler(),
            can.timing.quanta()
        );

        Ok(can)
    }

    /// Disables the module and releases the register block
    pub fn deinit(mut self) -> Result<R, Error> {
        self.regs.write(IMASK1, 0);
        self.regs.modify(CTRL1, |r| {
            r & !(Ctrl1::ERRMSK | Ctrl1::BOFFMSK | Ctrl1::TWRNMSK | Ctrl1::RWRNMSK).bits()
        });
        mode::disable(&mut self.regs, self.mode_timeout)?;
        debug!("disabled");

        Ok(self.regs)
    }

    /// Mode of the module as reported by the hardware
    pub fn state(&self) -> State {
        State::from_mcr(self.regs.read(MCR))
    }

    /// Protocol engine clock the module was initialized with
    pub fn clock(&self) -> HertzU32 {
        self.clock
    }

    /// Configured nominal bitrate
    pub fn bitrate(&self) -> HertzU32 {
        self.bitrate
    }

    /// Bit timing in use
    pub fn timing(&self) -> BitTiming {
        self.timing
    }

    /// Operating mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Changes the bitrate. Takes the module off the bus while the timing is
    /// rewritten; mailbox contents are kept.
    pub fn set_bitrate(&mut self, bitrate: HertzU32) -> Result<(), Error> {
        let timing = BitTiming::calculate(self.clock, bitrate)?;
        self.ensure_enabled()?;

        mode::enter_freeze(&mut self.regs, self.mode_timeout)?;
        self.timing = timing;
        self.bitrate = bitrate;
        self.write_ctrl1();
        mode::exit_freeze(&mut self.regs, self.mode_timeout)
    }

    /// Changes the operating mode, see [`FlexCan::set_bitrate`]
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), Error> {
        self.ensure_enabled()?;

        mode::enter_freeze(&mut self.regs, self.mode_timeout)?;
        self.mode = mode;
        self.write_ctrl1();
        mode::exit_freeze(&mut self.regs, self.mode_timeout)
    }

    /// Queues `frame` in transmit mailbox `mb` and returns immediately.
    ///
    /// Fails with [`Error::Busy`] if the mailbox still holds a pending frame;
    /// the mailbox is left untouched in that case.
    pub fn send(&mut self, mb: u8, frame: &Frame) -> Result<(), Error> {
        let mailbox = Mailbox::tx(mb)?;
        if usize::from(frame.dlc) > MAX_DLC {
            return Err(Error::InvalidParameter);
        }
        self.ensure_enabled()?;

        let code = MailboxLock::new(&self.regs, mailbox).control_status().code;
        if !code.is_tx_idle() {
            trace!("mailbox {=u8} busy", mb);
            return Err(Error::Busy);
        }

        // A flag left over from an earlier frame would complete this one
        self.clear_flag(mailbox);
        mailbox::arm_transmit(&mut self.regs, mailbox, frame);

        Ok(())
    }

    /// Sends `frame` and waits up to `timeout` for the transmission to
    /// complete, polling once per millisecond.
    ///
    /// On [`Error::Timeout`] the frame stays queued; use
    /// [`FlexCan::abort_transmission`] to withdraw it.
    pub fn send_blocking<D>(
        &mut self,
        mb: u8,
        frame: &Frame,
        timeout: MillisDurationU32,
        delay: &mut D,
    ) -> Result<(), Error>
    where
        D: DelayMs<u32>,
    {
        self.send(mb, frame)?;
        let mailbox = Mailbox::tx(mb)?;

        self.wait_for_flag(mailbox, timeout, delay)?;
        self.complete_tx(mailbox);

        Ok(())
    }

    /// Takes the frame held by receive mailbox `mb`.
    ///
    /// Returns `WouldBlock` if the mailbox has not received anything since it
    /// was last read.
    pub fn receive(&mut self, mb: u8) -> nb::Result<Frame, Error> {
        let mailbox = Mailbox::rx(mb)?;

        if !self.flag_set(mailbox) {
            return Err(nb::Error::WouldBlock);
        }

        self.read_rx(mailbox).map_err(nb::Error::Other)
    }

    /// Waits up to `timeout` for a frame in receive mailbox `mb`, polling
    /// once per millisecond.
    pub fn receive_blocking<D>(
        &mut self,
        mb: u8,
        timeout: MillisDurationU32,
        delay: &mut D,
    ) -> Result<Frame, Error>
    where
        D: DelayMs<u32>,
    {
        let mailbox = Mailbox::rx(mb)?;

        self.wait_for_flag(mailbox, timeout, delay)?;
        self.read_rx(mailbox)
    }

    /// Binds receive mailbox `mb` to `filter` and arms it.
    ///
    /// The individual mask registers are only writable in freeze mode, so
    /// the module leaves the bus for the duration of the call.
    pub fn config_rx_filter(&mut self, mb: u8, filter: &RxFilter) -> Result<(), Error> {
        let mailbox = Mailbox::rx(mb)?;
        self.ensure_enabled()?;
        let n = mailbox.n();

        mode::enter_freeze(&mut self.regs, self.mode_timeout)?;

        self.regs.write(regs::mb_cs(n), Code::RX_INACTIVE.cs_bits());
        self.regs.write(regs::rximr(n), filter.mask_word());
        self.regs.write(regs::mb_id(n), filter.id_word());
        self.clear_flag(mailbox);

        let cs = ControlStatus {
            code: Code::RX_EMPTY,
            srr: false,
            ide: filter.is_extended(),
            rtr: false,
            dlc: 0,
            timestamp: 0,
        };
        self.regs.write(regs::mb_cs(n), cs.bits());

        mode::exit_freeze(&mut self.regs, self.mode_timeout)
    }

    /// Deactivates receive mailbox `mb`. A frame it still holds is dropped.
    pub fn disable_rx_mailbox(&mut self, mb: u8) -> Result<(), Error> {
        let mailbox = Mailbox::rx(mb)?;
        self.ensure_enabled()?;

        self.regs
            .write(regs::mb_cs(mailbox.n()), Code::RX_INACTIVE.cs_bits());
        self.clear_flag(mailbox);

        Ok(())
    }

    /// Whether the hardware currently owns mailbox `mb`.
    ///
    /// A transmit mailbox is busy while a frame is queued. A receive mailbox
    /// is busy while a frame is being moved into it.
    pub fn is_mb_busy(&self, mb: u8) -> Result<bool, Error> {
        let mailbox = Mailbox::new(mb).ok_or(Error::InvalidParameter)?;
        let code = MailboxLock::new(&self.regs, mailbox).control_status().code;

        if mailbox.is_tx() {
            Ok(!(code.is_tx_idle() || code == Code::TX_ABORT))
        } else {
            Ok(code.is_rx_busy())
        }
    }

    /// Withdraws the frame queued in transmit mailbox `mb`.
    ///
    /// A frame that already won arbitration still goes out; the outcome tells
    /// which of the two happened.
    pub fn abort_transmission(&mut self, mb: u8) -> Result<AbortOutcome, Error> {
        let mailbox = Mailbox::tx(mb)?;
        self.ensure_enabled()?;
        let n = mailbox.n();

        if self.flag_set(mailbox) {
            self.complete_tx(mailbox);
            return Ok(AbortOutcome::Transmitted);
        }

        let cs = MailboxLock::new(&self.regs, mailbox).control_status();
        if cs.code.is_tx_idle() {
            return Ok(AbortOutcome::Idle);
        }

        self.regs
            .write(regs::mb_cs(n), Code::TX_ABORT.replace_in(cs.bits()));

        let mut budget = self.mode_timeout;
        while !self.flag_set(mailbox) {
            if budget == 0 {
                warn!("abort of mailbox {=u8} not acknowledged", mb);
                return Err(Error::Timeout);
            }
            budget -= 1;
            spin_loop();
        }

        let code = MailboxLock::new(&self.regs, mailbox).control_status().code;
        self.regs
            .write(regs::mb_cs(n), Code::TX_INACTIVE.cs_bits());
        self.clear_flag(mailbox);

        if code == Code::TX_ABORT {
            debug!("mailbox {=u8} aborted", mb);
            Ok(AbortOutcome::Aborted)
        } else {
            Ok(AbortOutcome::Transmitted)
        }
    }

    fn ensure_enabled(&self) -> Result<(), Error> {
        if Mcr::from_bits_retain(self.regs.read(MCR)).contains(Mcr::MDIS) {
            Err(Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn write_mcr(&mut self) {
        let max_mb = Mcr::from_bits_retain(MAILBOX_COUNT as u32 - 1);
        let self_reception = self.self_reception;

        self.regs.modify(MCR, |r| {
            let mut mcr = Mcr::from_bits_retain(r);
            mcr.remove(Mcr::RFEN | Mcr::SRXDIS | Mcr::MAXMB);
            mcr.insert(Mcr::IRMQ | Mcr::AEN | max_mb);
            if !self_reception {
                mcr.insert(Mcr::SRXDIS);
            }
            mcr.bits()
        });
    }

    /// Writes timing and mode. Must run in freeze mode.
    fn write_ctrl1(&mut self) {
        let mut flags = Ctrl1::BOFFREC;
        match self.mode {
            Mode::Normal => {}
            Mode::Loopback => flags |= Ctrl1::LPB,
            Mode::ListenOnly => flags |= Ctrl1::LOM,
        }
        if self.callbacks.has_error() {
            flags |= Ctrl1::ERRMSK | Ctrl1::BOFFMSK;
        }

        let timing = self.timing.ctrl1_bits();
        self.regs.modify(CTRL1, |r| {
            let mut ctrl1 = Ctrl1::from_bits_retain(r & !timing::CTRL1_TIMING_MASK);
            ctrl1.remove(
                Ctrl1::LPB | Ctrl1::LOM | Ctrl1::SMP | Ctrl1::ERRMSK | Ctrl1::BOFFMSK,
            );
            ctrl1.insert(flags);
            ctrl1.bits() | timing
        });
    }

    #[inline]
    fn flag_set(&self, mailbox: Mailbox) -> bool {
        self.regs.read(IFLAG1) & mailbox.bit() != 0
    }

    /// Flags are write-1-to-clear
    #[inline]
    fn clear_flag(&mut self, mailbox: Mailbox) {
        self.regs.write(IFLAG1, mailbox.bit());
    }

    fn wait_for_flag<D>(
        &self,
        mailbox: Mailbox,
        timeout: MillisDurationU32,
        delay: &mut D,
    ) -> Result<(), Error>
    where
        D: DelayMs<u32>,
    {
        let mut remaining = timeout.ticks();

        loop {
            if self.flag_set(mailbox) {
                return Ok(());
            }
            if remaining == 0 {
                debug!("mailbox {=u8} timed out", mailbox.index());
                return Err(Error::Timeout);
            }
            delay.delay_ms(1);
            remaining -= 1;
        }
    }

    /// Receive sequence: lock, copy out, unlock, clear flag.
    ///
    /// A mailbox still busy after the mode budget keeps its frame and flag.
    fn read_rx(&mut self, mailbox: Mailbox) -> Result<Frame, Error> {
        let frame = {
            let mut lock = MailboxLock::new(&self.regs, mailbox);
            if let Err(e) = lock.settle(self.mode_timeout) {
                warn!("mailbox {=u8} stuck in move-in", mailbox.index());
                return Err(e);
            }
            if lock.control_status().code == Code::RX_OVERRUN {
                warn!("mailbox {=u8} overrun", mailbox.index());
            }
            lock.frame()
        };
        self.clear_flag(mailbox);

        Ok(frame)
    }

    /// Acknowledges a completed transmission. A sent remote frame left the
    /// mailbox waiting for the response; it is handed back to the transmit
    /// side.
    fn complete_tx(&mut self, mailbox: Mailbox) {
        let code = MailboxLock::new(&self.regs, mailbox).control_status().code;
        if !code.is_tx() {
            self.regs
                .write(regs::mb_cs(mailbox.n()), Code::TX_INACTIVE.cs_bits());
        }
        self.clear_flag(mailbox);
    }
}
