//! Interrupt driven operation
//!
//! Callbacks are plain function pointers. They get a mutable reference to a
//! context value owned by the interrupt handler, which replaces any global
//! state the handler would otherwise need:
//!
//! ```no_run
//! use s32k1xx_can::can::{Config, FlexCan, Frame, Mailbox, Mmio, Instance, RxFilter, IdWidth};
//! use s32k1xx_can::prelude::*;
//!
//! #[derive(Default)]
//! struct Stats {
//!     sent: u32,
//!     received: u32,
//! }
//!
//! fn on_sent(stats: &mut Stats, _mb: Mailbox) {
//!     stats.sent += 1;
//! }
//!
//! fn on_received(stats: &mut Stats, _mb: Mailbox, _frame: Frame) {
//!     stats.received += 1;
//! }
//!
//! let regs = unsafe { Mmio::new(Instance::Can0) };
//! let mut can: FlexCan<_, Stats> = FlexCan::init(regs, Config::new(8.MHz())).unwrap();
//! can.config_rx_filter(0, &RxFilter::accept_all(IdWidth::Standard)).unwrap();
//! can.install_rx_callback(0, on_received).unwrap();
//! can.install_tx_callback(16, on_sent).unwrap();
//!
//! // in the interrupt handler
//! let mut stats = Stats::default();
//! can.on_interrupt(&mut stats);
//! ```

use super::mailbox::{Mailbox, MAILBOX_COUNT};
use super::regs::{Ctrl1, Registers, CTRL1, ESR1, IFLAG1, IMASK1};
use super::status::{ErrorEvent, ErrorFlags};
use super::{Error, FlexCan, Frame};

/// Called when a transmit mailbox completed
pub type TxCallback<C> = fn(&mut C, Mailbox);

/// Called with the frame taken from a receive mailbox
pub type RxCallback<C> = fn(&mut C, Mailbox, Frame);

/// Called on error and bus off interrupts
pub type ErrorCallback<C> = fn(&mut C, ErrorEvent);

pub(crate) struct Callbacks<C> {
    tx: [Option<TxCallback<C>>; MAILBOX_COUNT],
    rx: [Option<RxCallback<C>>; MAILBOX_COUNT],
    error: Option<ErrorCallback<C>>,
}

impl<C> Callbacks<C> {
    pub fn new() -> Self {
        Callbacks {
            tx: [None; MAILBOX_COUNT],
            rx: [None; MAILBOX_COUNT],
            error: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// What a call to [`FlexCan::on_interrupt`] serviced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct Dispatched {
    /// Transmit mailboxes that completed, one bit per mailbox
    pub tx: u32,
    /// Receive mailboxes that were read, one bit per mailbox
    pub rx: u32,
    /// An error event was delivered
    pub error: bool,
}

impl Dispatched {
    /// Nothing was pending
    pub fn is_empty(&self) -> bool {
        self.tx == 0 && self.rx == 0 && !self.error
    }
}

impl<R: Registers, C> FlexCan<R, C> {
    /// Calls `callback` whenever transmit mailbox `mb` completes and unmasks
    /// its interrupt.
    pub fn install_tx_callback(&mut self, mb: u8, callback: TxCallback<C>) -> Result<(), Error> {
        let mailbox = Mailbox::tx(mb)?;

        self.callbacks.tx[mailbox.n()] = Some(callback);
        // A completion from before the callback existed is not reported
        self.clear_flag(mailbox);
        self.regs.modify(IMASK1, |r| r | mailbox.bit());

        Ok(())
    }

    /// Calls `callback` with every frame received in mailbox `mb` and unmasks
    /// its interrupt. A frame that is already waiting is delivered on the next
    /// interrupt.
    pub fn install_rx_callback(&mut self, mb: u8, callback: RxCallback<C>) -> Result<(), Error> {
        let mailbox = Mailbox::rx(mb)?;

        self.callbacks.rx[mailbox.n()] = Some(callback);
        self.regs.modify(IMASK1, |r| r | mailbox.bit());

        Ok(())
    }

    /// Calls `callback` on error and bus off interrupts
    pub fn install_error_callback(&mut self, callback: ErrorCallback<C>) {
        self.callbacks.error = Some(callback);
        self.regs
            .modify(CTRL1, |r| r | (Ctrl1::ERRMSK | Ctrl1::BOFFMSK).bits());
    }

    /// Removes the callbacks of mailbox `mb` and masks its interrupt
    pub fn remove_callbacks(&mut self, mb: u8) -> Result<(), Error> {
        let mailbox = Mailbox::new(mb).ok_or(Error::InvalidParameter)?;

        self.regs.modify(IMASK1, |r| r & !mailbox.bit());
        self.callbacks.tx[mailbox.n()] = None;
        self.callbacks.rx[mailbox.n()] = None;

        Ok(())
    }

    /// Removes the error callback and masks error interrupts
    pub fn remove_error_callback(&mut self) {
        self.regs
            .modify(CTRL1, |r| r & !(Ctrl1::ERRMSK | Ctrl1::BOFFMSK).bits());
        self.callbacks.error = None;
    }

    /// Services all pending, unmasked mailboxes and error conditions.
    ///
    /// Call this from the module's interrupt handler(s). Mailboxes are
    /// serviced in ascending order: received frames are taken out of their
    /// mailbox before the callback runs, completed transmissions are
    /// acknowledged.
    pub fn on_interrupt(&mut self, ctx: &mut C) -> Dispatched {
        let mut dispatched = Dispatched::default();
        let mut pending = self.regs.read(IFLAG1) & self.regs.read(IMASK1);

        while pending != 0 {
            let index = pending.trailing_zeros() as u8;
            pending &= pending - 1;

            let mailbox = match Mailbox::new(index) {
                Some(mailbox) => mailbox,
                None => break,
            };

            if mailbox.is_rx() {
                // still moving in, the flag stays set for the next interrupt
                let frame = match self.read_rx(mailbox) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                dispatched.rx |= mailbox.bit();
                if let Some(callback) = self.callbacks.rx[mailbox.n()] {
                    callback(ctx, mailbox, frame);
                }
            } else {
                self.complete_tx(mailbox);
                dispatched.tx |= mailbox.bit();
                if let Some(callback) = self.callbacks.tx[mailbox.n()] {
                    callback(ctx, mailbox);
                }
            }
        }

        if let Some(callback) = self.callbacks.error {
            let esr1 = self.read_esr1();
            let raised = ErrorFlags::from_bits_truncate(esr1)
                & (ErrorFlags::ERRINT | ErrorFlags::BOFFINT);

            if !raised.is_empty() {
                self.regs.write(ESR1, raised.bits());

                let event = ErrorEvent::from_esr1(esr1 | self.take_latched_errors().bits());
                warn!("error event: {}", event);
                callback(ctx, event);
                dispatched.error = true;
            }
        }

        dispatched
    }
}
