//! `embedded-hal` CAN traits
//!
//! The trait treats the module as one transmit queue and one receive queue:
//! frames go to the lowest idle transmit mailbox and come from the lowest
//! receive mailbox holding a frame. Mailboxes with an unmasked interrupt are
//! left to [`FlexCan::on_interrupt`].
//!
//! The inherent [`FlexCan::receive`] shadows the trait method, call it as
//! `Can::receive(&mut can)`.

use super::mailbox::{Mailbox, MailboxLock, RX_REGION_MASK, TX_MAILBOXES};
use super::regs::{Registers, IFLAG1, IMASK1};
use super::{Error, FlexCan, Frame};
use crate::hal::can::nb::Can;

impl<R: Registers, C> FlexCan<R, C> {
    fn idle_tx_mailbox(&self) -> Option<Mailbox> {
        TX_MAILBOXES.filter_map(Mailbox::new).find(|&mailbox| {
            MailboxLock::new(&self.regs, mailbox)
                .control_status()
                .code
                .is_tx_idle()
        })
    }
}

impl<R: Registers, C> Can for FlexCan<R, C> {
    type Frame = Frame;
    type Error = Error;

    /// Never replaces a pending frame, so the returned frame is always `None`
    fn transmit(&mut self, frame: &Frame) -> nb::Result<Option<Frame>, Error> {
        match self.idle_tx_mailbox() {
            Some(mailbox) => {
                self.send(mailbox.index(), frame)?;
                Ok(None)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }

    fn receive(&mut self) -> nb::Result<Frame, Error> {
        let ready = self.regs.read(IFLAG1) & !self.regs.read(IMASK1) & RX_REGION_MASK;
        if ready == 0 {
            return Err(nb::Error::WouldBlock);
        }

        let mailbox = Mailbox::rx(ready.trailing_zeros() as u8)?;
        self.read_rx(mailbox).map_err(nb::Error::Other)
    }
}
