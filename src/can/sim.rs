//! Software model of a FlexCAN register block
//!
//! Covers what the driver relies on: the MCR handshakes, soft reset, mailbox
//! locking, write-1-to-clear flags, read-to-clear protocol errors,
//! transmission, abort and delivery of frames into receive mailboxes through
//! the individual masks. Every access made
//! through [`Registers`] is recorded.
//!
//! The model is synchronous: a request bit is acknowledged during the write
//! that sets it, unless a fault says otherwise.

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use super::frame::Frame;
use super::mailbox::{
    pack_data, unpack_data, Code, ControlStatus, IdWord, RX_MAILBOXES, TX_MAILBOXES,
};
use super::regs::{
    self, Ctrl1, Mcr, Registers, CTRL1, ECR, ESR1, IFLAG1, IMASK1, MCR, RXMGMASK, TIMER,
};
use crate::hal::blocking::delay::DelayMs;
use crate::hal::can::Id;

const MCR_RESET: u32 = 0xD890_000F;
const MCR_STATUS: u32 = Mcr::LPMACK.bits() | Mcr::FRZACK.bits() | Mcr::NOTRDY.bits();
const ESR1_W1C: u32 = (1 << 1) | (1 << 2) | (1 << 16) | (1 << 17) | (1 << 19);
const ESR1_READ_CLEARS: u32 = 0xFC00;
const CODE_BUSY: u32 = 1 << 24;
const WORDS: usize = regs::rximr(32) / 4;

/// Acknowledges the hardware gives. All `true` by default.
#[derive(Clone, Copy, Debug)]
pub struct Faults {
    pub freeze_ack: bool,
    pub unfreeze_ack: bool,
    pub ready: bool,
    pub reset_completes: bool,
    pub lpm_ack: bool,
}

impl Default for Faults {
    fn default() -> Self {
        Faults {
            freeze_ack: true,
            unfreeze_ack: true,
            ready: true,
            reset_completes: true,
            lpm_ack: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read(usize),
    Write(usize, u32),
}

struct Inner {
    mem: [u32; WORDS],
    faults: Faults,
    trace: Vec<Access>,
    locked: Option<usize>,
    hold_tx: bool,
    abort_loses: bool,
    bus: Vec<Frame>,
    timer: u16,
    /// Mailbox whose move-in is still running, and for how many CS reads
    moving: Option<(usize, u32)>,
}

impl Inner {
    fn get(&self, offset: usize) -> u32 {
        self.mem[offset / 4]
    }

    fn set(&mut self, offset: usize, value: u32) {
        self.mem[offset / 4] = value;
    }

    fn running(&self) -> bool {
        let halted = Mcr::MDIS | Mcr::SOFTRST | Mcr::FRZACK | Mcr::NOTRDY;
        !Mcr::from_bits_retain(self.get(MCR)).intersects(halted)
    }

    fn write_mcr(&mut self, value: u32) {
        let status = self.get(MCR) & MCR_STATUS;
        let mut mcr = Mcr::from_bits_retain(status | (value & !MCR_STATUS));

        if mcr.contains(Mcr::SOFTRST) && self.faults.reset_completes {
            mcr = Mcr::from_bits_retain(MCR_RESET) - Mcr::MDIS - Mcr::LPMACK;
            for offset in [IMASK1, IFLAG1, ESR1, ECR] {
                self.set(offset, 0);
            }
        }

        if self.faults.lpm_ack {
            mcr.set(Mcr::LPMACK, mcr.contains(Mcr::MDIS));
        }

        if !mcr.contains(Mcr::LPMACK) {
            if mcr.contains(Mcr::FRZ | Mcr::HALT) {
                if self.faults.freeze_ack {
                    mcr.insert(Mcr::FRZACK);
                }
            } else if self.faults.unfreeze_ack {
                mcr.remove(Mcr::FRZACK);
            }
        }

        if mcr.intersects(Mcr::LPMACK | Mcr::FRZACK) {
            mcr.insert(Mcr::NOTRDY);
        } else if self.faults.ready {
            mcr.remove(Mcr::NOTRDY);
        }

        self.set(MCR, mcr.bits());
    }

    fn write_cs(&mut self, n: usize, value: u32) {
        let offset = regs::mb_cs(n);
        let previous = Code::from_cs(self.get(offset));
        self.set(offset, value);

        let code = Code::from_cs(value);
        if code == Code::TX_DATA && self.running() && !self.hold_tx {
            self.transmit(n);
        } else if code == Code::TX_ABORT && previous == Code::TX_DATA {
            if self.abort_loses {
                self.transmit(n);
            } else {
                self.raise(n);
            }
        }
    }

    fn raise(&mut self, n: usize) {
        let flags = self.get(IFLAG1) | 1 << n;
        self.set(IFLAG1, flags);
    }

    fn mailbox_frame(&self, n: usize) -> Frame {
        let cs = ControlStatus::from_bits(self.get(regs::mb_cs(n)));
        Frame {
            id: IdWord::decode(self.get(regs::mb_id(n)), cs.ide),
            remote: cs.rtr,
            dlc: cs.dlc.min(8),
            data: unpack_data(self.get(regs::mb_word0(n)), self.get(regs::mb_word1(n))),
            timestamp: self.timer,
        }
    }

    fn transmit(&mut self, n: usize) {
        let frame = self.mailbox_frame(n);
        self.bus.push(frame);

        // a remote request waits for its response in the same mailbox
        let code = if frame.remote {
            Code::RX_EMPTY
        } else {
            Code::TX_INACTIVE
        };
        let cs = self.get(regs::mb_cs(n)) & !0xFFFF;
        self.set(regs::mb_cs(n), code.replace_in(cs) | u32::from(self.timer));
        self.raise(n);
        self.timer = self.timer.wrapping_add(1);

        let mcr = Mcr::from_bits_retain(self.get(MCR));
        if !mcr.contains(Mcr::SRXDIS) {
            self.deliver(&frame);
        }
    }

    /// Moves `frame` into the first matching receive mailbox. Returns
    /// `false` if no mailbox matched.
    fn deliver(&mut self, frame: &Frame) -> bool {
        let extended = matches!(frame.id, Id::Extended(_));
        let id = IdWord::encode(frame.id);
        let individual = Mcr::from_bits_retain(self.get(MCR)).contains(Mcr::IRMQ);
        let mut overrun = None;

        for n in RX_MAILBOXES.map(usize::from) {
            if self.locked == Some(n) {
                continue;
            }

            let cs = ControlStatus::from_bits(self.get(regs::mb_cs(n)));
            if cs.code == Code::RX_INACTIVE || cs.code.bits() & 0b1000 != 0 || cs.ide != extended {
                continue;
            }

            let mask = if individual {
                self.get(regs::rximr(n))
            } else {
                self.get(RXMGMASK)
            };
            if (self.get(regs::mb_id(n)) ^ id) & mask & 0x1FFF_FFFF != 0 {
                continue;
            }

            let serviced = self.get(IFLAG1) & 1 << n == 0;
            if cs.code == Code::RX_EMPTY || (cs.code.is_rx_full() && serviced) {
                self.move_in(n, frame, Code::RX_FULL);
                return true;
            }
            overrun.get_or_insert(n);
        }

        match overrun {
            Some(n) => {
                self.move_in(n, frame, Code::RX_OVERRUN);
                true
            }
            None => false,
        }
    }

    fn settle(&mut self, n: usize) {
        match self.moving {
            Some((m, 0)) if m == n => {
                let cs = self.get(regs::mb_cs(n)) & !CODE_BUSY;
                self.set(regs::mb_cs(n), cs);
                self.moving = None;
            }
            Some((m, reads)) if m == n => self.moving = Some((m, reads - 1)),
            _ => {}
        }
    }

    fn move_in(&mut self, n: usize, frame: &Frame, code: Code) {
        let extended = matches!(frame.id, Id::Extended(_));
        let cs = ControlStatus {
            code,
            srr: extended,
            ide: extended,
            rtr: frame.remote,
            dlc: frame.dlc,
            timestamp: self.timer,
        };
        let (word0, word1) = pack_data(&frame.data);

        self.set(regs::mb_id(n), IdWord::encode(frame.id));
        self.set(regs::mb_word0(n), word0);
        self.set(regs::mb_word1(n), word1);
        self.set(regs::mb_cs(n), cs.bits());
        self.raise(n);
    }
}

/// Shared handle to a simulated register block
#[derive(Clone)]
pub struct Sim(Rc<RefCell<Inner>>);

impl Sim {
    /// Register block in its reset state
    pub fn new() -> Self {
        let mut inner = Inner {
            mem: [0; WORDS],
            faults: Faults::default(),
            trace: Vec::new(),
            locked: None,
            hold_tx: false,
            abort_loses: false,
            bus: Vec::new(),
            timer: 0,
            moving: None,
        };
        inner.set(MCR, MCR_RESET);
        inner.set(RXMGMASK, 0xFFFF_FFFF);

        Sim(Rc::new(RefCell::new(inner)))
    }

    pub fn faults(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.0.borrow_mut().faults);
    }

    /// Queued frames stay in their mailbox until released
    pub fn set_hold_tx(&self, hold: bool) {
        self.0.borrow_mut().hold_tx = hold;
    }

    /// An abort arriving while the frame is queued loses arbitration to it
    pub fn set_abort_loses(&self, loses: bool) {
        self.0.borrow_mut().abort_loses = loses;
    }

    /// Transmits every queued frame
    pub fn release_pending(&self) {
        let mut inner = self.0.borrow_mut();
        for n in TX_MAILBOXES.map(usize::from) {
            if Code::from_cs(inner.get(regs::mb_cs(n))) == Code::TX_DATA {
                inner.transmit(n);
            }
        }
    }

    /// A frame sent by another node
    pub fn inject(&self, frame: &Frame) -> bool {
        self.0.borrow_mut().deliver(frame)
    }

    /// Marks mailbox `n` as busy for the next `reads` reads of its
    /// control/status word
    pub fn hold_move_in(&self, n: usize, reads: u32) {
        let mut inner = self.0.borrow_mut();
        let cs = inner.get(regs::mb_cs(n)) | CODE_BUSY;
        inner.set(regs::mb_cs(n), cs);
        inner.moving = Some((n, reads));
    }

    /// Sets fault confinement, counters and ESR1 status bits
    pub fn set_error(&self, fltconf: u32, tx: u8, rx: u8, flags: u32) {
        let mut inner = self.0.borrow_mut();
        inner.set(ESR1, flags | (fltconf & 0b11) << 4);
        inner.set(ECR, u32::from(rx) << 8 | u32::from(tx));
    }

    pub fn advance_timer(&self, ticks: u32) {
        let mut inner = self.0.borrow_mut();
        inner.timer = inner.timer.wrapping_add(ticks as u16);
    }

    /// Frames that went out on the bus
    pub fn bus(&self) -> Vec<Frame> {
        self.0.borrow().bus.clone()
    }

    /// Receive mailbox currently locked
    pub fn locked(&self) -> Option<usize> {
        self.0.borrow().locked
    }

    /// Register value without side effects
    pub fn peek(&self, offset: usize) -> u32 {
        self.0.borrow().get(offset)
    }

    /// Register write without side effects
    pub fn poke(&self, offset: usize, value: u32) {
        self.0.borrow_mut().set(offset, value);
    }

    pub fn trace(&self) -> Vec<Access> {
        self.0.borrow().trace.clone()
    }

    pub fn clear_trace(&self) {
        self.0.borrow_mut().trace.clear();
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.0
            .borrow()
            .trace
            .iter()
            .filter(|&&access| access == Access::Read(offset))
            .count()
    }

    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.0
            .borrow()
            .trace
            .iter()
            .filter_map(|access| match *access {
                Access::Write(o, value) if o == offset => Some(value),
                _ => None,
            })
            .collect()
    }
}

fn cs_mailbox(offset: usize) -> Option<usize> {
    let first = regs::mb_cs(0);
    let last = regs::mb_cs(31);
    if (first..=last).contains(&offset) && (offset - first) % 16 == 0 {
        Some((offset - first) / 16)
    } else {
        None
    }
}

impl Registers for Sim {
    fn read(&self, offset: usize) -> u32 {
        let mut inner = self.0.borrow_mut();
        inner.trace.push(Access::Read(offset));

        if offset == TIMER {
            inner.locked = None;
            return u32::from(inner.timer);
        }

        if offset == ESR1 {
            let esr1 = inner.get(ESR1);
            inner.set(ESR1, esr1 & !ESR1_READ_CLEARS);
            return esr1;
        }

        if let Some(n) = cs_mailbox(offset) {
            if n < RX_MAILBOXES.end as usize {
                inner.locked = Some(n);
            }
            inner.settle(n);
        }

        inner.get(offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        let mut inner = self.0.borrow_mut();
        inner.trace.push(Access::Write(offset, value));

        match offset {
            MCR => inner.write_mcr(value),
            IFLAG1 => {
                let flags = inner.get(IFLAG1) & !value;
                inner.set(IFLAG1, flags);
            }
            ESR1 => {
                let esr1 = inner.get(ESR1) & !(value & ESR1_W1C);
                inner.set(ESR1, esr1);
            }
            CTRL1 => {
                // the clock source is locked while enabled
                let locked = inner.get(MCR) & Mcr::MDIS.bits() == 0;
                let clksrc = Ctrl1::CLKSRC.bits();
                let value = if locked {
                    (value & !clksrc) | (inner.get(CTRL1) & clksrc)
                } else {
                    value
                };
                inner.set(CTRL1, value);
            }
            _ => match cs_mailbox(offset) {
                Some(n) => inner.write_cs(n, value),
                None => inner.set(offset, value),
            },
        }
    }
}

/// Delay that advances the simulated timer and can make things happen on the
/// bus after a number of milliseconds
pub struct SimDelay {
    sim: Sim,
    pub elapsed_ms: u32,
    event: Option<(u32, Event)>,
}

pub enum Event {
    Release,
    Inject(Frame),
}

impl SimDelay {
    pub fn new(sim: &Sim) -> Self {
        SimDelay {
            sim: sim.clone(),
            elapsed_ms: 0,
            event: None,
        }
    }

    pub fn after(mut self, ms: u32, event: Event) -> Self {
        self.event = Some((ms, event));
        self
    }
}

impl DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms += ms;
        self.sim.advance_timer(ms);

        let due = matches!(self.event, Some((at, _)) if self.elapsed_ms >= at);
        if due {
            match self.event.take() {
                Some((_, Event::Release)) => self.sim.release_pending(),
                Some((_, Event::Inject(frame))) => {
                    self.sim.inject(&frame);
                }
                None => {}
            }
        }
    }
}
