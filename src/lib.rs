//! FlexCAN driver for the S32K1xx family of automotive microcontrollers
//!
//! The crate drives the mailbox based CAN controller found on the S32K1xx
//! parts. Clock tree and pin muxing are left to the application: the driver is
//! handed the frequency of the CAN protocol engine clock and a register block.
//!
//! ```no_run
//! use s32k1xx_can::can::{Config, FlexCan, Instance, Mmio, Mode, RxFilter, StandardId};
//! use s32k1xx_can::prelude::*;
//!
//! // NOTE(unsafe) the application owns CAN0 and nothing else touches it
//! let regs = unsafe { Mmio::new(Instance::Can0) };
//! let config = Config::new(8.MHz()).bitrate(500.kHz()).mode(Mode::Normal);
//! let mut can: FlexCan<_> = FlexCan::init(regs, config).unwrap();
//!
//! let id = StandardId::new(0x123).unwrap();
//! can.config_rx_filter(0, &RxFilter::exact(id)).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(non_camel_case_types)]

#[macro_use]
mod fmt;

pub(crate) use embedded_hal as hal;

pub use nb;
pub use nb::block;

pub mod can;
pub mod prelude;
