//! Configuration of a FlexCAN instance

use fugit::HertzU32;

/// Operating mode
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum Mode {
    /// Regular bus participation
    Normal,
    /// Transmitted frames are fed back internally; the TX pin stays
    /// recessive. Acknowledge errors are ignored.
    Loopback,
    /// Receives frames but never drives the bus, not even for ACK
    ListenOnly,
}

/// Source of the protocol engine clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Oscillator clock
    Oscillator,
    /// Peripheral (bus) clock
    Peripheral,
}

/// Default busy-wait budget for mode transitions, in polling iterations
pub const DEFAULT_MODE_TIMEOUT: u32 = 100_000;

/// FlexCAN configuration.
///
/// ```
/// use s32k1xx_can::can::{Config, Mode};
/// use s32k1xx_can::prelude::*;
///
/// let config = Config::new(8.MHz())
///     .bitrate(250.kHz())
///     .mode(Mode::Loopback)
///     .self_reception(true);
/// assert_eq!(config.get_bitrate().raw(), 250_000);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) clock: HertzU32,
    pub(crate) bitrate: HertzU32,
    pub(crate) mode: Mode,
    pub(crate) self_reception: bool,
    pub(crate) clock_source: ClockSource,
    pub(crate) mode_timeout: u32,
}

impl Config {
    /// Configuration for a protocol engine running at `clock`.
    ///
    /// The frequency comes from the clock tree setup of the application; it
    /// must match the selected [`ClockSource`].
    pub fn new(clock: HertzU32) -> Self {
        Config {
            clock,
            bitrate: HertzU32::from_raw(500_000),
            mode: Mode::Normal,
            self_reception: false,
            clock_source: ClockSource::Peripheral,
            mode_timeout: DEFAULT_MODE_TIMEOUT,
        }
    }

    /// Nominal bitrate. Default 500 kbit/s.
    pub fn bitrate(mut self, bitrate: HertzU32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Operating mode. Default [`Mode::Normal`].
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether the module receives its own frames. Needed for loopback
    /// round trips. Default off.
    pub fn self_reception(mut self, enabled: bool) -> Self {
        self.self_reception = enabled;
        self
    }

    /// Protocol engine clock source. Default [`ClockSource::Peripheral`].
    pub fn clock_source(mut self, source: ClockSource) -> Self {
        self.clock_source = source;
        self
    }

    /// Polling iterations allowed for each mode transition handshake
    pub fn mode_timeout(mut self, iterations: u32) -> Self {
        self.mode_timeout = iterations;
        self
    }

    pub fn get_clock(&self) -> HertzU32 {
        self.clock
    }

    pub fn get_bitrate(&self) -> HertzU32 {
        self.bitrate
    }

    pub fn get_mode(&self) -> Mode {
        self.mode
    }
}
