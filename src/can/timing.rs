//! Bit timing
//!
//! A bit is divided into time quanta (TQ): one sync quantum followed by the
//! propagation segment and the two phase segments. The calculator tries 16 TQ
//! per bit and falls back to 8 TQ; the split of the quanta into segments is
//! fixed for each of the two lengths and places the sample point at 75 %.

use fugit::HertzU32;

use super::Error;

/// Largest value of the 8-bit `PRESDIV` field
pub const MAX_PRESDIV: u32 = 255;

const PRESDIV_SHIFT: u32 = 24;
const RJW_SHIFT: u32 = 22;
const PSEG1_SHIFT: u32 = 19;
const PSEG2_SHIFT: u32 = 16;
const PROPSEG_SHIFT: u32 = 0;

/// Mask of all timing fields in CTRL1
pub(crate) const CTRL1_TIMING_MASK: u32 = (0xFF << PRESDIV_SHIFT)
    | (0b11 << RJW_SHIFT)
    | (0b111 << PSEG1_SHIFT)
    | (0b111 << PSEG2_SHIFT)
    | (0b111 << PROPSEG_SHIFT);

/// Segment allocation for one bit length, in time quanta
struct Segments {
    quanta: u32,
    prop_seg: u8,
    phase_seg1: u8,
    phase_seg2: u8,
    rjw: u8,
}

/// Bit lengths in order of preference
const SEGMENTS: [Segments; 2] = [
    Segments {
        quanta: 16,
        prop_seg: 7,
        phase_seg1: 4,
        phase_seg2: 4,
        rjw: 1,
    },
    Segments {
        quanta: 8,
        prop_seg: 3,
        phase_seg1: 2,
        phase_seg2: 2,
        rjw: 1,
    },
];

/// Timing parameters of the protocol engine.
///
/// Segment lengths are stored in time quanta, not in their register encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub struct BitTiming {
    presdiv: u8,
    prop_seg: u8,
    phase_seg1: u8,
    phase_seg2: u8,
    rjw: u8,
}

impl BitTiming {
    /// Calculates the timing for `bitrate` given the protocol engine `clock`.
    ///
    /// Returns [`Error::InvalidParameter`] if either input is zero or if the
    /// prescaler does not fit the `PRESDIV` field for both 16 and 8 time
    /// quanta per bit.
    pub fn calculate(clock: HertzU32, bitrate: HertzU32) -> Result<Self, Error> {
        let clock = clock.raw();
        let bitrate = bitrate.raw();

        if clock == 0 || bitrate == 0 {
            return Err(Error::InvalidParameter);
        }

        for segments in SEGMENTS.iter() {
            // No candidate if the quanta rate does not even fit a u32, the
            // clock is below it anyway.
            let tq_rate = match bitrate.checked_mul(segments.quanta) {
                Some(rate) => rate,
                None => continue,
            };

            let divisor = clock / tq_rate;
            if divisor == 0 {
                continue;
            }

            if let Ok(presdiv) = cast::u8(divisor - 1) {
                return Ok(BitTiming {
                    presdiv,
                    prop_seg: segments.prop_seg,
                    phase_seg1: segments.phase_seg1,
                    phase_seg2: segments.phase_seg2,
                    rjw: segments.rjw,
                });
            }
        }

        Err(Error::InvalidParameter)
    }

    /// Value of the `PRESDIV` field (prescaler minus one)
    pub const fn presdiv(&self) -> u8 {
        self.presdiv
    }

    /// Clock divider applied to the protocol engine clock
    pub const fn prescaler(&self) -> u16 {
        self.presdiv as u16 + 1
    }

    /// Propagation segment in time quanta
    pub const fn prop_seg(&self) -> u8 {
        self.prop_seg
    }

    /// Phase segment 1 in time quanta
    pub const fn phase_seg1(&self) -> u8 {
        self.phase_seg1
    }

    /// Phase segment 2 in time quanta
    pub const fn phase_seg2(&self) -> u8 {
        self.phase_seg2
    }

    /// Resynchronization jump width in time quanta
    pub const fn rjw(&self) -> u8 {
        self.rjw
    }

    /// Time quanta per bit, including the sync segment
    pub const fn quanta(&self) -> u8 {
        1 + self.prop_seg + self.phase_seg1 + self.phase_seg2
    }

    /// Sample point in per mille of the bit time
    pub fn sample_point(&self) -> u16 {
        let before_sample = 1 + u16::from(self.prop_seg) + u16::from(self.phase_seg1);
        before_sample * 1000 / u16::from(self.quanta())
    }

    /// Bitrate these parameters produce with the given protocol engine clock
    pub fn bitrate(&self, clock: HertzU32) -> HertzU32 {
        let bit_clocks = u32::from(self.prescaler()) * u32::from(self.quanta());
        HertzU32::from_raw(clock.raw() / bit_clocks)
    }

    /// Timing fields in CTRL1 layout. Every field holds its length minus one.
    pub(crate) fn ctrl1_bits(&self) -> u32 {
        (u32::from(self.presdiv) << PRESDIV_SHIFT)
            | (u32::from(self.rjw - 1) << RJW_SHIFT)
            | (u32::from(self.phase_seg1 - 1) << PSEG1_SHIFT)
            | (u32::from(self.phase_seg2 - 1) << PSEG2_SHIFT)
            | (u32::from(self.prop_seg - 1) << PROPSEG_SHIFT)
    }
}

/// Calculates the bit timing for `bitrate`, see [`BitTiming::calculate`].
pub fn calculate_timing(clock: HertzU32, bitrate: HertzU32) -> Result<BitTiming, Error> {
    BitTiming::calculate(clock, bitrate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hz(raw: u32) -> HertzU32 {
        HertzU32::from_raw(raw)
    }

    /// Prescaler a given quanta count needs, if it fits the field
    fn prescaler_for(clock: u32, bitrate: u32, quanta: u32) -> Option<u32> {
        let divisor = clock / bitrate.checked_mul(quanta)?;
        (1..=MAX_PRESDIV + 1).contains(&divisor).then_some(divisor)
    }

    #[test]
    fn typical_rates() {
        let timing = calculate_timing(hz(8_000_000), hz(500_000)).unwrap();
        assert_eq!(timing.quanta(), 16);
        assert_eq!(timing.presdiv(), 0);
        assert_eq!(timing.bitrate(hz(8_000_000)), hz(500_000));
        assert_eq!(timing.sample_point(), 750);

        let timing = calculate_timing(hz(80_000_000), hz(250_000)).unwrap();
        assert_eq!(timing.quanta(), 16);
        assert_eq!(timing.prescaler(), 20);
        assert_eq!(timing.bitrate(hz(80_000_000)), hz(250_000));
    }

    #[test]
    fn falls_back_to_eight_quanta() {
        // 16 TQ would need a 16 MHz quanta clock
        let timing = calculate_timing(hz(8_000_000), hz(1_000_000)).unwrap();
        assert_eq!(timing.quanta(), 8);
        assert_eq!(timing.presdiv(), 0);
        assert_eq!(timing.sample_point(), 750);
        assert_eq!(timing.bitrate(hz(8_000_000)), hz(1_000_000));
    }

    #[test]
    fn zero_inputs_rejected() {
        assert_eq!(
            calculate_timing(hz(0), hz(500_000)),
            Err(Error::InvalidParameter)
        );
        assert_eq!(
            calculate_timing(hz(8_000_000), hz(0)),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn prescaler_boundary() {
        let bitrate = 10_000;

        // Exactly the largest prescaler
        let clock = 16 * 256 * bitrate;
        let timing = calculate_timing(hz(clock), hz(bitrate)).unwrap();
        assert_eq!(u32::from(timing.presdiv()), MAX_PRESDIV);

        // One prescaler step beyond, and 8 TQ only makes it worse
        let clock = 16 * 257 * bitrate;
        assert_eq!(
            calculate_timing(hz(clock), hz(bitrate)),
            Err(Error::InvalidParameter)
        );

        // Quanta clock above the protocol engine clock
        assert_eq!(
            calculate_timing(hz(7_999_999), hz(1_000_000)),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn huge_bitrate_does_not_overflow() {
        assert_eq!(
            calculate_timing(hz(80_000_000), hz(u32::MAX)),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn prescaler_always_fits_when_a_solution_exists() {
        let clocks = [
            4_000_000, 8_000_000, 16_000_000, 40_000_000, 48_000_000, 80_000_000, 112_000_000,
        ];

        for &clock in clocks.iter() {
            for bitrate in (1_000..=1_000_000).step_by(997) {
                let expected =
                    prescaler_for(clock, bitrate, 16).or_else(|| prescaler_for(clock, bitrate, 8));

                match calculate_timing(hz(clock), hz(bitrate)) {
                    Ok(timing) => {
                        assert!(u32::from(timing.presdiv()) <= MAX_PRESDIV);
                        assert_eq!(Some(u32::from(timing.prescaler())), expected);
                        let quanta = u32::from(timing.quanta());
                        assert!(quanta == 16 || quanta == 8);
                        assert_eq!(clock / (bitrate * quanta), u32::from(timing.prescaler()));
                    }
                    Err(e) => {
                        assert_eq!(e, Error::InvalidParameter);
                        assert_eq!(expected, None, "clock {} bitrate {}", clock, bitrate);
                    }
                }
            }
        }
    }

    #[test]
    fn ctrl1_encoding() {
        let timing = calculate_timing(hz(40_000_000), hz(500_000)).unwrap();
        assert_eq!(timing.prescaler(), 5);

        let bits = timing.ctrl1_bits();
        assert_eq!(bits >> 24, 4);
        assert_eq!((bits >> 22) & 0b11, 0);
        assert_eq!((bits >> 19) & 0b111, 3);
        assert_eq!((bits >> 16) & 0b111, 3);
        assert_eq!(bits & 0b111, 6);
        assert_eq!(bits & !CTRL1_TIMING_MASK, 0);
    }
}
