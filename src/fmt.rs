//! Logging macros
//!
//! Forward to `defmt` when the `unstable-defmt` feature is enabled and expand
//! to nothing otherwise.

#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "unstable-defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(feature = "unstable-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "unstable-defmt")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(not(feature = "unstable-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "unstable-defmt")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(not(feature = "unstable-defmt"))]
            let _ = ($( & $x ),*);
        }
    };
}
