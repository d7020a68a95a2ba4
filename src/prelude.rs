pub use fugit::{ExtU32 as _, RateExtU32 as _};

pub use crate::hal::can::nb::Can as _s32k1xx_can_Can;
pub use crate::hal::can::Frame as _s32k1xx_can_Frame;
pub use crate::hal::prelude::*;
