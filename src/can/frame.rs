//! CAN 2.0 frames

use super::Id;
use crate::hal::can;

/// Largest data length code of a classic CAN frame
pub const MAX_DLC: usize = 8;

/// A CAN 2.0A/B data or remote frame.
///
/// Frames read from a mailbox carry the capture timestamp of the free running
/// timer. The timestamp is ignored when comparing frames, and so is the
/// payload of remote frames.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    pub(crate) id: Id,
    pub(crate) remote: bool,
    pub(crate) dlc: u8,
    pub(crate) data: [u8; 8],
    pub(crate) timestamp: u16,
}

impl Frame {
    /// Creates a data frame. Returns `None` if `data` is longer than 8 bytes.
    pub fn new_data(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DLC {
            return None;
        }

        let mut bytes = [0; 8];
        bytes[..data.len()].copy_from_slice(data);

        Some(Frame {
            id: id.into(),
            remote: false,
            dlc: data.len() as u8,
            data: bytes,
            timestamp: 0,
        })
    }

    /// Creates a remote frame requesting `dlc` bytes. Returns `None` if
    /// `dlc` is above 8.
    pub fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DLC {
            return None;
        }

        Some(Frame {
            id: id.into(),
            remote: true,
            dlc: dlc as u8,
            data: [0; 8],
            timestamp: 0,
        })
    }

    /// Value of the free running timer when the frame was received or sent
    pub fn timestamp(&self) -> u16 {
        self.timestamp
    }

    /// Raw identifier value, standard or extended
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        if self.id != other.id || self.remote != other.remote || self.dlc != other.dlc {
            return false;
        }

        self.remote || can::Frame::data(self) == can::Frame::data(other)
    }
}

impl Eq for Frame {}

impl can::Frame for Frame {
    fn new(id: impl Into<can::Id>, data: &[u8]) -> Option<Self> {
        Frame::new_data(id, data)
    }

    fn new_remote(id: impl Into<can::Id>, dlc: usize) -> Option<Self> {
        Frame::new_remote(id, dlc)
    }

    #[inline]
    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    #[inline]
    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    #[inline]
    fn id(&self) -> can::Id {
        self.id
    }

    #[inline]
    fn dlc(&self) -> usize {
        usize::from(self.dlc)
    }

    /// Payload of a data frame. Empty for remote frames.
    #[inline]
    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..usize::from(self.dlc)]
        }
    }
}

#[cfg(feature = "unstable-defmt")]
impl defmt::Format for Frame {
    fn format(&self, fmt: defmt::Formatter) {
        use can::Frame as _;

        if self.remote {
            defmt::write!(fmt, "id={=u32:#x} remote dlc={=u8}", self.raw_id(), self.dlc);
        } else {
            defmt::write!(fmt, "id={=u32:#x} data={=[u8]:x}", self.raw_id(), self.data());
        }
    }
}

/// Identifier width of a frame or filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "unstable-defmt", derive(defmt::Format))]
pub enum IdWidth {
    /// 11-bit identifier (CAN 2.0A)
    Standard,
    /// 29-bit identifier (CAN 2.0B)
    Extended,
}
