//! Acceptance filters of receive mailboxes
//!
//! Each receive mailbox compares incoming identifiers against its own ID word
//! under its individual mask. A mask bit set to 1 means the identifier bit
//! must match, 0 means "don't care". The identifier width always has to
//! match.

use super::frame::IdWidth;
use super::mailbox::IdWord;
use super::{ExtendedId, Id, StandardId};

/// Identifier and mask bound to one receive mailbox
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxFilter {
    id: Id,
    mask: u32,
}

impl RxFilter {
    /// Mask that compares every bit of a standard identifier
    pub const STANDARD_MASK: u32 = 0x7FF;
    /// Mask that compares every bit of an extended identifier
    pub const EXTENDED_MASK: u32 = 0x1FFF_FFFF;

    /// Filter for `id` under `mask`. Mask bits beyond the identifier width
    /// are dropped.
    pub fn new(id: impl Into<Id>, mask: u32) -> Self {
        let id = id.into();
        let mask = match id {
            Id::Standard(_) => mask & Self::STANDARD_MASK,
            Id::Extended(_) => mask & Self::EXTENDED_MASK,
        };
        RxFilter { id, mask }
    }

    /// Accepts only frames with exactly `id`
    pub fn exact(id: impl Into<Id>) -> Self {
        Self::new(id, u32::MAX)
    }

    /// Accepts every frame of the given identifier width
    pub fn accept_all(width: IdWidth) -> Self {
        let id = match width {
            IdWidth::Standard => Id::Standard(StandardId::ZERO),
            IdWidth::Extended => Id::Extended(ExtendedId::ZERO),
        };
        RxFilter { id, mask: 0 }
    }

    /// Filter identifier
    pub fn id(&self) -> Id {
        self.id
    }

    /// Mask in identifier width
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Identifier width the filter applies to
    pub fn width(&self) -> IdWidth {
        match self.id {
            Id::Standard(_) => IdWidth::Standard,
            Id::Extended(_) => IdWidth::Extended,
        }
    }

    pub(crate) fn is_extended(&self) -> bool {
        self.width() == IdWidth::Extended
    }

    /// Value for the mailbox ID word
    pub(crate) fn id_word(&self) -> u32 {
        IdWord::encode(self.id)
    }

    /// Value for the mailbox individual mask register
    pub(crate) fn mask_word(&self) -> u32 {
        IdWord::encode_mask(self.mask, self.is_extended())
    }

    /// Software evaluation of the filter, as the hardware does it
    pub fn accepts(&self, id: Id) -> bool {
        match (self.id, id) {
            (Id::Standard(_), Id::Standard(_)) | (Id::Extended(_), Id::Extended(_)) => {
                (IdWord::encode(id) ^ self.id_word()) & self.mask_word() == 0
            }
            _ => false,
        }
    }
}
