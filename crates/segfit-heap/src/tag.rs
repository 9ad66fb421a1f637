//! The boundary-tag word.

use bitfield_struct::bitfield;

/// Tag word written at both ends of every block.
///
/// The same word is stored as the header (one word before the payload) and
/// as the footer (the last word of the block), so a block's size and state
/// can be read from either end. That redundancy is what makes constant-time
/// neighbor navigation possible: the word immediately below a block is the
/// left neighbor's footer.
///
/// Raw encoding: `(size << 3) | alloc_bit`. Real block sizes are multiples
/// of 8 and at least 16; a size of zero marks the epilogue sentinel.
#[bitfield(u32)]
pub struct BoundaryTag {
    /// Set while the block is handed out to a caller.
    pub allocated: bool,

    /// Reserved, always zero.
    #[bits(2)]
    __: u8,

    /// Total block size in bytes, header and footer included.
    #[bits(29)]
    pub size: u32,
}

impl BoundaryTag {
    /// Tag for a block of `size` bytes in the given allocation state.
    #[must_use]
    pub const fn block(size: u32, allocated: bool) -> Self {
        Self::new().with_size(size).with_allocated(allocated)
    }

    /// The epilogue sentinel: zero-sized and permanently allocated.
    #[must_use]
    pub const fn epilogue() -> Self {
        Self::new().with_allocated(true)
    }
}
