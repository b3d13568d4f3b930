//! Mask based bit-field helpers.
//!
//! Register and table entry layouts are described by masks rather than by
//! (shift, width) pairs. The shift is derived from the lowest set bit of the
//! mask.

/// Returns the position of the lowest set bit of `mask`.
///
/// `mask` must not be zero.
pub const fn mask_shift(mask: u64) -> u32 {
    mask.trailing_zeros()
}

/// Extracts the field selected by `mask` from `word`, shifted down to bit 0.
pub const fn getfield(mask: u64, word: u64) -> u64 {
    (word & mask) >> mask_shift(mask)
}

/// Replaces the field selected by `mask` in `word` with `value`.
///
/// Bits of `value` that do not fit in the field are discarded.
pub const fn setfield(mask: u64, word: u64, value: u64) -> u64 {
    (word & !mask) | ((value << mask_shift(mask)) & mask)
}
