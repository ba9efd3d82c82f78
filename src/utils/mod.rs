//! Utility types and functions used throughout the codebase.

pub mod sync;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

#[inline]
pub const fn is_aligned(value: u32, align: u32) -> bool {
    value & (align - 1) == 0
}
