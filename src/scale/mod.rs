// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Bit-width conversion of MIDI values.
//!
//! Upscaling uses the min-center-max algorithm defined by MIDI 2.0.
//! The bounds and the center of the source range map exactly onto
//! those of the destination range. Downscaling drops the least
//! significant bits.

/// Scale `value` from `src_bits` to the wider `dst_bits`.
#[must_use]
pub fn scale_up(value: u32, src_bits: u32, dst_bits: u32) -> u32 {
    debug_assert!(src_bits > 0);
    debug_assert!(src_bits <= dst_bits);
    debug_assert!(dst_bits <= 32);
    let value = u64::from(value) & ((1 << src_bits) - 1);
    let scale_bits = dst_bits - src_bits;
    let mut bit_shifted = value << scale_bits;
    let src_center = 1 << (src_bits - 1);
    if value <= src_center {
        #[allow(clippy::cast_possible_truncation)]
        return bit_shifted as u32;
    }
    // Fill the lower bits by repeating the bits below the MSB of the source.
    let repeat_bits = src_bits - 1;
    let repeat_mask = (1 << repeat_bits) - 1;
    let mut repeat_value = value & repeat_mask;
    if scale_bits > repeat_bits {
        repeat_value <<= scale_bits - repeat_bits;
    } else {
        repeat_value >>= repeat_bits - scale_bits;
    }
    while repeat_value != 0 {
        bit_shifted |= repeat_value;
        repeat_value >>= repeat_bits;
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        bit_shifted as u32
    }
}

/// Scale `value` from `src_bits` down to the narrower `dst_bits`.
#[must_use]
pub const fn scale_down(value: u32, src_bits: u32, dst_bits: u32) -> u32 {
    debug_assert!(dst_bits <= src_bits);
    value >> (src_bits - dst_bits)
}

#[must_use]
pub fn u7_to_u14(value: u8) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_up(u32::from(value), 7, 14) as u16
    }
}

#[must_use]
pub fn u7_to_u16(value: u8) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_up(u32::from(value), 7, 16) as u16
    }
}

#[must_use]
pub fn u7_to_u32(value: u8) -> u32 {
    scale_up(u32::from(value), 7, 32)
}

#[must_use]
pub fn u14_to_u32(value: u16) -> u32 {
    scale_up(u32::from(value), 14, 32)
}

#[must_use]
pub const fn u14_to_u7(value: u16) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_down(value as u32 & 0x3fff, 14, 7) as u8
    }
}

#[must_use]
pub const fn u16_to_u7(value: u16) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_down(value as u32, 16, 7) as u8
    }
}

#[must_use]
pub const fn u32_to_u7(value: u32) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_down(value, 32, 7) as u8
    }
}

#[must_use]
pub const fn u32_to_u14(value: u32) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    {
        scale_down(value, 32, 14) as u16
    }
}

#[cfg(test)]
mod tests;
