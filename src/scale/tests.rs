// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::*;

#[test]
fn u7_upscaling_preserves_min_center_max() {
    assert_eq!(0, u7_to_u16(0));
    assert_eq!(0x8000, u7_to_u16(64));
    assert_eq!(0xffff, u7_to_u16(127));

    assert_eq!(0, u7_to_u32(0));
    assert_eq!(0x8000_0000, u7_to_u32(64));
    assert_eq!(0xffff_ffff, u7_to_u32(127));

    assert_eq!(0, u7_to_u14(0));
    assert_eq!(0x2000, u7_to_u14(64));
    assert_eq!(0x3fff, u7_to_u14(127));
}

#[test]
fn u14_upscaling_preserves_min_center_max() {
    assert_eq!(0, u14_to_u32(0));
    assert_eq!(0x8000_0000, u14_to_u32(0x2000));
    assert_eq!(0xffff_ffff, u14_to_u32(0x3fff));
}

#[test]
fn below_center_is_a_plain_shift() {
    assert_eq!(1 << 9, u7_to_u16(1));
    assert_eq!(63 << 25, u7_to_u32(63));
}

#[test]
fn upscaling_is_monotonic() {
    let mut last = 0;
    for value in 1..=127 {
        let scaled = u7_to_u32(value);
        assert!(scaled > last, "{value}");
        last = scaled;
    }
}

#[test]
fn downscaling_inverts_upscaling() {
    for value in 0..=127 {
        assert_eq!(value, u16_to_u7(u7_to_u16(value)));
        assert_eq!(value, u32_to_u7(u7_to_u32(value)));
        assert_eq!(value, u14_to_u7(u7_to_u14(value)));
    }
    for value in [0, 1, 0x1fff, 0x2000, 0x2001, 0x3fff] {
        assert_eq!(value, u32_to_u14(u14_to_u32(value)));
    }
}
