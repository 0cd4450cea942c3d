use register_catalog::{decode_f32, encode_f32, round_hundredths};

const PATTERNS: [(u16, u16); 8] = [
    (0x4120, 0x0000),
    (0x42F6, 0xE979),
    (0xC2C8, 0x0000),
    (0x3F80, 0x0001),
    (0x0000, 0x0000),
    (0x8000, 0x0000),
    (0x7F80, 0x0000),
    (0x4366, 0x6666),
];

#[test]
fn ten_decodes_in_both_register_orders() {
    assert_eq!(decode_f32(&[0x4120, 0x0000], false).expect("decode"), 10.0);
    assert_eq!(decode_f32(&[0x0000, 0x4120], true).expect("decode"), 10.0);
}

#[test]
fn unswapped_decode_round_trips_register_words() {
    for (hi, lo) in PATTERNS {
        let value = decode_f32(&[hi, lo], false).expect("decode");
        assert_eq!(encode_f32(value, false), [hi, lo]);
    }
}

#[test]
fn swap_matches_reversed_input() {
    for (a, b) in PATTERNS {
        let swapped = decode_f32(&[a, b], true).expect("decode");
        let reversed = decode_f32(&[b, a], false).expect("decode");
        assert_eq!(swapped.to_bits(), reversed.to_bits());
    }
}

#[test]
fn swap_reorders_registers_not_bytes() {
    // 0x42F6E979 is roughly 123.456; byte-swapping would give a tiny number instead.
    let value = decode_f32(&[0xE979, 0x42F6], true).expect("decode");
    assert!((value - 123.456).abs() < 0.001);
}

#[test]
fn nan_and_infinity_pass_through() {
    let inf = decode_f32(&[0x7F80, 0x0000], false).expect("decode");
    assert_eq!(inf, f32::INFINITY);
    assert_eq!(round_hundredths(inf), f64::INFINITY);

    let nan = decode_f32(&[0x7FC0, 0x0000], false).expect("decode");
    assert!(nan.is_nan());
    assert!(round_hundredths(nan).is_nan());
}

#[test]
fn rounding_is_idempotent() {
    for value in [123.45f32, 0.1, -7.25, 229.996, 1.005, 4_999.125, -0.004] {
        let once = round_hundredths(value);
        let twice = (once * 100.0).round_ties_even() / 100.0;
        assert_eq!(once, twice, "{value}");
    }
}

#[test]
fn decoded_register_value_rounds_to_hundredths() {
    let raw = decode_f32(&[0x6666, 0x4366], true).expect("decode");
    assert_eq!(round_hundredths(raw), 230.4);
}
