//! Register layouts shared by both serial links.
//!
//! Every value on the wire is an IEEE-754 f32 spread over two big-endian
//! input registers, high word first. The meter exposes its per-phase power
//! block starting at register 12; the image served to the inverter reuses the
//! same start address.

use crate::error::{AppError, Result};
use crate::phase::PhaseSet;

/// First input register of the meter's per-phase power block.
pub const METER_BLOCK_START: u16 = 12;
/// Register count of the meter read: 12 floats (W, VA, VAr, power factor,
/// three phases each).
pub const METER_BLOCK_WORDS: u16 = 24;

/// First input register of the image served to the inverter.
pub const IMAGE_BLOCK_START: u16 = 12;
/// Register count of the served image: 9 floats.
pub const IMAGE_BLOCK_WORDS: u16 = 18;
/// Image size as a usize, for array types.
pub const IMAGE_LEN: usize = IMAGE_BLOCK_WORDS as usize;

/// The two fields of the meter block the bridge consumes. The VA and VAr
/// groups in the middle of the block are read but ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterBlock {
    pub watts: PhaseSet,
    pub power_factor: PhaseSet,
}

/// Split an f32 into its two big-endian registers, high word first.
pub fn f32_to_words(value: f32) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

/// Rebuild an f32 from its two big-endian registers.
pub fn f32_from_words(hi: u16, lo: u16) -> f32 {
    let hi = hi.to_be_bytes();
    let lo = lo.to_be_bytes();
    f32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]])
}

/// Decode the raw meter read into the fields the bridge uses.
///
/// Expects exactly the 24 words of the power block; anything else means the
/// transport handed over a malformed response.
pub fn decode_meter_block(words: &[u16]) -> Result<MeterBlock> {
    if words.len() != METER_BLOCK_WORDS as usize {
        return Err(AppError::Protocol(format!(
            "meter block has {} registers, expected {}",
            words.len(),
            METER_BLOCK_WORDS
        )));
    }

    let mut floats = [0.0f64; 12];
    for (slot, pair) in floats.iter_mut().zip(words.chunks_exact(2)) {
        *slot = f64::from(f32_from_words(pair[0], pair[1]));
    }

    Ok(MeterBlock {
        watts: PhaseSet::new(floats[0], floats[1], floats[2]),
        power_factor: PhaseSet::new(floats[9], floats[10], floats[11]),
    })
}

/// Encode the image served to the inverter: real power L1..L3, then apparent
/// power L1..L3 written into both remaining float groups. The duplicated
/// group matches the register map the inverter polls and is kept as-is;
/// reactive power is never encoded.
pub fn encode_image(watts: PhaseSet, apparent: PhaseSet) -> [u16; IMAGE_LEN] {
    let mut words = [0u16; IMAGE_LEN];
    let groups = [watts.values(), apparent.values(), apparent.values()];
    for (i, value) in groups.into_iter().flatten().enumerate() {
        let [hi, lo] = f32_to_words(value as f32);
        words[i * 2] = hi;
        words[i * 2 + 1] = lo;
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Helper mirroring how the inverter would decode the image.
    fn floats_of(words: &[u16]) -> Vec<f32> {
        words
            .chunks_exact(2)
            .map(|pair| f32_from_words(pair[0], pair[1]))
            .collect()
    }

    #[test]
    fn test_word_codec_round_trip() {
        for value in [0.0f32, -0.0, 1.5, -2000.25, 5530.0, f32::MIN, f32::MAX] {
            let [hi, lo] = f32_to_words(value);
            assert_eq!(f32_from_words(hi, lo), value);
        }
    }

    #[test]
    fn test_word_codec_is_big_endian() {
        // 1.0f32 = 0x3F800000 big-endian.
        assert_eq!(f32_to_words(1.0), [0x3F80, 0x0000]);
        assert_eq!(f32_from_words(0x3F80, 0x0000), 1.0);
    }

    #[test]
    fn test_decode_meter_block_picks_watts_and_power_factor() {
        let floats: [f32; 12] = [
            -2000.0, -1000.0, 500.0, // W
            2100.0, 1050.0, 520.0, // VA (ignored)
            640.0, 320.0, 140.0, // VAr (ignored)
            0.95, -0.95, 0.96, // power factor
        ];
        let words: Vec<u16> = floats.iter().flat_map(|f| f32_to_words(*f)).collect();

        let block = decode_meter_block(&words).unwrap();

        assert_eq!(block.watts, PhaseSet::new(-2000.0, -1000.0, 500.0));
        assert_eq!(
            block.power_factor.values(),
            [f64::from(0.95f32), f64::from(-0.95f32), f64::from(0.96f32)]
        );
    }

    #[test]
    fn test_decode_meter_block_rejects_short_read() {
        let words = vec![0u16; 23];

        let err = decode_meter_block(&words).unwrap_err();

        assert!(err.to_string().contains("expected 24"));
    }

    #[test]
    fn test_encode_image_duplicates_apparent_power() {
        let watts = PhaseSet::new(0.0, -500.0, 500.0);
        let apparent = PhaseSet::new(0.0, 526.3, 520.8);

        let image = encode_image(watts, apparent);
        let floats = floats_of(&image);

        assert_eq!(floats.len(), 9);
        assert_eq!(&floats[0..3], &[0.0, -500.0, 500.0]);
        // The apparent-power group fills both trailing slots.
        assert_eq!(&floats[3..6], &floats[6..9]);
        assert_eq!(&floats[3..6], &[0.0f32, 526.3, 520.8]);
    }

    #[test]
    fn test_image_round_trip_within_f32_rounding() {
        let watts = PhaseSet::new(1306.6666666666667, -0.1, 123.456);
        let apparent = PhaseSet::new(1375.438596491228, 0.2, 128.6);

        let image = encode_image(watts, apparent);
        let floats = floats_of(&image);

        for (decoded, original) in floats[0..3].iter().zip(watts.values()) {
            assert_eq!(*decoded, original as f32);
        }
        for (decoded, original) in floats[3..6].iter().zip(apparent.values()) {
            assert_eq!(*decoded, original as f32);
        }
    }
}
