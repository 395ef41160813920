//! Packing of sector ids and distances into RGBA8 pixels.
//!
//! The id is written as three base-255 digits, `id = b + g·255 + r·255²`, and
//! alpha carries the distance to the camera quantized against the far plane.
//! Digits stop at 254, so a cleared `[255; 4]` pixel can never be mistaken for
//! a sector.

/// Cleared-pixel value marking "no sector".
pub const BACKGROUND: [u8; 4] = [255; 4];

/// Bytes per encoded pixel.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Radix of one color digit.
pub const ID_RADIX: u32 = 255;

/// Largest global id representable in three digits.
pub const MAX_ENCODABLE_ID: u32 = ID_RADIX * ID_RADIX * ID_RADIX - 1;

/// A decoded non-background pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedSample {
    pub global_id: u32,
    /// Quantized distance, 0 at the camera and 255 at the far plane.
    pub depth: u8,
}

/// Pack `global_id` and a quantized depth into one pixel.
///
/// Ids above [`MAX_ENCODABLE_ID`] are a caller bug; the id space refuses to
/// issue them.
pub fn encode_sample(global_id: u32, depth: u8) -> [u8; 4] {
    debug_assert!(global_id <= MAX_ENCODABLE_ID, "id {global_id} not encodable");
    let b = global_id % ID_RADIX;
    let g = (global_id / ID_RADIX) % ID_RADIX;
    let r = global_id / (ID_RADIX * ID_RADIX);
    [r as u8, g as u8, b as u8, depth]
}

/// Unpack a pixel. `None` for the background.
pub fn decode_sample(pixel: [u8; 4]) -> Option<DecodedSample> {
    if pixel == BACKGROUND {
        return None;
    }
    let [r, g, b, depth] = pixel;
    Some(DecodedSample {
        global_id: u32::from(b) + u32::from(g) * ID_RADIX + u32::from(r) * ID_RADIX * ID_RADIX,
        depth,
    })
}

/// Quantize a camera distance against the far plane.
pub fn quantize_depth(distance: f32, far: f32) -> u8 {
    if far <= 0.0 || !distance.is_finite() {
        return u8::MAX;
    }
    ((distance / far).clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_of_known_ids() {
        assert_eq!(encode_sample(0, 0), [0, 0, 0, 0]);
        assert_eq!(encode_sample(254, 7), [0, 0, 254, 7]);
        assert_eq!(encode_sample(255, 7), [0, 1, 0, 7]);
        assert_eq!(encode_sample(255 * 255, 9), [1, 0, 0, 9]);
        assert_eq!(encode_sample(MAX_ENCODABLE_ID, 0), [254, 254, 254, 0]);
    }

    #[test]
    fn test_decode_known_pixels() {
        let sample = decode_sample([1, 2, 3, 40]).unwrap();
        assert_eq!(sample.global_id, 3 + 2 * 255 + 255 * 255);
        assert_eq!(sample.depth, 40);
    }

    #[test]
    fn test_background_decodes_to_none() {
        assert_eq!(decode_sample(BACKGROUND), None);
    }

    #[test]
    fn test_max_id_at_far_plane_is_not_background() {
        let pixel = encode_sample(MAX_ENCODABLE_ID, 255);
        assert_ne!(pixel, BACKGROUND);
        assert_eq!(decode_sample(pixel).unwrap().global_id, MAX_ENCODABLE_ID);
    }

    #[test]
    fn test_boundary_ids_survive_packing() {
        for id in [0, 1, 254, 255, 256, 65_024, 65_025, 65_026, MAX_ENCODABLE_ID] {
            let decoded = decode_sample(encode_sample(id, 128)).unwrap();
            assert_eq!(decoded.global_id, id);
        }
    }

    #[test]
    fn test_quantize_depth() {
        assert_eq!(quantize_depth(0.0, 100.0), 0);
        assert_eq!(quantize_depth(50.0, 100.0), 128);
        assert_eq!(quantize_depth(100.0, 100.0), 255);
        assert_eq!(quantize_depth(500.0, 100.0), 255);
        assert_eq!(quantize_depth(-1.0, 100.0), 0);
        assert_eq!(quantize_depth(f32::NAN, 100.0), 255);
    }
}
