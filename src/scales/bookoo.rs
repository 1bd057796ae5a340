// bookoo.rs - Bookoo Themis scales
//
// Same frame layout as the generic scales, but every weight frame carries the
// 0x03 0x0B header:
// 03 0B [ms_h ms_m ms_l] [unit] [sign] [w_h w_m w_l] [flow...] [battery] ... [xor]

use crate::ble::ble_uuid16;
use crate::scales::generic;
use log::debug;
use uuid::Uuid;

// Bookoo scale UUIDs - scale uses 16-bit UUIDs, not 128-bit
pub const SERVICE_UUID: Uuid = ble_uuid16(0x0FFE);
pub const WEIGHT_CHAR_UUID: Uuid = ble_uuid16(0xFF11);
pub const COMMAND_CHAR_UUID: Uuid = ble_uuid16(0xFF12);

pub const HEADER: [u8; 2] = [0x03, 0x0B];
pub const PLUS: u8 = 0x2B;
pub const MINUS: u8 = 0x2D;

pub(crate) fn has_weight_header(data: &[u8]) -> bool {
    data.len() == generic::FRAME_LEN && data[..2] == HEADER
}

/// Weight from a header-checked frame. '+' and '-' are the only sign markers
/// seen in the wild; anything that is not '-' reads as positive.
pub(crate) fn weight(data: &[u8]) -> f32 {
    generic::centigrams(data, data[6] == MINUS)
}

pub fn decode(data: &[u8]) -> Option<f32> {
    if !has_weight_header(data) {
        return None;
    }

    let grams = weight(data);
    debug!(
        "Bookoo frame: weight {:.2}g, timer {}ms, battery {}%",
        grams,
        u32::from_be_bytes([0, data[2], data[3], data[4]]),
        data[13]
    );
    Some(grams)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sign: u8, weight: [u8; 3]) -> [u8; 20] {
        let mut data = [0u8; 20];
        data[0] = 0x03;
        data[1] = 0x0B;
        data[6] = sign;
        data[7..10].copy_from_slice(&weight);
        data[13] = 87;
        data
    }

    #[test]
    fn test_positive_weight() {
        assert_eq!(decode(&frame(PLUS, [0x00, 0x0e, 0x10])), Some(36.0));
    }

    #[test]
    fn test_negative_weight() {
        assert_eq!(decode(&frame(MINUS, [0x00, 0x00, 0x96])), Some(-1.5));
    }

    #[test]
    fn test_header_required() {
        let mut data = frame(PLUS, [0x00, 0x00, 0x64]);
        data[1] = 0x0A;
        assert_eq!(decode(&data), None);
        assert_eq!(decode(&data[..19]), None);
    }
}
