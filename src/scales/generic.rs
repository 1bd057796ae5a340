// generic.rs - Felicita-style "generic" scales
//
// 20-byte frames with an ASCII sign byte and a 24-bit big-endian weight in
// hundredths of a gram. The 6-byte command set below is shared with Bookoo.

use crate::ble::ble_uuid16;
use log::debug;
use uuid::Uuid;

pub const SERVICE_UUID: Uuid = ble_uuid16(0xFFE0);
pub const DATA_CHAR_UUID: Uuid = ble_uuid16(0xFFE1);

pub const TARE: [u8; 6] = [0x03, 0x0a, 0x01, 0x00, 0x00, 0x08];
pub const START_TIMER: [u8; 6] = [0x03, 0x0a, 0x04, 0x00, 0x00, 0x0a];
pub const STOP_TIMER: [u8; 6] = [0x03, 0x0a, 0x05, 0x00, 0x00, 0x0d];
pub const RESET_TIMER: [u8; 6] = [0x03, 0x0a, 0x06, 0x00, 0x00, 0x0c];

pub const FRAME_LEN: usize = 20;
pub const MINUS: u8 = b'-';

/// 24-bit big-endian hundredths at [7..10], negated when `negative`.
pub fn centigrams(data: &[u8], negative: bool) -> f32 {
    let raw = u32::from_be_bytes([0, data[7], data[8], data[9]]);
    let grams = raw as f32 / 100.0;
    if negative {
        -grams
    } else {
        grams
    }
}

pub fn decode(data: &[u8]) -> Option<f32> {
    if data.len() != FRAME_LEN {
        return None;
    }

    let grams = centigrams(data, data[6] == MINUS);
    debug!("Generic frame -> {:.2}g", grams);
    Some(grams)
}
