// acaia.rs - Acaia Lunar/Pearl/Pyxis/Cinco protocol, both hardware generations
//
// Packets start with the 0xEF 0xDD magic. The legacy generation exposes a single
// characteristic (0x2A80) for both directions; the newer one sits behind a
// Microchip transparent-UART service.

use crate::ble::ble_uuid16;
use log::debug;
use uuid::Uuid;

pub const LEGACY_CHAR_UUID: Uuid = ble_uuid16(0x2A80);

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);
pub const READ_CHAR_UUID: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);

pub const IDENTIFY: [u8; 20] = [
    0xef, 0xdd, 0x0b, 0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x30, 0x31,
    0x32, 0x33, 0x34, 0x9a, 0x6d,
];
pub const NOTIFICATION_REQUEST: [u8; 14] = [
    0xef, 0xdd, 0x0c, 0x09, 0x00, 0x01, 0x01, 0x02, 0x02, 0x05, 0x03, 0x04, 0x15, 0x06,
];
pub const HEARTBEAT: [u8; 7] = [0xef, 0xdd, 0x00, 0x02, 0x00, 0x02, 0x00];
pub const TARE: [u8; 6] = [0xef, 0xdd, 0x04, 0x00, 0x00, 0x00];
pub const START_TIMER: [u8; 7] = [0xef, 0xdd, 0x0d, 0x00, 0x00, 0x00, 0x00];
pub const STOP_TIMER: [u8; 7] = [0xef, 0xdd, 0x0d, 0x00, 0x02, 0x00, 0x02];
pub const RESET_TIMER: [u8; 7] = [0xef, 0xdd, 0x0d, 0x00, 0x01, 0x00, 0x01];

const WEIGHT_MSG: u8 = 0x05;
const SIGN_BIT: u8 = 0x02;

fn scaled(raw: u16, exponent: u8, sign: u8) -> f32 {
    let value = raw as f32 / 10f32.powi(exponent as i32);
    if sign & SIGN_BIT != 0 {
        -value
    } else {
        value
    }
}

/// Legacy weight frame: 10 or 14 bytes, weight at [2..4] LE, exponent at [6],
/// sign in [7].
pub fn decode_legacy(data: &[u8]) -> Option<f32> {
    if data.len() != 10 && data.len() != 14 {
        return None;
    }

    let raw = u16::from_le_bytes([data[2], data[3]]);
    let grams = scaled(raw, data[6], data[7]);
    debug!(
        "Acaia legacy frame: raw={}, exponent={}, sign=0x{:02X} -> {:.2}g",
        raw, data[6], data[7], grams
    );
    Some(grams)
}

/// New-style weight message: type byte 0x05 at [4], weight at [5..7] LE,
/// exponent at [9], sign in [10]. The caller decides which lengths are valid
/// for the hardware generation.
pub fn decode_weight_message(data: &[u8], valid_lengths: &[usize]) -> Option<f32> {
    if !valid_lengths.contains(&data.len()) || data[4] != WEIGHT_MSG {
        return None;
    }

    let raw = u16::from_le_bytes([data[5], data[6]]);
    let grams = scaled(raw, data[9], data[10]);
    debug!("Acaia weight message: raw={} -> {:.2}g", raw, grams);
    Some(grams)
}
