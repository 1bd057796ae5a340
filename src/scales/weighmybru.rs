// weighmybru.rs - WeighMyBru open-hardware scale
//
// Talks over the Nordic UART service. Weight frames reuse the Bookoo layout
// and add a trailing XOR checksum.

use crate::protocol::verify_checksum;
use crate::scales::bookoo;
use log::{debug, warn};
use uuid::Uuid;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const READ_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

pub const TARE: [u8; 4] = [0x03, 0x0a, 0x01, 0x01];
pub const START_TIMER: [u8; 4] = [0x03, 0x0a, 0x02, 0x01];
pub const STOP_TIMER: [u8; 4] = [0x03, 0x0a, 0x03, 0x01];
pub const RESET_TIMER: [u8; 4] = [0x03, 0x0a, 0x04, 0x01];

pub fn decode(data: &[u8]) -> Option<f32> {
    if !bookoo::has_weight_header(data) {
        return None;
    }

    if !verify_checksum(data) {
        warn!("WeighMyBru: checksum mismatch - ignoring packet");
        return None;
    }

    let grams = bookoo::weight(data);
    debug!("WeighMyBru weight: {:.2}g", grams);
    Some(grams)
}
