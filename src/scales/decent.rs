// decent.rs - Decent Scale / EspressiScale
//
// Every frame is 7 bytes: 03 [cmd] [d1] [d2] [d3] [d4] [trailer].
// Weight and tare frames end in the XOR of the first six bytes. The timer
// templates carry a fixed trailer that the scale accepts as-is.

use crate::ble::ble_uuid16;
use crate::protocol::{verify_checksum, xor_checksum};
use log::{debug, warn};
use uuid::Uuid;

pub const SERVICE_UUID: Uuid = ble_uuid16(0xFFF0);
pub const READ_CHAR_UUID: Uuid = ble_uuid16(0xFFF4);
pub const WRITE_CHAR_UUID: Uuid = ble_uuid16(0x36F5);

pub const START_TIMER: [u8; 7] = [0x03, 0x0b, 0x03, 0x00, 0x00, 0x00, 0x08];
pub const STOP_TIMER: [u8; 7] = [0x03, 0x0b, 0x00, 0x00, 0x00, 0x00, 0x0b];
pub const RESET_TIMER: [u8; 7] = [0x03, 0x0b, 0x02, 0x00, 0x00, 0x00, 0x09];

pub const FRAME_LEN: usize = 7;
const MAGIC: u8 = 0x03;
const TARE_CMD: u8 = 0x0F;
const WEIGHT_STABLE: u8 = 0xCE;
const WEIGHT_CHANGING: u8 = 0xCA;

/// Tare frame carrying a wrapping sequence counter.
pub fn tare(counter: u8) -> [u8; 7] {
    let mut cmd = [MAGIC, TARE_CMD, counter, 0x00, 0x00, 0x00, 0x00];
    cmd[6] = xor_checksum(&cmd[..6]);
    cmd
}

pub fn decode(data: &[u8]) -> Option<f32> {
    if data.len() != FRAME_LEN || data[0] != MAGIC {
        debug!("Decent: ignoring {}-byte frame {:02X?}", data.len(), data);
        return None;
    }

    if !verify_checksum(data) {
        warn!("Decent: checksum mismatch - ignoring packet");
        return None;
    }

    match data[1] {
        WEIGHT_STABLE | WEIGHT_CHANGING => {
            let raw = i16::from_be_bytes([data[2], data[3]]);
            let grams = raw as f32 * 0.1;
            debug!("Decent weight: raw {} -> {:.1}g", raw, grams);
            Some(grams)
        }
        other => {
            debug!("Decent: non-weight command 0x{:02X}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(cmd: u8, d1: u8, d2: u8) -> [u8; 7] {
        let mut data = [MAGIC, cmd, d1, d2, 0x00, 0x00, 0x00];
        data[6] = xor_checksum(&data[..6]);
        data
    }

    #[test]
    fn test_tare_frame() {
        assert_eq!(tare(1), [0x03, 0x0F, 0x01, 0x00, 0x00, 0x00, 0x0D]);
        assert_eq!(tare(0xFF)[6], 0x03 ^ 0x0F ^ 0xFF);
    }

    #[test]
    fn test_timer_templates() {
        assert_eq!(START_TIMER, [0x03, 0x0B, 0x03, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(STOP_TIMER, [0x03, 0x0B, 0x00, 0x00, 0x00, 0x00, 0x0B]);
        assert_eq!(RESET_TIMER, [0x03, 0x0B, 0x02, 0x00, 0x00, 0x00, 0x09]);
    }

    #[test]
    fn test_weight_frames() {
        let grams = decode(&frame(WEIGHT_STABLE, 0x01, 0x68)).unwrap();
        assert!((grams - 36.0).abs() < 1e-4);

        let grams = decode(&frame(WEIGHT_CHANGING, 0xFF, 0xF6)).unwrap();
        assert!((grams + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_bad_checksum() {
        let mut data = frame(WEIGHT_STABLE, 0x01, 0x68);
        data[6] ^= 0x01;
        assert_eq!(decode(&data), None);
    }

    #[test]
    fn test_non_weight_command() {
        // Valid checksum, but 0xAA is a button event.
        assert_eq!(decode(&frame(0xAA, 0x01, 0x02)), None);
    }
}
