use crate::scales::{acaia, bookoo, decent, generic, weighmybru, ScaleType};
use crate::types::{Command, WeightSample};
use embassy_time::Instant;
use log::debug;

/// Largest outbound frame (the Acaia identify) fits in one default-MTU write.
pub const MAX_PACKET_LEN: usize = 20;

pub type Packet = heapless::Vec<u8, MAX_PACKET_LEN>;

pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &byte| acc ^ byte)
}

/// Last byte must equal the XOR of everything before it.
pub fn verify_checksum(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }

    let (payload, checksum) = data.split_at(data.len() - 1);
    xor_checksum(payload) == checksum[0]
}

fn packet(bytes: &[u8]) -> Packet {
    // Templates are all <= MAX_PACKET_LEN
    Packet::from_slice(bytes).unwrap_or_default()
}

/// Bytes for `command` on a `scale_type` scale, or `None` when the scale does
/// not take that command at all (the Acaia handshake on generic-family scales).
///
/// `tare_sequence` only matters for the Decent tare.
pub fn encode_command(scale_type: ScaleType, command: Command, tare_sequence: u8) -> Option<Packet> {
    let bytes: &[u8] = match (command, scale_type) {
        (Command::Identify | Command::NotificationRequest, t) if t.is_generic_family() => {
            return None
        }
        (Command::Identify, _) => &acaia::IDENTIFY,
        (Command::NotificationRequest, _) => &acaia::NOTIFICATION_REQUEST,
        (Command::Heartbeat, _) => &acaia::HEARTBEAT,

        (Command::Tare, ScaleType::Decent) => return Some(packet(&decent::tare(tare_sequence))),
        (Command::StartTimer, ScaleType::Decent) => &decent::START_TIMER,
        (Command::StopTimer, ScaleType::Decent) => &decent::STOP_TIMER,
        (Command::ResetTimer, ScaleType::Decent) => &decent::RESET_TIMER,

        (Command::Tare, ScaleType::WeighMyBru) => &weighmybru::TARE,
        (Command::StartTimer, ScaleType::WeighMyBru) => &weighmybru::START_TIMER,
        (Command::StopTimer, ScaleType::WeighMyBru) => &weighmybru::STOP_TIMER,
        (Command::ResetTimer, ScaleType::WeighMyBru) => &weighmybru::RESET_TIMER,

        (Command::Tare, ScaleType::Generic | ScaleType::Bookoo) => &generic::TARE,
        (Command::StartTimer, ScaleType::Generic | ScaleType::Bookoo) => &generic::START_TIMER,
        (Command::StopTimer, ScaleType::Generic | ScaleType::Bookoo) => &generic::STOP_TIMER,
        (Command::ResetTimer, ScaleType::Generic | ScaleType::Bookoo) => &generic::RESET_TIMER,

        (Command::Tare, ScaleType::Acaia_Old | ScaleType::Acaia_New) => &acaia::TARE,
        (Command::StartTimer, ScaleType::Acaia_Old | ScaleType::Acaia_New) => &acaia::START_TIMER,
        (Command::StopTimer, ScaleType::Acaia_Old | ScaleType::Acaia_New) => &acaia::STOP_TIMER,
        (Command::ResetTimer, ScaleType::Acaia_Old | ScaleType::Acaia_New) => &acaia::RESET_TIMER,
    };

    Some(packet(bytes))
}

/// Encoder that owns the Decent tare sequence number.
#[derive(Debug, Default, Clone)]
pub struct CommandEncoder {
    tare_sequence: u8,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number carried by the most recent Decent tare.
    pub fn tare_sequence(&self) -> u8 {
        self.tare_sequence
    }

    pub fn encode(&mut self, scale_type: ScaleType, command: Command) -> Option<Packet> {
        if scale_type == ScaleType::Decent && command == Command::Tare {
            self.tare_sequence = self.tare_sequence.wrapping_add(1);
        }
        encode_command(scale_type, command, self.tare_sequence)
    }
}

pub fn decode_notification(
    scale_type: ScaleType,
    data: &[u8],
    observed_at: Instant,
) -> Option<WeightSample> {
    let grams = match scale_type {
        ScaleType::Acaia_Old => {
            acaia::decode_legacy(data).or_else(|| acaia::decode_weight_message(data, &[13]))
        }
        ScaleType::Acaia_New => acaia::decode_weight_message(data, &[13, 17]),
        ScaleType::Generic => generic::decode(data),
        ScaleType::Bookoo => bookoo::decode(data),
        ScaleType::WeighMyBru => weighmybru::decode(data),
        ScaleType::Decent => decent::decode(data),
    };

    if grams.is_none() {
        debug!("{}: no weight in {:02X?}", scale_type, data);
    }

    grams.map(|grams| WeightSample { grams, observed_at })
}
