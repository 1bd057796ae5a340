use bstr::BString;
use embassy_time::Instant;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ble::{AddressType, BleAddress};

/// Outbound control commands understood (in some form) by every supported scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Identify,
    NotificationRequest,
    Tare,
    StartTimer,
    StopTimer,
    ResetTimer,
    Heartbeat,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Identify,
        Command::NotificationRequest,
        Command::Tare,
        Command::StartTimer,
        Command::StopTimer,
        Command::ResetTimer,
        Command::Heartbeat,
    ];
}

/// Externally visible stage of the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Discovering,
    Configuring,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Scanning
                | ConnectionState::Connecting
                | ConnectionState::Discovering
                | ConnectionState::Configuring
        )
    }
}

/// Why the connection machine last dropped into `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    ScanFailed,
    ScanTimeout,
    ConnectFailed,
    ConnectTimeout,
    DiscoveryFailed,
    DiscoveryTimeout,
    NoCompatibleService,
    ConfigureFailed,
    ConfigureTimeout,
    LinkLost,
    DataTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::ScanFailed => "scan could not be started",
            FailureReason::ScanTimeout => "no scale found",
            FailureReason::ConnectFailed => "connection refused",
            FailureReason::ConnectTimeout => "connection timeout",
            FailureReason::DiscoveryFailed => "service discovery failed",
            FailureReason::DiscoveryTimeout => "service discovery timeout",
            FailureReason::NoCompatibleService => "no compatible service",
            FailureReason::ConfigureFailed => "configuration failed",
            FailureReason::ConfigureTimeout => "configuration timeout",
            FailureReason::LinkLost => "link lost",
            FailureReason::DataTimeout => "scale data timeout",
        };
        f.write_str(text)
    }
}

/// A decoded weight reading. Grams only; may be negative after a tare overshoot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    pub grams: f32,
    pub observed_at: Instant,
}

/// The scale picked during scanning. Only meaningful until the next restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: BleAddress,
    pub address_type: AddressType,
    pub advertised_name: BString,
}

pub const IDLE_DELAY_MS: u64 = 500;
pub const SCAN_TIMEOUT_MS: u64 = 15_000;
pub const SCAN_CLEAR_INTERVAL_MS: u64 = 30_000;
pub const CONNECT_TIMEOUT_MS: u64 = 8_000;
pub const DISCOVERY_TIMEOUT_MS: u64 = 3_000;
pub const CONFIGURE_TIMEOUT_MS: u64 = 3_000;
pub const DATA_TIMEOUT_MS: u64 = 5_000;
pub const KEEPALIVE_INTERVAL_MS: u64 = 4_000; // Acaia_Old self-heartbeat while connected
pub const HEARTBEAT_PERIOD_MS: u64 = 2_750;
pub const DEEP_RESET_EVERY: u32 = 8;
pub const ATTEMPT_CEILING: u32 = 100;
