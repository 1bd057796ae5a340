//! Interface to the BLE central stack.
//!
//! The connection machine never talks to a radio directly. Whatever stack the
//! host runs (NimBLE on ESP32, BlueZ, CoreBluetooth...) is wrapped in a
//! [`BleCentral`] implementation, and stack callbacks are routed back through a
//! [`CentralObserver`].

use bstr::BString;
use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Expand a 16-bit assigned number into the Bluetooth base UUID.
pub const fn ble_uuid16(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    NotInitialized,
    ScanFailed,
    ConnectFailed,
    NotConnected,
    DiscoveryFailed,
    WriteFailed,
    SubscribeFailed,
    NotifyUnsupported,
    Stack(i32),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleError::NotInitialized => write!(f, "BLE stack not initialized"),
            BleError::ScanFailed => write!(f, "Failed to start scan"),
            BleError::ConnectFailed => write!(f, "Connection attempt failed"),
            BleError::NotConnected => write!(f, "Not connected"),
            BleError::DiscoveryFailed => write!(f, "Service discovery failed"),
            BleError::WriteFailed => write!(f, "Characteristic write failed"),
            BleError::SubscribeFailed => write!(f, "Notification subscription failed"),
            BleError::NotifyUnsupported => write!(f, "Characteristic cannot notify"),
            BleError::Stack(code) => write!(f, "BLE stack error {}", code),
        }
    }
}

impl std::error::Error for BleError {}

/// 48-bit device address, most significant byte first (display order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BleAddress(pub [u8; 6]);

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid BLE address '{}'", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for BleAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(|c| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| AddressParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(AddressParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(AddressParseError(s.to_string()));
        }

        Ok(BleAddress(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

/// One advertising report delivered while scanning.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub address: BleAddress,
    pub address_type: AddressType,
    pub name: BString,
    pub rssi: Option<i16>,
}

/// Opaque attribute handle of a remote characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle(pub u16);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl fmt::Display for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, "READ"),
            (self.write, "WRITE"),
            (self.write_without_response, "WRITE_NR"),
            (self.notify, "NOTIFY"),
            (self.indicate, "INDICATE"),
        ];
        let mut first = true;
        for (set, name) in flags {
            if set {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCharacteristic {
    pub uuid: Uuid,
    pub handle: CharacteristicHandle,
    pub properties: CharProperties,
}

/// A discovered primary service. UUIDs are always the full 128-bit form.
#[derive(Debug, Clone)]
pub struct RemoteService {
    pub uuid: Uuid,
    pub characteristics: Vec<RemoteCharacteristic>,
}

impl RemoteService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&RemoteCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
    pub duplicate_filter: bool,
    /// 0 means no limit.
    pub max_results: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: true,
            interval: 500,
            window: 100,
            duplicate_filter: false,
            max_results: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
    pub scan_interval: u16,
    pub scan_window: u16,
    pub connect_timeout_ms: u64,
}

impl ConnectionParams {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            min_interval: 24,
            max_interval: 40,
            latency: 0,
            supervision_timeout: 500,
            scan_interval: 16,
            scan_window: 16,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Notification sink registered on subscribe. Receives the payload and the
/// monotonic time it arrived. May be invoked from the stack's own task.
pub type NotifyHandler = Box<dyn FnMut(&[u8], Instant) + Send + 'static>;

/// Stack callbacks, one method per concern.
pub trait CentralObserver: Send + Sync {
    fn on_scan_result(&self, advertisement: &Advertisement);

    fn on_scan_end(&self, _reason: i32) {}

    fn on_connect(&self, _address: &BleAddress) {}

    fn on_disconnect(&self, _reason: i32) {}
}

/// Minimum capability set the connection machine needs from a BLE central.
///
/// Implementations own at most one GATT client at a time. `connect` may block
/// but must give up after `params.connect_timeout()`.
pub trait BleCentral {
    /// Monotonic clock shared with notification timestamps.
    fn now(&self) -> Instant;

    /// Register the observer for scan and link callbacks. Called again after
    /// every [`BleCentral::reset`].
    fn set_observer(&mut self, observer: Arc<dyn CentralObserver>);

    /// Start (or continue) an indefinite scan.
    fn start_scan(&mut self, params: &ScanParams) -> Result<(), BleError>;

    fn stop_scan(&mut self) -> Result<(), BleError>;

    fn clear_scan_results(&mut self);

    /// Drop any previous client, create a fresh one and connect it.
    fn connect(
        &mut self,
        address: &BleAddress,
        address_type: AddressType,
        params: &ConnectionParams,
    ) -> Result<(), BleError>;

    fn disconnect(&mut self) -> Result<(), BleError>;

    fn is_connected(&self) -> bool;

    fn discover_services(&mut self) -> Result<Vec<RemoteService>, BleError>;

    fn write(&mut self, handle: CharacteristicHandle, data: &[u8]) -> Result<(), BleError>;

    fn subscribe(
        &mut self,
        handle: CharacteristicHandle,
        handler: NotifyHandler,
    ) -> Result<(), BleError>;

    /// Tear the whole host stack down and bring it back up. Any scan object,
    /// client and observer registration is lost.
    fn reset(&mut self) -> Result<(), BleError>;
}
