//! Advertisement filtering.
//!
//! Name prefixes only say "this is probably a scale"; the real type is decided
//! from GATT services after connecting, since both Acaia generations share
//! the same names.

use crate::ble::{Advertisement, BleAddress};
use bstr::ByteSlice;
use log::debug;

pub const SUPPORTED_NAME_PREFIXES: [&str; 10] = [
    "ACAIA",
    "LUNAR",
    "PYXIS",
    "PEARL",
    "CINCO",
    "PROCH",
    "BOOKOO",
    "DECENT",
    "ESPRESSISCALE",
    "WEIGHMYBRU",
];

/// Trimmed, case-insensitive prefix match against the known vendor names.
pub fn is_supported_scale(name: impl AsRef<[u8]>) -> bool {
    let normalized = name.as_ref().trim().to_ascii_uppercase();
    SUPPORTED_NAME_PREFIXES
        .iter()
        .any(|prefix| normalized.starts_with_str(prefix))
}

/// Decides which advertisement the session connects to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub target: Option<BleAddress>,
}

impl DeviceFilter {
    pub fn any() -> Self {
        Self { target: None }
    }

    pub fn for_address(address: BleAddress) -> Self {
        Self {
            target: Some(address),
        }
    }

    pub fn accepts(&self, advertisement: &Advertisement) -> bool {
        if !is_supported_scale(&advertisement.name) {
            return false;
        }

        match self.target {
            Some(target) if target != advertisement.address => {
                debug!(
                    "Skipping {} at {}: waiting for {}",
                    advertisement.name, advertisement.address, target
                );
                false
            }
            _ => true,
        }
    }
}
