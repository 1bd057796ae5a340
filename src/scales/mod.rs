//! Vendor protocol table.
//!
//! One module per scale family holds its GATT identifiers, command templates
//! and notification decoder. [`resolve_link`] picks the family from a
//! discovered service list.

pub mod acaia;
pub mod bookoo;
pub mod decent;
pub mod detectors;
pub mod generic;
pub mod weighmybru;

pub use detectors::{is_supported_scale, DeviceFilter, SUPPORTED_NAME_PREFIXES};

use crate::ble::{CharacteristicHandle, RemoteCharacteristic, RemoteService};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleType {
    Acaia_Old,
    Acaia_New,
    Generic,
    Decent,
    Bookoo,
    WeighMyBru,
}

impl ScaleType {
    /// Detection order used during service discovery.
    pub const ALL: [ScaleType; 6] = [
        ScaleType::Acaia_Old,
        ScaleType::Acaia_New,
        ScaleType::Generic,
        ScaleType::Bookoo,
        ScaleType::Decent,
        ScaleType::WeighMyBru,
    ];

    /// Scales that stream as soon as they are subscribed and never get the
    /// Acaia identify handshake.
    pub fn is_generic_family(self) -> bool {
        matches!(
            self,
            ScaleType::Generic | ScaleType::Bookoo | ScaleType::WeighMyBru
        )
    }

    pub fn is_acaia(self) -> bool {
        matches!(self, ScaleType::Acaia_Old | ScaleType::Acaia_New)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleType::Acaia_Old => "Acaia (legacy)",
            ScaleType::Acaia_New => "Acaia",
            ScaleType::Generic => "Generic",
            ScaleType::Decent => "Decent",
            ScaleType::Bookoo => "Bookoo",
            ScaleType::WeighMyBru => "WeighMyBru",
        }
    }

    /// (service, read characteristic, write characteristic) for the
    /// service-keyed families. The legacy Acaia is keyed on a bare
    /// characteristic instead.
    fn service_signature(self) -> Option<(Uuid, Uuid, Uuid)> {
        match self {
            ScaleType::Acaia_Old => None,
            ScaleType::Acaia_New => Some((
                acaia::SERVICE_UUID,
                acaia::READ_CHAR_UUID,
                acaia::WRITE_CHAR_UUID,
            )),
            ScaleType::Generic => Some((
                generic::SERVICE_UUID,
                generic::DATA_CHAR_UUID,
                generic::DATA_CHAR_UUID,
            )),
            ScaleType::Bookoo => Some((
                bookoo::SERVICE_UUID,
                bookoo::WEIGHT_CHAR_UUID,
                bookoo::COMMAND_CHAR_UUID,
            )),
            ScaleType::Decent => Some((
                decent::SERVICE_UUID,
                decent::READ_CHAR_UUID,
                decent::WRITE_CHAR_UUID,
            )),
            ScaleType::WeighMyBru => Some((
                weighmybru::SERVICE_UUID,
                weighmybru::READ_CHAR_UUID,
                weighmybru::WRITE_CHAR_UUID,
            )),
        }
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The characteristics a session talks through once the scale type is known.
#[derive(Debug, Clone)]
pub struct GattLink {
    pub scale_type: ScaleType,
    pub read: RemoteCharacteristic,
    pub write: RemoteCharacteristic,
}

impl GattLink {
    pub fn read_handle(&self) -> CharacteristicHandle {
        self.read.handle
    }

    pub fn write_handle(&self) -> CharacteristicHandle {
        self.write.handle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// No known service signature in the list.
    NoMatch,
    /// The service matched but a required characteristic is missing.
    MissingCharacteristic(ScaleType),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NoMatch => write!(f, "No compatible scale service"),
            ResolveError::MissingCharacteristic(t) => {
                write!(f, "{} service is missing a characteristic", t)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Determine the scale type from discovered services. First match wins; a
/// matched family with missing characteristics does not fall through to the
/// next one.
pub fn resolve_link(services: &[RemoteService]) -> Result<GattLink, ResolveError> {
    // Legacy Acaia: one characteristic for both directions, on any service.
    let legacy = services
        .iter()
        .flat_map(|s| s.characteristics.iter())
        .find(|c| c.uuid == acaia::LEGACY_CHAR_UUID);
    if let Some(ch) = legacy {
        info!("🎯 Legacy Acaia characteristic found");
        return Ok(GattLink {
            scale_type: ScaleType::Acaia_Old,
            read: ch.clone(),
            write: ch.clone(),
        });
    }

    for scale_type in ScaleType::ALL {
        let Some((service_uuid, read_uuid, write_uuid)) = scale_type.service_signature() else {
            continue;
        };
        let Some(service) = services.iter().find(|s| s.uuid == service_uuid) else {
            continue;
        };

        debug!("{} service {} found", scale_type, service_uuid);
        return match (service.characteristic(read_uuid), service.characteristic(write_uuid)) {
            (Some(read), Some(write)) => {
                info!("🎯 {} scale detected", scale_type);
                Ok(GattLink {
                    scale_type,
                    read: read.clone(),
                    write: write.clone(),
                })
            }
            _ => {
                warn!("{} service present but characteristics are missing", scale_type);
                Err(ResolveError::MissingCharacteristic(scale_type))
            }
        };
    }

    Err(ResolveError::NoMatch)
}
