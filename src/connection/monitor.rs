use crate::ble::{Advertisement, BleAddress, CentralObserver};
use crate::scales::DeviceFilter;
use crate::types::DeviceDescriptor;
use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use log::{debug, info};
use std::cell::{Cell, RefCell};

/// Receives stack callbacks and hands their results to the tick loop.
///
/// Holds the first advertisement that passed the filter and whether the
/// link dropped since the last connect.
pub struct LinkMonitor {
    filter: Mutex<CriticalSectionRawMutex, Cell<DeviceFilter>>,
    found: Mutex<CriticalSectionRawMutex, RefCell<Option<DeviceDescriptor>>>,
    link_dropped: Mutex<CriticalSectionRawMutex, Cell<bool>>,
}

impl LinkMonitor {
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            filter: Mutex::new(Cell::new(filter)),
            found: Mutex::new(RefCell::new(None)),
            link_dropped: Mutex::new(Cell::new(false)),
        }
    }

    pub fn set_filter(&self, filter: DeviceFilter) {
        self.filter.lock(|f| f.set(filter));
    }

    pub fn filter(&self) -> DeviceFilter {
        self.filter.lock(|f| f.get())
    }

    pub fn take_found(&self) -> Option<DeviceDescriptor> {
        self.found.lock(|found| found.borrow_mut().take())
    }

    pub fn has_found(&self) -> bool {
        self.found.lock(|found| found.borrow().is_some())
    }

    pub fn clear_found(&self) {
        self.found.lock(|found| *found.borrow_mut() = None);
    }

    pub fn link_dropped(&self) -> bool {
        self.link_dropped.lock(|dropped| dropped.get())
    }

    pub fn clear_link_dropped(&self) {
        self.link_dropped.lock(|dropped| dropped.set(false));
    }
}

impl CentralObserver for LinkMonitor {
    fn on_scan_result(&self, advertisement: &Advertisement) {
        if self.has_found() || !self.filter().accepts(advertisement) {
            return;
        }

        info!(
            "🎯 Supported scale advertising: {} at {} (rssi {:?})",
            advertisement.name, advertisement.address, advertisement.rssi
        );
        let descriptor = DeviceDescriptor {
            address: advertisement.address,
            address_type: advertisement.address_type,
            advertised_name: advertisement.name.clone(),
        };
        self.found.lock(|found| {
            found.borrow_mut().get_or_insert(descriptor);
        });
    }

    fn on_scan_end(&self, reason: i32) {
        debug!("Scan ended, reason: {}", reason);
    }

    fn on_connect(&self, address: &BleAddress) {
        debug!("Client connected to {}", address);
        self.clear_link_dropped();
    }

    fn on_disconnect(&self, reason: i32) {
        info!("📴 Client disconnected, reason: {}", reason);
        self.link_dropped.lock(|dropped| dropped.set(true));
    }
}
