//! Drives the connection state machine against a real (or mock) BLE central.
//!
//! The machine in [`states`] only decides; [`ConnectionManager`] carries out
//! its outputs on the radio and queues the results as inputs for the next
//! poll, so each poll advances at most one stage.

pub mod monitor;
pub mod states;

pub use monitor::LinkMonitor;
pub use states::{
    backoff_for, ConnectionController, ConnectionInput, ConnectionOutput, LinkStatus, Timings,
};

use crate::ble::{BleCentral, BleError, CentralObserver};
use crate::config::ScaleConfig;
use crate::protocol::{decode_notification, encode_command};
use crate::scales::{resolve_link, DeviceFilter, GattLink, ResolveError, ScaleType};
use crate::state::WeightSlot;
use crate::types::{Command, ConnectionState, DeviceDescriptor, FailureReason};
use embassy_time::Instant;
use log::{debug, error, info, warn};
use std::sync::Arc;

const MAX_PENDING: usize = 4;

pub struct ConnectionManager<B: BleCentral> {
    central: B,
    config: ScaleConfig,
    controller: ConnectionController,
    monitor: Arc<LinkMonitor>,
    slot: Arc<WeightSlot>,
    link: Option<GattLink>,
    pending: heapless::Vec<ConnectionInput, MAX_PENDING>,
    active: bool,
}

impl<B: BleCentral> ConnectionManager<B> {
    pub fn new(central: B, config: ScaleConfig, filter: DeviceFilter) -> Self {
        let timings = Timings::from(&config);
        Self {
            central,
            config,
            controller: ConnectionController::new(timings),
            monitor: Arc::new(LinkMonitor::new(filter)),
            slot: Arc::new(WeightSlot::new()),
            link: None,
            pending: heapless::Vec::new(),
            active: false,
        }
    }

    /// Register with the stack and leave Idle after the settle delay. A
    /// running connection is torn down and the scan starts over.
    pub fn start(&mut self, filter: DeviceFilter) {
        if self.active {
            info!("🔁 Restarting scale connection");
            self.teardown();
        }
        self.monitor.set_filter(filter);
        self.register_observer();
        self.active = true;
        info!("🚀 Starting scale connection");
        self.dispatch(ConnectionInput::Start);
    }

    /// Advance by one step. Returns the state after the step.
    pub fn poll(&mut self) -> ConnectionState {
        for input in std::mem::take(&mut self.pending) {
            self.dispatch(input);
        }

        if self.controller.state() == ConnectionState::Scanning {
            if let Some(device) = self.monitor.take_found() {
                self.dispatch(ConnectionInput::DeviceFound(device));
            }
        }

        let status = LinkStatus {
            link_up: self.central.is_connected() && !self.monitor.link_dropped(),
            last_packet: self.slot.last_packet(),
        };
        self.dispatch(ConnectionInput::Tick(status));

        self.controller.state()
    }

    /// Force Connected -> Failed when the scale has gone quiet, without
    /// waiting for the next poll.
    pub fn enforce_data_timeout(&mut self) {
        if self.controller.state() == ConnectionState::Connected {
            let last_packet = self.slot.last_packet();
            self.dispatch(ConnectionInput::CheckData { last_packet });
        }
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.dispatch(ConnectionInput::Failed(reason));
    }

    /// Stop scanning, drop the link and return to Idle. Safe to call at any
    /// point, including before `start` and repeatedly.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        info!("🛑 Tearing down scale connection");

        self.dispatch(ConnectionInput::Teardown);
        self.pending.clear();
        self.slot.disarm();
        self.link = None;
        self.monitor.clear_found();

        if let Err(e) = self.central.stop_scan() {
            debug!("Stop scan during teardown: {}", e);
        }
        self.drop_client();
    }

    /// Write an encoded command to the scale's write characteristic.
    pub fn write(&mut self, data: &[u8]) -> Result<(), BleError> {
        let link = self.link.as_ref().ok_or(BleError::NotConnected)?;
        self.central.write(link.write_handle(), data)
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    pub fn scale_type(&self) -> Option<ScaleType> {
        self.controller.scale_type()
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.controller.device()
    }

    pub fn slot(&self) -> &Arc<WeightSlot> {
        &self.slot
    }

    pub fn central(&self) -> &B {
        &self.central
    }

    pub fn central_mut(&mut self) -> &mut B {
        &mut self.central
    }

    pub fn now(&self) -> Instant {
        self.central.now()
    }

    pub fn is_link_up(&self) -> bool {
        self.central.is_connected() && !self.monitor.link_dropped()
    }

    fn register_observer(&mut self) {
        let observer: Arc<dyn CentralObserver> = self.monitor.clone();
        self.central.set_observer(observer);
    }

    fn dispatch(&mut self, input: ConnectionInput) {
        let now = self.central.now();
        let outputs = self.controller.handle_input(now, input);
        for output in outputs {
            self.execute(output);
        }
    }

    fn queue(&mut self, input: ConnectionInput) {
        if self.pending.push(input).is_err() {
            error!("Connection input queue full - dropping result");
        }
    }

    fn execute(&mut self, output: ConnectionOutput) {
        match output {
            ConnectionOutput::StartScan => {
                self.monitor.clear_found();
                info!("🔍 Scanning for scales...");
                if let Err(e) = self.central.start_scan(&self.config.scan) {
                    error!("Failed to start scan: {}", e);
                    self.queue(ConnectionInput::Failed(FailureReason::ScanFailed));
                }
            }
            ConnectionOutput::StopScan => {
                if let Err(e) = self.central.stop_scan() {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            ConnectionOutput::ClearScanResults => self.central.clear_scan_results(),
            ConnectionOutput::Connect(device) => {
                let result = self.connect(&device);
                self.queue(result);
            }
            ConnectionOutput::DiscoverServices => {
                let result = self.discover();
                self.queue(result);
            }
            ConnectionOutput::Configure(scale_type) => {
                let result = self.configure(scale_type);
                self.queue(result);
            }
            ConnectionOutput::SendKeepalive => {
                if let Some(packet) = encode_command(ScaleType::Acaia_Old, Command::Heartbeat, 0) {
                    match self.write(&packet) {
                        Ok(()) => debug!("Keepalive sent"),
                        Err(e) => warn!("Keepalive failed: {}", e),
                    }
                }
            }
            ConnectionOutput::LightCleanup => {
                self.drop_client();
                self.monitor.clear_found();
            }
            ConnectionOutput::DeepReset => self.deep_reset(),
            ConnectionOutput::Established(scale_type) => {
                self.slot.arm();
                if let Some(device) = self.controller.device() {
                    info!(
                        "✅ {} scale connected: {} ({})",
                        scale_type, device.advertised_name, device.address
                    );
                }
            }
            ConnectionOutput::LinkDown(reason) => {
                self.slot.disarm();
                self.link = None;
                debug!("Handles invalidated after failure: {}", reason);
            }
        }
    }

    fn drop_client(&mut self) {
        if self.central.is_connected() {
            if let Err(e) = self.central.disconnect() {
                warn!("Disconnect failed: {}", e);
            }
        }
        self.link = None;
    }

    fn connect(&mut self, device: &DeviceDescriptor) -> ConnectionInput {
        // A stale client from a previous attempt must go first
        self.drop_client();
        self.monitor.clear_link_dropped();

        info!("🔗 Connecting to {}...", device.address);
        match self
            .central
            .connect(&device.address, device.address_type, &self.config.connection)
        {
            Ok(()) => ConnectionInput::ConnectSucceeded,
            Err(e) => {
                warn!("Connection to {} failed: {}", device.address, e);
                ConnectionInput::Failed(FailureReason::ConnectFailed)
            }
        }
    }

    fn discover(&mut self) -> ConnectionInput {
        let services = match self.central.discover_services() {
            Ok(services) => services,
            Err(e) => {
                warn!("Service discovery failed: {}", e);
                return ConnectionInput::Failed(FailureReason::DiscoveryFailed);
            }
        };

        debug!("Discovered {} services", services.len());
        for service in &services {
            debug!("Service UUID: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!(
                    "  Characteristic UUID: {} [{}]",
                    characteristic.uuid, characteristic.properties
                );
            }
        }

        match resolve_link(&services) {
            Ok(link) => {
                let scale_type = link.scale_type;
                self.link = Some(link);
                ConnectionInput::ServicesResolved(scale_type)
            }
            Err(ResolveError::NoMatch) => {
                warn!("No compatible scale service found");
                ConnectionInput::Failed(FailureReason::NoCompatibleService)
            }
            Err(e @ ResolveError::MissingCharacteristic(_)) => {
                warn!("{}", e);
                ConnectionInput::Failed(FailureReason::NoCompatibleService)
            }
        }
    }

    fn configure(&mut self, scale_type: ScaleType) -> ConnectionInput {
        let Some(link) = self.link.clone() else {
            return ConnectionInput::Failed(FailureReason::ConfigureFailed);
        };

        if !link.read.properties.notify {
            error!("Read characteristic {} cannot notify", link.read.uuid);
            return ConnectionInput::Failed(FailureReason::ConfigureFailed);
        }

        let slot = Arc::clone(&self.slot);
        let handler = Box::new(move |data: &[u8], at: Instant| {
            slot.record_packet(at);
            if let Some(sample) = decode_notification(scale_type, data, at) {
                slot.publish(sample);
            }
        });
        if let Err(e) = self.central.subscribe(link.read_handle(), handler) {
            error!("Failed to register for notifications: {}", e);
            return ConnectionInput::Failed(FailureReason::ConfigureFailed);
        }
        debug!("Registered for notifications");

        for command in [Command::Identify, Command::NotificationRequest] {
            let Some(packet) = encode_command(scale_type, command, 0) else {
                continue;
            };
            if let Err(e) = self.central.write(link.write_handle(), &packet) {
                error!("Failed to send {:?}: {}", command, e);
                return ConnectionInput::Failed(FailureReason::ConfigureFailed);
            }
            debug!("{:?} sent", command);
        }

        ConnectionInput::Configured
    }

    fn deep_reset(&mut self) {
        if let Err(e) = self.central.stop_scan() {
            debug!("Stop scan before reset: {}", e);
        }
        self.drop_client();
        self.monitor.clear_found();

        match self.central.reset() {
            Ok(()) => info!("♻️ BLE stack reinitialized"),
            Err(e) => error!("BLE stack reset failed: {}", e),
        }
        // Observer registrations do not survive a reset
        self.register_observer();
        self.monitor.clear_link_dropped();
    }
}

impl<B: BleCentral> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
