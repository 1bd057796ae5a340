//! Host-facing scale session.
//!
//! ```ignore
//! let mut scale = ScaleSession::new(central, ScaleConfig::default())?;
//! scale.init(None);
//! loop {
//!     if scale.update_connection() && scale.new_weight_available() {
//!         println!("{:.1}g", scale.get_weight());
//!     }
//!     if scale.heartbeat_required() {
//!         scale.heartbeat();
//!     }
//! }
//! ```

use crate::ble::BleCentral;
use crate::config::ScaleConfig;
use crate::connection::ConnectionManager;
use crate::protocol::CommandEncoder;
use crate::scales::ScaleType;
use crate::types::{Command, ConnectionState, DeviceDescriptor, FailureReason, WeightSample};
use anyhow::Result;
use embassy_time::{Duration, Instant};
use log::{debug, info, warn};

pub struct ScaleSession<B: BleCentral> {
    manager: ConnectionManager<B>,
    config: ScaleConfig,
    encoder: CommandEncoder,
    last_heartbeat: Option<Instant>,
}

impl<B: BleCentral> ScaleSession<B> {
    pub fn new(central: B, config: ScaleConfig) -> Result<Self> {
        config.validate()?;
        let filter = config.device_filter()?;
        Ok(Self {
            manager: ConnectionManager::new(central, config.clone(), filter),
            config,
            encoder: CommandEncoder::new(),
            last_heartbeat: None,
        })
    }

    /// Begin looking for a scale. `None` or an empty string accepts the first
    /// supported scale; otherwise only that address is connected. Replaces
    /// any target from the config. An active session is torn down first.
    pub fn init(&mut self, target_address: Option<&str>) -> bool {
        self.config.target_address = target_address.map(str::to_string);

        let filter = match self.config.device_filter() {
            Ok(filter) => filter,
            Err(e) => {
                warn!("Cannot start scale session: {:#}", e);
                return false;
            }
        };
        match filter.target {
            Some(target) => info!("Looking for scale at {}", target),
            None => info!("Looking for any supported scale"),
        }

        self.manager.start(filter);
        true
    }

    /// Advance the connection by one step. Call repeatedly.
    pub fn update_connection(&mut self) -> bool {
        let was_connected = self.is_connected();
        let connected = self.manager.poll() == ConnectionState::Connected;
        if connected && !was_connected {
            // A fresh link owes the scale a heartbeat
            self.last_heartbeat = None;
        }
        connected
    }

    pub fn is_connecting(&self) -> bool {
        self.manager.state().is_connecting()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.state() == ConnectionState::Connected
    }

    pub fn tare(&mut self) -> bool {
        self.send(Command::Tare)
    }

    pub fn start_timer(&mut self) -> bool {
        self.send(Command::StartTimer)
    }

    pub fn stop_timer(&mut self) -> bool {
        self.send(Command::StopTimer)
    }

    pub fn reset_timer(&mut self) -> bool {
        self.send(Command::ResetTimer)
    }

    pub fn heartbeat(&mut self) -> bool {
        let sent = self.send(Command::Heartbeat);
        if sent {
            self.last_heartbeat = Some(self.manager.now());
        }
        sent
    }

    /// Acaia scales drop the link unless the host heartbeats them.
    pub fn heartbeat_required(&self) -> bool {
        if !self.is_connected() || !self.scale_type().is_some_and(ScaleType::is_acaia) {
            return false;
        }

        match self.last_heartbeat {
            None => true,
            Some(last) => {
                self.manager.now().saturating_duration_since(last) > self.heartbeat_period()
            }
        }
    }

    /// True once per decoded sample. Also enforces the data timeout.
    pub fn new_weight_available(&mut self) -> bool {
        self.manager.enforce_data_timeout();
        if !self.is_connected() {
            return false;
        }
        self.manager.slot().take_fresh()
    }

    /// Last decoded weight in grams. Stale unless `new_weight_available`
    /// just returned true.
    pub fn get_weight(&self) -> f32 {
        self.manager.slot().grams()
    }

    pub fn weight_sample(&self) -> Option<WeightSample> {
        self.manager.slot().latest()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn scale_type(&self) -> Option<ScaleType> {
        self.manager.scale_type()
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.manager.device()
    }

    pub fn connection_attempts(&self) -> u32 {
        self.manager.controller().attempts()
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.manager.controller().last_failure()
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn central(&self) -> &B {
        self.manager.central()
    }

    pub fn central_mut(&mut self) -> &mut B {
        self.manager.central_mut()
    }

    /// Idempotent. Also run on drop.
    pub fn teardown(&mut self) {
        self.manager.teardown();
        self.last_heartbeat = None;
    }

    fn heartbeat_period(&self) -> Duration {
        self.config.heartbeat_period()
    }

    fn send(&mut self, command: Command) -> bool {
        if !self.is_connected() {
            debug!("{:?} ignored: not connected", command);
            return false;
        }
        let Some(scale_type) = self.scale_type() else {
            return false;
        };
        let Some(packet) = self.encoder.encode(scale_type, command) else {
            return false;
        };

        match self.manager.write(&packet) {
            Ok(()) => {
                debug!("{:?} sent to {} scale: {:02X?}", command, scale_type, packet);
                true
            }
            Err(e) => {
                warn!("{:?} failed: {}", command, e);
                if !self.manager.is_link_up() {
                    self.manager.fail(FailureReason::LinkLost);
                }
                false
            }
        }
    }
}

impl<B: BleCentral> Drop for ScaleSession<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
