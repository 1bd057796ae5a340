//! Connection lifecycle state machine
//! States: Idle, Scanning, Connecting, Discovering, Configuring, Connected, Failed
//!
//! Pure state/timing logic. Every radio operation is requested through a
//! `ConnectionOutput` and its result comes back as a `ConnectionInput`.

use crate::config::ScaleConfig;
use crate::scales::ScaleType;
use crate::types::{ConnectionState, DeviceDescriptor, FailureReason};
use embassy_time::{Duration, Instant};
use log::{debug, info, warn};
use statig::prelude::*;

// Input events to the state machine
#[derive(Debug, Clone)]
pub enum ConnectionInput {
    // From the host
    Start,
    Teardown,

    // Periodic evaluation
    Tick(LinkStatus),
    /// Liveness check outside the tick loop.
    CheckData { last_packet: Option<Instant> },

    // From the scan observer
    DeviceFound(DeviceDescriptor),

    // Results of requested radio operations
    ConnectSucceeded,
    ServicesResolved(ScaleType),
    Configured,
    Failed(FailureReason),
}

/// What the driver saw on the radio side when it built a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub link_up: bool,
    pub last_packet: Option<Instant>,
}

// Output events from the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionOutput {
    StartScan,
    StopScan,
    ClearScanResults,
    Connect(DeviceDescriptor),
    DiscoverServices,
    Configure(ScaleType),
    SendKeepalive,
    LightCleanup,
    DeepReset,
    Established(ScaleType),
    LinkDown(FailureReason),
}

pub const MAX_OUTPUTS: usize = 8;

pub type Outputs = heapless::Vec<ConnectionOutput, MAX_OUTPUTS>;

/// Stage timing and retry policy, lifted out of [`ScaleConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    pub idle_delay: Duration,
    pub scan_timeout: Duration,
    pub scan_clear_interval: Duration,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub configure_timeout: Duration,
    pub data_timeout: Duration,
    pub keepalive_interval: Duration,
    pub deep_reset_every: u32,
    pub attempt_ceiling: u32,
}

impl From<&ScaleConfig> for Timings {
    fn from(config: &ScaleConfig) -> Self {
        Self {
            idle_delay: config.idle_delay(),
            scan_timeout: config.scan_timeout(),
            scan_clear_interval: config.scan_clear_interval(),
            connect_timeout: config.connect_timeout(),
            discovery_timeout: config.discovery_timeout(),
            configure_timeout: config.configure_timeout(),
            data_timeout: config.data_timeout(),
            keepalive_interval: config.keepalive_interval(),
            deep_reset_every: config.deep_reset_every.max(1),
            attempt_ceiling: config.attempt_ceiling,
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&ScaleConfig::default())
    }
}

/// Delay spent in `Failed` before scanning again.
pub fn backoff_for(attempts: u32) -> Duration {
    match attempts {
        0..=3 => Duration::from_secs(1),
        4..=6 => Duration::from_secs(2),
        7..=10 => Duration::from_secs(3),
        _ => Duration::from_secs(5),
    }
}

// Shared context for the state machine
#[derive(Debug)]
pub struct ConnectionContext {
    timings: Timings,
    now: Instant,

    started_at: Option<Instant>,
    stage_started: Instant,
    last_scan_clear: Instant,
    failed_at: Instant,
    connected_at: Option<Instant>,
    last_keepalive: Option<Instant>,

    attempts: u32,
    last_failure: Option<FailureReason>,
    device: Option<DeviceDescriptor>,
    scale_type: Option<ScaleType>,

    outputs: Outputs, // Collect outputs during state transitions
}

impl ConnectionContext {
    pub fn new(timings: Timings) -> Self {
        let epoch = Instant::from_ticks(0);
        Self {
            timings,
            now: epoch,
            started_at: None,
            stage_started: epoch,
            last_scan_clear: epoch,
            failed_at: epoch,
            connected_at: None,
            last_keepalive: None,
            attempts: 0,
            last_failure: None,
            device: None,
            scale_type: None,
            outputs: heapless::Vec::new(),
        }
    }

    fn elapsed_since(&self, since: Instant) -> Duration {
        self.now.saturating_duration_since(since)
    }

    fn emit(&mut self, output: ConnectionOutput) {
        if self.outputs.push(output).is_err() {
            warn!("Connection output queue full - dropping output");
        }
    }

    /// Silence is measured from the later of entering Connected and the last
    /// notification, so a scale that never streams still times out.
    fn data_timed_out(&self, last_packet: Option<Instant>) -> bool {
        let reference = match (self.connected_at, last_packet) {
            (Some(connected), Some(packet)) => connected.max(packet),
            (Some(connected), None) => connected,
            (None, _) => return false,
        };
        self.elapsed_since(reference) > self.timings.data_timeout
    }

    /// The first keepalive goes out on the first Connected tick.
    fn keepalive_due(&self) -> bool {
        self.last_keepalive
            .map_or(true, |last| self.elapsed_since(last) > self.timings.keepalive_interval)
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self::new(Timings::default())
    }
}

#[derive(Debug, Default)]
pub struct ConnectionStateMachine;

#[state_machine(
    initial = "State::idle()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl ConnectionStateMachine {
    /// Waiting for `Start`, then a short settle delay before scanning.
    #[state]
    fn idle(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::Start => {
                if context.started_at.is_none() {
                    context.started_at = Some(context.now);
                    context.last_scan_clear = context.now;
                }
                Handled
            }
            ConnectionInput::Tick(_) => match context.started_at {
                Some(started) if context.elapsed_since(started) > context.timings.idle_delay => {
                    Self::begin_scan(context)
                }
                _ => Handled,
            },
            ConnectionInput::Teardown => {
                context.started_at = None;
                Handled
            }
            _ => Handled,
        }
    }

    #[state]
    fn scanning(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::DeviceFound(device) => {
                info!(
                    "📡 Scale found: {} ({})",
                    device.advertised_name, device.address
                );
                context.device = Some(device.clone());
                context.stage_started = context.now;
                context.emit(ConnectionOutput::StopScan);
                context.emit(ConnectionOutput::Connect(device.clone()));
                Transition(State::connecting())
            }
            ConnectionInput::Tick(_) => {
                if context.elapsed_since(context.last_scan_clear) > context.timings.scan_clear_interval
                {
                    debug!("Clearing accumulated scan results");
                    context.last_scan_clear = context.now;
                    context.emit(ConnectionOutput::ClearScanResults);
                }

                if context.elapsed_since(context.stage_started) > context.timings.scan_timeout {
                    warn!("⏰ Scan timeout - no scales found");
                    return Self::fail(context, FailureReason::ScanTimeout);
                }
                Handled
            }
            ConnectionInput::Failed(reason) => Self::fail(context, *reason),
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }

    #[state]
    fn connecting(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::ConnectSucceeded => {
                info!("🔗 Connected, discovering services...");
                context.stage_started = context.now;
                context.emit(ConnectionOutput::DiscoverServices);
                Transition(State::discovering())
            }
            ConnectionInput::Tick(_)
                if context.elapsed_since(context.stage_started) > context.timings.connect_timeout =>
            {
                Self::fail(context, FailureReason::ConnectTimeout)
            }
            ConnectionInput::Failed(reason) => Self::fail(context, *reason),
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }

    #[state]
    fn discovering(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::ServicesResolved(scale_type) => {
                context.scale_type = Some(*scale_type);
                context.stage_started = context.now;
                context.emit(ConnectionOutput::Configure(*scale_type));
                Transition(State::configuring())
            }
            ConnectionInput::Tick(_)
                if context.elapsed_since(context.stage_started)
                    > context.timings.discovery_timeout =>
            {
                Self::fail(context, FailureReason::DiscoveryTimeout)
            }
            ConnectionInput::Failed(reason) => Self::fail(context, *reason),
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }

    #[state]
    fn configuring(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::Configured => {
                context.attempts = 0;
                context.connected_at = Some(context.now);
                context.last_keepalive = None;
                if let Some(scale_type) = context.scale_type {
                    info!("✅ {} scale ready", scale_type);
                    context.emit(ConnectionOutput::Established(scale_type));
                }
                Transition(State::connected())
            }
            ConnectionInput::Tick(_)
                if context.elapsed_since(context.stage_started)
                    > context.timings.configure_timeout =>
            {
                Self::fail(context, FailureReason::ConfigureTimeout)
            }
            ConnectionInput::Failed(reason) => Self::fail(context, *reason),
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }

    #[state]
    fn connected(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::Tick(status) => {
                if !status.link_up {
                    warn!("📴 Scale disconnected");
                    return Self::fail(context, FailureReason::LinkLost);
                }

                if context.data_timed_out(status.last_packet) {
                    warn!("⏰ Scale data timeout");
                    return Self::fail(context, FailureReason::DataTimeout);
                }

                if context.scale_type == Some(ScaleType::Acaia_Old) && context.keepalive_due() {
                    context.last_keepalive = Some(context.now);
                    context.emit(ConnectionOutput::SendKeepalive);
                }
                Handled
            }
            ConnectionInput::CheckData { last_packet } => {
                if context.data_timed_out(*last_packet) {
                    warn!("⏰ Scale data timeout");
                    return Self::fail(context, FailureReason::DataTimeout);
                }
                Handled
            }
            ConnectionInput::Failed(reason) => Self::fail(context, *reason),
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }

    /// Backoff, then restart the scan with a light or deep cleanup.
    #[state]
    fn failed(context: &mut ConnectionContext, event: &ConnectionInput) -> Response<State> {
        use Response::*;

        match event {
            ConnectionInput::Tick(_) => {
                if context.elapsed_since(context.failed_at) <= backoff_for(context.attempts) {
                    return Handled;
                }

                if context.attempts > context.timings.attempt_ceiling {
                    context.attempts = 1;
                }
                info!("🔄 Auto-reconnecting (attempt {})", context.attempts);

                context.emit(ConnectionOutput::ClearScanResults);
                if context.attempts % context.timings.deep_reset_every == 0 {
                    warn!("Multiple failures - performing deep BLE reset");
                    context.emit(ConnectionOutput::DeepReset);
                } else {
                    context.emit(ConnectionOutput::LightCleanup);
                }
                Self::begin_scan(context)
            }
            ConnectionInput::Teardown => Self::teardown(context),
            _ => Handled,
        }
    }
}

impl ConnectionStateMachine {
    fn on_transition(&mut self, source: &State, target: &State) {
        let source_state = Self::state_to_connection_state(source);
        let target_state = Self::state_to_connection_state(target);

        if source_state != target_state {
            info!("🔄 Connection state: {:?} -> {:?}", source_state, target_state);
        }
    }

    /// Convert internal State to ConnectionState for the external interface
    fn state_to_connection_state(state: &State) -> ConnectionState {
        match state {
            State::Idle {} => ConnectionState::Idle,
            State::Scanning {} => ConnectionState::Scanning,
            State::Connecting {} => ConnectionState::Connecting,
            State::Discovering {} => ConnectionState::Discovering,
            State::Configuring {} => ConnectionState::Configuring,
            State::Connected {} => ConnectionState::Connected,
            State::Failed {} => ConnectionState::Failed,
        }
    }

    fn begin_scan(context: &mut ConnectionContext) -> Response<State> {
        context.device = None;
        context.scale_type = None;
        context.connected_at = None;
        context.stage_started = context.now;
        context.emit(ConnectionOutput::StartScan);
        Response::Transition(State::scanning())
    }

    fn fail(context: &mut ConnectionContext, reason: FailureReason) -> Response<State> {
        context.attempts = context.attempts.saturating_add(1);
        context.last_failure = Some(reason);
        context.failed_at = context.now;
        context.connected_at = None;
        warn!(
            "❌ Connection failed: {} (attempt {}, retry in {}ms)",
            reason,
            context.attempts,
            backoff_for(context.attempts).as_millis()
        );
        context.emit(ConnectionOutput::LinkDown(reason));
        Response::Transition(State::failed())
    }

    fn teardown(context: &mut ConnectionContext) -> Response<State> {
        context.started_at = None;
        context.device = None;
        context.scale_type = None;
        context.connected_at = None;
        Response::Transition(State::idle())
    }
}

// Main interface for the connection state machine
pub struct ConnectionController {
    machine: statig::prelude::StateMachine<ConnectionStateMachine>,
    context: ConnectionContext,
}

impl ConnectionController {
    pub fn new(timings: Timings) -> Self {
        Self {
            machine: ConnectionStateMachine::default().state_machine(),
            context: ConnectionContext::new(timings),
        }
    }

    /// Process an input event at `now` and return output events
    pub fn handle_input(&mut self, now: Instant, input: ConnectionInput) -> Outputs {
        self.context.outputs.clear();
        self.context.now = now;

        self.machine.handle_with_context(&input, &mut self.context);

        std::mem::take(&mut self.context.outputs)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionStateMachine::state_to_connection_state(self.machine.state())
    }

    pub fn attempts(&self) -> u32 {
        self.context.attempts
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.context.last_failure
    }

    pub fn device(&self) -> Option<&DeviceDescriptor> {
        self.context.device.as_ref()
    }

    pub fn scale_type(&self) -> Option<ScaleType> {
        self.context.scale_type
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.context.connected_at
    }

    pub fn timings(&self) -> &Timings {
        &self.context.timings
    }
}

impl Default for ConnectionController {
    fn default() -> Self {
        Self::new(Timings::default())
    }
}
