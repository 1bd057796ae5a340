use scale_link::ble::{
    BleAddress, BleCentral, CharProperties, RemoteCharacteristic, RemoteService,
};
use scale_link::ble_mock::{MockCentral, MockPeripheral, READ_HANDLE, WRITE_HANDLE};
use scale_link::protocol::xor_checksum;
use scale_link::scales::{acaia, bookoo, decent, weighmybru};
use scale_link::{ConnectionState, FailureReason, ScaleConfig, ScaleSession, ScaleType};

const ADDRESS: BleAddress = BleAddress([0xc4, 0xde, 0xe2, 0x19, 0x8a, 0x01]);
const OTHER_ADDRESS: BleAddress = BleAddress([0xc4, 0xde, 0xe2, 0x19, 0x8a, 0x02]);

fn setup(peripheral: Option<MockPeripheral>) -> (ScaleSession<MockCentral>, MockCentral) {
    let radio = MockCentral::new();
    if let Some(peripheral) = peripheral {
        radio.add_peripheral(peripheral);
    }
    let session = ScaleSession::new(radio.clone(), ScaleConfig::default()).unwrap();
    (session, radio)
}

fn connect(session: &mut ScaleSession<MockCentral>, radio: &MockCentral) {
    assert!(session.init(None));
    radio.advance(600);
    for _ in 0..10 {
        if session.update_connection() {
            return;
        }
    }
    panic!("never connected, stuck in {:?}", session.state());
}

fn connected(peripheral: MockPeripheral) -> (ScaleSession<MockCentral>, MockCentral) {
    let (mut session, radio) = setup(Some(peripheral));
    connect(&mut session, &radio);
    (session, radio)
}

/// Bookoo weight frame for a weight in hundredths of a gram.
fn bookoo_frame(centigrams: i32) -> [u8; 20] {
    let mut data = [0u8; 20];
    data[..2].copy_from_slice(&bookoo::HEADER);
    data[6] = if centigrams < 0 { bookoo::MINUS } else { bookoo::PLUS };
    let raw = centigrams.unsigned_abs().to_be_bytes();
    data[7..10].copy_from_slice(&raw[1..]);
    data[19] = xor_checksum(&data[..19]);
    data
}

fn start_scanning(session: &mut ScaleSession<MockCentral>, radio: &MockCentral) {
    assert!(session.init(None));
    radio.advance(600);
    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Scanning);
}

#[test]
fn test_bookoo_connects_without_handshake() {
    let (session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    assert!(session.is_connected());
    assert!(!session.is_connecting());
    assert_eq!(session.scale_type(), Some(ScaleType::Bookoo));
    assert_eq!(session.device().unwrap().advertised_name, "BOOKOO_SC");
    assert_eq!(session.connection_attempts(), 0);
    assert!(radio.is_subscribed());
    assert!(!radio.is_scanning());
    assert!(radio.writes().is_empty());
}

#[test]
fn test_acaia_handshake_order() {
    let (session, radio) = connected(MockPeripheral::acaia(ADDRESS));

    assert_eq!(session.scale_type(), Some(ScaleType::Acaia_New));
    assert_eq!(
        radio.writes_to(WRITE_HANDLE),
        vec![acaia::IDENTIFY.to_vec(), acaia::NOTIFICATION_REQUEST.to_vec()]
    );
}

#[test]
fn test_legacy_acaia_uses_one_characteristic() {
    let (session, radio) = connected(MockPeripheral::acaia_legacy(ADDRESS));

    assert_eq!(session.scale_type(), Some(ScaleType::Acaia_Old));
    // Handshake, then the first keepalive on the first connected tick
    assert_eq!(
        radio.writes_to(READ_HANDLE),
        vec![
            acaia::IDENTIFY.to_vec(),
            acaia::NOTIFICATION_REQUEST.to_vec(),
            acaia::HEARTBEAT.to_vec()
        ]
    );
    assert!(radio.writes_to(WRITE_HANDLE).is_empty());
}

#[test]
fn test_decent_gets_handshake() {
    let (session, radio) = connected(MockPeripheral::decent(ADDRESS));

    assert_eq!(session.scale_type(), Some(ScaleType::Decent));
    assert_eq!(radio.writes().len(), 2);
}

#[test]
fn test_weight_is_edge_triggered() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));
    assert!(!session.new_weight_available());

    assert!(radio.notify(&bookoo_frame(3_600)));
    assert!(session.new_weight_available());
    assert_eq!(session.get_weight(), 36.0);
    assert!(!session.new_weight_available());

    // Unparseable packet: no sample, weight unchanged
    radio.notify(&[0x03, 0x0B, 0x00]);
    assert!(!session.new_weight_available());
    assert_eq!(session.get_weight(), 36.0);

    radio.notify(&bookoo_frame(-150));
    assert!(session.new_weight_available());
    assert_eq!(session.get_weight(), -1.5);
    assert_eq!(session.weight_sample().unwrap().grams, -1.5);
}

#[test]
fn test_packet_before_connected_is_not_a_sample() {
    let peripheral = MockPeripheral::bookoo(ADDRESS).with_greeting(&bookoo_frame(1_000));
    let (mut session, _radio) = connected(peripheral);

    assert!(!session.new_weight_available());
    assert_eq!(session.get_weight(), 0.0);
    assert_eq!(session.weight_sample(), None);
}

#[test]
fn test_scan_timeout_then_backoff() {
    let (mut session, radio) = setup(None);
    start_scanning(&mut session, &radio);
    assert!(session.is_connecting());

    radio.advance(15_000);
    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Scanning);

    radio.advance(1);
    assert!(!session.update_connection());
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(session.last_failure(), Some(FailureReason::ScanTimeout));
    assert_eq!(session.connection_attempts(), 1);
    assert!(!session.is_connecting());
    assert!(!session.is_connected());

    radio.advance(1_000);
    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Failed);

    radio.advance(1);
    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Scanning);
    assert_eq!(radio.scans_started(), 2);
    assert_eq!(radio.scan_clears(), 1);
    assert_eq!(radio.resets(), 0);
}

#[test]
fn test_deep_reset_on_eighth_failure() {
    let (mut session, radio) = setup(None);
    start_scanning(&mut session, &radio);

    for attempt in 1..=8 {
        radio.advance(15_001);
        session.update_connection();
        assert_eq!(session.connection_attempts(), attempt);

        radio.advance(5_001);
        session.update_connection();
        assert_eq!(session.state(), ConnectionState::Scanning);

        let expected_resets = if attempt < 8 { 0 } else { 1 };
        assert_eq!(radio.resets(), expected_resets);
    }

    // The stack came back with our observer and a running scan
    assert!(radio.has_observer());
    assert!(radio.is_scanning());
    assert_eq!(session.connection_attempts(), 8);
}

#[test]
fn test_recovers_after_failures() {
    let (mut session, radio) = setup(None);
    start_scanning(&mut session, &radio);
    radio.advance(15_001);
    session.update_connection();
    assert_eq!(session.connection_attempts(), 1);

    radio.add_peripheral(MockPeripheral::weighmybru(ADDRESS));
    radio.advance(1_001);
    for _ in 0..10 {
        if session.update_connection() {
            break;
        }
    }
    assert!(session.is_connected());
    assert_eq!(session.scale_type(), Some(ScaleType::WeighMyBru));
    assert_eq!(session.connection_attempts(), 0);
}

#[test]
fn test_data_timeout() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    radio.advance(3_000);
    radio.notify(&bookoo_frame(500));
    radio.advance(3_000);
    assert!(session.new_weight_available());
    assert!(session.update_connection());

    // Sample arrives, then the scale goes quiet
    radio.notify(&bookoo_frame(600));
    radio.advance(5_001);
    assert!(!session.new_weight_available());
    assert!(!session.is_connected());
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(session.last_failure(), Some(FailureReason::DataTimeout));
}

#[test]
fn test_silent_scale_times_out() {
    let (mut session, radio) = connected(MockPeripheral::generic(ADDRESS));
    assert_eq!(session.scale_type(), Some(ScaleType::Generic));

    radio.advance(5_000);
    assert!(session.update_connection());
    radio.advance(1);
    assert!(!session.update_connection());
    assert_eq!(session.last_failure(), Some(FailureReason::DataTimeout));
}

#[test]
fn test_link_drop() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    radio.drop_link();
    assert!(!session.update_connection());
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(session.last_failure(), Some(FailureReason::LinkLost));
    assert!(!session.tare());
}

#[test]
fn test_commands_need_a_connection() {
    let (mut session, radio) = setup(Some(MockPeripheral::bookoo(ADDRESS)));

    assert!(!session.tare());
    assert!(!session.start_timer());
    assert!(!session.stop_timer());
    assert!(!session.reset_timer());
    assert!(!session.heartbeat());
    assert!(!session.heartbeat_required());
    assert!(radio.writes().is_empty());
}

#[test]
fn test_bookoo_commands() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    assert!(session.tare());
    assert!(session.start_timer());
    assert_eq!(
        radio.writes_to(WRITE_HANDLE),
        vec![
            vec![0x03, 0x0a, 0x01, 0x00, 0x00, 0x08],
            vec![0x03, 0x0a, 0x04, 0x00, 0x00, 0x0a]
        ]
    );
}

#[test]
fn test_decent_tare_counter() {
    let (mut session, radio) = connected(MockPeripheral::decent(ADDRESS));
    radio.clear_writes();

    assert!(session.tare());
    assert!(session.tare());
    let writes = radio.writes();
    assert_eq!(writes[0], decent::tare(1).to_vec());
    assert_eq!(writes[1], decent::tare(2).to_vec());
}

#[test]
fn test_weighmybru_commands() {
    let (mut session, radio) = connected(MockPeripheral::weighmybru(ADDRESS));

    assert!(session.tare());
    assert!(session.reset_timer());
    assert_eq!(
        radio.writes(),
        vec![weighmybru::TARE.to_vec(), weighmybru::RESET_TIMER.to_vec()]
    );
}

#[test]
fn test_write_failure_keeps_live_link() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    radio.set_fail_writes(true);
    assert!(!session.tare());
    assert!(session.is_connected());
}

#[test]
fn test_heartbeat_required_for_acaia() {
    let (mut session, radio) = connected(MockPeripheral::acaia(ADDRESS));
    assert!(session.heartbeat_required());

    radio.clear_writes();
    assert!(session.heartbeat());
    assert_eq!(radio.writes(), vec![acaia::HEARTBEAT.to_vec()]);
    assert!(!session.heartbeat_required());

    radio.advance(2_750);
    assert!(!session.heartbeat_required());
    radio.advance(1);
    assert!(session.heartbeat_required());

    let (session, _radio) = connected(MockPeripheral::bookoo(ADDRESS));
    assert!(!session.heartbeat_required());
}

#[test]
fn test_heartbeat_due_after_reconnect() {
    let (mut session, radio) = connected(MockPeripheral::acaia(ADDRESS));
    assert!(session.heartbeat());
    assert!(!session.heartbeat_required());

    radio.drop_link();
    assert!(!session.update_connection());
    radio.advance(1_001);
    for _ in 0..10 {
        if session.update_connection() {
            break;
        }
    }
    assert!(session.is_connected());
    assert!(session.heartbeat_required());
}

#[test]
fn test_legacy_acaia_keepalive() {
    let (mut session, radio) = connected(MockPeripheral::acaia_legacy(ADDRESS));
    radio.clear_writes();
    let legacy_frame = [0xef, 0xdd, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

    radio.advance(3_000);
    radio.notify(&legacy_frame);
    assert!(session.update_connection());
    radio.advance(1_000);
    assert!(session.update_connection());
    assert!(radio.writes().is_empty());

    radio.advance(1);
    assert!(session.update_connection());
    assert_eq!(radio.writes(), vec![acaia::HEARTBEAT.to_vec()]);
    assert!(session.new_weight_available());
    assert_eq!(session.get_weight(), 100.0);
}

#[test]
fn test_connect_failure() {
    let (mut session, radio) = setup(Some(MockPeripheral::bookoo(ADDRESS)));
    radio.set_fail_connect(true);
    start_scanning(&mut session, &radio);

    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Connecting);
    session.update_connection();
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(session.last_failure(), Some(FailureReason::ConnectFailed));
}

#[test]
fn test_read_characteristic_must_notify() {
    let services = vec![RemoteService {
        uuid: bookoo::SERVICE_UUID,
        characteristics: vec![
            RemoteCharacteristic {
                uuid: bookoo::WEIGHT_CHAR_UUID,
                handle: READ_HANDLE,
                properties: CharProperties {
                    read: true,
                    ..Default::default()
                },
            },
            RemoteCharacteristic {
                uuid: bookoo::COMMAND_CHAR_UUID,
                handle: WRITE_HANDLE,
                properties: CharProperties {
                    write: true,
                    ..Default::default()
                },
            },
        ],
    }];
    let (mut session, radio) = setup(Some(MockPeripheral::new("BOOKOO_SC", ADDRESS, services)));
    session.init(None);
    radio.advance(600);
    for _ in 0..6 {
        session.update_connection();
    }
    assert_eq!(session.last_failure(), Some(FailureReason::ConfigureFailed));
    assert!(!radio.is_subscribed());
}

#[test]
fn test_target_address() {
    let (mut session, radio) = setup(Some(MockPeripheral::bookoo(ADDRESS)));
    assert!(session.init(Some("c4:de:e2:19:8a:99")));
    radio.advance(600);
    session.update_connection();
    radio.advance(15_001);
    session.update_connection();
    session.update_connection();
    assert_eq!(session.last_failure(), Some(FailureReason::ScanTimeout));
    assert_eq!(radio.connects(), 0);

    let (mut session, radio) = setup(Some(MockPeripheral::bookoo(ADDRESS)));
    assert!(session.init(Some("C4:DE:E2:19:8A:01")));
    radio.advance(600);
    for _ in 0..6 {
        session.update_connection();
    }
    assert!(session.is_connected());

    let (mut session, _radio) = setup(None);
    assert!(!session.init(Some("not an address")));
}

#[test]
fn test_reinit_switches_scale() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));
    radio.add_peripheral(MockPeripheral::bookoo(OTHER_ADDRESS));
    assert_eq!(session.device().unwrap().address, ADDRESS);

    assert!(session.init(Some("c4:de:e2:19:8a:02")));
    assert_eq!(session.state(), ConnectionState::Idle);
    assert_eq!(radio.disconnects(), 1);

    radio.advance(600);
    for _ in 0..10 {
        if session.update_connection() {
            break;
        }
    }
    assert!(session.is_connected());
    assert_eq!(session.device().unwrap().address, OTHER_ADDRESS);
}

#[test]
fn test_init_without_address_accepts_any_scale() {
    let (mut session, radio) = setup(Some(MockPeripheral::bookoo(ADDRESS)));
    assert!(session.init(Some("c4:de:e2:19:8a:02")));
    session.teardown();

    connect(&mut session, &radio);
    assert_eq!(session.config().target_address, None);
    assert_eq!(session.device().unwrap().address, ADDRESS);
}

#[test]
fn test_teardown_is_idempotent() {
    let (mut session, radio) = connected(MockPeripheral::bookoo(ADDRESS));

    session.teardown();
    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(!radio.is_connected());
    assert!(!radio.is_scanning());
    let disconnects = radio.disconnects();

    session.teardown();
    assert_eq!(session.state(), ConnectionState::Idle);
    assert_eq!(radio.disconnects(), disconnects);

    radio.advance(10_000);
    assert!(!session.update_connection());
    assert_eq!(session.state(), ConnectionState::Idle);
}

#[test]
fn test_teardown_before_init() {
    let (mut session, radio) = setup(None);
    session.teardown();
    session.teardown();
    assert_eq!(session.state(), ConnectionState::Idle);
    assert_eq!(radio.disconnects(), 0);
}

#[test]
fn test_drop_disconnects() {
    let (session, radio) = connected(MockPeripheral::bookoo(ADDRESS));
    drop(session);
    assert!(!radio.is_connected());
}
