//! Session-level dispatch scenarios over a loopback transport.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use common::{LoopbackTransport, TestClock};
use xslot::config::Config;
use xslot::error::Error;
use xslot::hal::Clock;
use xslot::protocol::frame::{Command, Frame};
use xslot::protocol::{message, MAX_FRAME_SIZE};
use xslot::session::Session;
use xslot::types::{BacnetObject, ObjectType, RunMode, ADDR_HUB, FLAG_CHANGED};

const HUB: u16 = 0xFFFE;
const EDGE: u16 = 0xFFBE;

fn hub_config() -> Config {
    Config {
        local_addr: HUB,
        uart_port: "/dev/ttyUSB0".into(),
        ..Config::default()
    }
}

fn started_session(config: Config) -> (Session, common::LoopbackHandle) {
    let session = Session::new(config).unwrap();
    let (transport, handle) = LoopbackTransport::new();
    session.start_with(transport, RunMode::Hmi).unwrap();
    (session, handle)
}

fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = frame.encode(&mut buf).unwrap();
    buf[..n].to_vec()
}

#[test]
fn ping_gets_automatic_pong() {
    let (session, wire) = started_session(hub_config());

    let online_events = Arc::new(Mutex::new(Vec::new()));
    {
        let online_events = Arc::clone(&online_events);
        session.set_node_callback(Arc::new(move |addr, online| {
            online_events.lock().push((addr, online));
        }));
    }

    // Edge 0xFFBE pings the hub with seq 7.
    wire.deliver(&encode(&message::build_ping(EDGE, HUB, 7)));

    let sent = wire.sent();
    assert_eq!(sent.len(), 1);
    let pong = Frame::decode(&sent[0]).unwrap();
    assert_eq!(pong.command(), Some(Command::Pong));
    assert_eq!(pong.from(), HUB);
    assert_eq!(pong.to(), EDGE);
    assert_eq!(pong.seq(), 7);

    // First contact fires the online upcall exactly once.
    assert_eq!(online_events.lock().as_slice(), &[(EDGE, true)]);
    assert!(session.is_node_online(EDGE));
}

#[test]
fn report_upcall_full_format() {
    let (session, wire) = started_session(hub_config());

    let reports: Arc<Mutex<Vec<(u16, Vec<BacnetObject>)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let reports = Arc::clone(&reports);
        session.set_report_callback(Arc::new(move |from, objects| {
            reports.lock().push((from, objects.to_vec()));
        }));
    }

    let objects =
        [BacnetObject::analog(0, ObjectType::AnalogInput, 25.5).with_flags(FLAG_CHANGED)];
    let frame =
        message::build_report(EDGE, HUB, 1, &objects, message::ReportFormat::Full).unwrap();
    wire.deliver(&encode(&frame));

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    let (from, parsed) = &reports[0];
    assert_eq!(*from, EDGE);
    assert_eq!(parsed.as_slice(), &objects);
    assert_eq!(session.node(EDGE).unwrap().object_count, 1);
}

#[test]
fn report_upcall_incremental_auto_detect() {
    let (session, wire) = started_session(hub_config());

    let reports: Arc<Mutex<Vec<BacnetObject>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let reports = Arc::clone(&reports);
        session.set_report_callback(Arc::new(move |_, objects| {
            reports.lock().extend_from_slice(objects);
        }));
    }

    let objects = [BacnetObject::analog(0, ObjectType::AnalogInput, 25.5)];
    let frame =
        message::build_report(EDGE, HUB, 2, &objects, message::ReportFormat::Incremental)
            .unwrap();
    wire.deliver(&encode(&frame));

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    // Incremental parse collapses AI to AV and clears the flags.
    assert_eq!(reports[0].object_type, ObjectType::AnalogValue);
    assert_eq!(reports[0].flags, 0);
    assert_eq!(reports[0].analog_value(), Some(25.5));
}

#[test]
fn write_fires_upcall_and_acks() {
    let config = Config {
        local_addr: EDGE,
        uart_port: "/dev/ttyUSB0".into(),
        ..Config::default()
    };
    let (session, wire) = started_session(config);

    let writes: Arc<Mutex<Vec<(u16, BacnetObject)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let writes = Arc::clone(&writes);
        session.set_write_callback(Arc::new(move |from, obj| {
            writes.lock().push((from, *obj));
        }));
    }

    let obj = BacnetObject::binary(3, ObjectType::BinaryOutput, 1);
    let frame = message::build_write(HUB, EDGE, 11, &obj).unwrap();
    wire.deliver(&encode(&frame));

    assert_eq!(writes.lock().as_slice(), &[(HUB, obj)]);

    let sent = wire.sent();
    assert_eq!(sent.len(), 1);
    let ack = Frame::decode(&sent[0]).unwrap();
    assert_eq!(ack.command(), Some(Command::WriteAck));
    assert_eq!(ack.to(), HUB);
    assert_eq!(ack.seq(), 11);
    assert_eq!(ack.data(), &[0x00]);
}

#[test]
fn query_and_response_reach_data_callback() {
    let (session, wire) = started_session(hub_config());

    let payloads: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let payloads = Arc::clone(&payloads);
        session.set_data_callback(Arc::new(move |_, data| {
            payloads.lock().push(data.to_vec());
        }));
    }

    let query = message::build_query(0xFF00, HUB, 5, &[1, 2]).unwrap();
    wire.deliver(&encode(&query));

    let payloads = payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], vec![2, 1, 0, 2, 0]);
}

#[test]
fn frames_for_other_nodes_dropped() {
    let (session, wire) = started_session(hub_config());

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        session.set_node_callback(Arc::new(move |_, _| {
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    wire.deliver(&encode(&message::build_ping(EDGE, 0x1234, 0)));

    assert!(wire.sent().is_empty());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(session.nodes().is_empty());
}

#[test]
fn broadcast_frames_accepted() {
    let (session, wire) = started_session(hub_config());
    wire.deliver(&encode(&message::build_ping(EDGE, 0x0000, 3)));
    assert_eq!(wire.sent().len(), 1);
    assert!(session.is_node_online(EDGE));
}

#[test]
fn corrupt_frames_counted_and_dropped() {
    let (session, wire) = started_session(hub_config());

    let mut bytes = encode(&message::build_ping(EDGE, HUB, 0));
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    wire.deliver(&bytes);

    assert!(wire.sent().is_empty());
    assert!(session.nodes().is_empty());
    assert_eq!(session.crc_error_count(), 1);
}

#[test]
fn outbound_seq_strictly_increments() {
    let (session, wire) = started_session(hub_config());

    for _ in 0..300 {
        session.ping(EDGE).unwrap();
    }

    let sent = wire.sent();
    assert_eq!(sent.len(), 300);
    for (i, bytes) in sent.iter().enumerate() {
        let frame = Frame::decode(bytes).unwrap();
        assert_eq!(frame.seq(), (i % 256) as u8);
        assert_eq!(frame.from(), HUB);
    }
}

#[test]
fn report_targets_hub_incrementally() {
    let config = Config {
        local_addr: EDGE,
        uart_port: "/dev/ttyUSB0".into(),
        ..Config::default()
    };
    let (session, wire) = started_session(config);

    let objects = [BacnetObject::analog(7, ObjectType::AnalogInput, 3.0)];
    session.report(&objects).unwrap();

    let sent = wire.sent();
    let frame = Frame::decode(&sent[0]).unwrap();
    assert_eq!(frame.command(), Some(Command::Report));
    assert_eq!(frame.to(), ADDR_HUB);
    // Type byte of the first object carries the incremental marker.
    assert_eq!(frame.data()[3] & 0x80, 0x80);
}

#[test]
fn node_offline_transition_fires_once() {
    let clock = TestClock::new();
    let session =
        Session::with_clock(hub_config(), Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
    let (transport, wire) = LoopbackTransport::new();
    session.start_with(transport, RunMode::Hmi).unwrap();

    let events: Arc<Mutex<Vec<(u16, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        session.set_node_callback(Arc::new(move |addr, online| {
            events.lock().push((addr, online));
        }));
    }

    // Frames from the edge at t = 0, 1000, 2000 ms.
    for (t, seq) in [(0u64, 0u8), (1000, 1), (2000, 2)] {
        clock.set(t);
        wire.deliver(&encode(&message::build_ping(EDGE, HUB, seq)));
    }

    // Quiet until t = 7500: one offline transition exactly.
    clock.set(7_500);
    session.check_node_timeouts(5_000);
    session.check_node_timeouts(5_000);

    let events = events.lock();
    assert_eq!(events.as_slice(), &[(EDGE, true), (EDGE, false)]);
    assert!(!session.is_node_online(EDGE));
}

#[test]
fn stop_silences_session() {
    let (session, wire) = started_session(hub_config());
    assert!(session.is_running());

    session.stop();
    assert!(!session.is_running());

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        session.set_node_callback(Arc::new(move |_, _| {
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Frames after stop produce no upcalls; sends report NotInitialized.
    wire.deliver(&encode(&message::build_ping(EDGE, HUB, 0)));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(session.ping(EDGE), Err(Error::NotInitialized));

    // stop() is idempotent.
    session.stop();
}

#[test]
fn start_without_device_reports_no_device_once() {
    let config = Config {
        local_addr: HUB,
        uart_port: "/dev/xslot-does-not-exist".into(),
        ..Config::default()
    };
    let session = Session::new(config).unwrap();

    assert_eq!(session.start(), Err(Error::NoDevice));
    assert_eq!(session.mode(), RunMode::None);
    // The null transport is installed; data operations report NoDevice.
    assert!(session.is_running());
    assert_eq!(session.ping(EDGE), Err(Error::NoDevice));
}

#[test]
fn update_wireless_config_validates_power() {
    let (session, _wire) = started_session(hub_config());
    assert_eq!(session.update_wireless_config(1, 99), Err(Error::InvalidParam));
    session.update_wireless_config(1, 20).unwrap();
}

#[test]
fn empty_report_and_query_rejected() {
    let (session, _wire) = started_session(hub_config());
    assert_eq!(session.report(&[]), Err(Error::InvalidParam));
    assert_eq!(session.query(EDGE, &[]), Err(Error::InvalidParam));
}
