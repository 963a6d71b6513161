// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Agent-level driver tests.
//!
//! A harness wires conductor, sender and receiver together in one thread and
//! ticks them deterministically. Remote peers are plain UDP sockets so every
//! scenario runs over real loopback datagrams.

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::conductor::DriverConductor;
use super::proxy::{DriverConductorProxy, ReceiverProxy, SenderProxy};
use super::receiver::Receiver;
use super::sender::Sender;
use crate::cnc::{
    BroadcastReceiver, CncFile, CountersManager, ManyToOneRingBuffer, SystemCounters,
};
use crate::config::{DriverConfig, CMD_QUEUE_CAPACITY};
use crate::error::ErrorCode;
use crate::logbuffer::RawLogFactory;
use crate::protocol::command::{
    self, ErrorResponse, PublicationMessage, PublicationReady, SubscriptionMessage,
};
use crate::protocol::data::{DataFrame, BEGIN_AND_END_FLAGS, DATA_HEADER_LENGTH};
use crate::protocol::nak::encode_nak;
use crate::protocol::setup::SetupFrame;
use crate::protocol::status::{encode_status_message, StatusMessageFrame, SM_HEADER_LENGTH};
use crate::protocol::{check_frame, HDR_TYPE_DATA, HDR_TYPE_SETUP, HDR_TYPE_SM};
use crate::rt::spsc::SpscQueue;
use crate::rt::{Agent, NanoClock};

const CLIENT_ID: i64 = 777;
const STREAM_ID: i32 = 10;

struct TestDriver {
    conductor: DriverConductor,
    sender: Sender,
    receiver: Receiver,
    to_driver: ManyToOneRingBuffer,
    responses: BroadcastReceiver,
    _client_cnc: CncFile,
    _dir: tempfile::TempDir,
}

impl TestDriver {
    fn launch(mut config: DriverConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        config.dir = dir.path().join("driver");
        std::fs::create_dir_all(&config.dir).unwrap();

        let cnc = Arc::new(
            CncFile::create(
                &config.dir,
                64 * 1024,
                64 * 1024,
                64 * 256,
                64 * 64,
                config.client_liveness_timeout_ns,
            )
            .unwrap(),
        );

        let mut counters_manager =
            CountersManager::new(cnc.counter_labels_buffer(), cnc.counter_values_buffer());
        let system_counters = Arc::new(SystemCounters::new(&mut counters_manager));
        let raw_log_factory = RawLogFactory::new(&config.dir).unwrap();
        let clock = NanoClock::new();

        let sender_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let receiver_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let conductor_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));

        let sender = Sender::new(sender_queue.clone(), clock);
        let receiver = Receiver::new(
            receiver_queue.clone(),
            DriverConductorProxy::new(conductor_queue.clone()),
            clock,
        );
        let conductor = DriverConductor::new(
            config.clone(),
            clock,
            cnc.clone(),
            conductor_queue,
            SenderProxy::new(sender_queue),
            ReceiverProxy::new(receiver_queue),
            counters_manager,
            system_counters,
            raw_log_factory,
        );

        let client_cnc = CncFile::map_existing(&config.dir).unwrap();
        let to_driver = ManyToOneRingBuffer::new(client_cnc.to_driver_buffer());
        let responses = BroadcastReceiver::new(client_cnc.to_clients_buffer());

        Self {
            conductor,
            sender,
            receiver,
            to_driver,
            responses,
            _client_cnc: client_cnc,
            _dir: dir,
        }
    }

    fn tick(&mut self) {
        self.conductor.do_work();
        self.sender.do_work();
        self.receiver.do_work();
    }

    fn tick_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.tick();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn add_publication(&mut self, correlation_id: i64, session_id: i32, channel: &str) {
        let message = PublicationMessage {
            correlation_id,
            client_id: CLIENT_ID,
            session_id,
            stream_id: STREAM_ID,
            channel: channel.to_string(),
        };
        self.send_command(command::ADD_PUBLICATION, |buf| message.encode(buf).unwrap());
    }

    fn remove_publication(&mut self, correlation_id: i64, session_id: i32, channel: &str) {
        let message = PublicationMessage {
            correlation_id,
            client_id: CLIENT_ID,
            session_id,
            stream_id: STREAM_ID,
            channel: channel.to_string(),
        };
        self.send_command(command::REMOVE_PUBLICATION, |buf| message.encode(buf).unwrap());
    }

    fn add_subscription(&mut self, correlation_id: i64, channel: &str) {
        let message = SubscriptionMessage {
            correlation_id,
            client_id: CLIENT_ID,
            registration_correlation_id: -1,
            stream_id: STREAM_ID,
            channel: channel.to_string(),
        };
        self.send_command(command::ADD_SUBSCRIPTION, |buf| message.encode(buf).unwrap());
    }

    fn send_command(&mut self, msg_type_id: i32, encode: impl Fn(&mut [u8]) -> usize) {
        let mut buf = vec![0u8; 1024];
        let length = encode(&mut buf);
        assert!(self.to_driver.write(msg_type_id, &buf[..length]));
    }

    fn next_response(&mut self) -> Option<(i32, Vec<u8>)> {
        self.responses.receive()
    }

    fn expect_response(&mut self, expected_type: i32) -> Vec<u8> {
        for _ in 0..500 {
            self.tick();
            if let Some((msg_type_id, payload)) = self.next_response() {
                assert_eq!(msg_type_id, expected_type, "unexpected response type");
                return payload;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no response of type {:#x}", expected_type);
    }
}

fn test_config() -> DriverConfig {
    let mut config = DriverConfig::default();
    config.term_buffer_length = 64 * 1024;
    config.mtu_length = 1408;
    config.publication_linger_timeout_ns = 0;
    config
}

fn recv_frame(socket: &UdpSocket) -> Option<(Vec<u8>, std::net::SocketAddr)> {
    let mut buf = [0u8; 64 * 1024];
    match socket.recv_from(&mut buf) {
        Ok((length, src)) => Some((buf[..length].to_vec(), src)),
        Err(_) => None,
    }
}

fn recv_frame_of_type(
    driver: &mut TestDriver,
    socket: &UdpSocket,
    frame_type: u16,
) -> (Vec<u8>, std::net::SocketAddr) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        driver.tick();
        if let Some((frame, src)) = recv_frame(socket) {
            if check_frame(&frame).ok() == Some(frame_type) {
                return (frame, src);
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("no frame of type {:#x} received", frame_type);
}

fn loopback_socket() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_nonblocking(true).unwrap();
    socket
}

/// Next non-heartbeat DATA frame (idle heartbeats interleave with data).
fn recv_data_frame(driver: &mut TestDriver, socket: &UdpSocket) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        driver.tick();
        if let Some((frame, _)) = recv_frame(socket) {
            if check_frame(&frame).ok() == Some(HDR_TYPE_DATA)
                && !DataFrame::wrap(&frame).is_heartbeat()
            {
                return frame;
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("no data frame received");
}

fn send_status_message(
    socket: &UdpSocket,
    to: std::net::SocketAddr,
    session_id: i32,
    term_id: i32,
    term_offset: i32,
    window: i32,
) {
    let mut buf = [0u8; SM_HEADER_LENGTH];
    let length =
        encode_status_message(&mut buf, session_id, STREAM_ID, term_id, term_offset, window, None, 0)
            .unwrap();
    socket.send_to(&buf[..length], to).unwrap();
}

// ===== conductor command handling =====

#[test]
fn test_add_publication_responds_and_creates_log() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    let payload = driver.expect_response(command::ON_NEW_PUBLICATION);
    let ready = PublicationReady::decode(&payload).unwrap();

    assert_eq!(ready.correlation_id, 100);
    assert_eq!(ready.session_id, 1);
    assert_eq!(ready.stream_id, STREAM_ID);
    assert!(std::path::Path::new(&ready.log_file_name).exists());
    assert!(ready.log_file_name.contains("publications/100.logbuffer"));
    assert_eq!(driver.conductor.publication_count(), 1);
}

#[test]
fn test_duplicate_publication_is_an_error() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    driver.add_publication(101, 1, &channel);
    let payload = driver.expect_response(command::ON_ERROR);
    let error = ErrorResponse::decode(&payload).unwrap();

    assert_eq!(error.offending_correlation_id, 101);
    assert_eq!(error.error_code, ErrorCode::PublicationStreamAlreadyExists);
    assert!(!error.error_message.is_empty());
}

#[test]
fn test_add_publication_invalid_channel() {
    let mut driver = TestDriver::launch(test_config());

    driver.add_publication(100, 1, "udp://");
    let payload = driver.expect_response(command::ON_ERROR);
    let error = ErrorResponse::decode(&payload).unwrap();

    assert_eq!(error.error_code, ErrorCode::InvalidChannel);
    assert_eq!(error.offending_correlation_id, 100);
}

#[test]
fn test_remove_publication_error_directions() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    // Unknown channel: INVALID_CHANNEL.
    driver.remove_publication(101, 1, "udp://127.0.0.1:19999");
    let payload = driver.expect_response(command::ON_ERROR);
    assert_eq!(
        ErrorResponse::decode(&payload).unwrap().error_code,
        ErrorCode::InvalidChannel
    );

    // Known channel, unknown session: PUBLICATION_STREAM_UNKNOWN.
    driver.remove_publication(102, 2, &channel);
    let payload = driver.expect_response(command::ON_ERROR);
    assert_eq!(
        ErrorResponse::decode(&payload).unwrap().error_code,
        ErrorCode::PublicationStreamUnknown
    );
}

#[test]
fn test_add_then_remove_returns_to_pre_add_state() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);
    assert_eq!(driver.conductor.send_endpoint_count(), 1);

    driver.remove_publication(101, 1, &channel);
    driver.expect_response(command::ON_OPERATION_SUCCESS);

    // Linger is zero in the test config; the next timer tick reclaims.
    driver.tick_for(Duration::from_millis(10));
    assert_eq!(driver.conductor.publication_count(), 0);
    assert_eq!(driver.conductor.send_endpoint_count(), 0);

    // The same (session, stream, channel) can be added afresh.
    driver.add_publication(102, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);
}

// ===== sender path =====

#[test]
fn test_setup_repeats_until_status_message() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    let (first, _) = recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    let setup = SetupFrame::wrap(&first);
    assert_eq!(setup.session_id(), 1);
    assert_eq!(setup.stream_id(), STREAM_ID);
    assert_eq!(setup.term_length(), 64 * 1024);
    assert_eq!(setup.mtu_length(), 1408);

    // Not yet connected: SETUP repeats on the timeout.
    let (second, _) = recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    assert_eq!(SetupFrame::wrap(&second).initial_term_id(), setup.initial_term_id());
}

#[test]
fn test_single_publication_round_trip() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    let (setup_frame, endpoint_addr) =
        recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    let setup = SetupFrame::wrap(&setup_frame);
    send_status_message(
        &subscriber,
        endpoint_addr,
        1,
        setup.active_term_id(),
        setup.term_offset(),
        64 * 1024,
    );

    let publication = driver.conductor.find_publication(1, STREAM_ID).unwrap();
    let payload = b"Hello World! ";
    driver.tick_for(Duration::from_millis(5));
    assert!(matches!(
        publication.offer(payload),
        crate::driver::publication::OfferOutcome::NewStreamPosition(_)
    ));

    let data_frame = recv_data_frame(&mut driver, &subscriber);
    let data = DataFrame::wrap(&data_frame);
    assert_eq!(data.flags(), BEGIN_AND_END_FLAGS);
    assert_eq!(data.session_id(), 1);
    assert_eq!(data.stream_id(), STREAM_ID);
    assert_eq!(data.payload(), payload);
    assert_eq!(
        data.frame_length() as usize,
        DATA_HEADER_LENGTH + payload.len()
    );
}

#[test]
fn test_nak_triggers_retransmit() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    let (setup_frame, endpoint_addr) =
        recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    let setup = SetupFrame::wrap(&setup_frame);
    send_status_message(
        &subscriber,
        endpoint_addr,
        1,
        setup.active_term_id(),
        setup.term_offset(),
        64 * 1024,
    );
    driver.tick_for(Duration::from_millis(5));

    let publication = driver.conductor.find_publication(1, STREAM_ID).unwrap();
    for i in 0..5u8 {
        publication.offer(&[i; 16]);
    }

    // Drain the original transmission.
    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        driver.tick();
        let _ = recv_frame(&subscriber);
        std::thread::sleep(Duration::from_millis(1));
    }

    // NAK frame index 2: 48-byte frames align to 64.
    let frame_offset = 2 * 64;
    let mut nak = [0u8; 28];
    let length = encode_nak(
        &mut nak,
        1,
        STREAM_ID,
        setup.active_term_id(),
        frame_offset,
        64,
    )
    .unwrap();
    subscriber.send_to(&nak[..length], endpoint_addr).unwrap();

    let resent = recv_data_frame(&mut driver, &subscriber);
    let resent = DataFrame::wrap(&resent);
    assert_eq!(resent.term_offset(), frame_offset);
    assert_eq!(resent.payload(), &[2u8; 16]);
}

#[test]
fn test_second_nak_suppressed_while_lingering() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    let (setup_frame, endpoint_addr) =
        recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    let setup = SetupFrame::wrap(&setup_frame);
    send_status_message(
        &subscriber,
        endpoint_addr,
        1,
        setup.active_term_id(),
        setup.term_offset(),
        64 * 1024,
    );
    driver.tick_for(Duration::from_millis(5));

    let publication = driver.conductor.find_publication(1, STREAM_ID).unwrap();
    for i in 0..5u8 {
        publication.offer(&[i; 16]);
    }
    let deadline = Instant::now() + Duration::from_millis(100);
    while Instant::now() < deadline {
        driver.tick();
        let _ = recv_frame(&subscriber);
        std::thread::sleep(Duration::from_millis(1));
    }

    let mut nak = [0u8; 28];
    let length =
        encode_nak(&mut nak, 1, STREAM_ID, setup.active_term_id(), 2 * 64, 64).unwrap();

    let count_retransmits = |driver: &mut TestDriver, window: Duration| {
        let mut count = 0;
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            driver.tick();
            if let Some((frame, _)) = recv_frame(&subscriber) {
                if check_frame(&frame).ok() == Some(HDR_TYPE_DATA)
                    && DataFrame::wrap(&frame).term_offset() == 2 * 64
                    && !DataFrame::wrap(&frame).is_heartbeat()
                {
                    count += 1;
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        count
    };

    // First NAK retransmits immediately (unicast zero delay).
    subscriber.send_to(&nak[..length], endpoint_addr).unwrap();
    // Second NAK 30ms later falls inside the 60ms linger: suppressed.
    std::thread::sleep(Duration::from_millis(30));
    subscriber.send_to(&nak[..length], endpoint_addr).unwrap();
    let early = count_retransmits(&mut driver, Duration::from_millis(40));
    assert_eq!(early, 1, "second NAK inside linger must be suppressed");

    // A third NAK after the linger expires retransmits again.
    std::thread::sleep(Duration::from_millis(40));
    subscriber.send_to(&nak[..length], endpoint_addr).unwrap();
    let late = count_retransmits(&mut driver, Duration::from_millis(40));
    assert_eq!(late, 1, "NAK after linger must retransmit");
}

#[test]
fn test_heartbeat_when_idle() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);

    let (setup_frame, endpoint_addr) =
        recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_SETUP);
    let setup = SetupFrame::wrap(&setup_frame);
    send_status_message(
        &subscriber,
        endpoint_addr,
        1,
        setup.active_term_id(),
        setup.term_offset(),
        64 * 1024,
    );

    // No data offered: a zero-length DATA frame arrives as heartbeat.
    let (frame, _) = recv_frame_of_type(&mut driver, &subscriber, HDR_TYPE_DATA);
    let heartbeat = DataFrame::wrap(&frame);
    assert!(heartbeat.is_heartbeat());
    assert_eq!(heartbeat.frame_length() as usize, DATA_HEADER_LENGTH);
    assert_eq!(heartbeat.term_offset(), setup.term_offset());
}

// ===== receiver path =====

#[test]
fn test_setup_elicits_status_message() {
    let mut driver = TestDriver::launch(test_config());
    let publisher = loopback_socket();

    let endpoint_port = 45_678;
    let channel = format!("udp://127.0.0.1:{}", endpoint_port);
    driver.add_subscription(200, &channel);
    driver.expect_response(command::ON_OPERATION_SUCCESS);
    driver.tick_for(Duration::from_millis(5));

    // Inject a SETUP toward the subscribed endpoint.
    let mut setup = [0u8; 40];
    crate::protocol::setup::encode_setup(&mut setup, 0, 1, STREAM_ID, 5000, 5000, 64 * 1024, 1408, 0)
        .unwrap();
    publisher
        .send_to(&setup, format!("127.0.0.1:{}", endpoint_port))
        .unwrap();

    let (sm_frame, _) = recv_frame_of_type(&mut driver, &publisher, HDR_TYPE_SM);
    let sm = StatusMessageFrame::wrap(&sm_frame);
    assert_eq!(sm.session_id(), 1);
    assert_eq!(sm.stream_id(), STREAM_ID);
    assert_eq!(sm.consumption_term_id(), 5000);
    assert_eq!(
        crate::protocol::frame_length(&sm_frame) as usize,
        SM_HEADER_LENGTH
    );
    assert!(sm.receiver_window() > 0);
    assert_eq!(driver.conductor.image_count(), 1);

    let payload = driver.expect_response(command::ON_NEW_IMAGE);
    let image_ready = command::ImageReady::decode(&payload).unwrap();
    assert_eq!(image_ready.session_id, 1);
    assert_eq!(image_ready.stream_id, STREAM_ID);
    assert!(image_ready.log_file_name.contains("images/"));
}

#[test]
fn test_receiver_naks_a_gap_and_rebuilds() {
    let mut driver = TestDriver::launch(test_config());
    let publisher = loopback_socket();

    let endpoint_port = 45_679;
    let channel = format!("udp://127.0.0.1:{}", endpoint_port);
    let endpoint_addr: std::net::SocketAddr =
        format!("127.0.0.1:{}", endpoint_port).parse().unwrap();
    driver.add_subscription(200, &channel);
    driver.expect_response(command::ON_OPERATION_SUCCESS);
    driver.tick_for(Duration::from_millis(5));

    let initial_term_id = 6000;
    let mut setup = [0u8; 40];
    crate::protocol::setup::encode_setup(
        &mut setup,
        0,
        1,
        STREAM_ID,
        initial_term_id,
        initial_term_id,
        64 * 1024,
        1408,
        0,
    )
    .unwrap();
    publisher.send_to(&setup, endpoint_addr).unwrap();
    recv_frame_of_type(&mut driver, &publisher, HDR_TYPE_SM);

    // Frames 0, 1 and 3 of 64 aligned bytes; frame 2 is dropped.
    let header = crate::protocol::data::DataHeader {
        session_id: 1,
        stream_id: STREAM_ID,
    };
    for index in [0i32, 1, 3] {
        let mut frame = vec![0u8; DATA_HEADER_LENGTH + 16];
        header
            .encode(&mut frame, initial_term_id, index * 64, 16, BEGIN_AND_END_FLAGS)
            .unwrap();
        frame[DATA_HEADER_LENGTH..].copy_from_slice(&[index as u8; 16]);
        publisher.send_to(&frame, endpoint_addr).unwrap();
    }

    // The receiver reports the missing 64 bytes at offset 128 within the
    // unicast feedback delay.
    let deadline = Instant::now() + Duration::from_secs(1);
    let nak = loop {
        assert!(Instant::now() < deadline, "no NAK emitted");
        driver.tick();
        if let Some((frame, _)) = recv_frame(&publisher) {
            if check_frame(&frame).ok() == Some(crate::protocol::HDR_TYPE_NAK) {
                break crate::protocol::nak::NakFrame::wrap(&frame).term_offset();
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(nak, 2 * 64);

    // Retransmit the missing frame; the rebuild position reaches the hwm.
    let mut frame = vec![0u8; DATA_HEADER_LENGTH + 16];
    header
        .encode(&mut frame, initial_term_id, 2 * 64, 16, BEGIN_AND_END_FLAGS)
        .unwrap();
    frame[DATA_HEADER_LENGTH..].copy_from_slice(&[2u8; 16]);
    publisher.send_to(&frame, endpoint_addr).unwrap();
    driver.tick_for(Duration::from_millis(20));

    let image = driver.conductor.find_image(1, STREAM_ID).unwrap();
    assert_eq!(image.hwm_position_value(), 4 * 64);
    assert_eq!(image.rebuild_position_value(), 4 * 64);
}

// ===== back pressure =====

#[test]
fn test_back_pressure_and_window_reopen() {
    use crate::cnc::counters::{COUNTER_LABEL_LENGTH, COUNTER_VALUE_LENGTH};
    use crate::driver::feedback::StaticDelayGenerator;
    use crate::driver::flow_control::{StatusMessage, UnicastFlowControl};
    use crate::driver::publication::{NetworkPublication, OfferOutcome, PublicationParams};
    use crate::driver::retransmit::RetransmitHandler;
    use crate::logbuffer::RawLog;
    use crate::rt::buffer::AlignedBuffer;
    use crate::transport::SendChannelEndpoint;

    let dir = tempfile::tempdir().unwrap();
    let labels = AlignedBuffer::new(24 * COUNTER_LABEL_LENGTH);
    let values = AlignedBuffer::new(24 * COUNTER_VALUE_LENGTH);
    let mut manager = CountersManager::new(labels.buffer(), values.buffer());
    let system_counters = Arc::new(SystemCounters::new(&mut manager));

    let subscriber = loopback_socket();
    let channel = crate::channel::UdpChannel::parse(&format!(
        "udp://127.0.0.1:{}",
        subscriber.local_addr().unwrap().port()
    ))
    .unwrap();
    let endpoint = Arc::new(
        SendChannelEndpoint::new(channel, &DriverConfig::default(), system_counters.clone())
            .unwrap(),
    );

    let initial_term_id = 0;
    // Window of exactly one aligned frame.
    let window = 64;
    let raw_log = RawLog::create(&dir.path().join("bp.logbuffer"), 64 * 1024)
        .unwrap()
        .delete_on_drop();

    let sender_position_id = manager.allocate("sender position");
    let sender_limit_id = manager.allocate("sender limit");
    let retransmit = RetransmitHandler::new(
        Box::new(StaticDelayGenerator::new(0)),
        Box::new(StaticDelayGenerator::new(60_000_000)),
        64 * 1024,
        system_counters.nak_overruns,
    );

    let publication = NetworkPublication::new(
        PublicationParams {
            registration_id: 1,
            session_id: 1,
            stream_id: STREAM_ID,
            initial_term_id,
            mtu_length: 1408,
        },
        raw_log,
        endpoint,
        Box::new(UnicastFlowControl::new(initial_term_id, 64 * 1024, window)),
        retransmit,
        manager.position(sender_position_id),
        manager.position(sender_limit_id),
        system_counters,
    );

    // One aligned frame fits the window; the second is back-pressured.
    assert!(matches!(
        publication.offer(&[1u8; 16]),
        OfferOutcome::NewStreamPosition(64)
    ));
    assert_eq!(publication.offer(&[2u8; 16]), OfferOutcome::BackPressured);

    // An SM advancing consumption reopens the window.
    publication.on_status_message(
        &StatusMessage {
            consumption_term_id: initial_term_id,
            consumption_term_offset: 64,
            receiver_window: window as i32,
            receiver_id: None,
        },
        false,
        "127.0.0.1:9999".parse().unwrap(),
        0,
    );
    assert!(matches!(
        publication.offer(&[2u8; 16]),
        OfferOutcome::NewStreamPosition(128)
    ));
}

#[test]
fn test_zero_length_offer_is_not_appended() {
    let mut driver = TestDriver::launch(test_config());
    let subscriber = loopback_socket();
    let channel = format!("udp://127.0.0.1:{}", subscriber.local_addr().unwrap().port());

    driver.add_publication(100, 1, &channel);
    driver.expect_response(command::ON_NEW_PUBLICATION);
    let publication = driver.conductor.find_publication(1, STREAM_ID).unwrap();

    let before = publication.producer_position();
    assert!(matches!(
        publication.offer(&[]),
        crate::driver::publication::OfferOutcome::NewStreamPosition(_)
    ));
    assert_eq!(publication.producer_position(), before);
}
