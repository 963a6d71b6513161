// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The driver conductor.
//!
//! Single-threaded orchestrator: drains the client command ring, creates and
//! retires publications, subscriptions and images, allocates log buffers and
//! counters, and fires the liveness/linger/unblock timers. Data never flows
//! through the conductor.

use std::collections::HashMap;
use std::sync::Arc;

use super::feedback::{FeedbackDelayGenerator, OptimalMulticastDelayGenerator, StaticDelayGenerator};
use super::flow_control::{FlowControl, MinMulticastFlowControl, UnicastFlowControl};
use super::image::{ImageParams, PublicationImage, IMAGE_ACTIVE, IMAGE_INACTIVE, IMAGE_LINGER};
use super::proxy::{ConductorCmd, CreateImageRequest, DriverConductorProxy, ReceiverProxy, SenderProxy};
use super::publication::{NetworkPublication, PublicationParams, PUBLICATION_LINGER};
use super::retransmit::RetransmitHandler;
use super::subscription::SubscriptionLink;
use crate::channel::UdpChannel;
use crate::cnc::{BroadcastTransmitter, CncFile, CountersManager, ManyToOneRingBuffer, SystemCounters};
use crate::config::{
    DriverConfig, NAK_MULTICAST_GROUP_SIZE, NAK_MULTICAST_MAX_BACKOFF_NS, RESERVED_STREAM_ID,
    RETRANSMIT_LINGER_TIMEOUT_NS, RETRANSMIT_UNICAST_DELAY_NS,
};
use crate::error::{Error, Result};
use crate::logbuffer::descriptor;
use crate::logbuffer::RawLogFactory;
use crate::protocol::command::{
    self, ErrorResponse, ImageReady, KeepaliveMessage, OperationSucceeded, PublicationMessage,
    PublicationReady, SubscriptionMessage,
};
use crate::rt::spsc::SpscQueue;
use crate::rt::{epoch_ms, Agent, NanoClock};
use crate::transport::{ReceiveChannelEndpoint, SendChannelEndpoint};

const TIMER_INTERVAL_NS: i64 = 1_000_000;
const COMMANDS_PER_TICK: usize = 10;

/// Driver-to-client response transmitter.
pub struct ClientProxy {
    transmitter: BroadcastTransmitter,
    scratch: Vec<u8>,
}

impl ClientProxy {
    pub fn new(transmitter: BroadcastTransmitter) -> Self {
        Self {
            transmitter,
            scratch: vec![0u8; 4096],
        }
    }

    fn on_operation_succeeded(&mut self, correlation_id: i64) {
        let message = OperationSucceeded { correlation_id };
        let length = message
            .encode(&mut self.scratch)
            .expect("scratch sized for responses");
        self.transmitter
            .transmit(command::ON_OPERATION_SUCCESS, &self.scratch[..length]);
    }

    fn on_error(&mut self, offending_correlation_id: i64, error: &Error) {
        let response = ErrorResponse {
            offending_correlation_id,
            error_code: error.error_code(),
            error_message: error.to_string(),
        };
        let length = response
            .encode(&mut self.scratch)
            .expect("scratch sized for responses");
        self.transmitter
            .transmit(command::ON_ERROR, &self.scratch[..length]);
    }

    fn on_new_publication(&mut self, response: &PublicationReady) {
        let length = response
            .encode(&mut self.scratch)
            .expect("scratch sized for responses");
        self.transmitter
            .transmit(command::ON_NEW_PUBLICATION, &self.scratch[..length]);
    }

    fn on_new_image(&mut self, response: &ImageReady) {
        let length = response
            .encode(&mut self.scratch)
            .expect("scratch sized for responses");
        self.transmitter
            .transmit(command::ON_NEW_IMAGE, &self.scratch[..length]);
    }
}

struct PublicationEntry {
    publication: Arc<NetworkPublication>,
    channel: String,
    client_id: i64,
    ref_count: i32,
    linger_deadline_ns: Option<i64>,
    last_consumer_position: i64,
    time_of_last_consumer_change_ns: i64,
}

struct ImageEntry {
    image: Arc<PublicationImage>,
    endpoint: Arc<ReceiveChannelEndpoint>,
    counter_ids: Vec<i32>,
}

struct ClientSession {
    client_id: i64,
    deadline_ns: i64,
}

struct SendEndpointEntry {
    endpoint: Arc<SendChannelEndpoint>,
    ref_count: usize,
}

struct RecvEndpointEntry {
    endpoint: Arc<ReceiveChannelEndpoint>,
    ref_count: usize,
}

pub struct DriverConductor {
    config: DriverConfig,
    clock: NanoClock,
    cnc: Arc<CncFile>,
    to_driver_ring: ManyToOneRingBuffer,
    client_proxy: ClientProxy,
    command_queue: Arc<SpscQueue<ConductorCmd>>,
    sender_proxy: SenderProxy,
    receiver_proxy: ReceiverProxy,
    counters_manager: CountersManager,
    system_counters: Arc<SystemCounters>,
    raw_log_factory: RawLogFactory,
    send_endpoints: HashMap<String, SendEndpointEntry>,
    recv_endpoints: HashMap<String, RecvEndpointEntry>,
    publications: Vec<PublicationEntry>,
    subscriptions: Vec<SubscriptionLink>,
    images: Vec<ImageEntry>,
    clients: Vec<ClientSession>,
    next_image_correlation_id: i64,
    timer_deadline_ns: i64,
}

impl DriverConductor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DriverConfig,
        clock: NanoClock,
        cnc: Arc<CncFile>,
        command_queue: Arc<SpscQueue<ConductorCmd>>,
        sender_proxy: SenderProxy,
        receiver_proxy: ReceiverProxy,
        counters_manager: CountersManager,
        system_counters: Arc<SystemCounters>,
        raw_log_factory: RawLogFactory,
    ) -> Self {
        let to_driver_ring = ManyToOneRingBuffer::new(cnc.to_driver_buffer());
        let client_proxy = ClientProxy::new(BroadcastTransmitter::new(cnc.to_clients_buffer()));

        Self {
            config,
            clock,
            cnc,
            to_driver_ring,
            client_proxy,
            command_queue,
            sender_proxy,
            receiver_proxy,
            counters_manager,
            system_counters,
            raw_log_factory,
            send_endpoints: HashMap::new(),
            recv_endpoints: HashMap::new(),
            publications: Vec::new(),
            subscriptions: Vec::new(),
            images: Vec::new(),
            clients: Vec::new(),
            next_image_correlation_id: 1,
            timer_deadline_ns: 0,
        }
    }

    /// A proxy other agents use to reach this conductor's queue.
    pub fn proxy(&self) -> DriverConductorProxy {
        DriverConductorProxy::new(self.command_queue.clone())
    }

    /// Handle onto a live publication for embedded producers.
    pub fn find_publication(
        &self,
        session_id: i32,
        stream_id: i32,
    ) -> Option<Arc<NetworkPublication>> {
        self.publications
            .iter()
            .find(|entry| {
                entry.publication.session_id() == session_id
                    && entry.publication.stream_id() == stream_id
            })
            .map(|entry| entry.publication.clone())
    }

    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    pub fn send_endpoint_count(&self) -> usize {
        self.send_endpoints.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Handle onto a live image (introspection and tests).
    pub fn find_image(&self, session_id: i32, stream_id: i32) -> Option<Arc<PublicationImage>> {
        self.images
            .iter()
            .find(|entry| {
                entry.image.session_id() == session_id && entry.image.stream_id() == stream_id
            })
            .map(|entry| entry.image.clone())
    }

    // ===== client commands =====

    fn on_client_command(&mut self, msg_type_id: i32, payload: &[u8], now_ns: i64) {
        let result = match msg_type_id {
            command::ADD_PUBLICATION => self.on_add_publication(payload, now_ns),
            command::REMOVE_PUBLICATION => self.on_remove_publication(payload, now_ns),
            command::ADD_SUBSCRIPTION => self.on_add_subscription(payload, now_ns),
            command::REMOVE_SUBSCRIPTION => self.on_remove_subscription(payload),
            command::CLIENT_KEEPALIVE => self.on_client_keepalive(payload, now_ns),
            other => {
                log::warn!("[Conductor] unknown client command: {:#x}", other);
                Ok(())
            }
        };

        if let Err((correlation_id, error)) = result.map_err(|e| (correlation_id_of(payload), e)) {
            log::debug!("[Conductor] command failed: {}", error);
            self.system_counters.errors.increment();
            self.client_proxy.on_error(correlation_id, &error);
        }
    }

    fn on_add_publication(&mut self, payload: &[u8], now_ns: i64) -> Result<()> {
        let message = PublicationMessage::decode(payload)?;
        self.keep_client_alive(message.client_id, now_ns);

        if message.stream_id == RESERVED_STREAM_ID {
            return Err(Error::InvalidChannel(format!(
                "stream_id 0 is reserved: {}",
                message.channel
            )));
        }

        let udp_channel = UdpChannel::parse(&message.channel)?;
        let canonical = udp_channel.canonical_form().to_string();

        let duplicate = self.publications.iter().any(|entry| {
            entry.channel == canonical
                && entry.publication.session_id() == message.session_id
                && entry.publication.stream_id() == message.stream_id
        });
        if duplicate {
            return Err(Error::PublicationStreamAlreadyExists {
                session_id: message.session_id,
                stream_id: message.stream_id,
            });
        }

        let is_multicast = udp_channel.is_multicast();
        let endpoint = match self.send_endpoints.get_mut(&canonical) {
            Some(entry) => {
                entry.ref_count += 1;
                entry.endpoint.clone()
            }
            None => {
                let endpoint = Arc::new(SendChannelEndpoint::new(
                    udp_channel,
                    &self.config,
                    self.system_counters.clone(),
                )?);
                self.send_endpoints.insert(
                    canonical.clone(),
                    SendEndpointEntry {
                        endpoint: endpoint.clone(),
                        ref_count: 1,
                    },
                );
                self.sender_proxy.register_send_endpoint(endpoint.clone());
                endpoint
            }
        };

        let registration_id = message.correlation_id;
        let initial_term_id = fastrand::i32(..);
        let raw_log = self
            .raw_log_factory
            .new_publication_log(registration_id, self.config.term_buffer_length)?;
        let log_file_name = raw_log.file_name();

        let sender_position_id = self
            .counters_manager
            .allocate(&format!("sender position: {}", registration_id));
        let sender_limit_id = self
            .counters_manager
            .allocate(&format!("sender limit: {}", registration_id));

        let flow_control: Box<dyn FlowControl> = if is_multicast {
            Box::new(MinMulticastFlowControl::new(
                initial_term_id,
                self.config.term_buffer_length,
                self.config.initial_window_length,
            ))
        } else {
            Box::new(UnicastFlowControl::new(
                initial_term_id,
                self.config.term_buffer_length,
                self.config.initial_window_length,
            ))
        };

        let retransmit_delay: Box<dyn FeedbackDelayGenerator> = if is_multicast {
            Box::new(OptimalMulticastDelayGenerator::new(
                NAK_MULTICAST_MAX_BACKOFF_NS as f64,
                NAK_MULTICAST_GROUP_SIZE,
            ))
        } else {
            Box::new(StaticDelayGenerator::new(RETRANSMIT_UNICAST_DELAY_NS))
        };
        let retransmit = RetransmitHandler::new(
            retransmit_delay,
            Box::new(StaticDelayGenerator::new(RETRANSMIT_LINGER_TIMEOUT_NS)),
            self.config.term_buffer_length,
            self.system_counters.nak_overruns,
        );

        let publication = NetworkPublication::new(
            PublicationParams {
                registration_id,
                session_id: message.session_id,
                stream_id: message.stream_id,
                initial_term_id,
                mtu_length: self.config.mtu_length,
            },
            raw_log,
            endpoint,
            flow_control,
            retransmit,
            self.counters_manager.position(sender_position_id),
            self.counters_manager.position(sender_limit_id),
            self.system_counters.clone(),
        );

        self.sender_proxy.new_publication(publication.clone());
        self.publications.push(PublicationEntry {
            publication,
            channel: canonical,
            client_id: message.client_id,
            ref_count: 1,
            linger_deadline_ns: None,
            last_consumer_position: 0,
            time_of_last_consumer_change_ns: now_ns,
        });

        self.client_proxy.on_new_publication(&PublicationReady {
            correlation_id: message.correlation_id,
            session_id: message.session_id,
            stream_id: message.stream_id,
            position_limit_counter_id: sender_limit_id,
            log_file_name,
        });

        log::info!(
            "[Conductor] publication added: session_id={} stream_id={} channel={}",
            message.session_id,
            message.stream_id,
            message.channel
        );

        Ok(())
    }

    fn on_remove_publication(&mut self, payload: &[u8], now_ns: i64) -> Result<()> {
        let message = PublicationMessage::decode(payload)?;
        self.keep_client_alive(message.client_id, now_ns);

        let udp_channel = UdpChannel::parse(&message.channel)?;
        let canonical = udp_channel.canonical_form().to_string();

        if !self.send_endpoints.contains_key(&canonical) {
            return Err(Error::InvalidChannel(message.channel));
        }

        let entry = self
            .publications
            .iter_mut()
            .find(|entry| {
                entry.channel == canonical
                    && entry.publication.session_id() == message.session_id
                    && entry.publication.stream_id() == message.stream_id
            })
            .ok_or(Error::PublicationStreamUnknown {
                session_id: message.session_id,
                stream_id: message.stream_id,
            })?;

        entry.ref_count -= 1;
        if entry.ref_count <= 0 && entry.linger_deadline_ns.is_none() {
            entry.publication.set_status(PUBLICATION_LINGER);
            entry.publication.end_of_stream();
            entry.linger_deadline_ns = Some(now_ns + self.config.publication_linger_timeout_ns);
        }

        self.client_proxy
            .on_operation_succeeded(message.correlation_id);

        Ok(())
    }

    fn on_add_subscription(&mut self, payload: &[u8], now_ns: i64) -> Result<()> {
        let message = SubscriptionMessage::decode(payload)?;
        self.keep_client_alive(message.client_id, now_ns);

        if message.stream_id == RESERVED_STREAM_ID {
            return Err(Error::InvalidChannel(format!(
                "stream_id 0 is reserved: {}",
                message.channel
            )));
        }

        let udp_channel = UdpChannel::parse(&message.channel)?;
        let canonical = udp_channel.canonical_form().to_string();

        let endpoint = match self.recv_endpoints.get_mut(&canonical) {
            Some(entry) => {
                entry.ref_count += 1;
                entry.endpoint.clone()
            }
            None => {
                let endpoint = Arc::new(ReceiveChannelEndpoint::new(
                    udp_channel,
                    &self.config,
                    self.system_counters.clone(),
                )?);
                self.recv_endpoints.insert(
                    canonical.clone(),
                    RecvEndpointEntry {
                        endpoint: endpoint.clone(),
                        ref_count: 1,
                    },
                );
                self.receiver_proxy.register_endpoint(endpoint.clone());
                endpoint
            }
        };

        self.receiver_proxy
            .add_subscription(endpoint.clone(), message.stream_id);
        self.subscriptions.push(SubscriptionLink {
            registration_id: message.correlation_id,
            client_id: message.client_id,
            stream_id: message.stream_id,
            channel: canonical,
            endpoint,
        });

        self.client_proxy
            .on_operation_succeeded(message.correlation_id);

        log::info!(
            "[Conductor] subscription added: stream_id={} channel={}",
            message.stream_id,
            message.channel
        );

        Ok(())
    }

    fn on_remove_subscription(&mut self, payload: &[u8]) -> Result<()> {
        let message = SubscriptionMessage::decode(payload)?;

        let index = self
            .subscriptions
            .iter()
            .position(|link| link.registration_id == message.registration_correlation_id)
            .ok_or_else(|| {
                Error::Generic(format!(
                    "unknown subscription: {}",
                    message.registration_correlation_id
                ))
            })?;

        let link = self.subscriptions.remove(index);
        self.receiver_proxy
            .remove_subscription(link.endpoint.clone(), link.stream_id);
        self.release_recv_endpoint(&link.channel);

        self.client_proxy
            .on_operation_succeeded(message.correlation_id);

        Ok(())
    }

    fn on_client_keepalive(&mut self, payload: &[u8], now_ns: i64) -> Result<()> {
        let message = KeepaliveMessage::decode(payload)?;
        self.system_counters.client_keepalives.increment();
        self.keep_client_alive(message.client_id, now_ns);

        Ok(())
    }

    fn keep_client_alive(&mut self, client_id: i64, now_ns: i64) {
        let deadline_ns = now_ns + self.config.client_liveness_timeout_ns;
        match self
            .clients
            .iter_mut()
            .find(|client| client.client_id == client_id)
        {
            Some(client) => client.deadline_ns = deadline_ns,
            None => self.clients.push(ClientSession {
                client_id,
                deadline_ns,
            }),
        }
    }

    fn release_recv_endpoint(&mut self, canonical: &str) {
        if let Some(entry) = self.recv_endpoints.get_mut(canonical) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                let entry = self.recv_endpoints.remove(canonical).expect("entry present");
                self.receiver_proxy.close_endpoint(entry.endpoint);
                log::debug!("[Conductor] receive endpoint closed: {}", canonical);
            }
        }
    }

    // ===== commands from the receiver =====

    fn on_create_publication_image(&mut self, request: CreateImageRequest) {
        if let Err(e) = descriptor::check_term_length(request.term_length) {
            log::warn!("[Conductor] rejected image: {}", e);
            self.system_counters.errors.increment();
            return;
        }

        let now_ns = self.clock.nano_time();
        let correlation_id = self.next_image_correlation_id;
        self.next_image_correlation_id += 1;

        let raw_log = match self
            .raw_log_factory
            .new_image_log(correlation_id, request.term_length)
        {
            Ok(raw_log) => raw_log,
            Err(e) => {
                log::error!("[Conductor] image log allocation failed: {}", e);
                self.system_counters.errors.increment();
                return;
            }
        };
        let log_file_name = raw_log.file_name();

        let hwm_id = self
            .counters_manager
            .allocate(&format!("receiver hwm: {}", correlation_id));
        let rebuild_id = self
            .counters_manager
            .allocate(&format!("receiver position: {}", correlation_id));
        let mut counter_ids = vec![hwm_id, rebuild_id];

        let canonical = request.endpoint.udp_channel().canonical_form().to_string();
        let mut subscriber_positions = Vec::new();
        for link in &self.subscriptions {
            if link.matches(&canonical, request.stream_id) {
                let id = self.counters_manager.allocate(&format!(
                    "subscriber position: {} {}",
                    link.registration_id, correlation_id
                ));
                counter_ids.push(id);
                subscriber_positions.push(self.counters_manager.position(id));
            }
        }

        let delay_generator: Box<dyn FeedbackDelayGenerator> =
            if request.endpoint.udp_channel().is_multicast() {
                Box::new(OptimalMulticastDelayGenerator::new(
                    NAK_MULTICAST_MAX_BACKOFF_NS as f64,
                    NAK_MULTICAST_GROUP_SIZE,
                ))
            } else {
                Box::new(StaticDelayGenerator::new(crate::config::NAK_UNICAST_DELAY_NS))
            };

        let image = PublicationImage::new(
            ImageParams {
                correlation_id,
                session_id: request.session_id,
                stream_id: request.stream_id,
                initial_term_id: request.initial_term_id,
                active_term_id: request.active_term_id,
                initial_term_offset: request.term_offset,
                initial_window_length: self.config.initial_window_length,
                status_message_timeout_ns: self.config.status_message_timeout_ns,
            },
            raw_log,
            request.control_address,
            request.source_address,
            self.counters_manager.position(rebuild_id),
            self.counters_manager.position(hwm_id),
            subscriber_positions,
            delay_generator,
            self.system_counters.clone(),
            now_ns,
        );

        self.receiver_proxy
            .new_image(request.endpoint.clone(), image.clone());

        let joining_position = image.rebuild_position_value();
        let subscriber_position_id = image.subscriber_position_ids().first().copied().unwrap_or(-1);
        self.client_proxy.on_new_image(&ImageReady {
            correlation_id,
            session_id: request.session_id,
            stream_id: request.stream_id,
            joining_position,
            subscriber_position_id,
            log_file_name,
            source_identity: request.source_address.to_string(),
        });

        self.images.push(ImageEntry {
            image,
            endpoint: request.endpoint,
            counter_ids,
        });

        log::info!(
            "[Conductor] image created: session_id={} stream_id={} from {}",
            request.session_id,
            request.stream_id,
            request.source_address
        );
    }

    // ===== timers =====

    fn on_timer_check(&mut self, now_ns: i64) {
        self.cnc.update_heartbeat(epoch_ms());
        self.check_clients(now_ns);
        self.check_publications(now_ns);
        self.check_images(now_ns);
    }

    fn check_clients(&mut self, now_ns: i64) {
        let expired: Vec<i64> = self
            .clients
            .iter()
            .filter(|client| now_ns > client.deadline_ns)
            .map(|client| client.client_id)
            .collect();
        if expired.is_empty() {
            return;
        }

        self.clients.retain(|client| now_ns <= client.deadline_ns);

        for client_id in expired {
            log::info!("[Conductor] client timed out: {}", client_id);

            for entry in &mut self.publications {
                if entry.client_id == client_id && entry.linger_deadline_ns.is_none() {
                    entry.ref_count = 0;
                    entry.publication.set_status(PUBLICATION_LINGER);
                    entry.publication.end_of_stream();
                    entry.linger_deadline_ns =
                        Some(now_ns + self.config.publication_linger_timeout_ns);
                }
            }

            let orphaned: Vec<usize> = self
                .subscriptions
                .iter()
                .enumerate()
                .filter(|(_, link)| link.client_id == client_id)
                .map(|(index, _)| index)
                .collect();
            for index in orphaned.into_iter().rev() {
                let link = self.subscriptions.remove(index);
                self.receiver_proxy
                    .remove_subscription(link.endpoint.clone(), link.stream_id);
                self.release_recv_endpoint(&link.channel);
            }
        }
    }

    fn check_publications(&mut self, now_ns: i64) {
        // Unblock stuck producers: a claimed-but-uncommitted frame holding
        // the sender position still for the unblock timeout gets padded over.
        for entry in &mut self.publications {
            let consumed = entry.publication.sender_position_value();
            if consumed != entry.last_consumer_position {
                entry.last_consumer_position = consumed;
                entry.time_of_last_consumer_change_ns = now_ns;
            } else if entry.publication.producer_position() > consumed
                && now_ns - entry.time_of_last_consumer_change_ns
                    > self.config.publication_unblock_timeout_ns
                && entry.publication.unblock_at_consumed_position()
            {
                entry.time_of_last_consumer_change_ns = now_ns;
            }
        }

        let mut removed: Vec<PublicationEntry> = Vec::new();
        let mut index = 0;
        while index < self.publications.len() {
            let expired = matches!(
                self.publications[index].linger_deadline_ns,
                Some(deadline) if now_ns >= deadline
            );
            if expired {
                removed.push(self.publications.remove(index));
            } else {
                index += 1;
            }
        }

        for entry in removed {
            self.sender_proxy.remove_publication(entry.publication.clone());
            self.counters_manager
                .free(entry.publication.sender_position_counter_id());
            self.counters_manager
                .free(entry.publication.sender_limit_counter_id());

            if let Some(endpoint_entry) = self.send_endpoints.get_mut(&entry.channel) {
                endpoint_entry.ref_count -= 1;
                if endpoint_entry.ref_count == 0 {
                    let endpoint_entry = self
                        .send_endpoints
                        .remove(&entry.channel)
                        .expect("entry present");
                    self.sender_proxy.close_send_endpoint(endpoint_entry.endpoint);
                    log::debug!("[Conductor] send endpoint closed: {}", entry.channel);
                }
            }

            log::info!(
                "[Conductor] publication removed: session_id={} stream_id={}",
                entry.publication.session_id(),
                entry.publication.stream_id()
            );
        }
    }

    fn check_images(&mut self, now_ns: i64) {
        for entry in &self.images {
            if entry.image.state() == IMAGE_ACTIVE
                && entry
                    .image
                    .is_liveness_expired(now_ns, self.config.image_liveness_timeout_ns)
            {
                entry.image.go_inactive(now_ns);
                self.receiver_proxy.remove_image(
                    entry.endpoint.clone(),
                    entry.image.session_id(),
                    entry.image.stream_id(),
                );
            }
        }

        let linger_ns = self.config.publication_linger_timeout_ns;
        let mut index = 0;
        while index < self.images.len() {
            let image = &self.images[index].image;
            let expired = matches!(image.state(), IMAGE_LINGER | IMAGE_INACTIVE)
                && now_ns - image.time_of_last_state_change_ns() >= linger_ns;
            if expired {
                let entry = self.images.remove(index);
                for id in entry.counter_ids {
                    self.counters_manager.free(id);
                }
                log::debug!(
                    "[Conductor] image removed: session_id={} stream_id={}",
                    entry.image.session_id(),
                    entry.image.stream_id()
                );
            } else {
                index += 1;
            }
        }
    }
}

fn correlation_id_of(payload: &[u8]) -> i64 {
    if payload.len() >= 8 {
        i64::from_le_bytes(payload[..8].try_into().expect("checked length"))
    } else {
        -1
    }
}

impl Agent for DriverConductor {
    fn do_work(&mut self) -> usize {
        let now_ns = self.clock.nano_time();
        let mut work_count = 0;

        let mut client_commands: Vec<(i32, Vec<u8>)> = Vec::new();
        work_count += self.to_driver_ring.read(
            |msg_type_id, payload| client_commands.push((msg_type_id, payload.to_vec())),
            COMMANDS_PER_TICK,
        );
        for (msg_type_id, payload) in client_commands {
            self.on_client_command(msg_type_id, &payload, now_ns);
        }

        let mut agent_commands = Vec::new();
        work_count += self.command_queue.drain(|cmd| agent_commands.push(cmd));
        for cmd in agent_commands {
            match cmd {
                ConductorCmd::CreatePublicationImage(request) => {
                    self.on_create_publication_image(request);
                }
            }
        }

        if now_ns >= self.timer_deadline_ns {
            self.on_timer_check(now_ns);
            self.timer_deadline_ns = now_ns + TIMER_INTERVAL_NS;
            work_count += 1;
        }

        work_count
    }

    fn role_name(&self) -> &'static str {
        "trellis-conductor"
    }

    fn on_close(&mut self) {
        for entry in self.publications.drain(..) {
            self.sender_proxy.remove_publication(entry.publication);
        }
        for link in self.subscriptions.drain(..) {
            self.receiver_proxy
                .remove_subscription(link.endpoint.clone(), link.stream_id);
        }
        self.images.clear();
        self.send_endpoints.clear();
        self.recv_endpoints.clear();
    }
}
