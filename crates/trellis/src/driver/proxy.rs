// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-agent command proxies.
//!
//! Lifecycle traffic between the conductor, sender and receiver rides SPSC
//! queues; proxies are the typed producer ends. Offers spin briefly on a
//! full queue (capacity is sized so this only happens under gross overload).
//! The threading mode decides which thread drains a queue, not whether the
//! queue exists.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::driver::image::PublicationImage;
use crate::driver::publication::NetworkPublication;
use crate::rt::spsc::SpscQueue;
use crate::transport::{ReceiveChannelEndpoint, SendChannelEndpoint};

pub enum SenderCmd {
    RegisterSendEndpoint(Arc<SendChannelEndpoint>),
    CloseSendEndpoint(Arc<SendChannelEndpoint>),
    NewPublication(Arc<NetworkPublication>),
    RemovePublication(Arc<NetworkPublication>),
}

pub enum ReceiverCmd {
    RegisterEndpoint(Arc<ReceiveChannelEndpoint>),
    CloseEndpoint(Arc<ReceiveChannelEndpoint>),
    AddSubscription {
        endpoint: Arc<ReceiveChannelEndpoint>,
        stream_id: i32,
    },
    RemoveSubscription {
        endpoint: Arc<ReceiveChannelEndpoint>,
        stream_id: i32,
    },
    NewImage {
        endpoint: Arc<ReceiveChannelEndpoint>,
        image: Arc<PublicationImage>,
    },
    RemoveImage {
        endpoint: Arc<ReceiveChannelEndpoint>,
        session_id: i32,
        stream_id: i32,
    },
}

/// SETUP parameters the receiver forwards so the conductor can build an
/// image.
pub struct CreateImageRequest {
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub active_term_id: i32,
    pub term_offset: i32,
    pub term_length: usize,
    pub mtu_length: usize,
    pub control_address: SocketAddr,
    pub source_address: SocketAddr,
    pub endpoint: Arc<ReceiveChannelEndpoint>,
}

pub enum ConductorCmd {
    CreatePublicationImage(CreateImageRequest),
}

fn offer_with_retry<T>(queue: &SpscQueue<T>, mut cmd: T, queue_name: &str) {
    let mut attempts = 0u32;
    loop {
        match queue.offer(cmd) {
            Ok(()) => return,
            Err(returned) => {
                cmd = returned;
                attempts += 1;
                if attempts % 1000 == 0 {
                    log::warn!("[Proxy] {} queue full, retrying", queue_name);
                }
                std::thread::yield_now();
            }
        }
    }
}

#[derive(Clone)]
pub struct SenderProxy {
    queue: Arc<SpscQueue<SenderCmd>>,
}

impl SenderProxy {
    pub fn new(queue: Arc<SpscQueue<SenderCmd>>) -> Self {
        Self { queue }
    }

    pub fn register_send_endpoint(&self, endpoint: Arc<SendChannelEndpoint>) {
        offer_with_retry(&self.queue, SenderCmd::RegisterSendEndpoint(endpoint), "sender");
    }

    pub fn close_send_endpoint(&self, endpoint: Arc<SendChannelEndpoint>) {
        offer_with_retry(&self.queue, SenderCmd::CloseSendEndpoint(endpoint), "sender");
    }

    pub fn new_publication(&self, publication: Arc<NetworkPublication>) {
        offer_with_retry(&self.queue, SenderCmd::NewPublication(publication), "sender");
    }

    pub fn remove_publication(&self, publication: Arc<NetworkPublication>) {
        offer_with_retry(&self.queue, SenderCmd::RemovePublication(publication), "sender");
    }
}

#[derive(Clone)]
pub struct ReceiverProxy {
    queue: Arc<SpscQueue<ReceiverCmd>>,
}

impl ReceiverProxy {
    pub fn new(queue: Arc<SpscQueue<ReceiverCmd>>) -> Self {
        Self { queue }
    }

    pub fn register_endpoint(&self, endpoint: Arc<ReceiveChannelEndpoint>) {
        offer_with_retry(&self.queue, ReceiverCmd::RegisterEndpoint(endpoint), "receiver");
    }

    pub fn close_endpoint(&self, endpoint: Arc<ReceiveChannelEndpoint>) {
        offer_with_retry(&self.queue, ReceiverCmd::CloseEndpoint(endpoint), "receiver");
    }

    pub fn add_subscription(&self, endpoint: Arc<ReceiveChannelEndpoint>, stream_id: i32) {
        offer_with_retry(
            &self.queue,
            ReceiverCmd::AddSubscription { endpoint, stream_id },
            "receiver",
        );
    }

    pub fn remove_subscription(&self, endpoint: Arc<ReceiveChannelEndpoint>, stream_id: i32) {
        offer_with_retry(
            &self.queue,
            ReceiverCmd::RemoveSubscription { endpoint, stream_id },
            "receiver",
        );
    }

    pub fn new_image(&self, endpoint: Arc<ReceiveChannelEndpoint>, image: Arc<PublicationImage>) {
        offer_with_retry(&self.queue, ReceiverCmd::NewImage { endpoint, image }, "receiver");
    }

    pub fn remove_image(
        &self,
        endpoint: Arc<ReceiveChannelEndpoint>,
        session_id: i32,
        stream_id: i32,
    ) {
        offer_with_retry(
            &self.queue,
            ReceiverCmd::RemoveImage {
                endpoint,
                session_id,
                stream_id,
            },
            "receiver",
        );
    }
}

#[derive(Clone)]
pub struct DriverConductorProxy {
    queue: Arc<SpscQueue<ConductorCmd>>,
}

impl DriverConductorProxy {
    pub fn new(queue: Arc<SpscQueue<ConductorCmd>>) -> Self {
        Self { queue }
    }

    pub fn create_publication_image(&self, request: CreateImageRequest) {
        offer_with_retry(
            &self.queue,
            ConductorCmd::CreatePublicationImage(request),
            "conductor",
        );
    }
}
