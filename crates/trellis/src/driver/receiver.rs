// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The receiver agent.
//!
//! One tick: drain the receiver command queue, poll every receive endpoint
//! (dispatching DATA to images and SETUP to the conductor), then drive each
//! image's rebuild, gap NAKing and status messages.

use std::sync::Arc;

use super::image::{PublicationImage, IMAGE_LINGER};
use super::proxy::{DriverConductorProxy, ReceiverCmd};
use crate::rt::spsc::SpscQueue;
use crate::rt::{Agent, NanoClock};
use crate::transport::ReceiveChannelEndpoint;

struct TrackedImage {
    image: Arc<PublicationImage>,
    endpoint: Arc<ReceiveChannelEndpoint>,
}

pub struct Receiver {
    command_queue: Arc<SpscQueue<ReceiverCmd>>,
    conductor_proxy: DriverConductorProxy,
    endpoints: Vec<Arc<ReceiveChannelEndpoint>>,
    images: Vec<TrackedImage>,
    clock: NanoClock,
}

impl Receiver {
    pub fn new(
        command_queue: Arc<SpscQueue<ReceiverCmd>>,
        conductor_proxy: DriverConductorProxy,
        clock: NanoClock,
    ) -> Self {
        Self {
            command_queue,
            conductor_proxy,
            endpoints: Vec::new(),
            images: Vec::new(),
            clock,
        }
    }

    fn drain_commands(&mut self, now_ns: i64) -> usize {
        let mut commands = Vec::new();
        let drained = self.command_queue.drain(|cmd| commands.push(cmd));

        for cmd in commands {
            match cmd {
                ReceiverCmd::RegisterEndpoint(endpoint) => {
                    self.endpoints.push(endpoint);
                }
                ReceiverCmd::CloseEndpoint(endpoint) => {
                    self.images
                        .retain(|tracked| !Arc::ptr_eq(&tracked.endpoint, &endpoint));
                    self.endpoints
                        .retain(|candidate| !Arc::ptr_eq(candidate, &endpoint));
                }
                ReceiverCmd::AddSubscription { endpoint, stream_id } => {
                    endpoint.dispatcher().lock().add_subscription(stream_id);
                }
                ReceiverCmd::RemoveSubscription { endpoint, stream_id } => {
                    endpoint.dispatcher().lock().remove_subscription(stream_id);
                    self.images.retain(|tracked| {
                        !(Arc::ptr_eq(&tracked.endpoint, &endpoint)
                            && tracked.image.stream_id() == stream_id)
                    });
                }
                ReceiverCmd::NewImage { endpoint, image } => {
                    endpoint.dispatcher().lock().add_image(image.clone());
                    self.images.push(TrackedImage { image, endpoint });
                }
                ReceiverCmd::RemoveImage {
                    endpoint,
                    session_id,
                    stream_id,
                } => {
                    endpoint
                        .dispatcher()
                        .lock()
                        .remove_image(session_id, stream_id);
                    self.images.retain(|tracked| {
                        let matches = Arc::ptr_eq(&tracked.endpoint, &endpoint)
                            && tracked.image.session_id() == session_id
                            && tracked.image.stream_id() == stream_id;
                        if matches {
                            tracked.image.go_linger(now_ns);
                        }
                        !matches
                    });
                }
            }
        }

        drained
    }
}

impl Agent for Receiver {
    fn do_work(&mut self) -> usize {
        let now_ns = self.clock.nano_time();
        let mut work_count = self.drain_commands(now_ns);

        for endpoint in &self.endpoints {
            work_count += endpoint.poll(&self.conductor_proxy, now_ns);
        }

        for tracked in &self.images {
            if tracked.image.state() == IMAGE_LINGER {
                continue;
            }
            work_count += tracked
                .image
                .rebuild_and_scan_for_gaps(&tracked.endpoint, now_ns);
            work_count += tracked
                .image
                .send_pending_status_message(&tracked.endpoint, now_ns);
        }

        work_count
    }

    fn role_name(&self) -> &'static str {
        "trellis-receiver"
    }

    fn on_close(&mut self) {
        self.images.clear();
        self.endpoints.clear();
    }
}
