// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The sender agent.
//!
//! One tick: drain the sender command queue, poll every send endpoint for
//! inbound SM/NAK frames, then give each publication a chance to SETUP,
//! transmit, heartbeat and retransmit.

use std::sync::Arc;

use super::proxy::SenderCmd;
use super::publication::NetworkPublication;
use crate::rt::spsc::SpscQueue;
use crate::rt::{Agent, NanoClock};
use crate::transport::SendChannelEndpoint;

pub struct Sender {
    command_queue: Arc<SpscQueue<SenderCmd>>,
    endpoints: Vec<Arc<SendChannelEndpoint>>,
    publications: Vec<Arc<NetworkPublication>>,
    clock: NanoClock,
}

impl Sender {
    pub fn new(command_queue: Arc<SpscQueue<SenderCmd>>, clock: NanoClock) -> Self {
        Self {
            command_queue,
            endpoints: Vec::new(),
            publications: Vec::new(),
            clock,
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut commands = Vec::new();
        let drained = self.command_queue.drain(|cmd| commands.push(cmd));

        for cmd in commands {
            match cmd {
                SenderCmd::RegisterSendEndpoint(endpoint) => {
                    self.endpoints.push(endpoint);
                }
                SenderCmd::CloseSendEndpoint(endpoint) => {
                    self.endpoints
                        .retain(|candidate| !Arc::ptr_eq(candidate, &endpoint));
                }
                SenderCmd::NewPublication(publication) => {
                    publication.endpoint().register_publication(publication.clone());
                    self.publications.push(publication);
                }
                SenderCmd::RemovePublication(publication) => {
                    publication
                        .endpoint()
                        .unregister_publication(publication.session_id(), publication.stream_id());
                    self.publications
                        .retain(|candidate| !Arc::ptr_eq(candidate, &publication));
                }
            }
        }

        drained
    }
}

impl Agent for Sender {
    fn do_work(&mut self) -> usize {
        let mut work_count = self.drain_commands();
        let now_ns = self.clock.nano_time();

        for endpoint in &self.endpoints {
            work_count += endpoint.poll_control_frames(now_ns);
        }

        for publication in &self.publications {
            work_count += publication.send(now_ns);
        }

        work_count
    }

    fn role_name(&self) -> &'static str {
        "trellis-sender"
    }

    fn on_close(&mut self) {
        self.publications.clear();
        self.endpoints.clear();
    }
}
