// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data packet dispatch by `(session_id, stream_id)`.
//!
//! DATA/PAD frames route to their image; the first SETUP for a subscribed
//! stream raises a create-image request to the conductor and marks the
//! session pending so duplicate SETUPs do not fan out duplicate requests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::cnc::SystemCounters;
use crate::driver::image::PublicationImage;
use crate::driver::proxy::{CreateImageRequest, DriverConductorProxy};
use crate::protocol::data::DataFrame;
use crate::protocol::setup::SetupFrame;
use crate::transport::ReceiveChannelEndpoint;

enum ImageEntry {
    /// SETUP seen, create-image request in flight with the conductor.
    PendingSetup,
    Tracked(Arc<PublicationImage>),
}

#[derive(Default)]
pub struct DataPacketDispatcher {
    sessions_by_stream: HashMap<i32, HashMap<i32, ImageEntry>>,
}

impl DataPacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&mut self, stream_id: i32) {
        self.sessions_by_stream.entry(stream_id).or_default();
    }

    pub fn remove_subscription(&mut self, stream_id: i32) {
        self.sessions_by_stream.remove(&stream_id);
    }

    pub fn has_subscription(&self, stream_id: i32) -> bool {
        self.sessions_by_stream.contains_key(&stream_id)
    }

    pub fn add_image(&mut self, image: Arc<PublicationImage>) {
        if let Some(sessions) = self.sessions_by_stream.get_mut(&image.stream_id()) {
            sessions.insert(image.session_id(), ImageEntry::Tracked(image));
        }
    }

    pub fn remove_image(&mut self, session_id: i32, stream_id: i32) {
        if let Some(sessions) = self.sessions_by_stream.get_mut(&stream_id) {
            sessions.remove(&session_id);
        }
    }

    pub fn image(&self, session_id: i32, stream_id: i32) -> Option<Arc<PublicationImage>> {
        match self.sessions_by_stream.get(&stream_id)?.get(&session_id)? {
            ImageEntry::Tracked(image) => Some(image.clone()),
            ImageEntry::PendingSetup => None,
        }
    }

    /// Route one DATA/PAD frame.
    pub fn on_data_packet(
        &mut self,
        frame: &[u8],
        now_ns: i64,
        counters: &SystemCounters,
    ) -> usize {
        let data = DataFrame::wrap(frame);
        let stream_id = data.stream_id();
        let session_id = data.session_id();

        match self.sessions_by_stream.get(&stream_id) {
            Some(sessions) => match sessions.get(&session_id) {
                Some(ImageEntry::Tracked(image)) => {
                    image.insert_packet(data.term_id(), data.term_offset(), frame, now_ns)
                }
                // Pending or unknown session: data before SETUP completes is
                // dropped; retransmission recovers it once the image exists.
                _ => 0,
            },
            None => {
                counters.invalid_packets.increment();
                0
            }
        }
    }

    /// Route a SETUP frame, raising a create-image request on first sight.
    pub fn on_setup(
        &mut self,
        setup: &SetupFrame<'_>,
        src: SocketAddr,
        endpoint: &Arc<ReceiveChannelEndpoint>,
        conductor_proxy: &DriverConductorProxy,
    ) {
        let stream_id = setup.stream_id();
        let session_id = setup.session_id();

        let sessions = match self.sessions_by_stream.get_mut(&stream_id) {
            Some(sessions) => sessions,
            None => return,
        };

        if sessions.contains_key(&session_id) {
            return;
        }

        sessions.insert(session_id, ImageEntry::PendingSetup);
        log::debug!(
            "[Dispatcher] SETUP for session_id={} stream_id={} from {}",
            session_id,
            stream_id,
            src
        );

        // Feedback goes to the group control address on multicast, back to
        // the source on unicast.
        let control_address = if endpoint.udp_channel().is_multicast() {
            endpoint.udp_channel().remote_control()
        } else {
            src
        };

        conductor_proxy.create_publication_image(CreateImageRequest {
            session_id,
            stream_id,
            initial_term_id: setup.initial_term_id(),
            active_term_id: setup.active_term_id(),
            term_offset: setup.term_offset(),
            term_length: setup.term_length() as usize,
            mtu_length: setup.mtu_length() as usize,
            control_address,
            source_address: src,
            endpoint: endpoint.clone(),
        });
    }
}
