// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Send channel endpoint.
//!
//! Owns the datagram socket for one outbound channel. DATA, SETUP and
//! retransmissions go out through it; inbound SM and NAK frames are polled
//! by the sender agent and dispatched to the owning publication by
//! `(session_id, stream_id)`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{new_datagram_socket, send_datagram, RECEIVE_BUFFER_LENGTH};
use crate::channel::UdpChannel;
use crate::cnc::SystemCounters;
use crate::config::{DriverConfig, RECEIVE_BATCH_SIZE};
use crate::driver::flow_control::StatusMessage;
use crate::driver::publication::NetworkPublication;
use crate::error::Result;
use crate::protocol::{self, nak::NakFrame, status::StatusMessageFrame};

pub struct SendChannelEndpoint {
    udp_channel: UdpChannel,
    socket: UdpSocket,
    publications: Mutex<HashMap<(i32, i32), Arc<NetworkPublication>>>,
    counters: Arc<SystemCounters>,
}

impl SendChannelEndpoint {
    pub fn new(
        udp_channel: UdpChannel,
        config: &DriverConfig,
        counters: Arc<SystemCounters>,
    ) -> Result<Self> {
        let socket = if udp_channel.is_multicast() {
            // Bind the control port so receiver feedback on the control group
            // reaches us; data goes out on the same socket.
            let control = udp_channel.remote_control();
            let bind_addr: SocketAddr = match control.ip() {
                IpAddr::V4(_) => {
                    SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), control.port())
                }
                IpAddr::V6(_) => {
                    SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), control.port())
                }
            };
            let socket = new_datagram_socket(
                bind_addr,
                config.socket_sndbuf_length,
                config.socket_rcvbuf_length,
                true,
            )?;

            if let (IpAddr::V4(group), Some(IpAddr::V4(iface))) =
                (control.ip(), udp_channel.local_interface())
            {
                socket.join_multicast_v4(&group, &iface)?;
                socket.set_multicast_loop_v4(true)?;
                let ttl = udp_channel.ttl();
                if ttl > 0 {
                    socket.set_multicast_ttl_v4(ttl as u32)?;
                }
                // Route outbound group traffic through the selected interface.
                socket2_multicast_if(&socket, iface)?;
            }

            socket
        } else {
            new_datagram_socket(
                udp_channel.local_control(),
                config.socket_sndbuf_length,
                config.socket_rcvbuf_length,
                false,
            )?
        };

        log::debug!(
            "[SendEndpoint] {} bound on {:?}",
            udp_channel.canonical_form(),
            socket.local_addr()
        );

        Ok(Self {
            udp_channel,
            socket,
            publications: Mutex::new(HashMap::new()),
            counters,
        })
    }

    pub fn udp_channel(&self) -> &UdpChannel {
        &self.udp_channel
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Non-blocking send to an explicit destination; 0 means retry next tick.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> usize {
        match send_datagram(&self.socket, buf, addr) {
            Ok(sent) => {
                if sent > 0 && sent < buf.len() {
                    self.counters.short_sends.increment();
                }
                sent
            }
            Err(e) => {
                self.counters.errors.increment();
                log::warn!("[SendEndpoint] send to {} failed: {}", addr, e);
                0
            }
        }
    }

    /// Send to the channel's data address.
    pub fn default_send(&self, buf: &[u8]) -> usize {
        self.send_to(buf, self.udp_channel.remote_data())
    }

    // ===== publication dispatch (conductor registers, sender polls) =====

    pub fn register_publication(&self, publication: Arc<NetworkPublication>) {
        let key = (publication.session_id(), publication.stream_id());
        self.publications.lock().insert(key, publication);
    }

    pub fn unregister_publication(&self, session_id: i32, stream_id: i32) {
        self.publications.lock().remove(&(session_id, stream_id));
    }

    pub fn publication_count(&self) -> usize {
        self.publications.lock().len()
    }

    /// Drain inbound SM/NAK frames; called from the sender agent.
    pub fn poll_control_frames(&self, now_ns: i64) -> usize {
        let mut buf = [0u8; RECEIVE_BUFFER_LENGTH];
        let mut work_count = 0;

        for _ in 0..RECEIVE_BATCH_SIZE {
            let (length, src) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.counters.errors.increment();
                    log::warn!("[SendEndpoint] recv failed: {}", e);
                    break;
                }
            };

            self.on_control_frame(&buf[..length], src, now_ns);
            work_count += 1;
        }

        work_count
    }

    fn on_control_frame(&self, frame: &[u8], src: SocketAddr, now_ns: i64) {
        let frame_type = match protocol::check_frame(frame) {
            Ok(frame_type) => frame_type,
            Err(e) => {
                self.counters.invalid_packets.increment();
                log::debug!("[SendEndpoint] dropped frame from {}: {}", src, e);
                return;
            }
        };

        match frame_type {
            protocol::HDR_TYPE_SM => {
                let sm = StatusMessageFrame::wrap(frame);
                let key = (sm.session_id(), sm.stream_id());
                if let Some(publication) = self.publications.lock().get(&key).cloned() {
                    self.counters.status_messages_received.increment();
                    publication.on_status_message(
                        &StatusMessage {
                            consumption_term_id: sm.consumption_term_id(),
                            consumption_term_offset: sm.consumption_term_offset(),
                            receiver_window: sm.receiver_window(),
                            receiver_id: sm.receiver_id(),
                        },
                        sm.is_send_setup(),
                        src,
                        now_ns,
                    );
                }
            }
            protocol::HDR_TYPE_NAK => {
                let nak = NakFrame::wrap(frame);
                let key = (nak.session_id(), nak.stream_id());
                if let Some(publication) = self.publications.lock().get(&key).cloned() {
                    self.counters.naks_received.increment();
                    publication.on_nak(nak.term_id(), nak.term_offset(), nak.length(), now_ns);
                }
            }
            _ => {
                // DATA/SETUP on a send channel is someone else's traffic.
                self.counters.invalid_packets.increment();
            }
        }
    }
}

fn socket2_multicast_if(socket: &UdpSocket, iface: std::net::Ipv4Addr) -> Result<()> {
    socket2::SockRef::from(socket)
        .set_multicast_if_v4(&iface)
        .map_err(crate::error::Error::Io)
}
