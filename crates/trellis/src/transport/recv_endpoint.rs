// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive channel endpoint.
//!
//! Owns the datagram socket for one inbound channel. DATA/PAD frames go to
//! the data packet dispatcher; SETUP raises a create-image request to the
//! conductor. The receiver also emits SM and NAK frames from this socket.
//! Endpoints are reference-counted per subscribed stream by the conductor
//! and closed when the last subscription on the channel leaves.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{new_datagram_socket, send_datagram, DataPacketDispatcher, RECEIVE_BUFFER_LENGTH};
use crate::channel::UdpChannel;
use crate::cnc::SystemCounters;
use crate::config::{DriverConfig, RECEIVE_BATCH_SIZE};
use crate::driver::proxy::DriverConductorProxy;
use crate::error::Result;
use crate::protocol::{self, setup::SetupFrame};

pub struct ReceiveChannelEndpoint {
    udp_channel: UdpChannel,
    socket: UdpSocket,
    dispatcher: Mutex<DataPacketDispatcher>,
    counters: Arc<SystemCounters>,
}

impl ReceiveChannelEndpoint {
    pub fn new(
        udp_channel: UdpChannel,
        config: &DriverConfig,
        counters: Arc<SystemCounters>,
    ) -> Result<Self> {
        let socket = if udp_channel.is_multicast() {
            let group = udp_channel.remote_data();
            let bind_addr: SocketAddr = match group.ip() {
                IpAddr::V4(_) => {
                    SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), group.port())
                }
                IpAddr::V6(_) => {
                    SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), group.port())
                }
            };
            let socket = new_datagram_socket(
                bind_addr,
                config.socket_sndbuf_length,
                config.socket_rcvbuf_length,
                true,
            )?;

            if let (IpAddr::V4(group), Some(IpAddr::V4(iface))) =
                (group.ip(), udp_channel.local_interface())
            {
                socket.join_multicast_v4(&group, &iface)?;
                socket.set_multicast_loop_v4(true)?;
            }

            socket
        } else {
            // The channel's endpoint address is where publishers send to.
            new_datagram_socket(
                udp_channel.remote_data(),
                config.socket_sndbuf_length,
                config.socket_rcvbuf_length,
                false,
            )?
        };

        log::debug!(
            "[RecvEndpoint] {} bound on {:?}",
            udp_channel.canonical_form(),
            socket.local_addr()
        );

        Ok(Self {
            udp_channel,
            socket,
            dispatcher: Mutex::new(DataPacketDispatcher::new()),
            counters,
        })
    }

    pub fn udp_channel(&self) -> &UdpChannel {
        &self.udp_channel
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Emit an SM or NAK toward a publisher's control address.
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
                log::warn!("[RecvEndpoint] send to {} failed: {}", addr, e);
                0
            }
        }
    }

    pub fn dispatcher(&self) -> &Mutex<DataPacketDispatcher> {
        &self.dispatcher
    }

    /// Drain inbound frames; called from the receiver agent.
    pub fn poll(
        self: &Arc<Self>,
        conductor_proxy: &DriverConductorProxy,
        now_ns: i64,
    ) -> usize {
        let mut buf = [0u8; RECEIVE_BUFFER_LENGTH];
        let mut work_count = 0;

        for _ in 0..RECEIVE_BATCH_SIZE {
            let (length, src) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.counters.errors.increment();
                    log::warn!("[RecvEndpoint] recv failed: {}", e);
                    break;
                }
            };

            self.on_frame(&buf[..length], src, conductor_proxy, now_ns);
            work_count += 1;
        }

        work_count
    }

    fn on_frame(
        self: &Arc<Self>,
        frame: &[u8],
        src: SocketAddr,
        conductor_proxy: &DriverConductorProxy,
        now_ns: i64,
    ) {
        let frame_type = match protocol::check_frame(frame) {
            Ok(frame_type) => frame_type,
            Err(e) => {
                self.counters.invalid_packets.increment();
                log::debug!("[RecvEndpoint] dropped frame from {}: {}", src, e);
                return;
            }
        };

        self.counters.bytes_received.add(frame.len() as i64);

        match frame_type {
            protocol::HDR_TYPE_DATA | protocol::HDR_TYPE_PAD => {
                self.dispatcher
                    .lock()
                    .on_data_packet(frame, now_ns, &self.counters);
            }
            protocol::HDR_TYPE_SETUP => {
                let setup = SetupFrame::wrap(frame);
                self.dispatcher
                    .lock()
                    .on_setup(&setup, src, self, conductor_proxy);
            }
            _ => {
                // SM/NAK arriving on a receive channel is misdirected.
                self.counters.invalid_packets.increment();
            }
        }
    }
}
