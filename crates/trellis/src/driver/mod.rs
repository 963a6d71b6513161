// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The media driver: conductor, sender and receiver wired together.
//!
//! `MediaDriver::launch` validates the configuration, claims the driver
//! directory (refusing while another live driver owns it), maps the CnC
//! file, builds the command queues and proxies and spawns the agents
//! according to the threading mode.

pub mod conductor;
pub mod feedback;
pub mod flow_control;
pub mod image;
pub mod proxy;
pub mod publication;
pub mod receiver;
pub mod retransmit;
pub mod sender;
pub mod subscription;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;

use crate::cnc::{self, CncFile, CountersManager, SystemCounters};
use crate::config::{
    DriverConfig, ThreadingMode, CMD_QUEUE_CAPACITY, CONDUCTOR_BUFFER_LENGTH,
    COUNTER_LABELS_BUFFER_LENGTH, COUNTER_VALUES_BUFFER_LENGTH, DRIVER_TIMEOUT_MS,
    TO_CLIENTS_BUFFER_LENGTH,
};
use crate::error::{Error, Result};
use crate::logbuffer::RawLogFactory;
use crate::rt::spsc::SpscQueue;
use crate::rt::{AgentRunner, BackoffIdleStrategy, CompositeAgent, NanoClock};

use conductor::DriverConductor;
use proxy::{DriverConductorProxy, ReceiverProxy, SenderProxy};
use receiver::Receiver;
use sender::Sender;

pub struct MediaDriver {
    runners: Vec<AgentRunner>,
    cnc: Arc<CncFile>,
    dir: PathBuf,
}

impl MediaDriver {
    pub fn launch(config: DriverConfig) -> Result<MediaDriver> {
        config.validate()?;
        ensure_directory(&config)?;

        let cnc = Arc::new(CncFile::create(
            &config.dir,
            CONDUCTOR_BUFFER_LENGTH,
            TO_CLIENTS_BUFFER_LENGTH,
            COUNTER_LABELS_BUFFER_LENGTH,
            COUNTER_VALUES_BUFFER_LENGTH,
            config.client_liveness_timeout_ns,
        )?);

        let mut counters_manager =
            CountersManager::new(cnc.counter_labels_buffer(), cnc.counter_values_buffer());
        let system_counters = Arc::new(SystemCounters::new(&mut counters_manager));
        let raw_log_factory = RawLogFactory::new(&config.dir)?;
        let clock = NanoClock::new();

        let sender_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let receiver_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));
        let conductor_queue = Arc::new(SpscQueue::with_capacity(CMD_QUEUE_CAPACITY));

        let sender_proxy = SenderProxy::new(sender_queue.clone());
        let receiver_proxy = ReceiverProxy::new(receiver_queue.clone());
        let conductor_proxy = DriverConductorProxy::new(conductor_queue.clone());

        let sender = Sender::new(sender_queue, clock);
        let receiver = Receiver::new(receiver_queue, conductor_proxy, clock);
        let conductor = DriverConductor::new(
            config.clone(),
            clock,
            cnc.clone(),
            conductor_queue,
            sender_proxy,
            receiver_proxy,
            counters_manager,
            system_counters,
            raw_log_factory,
        );

        let runners = match config.threading_mode {
            ThreadingMode::Dedicated => vec![
                AgentRunner::start(Box::new(conductor), BackoffIdleStrategy::default())?,
                AgentRunner::start(Box::new(sender), BackoffIdleStrategy::default())?,
                AgentRunner::start(Box::new(receiver), BackoffIdleStrategy::default())?,
            ],
            ThreadingMode::SharedNetwork => vec![
                AgentRunner::start(Box::new(conductor), BackoffIdleStrategy::default())?,
                AgentRunner::start(
                    Box::new(CompositeAgent::new(
                        vec![Box::new(sender), Box::new(receiver)],
                        "trellis-network",
                    )),
                    BackoffIdleStrategy::default(),
                )?,
            ],
            ThreadingMode::Shared => vec![AgentRunner::start(
                Box::new(CompositeAgent::new(
                    vec![Box::new(conductor), Box::new(sender), Box::new(receiver)],
                    "trellis-driver",
                )),
                BackoffIdleStrategy::default(),
            )?],
        };

        log::info!(
            "[MediaDriver] started in {} ({:?})",
            config.dir.display(),
            config.threading_mode
        );

        Ok(MediaDriver {
            runners,
            cnc,
            dir: config.dir,
        })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub fn cnc(&self) -> &Arc<CncFile> {
        &self.cnc
    }

    /// Stop all agents and release the directory.
    pub fn close(&mut self) {
        for runner in &mut self.runners {
            runner.close();
        }
        self.runners.clear();
        log::info!("[MediaDriver] closed");
    }
}

impl Drop for MediaDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn ensure_directory(config: &DriverConfig) -> Result<()> {
    if config.dir.exists() {
        if !config.dir_delete_on_start && cnc::is_driver_active(&config.dir, DRIVER_TIMEOUT_MS) {
            return Err(Error::ActiveDriver(config.dir.display().to_string()));
        }
        std::fs::remove_dir_all(&config.dir)?;
    }
    std::fs::create_dir_all(&config.dir)?;

    Ok(())
}
