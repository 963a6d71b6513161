// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative agents and their runners.
//!
//! Each driver agent exposes a `do_work` tick returning a work count. A
//! runner drives the agent on a dedicated thread, idling with a backoff
//! strategy when no work was done. The composite agent coalesces agents onto
//! one thread for the shared threading modes; suspension only ever happens at
//! tick boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One cooperative driver agent.
pub trait Agent: Send {
    /// Perform one tick of work; the return value feeds the idle strategy.
    fn do_work(&mut self) -> usize;

    /// Thread name and log tag.
    fn role_name(&self) -> &'static str;

    /// Called once on the agent thread after the final tick.
    fn on_close(&mut self) {}
}

/// Busy-spin, then yield, then park with doubling pause.
///
/// Any tick that reports work resets the strategy to spinning.
pub struct BackoffIdleStrategy {
    max_spins: u32,
    max_yields: u32,
    min_park: Duration,
    max_park: Duration,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl BackoffIdleStrategy {
    pub fn new(max_spins: u32, max_yields: u32, min_park: Duration, max_park: Duration) -> Self {
        Self {
            max_spins,
            max_yields,
            min_park,
            max_park,
            spins: 0,
            yields: 0,
            park: min_park,
        }
    }

    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            thread::yield_now();
        } else {
            thread::sleep(self.park);
            self.park = (self.park * 2).min(self.max_park);
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = self.min_park;
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(100, 100, Duration::from_micros(1), Duration::from_millis(1))
    }
}

/// Runs an agent on its own thread until closed.
pub struct AgentRunner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    role_name: &'static str,
}

impl AgentRunner {
    pub fn start(mut agent: Box<dyn Agent>, mut idle: BackoffIdleStrategy) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_flag = running.clone();
        let role_name = agent.role_name();

        let handle = thread::Builder::new()
            .name(role_name.to_string())
            .spawn(move || {
                log::debug!("[{}] agent started", agent.role_name());
                while thread_flag.load(Ordering::Acquire) {
                    let work = agent.do_work();
                    idle.idle(work);
                }
                agent.on_close();
                log::debug!("[{}] agent closed", agent.role_name());
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
            role_name,
        })
    }

    /// Signal shutdown and join the agent thread.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("[{}] agent thread panicked", self.role_name);
            }
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.close();
    }
}

/// Coalesces several agents onto one thread (shared threading modes).
pub struct CompositeAgent {
    agents: Vec<Box<dyn Agent>>,
    role_name: &'static str,
}

impl CompositeAgent {
    pub fn new(agents: Vec<Box<dyn Agent>>, role_name: &'static str) -> Self {
        Self { agents, role_name }
    }
}

impl Agent for CompositeAgent {
    fn do_work(&mut self) -> usize {
        self.agents.iter_mut().map(|a| a.do_work()).sum()
    }

    fn role_name(&self) -> &'static str {
        self.role_name
    }

    fn on_close(&mut self) {
        for agent in &mut self.agents {
            agent.on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAgent {
        ticks: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Agent for CountingAgent {
        fn do_work(&mut self) -> usize {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            1
        }

        fn role_name(&self) -> &'static str {
            "counting"
        }

        fn on_close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[test]
    fn test_runner_drives_and_closes() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let agent = CountingAgent {
            ticks: ticks.clone(),
            closed: closed.clone(),
        };

        let mut runner =
            AgentRunner::start(Box::new(agent), BackoffIdleStrategy::default()).unwrap();

        while ticks.load(Ordering::Relaxed) < 10 {
            thread::yield_now();
        }

        runner.close();
        assert!(closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_composite_sums_work() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let mut composite = CompositeAgent::new(
            vec![
                Box::new(CountingAgent {
                    ticks: ticks.clone(),
                    closed: closed.clone(),
                }),
                Box::new(CountingAgent {
                    ticks: ticks.clone(),
                    closed: closed.clone(),
                }),
            ],
            "composite",
        );

        assert_eq!(composite.do_work(), 2);
        assert_eq!(ticks.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_backoff_resets_on_work() {
        let mut idle = BackoffIdleStrategy::new(2, 2, Duration::from_micros(1), Duration::from_micros(8));
        for _ in 0..10 {
            idle.idle(0);
        }
        assert_eq!(idle.park, Duration::from_micros(8));

        idle.idle(1);
        assert_eq!(idle.park, Duration::from_micros(1));
        assert_eq!(idle.spins, 0);
    }
}
