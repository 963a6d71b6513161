// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Feedback delay generation for NAKs and retransmit lingering.
//!
//! Unicast uses a constant delay. Multicast draws from the Optimal Multicast
//! Feedback distribution (RFC 5401) so that receivers sharing a group spread
//! their NAKs and suppress each other:
//!
//! ```text
//! lambda = ln(group_size) + 1
//! x      = uniform(0, lambda / max_backoff) + lambda / (max_backoff * (e^lambda - 1))
//! delay  = (max_backoff / lambda) * ln(x * (e^lambda - 1) * (max_backoff / lambda))
//! ```

pub trait FeedbackDelayGenerator: Send {
    /// Next delay in nanoseconds; zero means act immediately.
    fn generate_delay_ns(&mut self) -> i64;
}

/// Constant delay (unicast NAKs, retransmit linger).
pub struct StaticDelayGenerator {
    delay_ns: i64,
}

impl StaticDelayGenerator {
    pub fn new(delay_ns: i64) -> Self {
        Self { delay_ns }
    }
}

impl FeedbackDelayGenerator for StaticDelayGenerator {
    fn generate_delay_ns(&mut self) -> i64 {
        self.delay_ns
    }
}

/// RFC 5401 optimal multicast feedback delay.
///
/// The distribution constants are precomputed from the max backoff and the
/// group size estimate; only the uniform draw happens per delay.
pub struct OptimalMulticastDelayGenerator {
    rand_max: f64,
    base_x: f64,
    constant_t: f64,
    factor_t: f64,
}

impl OptimalMulticastDelayGenerator {
    /// `max_backoff_ns` bounds the delay interval; `group_size` is the
    /// estimated receiver count (a configured constant).
    pub fn new(max_backoff_ns: f64, group_size: f64) -> Self {
        let lambda = group_size.ln() + 1.0;

        Self {
            rand_max: lambda / max_backoff_ns,
            base_x: lambda / (max_backoff_ns * (lambda.exp() - 1.0)),
            constant_t: max_backoff_ns / lambda,
            factor_t: (lambda.exp() - 1.0) * (max_backoff_ns / lambda),
        }
    }

    fn generate(&self) -> f64 {
        let x = fastrand::f64() * self.rand_max + self.base_x;
        self.constant_t * (x * self.factor_t).ln()
    }
}

impl FeedbackDelayGenerator for OptimalMulticastDelayGenerator {
    fn generate_delay_ns(&mut self) -> i64 {
        self.generate().max(0.0) as i64
    }
}
