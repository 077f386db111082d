//! Sampling decisions for detailed traces
//!
//! A [`Sampler`] runs once per top-level execution, before the trace chain is
//! built, so implementations must stay O(1) and do no I/O.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::args::Multiplex;

/// Decides whether one execution gets a detailed trace
pub trait Sampler: Send + Sync {
    fn should_sample(&self, multiplex: &Multiplex) -> bool;
}

impl<S: Sampler + ?Sized> Sampler for Arc<S> {
    fn should_sample(&self, multiplex: &Multiplex) -> bool {
        (**self).should_sample(multiplex)
    }
}

/// Samples every execution
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSample;

impl Sampler for AlwaysSample {
    fn should_sample(&self, _multiplex: &Multiplex) -> bool {
        true
    }
}

/// Samples nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSample;

impl Sampler for NeverSample {
    fn should_sample(&self, _multiplex: &Multiplex) -> bool {
        false
    }
}

/// Samples with a fixed probability
///
/// A rate of `0.0` never samples and `1.0` always does, without drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSampler {
    rate: f64,
}

impl RateSampler {
    /// Create a sampler; the rate is clamped into `0.0..=1.0` and NaN counts as zero
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Sampler for RateSampler {
    fn should_sample(&self, _multiplex: &Multiplex) -> bool {
        if self.rate <= 0.0 {
            false
        } else if self.rate >= 1.0 {
            true
        } else {
            unit_draw() < self.rate
        }
    }
}

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

thread_local! {
    // splitmix64 state, seeded once per thread
    static DRAW_STATE: Cell<u64> = Cell::new(draw_seed());
}

fn draw_seed() -> u64 {
    let mut word = [0u8; 8];
    match getrandom::getrandom(&mut word) {
        Ok(()) => u64::from_le_bytes(word),
        Err(e) => {
            tracing::debug!(error = %e, "OS randomness unavailable, seeding sampler from the clock");
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .map_or(GOLDEN_GAMMA, |ns| ns as u64)
        }
    }
}

fn next_draw() -> u64 {
    DRAW_STATE.with(|state| {
        let next = state.get().wrapping_add(GOLDEN_GAMMA);
        state.set(next);
        let mut z = next;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    })
}

// Uniform in [0, 1) from the top 53 bits of a draw
fn unit_draw() -> f64 {
    (next_draw() >> 11) as f64 / (1u64 << 53) as f64
}

/// Caller-supplied predicate over the execution's metadata
pub struct PredicateSampler {
    predicate: Box<dyn Fn(&Multiplex) -> bool + Send + Sync>,
}

impl PredicateSampler {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Multiplex) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Samples executions whose operation label equals `name`
    pub fn operation_named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |multiplex| multiplex.operation_label() == name)
    }
}

impl fmt::Debug for PredicateSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateSampler").finish_non_exhaustive()
    }
}

impl Sampler for PredicateSampler {
    fn should_sample(&self, multiplex: &Multiplex) -> bool {
        (self.predicate)(multiplex)
    }
}

/// Samples executions that explicitly ask for a trace mode
///
/// Mirrors a request carrying a "profile this" flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSampler {
    mode: String,
}

impl ModeSampler {
    pub fn new(mode: impl Into<String>) -> Self {
        Self { mode: mode.into() }
    }
}

impl Sampler for ModeSampler {
    fn should_sample(&self, multiplex: &Multiplex) -> bool {
        multiplex.requested_mode() == Some(self.mode.as_str())
    }
}
