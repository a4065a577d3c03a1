//! Clock domain crossing primitives
//!
//! # Purpose
//! Model the two synchronizers the bridge is built from:
//! - [`MultiReg`]: a chain of [`SYNC_STAGES`] flip-flops carrying a level
//!   from one domain into another
//! - [`PulseSynchronizer`]: a toggle in the source domain, carried by a
//!   multireg and edge-detected in the destination, turning one source
//!   cycle pulse into exactly one destination cycle pulse
//!
//! # Metastability
//! When the first stage samples an input that changed less than the setup
//! window before the sampling edge, the stage is metastable. The model
//! resolves it according to [`MetastablePolicy`], so both outcomes can be
//! exercised deterministically. Later stages only ever sample the stable
//! output of the stage before them.

use core::marker::PhantomData;

use serde::Deserialize;
use static_assertions::const_assert;

use crate::domain::{ClockDomain, DomainReg, Signal};

/// Flip-flops between the source register and the destination logic
pub const SYNC_STAGES: usize = 2;

const_assert!(SYNC_STAGES >= 2);

/// How a metastable first stage resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetastablePolicy {
    /// Settle to the new input value
    #[default]
    ResolveNew,
    /// Keep the previous value for one more cycle
    ResolveOld,
    /// Alternate between new and old on successive metastable events
    Alternate,
}

/// First-stage sampling model shared by all synchronizers
#[derive(Debug, Clone)]
pub struct Sampler {
    policy: MetastablePolicy,
    setup_window_ps: u64,
    flip: bool,
    metastable_events: u64,
}

impl Sampler {
    pub fn new(policy: MetastablePolicy, setup_window_ps: u64) -> Self {
        Self {
            policy,
            setup_window_ps,
            flip: false,
            metastable_events: 0,
        }
    }

    /// Number of times the first stage went metastable
    pub fn metastable_events(&self) -> u64 {
        self.metastable_events
    }

    fn capture<T: Copy + PartialEq>(
        &mut self,
        previous: T,
        incoming: T,
        changed_at: Option<u64>,
        now: u64,
    ) -> T {
        let unstable = changed_at.is_some_and(|t| now.saturating_sub(t) < self.setup_window_ps);
        if !unstable || previous == incoming {
            return incoming;
        }

        self.metastable_events += 1;
        let resolved_new = match self.policy {
            MetastablePolicy::ResolveNew => true,
            MetastablePolicy::ResolveOld => false,
            MetastablePolicy::Alternate => {
                self.flip = !self.flip;
                self.flip
            }
        };
        log::trace!("Sync: metastable sample at {} ps, resolved to new={}", now, resolved_new);

        if resolved_new {
            incoming
        } else {
            previous
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(MetastablePolicy::default(), 0)
    }
}

/// Level synchronizer from domain `S` into domain `D`
#[derive(Debug, Clone)]
pub struct MultiReg<T, S: ClockDomain, D: ClockDomain> {
    stages: [T; SYNC_STAGES],
    sampler: Sampler,
    _domains: PhantomData<(S, D)>,
}

impl<T: Copy + PartialEq, S: ClockDomain, D: ClockDomain> MultiReg<T, S, D> {
    pub fn new(reset: T, sampler: Sampler) -> Self {
        Self {
            stages: [reset; SYNC_STAGES],
            sampler,
            _domains: PhantomData,
        }
    }

    /// Clock edge of the destination domain at `now` (ps)
    pub fn tick(&mut self, source: &DomainReg<S, T>, now: u64) {
        for i in (1..SYNC_STAGES).rev() {
            self.stages[i] = self.stages[i - 1];
        }
        self.stages[0] =
            self.sampler
                .capture(self.stages[0], source.value(), source.changed_at(), now);
    }

    pub fn output(&self) -> Signal<D, T> {
        Signal::new(self.stages[SYNC_STAGES - 1])
    }

    pub fn metastable_events(&self) -> u64 {
        self.sampler.metastable_events()
    }
}

/// One-cycle pulse carried from domain `S` into domain `D`
#[derive(Debug, Clone)]
pub struct PulseSynchronizer<S: ClockDomain, D: ClockDomain> {
    toggle: DomainReg<S, bool>,
    sync: MultiReg<bool, S, D>,
    last: bool,
    pulse: bool,
    // Bookkeeping only, no hardware counterpart
    pending: bool,
    overruns: u64,
}

impl<S: ClockDomain, D: ClockDomain> PulseSynchronizer<S, D> {
    pub fn new(sampler: Sampler) -> Self {
        Self {
            toggle: DomainReg::new(false),
            sync: MultiReg::new(false, sampler),
            last: false,
            pulse: false,
            pending: false,
            overruns: 0,
        }
    }

    /// Assert the input pulse on a source clock edge at `now` (ps)
    ///
    /// A second trigger before the first one reached the destination may
    /// cancel both, so it is counted as an overrun.
    pub fn trigger(&mut self, now: u64) {
        if self.pending {
            self.overruns += 1;
            log::warn!(
                "Pulse synchronizer {:?}->{:?} re-triggered at {} ps before delivery",
                S::KIND,
                D::KIND,
                now
            );
        }
        self.toggle.set(!self.toggle.value(), now);
        self.pending = true;
    }

    /// Clock edge of the destination domain at `now` (ps)
    pub fn tick(&mut self, now: u64) {
        self.sync.tick(&self.toggle, now);
        let level = self.sync.output().get();
        self.pulse = level != self.last;
        self.last = level;
        if self.pulse {
            self.pending = false;
        }
    }

    /// Output pulse, high for exactly one destination cycle per trigger
    pub fn pulse(&self) -> Signal<D, bool> {
        Signal::new(self.pulse)
    }

    /// Triggered but not yet delivered
    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn metastable_events(&self) -> u64 {
        self.sync.metastable_events()
    }
}
