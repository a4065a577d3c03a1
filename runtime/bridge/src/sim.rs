//! Two-clock simulation driver
//!
//! Interleaves external and internal clock edges in time order and runs
//! host bus cycles through the bridge into an internal bus target. When an
//! external and an internal edge coincide the external edge is evaluated
//! first, so the internal synchronizers see the change inside their setup
//! window.

use serde::Deserialize;

use crate::bridge::{BridgeState, BusBridge};
use crate::bus::InternalBus;
use crate::host::{HostBus, HostOutcome, HostRequest};
use crate::{BridgeError, Result};

/// Clock periods and phase of the simulation, in ps
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockConfig {
    pub external_period_ps: u64,
    pub internal_period_ps: u64,
    /// Offset of the first internal edge from the first external edge
    pub internal_phase_ps: u64,
    /// Longest a single host cycle may take before the run is abandoned
    pub time_limit_ps: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            external_period_ps: 10_000,
            internal_period_ps: 8_000,
            internal_phase_ps: 0,
            time_limit_ps: 100_000_000,
        }
    }
}

impl ClockConfig {
    fn validate(&self, setup_window_ps: u64) -> Result<()> {
        let fail = |reason: String| Err(BridgeError::InvalidConfig(reason));

        if self.external_period_ps == 0 || self.internal_period_ps == 0 {
            return fail("clock period of zero".into());
        }
        if self.internal_phase_ps >= self.internal_period_ps {
            return fail(format!(
                "internal phase {} ps is not below its period",
                self.internal_phase_ps
            ));
        }
        let fastest = self.external_period_ps.min(self.internal_period_ps);
        if setup_window_ps >= fastest {
            return fail(format!(
                "setup window {} ps does not fit a {} ps clock",
                setup_window_ps, fastest
            ));
        }
        Ok(())
    }
}

/// External state transition recorded by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub time_ps: u64,
    pub from: BridgeState,
    pub to: BridgeState,
}

/// Host, bridge and internal target running on two clocks
#[derive(Debug)]
pub struct Simulation<B: InternalBus> {
    bridge: BusBridge,
    bus: B,
    host: HostBus,
    clocks: ClockConfig,
    now: u64,
    next_external: u64,
    next_internal: u64,
    external_cycles: u64,
    internal_cycles: u64,
    wait: bool,
    wait_fell_ps: Option<u64>,
    trace: Vec<StateChange>,
}

impl<B: InternalBus> Simulation<B> {
    /// # Errors
    /// `InvalidConfig` for a zero period, a phase not below the internal
    /// period, or a setup window as long as a clock period
    pub fn new(bridge: BusBridge, bus: B, clocks: ClockConfig) -> Result<Self> {
        clocks.validate(bridge.config().setup_window_ps)?;
        Ok(Self {
            bridge,
            bus,
            host: HostBus::new(),
            next_external: 0,
            next_internal: clocks.internal_phase_ps,
            clocks,
            now: 0,
            external_cycles: 0,
            internal_cycles: 0,
            wait: false,
            wait_fell_ps: None,
            trace: Vec::new(),
        })
    }

    pub fn bridge(&self) -> &BusBridge {
        &self.bridge
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn clocks(&self) -> &ClockConfig {
        &self.clocks
    }

    /// Time of the last evaluated edge
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn external_cycles(&self) -> u64 {
        self.external_cycles
    }

    pub fn internal_cycles(&self) -> u64 {
        self.internal_cycles
    }

    /// Every external state transition so far
    pub fn trace(&self) -> &[StateChange] {
        &self.trace
    }

    /// Time `wait` was last seen falling
    pub fn wait_fell_ps(&self) -> Option<u64> {
        self.wait_fell_ps
    }

    /// Evaluate the next clock edge
    pub fn step(&mut self) {
        if self.next_external <= self.next_internal {
            self.now = self.next_external;
            let from = self.bridge.state();
            let outputs = self.bridge.tick_external(self.host.pins(), self.now);
            let to = self.bridge.state();
            if from != to {
                self.trace.push(StateChange {
                    time_ps: self.now,
                    from,
                    to,
                });
            }
            if self.wait && !outputs.wait {
                self.wait_fell_ps = Some(self.now);
            }
            self.wait = outputs.wait;
            self.host.sample(outputs, self.now);

            self.external_cycles += 1;
            self.next_external += self.clocks.external_period_ps;
        } else {
            self.now = self.next_internal;
            self.bridge.tick_internal(&mut self.bus, self.now);

            self.internal_cycles += 1;
            self.next_internal += self.clocks.internal_period_ps;
        }
    }

    /// Run `cycles` external cycles with the host idle
    pub fn idle(&mut self, cycles: u64) {
        let target = self.external_cycles + cycles;
        while self.external_cycles < target {
            self.step();
        }
    }

    /// Run one host bus cycle to completion
    ///
    /// # Errors
    /// - `BusTimeout` if the bridge faulted the cycle
    /// - `SimulationLimit` if the cycle did not finish within the time limit
    /// - `HostBusy` if a previous cycle was abandoned mid-flight
    pub fn transact(&mut self, request: HostRequest) -> Result<HostOutcome> {
        self.host.start(request, self.now)?;
        let deadline = self.now.saturating_add(self.clocks.time_limit_ps);

        loop {
            if let Some(outcome) = self.host.take_outcome() {
                if outcome.fault {
                    return Err(self
                        .bridge
                        .fault()
                        .cloned()
                        .unwrap_or(BridgeError::BusTimeout {
                            address: request.address,
                        }));
                }
                return Ok(outcome);
            }
            if self.now >= deadline {
                log::error!(
                    "Simulation: {:?} did not finish by {} ps, bridge in {}",
                    request,
                    self.now,
                    self.bridge.state()
                );
                return Err(BridgeError::SimulationLimit {
                    time_ps: self.now,
                    state: self.bridge.state(),
                });
            }
            self.step();
        }
    }

    pub fn read(&mut self, address: u16) -> Result<u16> {
        let outcome = self.transact(HostRequest::read(address))?;
        Ok(outcome.data.unwrap_or_default())
    }

    pub fn write(&mut self, address: u16, data: u16) -> Result<()> {
        self.transact(HostRequest::write(address, data)).map(|_| ())
    }
}
