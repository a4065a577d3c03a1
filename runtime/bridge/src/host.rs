//! Host bus master model
//!
//! Drives one multiplexed bus cycle at a time, the way a memory controller
//! in wait-pin mode would: an address phase with ALE low, a data phase held
//! until the bridge releases `wait`, then one cycle with every strobe
//! released. Pins are presented before an external clock edge and the
//! bridge outputs registered on that edge are sampled after it.

use crate::bridge::{ExternalOutputs, ExternalPins};
use crate::bus::Direction;
use crate::{BridgeError, Result};

/// A bus cycle requested by host software
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRequest {
    /// CSR word address
    pub address: u16,
    pub direction: Direction,
    pub data: u16,
}

impl HostRequest {
    pub fn read(address: u16) -> Self {
        Self {
            address,
            direction: Direction::Read,
            data: 0,
        }
    }

    pub fn write(address: u16, data: u16) -> Self {
        Self {
            address,
            direction: Direction::Write,
            data,
        }
    }
}

/// How a bus cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOutcome {
    pub request: HostRequest,
    /// Data sampled from the AD lines, reads only
    pub data: Option<u16>,
    /// External cycles the data phase was stretched by `wait`
    pub wait_cycles: u32,
    /// The bridge reported a fault instead of completing
    pub fault: bool,
    pub started_ps: u64,
    pub finished_ps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Address,
    Data,
    Release,
}

/// Host side of the multiplexed bus
#[derive(Debug, Clone)]
pub struct HostBus {
    phase: Phase,
    request: Option<HostRequest>,
    started_ps: u64,
    finished_ps: u64,
    wait_cycles: u32,
    data: Option<u16>,
    fault: bool,
    outcome: Option<HostOutcome>,
}

impl Default for HostBus {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBus {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            request: None,
            started_ps: 0,
            finished_ps: 0,
            wait_cycles: 0,
            data: None,
            fault: false,
            outcome: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Begin a bus cycle at `now` (ps)
    ///
    /// # Errors
    /// `HostBusy` if the previous cycle has not finished
    pub fn start(&mut self, request: HostRequest, now: u64) -> Result<()> {
        if !self.is_idle() {
            return Err(BridgeError::HostBusy);
        }
        log::trace!("Host: start {:?} at {} ps", request, now);
        self.request = Some(request);
        self.started_ps = now;
        self.wait_cycles = 0;
        self.data = None;
        self.fault = false;
        self.outcome = None;
        self.phase = Phase::Address;
        Ok(())
    }

    /// Pins to present for the next external clock edge
    pub fn pins(&self) -> ExternalPins {
        let Some(request) = self.request else {
            return ExternalPins::released();
        };
        let write = request.direction == Direction::Write;
        match self.phase {
            Phase::Idle | Phase::Release => ExternalPins::released(),
            Phase::Address => ExternalPins {
                cs_n: false,
                ale_n: false,
                ad: request.address,
                ..ExternalPins::released()
            },
            Phase::Data => ExternalPins {
                cs_n: false,
                ale_n: true,
                we_n: !write,
                oe_n: write,
                ad: if write { request.data } else { 0 },
            },
        }
    }

    /// Sample the bridge outputs registered on the edge at `now` (ps)
    pub fn sample(&mut self, outputs: ExternalOutputs, now: u64) {
        match self.phase {
            Phase::Idle => {}
            Phase::Address => self.phase = Phase::Data,
            Phase::Data => {
                if outputs.fault {
                    self.fault = true;
                    self.finish_data(now);
                } else if outputs.wait {
                    self.wait_cycles += 1;
                } else if self.wait_cycles > 0 {
                    // The commit edge always raises wait, so a low wait
                    // before that means the bridge has not seen the cycle
                    self.data = outputs.ad;
                    self.finish_data(now);
                }
            }
            Phase::Release => {
                if let Some(request) = self.request.take() {
                    self.outcome = Some(HostOutcome {
                        request,
                        data: self.data.filter(|_| request.direction == Direction::Read),
                        wait_cycles: self.wait_cycles,
                        fault: self.fault,
                        started_ps: self.started_ps,
                        finished_ps: self.finished_ps,
                    });
                }
                self.phase = Phase::Idle;
            }
        }
    }

    fn finish_data(&mut self, now: u64) {
        self.finished_ps = now;
        self.phase = Phase::Release;
    }

    /// Outcome of the last cycle, once the strobes have been released
    pub fn take_outcome(&mut self) -> Option<HostOutcome> {
        self.outcome.take()
    }
}
