//! Bus Bridge - State machines on both sides of the clock crossing
//!
//! # External side
//!
//! ```text
//!            ALE fell                 WE/OE asserted
//!   Idle ─────────────> LatchAddr ─────────────────> XferPending
//!    ^                     │ CS released                 │ done pulse + settle
//!    │ <───────────────────┘                             v
//!    │ <──────────── WE/OE released or CS released ── XferDone
//!    │
//!    └──────── late done pulse ── Faulted <── timeout (XferPending)
//! ```
//!
//! `wait` is asserted exactly while a transaction is pending. A new address
//! latch is accepted only in Idle; latches in any other state are counted
//! and dropped. The one exception is Faulted: if the late done pulse drains
//! it while the host is still selected after a dropped latch, that address
//! is taken up and the bridge moves to LatchAddr, so a retry issued straight
//! after a timeout is served instead of waiting for a `wait` that never
//! comes.
//!
//! # Internal side
//! Idle, then one settle cycle after the start pulse so the synchronized
//! address and data are stable, then Busy until the target acknowledges.

use core::fmt;

use rhino_csr::ResourceTable;
use serde::Deserialize;
use static_assertions::assert_impl_all;

use crate::bus::{BusCycle, BusTransaction, Direction, InternalBus};
use crate::domain::{DomainReg, External, Internal};
use crate::sync::{MetastablePolicy, MultiReg, PulseSynchronizer, Sampler};
use crate::{BridgeError, Result};

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Bus masters sharing the bridge, only one is supported
    pub masters: u32,
    /// Width of the multiplexed address/data bus
    pub address_width: u32,
    /// External cycles to wait for an acknowledge before faulting
    pub timeout_cycles: Option<u32>,
    /// Setup window of the first synchronizer stage in ps
    pub setup_window_ps: u64,
    pub metastable_policy: MetastablePolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            masters: 1,
            address_width: 16,
            timeout_cycles: None,
            setup_window_ps: 100,
            metastable_policy: MetastablePolicy::default(),
        }
    }
}

impl BridgeConfig {
    fn sampler(&self) -> Sampler {
        Sampler::new(self.metastable_policy, self.setup_window_ps)
    }
}

/// External side bridge state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    Idle,
    LatchAddr,
    XferPending,
    XferDone,
    Faulted,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Idle => "IDLE",
            BridgeState::LatchAddr => "LATCH_ADDR",
            BridgeState::XferPending => "XFER_PENDING",
            BridgeState::XferDone => "XFER_DONE",
            BridgeState::Faulted => "FAULTED",
        };
        f.write_str(name)
    }
}

/// Host bus pins as sampled on an external clock edge, active low strobes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalPins {
    pub cs_n: bool,
    pub ale_n: bool,
    pub we_n: bool,
    pub oe_n: bool,
    pub ad: u16,
}

impl ExternalPins {
    /// Every strobe deasserted
    pub fn released() -> Self {
        Self {
            cs_n: true,
            ale_n: true,
            we_n: true,
            oe_n: true,
            ad: 0,
        }
    }
}

impl Default for ExternalPins {
    fn default() -> Self {
        Self::released()
    }
}

/// Bridge outputs registered on an external clock edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExternalOutputs {
    /// Host must hold the data phase while set
    pub wait: bool,
    /// Read data driven onto the AD lines
    pub ad: Option<u16>,
    /// A transaction timed out and has not drained yet
    pub fault: bool,
}

/// Bridge activity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Transactions handed to the internal side
    pub transactions: u64,
    /// Transactions acknowledged by the internal bus
    pub completed: u64,
    /// Address latches dropped because a transaction was in progress
    pub ignored_latches: u64,
    /// Address phases abandoned before a data phase
    pub aborted: u64,
    pub timeouts: u64,
    /// Pulses re-triggered before delivery, always zero in a correct bridge
    pub overruns: u64,
    pub metastable_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalState {
    Idle,
    Settle,
    Busy {
        transaction: BusTransaction,
        elapsed: u32,
    },
}

/// Asynchronous multiplexed bus to CSR bus bridge
#[derive(Debug, Clone)]
pub struct BusBridge {
    config: BridgeConfig,

    // External domain
    state: BridgeState,
    ale_n: bool,
    pending_cycles: u32,
    completion_seen: bool,
    read_latch: Option<u16>,
    held_latch: Option<u16>,
    address: DomainReg<External, u16>,
    write: DomainReg<External, bool>,
    write_data: DomainReg<External, u16>,
    start: PulseSynchronizer<External, Internal>,
    read_sync: MultiReg<u16, Internal, External>,

    // Internal domain
    internal: InternalState,
    address_sync: MultiReg<u16, External, Internal>,
    write_sync: MultiReg<bool, External, Internal>,
    data_sync: MultiReg<u16, External, Internal>,
    read_data: DomainReg<Internal, u16>,
    done: PulseSynchronizer<Internal, External>,

    stats: BridgeStats,
    fault: Option<BridgeError>,
    last_ack_ps: Option<u64>,
    last_completion_ps: Option<u64>,
}

assert_impl_all!(BusBridge: Send, Sync);

impl BusBridge {
    /// Create a bridge serving the register region of `table`
    ///
    /// # Errors
    /// - `InvalidConfig` for an address width outside 1..=16
    /// - `UnsupportedBusTopology` for more than one master, stream ports in
    ///   the table, or a register region the address bus cannot reach
    pub fn new(config: BridgeConfig, table: &ResourceTable<'_>) -> Result<Self> {
        if config.address_width == 0 || config.address_width > 16 {
            return Err(BridgeError::InvalidConfig(format!(
                "address width of {} bits",
                config.address_width
            )));
        }
        if config.masters != 1 {
            return Err(BridgeError::UnsupportedBusTopology(format!(
                "{} bus masters, the bridge serves exactly one",
                config.masters
            )));
        }
        if table.has_streams() {
            return Err(BridgeError::UnsupportedBusTopology(format!(
                "{} stream ports, streams are not carried by the bridge",
                table.stream_map().slots().len()
            )));
        }

        let layout = table.layout();
        let words = (layout.register_region_size / layout.host_word_bytes) as u64;
        if words > 1u64 << config.address_width {
            return Err(BridgeError::UnsupportedBusTopology(format!(
                "register region of {:#x} words exceeds a {} bit address bus",
                words, config.address_width
            )));
        }

        log::info!(
            "Bus bridge: {} bit bus, timeout {:?}, setup window {} ps",
            config.address_width,
            config.timeout_cycles,
            config.setup_window_ps
        );

        let sampler = config.sampler();
        Ok(Self {
            state: BridgeState::Idle,
            ale_n: true,
            pending_cycles: 0,
            completion_seen: false,
            read_latch: None,
            held_latch: None,
            address: DomainReg::new(0),
            write: DomainReg::new(false),
            write_data: DomainReg::new(0),
            start: PulseSynchronizer::new(sampler.clone()),
            read_sync: MultiReg::new(0, sampler.clone()),
            internal: InternalState::Idle,
            address_sync: MultiReg::new(0, sampler.clone()),
            write_sync: MultiReg::new(false, sampler.clone()),
            data_sync: MultiReg::new(0, sampler.clone()),
            read_data: DomainReg::new(0),
            done: PulseSynchronizer::new(sampler),
            stats: BridgeStats::default(),
            fault: None,
            last_ack_ps: None,
            last_completion_ps: None,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Transaction the internal side is currently running
    pub fn in_flight(&self) -> Option<BusTransaction> {
        match self.internal {
            InternalState::Busy { transaction, .. } => Some(transaction),
            _ => None,
        }
    }

    /// Most recent fault, cleared when the next transaction is latched
    pub fn fault(&self) -> Option<&BridgeError> {
        self.fault.as_ref()
    }

    /// Time of the last internal acknowledge
    pub fn last_ack_ps(&self) -> Option<u64> {
        self.last_ack_ps
    }

    /// Time the last done pulse reached the external side
    pub fn last_completion_ps(&self) -> Option<u64> {
        self.last_completion_ps
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            overruns: self.start.overruns() + self.done.overruns(),
            metastable_events: self.start.metastable_events()
                + self.done.metastable_events()
                + self.read_sync.metastable_events()
                + self.address_sync.metastable_events()
                + self.write_sync.metastable_events()
                + self.data_sync.metastable_events(),
            ..self.stats
        }
    }

    /// External clock edge at `now` (ps)
    pub fn tick_external(&mut self, pins: ExternalPins, now: u64) -> ExternalOutputs {
        self.done.tick(now);
        self.read_sync.tick(&self.read_data, now);

        let ale_fell = self.ale_n && !pins.ale_n;
        self.ale_n = pins.ale_n;
        let selected = !pins.cs_n;
        let done = self.done.pulse().get();
        if done {
            self.last_completion_ps = Some(now);
        }

        match self.state {
            BridgeState::Idle => {
                if selected && ale_fell {
                    self.address.set(pins.ad, now);
                    self.fault = None;
                    self.enter(BridgeState::LatchAddr, now);
                }
            }
            BridgeState::LatchAddr => {
                if !selected {
                    self.stats.aborted += 1;
                    self.enter(BridgeState::Idle, now);
                } else if ale_fell {
                    self.address.set(pins.ad, now);
                } else if !pins.we_n {
                    self.commit(Direction::Write, pins.ad, now);
                } else if !pins.oe_n {
                    self.commit(Direction::Read, 0, now);
                }
            }
            BridgeState::XferPending => {
                self.ignore_latch(ale_fell, now);
                if self.completion_seen {
                    self.completion_seen = false;
                    if !self.write.value() {
                        self.read_latch = Some(self.read_sync.output().get());
                    }
                    self.enter(BridgeState::XferDone, now);
                } else if done {
                    self.completion_seen = true;
                } else if let Some(limit) = self.config.timeout_cycles {
                    self.pending_cycles += 1;
                    if self.pending_cycles >= limit {
                        self.time_out(limit, now);
                    }
                }
            }
            BridgeState::XferDone => {
                self.ignore_latch(ale_fell, now);
                if !selected || (pins.we_n && pins.oe_n) {
                    self.read_latch = None;
                    self.enter(BridgeState::Idle, now);
                }
            }
            BridgeState::Faulted => {
                self.ignore_latch(ale_fell, now);
                if !selected {
                    self.held_latch = None;
                } else if ale_fell {
                    self.held_latch = Some(pins.ad);
                }
                if done {
                    log::info!("Bridge: late acknowledge drained at {} ps", now);
                    match self.held_latch.take() {
                        Some(address) => {
                            log::debug!("Bridge: taking up latched address {:#06x} at {} ps", address, now);
                            self.address.set(address, now);
                            self.fault = None;
                            self.enter(BridgeState::LatchAddr, now);
                        }
                        None => self.enter(BridgeState::Idle, now),
                    }
                }
            }
        }

        let driving = self.state == BridgeState::XferDone && selected && !pins.oe_n;
        ExternalOutputs {
            wait: self.state == BridgeState::XferPending,
            ad: if driving { self.read_latch } else { None },
            fault: self.state == BridgeState::Faulted,
        }
    }

    /// Internal clock edge at `now` (ps)
    pub fn tick_internal<B: InternalBus + ?Sized>(&mut self, bus: &mut B, now: u64) {
        self.address_sync.tick(&self.address, now);
        self.write_sync.tick(&self.write, now);
        self.data_sync.tick(&self.write_data, now);
        self.start.tick(now);
        let start = self.start.pulse().get();

        match self.internal {
            InternalState::Idle => {
                if start {
                    self.internal = InternalState::Settle;
                }
            }
            InternalState::Settle => {
                let address = self.address_sync.output().get() as u32;
                let transaction = if self.write_sync.output().get() {
                    BusTransaction::write(address, self.data_sync.output().get())
                } else {
                    BusTransaction::read(address)
                };
                log::trace!("Bridge: issue {} at {} ps", transaction, now);
                self.internal = InternalState::Busy {
                    transaction,
                    elapsed: 0,
                };
            }
            InternalState::Busy { transaction, .. } => {
                if start {
                    log::warn!("Bridge: start pulse during {} at {} ps", transaction, now);
                }
            }
        }

        if let InternalState::Busy {
            transaction,
            elapsed,
        } = self.internal
        {
            match bus.cycle(&BusCycle {
                transaction,
                elapsed,
            }) {
                Some(data) => {
                    if !transaction.is_write() {
                        self.read_data.set(data, now);
                    }
                    self.done.trigger(now);
                    self.stats.completed += 1;
                    self.last_ack_ps = Some(now);
                    self.internal = InternalState::Idle;
                    log::trace!("Bridge: ack {} at {} ps", transaction, now);
                }
                None => {
                    self.internal = InternalState::Busy {
                        transaction,
                        elapsed: elapsed.saturating_add(1),
                    };
                }
            }
        }
    }

    fn commit(&mut self, direction: Direction, data: u16, now: u64) {
        let write = direction == Direction::Write;
        self.write.set(write, now);
        if write {
            self.write_data.set(data, now);
        }
        self.start.trigger(now);
        self.pending_cycles = 0;
        self.completion_seen = false;
        self.stats.transactions += 1;
        self.enter(BridgeState::XferPending, now);
    }

    fn time_out(&mut self, limit: u32, now: u64) {
        let address = self.address.value();
        log::error!(
            "Bridge: no acknowledge for {:#06x} after {} cycles at {} ps",
            address,
            limit,
            now
        );
        self.stats.timeouts += 1;
        self.held_latch = None;
        self.fault = Some(BridgeError::BusTimeout { address });
        self.enter(BridgeState::Faulted, now);
    }

    fn ignore_latch(&mut self, ale_fell: bool, now: u64) {
        if ale_fell {
            self.stats.ignored_latches += 1;
            log::debug!("Bridge: address latch ignored in {} at {} ps", self.state, now);
        }
    }

    fn enter(&mut self, next: BridgeState, now: u64) {
        if next != self.state {
            log::debug!("Bridge: {} -> {} at {} ps", self.state, next, now);
            self.state = next;
        }
    }
}
