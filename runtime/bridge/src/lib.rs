//! RHINO Bus Bridge - Host bus to CSR bus crossing
//!
//! Cycle-accurate model of the bridge between the host's asynchronous
//! multiplexed address/data bus and the internal single-master CSR bus.
//!
//! # Architecture
//!
//! ```text
//!   host (external clock)              logic (internal clock)
//!  ┌──────────┐   cs/ale/we/oe/ad   ┌───────────┐  BusTransaction  ┌──────────────┐
//!  │ HostBus  │ ──────────────────> │ BusBridge │ ───────────────> │ RegisterFile │
//!  │          │ <────────────────── │           │ <─────────────── │              │
//!  └──────────┘     wait, ad_out    └───────────┘       ack        └──────────────┘
//! ```
//!
//! Address, direction and write data cross as levels through [`MultiReg`]s,
//! the start and done events cross through [`PulseSynchronizer`]s. Each side
//! waits one settle cycle after a pulse before it samples the levels that
//! travelled with it, so the sampled data is always the value held by the
//! source when the pulse was raised.
//!
//! # Example
//!
//! ```
//! use rhino_bridge::{BridgeConfig, BusBridge, ClockConfig, RegisterFile, Simulation};
//! use rhino_csr::{BusAccess, Field, LayoutConfig, Registry, ResourceShape, ResourceTable};
//!
//! let mut registry = Registry::new();
//! let leds = registry.add_component("leds");
//! registry
//!     .register(leds, "leds", ResourceShape::register(vec![Field::new("out", 8, BusAccess::ReadWrite)]))
//!     .unwrap();
//! let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
//!
//! let bridge = BusBridge::new(BridgeConfig::default(), &table).unwrap();
//! let mut sim = Simulation::new(bridge, RegisterFile::new(&table), ClockConfig::default()).unwrap();
//!
//! sim.write(0, 0x5a).unwrap();
//! assert_eq!(sim.read(0).unwrap(), 0x5a);
//! ```

pub mod bridge;
pub mod bus;
pub mod domain;
pub mod host;
pub mod sim;
pub mod sync;
pub mod target;

pub use bridge::{BridgeConfig, BridgeState, BridgeStats, BusBridge, ExternalOutputs, ExternalPins};
pub use bus::{BusCycle, BusTransaction, Direction, InternalBus};
pub use domain::{ClockDomain, DomainKind, DomainReg, External, Internal, Signal};
pub use host::{HostBus, HostOutcome, HostRequest};
pub use sim::{ClockConfig, Simulation, StateChange};
pub use sync::{MetastablePolicy, MultiReg, PulseSynchronizer, Sampler, SYNC_STAGES};
pub use target::{AckPolicy, RawEvents, RegisterFile};

use thiserror::Error;

/// Bridge error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Unsupported bus topology: {0}")]
    UnsupportedBusTopology(String),

    #[error("Bus timeout: no acknowledge for word address {address:#06x}")]
    BusTimeout { address: u16 },

    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    #[error("Simulation limit reached at {time_ps} ps in state {state:?}")]
    SimulationLimit { time_ps: u64, state: BridgeState },

    #[error("Host bus already has a transaction in flight")]
    HostBusy,
}

/// Result type for bridge operations
pub type Result<T> = core::result::Result<T, BridgeError>;
