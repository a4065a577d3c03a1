//! RHINO CSR - Register map management for host-visible components
//!
//! # Purpose
//! Lets independently-written hardware components declare named, typed
//! register and memory resources, lays them out in a flat host-visible
//! address space and emits the symbol table the host loader consumes.
//!
//! # Integration Points
//! - Depends on: nothing at runtime (configuration is a pure pass)
//! - Provides to: the bus bridge (address routing), host tooling (symtab)
//!
//! # Architecture
//! Components register resources with an explicit [`Registry`]. Allocation
//! borrows the registry and produces an immutable [`ResourceTable`] holding
//! the register banks, memory slots, stream ports and derived symbol
//! entries. Every step is deterministic: an unchanged registry always yields
//! byte-identical addresses.
//!
//! # Example
//! ```
//! use rhino_csr::{BusAccess, Field, LayoutConfig, Registry, ResourceShape, ResourceTable};
//!
//! let mut registry = Registry::new();
//! let leds = registry.add_component("leds");
//! registry.register(leds, "ctrl", ResourceShape::register(vec![
//!     Field::new("enable", 8, BusAccess::ReadWrite),
//!     Field::new("state", 8, BusAccess::ReadOnly),
//! ])).unwrap();
//!
//! let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
//! assert_eq!(table.symbols().to_string(), "ctrl\t3\t0x08000000\t0x4\n");
//! ```

mod allocator;
mod config;
mod permission;
mod resource;
mod stream;
mod symtab;
mod table;

pub use allocator::{allocate, AddressMap, AddressSlot, Bank, BankContents};
pub use config::{
    LayoutConfig, MemoryOverflow, CSR_BANK_SIZE, CSR_BASE, CSR_DATA_WIDTH, CSR_REGION_SIZE,
    DMA_BASE, DMA_PORT_RANGE, DMA_REGION_SIZE, HOST_WORD_BYTES,
};
pub use permission::{derive, Permission};
pub use resource::{
    BankDecl, BusAccess, ComponentId, Field, Registry, Resource, ResourceId, ResourceKind,
    ResourceShape, MAX_WIDTH_BITS, UID_MAGIC,
};
pub use stream::{StreamDirection, StreamId, StreamMap, StreamPort, StreamSlot};
pub use symtab::{decode, encode, SymbolTable, SymbolTableEntry};
pub use table::{ResourceTable, Route};

use thiserror::Error;

/// Error types for register map configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsrError {
    #[error("Duplicate name: {name}")]
    DuplicateName { name: String },

    #[error("Invalid name {name:?}: names must be non-empty and contain no whitespace")]
    InvalidName { name: String },

    #[error("Invalid shape for {name}: {reason}")]
    InvalidShape { name: String, reason: String },

    #[error("Unknown component handle: {0:?}")]
    UnknownComponent(ComponentId),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Address space exhausted by {name} (requested: {requested:#x} bytes, available: {available:#x})")]
    AddressSpaceExhausted {
        name: String,
        requested: u64,
        available: u64,
    },

    #[error("Malformed symbol table at line {line}: {reason}")]
    MalformedSymtab { line: usize, reason: String },
}

pub type Result<T> = core::result::Result<T, CsrError>;
