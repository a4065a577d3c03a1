//! Resource Table - The immutable result of configuration
//!
//! Borrows the registry it was built from, owns the address space, and is
//! what the bus bridge routes transactions through at runtime.

use crate::allocator::{allocate, AddressMap, AddressSlot, BankContents};
use crate::permission::derive_shape;
use crate::stream::{allocate_streams, StreamMap};
use crate::{LayoutConfig, Registry, Resource, ResourceId, Result, SymbolTable, SymbolTableEntry};

/// A CSR word resolved to the resource that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub resource: ResourceId,
    /// Word index inside the resource, 0 at its base address
    pub word: u32,
}

/// Allocated register region, stream region and symbol table
#[derive(Debug, Clone)]
pub struct ResourceTable<'r> {
    registry: &'r Registry,
    layout: LayoutConfig,
    map: AddressMap,
    streams: StreamMap,
    symbols: SymbolTable,
}

impl<'r> ResourceTable<'r> {
    /// Allocate `registry` and derive its symbol table
    ///
    /// Register and memory symbols come first in allocation order, followed
    /// by the stream ports.
    pub fn build(registry: &'r Registry, layout: &LayoutConfig) -> Result<Self> {
        let map = allocate(registry, layout)?;
        let streams = allocate_streams(registry, layout)?;

        let mut entries = Vec::with_capacity(map.len() + streams.slots().len());
        for slot in map.slots() {
            let resource = &registry.resources()[slot.resource.index()];
            entries.push(SymbolTableEntry::new(
                resource.name(),
                derive_shape(resource.shape()),
                layout.register_base + slot.base_offset,
                slot.length,
            ));
        }
        for slot in streams.slots() {
            if let Some(port) = registry.stream(slot.stream) {
                entries.push(SymbolTableEntry::new(
                    port.name.as_str(),
                    port.direction.permission(),
                    slot.base_address,
                    slot.length,
                ));
            }
        }

        log::info!(
            "Resource table: {} banks, {} symbols, {} stream ports",
            map.banks().len(),
            entries.len(),
            streams.slots().len()
        );

        Ok(Self {
            registry,
            layout: layout.clone(),
            map,
            streams,
            symbols: SymbolTable::new(entries),
        })
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    pub fn stream_map(&self) -> &StreamMap {
        &self.streams
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn has_streams(&self) -> bool {
        !self.streams.is_empty()
    }

    pub fn resource(&self, id: ResourceId) -> Option<&'r Resource> {
        self.registry.resource(id)
    }

    pub fn slot(&self, id: ResourceId) -> Option<&AddressSlot> {
        self.map.slot(id)
    }

    /// CSR word address as carried on the bus for a host address
    pub fn csr_address(&self, host_address: u32) -> Option<u32> {
        let offset = host_address.checked_sub(self.layout.register_base)?;
        if offset >= self.layout.register_region_size {
            return None;
        }
        Some(offset / self.layout.host_word_bytes)
    }

    /// CSR word address of a named register or memory
    pub fn csr_address_of(&self, name: &str) -> Option<u32> {
        let id = self.registry.find(name)?;
        let slot = self.map.slot(id)?;
        Some(slot.base_offset / self.layout.host_word_bytes)
    }

    /// Resolve a host byte address in the register region
    pub fn route(&self, host_address: u32) -> Option<Route> {
        self.route_csr(self.csr_address(host_address)?)
    }

    /// Resolve a CSR word address to its resource and word index
    pub fn route_csr(&self, word_address: u32) -> Option<Route> {
        let words_per_bank = self.layout.words_per_bank();
        let bank = self.map.bank(word_address / words_per_bank)?;
        let offset = word_address.checked_mul(self.layout.host_word_bytes)?;

        let candidates: &[ResourceId] = match &bank.contents {
            BankContents::Registers(ids) => ids,
            BankContents::Memory(id) => core::slice::from_ref(id),
        };
        candidates.iter().find_map(|id| {
            let slot = self.map.slot(*id)?;
            slot.contains_offset(offset).then(|| Route {
                resource: *id,
                word: (offset - slot.base_offset) / self.layout.host_word_bytes,
            })
        })
    }
}
