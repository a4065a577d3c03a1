//! Address Allocator - Deterministic bank assignment
//!
//! Declarations are visited in registration order. The registers of one
//! declaration share a bank and are packed by cumulative byte offset; each
//! memory gets a bank-sized slot of its own right after. Slot `i` lives at
//! `register_base + i * bank_stride`.
//!
//! Allocation is a pure function of the ordered registry and the layout, so
//! an unchanged set of declarations always reproduces the same addresses.

use std::collections::BTreeMap;

use crate::{
    CsrError, LayoutConfig, MemoryOverflow, Registry, ResourceId, ResourceShape, Result,
};

/// Location of one resource in the register region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSlot {
    pub resource: ResourceId,
    /// Bank index inside the register region
    pub bank: u32,
    /// Byte offset from the region origin
    pub base_offset: u32,
    /// Published length in bytes
    pub length: u32,
    /// Bank stride the slot was allocated with
    pub stride: u32,
}

impl AddressSlot {
    pub fn end_offset(&self) -> u32 {
        self.base_offset + self.length
    }

    pub fn contains_offset(&self, offset: u32) -> bool {
        offset >= self.base_offset && offset < self.end_offset()
    }

    pub fn overlaps(&self, other: &AddressSlot) -> bool {
        self.base_offset < other.end_offset() && other.base_offset < self.end_offset()
    }
}

/// What a bank holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankContents {
    Registers(Vec<ResourceId>),
    Memory(ResourceId),
}

/// One bank-sized slot of the register region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    pub index: u32,
    /// Name of the declaration the bank was allocated for
    pub name: String,
    pub contents: BankContents,
}

/// Result of allocating a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMap {
    register_base: u32,
    bank_stride: u32,
    slots: Vec<AddressSlot>,
    banks: Vec<Bank>,
    by_resource: BTreeMap<ResourceId, usize>,
}

impl AddressMap {
    /// Slots in allocation order
    pub fn slots(&self) -> &[AddressSlot] {
        &self.slots
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn bank(&self, index: u32) -> Option<&Bank> {
        self.banks.get(index as usize)
    }

    pub fn slot(&self, resource: ResourceId) -> Option<&AddressSlot> {
        self.by_resource.get(&resource).map(|i| &self.slots[*i])
    }

    /// Absolute host address of a resource
    pub fn address_of(&self, resource: ResourceId) -> Option<u32> {
        self.slot(resource).map(|s| self.register_base + s.base_offset)
    }

    pub fn register_base(&self) -> u32 {
        self.register_base
    }

    pub fn bank_stride(&self) -> u32 {
        self.bank_stride
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Assign every registered resource a slot in the register region
///
/// # Errors
/// - `InvalidLayout` if `layout` fails validation
/// - `AddressSpaceExhausted` if a register bank outgrows its stride, the
///   region runs out of banks, or a memory exceeds one bank while
///   `MemoryOverflow::Reject` is in effect
pub fn allocate(registry: &Registry, layout: &LayoutConfig) -> Result<AddressMap> {
    layout.validate()?;

    let mut map = AddressMap {
        register_base: layout.register_base,
        bank_stride: layout.bank_stride,
        slots: Vec::with_capacity(registry.len()),
        banks: Vec::new(),
        by_resource: BTreeMap::new(),
    };

    for declaration in registry.declarations() {
        let mut registers = Vec::new();
        let mut memories = Vec::new();
        for id in declaration.resources.iter().copied() {
            match registry.resources()[id.index()].shape() {
                ResourceShape::Memory { width, depth, .. } => memories.push((id, *width, *depth)),
                _ => registers.push(id),
            }
        }

        if !registers.is_empty() {
            let index = next_bank(&map, layout, &declaration.name)?;
            let mut offset = 0u32;
            for id in &registers {
                let resource = &registry.resources()[id.index()];
                let length = layout.register_length(resource.shape().bits());
                if offset + length > layout.bank_stride {
                    return Err(CsrError::AddressSpaceExhausted {
                        name: resource.name().into(),
                        requested: (offset + length) as u64,
                        available: layout.bank_stride as u64,
                    });
                }
                push_slot(&mut map, *id, index, index * layout.bank_stride + offset, length);
                offset += length;
            }
            log::debug!(
                "Bank {} ({}): {} registers, {:#x} bytes",
                index,
                declaration.name,
                registers.len(),
                offset
            );
            map.banks.push(Bank {
                index,
                name: declaration.name.clone(),
                contents: BankContents::Registers(registers),
            });
        }

        for (id, width, depth) in memories {
            let resource = &registry.resources()[id.index()];
            let index = next_bank(&map, layout, resource.name())?;
            let length = memory_length(resource.name(), width, depth, layout)?;
            push_slot(&mut map, id, index, index * layout.bank_stride, length);
            log::debug!("Bank {} ({}): memory, {:#x} bytes", index, resource.name(), length);
            map.banks.push(Bank {
                index,
                name: resource.name().into(),
                contents: BankContents::Memory(id),
            });
        }
    }

    Ok(map)
}

fn next_bank(map: &AddressMap, layout: &LayoutConfig, name: &str) -> Result<u32> {
    let index = map.banks.len() as u32;
    if index >= layout.bank_count() {
        return Err(CsrError::AddressSpaceExhausted {
            name: name.into(),
            requested: (index as u64 + 1) * layout.bank_stride as u64,
            available: layout.register_region_size as u64,
        });
    }
    Ok(index)
}

fn push_slot(map: &mut AddressMap, resource: ResourceId, bank: u32, base_offset: u32, length: u32) {
    map.by_resource.insert(resource, map.slots.len());
    map.slots.push(AddressSlot {
        resource,
        bank,
        base_offset,
        length,
        stride: map.bank_stride,
    });
}

fn memory_length(name: &str, width: u32, depth: u32, layout: &LayoutConfig) -> Result<u32> {
    let footprint = layout.host_word_bytes as u64 * depth as u64 * layout.words_for(width) as u64;
    if footprint <= layout.bank_stride as u64 {
        return Ok(footprint as u32);
    }

    match layout.memory_overflow {
        MemoryOverflow::Reject => Err(CsrError::AddressSpaceExhausted {
            name: name.into(),
            requested: footprint,
            available: layout.bank_stride as u64,
        }),
        MemoryOverflow::Truncate => {
            log::warn!(
                "Memory {} needs {:#x} bytes, truncated to one {:#x} byte bank",
                name,
                footprint,
                layout.bank_stride
            );
            Ok(layout.bank_stride)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BankDecl, BusAccess, Field};

    fn registry_with(shapes: &[(&str, ResourceShape)]) -> Registry {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");
        for (name, shape) in shapes {
            registry.register(comp, *name, shape.clone()).unwrap();
        }
        registry
    }

    #[test]
    fn test_each_declaration_gets_a_bank() {
        let registry = registry_with(&[
            ("a", ResourceShape::raw(8)),
            ("b", ResourceShape::raw(16)),
            ("c", ResourceShape::memory(8, 16)),
        ]);
        let map = allocate(&registry, &LayoutConfig::default()).unwrap();

        let offsets: Vec<_> = map.slots().iter().map(|s| (s.bank, s.base_offset, s.length)).collect();
        assert_eq!(offsets, [(0, 0x000, 2), (1, 0x400, 4), (2, 0x800, 32)]);
        assert_eq!(map.address_of(ResourceId(2)), Some(0x0800_0800));
    }

    #[test]
    fn test_bank_packs_registers_then_memories() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");
        registry
            .declare_bank(
                comp,
                BankDecl::new("wave")
                    .memory("table", 8, 64)
                    .register("ctrl", vec![Field::new("go", 1, BusAccess::WriteOnly)])
                    .raw("count", 24),
            )
            .unwrap();
        registry.register(comp, "after", ResourceShape::raw(8)).unwrap();

        let map = allocate(&registry, &LayoutConfig::default()).unwrap();

        let ctrl = map.slot(registry.find("wave_ctrl").unwrap()).unwrap();
        let count = map.slot(registry.find("wave_count").unwrap()).unwrap();
        let table = map.slot(registry.find("wave_table").unwrap()).unwrap();
        let after = map.slot(registry.find("after").unwrap()).unwrap();

        assert_eq!((ctrl.bank, ctrl.base_offset, ctrl.length), (0, 0, 2));
        assert_eq!((count.bank, count.base_offset, count.length), (0, 2, 6));
        assert_eq!((table.bank, table.base_offset, table.length), (1, 0x400, 128));
        assert_eq!(after.bank, 2);
        assert_eq!(map.banks()[1].contents, BankContents::Memory(registry.find("wave_table").unwrap()));
    }

    #[test]
    fn test_slots_never_overlap() {
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");
        for i in 0..20u32 {
            let shape = match i % 3 {
                0 => ResourceShape::raw(1 + i),
                1 => ResourceShape::memory(8, 1 + i * 7),
                _ => ResourceShape::register(vec![Field::new("v", 1 + i, BusAccess::ReadWrite)]),
            };
            registry.register(comp, format!("r{i}"), shape).unwrap();
        }

        let map = allocate(&registry, &LayoutConfig::default()).unwrap();
        assert_eq!(map.len(), 20);
        for (i, a) in map.slots().iter().enumerate() {
            for b in &map.slots()[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
                assert!(a.base_offset < b.base_offset);
            }
        }
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let shapes = [
            ("x", ResourceShape::raw(8)),
            ("y", ResourceShape::memory(16, 100)),
            ("z", ResourceShape::register(vec![Field::new("f", 12, BusAccess::ReadOnly)])),
        ];
        let first = allocate(&registry_with(&shapes), &LayoutConfig::default()).unwrap();
        let second = allocate(&registry_with(&shapes), &LayoutConfig::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_oversized_memory_rejected_by_default() {
        let registry = registry_with(&[("big", ResourceShape::memory(8, 1024))]);
        let err = allocate(&registry, &LayoutConfig::default()).unwrap_err();
        assert_eq!(
            err,
            CsrError::AddressSpaceExhausted {
                name: "big".into(),
                requested: 0x800,
                available: 0x400,
            }
        );
    }

    #[test]
    fn test_oversized_memory_truncated_when_allowed() {
        let registry = registry_with(&[("big", ResourceShape::memory(8, 1024))]);
        let layout = LayoutConfig {
            memory_overflow: MemoryOverflow::Truncate,
            ..LayoutConfig::default()
        };
        let map = allocate(&registry, &layout).unwrap();
        assert_eq!(map.slots()[0].length, 0x400);
    }

    #[test]
    fn test_wide_memory_elements_use_several_words() {
        let registry = registry_with(&[("wide", ResourceShape::memory(16, 8))]);
        let map = allocate(&registry, &LayoutConfig::default()).unwrap();
        assert_eq!(map.slots()[0].length, 32);
    }

    #[test]
    fn test_full_register_bank_rejected() {
        let mut bank = BankDecl::new("big");
        // 9 registers of 64 bits = 9 * 16 bytes; stride of 0x80 fits only 8
        for i in 0..9 {
            bank = bank.raw(format!("r{i}"), 64);
        }
        let mut registry = Registry::new();
        let comp = registry.add_component("comp");
        registry.declare_bank(comp, bank).unwrap();

        let layout = LayoutConfig {
            bank_stride: 0x80,
            ..LayoutConfig::default()
        };
        let err = allocate(&registry, &layout).unwrap_err();
        assert!(matches!(err, CsrError::AddressSpaceExhausted { name, .. } if name == "big_r8"));
    }

    #[test]
    fn test_region_runs_out_of_banks() {
        let shapes: Vec<_> = (0..3).map(|i| (["a", "b", "c"][i], ResourceShape::raw(8))).collect();
        let layout = LayoutConfig {
            register_region_size: 0x800,
            ..LayoutConfig::default()
        };
        let err = allocate(&registry_with(&shapes), &layout).unwrap_err();
        assert!(matches!(err, CsrError::AddressSpaceExhausted { name, .. } if name == "c"));
    }
}
