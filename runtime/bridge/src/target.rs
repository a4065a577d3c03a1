//! Register file target - CSR bank contents behind the internal bus
//!
//! # Purpose
//! Stand in for the component side of every declared resource so bridge
//! transactions have somewhere to land:
//! - Registers keep their value, with field access applied per bus access
//! - Raw registers count read and write events for their component
//! - Memories hold their elements, host read-only memories ignore writes
//!
//! # Word order
//! Values wider than one CSR word are split most significant word first, so
//! word 0 of a 16-bit register with 8-bit CSR words carries bits 15..8.

use rhino_csr::{Field, ResourceId, ResourceShape, ResourceTable};

use crate::bus::{BusCycle, BusTransaction, Direction, InternalBus};

/// When the target acknowledges a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge after the given number of extra internal cycles
    After(u32),
    /// Never acknowledge, modelling a hung target
    Never,
}

impl Default for AckPolicy {
    fn default() -> Self {
        AckPolicy::After(1)
    }
}

/// Host access events seen by a raw register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawEvents {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug, Clone)]
enum Cell {
    Register {
        value: u64,
        read_mask: u64,
        write_mask: u64,
    },
    Raw {
        written: u64,
        input: u64,
        events: RawEvents,
    },
    Memory {
        elements: Vec<u64>,
        width: u32,
        host_read_only: bool,
    },
}

/// Component-side state of every resource in a [`ResourceTable`]
#[derive(Debug, Clone)]
pub struct RegisterFile<'t> {
    table: &'t ResourceTable<'t>,
    cells: Vec<Cell>,
    ack: AckPolicy,
    log: Vec<BusTransaction>,
    unmapped: u64,
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Read mask, write mask and reset value of a field list
fn field_masks(fields: &[Field]) -> (u64, u64, u64) {
    let mut offset = 0;
    let (mut read, mut write, mut reset) = (0u64, 0u64, 0u64);
    for field in fields {
        let bits = mask(field.width) << offset;
        if field.access.readable() {
            read |= bits;
        }
        if field.access.writable() {
            write |= bits;
        }
        reset |= (field.reset << offset) & bits;
        offset += field.width;
    }
    (read, write, reset)
}

impl<'t> RegisterFile<'t> {
    /// Fresh register file with every resource at its reset value
    pub fn new(table: &'t ResourceTable<'t>) -> Self {
        let layout = table.layout();
        let mut published = vec![0u32; table.registry().len()];
        for slot in table.address_map().slots() {
            if let Some(length) = published.get_mut(slot.resource.index()) {
                *length = slot.length;
            }
        }

        let cells = table
            .registry()
            .resources()
            .iter()
            .zip(&published)
            .map(|(resource, published)| match resource.shape() {
                ResourceShape::Register { fields } => {
                    let (read_mask, write_mask, value) = field_masks(fields);
                    Cell::Register {
                        value,
                        read_mask,
                        write_mask,
                    }
                }
                ResourceShape::RawRegister { .. } => Cell::Raw {
                    written: 0,
                    input: 0,
                    events: RawEvents::default(),
                },
                ResourceShape::Memory {
                    width,
                    depth,
                    host_read_only,
                } => Cell::Memory {
                    // Only what the slot publishes is reachable from the bus
                    elements: vec![
                        0;
                        (*depth).min(published / layout.register_length(*width).max(1)) as usize
                    ],
                    width: *width,
                    host_read_only: *host_read_only,
                },
            })
            .collect();

        Self {
            table,
            cells,
            ack: AckPolicy::default(),
            log: Vec::new(),
            unmapped: 0,
        }
    }

    pub fn with_ack(mut self, ack: AckPolicy) -> Self {
        self.ack = ack;
        self
    }

    pub fn set_ack(&mut self, ack: AckPolicy) {
        self.ack = ack;
    }

    pub fn table(&self) -> &'t ResourceTable<'t> {
        self.table
    }

    /// Transactions that were acknowledged, in completion order
    pub fn transactions(&self) -> &[BusTransaction] {
        &self.log
    }

    /// Accesses to addresses no resource occupies
    pub fn unmapped_accesses(&self) -> u64 {
        self.unmapped
    }

    /// Current value of a register, or the last value written to a raw register
    pub fn value(&self, id: ResourceId) -> Option<u64> {
        match self.cells.get(id.index())? {
            Cell::Register { value, .. } => Some(*value),
            Cell::Raw { written, .. } => Some(*written),
            Cell::Memory { .. } => None,
        }
    }

    /// Drive a register from the component side, ignoring field access
    pub fn set_value(&mut self, id: ResourceId, new: u64) -> bool {
        let bits = self.bits(id);
        match self.cells.get_mut(id.index()) {
            Some(Cell::Register { value, .. }) => {
                *value = new & mask(bits);
                true
            }
            _ => false,
        }
    }

    /// Value of one named field of a register
    pub fn field(&self, id: ResourceId, name: &str) -> Option<u64> {
        let ResourceShape::Register { fields } = self.table.resource(id)?.shape() else {
            return None;
        };
        let value = self.value(id)?;
        let mut offset = 0;
        for field in fields {
            if field.name == name {
                return Some((value >> offset) & mask(field.width));
            }
            offset += field.width;
        }
        None
    }

    /// Value the component presents on reads of a raw register
    pub fn set_raw_input(&mut self, id: ResourceId, value: u64) -> bool {
        let bits = self.bits(id);
        match self.cells.get_mut(id.index()) {
            Some(Cell::Raw { input, .. }) => {
                *input = value & mask(bits);
                true
            }
            _ => false,
        }
    }

    pub fn raw_events(&self, id: ResourceId) -> Option<RawEvents> {
        match self.cells.get(id.index())? {
            Cell::Raw { events, .. } => Some(*events),
            _ => None,
        }
    }

    pub fn memory(&self, id: ResourceId) -> Option<&[u64]> {
        match self.cells.get(id.index())? {
            Cell::Memory { elements, .. } => Some(elements.as_slice()),
            _ => None,
        }
    }

    /// Component-side access to memory contents
    pub fn memory_mut(&mut self, id: ResourceId) -> Option<&mut [u64]> {
        match self.cells.get_mut(id.index())? {
            Cell::Memory { elements, .. } => Some(elements.as_mut_slice()),
            _ => None,
        }
    }

    fn bits(&self, id: ResourceId) -> u32 {
        self.table.resource(id).map_or(0, |r| r.shape().bits())
    }

    /// Perform one bus access, returning the read data
    pub fn access(&mut self, txn: &BusTransaction) -> u16 {
        self.log.push(*txn);

        let table = self.table;
        let Some(route) = table.route_csr(txn.address) else {
            self.unmapped += 1;
            log::warn!("Register file: {} hits no resource", txn);
            return 0;
        };

        let layout = table.layout();
        let data_width = layout.csr_data_width;
        let data_mask = layout.data_mask();
        let bits = self.bits(route.resource);
        let words = layout.words_for(bits).max(1);
        let chunk = txn.data as u64 & data_mask;

        let Some(cell) = self.cells.get_mut(route.resource.index()) else {
            return 0;
        };

        let read = match cell {
            Cell::Register {
                value,
                read_mask,
                write_mask,
            } => {
                let shift = (words - 1 - route.word) * data_width;
                if txn.direction == Direction::Write {
                    let lane = data_mask << shift;
                    let merged = (*value & !lane) | (chunk << shift);
                    *value = (*value & !*write_mask) | (merged & *write_mask);
                }
                (*value & *read_mask) >> shift
            }
            Cell::Raw {
                written,
                input,
                events,
            } => {
                let shift = (words - 1 - route.word) * data_width;
                match txn.direction {
                    Direction::Read => events.reads += 1,
                    Direction::Write => {
                        events.writes += 1;
                        let lane = data_mask << shift;
                        *written = ((*written & !lane) | (chunk << shift)) & mask(bits);
                    }
                }
                *input >> shift
            }
            Cell::Memory {
                elements,
                width,
                host_read_only,
            } => {
                let per_element = layout.words_for(*width).max(1);
                let index = (route.word / per_element) as usize;
                let shift = (per_element - 1 - route.word % per_element) * data_width;
                let Some(element) = elements.get_mut(index) else {
                    return 0;
                };
                if txn.direction == Direction::Write {
                    if *host_read_only {
                        log::debug!("Register file: dropped host write to read-only memory, {}", txn);
                    } else {
                        let lane = data_mask << shift;
                        *element = ((*element & !lane) | (chunk << shift)) & mask(*width);
                    }
                }
                *element >> shift
            }
        };

        (read & data_mask) as u16
    }
}

impl InternalBus for RegisterFile<'_> {
    fn cycle(&mut self, cycle: &BusCycle) -> Option<u16> {
        match self.ack {
            AckPolicy::After(latency) if cycle.elapsed >= latency => {
                Some(self.access(&cycle.transaction))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhino_csr::{BankDecl, BusAccess, LayoutConfig, MemoryOverflow, Registry};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        let comp = registry.add_component("periph");
        registry
            .declare_bank(
                comp,
                BankDecl::new("p")
                    .uid(0x42)
                    .register(
                        "ctrl",
                        vec![
                            Field::new("mode", 4, BusAccess::ReadWrite).with_reset(0x3),
                            Field::new("busy", 4, BusAccess::ReadOnly).with_reset(0x5),
                            Field::new("go", 8, BusAccess::WriteOnly),
                        ],
                    )
                    .raw("fifo", 16)
                    .memory("buf", 16, 4)
                    .resource("trace", ResourceShape::read_only_memory(8, 4)),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_uid_registers_read_back() {
        let registry = registry();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
        let mut file = RegisterFile::new(&table);

        let magic = table.csr_address_of("p_magic").unwrap();
        let words: Vec<u16> = (0..4)
            .map(|w| file.access(&BusTransaction::read(magic + w)))
            .collect();
        assert_eq!(words, vec![0xc2, 0xd5, 0xe7, 0x17]);

        let uid = table.csr_address_of("p_uid").unwrap();
        assert_eq!(file.access(&BusTransaction::read(uid + 3)), 0x42);

        // Read-only, writes leave the value alone
        file.access(&BusTransaction::write(uid + 3, 0xff));
        assert_eq!(file.value(registry.find("p_uid").unwrap()), Some(0x42));
    }

    #[test]
    fn test_register_field_access() {
        let registry = registry();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
        let mut file = RegisterFile::new(&table);
        let ctrl = registry.find("p_ctrl").unwrap();
        let addr = table.csr_address_of("p_ctrl").unwrap();

        // Word 0 holds bits 15..8, the write-only go field
        assert_eq!(file.access(&BusTransaction::read(addr)), 0x00);
        assert_eq!(file.access(&BusTransaction::read(addr + 1)), 0x53);

        file.access(&BusTransaction::write(addr, 0xa5));
        file.access(&BusTransaction::write(addr + 1, 0xff));
        assert_eq!(file.field(ctrl, "go"), Some(0xa5));
        assert_eq!(file.field(ctrl, "mode"), Some(0xf));
        assert_eq!(file.field(ctrl, "busy"), Some(0x5));
        assert_eq!(file.access(&BusTransaction::read(addr)), 0x00);
    }

    #[test]
    fn test_raw_register_events() {
        let registry = registry();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
        let mut file = RegisterFile::new(&table);
        let fifo = registry.find("p_fifo").unwrap();
        let addr = table.csr_address_of("p_fifo").unwrap();

        file.set_raw_input(fifo, 0x1234);
        assert_eq!(file.access(&BusTransaction::read(addr)), 0x12);
        assert_eq!(file.access(&BusTransaction::read(addr + 1)), 0x34);
        file.access(&BusTransaction::write(addr + 1, 0x99));

        assert_eq!(file.raw_events(fifo), Some(RawEvents { reads: 2, writes: 1 }));
        assert_eq!(file.value(fifo), Some(0x99));
    }

    #[test]
    fn test_memories() {
        let registry = registry();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
        let mut file = RegisterFile::new(&table);
        let buf = registry.find("p_buf").unwrap();
        let trace = registry.find("p_trace").unwrap();

        let addr = table.csr_address_of("p_buf").unwrap();
        file.access(&BusTransaction::write(addr + 2, 0xab));
        file.access(&BusTransaction::write(addr + 3, 0xcd));
        assert_eq!(file.memory(buf).unwrap(), &[0, 0xabcd, 0, 0]);

        file.memory_mut(trace).unwrap()[1] = 0x77;
        let addr = table.csr_address_of("p_trace").unwrap();
        file.access(&BusTransaction::write(addr + 1, 0x11));
        assert_eq!(file.access(&BusTransaction::read(addr + 1)), 0x77);
    }

    #[test]
    fn test_truncated_memory_holds_published_elements() {
        let mut registry = Registry::new();
        let comp = registry.add_component("dump");
        registry
            .register(comp, "huge", ResourceShape::memory(16, u32::MAX))
            .unwrap();
        let layout = LayoutConfig {
            memory_overflow: MemoryOverflow::Truncate,
            ..LayoutConfig::default()
        };
        let table = ResourceTable::build(&registry, &layout).unwrap();
        let mut file = RegisterFile::new(&table);
        let huge = registry.find("huge").unwrap();

        // One 0x400 byte bank of 4 byte elements
        assert_eq!(file.memory(huge).unwrap().len(), 256);

        let addr = table.csr_address_of("huge").unwrap();
        file.access(&BusTransaction::write(addr + 511, 0x5a));
        assert_eq!(file.memory(huge).unwrap()[255], 0x5a);
    }

    #[test]
    fn test_ack_policy_and_unmapped() {
        let registry = registry();
        let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();
        let mut file = RegisterFile::new(&table).with_ack(AckPolicy::After(2));

        let mut cycle = BusCycle {
            transaction: BusTransaction::read(0x1ff),
            elapsed: 1,
        };
        assert_eq!(file.cycle(&cycle), None);
        cycle.elapsed = 2;
        assert_eq!(file.cycle(&cycle), Some(0));
        assert_eq!(file.unmapped_accesses(), 1);
        assert_eq!(file.transactions().len(), 1);

        file.set_ack(AckPolicy::Never);
        cycle.elapsed = 1000;
        assert_eq!(file.cycle(&cycle), None);
    }
}
