//! Internal bus interface
//!
//! The internal side of the bridge is a single-master synchronous bus: the
//! bridge issues one [`BusTransaction`] and polls the target on every
//! internal clock edge until it acknowledges.

use core::fmt;

/// Direction of a bus transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// One access on the internal CSR bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTransaction {
    /// CSR word address
    pub address: u32,
    pub direction: Direction,
    /// Write data, zero for reads
    pub data: u16,
}

impl BusTransaction {
    pub fn read(address: u32) -> Self {
        Self {
            address,
            direction: Direction::Read,
            data: 0,
        }
    }

    pub fn write(address: u32, data: u16) -> Self {
        Self {
            address,
            direction: Direction::Write,
            data,
        }
    }

    pub fn is_write(&self) -> bool {
        self.direction == Direction::Write
    }
}

impl fmt::Display for BusTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Read => write!(f, "RD [{:#06x}]", self.address),
            Direction::Write => write!(f, "WR [{:#06x}] <- {:#06x}", self.address, self.data),
        }
    }
}

/// A transaction in flight, as seen by the target on one internal cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusCycle {
    pub transaction: BusTransaction,
    /// Internal cycles since the transaction was issued, 0 on the first
    pub elapsed: u32,
}

/// Target side of the internal bus
pub trait InternalBus {
    /// Called on every internal clock edge while a transaction is active
    ///
    /// Returning `Some` acknowledges the transaction. For reads the value is
    /// the read data; for writes it is ignored. The access takes effect
    /// exactly once, on the acknowledging cycle.
    fn cycle(&mut self, cycle: &BusCycle) -> Option<u16>;
}

impl<B: InternalBus + ?Sized> InternalBus for &mut B {
    fn cycle(&mut self, cycle: &BusCycle) -> Option<u16> {
        (**self).cycle(cycle)
    }
}

impl<B: InternalBus + ?Sized> InternalBus for Box<B> {
    fn cycle(&mut self, cycle: &BusCycle) -> Option<u16> {
        (**self).cycle(cycle)
    }
}
