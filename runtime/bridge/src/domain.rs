//! Clock domains - Every crossing value is typed by the domain that clocks it
//!
//! A [`Signal<D, T>`] can only be produced by logic clocked in `D`, and the
//! synchronizers are the only adapters from one domain to the other. Mixing
//! domains without a synchronizer is therefore a type error rather than a
//! silent metastability hazard.

use core::fmt;
use core::marker::PhantomData;

/// Runtime tag of a clock domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    /// Driven by the host's bus clock
    External,
    /// The logic's own synchronous clock
    Internal,
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKind::External => f.write_str("external"),
            DomainKind::Internal => f.write_str("internal"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::External {}
    impl Sealed for super::Internal {}
}

/// Marker trait implemented by the two clock domains of the bridge
pub trait ClockDomain: sealed::Sealed + Copy + fmt::Debug + 'static {
    const KIND: DomainKind;
}

/// Host bus clock domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct External;

/// Internal logic clock domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Internal;

impl ClockDomain for External {
    const KIND: DomainKind = DomainKind::External;
}

impl ClockDomain for Internal {
    const KIND: DomainKind = DomainKind::Internal;
}

/// A value that is valid in clock domain `D`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal<D: ClockDomain, T> {
    value: T,
    _domain: PhantomData<D>,
}

impl<D: ClockDomain, T: Copy> Signal<D, T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            _domain: PhantomData,
        }
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn domain(&self) -> DomainKind {
        D::KIND
    }
}

/// Flip-flop clocked in domain `D` whose output crosses into another domain
///
/// Remembers when its output last changed so the far side can tell whether
/// it sampled the value inside its setup window.
#[derive(Debug, Clone)]
pub struct DomainReg<D: ClockDomain, T> {
    value: T,
    changed_at: Option<u64>,
    _domain: PhantomData<D>,
}

impl<D: ClockDomain, T: Copy + PartialEq> DomainReg<D, T> {
    pub fn new(reset: T) -> Self {
        Self {
            value: reset,
            changed_at: None,
            _domain: PhantomData,
        }
    }

    /// Load a new value on a clock edge of `D` at time `now` (ps)
    pub fn set(&mut self, value: T, now: u64) {
        if value != self.value {
            self.value = value;
            self.changed_at = Some(now);
        }
    }

    pub fn get(&self) -> Signal<D, T> {
        Signal::new(self.value)
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub(crate) fn changed_at(&self) -> Option<u64> {
        self.changed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_reports_domain() {
        let ext: Signal<External, u16> = Signal::new(0x1234);
        let int: Signal<Internal, bool> = Signal::new(true);

        assert_eq!(ext.domain(), DomainKind::External);
        assert_eq!(int.domain(), DomainKind::Internal);
        assert_eq!(ext.get(), 0x1234);
    }

    #[test]
    fn test_domain_reg_tracks_changes_only() {
        let mut reg: DomainReg<External, u16> = DomainReg::new(0);
        assert_eq!(reg.changed_at(), None);

        reg.set(0, 100);
        assert_eq!(reg.changed_at(), None);

        reg.set(7, 200);
        reg.set(7, 300);
        assert_eq!(reg.changed_at(), Some(200));
        assert_eq!(reg.get().get(), 7);
    }
}
