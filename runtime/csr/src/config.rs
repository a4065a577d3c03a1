//! Address space layout configuration
//!
//! Defaults reproduce the RHINO GPMC layout: registers at `0x08000000` in
//! `0x400` byte banks, stream ports at `0x10000000` in 8 KiB windows.

use serde::Deserialize;
use static_assertions::assert_impl_all;

use crate::{CsrError, Result};

/// Origin of the register region
pub const CSR_BASE: u32 = 0x0800_0000;

/// Size of one register bank / memory slot
pub const CSR_BANK_SIZE: u32 = 0x400;

/// Register region reachable through a 16-bit multiplexed word address
pub const CSR_REGION_SIZE: u32 = 0x2_0000;

/// Width of the internal CSR data bus
pub const CSR_DATA_WIDTH: u32 = 8;

/// Bytes occupied on the host bus by one CSR word
pub const HOST_WORD_BYTES: u32 = 2;

/// Origin of the streaming/DMA region
pub const DMA_BASE: u32 = 0x1000_0000;

/// Window reserved for each stream port
pub const DMA_PORT_RANGE: u32 = 8192;

/// Size of the streaming/DMA region
pub const DMA_REGION_SIZE: u32 = 0x0800_0000;

/// What to do with a memory whose footprint exceeds one bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOverflow {
    /// Fail allocation with `AddressSpaceExhausted`
    #[default]
    Reject,
    /// Clip the published length to one bank and log a warning
    Truncate,
}

/// Layout of the host-visible address space
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub register_base: u32,
    pub bank_stride: u32,
    pub register_region_size: u32,
    pub csr_data_width: u32,
    pub host_word_bytes: u32,
    pub stream_base: u32,
    pub stream_port_range: u32,
    pub stream_region_size: u32,
    pub memory_overflow: MemoryOverflow,
}

assert_impl_all!(LayoutConfig: Send, Sync, Clone);

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            register_base: CSR_BASE,
            bank_stride: CSR_BANK_SIZE,
            register_region_size: CSR_REGION_SIZE,
            csr_data_width: CSR_DATA_WIDTH,
            host_word_bytes: HOST_WORD_BYTES,
            stream_base: DMA_BASE,
            stream_port_range: DMA_PORT_RANGE,
            stream_region_size: DMA_REGION_SIZE,
            memory_overflow: MemoryOverflow::Reject,
        }
    }
}

impl LayoutConfig {
    /// Check the layout is self-consistent
    ///
    /// # Errors
    /// Returns `InvalidLayout` describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(CsrError::InvalidLayout(reason));

        if !matches!(self.host_word_bytes, 1 | 2 | 4) {
            return fail(format!("host word of {} bytes", self.host_word_bytes));
        }
        if self.csr_data_width == 0 || self.csr_data_width > 8 * self.host_word_bytes {
            return fail(format!(
                "CSR data width {} does not fit a {} byte host word",
                self.csr_data_width, self.host_word_bytes
            ));
        }
        if self.bank_stride == 0 || self.bank_stride % self.host_word_bytes != 0 {
            return fail(format!("bank stride {:#x}", self.bank_stride));
        }
        if self.register_region_size < self.bank_stride {
            return fail("register region smaller than one bank".into());
        }
        if self.stream_port_range == 0 {
            return fail("stream port range of zero bytes".into());
        }

        let registers = span(self.register_base, self.register_region_size);
        let streams = span(self.stream_base, self.stream_region_size);
        if registers.1 > 1 << 32 || streams.1 > 1 << 32 {
            return fail("region extends past the 32-bit address space".into());
        }
        if registers.0 < streams.1 && streams.0 < registers.1 {
            return fail("register and stream regions overlap".into());
        }
        Ok(())
    }

    /// Number of CSR words needed for `bits` bits
    pub fn words_for(&self, bits: u32) -> u32 {
        bits.div_ceil(self.csr_data_width)
    }

    /// Published length in bytes of a register `bits` wide
    pub fn register_length(&self, bits: u32) -> u32 {
        self.host_word_bytes * self.words_for(bits)
    }

    /// Banks available in the register region
    pub fn bank_count(&self) -> u32 {
        self.register_region_size / self.bank_stride
    }

    /// CSR words addressable inside one bank
    pub fn words_per_bank(&self) -> u32 {
        self.bank_stride / self.host_word_bytes
    }

    /// Mask selecting the CSR data bits of a word
    pub fn data_mask(&self) -> u64 {
        (1u64 << self.csr_data_width) - 1
    }
}

fn span(base: u32, size: u32) -> (u64, u64) {
    (base as u64, base as u64 + size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = LayoutConfig::default();
        layout.validate().unwrap();
        assert_eq!(layout.bank_count(), 128);
        assert_eq!(layout.words_per_bank(), 512);
        assert_eq!(layout.data_mask(), 0xff);
    }

    #[test]
    fn test_register_length_rounds_to_host_words() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.register_length(1), 2);
        assert_eq!(layout.register_length(8), 2);
        assert_eq!(layout.register_length(9), 4);
        assert_eq!(layout.register_length(16), 4);
        assert_eq!(layout.register_length(32), 8);
    }

    #[test]
    fn test_overlapping_regions_rejected() {
        let layout = LayoutConfig {
            stream_base: CSR_BASE + 0x100,
            ..LayoutConfig::default()
        };
        assert!(matches!(layout.validate(), Err(CsrError::InvalidLayout(_))));
    }

    #[test]
    fn test_bad_widths_rejected() {
        let wide = LayoutConfig {
            csr_data_width: 32,
            ..LayoutConfig::default()
        };
        assert!(wide.validate().is_err());

        let odd_stride = LayoutConfig {
            bank_stride: 0x401,
            ..LayoutConfig::default()
        };
        assert!(odd_stride.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_layout() {
        let layout: LayoutConfig = toml::from_str(
            r#"
            bank_stride = 0x800
            memory_overflow = "truncate"
            "#,
        )
        .unwrap();

        assert_eq!(layout.bank_stride, 0x800);
        assert_eq!(layout.register_base, CSR_BASE);
        assert_eq!(layout.memory_overflow, MemoryOverflow::Truncate);
    }
}
