//! Simulator configuration
//!
//! This module contains the tunable parameters for the simulated machine.
//! All sizes are in whole pages, all times in nanoseconds of simulated time.
//! Defaults describe a small but realistic device; tests build their own
//! configs with tiny geometries.

use crate::error::RuntimeError;

/// System-wide page size in bytes
pub const PAGE_SIZE: u64 = 4096;

/// Bytes per stored weight element (fp16 convention)
pub const BYTES_PER_ELEMENT: u64 = 2;

/// Fixed cost of a runtime call (mmap, munmap, malloc, free, release)
///
/// Runtime calls mutate the translation tables only; they never touch the
/// NAND array, so they are charged a flat bookkeeping latency.
pub const RUNTIME_CALL_NS: u64 = 1_000;

/// NAND array geometry and timing
///
/// The array is organized as channels x planes x blocks x pages. Reads and
/// writes operate on single pages, erases on whole blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NandConfig {
    pub num_channels: u32,
    /// Planes per channel
    pub num_plane: u32,
    /// Blocks per plane
    pub num_block: u32,
    /// Pages per block
    pub num_pages: u32,
    /// Page read latency
    pub t_read_ns: u64,
    /// Page program latency
    pub t_write_ns: u64,
    /// Block erase latency
    pub t_erase_ns: u64,
}

impl Default for NandConfig {
    fn default() -> Self {
        Self {
            num_channels: 4,
            num_plane: 2,
            num_block: 1024,
            num_pages: 2048,
            t_read_ns: 25_000,
            t_write_ns: 300_000,
            t_erase_ns: 2_000_000,
        }
    }
}

/// DRAM capacity and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DramConfig {
    pub total_pages: u64,
    /// Per-page access latency
    pub t_access_ns: u64,
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            total_pages: 65_536,
            t_access_ns: 100,
        }
    }
}

/// SRAM capacity and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramConfig {
    pub total_pages: u64,
    /// Per-page access latency
    pub t_access_ns: u64,
}

impl Default for SramConfig {
    fn default() -> Self {
        Self {
            total_pages: 4_096,
            t_access_ns: 10,
        }
    }
}

/// Compute engine rates for the roofline cost model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpuConfig {
    /// Peak arithmetic throughput, FLOPs per nanosecond
    pub flops_per_ns: u64,
    /// SRAM read bandwidth, bytes per nanosecond
    pub sram_bytes_per_ns: u64,
}

impl Default for XpuConfig {
    fn default() -> Self {
        Self {
            flops_per_ns: 128_000,
            sram_bytes_per_ns: 1_000,
        }
    }
}

/// Top-level simulator configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimConfig {
    pub nand: NandConfig,
    pub dram: DramConfig,
    pub sram: SramConfig,
    pub xpu: XpuConfig,
}

impl SimConfig {
    /// Validate the configuration before any table is built from it.
    ///
    /// Rejects zero-sized geometry axes, zero-capacity pools, zero compute
    /// rates, and NAND geometries whose page count overflows `u64`.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let n = &self.nand;
        if n.num_channels == 0 || n.num_plane == 0 || n.num_block == 0 || n.num_pages == 0 {
            return Err(RuntimeError::ConfigInvalid);
        }
        let total = (n.num_block as u64)
            .checked_mul(n.num_pages as u64)
            .and_then(|t| t.checked_mul(n.num_plane as u64))
            .and_then(|t| t.checked_mul(n.num_channels as u64));
        if total.is_none() {
            return Err(RuntimeError::ConfigInvalid);
        }
        if self.dram.total_pages == 0 || self.sram.total_pages == 0 {
            return Err(RuntimeError::ConfigInvalid);
        }
        if self.xpu.flops_per_ns == 0 || self.xpu.sram_bytes_per_ns == 0 {
            return Err(RuntimeError::ConfigInvalid);
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
