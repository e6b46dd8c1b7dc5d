//! Outstanding runtime resources
//!
//! Every live mapping, allocation, or prefetch buffer is tracked by one
//! entry keyed by its base logical address. Entries share a common region
//! descriptor (base, size, derived logical page range) and differ in their
//! payload. The registry is the interpreter's bookkeeping surface; it never
//! touches the page table itself.

use hashbrown::HashMap;

use crate::error::RuntimeError;
use crate::pagetable::{DeviceType, Permission};

// ============================================================================
// Region
// ============================================================================

/// Contiguous logical-address window shared by all entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRegion {
    pub start_logical_addr: u64,
    pub size_bytes: u64,
    pub page_size: u64,
    pub valid: bool,
}

impl ResourceRegion {
    pub fn new(start_logical_addr: u64, size_bytes: u64, page_size: u64) -> Self {
        Self {
            start_logical_addr,
            size_bytes,
            page_size,
            valid: true,
        }
    }

    pub fn start_page(&self) -> u64 {
        self.start_logical_addr / self.page_size
    }

    /// Number of logical pages covered (size rounded up to whole pages)
    pub fn num_pages(&self) -> u64 {
        self.size_bytes.div_ceil(self.page_size)
    }

    /// Derived logical page range
    pub fn pages(&self) -> core::ops::Range<u64> {
        self.start_page()..self.start_page() + self.num_pages()
    }

    pub fn contains_page(&self, logical_page: u64) -> bool {
        self.pages().contains(&logical_page)
    }

    pub fn contains_addr(&self, addr: u64) -> bool {
        self.contains_page(addr / self.page_size)
    }
}

// ============================================================================
// Entry Kinds
// ============================================================================

/// Window backed by the NAND pages of one file
#[derive(Debug, Clone)]
pub struct NandMmapEntry {
    pub region: ResourceRegion,
    pub file_id: u64,
    pub permission: Permission,
}

/// Window backed by freshly allocated DRAM or SRAM pages
#[derive(Debug, Clone)]
pub struct MallocEntry {
    pub region: ResourceRegion,
    pub device: DeviceType,
}

/// Window of SRAM pages shadowing a source window
///
/// `source_pages` maps each prefetch logical page to the source logical
/// page it shadows. The source mapping itself is untouched: reads through
/// the prefetch alias hit SRAM, reads through the source still hit its own
/// device.
#[derive(Debug, Clone)]
pub struct PrefetchEntry {
    pub region: ResourceRegion,
    pub source_pages: HashMap<u64, u64>,
}

impl PrefetchEntry {
    pub fn source_page(&self, prefetch_page: u64) -> Option<u64> {
        self.source_pages.get(&prefetch_page).copied()
    }
}

/// Tagged resource entry
#[derive(Debug, Clone)]
pub enum ResourceEntry {
    Mmap(NandMmapEntry),
    Malloc(MallocEntry),
    Prefetch(PrefetchEntry),
}

impl ResourceEntry {
    pub fn region(&self) -> &ResourceRegion {
        match self {
            ResourceEntry::Mmap(e) => &e.region,
            ResourceEntry::Malloc(e) => &e.region,
            ResourceEntry::Prefetch(e) => &e.region,
        }
    }

    fn region_mut(&mut self) -> &mut ResourceRegion {
        match self {
            ResourceEntry::Mmap(e) => &mut e.region,
            ResourceEntry::Malloc(e) => &mut e.region,
            ResourceEntry::Prefetch(e) => &mut e.region,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResourceEntry::Mmap(_) => "mmap",
            ResourceEntry::Malloc(_) => "malloc",
            ResourceEntry::Prefetch(_) => "prefetch",
        }
    }

    pub fn is_valid(&self) -> bool {
        self.region().valid
    }

    /// Mark the entry stale; `ResourceTable::remove_invalid_entries` sweeps it.
    pub fn invalidate(&mut self) {
        self.region_mut().valid = false;
    }
}

// ============================================================================
// Resource Table
// ============================================================================

/// Base logical address -> outstanding resource entry
#[derive(Default)]
pub struct ResourceTable {
    entries: HashMap<u64, ResourceEntry>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under its base address.
    ///
    /// Invalid entries and occupied bases are rejected.
    pub fn add(&mut self, entry: ResourceEntry) -> Result<(), RuntimeError> {
        if !entry.is_valid() {
            return Err(RuntimeError::BadHandle);
        }
        let base = entry.region().start_logical_addr;
        if self.entries.contains_key(&base) {
            return Err(RuntimeError::AddrInUse);
        }
        self.entries.insert(base, entry);
        Ok(())
    }

    /// Remove and return the entry at `base`.
    pub fn remove(&mut self, base: u64) -> Result<ResourceEntry, RuntimeError> {
        self.entries.remove(&base).ok_or(RuntimeError::BadHandle)
    }

    pub fn get(&self, base: u64) -> Option<&ResourceEntry> {
        self.entries.get(&base)
    }

    pub fn get_mut(&mut self, base: u64) -> Option<&mut ResourceEntry> {
        self.entries.get_mut(&base)
    }

    pub fn has(&self, base: u64) -> bool {
        self.entries.contains_key(&base)
    }

    /// Snapshot of all entries
    pub fn get_all(&self) -> HashMap<u64, ResourceEntry> {
        self.entries.clone()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry whose derived page set contains `logical_page`, if any.
    ///
    /// Linear scan; the registry stays small (one entry per live window).
    pub fn find_by_page(&self, logical_page: u64) -> Option<&ResourceEntry> {
        self.entries
            .values()
            .find(|entry| entry.region().contains_page(logical_page))
    }

    /// Entry whose window contains the byte address `addr`, if any.
    pub fn find_by_addr(&self, addr: u64) -> Option<&ResourceEntry> {
        self.entries
            .values()
            .find(|entry| entry.region().contains_addr(addr))
    }

    /// Drop every invalidated entry; returns how many were removed.
    pub fn remove_invalid_entries(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid());
        before - self.entries.len()
    }
}

// ============================================================================
// Logical-Address Allocator
// ============================================================================

/// Pre-allocates disjoint logical-address windows
///
/// The cursor advances by a fixed 1 GiB stride per allocation, so windows
/// can never overlap regardless of how much of each window a mapping
/// actually uses. The stride is a non-collision guarantee, not a size.
#[derive(Debug, Clone)]
pub struct LogicalAddrAllocator {
    cursor: u64,
    step: u64,
}

impl LogicalAddrAllocator {
    pub const BASE: u64 = 1 << 30;
    pub const STEP: u64 = 1 << 30;

    pub fn new() -> Self {
        Self {
            cursor: Self::BASE,
            step: Self::STEP,
        }
    }

    /// Hand out the next window base.
    pub fn allocate(&mut self) -> Result<u64, RuntimeError> {
        self.cursor = self
            .cursor
            .checked_add(self.step)
            .ok_or(RuntimeError::AddrOutOfRange)?;
        Ok(self.cursor)
    }
}

impl Default for LogicalAddrAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
