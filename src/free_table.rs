//! Device free-space tracking
//!
//! Two allocators live here. The NAND free table models flash append
//! semantics: pages within a block must be written in order, so all it
//! tracks per block is the next writable page index; freeing is a whole
//! block erase. The RAM free table is an ordinary page pool for DRAM and
//! SRAM with no ordering constraint.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};

use crate::addr::{NandAddress, NandBlockAddress, NandGeometry};
use crate::error::RuntimeError;

// ============================================================================
// NAND Free Table
// ============================================================================

/// Per-block next-writable-page tracker
///
/// Blocks absent from the map have never been written (next page 0). The
/// table does not enforce write-before-erase; erase simply resets the
/// counter.
pub struct NandFreeTable {
    geom: NandGeometry,
    /// Block index -> next writable page within that block
    next_page: HashMap<u64, u64>,
}

impl NandFreeTable {
    pub fn new(geom: NandGeometry) -> Self {
        Self {
            geom,
            next_page: HashMap::new(),
        }
    }

    /// Allocate the next writable page of `block`.
    ///
    /// Returns the full page address, or `NandBlockFull` once every page of
    /// the block has been handed out.
    pub fn allocate(&mut self, block: NandBlockAddress) -> Result<NandAddress, RuntimeError> {
        let counter = self.next_page.entry(block.index()).or_insert(0);
        if *counter == self.geom.pages {
            return Err(RuntimeError::NandBlockFull);
        }
        let addr = block.page_address(*counter)?;
        *counter += 1;
        Ok(addr)
    }

    /// Erase `block`: every page becomes writable again, starting from 0.
    pub fn free(&mut self, block: NandBlockAddress) {
        self.next_page.insert(block.index(), 0);
    }

    /// True iff `addr` names exactly the next writable page of its block.
    pub fn check_free(&self, addr: NandAddress) -> bool {
        let next = self
            .next_page
            .get(&addr.block_address().index())
            .copied()
            .unwrap_or(0);
        addr.page() == next
    }

    /// Next writable page index of `block` (pages-per-block when full)
    pub fn next_page(&self, block: NandBlockAddress) -> u64 {
        self.next_page.get(&block.index()).copied().unwrap_or(0)
    }
}

// ============================================================================
// RAM Free Table
// ============================================================================

/// Free/allocated page pool for DRAM or SRAM
///
/// The free set is ordered so allocation is deterministic (lowest index
/// first). Freeing a page that is not currently allocated is reported, not
/// fatal.
pub struct RamFreeTable {
    total_pages: u64,
    free: BTreeSet<u64>,
    allocated: HashSet<u64>,
}

impl RamFreeTable {
    pub fn new(total_pages: u64) -> Self {
        Self {
            total_pages,
            free: (0..total_pages).collect(),
            allocated: HashSet::new(),
        }
    }

    /// Pop one free page, lowest index first. `None` when the pool is empty.
    pub fn allocate_page(&mut self) -> Option<u64> {
        let page = self.free.pop_first()?;
        self.allocated.insert(page);
        Some(page)
    }

    /// Return `page` to the pool. False if it was not allocated (double free
    /// or out-of-range index); the pool is unchanged in that case.
    pub fn free_page(&mut self, page: u64) -> bool {
        if !self.allocated.remove(&page) {
            return false;
        }
        self.free.insert(page);
        true
    }

    pub fn free_count(&self) -> u64 {
        self.free.len() as u64
    }

    pub fn allocated_count(&self) -> u64 {
        self.allocated.len() as u64
    }

    pub fn is_page_free(&self, page: u64) -> bool {
        self.free.contains(&page)
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
