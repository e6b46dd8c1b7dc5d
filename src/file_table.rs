//! NAND file table
//!
//! Weight files are laid out on NAND at mapping time, before the simulation
//! runs. A file is an ordered list of physical page addresses; placement
//! walks a persistent block cursor, filling each block page by page and
//! advancing to the next block when one fills up. File ids are dense,
//! start at 1, and are never reused; files are never destroyed.

use hashbrown::HashMap;

use crate::addr::{NandAddress, NandBlockAddress, NandGeometry};
use crate::error::RuntimeError;
use crate::free_table::NandFreeTable;
use crate::pagetable::Permission;

/// Tag attached to weight files
const WEIGHT_TAG: &str = "weight";

/// One logical file stored across NAND pages
#[derive(Debug, Clone)]
pub struct NandFileEntry {
    pub file_id: u64,
    /// Physical page addresses, in file order
    pub pages: Vec<NandAddress>,
    pub permission: Permission,
    pub tag: String,
}

impl NandFileEntry {
    pub fn num_pages(&self) -> u64 {
        self.pages.len() as u64
    }
}

/// File id -> entry, plus the placement cursor
pub struct NandFileTable {
    entries: HashMap<u64, NandFileEntry>,
    next_file_id: u64,
    next_block: NandBlockAddress,
}

impl NandFileTable {
    pub fn new(geom: NandGeometry) -> Result<Self, RuntimeError> {
        Ok(Self {
            entries: HashMap::new(),
            next_file_id: 1,
            next_block: NandBlockAddress::new(0, geom)?,
        })
    }

    /// Allocate `num_pages` NAND pages and register them as a new read-only
    /// weight file. Returns the new file id.
    ///
    /// Placement resumes from wherever the previous file ended: the cursor
    /// block is filled first, then the cursor advances block by block.
    /// `NandSpaceExhausted` means the last block filled up with pages still
    /// owed; pages taken so far stay consumed (blocks only reclaim space on
    /// whole-block erase).
    pub fn create_new_file(
        &mut self,
        free_table: &mut NandFreeTable,
        num_pages: u64,
    ) -> Result<u64, RuntimeError> {
        let mut pages = Vec::with_capacity(num_pages as usize);
        for _ in 0..num_pages {
            let addr = loop {
                match free_table.allocate(self.next_block) {
                    Ok(addr) => break addr,
                    Err(RuntimeError::NandBlockFull) => {
                        self.next_block = self
                            .next_block
                            .add(1)
                            .map_err(|_| RuntimeError::NandSpaceExhausted)?;
                    }
                    Err(e) => return Err(e),
                }
            };
            pages.push(addr);
        }

        let file_id = self.next_file_id;
        self.next_file_id += 1;
        self.entries.insert(
            file_id,
            NandFileEntry {
                file_id,
                pages,
                permission: Permission::READ,
                tag: WEIGHT_TAG.to_string(),
            },
        );
        log::debug!("file {file_id}: created with {num_pages} NAND pages");
        Ok(file_id)
    }

    pub fn get(&self, file_id: u64) -> Result<&NandFileEntry, RuntimeError> {
        self.entries.get(&file_id).ok_or(RuntimeError::UnknownFile)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
