//! Runtime manager
//!
//! The command interpreter. Owns every runtime table and mutates them in
//! response to macro-ops; engines call in here and never touch table
//! internals directly. Handlers are atomic with respect to simulation
//! time: a handler that fails after partial mutation rolls its changes
//! back before returning, so the tables are always consistent between
//! commands.

use hashbrown::HashMap;

use crate::addr::NandGeometry;
use crate::commands::{MacroCall, MacroOp};
use crate::config::{PAGE_SIZE, SimConfig};
use crate::entries::{
    MallocEntry, NandMmapEntry, PrefetchEntry, ResourceEntry, ResourceRegion, ResourceTable,
};
use crate::error::RuntimeError;
use crate::file_table::NandFileTable;
use crate::free_table::{NandFreeTable, RamFreeTable};
use crate::pagetable::{DeviceType, PageTable, Permission};

/// Snapshot of table occupancy, for reports and leak checks
#[derive(Debug, Clone, Copy)]
pub struct MemoryStats {
    pub files: usize,
    pub mapped_pages: usize,
    pub resource_entries: usize,
    pub dram_free_pages: u64,
    pub dram_allocated_pages: u64,
    pub sram_free_pages: u64,
    pub sram_allocated_pages: u64,
}

pub struct RuntimeManager {
    geom: NandGeometry,
    page_size: u64,
    pub file_table: NandFileTable,
    pub nand_free: NandFreeTable,
    pub dram_free: RamFreeTable,
    pub sram_free: RamFreeTable,
    pub page_table: PageTable,
    pub resources: ResourceTable,
}

impl RuntimeManager {
    pub fn new(config: &SimConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let geom = NandGeometry::from_config(&config.nand)?;
        Ok(Self {
            geom,
            page_size: PAGE_SIZE,
            file_table: NandFileTable::new(geom)?,
            nand_free: NandFreeTable::new(geom),
            dram_free: RamFreeTable::new(config.dram.total_pages),
            sram_free: RamFreeTable::new(config.sram.total_pages),
            page_table: PageTable::new(PAGE_SIZE),
            resources: ResourceTable::new(),
        })
    }

    pub fn geometry(&self) -> NandGeometry {
        self.geom
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Place a new weight file on NAND (prologue-time operation).
    pub fn create_new_file(&mut self, num_pages: u64) -> Result<u64, RuntimeError> {
        self.file_table.create_new_file(&mut self.nand_free, num_pages)
    }

    /// Current table occupancy
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            files: self.file_table.count(),
            mapped_pages: self.page_table.mapped_count(),
            resource_entries: self.resources.count(),
            dram_free_pages: self.dram_free.free_count(),
            dram_allocated_pages: self.dram_free.allocated_count(),
            sram_free_pages: self.sram_free.free_count(),
            sram_allocated_pages: self.sram_free.allocated_count(),
        }
    }

    /// Dispatch one macro-op against the tables.
    pub fn handle(&mut self, op: &MacroOp) -> Result<(), RuntimeError> {
        let result = match &op.call {
            MacroCall::NandMmap {
                file_id,
                pre_alloc_logic_addr,
            } => self.nand_mmap(*file_id, *pre_alloc_logic_addr),
            MacroCall::NandMunmap { addr } => self.nand_munmap(*addr),
            MacroCall::SramPrefetch {
                prefetch_addr,
                num_pages,
                pre_alloc_logic_addr,
            } => self.sram_prefetch(*prefetch_addr, *num_pages as u64, *pre_alloc_logic_addr),
            MacroCall::SramPrefetchRelease { addr } => self.sram_prefetch_release(*addr),
            MacroCall::SramMalloc {
                num_pages,
                pre_alloc_logic_addr,
            } => self.malloc(DeviceType::Sram, *num_pages as u64, *pre_alloc_logic_addr),
            MacroCall::SramFree { addr } => self.free(DeviceType::Sram, *addr),
            MacroCall::DramMalloc {
                num_pages,
                pre_alloc_logic_addr,
            } => self.malloc(DeviceType::Dram, *num_pages as u64, *pre_alloc_logic_addr),
            MacroCall::DramFree { addr } => self.free(DeviceType::Dram, *addr),
            // Compute ops never touch the tables
            MacroCall::MatMul { .. } => Ok(()),
        };
        match &result {
            Ok(()) => log::debug!("op {} {}: ok", op.id, op.call.name()),
            Err(e) => log::warn!("op {} {}: {}", op.id, op.call.name(), e),
        }
        result
    }

    // ========================================================================
    // NAND mmap / munmap
    // ========================================================================

    fn nand_mmap(&mut self, file_id: u64, base: u64) -> Result<(), RuntimeError> {
        let file = self.file_table.get(file_id)?;
        let permission = file.permission;
        let phys: Vec<u64> = file.pages.iter().map(|addr| addr.index()).collect();

        let region = ResourceRegion::new(base, phys.len() as u64 * self.page_size, self.page_size);
        self.resources.add(ResourceEntry::Mmap(NandMmapEntry {
            region,
            file_id,
            permission,
        }))?;

        let start_page = region.start_page();
        let mut mapped = 0;
        for (i, &physical_page) in phys.iter().enumerate() {
            let logical_page = start_page + i as u64;
            if self
                .page_table
                .map(logical_page, DeviceType::Nand, physical_page, permission)
                .is_err()
            {
                self.unmap_range(start_page, mapped);
                let _ = self.resources.remove(base);
                return Err(RuntimeError::MapConflict);
            }
            mapped += 1;
        }
        Ok(())
    }

    fn nand_munmap(&mut self, addr: u64) -> Result<(), RuntimeError> {
        let region = match self.resources.get(addr) {
            Some(ResourceEntry::Mmap(entry)) => entry.region,
            _ => return Err(RuntimeError::BadHandle),
        };
        // Individual pages may already be gone (soft invalidation); that is
        // not an error for the whole command.
        for logical_page in region.pages() {
            let _ = self.page_table.unmap(logical_page);
        }
        self.resources.remove(addr)?;
        Ok(())
    }

    // ========================================================================
    // DRAM / SRAM malloc and free
    // ========================================================================

    fn malloc(&mut self, device: DeviceType, num_pages: u64, base: u64) -> Result<(), RuntimeError> {
        let popped = {
            let pool = self.pool_mut(device)?;
            match Self::pop_pages(pool, num_pages) {
                Some(pages) => pages,
                None => return Err(Self::oom_error(device)),
            }
        };

        let region = ResourceRegion::new(base, num_pages * self.page_size, self.page_size);
        if let Err(e) = self
            .resources
            .add(ResourceEntry::Malloc(MallocEntry { region, device }))
        {
            self.return_pages(device, &popped);
            return Err(e);
        }

        let start_page = region.start_page();
        let mut mapped = 0;
        for (i, &physical_page) in popped.iter().enumerate() {
            let logical_page = start_page + i as u64;
            if self
                .page_table
                .map(logical_page, device, physical_page, Permission::RW)
                .is_err()
            {
                self.unmap_range(start_page, mapped);
                let _ = self.resources.remove(base);
                self.return_pages(device, &popped);
                return Err(RuntimeError::MapConflict);
            }
            mapped += 1;
        }
        Ok(())
    }

    fn free(&mut self, device: DeviceType, addr: u64) -> Result<(), RuntimeError> {
        let region = match self.resources.get(addr) {
            Some(ResourceEntry::Malloc(entry)) if entry.device == device => entry.region,
            _ => return Err(RuntimeError::BadHandle),
        };
        for logical_page in region.pages() {
            // Invalidated entries still hold their physical page; reclaim it
            // through the raw entry, then drop the slot.
            if let Some(entry) = self.page_table.entry(logical_page).copied() {
                let _ = self.page_table.unmap(logical_page);
                let pool = self.pool_mut(entry.device)?;
                pool.free_page(entry.physical_page);
            }
        }
        self.resources.remove(addr)?;
        Ok(())
    }

    // ========================================================================
    // SRAM prefetch
    // ========================================================================

    fn sram_prefetch(
        &mut self,
        prefetch_addr: u64,
        num_pages: u64,
        base: u64,
    ) -> Result<(), RuntimeError> {
        if self.resources.has(base) {
            return Err(RuntimeError::AddrInUse);
        }

        // Validate the whole source window before mutating anything.
        let src_start = prefetch_addr / self.page_size;
        for i in 0..num_pages {
            let source_page = src_start + i;
            if self.page_table.translate(source_page).is_none() {
                return Err(RuntimeError::NotMapped);
            }
            if !self.page_table.check_permission(source_page, Permission::READ) {
                return Err(RuntimeError::PermDenied);
            }
        }

        let dst_start = base / self.page_size;
        let mut popped: Vec<u64> = Vec::with_capacity(num_pages as usize);
        let mut source_pages: HashMap<u64, u64> = HashMap::with_capacity(num_pages as usize);
        for i in 0..num_pages {
            let sram_page = match self.sram_free.allocate_page() {
                Some(page) => page,
                None => {
                    // Pool ran dry mid-command: give back what this command
                    // took and leave no partially populated window behind.
                    self.unmap_range(dst_start, i);
                    self.return_pages(DeviceType::Sram, &popped);
                    return Err(RuntimeError::OomPrefetch);
                }
            };
            popped.push(sram_page);

            let prefetch_page = dst_start + i;
            if self
                .page_table
                .map(prefetch_page, DeviceType::Sram, sram_page, Permission::READ)
                .is_err()
            {
                self.unmap_range(dst_start, i);
                self.return_pages(DeviceType::Sram, &popped);
                return Err(RuntimeError::MapConflict);
            }
            source_pages.insert(prefetch_page, src_start + i);
        }

        let region = ResourceRegion::new(base, num_pages * self.page_size, self.page_size);
        if let Err(e) = self.resources.add(ResourceEntry::Prefetch(PrefetchEntry {
            region,
            source_pages,
        })) {
            self.unmap_range(dst_start, num_pages);
            self.return_pages(DeviceType::Sram, &popped);
            return Err(e);
        }
        Ok(())
    }

    fn sram_prefetch_release(&mut self, addr: u64) -> Result<(), RuntimeError> {
        let region = match self.resources.get(addr) {
            Some(ResourceEntry::Prefetch(entry)) => entry.region,
            _ => return Err(RuntimeError::BadHandle),
        };
        for logical_page in region.pages() {
            if let Some(entry) = self.page_table.entry(logical_page).copied() {
                let _ = self.page_table.unmap(logical_page);
                self.sram_free.free_page(entry.physical_page);
            }
        }
        self.resources.remove(addr)?;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn pool_mut(&mut self, device: DeviceType) -> Result<&mut RamFreeTable, RuntimeError> {
        match device {
            DeviceType::Dram => Ok(&mut self.dram_free),
            DeviceType::Sram => Ok(&mut self.sram_free),
            DeviceType::Nand => Err(RuntimeError::BadHandle),
        }
    }

    fn oom_error(device: DeviceType) -> RuntimeError {
        match device {
            DeviceType::Sram => RuntimeError::OomSram,
            _ => RuntimeError::OomDram,
        }
    }

    /// Pop `count` pages, or none at all.
    fn pop_pages(pool: &mut RamFreeTable, count: u64) -> Option<Vec<u64>> {
        let mut pages = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match pool.allocate_page() {
                Some(page) => pages.push(page),
                None => {
                    for page in pages {
                        pool.free_page(page);
                    }
                    return None;
                }
            }
        }
        Some(pages)
    }

    fn return_pages(&mut self, device: DeviceType, pages: &[u64]) {
        if let Ok(pool) = self.pool_mut(device) {
            for &page in pages {
                pool.free_page(page);
            }
        }
    }

    fn unmap_range(&mut self, start_page: u64, count: u64) {
        for i in 0..count {
            let _ = self.page_table.unmap(start_page + i);
        }
    }
}
