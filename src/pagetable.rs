//! Logical-to-physical page translation
//!
//! One process-wide page table maps logical page numbers onto (device,
//! physical page) pairs with access permissions. Entries can be soft
//! invalidated: translation stops resolving them but the slot stays
//! occupied until an explicit unmap reclaims it.

use hashbrown::HashMap;

use crate::error::RuntimeError;

// ============================================================================
// Devices and Permissions
// ============================================================================

/// Physical memory device backing a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Nand,
    Dram,
    Sram,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Nand => "nand",
            DeviceType::Dram => "dram",
            DeviceType::Sram => "sram",
        }
    }
}

bitflags::bitflags! {
    /// Page access permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

// ============================================================================
// Page Table
// ============================================================================

/// One translation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub device: DeviceType,
    pub physical_page: u64,
    pub permission: Permission,
    pub valid: bool,
}

/// Logical page number -> entry
pub struct PageTable {
    page_size: u64,
    entries: HashMap<u64, PageTableEntry>,
}

impl PageTable {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            entries: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Install a mapping for `logical_page`. The slot must be empty; even an
    /// invalidated entry blocks it until unmapped.
    pub fn map(
        &mut self,
        logical_page: u64,
        device: DeviceType,
        physical_page: u64,
        permission: Permission,
    ) -> Result<(), RuntimeError> {
        if self.entries.contains_key(&logical_page) {
            return Err(RuntimeError::AlreadyMapped);
        }
        self.entries.insert(
            logical_page,
            PageTableEntry {
                device,
                physical_page,
                permission,
                valid: true,
            },
        );
        Ok(())
    }

    /// Remove the mapping for `logical_page`, returning the evicted entry.
    pub fn unmap(&mut self, logical_page: u64) -> Result<PageTableEntry, RuntimeError> {
        self.entries
            .remove(&logical_page)
            .ok_or(RuntimeError::NotMapped)
    }

    /// Resolve `logical_page` to (device, physical page).
    ///
    /// Invalidated entries do not resolve.
    pub fn translate(&self, logical_page: u64) -> Option<(DeviceType, u64)> {
        let entry = self.entries.get(&logical_page)?;
        if !entry.valid {
            return None;
        }
        Some((entry.device, entry.physical_page))
    }

    /// Raw entry access, including invalidated entries.
    pub fn entry(&self, logical_page: u64) -> Option<&PageTableEntry> {
        self.entries.get(&logical_page)
    }

    /// True iff the page resolves and grants all of `required`.
    pub fn check_permission(&self, logical_page: u64, required: Permission) -> bool {
        match self.entries.get(&logical_page) {
            Some(entry) => entry.valid && entry.permission.contains(required),
            None => false,
        }
    }

    pub fn is_valid(&self, logical_page: u64) -> bool {
        self.entries
            .get(&logical_page)
            .is_some_and(|entry| entry.valid)
    }

    /// Mark the entry invalid without freeing the slot.
    pub fn invalidate(&mut self, logical_page: u64) -> Result<(), RuntimeError> {
        match self.entries.get_mut(&logical_page) {
            Some(entry) => {
                entry.valid = false;
                Ok(())
            }
            None => Err(RuntimeError::NotMapped),
        }
    }

    /// Number of occupied slots, invalidated entries included
    pub fn mapped_count(&self) -> usize {
        self.entries.len()
    }

    /// Logical pages currently valid on `device`
    pub fn device_pages(&self, device: DeviceType) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.device == device && entry.valid)
            .map(|(&logical_page, _)| logical_page)
            .collect()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_translate_unmap() {
        let mut table = PageTable::new(4096);
        table.map(7, DeviceType::Dram, 42, Permission::RW).unwrap();

        assert_eq!(table.translate(7), Some((DeviceType::Dram, 42)));
        assert_eq!(table.mapped_count(), 1);

        let entry = table.unmap(7).unwrap();
        assert_eq!(entry.physical_page, 42);
        assert_eq!(table.translate(7), None);
        assert_eq!(table.mapped_count(), 0);
    }

    #[test]
    fn test_double_map_rejected() {
        let mut table = PageTable::new(4096);
        table.map(1, DeviceType::Sram, 0, Permission::READ).unwrap();
        assert_eq!(
            table.map(1, DeviceType::Sram, 1, Permission::READ),
            Err(RuntimeError::AlreadyMapped)
        );
        // First mapping untouched
        assert_eq!(table.translate(1), Some((DeviceType::Sram, 0)));
    }

    #[test]
    fn test_unmap_missing_rejected() {
        let mut table = PageTable::new(4096);
        assert_eq!(table.unmap(9).unwrap_err(), RuntimeError::NotMapped);
    }

    #[test]
    fn test_permission_check() {
        let mut table = PageTable::new(4096);
        table.map(1, DeviceType::Nand, 5, Permission::READ).unwrap();
        table.map(2, DeviceType::Sram, 6, Permission::RW).unwrap();

        assert!(table.check_permission(1, Permission::READ));
        assert!(!table.check_permission(1, Permission::WRITE));
        assert!(!table.check_permission(1, Permission::RW));
        assert!(table.check_permission(2, Permission::RW));
        assert!(!table.check_permission(3, Permission::READ));
    }

    #[test]
    fn test_invalidate_retains_slot() {
        let mut table = PageTable::new(4096);
        table.map(4, DeviceType::Sram, 11, Permission::RW).unwrap();
        table.invalidate(4).unwrap();

        // Translation and permission checks stop resolving
        assert_eq!(table.translate(4), None);
        assert!(!table.check_permission(4, Permission::READ));
        assert!(!table.is_valid(4));

        // But the slot is still occupied until unmapped
        assert_eq!(table.mapped_count(), 1);
        assert_eq!(
            table.map(4, DeviceType::Sram, 12, Permission::RW),
            Err(RuntimeError::AlreadyMapped)
        );
        let entry = table.unmap(4).unwrap();
        assert_eq!(entry.physical_page, 11);
        assert!(!entry.valid);
    }

    #[test]
    fn test_invalidate_missing_rejected() {
        let mut table = PageTable::new(4096);
        assert_eq!(table.invalidate(1), Err(RuntimeError::NotMapped));
    }

    #[test]
    fn test_device_pages() {
        let mut table = PageTable::new(4096);
        table.map(1, DeviceType::Nand, 0, Permission::READ).unwrap();
        table.map(2, DeviceType::Sram, 1, Permission::RW).unwrap();
        table.map(3, DeviceType::Sram, 2, Permission::RW).unwrap();
        table.invalidate(3).unwrap();

        let mut sram = table.device_pages(DeviceType::Sram);
        sram.sort_unstable();
        assert_eq!(sram, vec![2]);
        assert_eq!(table.device_pages(DeviceType::Nand), vec![1]);
        assert!(table.device_pages(DeviceType::Dram).is_empty());
    }
}
