//! Interpreter scenario tests
//!
//! Cross-table behavior of the runtime manager: mmap/munmap cycles,
//! malloc/free symmetry, prefetch aliasing, and the rollback guarantees
//! on every failure path.

use crate::commands::{MacroCall, RuntimeContext};
use crate::config::{DramConfig, NandConfig, PAGE_SIZE, SimConfig, SramConfig};
use crate::entries::ResourceEntry;
use crate::error::RuntimeError;
use crate::manager::RuntimeManager;
use crate::pagetable::{DeviceType, Permission};

const MMAP_BASE: u64 = 0x4000_0000;
const MALLOC_BASE: u64 = 0x8000_0000;
const PREFETCH_BASE: u64 = 0xC000_0000;

fn small_config(sram_pages: u64, dram_pages: u64) -> SimConfig {
    SimConfig {
        nand: NandConfig {
            num_channels: 4,
            num_plane: 2,
            num_block: 1024,
            num_pages: 2048,
            t_read_ns: 100,
            t_write_ns: 300,
            t_erase_ns: 1_000,
        },
        dram: DramConfig {
            total_pages: dram_pages,
            t_access_ns: 100,
        },
        sram: SramConfig {
            total_pages: sram_pages,
            t_access_ns: 10,
        },
        xpu: Default::default(),
    }
}

fn manager(sram_pages: u64, dram_pages: u64) -> (RuntimeManager, RuntimeContext) {
    (
        RuntimeManager::new(&small_config(sram_pages, dram_pages)).unwrap(),
        RuntimeContext::new(),
    )
}

fn run(manager: &mut RuntimeManager, ctx: &mut RuntimeContext, call: MacroCall) -> Result<(), RuntimeError> {
    let op = ctx.op(call);
    manager.handle(&op)
}

// ============================================================================
// NAND mmap / munmap
// ============================================================================

#[test]
fn test_mmap_then_munmap_cycle() {
    let (mut m, mut ctx) = manager(8, 8);
    let file_id = m.create_new_file(3).unwrap();
    assert_eq!(file_id, 1);
    let file_pages: Vec<u64> = m
        .file_table
        .get(file_id)
        .unwrap()
        .pages
        .iter()
        .map(|a| a.index())
        .collect();

    run(
        &mut m,
        &mut ctx,
        MacroCall::NandMmap {
            file_id,
            pre_alloc_logic_addr: MMAP_BASE,
        },
    )
    .unwrap();

    let start_page = MMAP_BASE / PAGE_SIZE;
    assert_eq!(m.page_table.mapped_count(), 3);
    for i in 0..3u64 {
        let logical_page = start_page + i;
        assert_eq!(
            m.page_table.translate(logical_page),
            Some((DeviceType::Nand, file_pages[i as usize])),
            "page {i} must map to the file's i-th NAND page"
        );
        // Weight files are read-only
        assert!(m.page_table.check_permission(logical_page, Permission::READ));
        assert!(!m.page_table.check_permission(logical_page, Permission::WRITE));
    }
    match m.resources.get(MMAP_BASE) {
        Some(ResourceEntry::Mmap(entry)) => {
            assert_eq!(entry.file_id, file_id);
            assert_eq!(entry.region.num_pages(), 3);
        }
        other => panic!("expected mmap entry, got {other:?}"),
    }

    run(&mut m, &mut ctx, MacroCall::NandMunmap { addr: MMAP_BASE }).unwrap();
    assert_eq!(m.page_table.mapped_count(), 0);
    assert_eq!(m.resources.count(), 0);
}

#[test]
fn test_mmap_unknown_file() {
    let (mut m, mut ctx) = manager(8, 8);
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::NandMmap {
                file_id: 42,
                pre_alloc_logic_addr: MMAP_BASE,
            }
        ),
        Err(RuntimeError::UnknownFile)
    );
    assert_eq!(m.resources.count(), 0);
}

#[test]
fn test_mmap_base_collision() {
    let (mut m, mut ctx) = manager(8, 8);
    let a = m.create_new_file(2).unwrap();
    let b = m.create_new_file(2).unwrap();

    run(
        &mut m,
        &mut ctx,
        MacroCall::NandMmap {
            file_id: a,
            pre_alloc_logic_addr: MMAP_BASE,
        },
    )
    .unwrap();
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::NandMmap {
                file_id: b,
                pre_alloc_logic_addr: MMAP_BASE,
            }
        ),
        Err(RuntimeError::AddrInUse)
    );
    // First mapping untouched
    assert_eq!(m.page_table.mapped_count(), 2);
    assert_eq!(m.resources.count(), 1);
}

#[test]
fn test_mmap_page_conflict_rolls_back() {
    let (mut m, mut ctx) = manager(8, 8);
    let a = m.create_new_file(2).unwrap();
    let b = m.create_new_file(2).unwrap();

    run(
        &mut m,
        &mut ctx,
        MacroCall::NandMmap {
            file_id: a,
            pre_alloc_logic_addr: MMAP_BASE,
        },
    )
    .unwrap();

    // Overlapping window: its first page collides with A's second page
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::NandMmap {
                file_id: b,
                pre_alloc_logic_addr: MMAP_BASE + PAGE_SIZE,
            }
        ),
        Err(RuntimeError::MapConflict)
    );
    assert_eq!(m.page_table.mapped_count(), 2);
    assert_eq!(m.resources.count(), 1);
    assert!(m.resources.has(MMAP_BASE));
    assert!(!m.resources.has(MMAP_BASE + PAGE_SIZE));
}

#[test]
fn test_munmap_bad_handle() {
    let (mut m, mut ctx) = manager(8, 8);
    assert_eq!(
        run(&mut m, &mut ctx, MacroCall::NandMunmap { addr: 0x9999_0000 }),
        Err(RuntimeError::BadHandle)
    );

    // A malloc base is not an mmap handle
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramMalloc {
            num_pages: 1,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();
    assert_eq!(
        run(&mut m, &mut ctx, MacroCall::NandMunmap { addr: MALLOC_BASE }),
        Err(RuntimeError::BadHandle)
    );
    assert_eq!(m.resources.count(), 1);
}

// ============================================================================
// DRAM / SRAM malloc and free
// ============================================================================

#[test]
fn test_sram_malloc_maps_pages() {
    let (mut m, mut ctx) = manager(8, 8);
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramMalloc {
            num_pages: 2,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();

    assert_eq!(m.sram_free.free_count(), 6);
    let start_page = MALLOC_BASE / PAGE_SIZE;
    for i in 0..2 {
        let (device, _) = m.page_table.translate(start_page + i).unwrap();
        assert_eq!(device, DeviceType::Sram);
        assert!(m.page_table.check_permission(start_page + i, Permission::RW));
    }
    match m.resources.get(MALLOC_BASE) {
        Some(ResourceEntry::Malloc(entry)) => assert_eq!(entry.device, DeviceType::Sram),
        other => panic!("expected malloc entry, got {other:?}"),
    }
}

#[test]
fn test_sram_malloc_oom_rolls_back() {
    let (mut m, mut ctx) = manager(2, 8);
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::SramMalloc {
                num_pages: 3,
                pre_alloc_logic_addr: MALLOC_BASE,
            }
        ),
        Err(RuntimeError::OomSram)
    );
    assert_eq!(m.sram_free.free_count(), 2);
    assert_eq!(m.sram_free.allocated_count(), 0);
    assert_eq!(m.resources.count(), 0);
    assert_eq!(m.page_table.mapped_count(), 0);
}

#[test]
fn test_dram_malloc_free_round() {
    let (mut m, mut ctx) = manager(8, 4);
    run(
        &mut m,
        &mut ctx,
        MacroCall::DramMalloc {
            num_pages: 3,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();
    assert_eq!(m.dram_free.free_count(), 1);

    run(&mut m, &mut ctx, MacroCall::DramFree { addr: MALLOC_BASE }).unwrap();
    assert_eq!(m.dram_free.free_count(), 4);
    assert_eq!(m.page_table.mapped_count(), 0);
    assert_eq!(m.resources.count(), 0);
}

#[test]
fn test_free_device_mismatch() {
    let (mut m, mut ctx) = manager(8, 8);
    run(
        &mut m,
        &mut ctx,
        MacroCall::DramMalloc {
            num_pages: 1,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();
    // A DRAM allocation is not an SRAM handle
    assert_eq!(
        run(&mut m, &mut ctx, MacroCall::SramFree { addr: MALLOC_BASE }),
        Err(RuntimeError::BadHandle)
    );
    assert_eq!(m.resources.count(), 1);
    run(&mut m, &mut ctx, MacroCall::DramFree { addr: MALLOC_BASE }).unwrap();
}

#[test]
fn test_double_free_is_bad_handle() {
    let (mut m, mut ctx) = manager(8, 8);
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramMalloc {
            num_pages: 1,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();
    run(&mut m, &mut ctx, MacroCall::SramFree { addr: MALLOC_BASE }).unwrap();
    assert_eq!(
        run(&mut m, &mut ctx, MacroCall::SramFree { addr: MALLOC_BASE }),
        Err(RuntimeError::BadHandle)
    );
    assert_eq!(m.sram_free.free_count(), 8);
}

// ============================================================================
// SRAM prefetch
// ============================================================================

fn mmap_three_page_file(m: &mut RuntimeManager, ctx: &mut RuntimeContext) -> u64 {
    let file_id = m.create_new_file(3).unwrap();
    run(
        m,
        ctx,
        MacroCall::NandMmap {
            file_id,
            pre_alloc_logic_addr: MMAP_BASE,
        },
    )
    .unwrap();
    file_id
}

#[test]
fn test_prefetch_aliases_without_touching_source() {
    let (mut m, mut ctx) = manager(3, 8);
    mmap_three_page_file(&mut m, &mut ctx);

    run(
        &mut m,
        &mut ctx,
        MacroCall::SramPrefetch {
            prefetch_addr: MMAP_BASE,
            num_pages: 3,
            pre_alloc_logic_addr: PREFETCH_BASE,
        },
    )
    .unwrap();

    let src_start = MMAP_BASE / PAGE_SIZE;
    let dst_start = PREFETCH_BASE / PAGE_SIZE;
    let mut sram_pages = Vec::new();
    for i in 0..3u64 {
        // The alias resolves to SRAM, read-only
        let (device, physical_page) = m.page_table.translate(dst_start + i).unwrap();
        assert_eq!(device, DeviceType::Sram);
        assert!(m.page_table.check_permission(dst_start + i, Permission::READ));
        assert!(!m.page_table.check_permission(dst_start + i, Permission::WRITE));
        sram_pages.push(physical_page);

        // The source still resolves to NAND
        let (device, _) = m.page_table.translate(src_start + i).unwrap();
        assert_eq!(device, DeviceType::Nand);
    }
    // Aliased pages occupy distinct SRAM pages
    sram_pages.sort_unstable();
    sram_pages.dedup();
    assert_eq!(sram_pages.len(), 3);
    assert_eq!(m.sram_free.free_count(), 0);

    match m.resources.get(PREFETCH_BASE) {
        Some(ResourceEntry::Prefetch(entry)) => {
            for i in 0..3u64 {
                assert_eq!(entry.source_page(dst_start + i), Some(src_start + i));
            }
        }
        other => panic!("expected prefetch entry, got {other:?}"),
    }
}

#[test]
fn test_prefetch_oom_rolls_back() {
    let (mut m, mut ctx) = manager(2, 8);
    mmap_three_page_file(&mut m, &mut ctx);

    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::SramPrefetch {
                prefetch_addr: MMAP_BASE,
                num_pages: 3,
                pre_alloc_logic_addr: PREFETCH_BASE,
            }
        ),
        Err(RuntimeError::OomPrefetch)
    );

    // Pool restored, no partial window, source untouched
    assert_eq!(m.sram_free.free_count(), 2);
    assert_eq!(m.page_table.mapped_count(), 3);
    assert_eq!(m.resources.count(), 1);
    let dst_start = PREFETCH_BASE / PAGE_SIZE;
    assert_eq!(m.page_table.translate(dst_start), None);
}

#[test]
fn test_prefetch_source_must_be_mapped() {
    let (mut m, mut ctx) = manager(4, 8);
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::SramPrefetch {
                prefetch_addr: MMAP_BASE,
                num_pages: 1,
                pre_alloc_logic_addr: PREFETCH_BASE,
            }
        ),
        Err(RuntimeError::NotMapped)
    );
    assert_eq!(m.sram_free.free_count(), 4);
}

#[test]
fn test_prefetch_release_returns_everything() {
    let (mut m, mut ctx) = manager(3, 8);
    mmap_three_page_file(&mut m, &mut ctx);
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramPrefetch {
            prefetch_addr: MMAP_BASE,
            num_pages: 3,
            pre_alloc_logic_addr: PREFETCH_BASE,
        },
    )
    .unwrap();

    run(
        &mut m,
        &mut ctx,
        MacroCall::SramPrefetchRelease {
            addr: PREFETCH_BASE,
        },
    )
    .unwrap();

    assert_eq!(m.sram_free.free_count(), 3);
    // Only the mmap window remains
    assert_eq!(m.page_table.mapped_count(), 3);
    assert_eq!(m.resources.count(), 1);
    assert!(m.resources.has(MMAP_BASE));
}

#[test]
fn test_release_bad_handle() {
    let (mut m, mut ctx) = manager(3, 8);
    mmap_three_page_file(&mut m, &mut ctx);
    // An mmap base is not a prefetch handle
    assert_eq!(
        run(
            &mut m,
            &mut ctx,
            MacroCall::SramPrefetchRelease { addr: MMAP_BASE }
        ),
        Err(RuntimeError::BadHandle)
    );
}

// ============================================================================
// Misc
// ============================================================================

#[test]
fn test_matmul_leaves_tables_alone() {
    let (mut m, mut ctx) = manager(8, 8);
    run(
        &mut m,
        &mut ctx,
        MacroCall::MatMul {
            weight_pages: 4,
            weight_shape: vec![64, 64],
            sram_addr: PREFETCH_BASE,
        },
    )
    .unwrap();
    assert_eq!(m.page_table.mapped_count(), 0);
    assert_eq!(m.resources.count(), 0);
    assert_eq!(m.sram_free.free_count(), 8);
}

#[test]
fn test_munmap_tolerates_partially_unmapped_window() {
    let (mut m, mut ctx) = manager(8, 8);
    mmap_three_page_file(&mut m, &mut ctx);

    // One page of the window has already been torn down out of band
    let start_page = MMAP_BASE / PAGE_SIZE;
    m.page_table.unmap(start_page + 1).unwrap();

    run(&mut m, &mut ctx, MacroCall::NandMunmap { addr: MMAP_BASE }).unwrap();
    assert_eq!(m.page_table.mapped_count(), 0);
    assert_eq!(m.resources.count(), 0);
}

#[test]
fn test_nand_physical_pages_are_exclusive() {
    // Without prefetch aliases in play, no two valid page-table entries
    // share a NAND physical page.
    let (mut m, mut ctx) = manager(8, 8);
    for base in [MMAP_BASE, MMAP_BASE + (8 << 20)] {
        let file_id = m.create_new_file(4).unwrap();
        run(
            &mut m,
            &mut ctx,
            MacroCall::NandMmap {
                file_id,
                pre_alloc_logic_addr: base,
            },
        )
        .unwrap();
    }

    let mut physical: Vec<u64> = m
        .page_table
        .device_pages(DeviceType::Nand)
        .into_iter()
        .map(|lp| m.page_table.translate(lp).unwrap().1)
        .collect();
    assert_eq!(physical.len(), 8);
    physical.sort_unstable();
    physical.dedup();
    assert_eq!(physical.len(), 8);
}

#[test]
fn test_stats_snapshot() {
    let (mut m, mut ctx) = manager(8, 8);
    mmap_three_page_file(&mut m, &mut ctx);
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramMalloc {
            num_pages: 2,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();

    let stats = m.stats();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.mapped_pages, 5);
    assert_eq!(stats.resource_entries, 2);
    assert_eq!(stats.sram_free_pages, 6);
    assert_eq!(stats.sram_allocated_pages, 2);
    assert_eq!(stats.dram_free_pages, 8);
    assert_eq!(stats.dram_allocated_pages, 0);
}

#[test]
fn test_registry_windows_stay_disjoint() {
    // Entries created through the interpreter never overlap page-wise
    let (mut m, mut ctx) = manager(8, 8);
    mmap_three_page_file(&mut m, &mut ctx);
    run(
        &mut m,
        &mut ctx,
        MacroCall::SramMalloc {
            num_pages: 2,
            pre_alloc_logic_addr: MALLOC_BASE,
        },
    )
    .unwrap();

    let all = m.resources.get_all();
    let entries: Vec<&ResourceEntry> = all.values().collect();
    for (i, a) in entries.iter().enumerate() {
        for b in entries.iter().skip(i + 1) {
            for page in a.region().pages() {
                assert!(!b.region().contains_page(page));
            }
        }
    }
}
