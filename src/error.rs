//! Runtime error taxonomy
//!
//! Every fallible operation in the memory subsystem reports one of these
//! kinds. Handlers are transactional: when a command fails after partial
//! mutation, the tables are restored before the error is returned, so an
//! error here never describes a half-applied command.

/// Error kind for runtime-table and command-interpreter failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// File id is not present in the NAND file table
    UnknownFile,
    /// Address does not name a resource entry of the expected kind
    BadHandle,
    /// A resource entry already occupies this base logical address
    AddrInUse,
    /// A page of the new window is already mapped
    MapConflict,
    /// Logical page has no page-table entry
    NotMapped,
    /// Logical page already has a page-table entry
    AlreadyMapped,
    /// SRAM free pool exhausted
    OomSram,
    /// DRAM free pool exhausted
    OomDram,
    /// SRAM free pool exhausted while populating a prefetch window
    OomPrefetch,
    /// No writable page left in the NAND block
    NandBlockFull,
    /// No NAND block left to place file pages in
    NandSpaceExhausted,
    /// Page is mapped but lacks the required permission
    PermDenied,
    /// Address lies outside the device or logical address space
    AddrOutOfRange,
    /// Configuration fails validation
    ConfigInvalid,
}

impl core::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RuntimeError::UnknownFile => write!(f, "unknown file id"),
            RuntimeError::BadHandle => write!(f, "bad resource handle"),
            RuntimeError::AddrInUse => write!(f, "base logical address in use"),
            RuntimeError::MapConflict => write!(f, "logical page conflict while mapping"),
            RuntimeError::NotMapped => write!(f, "logical page not mapped"),
            RuntimeError::AlreadyMapped => write!(f, "logical page already mapped"),
            RuntimeError::OomSram => write!(f, "out of SRAM pages"),
            RuntimeError::OomDram => write!(f, "out of DRAM pages"),
            RuntimeError::OomPrefetch => write!(f, "out of SRAM pages during prefetch"),
            RuntimeError::NandBlockFull => write!(f, "NAND block full"),
            RuntimeError::NandSpaceExhausted => write!(f, "NAND space exhausted"),
            RuntimeError::PermDenied => write!(f, "permission denied"),
            RuntimeError::AddrOutOfRange => write!(f, "address out of range"),
            RuntimeError::ConfigInvalid => write!(f, "invalid configuration"),
        }
    }
}

impl std::error::Error for RuntimeError {}
