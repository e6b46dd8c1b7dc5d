//! NAND address geometry
//!
//! Physical NAND pages are addressed through a four-level hierarchy:
//! channel, plane (per channel), block (per plane), page (per block).
//! Both address flavors pack their components into a single integer with a
//! continuous mixed-radix layout, block in the least-significant position:
//!
//! - `NandAddress`: `index = block + page*B + plane*B*G + channel*B*G*N`
//! - `NandBlockAddress`: `index = block + plane*B + channel*B*N`
//!
//! where `B`, `G`, `N` are blocks per plane, pages per block, and planes per
//! channel. Because the layout is positional, integer addition on the index
//! is exactly component addition with carry (block into page into plane into
//! channel); addition past the top of the address space is an error.

use crate::config::NandConfig;
use crate::error::RuntimeError;

// ============================================================================
// Geometry
// ============================================================================

/// NAND array shape shared by every address
///
/// Addresses carry a copy of their geometry so they stay self-describing;
/// the struct is four words and `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NandGeometry {
    pub channels: u64,
    pub planes: u64,
    pub blocks: u64,
    pub pages: u64,
}

impl NandGeometry {
    pub fn new(channels: u64, planes: u64, blocks: u64, pages: u64) -> Result<Self, RuntimeError> {
        let geom = Self {
            channels,
            planes,
            blocks,
            pages,
        };
        if channels == 0 || planes == 0 || blocks == 0 || pages == 0 {
            return Err(RuntimeError::ConfigInvalid);
        }
        if geom.checked_total_pages().is_none() {
            return Err(RuntimeError::ConfigInvalid);
        }
        Ok(geom)
    }

    pub fn from_config(config: &NandConfig) -> Result<Self, RuntimeError> {
        Self::new(
            config.num_channels as u64,
            config.num_plane as u64,
            config.num_block as u64,
            config.num_pages as u64,
        )
    }

    fn checked_total_pages(&self) -> Option<u64> {
        self.blocks
            .checked_mul(self.pages)?
            .checked_mul(self.planes)?
            .checked_mul(self.channels)
    }

    /// Total page-address space: channels * planes * blocks * pages
    pub fn total_pages(&self) -> u64 {
        self.blocks * self.pages * self.planes * self.channels
    }

    /// Total block-address space: channels * planes * blocks
    pub fn total_blocks(&self) -> u64 {
        self.blocks * self.planes * self.channels
    }
}

// ============================================================================
// Page Address
// ============================================================================

/// Full (channel, plane, block, page) NAND page address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NandAddress {
    index: u64,
    geom: NandGeometry,
}

impl NandAddress {
    /// Wrap a raw index; errors if it lies outside the address space.
    pub fn new(index: u64, geom: NandGeometry) -> Result<Self, RuntimeError> {
        if index >= geom.total_pages() {
            return Err(RuntimeError::AddrOutOfRange);
        }
        Ok(Self { index, geom })
    }

    /// Encode components into an address; each component is range-checked.
    pub fn from_parts(
        channel: u64,
        plane: u64,
        block: u64,
        page: u64,
        geom: NandGeometry,
    ) -> Result<Self, RuntimeError> {
        if channel >= geom.channels || plane >= geom.planes || block >= geom.blocks || page >= geom.pages {
            return Err(RuntimeError::AddrOutOfRange);
        }
        let index = block
            + page * geom.blocks
            + plane * geom.blocks * geom.pages
            + channel * geom.blocks * geom.pages * geom.planes;
        Ok(Self { index, geom })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn geometry(&self) -> NandGeometry {
        self.geom
    }

    pub fn channel(&self) -> u64 {
        self.index / (self.geom.blocks * self.geom.pages * self.geom.planes)
    }

    pub fn plane(&self) -> u64 {
        (self.index / (self.geom.blocks * self.geom.pages)) % self.geom.planes
    }

    pub fn page(&self) -> u64 {
        (self.index / self.geom.blocks) % self.geom.pages
    }

    pub fn block(&self) -> u64 {
        self.index % self.geom.blocks
    }

    /// Replace the channel component, holding the others constant.
    pub fn set_channel(&mut self, channel: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(channel, self.plane(), self.block(), self.page(), self.geom)?;
        Ok(())
    }

    /// Replace the plane component, holding the others constant.
    pub fn set_plane(&mut self, plane: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(self.channel(), plane, self.block(), self.page(), self.geom)?;
        Ok(())
    }

    /// Replace the block component, holding the others constant.
    pub fn set_block(&mut self, block: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(self.channel(), self.plane(), block, self.page(), self.geom)?;
        Ok(())
    }

    /// Replace the page component, holding the others constant.
    pub fn set_page(&mut self, page: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(self.channel(), self.plane(), self.block(), page, self.geom)?;
        Ok(())
    }

    /// Add `count` pages with carry across the axes.
    ///
    /// The layout is positional, so index addition carries block into page
    /// into plane into channel. Leaving the address space is an error.
    pub fn add(&self, count: u64) -> Result<Self, RuntimeError> {
        let index = self
            .index
            .checked_add(count)
            .ok_or(RuntimeError::AddrOutOfRange)?;
        Self::new(index, self.geom)
    }

    /// Project onto the block address space by dropping the page axis.
    pub fn block_address(&self) -> NandBlockAddress {
        let index = self.block()
            + self.plane() * self.geom.blocks
            + self.channel() * self.geom.blocks * self.geom.planes;
        NandBlockAddress {
            index,
            geom: self.geom,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.index < self.geom.total_pages()
    }
}

// ============================================================================
// Block Address
// ============================================================================

/// Block-level (channel, plane, block) NAND address
///
/// Used by the free table to track the next writable page per block, and by
/// the file table as its placement cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NandBlockAddress {
    index: u64,
    geom: NandGeometry,
}

impl NandBlockAddress {
    /// Wrap a raw index; errors if it lies outside the block space.
    pub fn new(index: u64, geom: NandGeometry) -> Result<Self, RuntimeError> {
        if index >= geom.total_blocks() {
            return Err(RuntimeError::AddrOutOfRange);
        }
        Ok(Self { index, geom })
    }

    /// Encode components into a block address; each component is range-checked.
    pub fn from_parts(
        channel: u64,
        plane: u64,
        block: u64,
        geom: NandGeometry,
    ) -> Result<Self, RuntimeError> {
        if channel >= geom.channels || plane >= geom.planes || block >= geom.blocks {
            return Err(RuntimeError::AddrOutOfRange);
        }
        let index = block + plane * geom.blocks + channel * geom.blocks * geom.planes;
        Ok(Self { index, geom })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn geometry(&self) -> NandGeometry {
        self.geom
    }

    pub fn channel(&self) -> u64 {
        self.index / (self.geom.blocks * self.geom.planes)
    }

    pub fn plane(&self) -> u64 {
        (self.index / self.geom.blocks) % self.geom.planes
    }

    pub fn block(&self) -> u64 {
        self.index % self.geom.blocks
    }

    /// Replace the channel component, holding the others constant.
    pub fn set_channel(&mut self, channel: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(channel, self.plane(), self.block(), self.geom)?;
        Ok(())
    }

    /// Replace the plane component, holding the others constant.
    pub fn set_plane(&mut self, plane: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(self.channel(), plane, self.block(), self.geom)?;
        Ok(())
    }

    /// Replace the block component, holding the others constant.
    pub fn set_block(&mut self, block: u64) -> Result<(), RuntimeError> {
        *self = Self::from_parts(self.channel(), self.plane(), block, self.geom)?;
        Ok(())
    }

    /// Add `count` blocks with carry (block into plane into channel).
    pub fn add(&self, count: u64) -> Result<Self, RuntimeError> {
        let index = self
            .index
            .checked_add(count)
            .ok_or(RuntimeError::AddrOutOfRange)?;
        Self::new(index, self.geom)
    }

    /// Build the full page address for `page` within this block.
    pub fn page_address(&self, page: u64) -> Result<NandAddress, RuntimeError> {
        NandAddress::from_parts(self.channel(), self.plane(), self.block(), page, self.geom)
    }

    pub fn is_valid(&self) -> bool {
        self.index < self.geom.total_blocks()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
