//! Meta page serialization.
//!
//! Page 0 of the database file is the superblock:
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Magic number 0xDEADBEEF (little-endian)
//! 4       4     Root page ID of the B-tree
//! 8       4     Free-list head page (reserved, written as 0)
//! ```
//!
//! The remaining bytes up to the page size are zero and ignored.

use crate::error::{Result, StoreError};

/// Magic number identifying a valid database file
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Size of the serialized meta fields
pub const META_SIZE: usize = 12;

/// The superblock stored in page 0
#[derive(Debug, Clone, Copy)]
pub struct Meta {
    /// File format magic number
    pub magic: u32,
    /// Page ID of the current B-tree root
    pub root: u32,
    /// Head of the persisted free list (reserved for a future extension)
    pub free_list: u32,
}

impl Meta {
    /// Create a meta page for a fresh database with the given root
    pub fn new(root: u32) -> Self {
        Self {
            magic: MAGIC,
            root,
            free_list: 0,
        }
    }

    /// Write the meta fields into the first bytes of a page buffer
    pub fn serialize(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.root.to_le_bytes());
        buf[8..12].copy_from_slice(&self.free_list.to_le_bytes());
    }

    /// Read the meta fields back from a page buffer
    pub fn deserialize(buf: &[u8]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            root: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            free_list: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }

    /// Check the magic number
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StoreError::BadMagic { found: self.magic });
        }
        Ok(())
    }
}
