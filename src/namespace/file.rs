//! File entity and layout-id encoding (spec §3 "File", GLOSSARY "Layout id").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{MgmError, MgmResult};
use crate::namespace::container::Timestamp;

/// File layout type (plain, replica, or RAID-like striping).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutType {
    Plain,
    Replica,
    Raid,
}

impl LayoutType {
    fn code(self) -> u8 {
        match self {
            LayoutType::Plain => 0,
            LayoutType::Replica => 1,
            LayoutType::Raid => 2,
        }
    }

    fn from_code(code: u8) -> MgmResult<Self> {
        match code {
            0 => Ok(LayoutType::Plain),
            1 => Ok(LayoutType::Replica),
            2 => Ok(LayoutType::Raid),
            other => Err(MgmError::invalid(format!("unknown layout type code {other}"))),
        }
    }
}

/// Checksum algorithm identifier, used both for whole-file and
/// per-block checksums (spec §3 "layout-id encodes ... checksum
/// algorithm ... block-checksum algorithm").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgo {
    None,
    Crc32,
    Adler32,
    Md5,
    Sha1,
}

impl ChecksumAlgo {
    fn code(self) -> u8 {
        match self {
            ChecksumAlgo::None => 0,
            ChecksumAlgo::Crc32 => 1,
            ChecksumAlgo::Adler32 => 2,
            ChecksumAlgo::Md5 => 3,
            ChecksumAlgo::Sha1 => 4,
        }
    }

    fn from_code(code: u8) -> MgmResult<Self> {
        match code {
            0 => Ok(ChecksumAlgo::None),
            1 => Ok(ChecksumAlgo::Crc32),
            2 => Ok(ChecksumAlgo::Adler32),
            3 => Ok(ChecksumAlgo::Md5),
            4 => Ok(ChecksumAlgo::Sha1),
            other => Err(MgmError::invalid(format!("unknown checksum algo code {other}"))),
        }
    }
}

/// Encoded tuple `(type, stripes, checksum algo, block size, block-checksum
/// algo)` (GLOSSARY "Layout id"). Stored and transmitted as a single
/// `u32`, the way EOS's `mgm.lid` opaque field does (spec §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutId {
    pub kind: LayoutType,
    pub stripes: u8,
    pub checksum_algo: ChecksumAlgo,
    /// Block size in KiB, 0 meaning "no striping".
    pub block_size_kib: u16,
    pub block_checksum_algo: ChecksumAlgo,
}

impl LayoutId {
    pub fn new(kind: LayoutType, stripes: u8, checksum_algo: ChecksumAlgo) -> Self {
        Self { kind, stripes, checksum_algo, block_size_kib: 4096, block_checksum_algo: ChecksumAlgo::None }
    }

    /// Number of stripes a write under this layout must place
    /// (spec §4.5 Placement step 2).
    pub fn stripe_count(&self) -> usize {
        match self.kind {
            LayoutType::Plain => 1,
            LayoutType::Replica | LayoutType::Raid => self.stripes.max(1) as usize,
        }
    }

    /// Replication factor applied to physical-byte quota accounting
    /// (spec §4.3 "Physical bytes apply the layout's replication factor").
    pub fn stripe_factor(&self) -> u64 {
        self.stripe_count() as u64
    }

    /// Packs the tuple into a 32-bit id: `type(4) | stripes(8) |
    /// checksum(4) | block_size_code(8) | block_checksum(4)` bits,
    /// low to high.
    pub fn encode(&self) -> u32 {
        let block_size_code = (self.block_size_kib.min(255)) as u32;
        (self.kind.code() as u32)
            | ((self.stripes as u32) << 4)
            | ((self.checksum_algo.code() as u32) << 12)
            | (block_size_code << 16)
            | ((self.block_checksum_algo.code() as u32) << 24)
    }

    pub fn decode(id: u32) -> MgmResult<Self> {
        let kind = LayoutType::from_code((id & 0xF) as u8)?;
        let stripes = ((id >> 4) & 0xFF) as u8;
        let checksum_algo = ChecksumAlgo::from_code(((id >> 12) & 0xF) as u8)?;
        let block_size_kib = ((id >> 16) & 0xFF) as u16;
        let block_checksum_algo = ChecksumAlgo::from_code(((id >> 24) & 0xF) as u8)?;
        Ok(Self { kind, stripes, checksum_algo, block_size_kib, block_checksum_algo })
    }

    /// Derives the effective layout for a read that only `surviving`
    /// stripes could serve (spec §4.6 step 10).
    pub fn with_surviving_stripes(&self, surviving: usize) -> Self {
        let mut copy = *self;
        copy.stripes = surviving.min(u8::MAX as usize) as u8;
        copy
    }
}

/// A file (spec §3 "File").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: u64,
    pub name: String,
    /// `None` while fully removed; a file in the *unlinked* state keeps
    /// the parent it had at the moment of unlink for audit purposes but
    /// is no longer reachable by path (spec §4.1 `unlinkFile`).
    pub parent_id: Option<u64>,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub size: u64,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub layout_id: LayoutId,
    pub checksum: Vec<u8>,
    pub xattrs: HashMap<String, String>,
    /// File-system ids holding a live replica, in placement order.
    pub locations: Vec<u32>,
    /// File-system ids scheduled for physical deletion.
    pub unlinked_locations: Vec<u32>,
}

impl File {
    pub fn new(id: u64, name: String, parent_id: u64, owner_uid: u32, owner_gid: u32, layout_id: LayoutId) -> Self {
        Self {
            id,
            name,
            parent_id: Some(parent_id),
            owner_uid,
            owner_gid,
            size: 0,
            ctime: Timestamp::now(),
            mtime: Timestamp::now(),
            layout_id,
            checksum: Vec::new(),
            xattrs: HashMap::new(),
            locations: Vec::new(),
            unlinked_locations: Vec::new(),
        }
    }

    /// Physical bytes this file occupies cluster-wide: logical size
    /// times the layout's stripe factor (spec §4.3).
    pub fn physical_size(&self) -> u64 {
        self.size.saturating_mul(self.layout_id.stripe_factor())
    }

    /// spec §8 "Namespace closure": reachable XOR unlinked-with-pending-cleanup.
    pub fn is_reachable(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn is_unlinked_pending_cleanup(&self) -> bool {
        self.parent_id.is_none() && (!self.locations.is_empty() || !self.unlinked_locations.is_empty())
    }

    /// Eligible for final physical `remove` once detached and both
    /// location sets are empty (spec §4.1 `unlinkFile`).
    pub fn eligible_for_remove(&self) -> bool {
        self.parent_id.is_none() && self.locations.is_empty() && self.unlinked_locations.is_empty()
    }
}
