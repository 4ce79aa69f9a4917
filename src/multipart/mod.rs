//! C5 — Multi-partition wrappers.
//!
//! Some containers hold more than one volume: an Apple Partition Map
//! device, a MicroDrive/Focus hard-disk partition table, or a DOS-800K
//! hybrid that packs two 400K DOS 3.3 volumes side by side on one ProDOS-
//! ordered 800K image. Opening one of these yields an [`IMultiPart`]
//! (spec.md §4.5) rather than a filesystem directly; each partition then
//! carries its own block-windowed [`ChunkProvider`] that the analyzer can
//! probe independently.

pub mod apm;
pub mod dos800k;
pub mod microdrive;

use crate::chunk::{ChunkProvider, Order};
use crate::error::{Error, Result};

const BLOCK_SIZE: usize = 512;

/// One partition's extent and (when the scheme names one) label.
#[derive(Clone, Debug)]
pub struct Partition {
    pub name: Option<String>,
    pub partition_type: Option<String>,
    pub start_block: usize,
    pub block_count: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scheme {
    Apm,
    MicroDrive,
    Dos800k,
}

/// A partitioned device: the whole block-ordered backing store plus the
/// partition table parsed out of it. `open_partition` hands back a fresh,
/// independent [`ChunkProvider`] windowed to just that partition's blocks.
pub struct MultiPart {
    pub scheme: Scheme,
    partitions: Vec<Partition>,
    blocks: Vec<u8>,
}

impl MultiPart {
    pub(crate) fn new(scheme: Scheme, partitions: Vec<Partition>, blocks: Vec<u8>) -> Self {
        Self { scheme, partitions, blocks }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn open_partition(&self, index: usize) -> Result<ChunkProvider> {
        let p = self
            .partitions
            .get(index)
            .ok_or_else(|| Error::not_found(format!("no partition at index {index}")))?;
        let start = p.start_block * BLOCK_SIZE;
        let end = start
            .checked_add(p.block_count * BLOCK_SIZE)
            .ok_or_else(|| Error::format("partition window overflows"))?;
        if end > self.blocks.len() {
            return Err(Error::format("partition window runs past end of device"));
        }
        Ok(ChunkProvider::new_ordered(self.blocks[start..end].to_vec(), Order::ProdosBlock, true))
    }
}
