//! C3 — Chunk access.
//!
//! Presents logical sectors (256 B) and/or blocks (512 B) over either an
//! ordered byte image or a nibble-encoded track set, per spec.md §4.1.
//! Every sector address is translated to a byte offset (or a nibble-track
//! lookup) via a per-order table; an unknown order is illegal for access.

use crate::error::{Error, Result};
use crate::nibble::NibbleTrack;
use std::collections::HashMap;

/// Sector order a chunk provider is interpreting its backing bytes as.
/// `Unknown` is a legal value to hold but illegal to access through --
/// the analyzer (C8) is responsible for resolving it before binding a
/// filesystem.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Order {
    DosSector,
    ProdosBlock,
    Physical,
    CpmKBlock,
    Unknown,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessLevel {
    Open,
    ReadOnly,
    Closed,
}

/// Address of one chunk: either a `(track, sector)` pair or a flat block
/// index, as named in spec.md §3.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ChunkSpec {
    Sector { track: usize, sector: usize },
    Block(usize),
}

/// Standard DOS 3.3 logical-to-physical sector skew table (spec.md
/// glossary: T/S list addressing assumes this has already been applied).
pub const DOS_LSEC_TO_PSEC: [usize; 16] = [0, 13, 11, 9, 7, 5, 3, 1, 14, 12, 10, 8, 6, 4, 2, 15];
pub const DOS_PSEC_TO_LSEC: [usize; 16] = [0, 7, 14, 6, 13, 5, 12, 4, 11, 3, 10, 2, 9, 1, 8, 15];

/// Map a ProDOS block number to the pair of (track, physical-sector)
/// addresses that hold its two halves on a 16-sector DOS-ordered image.
pub fn block_to_physical_ts(block: usize) -> ([usize; 2], [usize; 2]) {
    const SEC1: [usize; 8] = [0, 13, 11, 9, 7, 5, 3, 1];
    const SEC2: [usize; 8] = [14, 12, 10, 8, 6, 4, 2, 15];
    let track = block / 8;
    (
        [track, SEC1[block % 8]],
        [track, SEC2[block % 8]],
    )
}

/// Inverse of [`block_to_physical_ts`]: given a physical `(track, sector)`,
/// return the block number and the byte offset (0 or 256) within it.
pub fn physical_ts_to_block(track: usize, physical_sector: usize) -> (usize, usize) {
    const BLOCK_OFFSET: [usize; 16] = [0, 7, 6, 6, 5, 5, 4, 4, 3, 3, 2, 2, 1, 1, 0, 7];
    const BYTE_OFFSET: [usize; 16] = [0, 0, 256, 0, 256, 0, 256, 0, 256, 0, 256, 0, 256, 0, 256, 256];
    (8 * track + BLOCK_OFFSET[physical_sector], BYTE_OFFSET[physical_sector])
}

/// Backing storage behind a chunk provider: either a flat ordered byte
/// image, or a set of nibble-encoded tracks.
#[derive(Clone)]
pub enum Backing {
    Ordered(Vec<u8>),
    Nibble { tracks: HashMap<usize, NibbleTrack>, sectors_per_track: usize },
}

/// Reads and writes fixed-size sectors/blocks through ordered or
/// nibble-encoded media, gated by an access level.
#[derive(Clone)]
pub struct ChunkProvider {
    backing: Backing,
    order: Order,
    writable: bool,
    access_level: AccessLevel,
    unreadable: usize,
}

impl ChunkProvider {
    pub fn new_ordered(data: Vec<u8>, order: Order, writable: bool) -> Self {
        Self {
            backing: Backing::Ordered(data),
            order,
            writable,
            access_level: AccessLevel::Open,
            unreadable: 0,
        }
    }

    pub fn new_nibble(tracks: HashMap<usize, NibbleTrack>, sectors_per_track: usize, writable: bool) -> Self {
        Self {
            backing: Backing::Nibble { tracks, sectors_per_track },
            order: Order::Physical,
            writable,
            access_level: AccessLevel::Open,
            unreadable: 0,
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Reinterpret the same backing bytes under a different sector order.
    /// Used by the analyzer (C8) to probe candidate orders without
    /// re-reading the source stream.
    pub fn set_order(&mut self, order: Order) {
        self.order = order;
    }
    pub fn writable(&self) -> bool {
        self.writable
    }
    pub fn access_level(&self) -> AccessLevel {
        self.access_level
    }
    pub fn count_unreadable_chunks(&self) -> usize {
        self.unreadable
    }

    /// A filesystem entering file-access mode downgrades the provider to
    /// `ReadOnly`; a raw write afterward is a programming error, per
    /// spec.md §3 invariants and §5 "Shared-resource policy".
    pub fn set_access_level(&mut self, level: AccessLevel) {
        self.access_level = level;
    }

    fn ensure_open_for_write(&self) -> Result<()> {
        match self.access_level {
            AccessLevel::Open => Ok(()),
            AccessLevel::ReadOnly => Err(Error::io_failure("chunk provider is read-only")),
            AccessLevel::Closed => Err(Error::io_failure("chunk provider is closed")),
        }
    }

    fn byte_offset(&self, spec: ChunkSpec, chunk_len: usize) -> Result<usize> {
        if self.order == Order::Unknown {
            return Err(Error::arg("sector order is unknown; cannot translate address"));
        }
        match spec {
            ChunkSpec::Block(b) => Ok(b * chunk_len),
            ChunkSpec::Sector { track, sector } => {
                let logical = match self.order {
                    Order::DosSector => sector,
                    Order::Physical => DOS_PSEC_TO_LSEC[sector],
                    _ => return Err(Error::arg("sector addressing requires DOS or physical order")),
                };
                Ok(track * 16 * chunk_len + logical * chunk_len)
            }
        }
    }

    pub fn read_sector(&mut self, track: usize, sector: usize) -> Result<Vec<u8>> {
        match &mut self.backing {
            Backing::Ordered(data) => {
                let off = self.byte_offset(ChunkSpec::Sector { track, sector }, 256)?;
                if off + 256 > data.len() {
                    return Err(Error::not_found("sector out of range"));
                }
                Ok(data[off..off + 256].to_vec())
            }
            Backing::Nibble { tracks, .. } => {
                let t = tracks.get_mut(&track).ok_or_else(|| Error::not_found("track out of range"))?;
                let physical = DOS_LSEC_TO_PSEC[sector];
                match t.read_sector(track as u8, physical as u8) {
                    Ok(s) => Ok(s.to_vec()),
                    Err(_) => {
                        self.unreadable += 1;
                        Err(Error::io_failure("unable to access sector"))
                    }
                }
            }
        }
    }

    pub fn write_sector(&mut self, track: usize, sector: usize, buf: &[u8]) -> Result<()> {
        self.ensure_open_for_write()?;
        if !self.writable {
            return Err(Error::io_failure("chunk provider is not writable"));
        }
        match &mut self.backing {
            Backing::Ordered(data) => {
                let off = self.byte_offset(ChunkSpec::Sector { track, sector }, 256)?;
                if off + 256 > data.len() {
                    return Err(Error::not_found("sector out of range"));
                }
                data[off..off + 256].copy_from_slice(&buf[..256]);
                Ok(())
            }
            Backing::Nibble { tracks, .. } => {
                let t = tracks.get_mut(&track).ok_or_else(|| Error::not_found("track out of range"))?;
                let physical = DOS_LSEC_TO_PSEC[sector];
                let mut arr = [0u8; 256];
                arr.copy_from_slice(&buf[..256]);
                t.write_sector(track as u8, physical as u8, &arr).map_err(|_| Error::io_failure("unable to write sector"))
            }
        }
    }

    pub fn read_block(&mut self, block: usize) -> Result<Vec<u8>> {
        match &mut self.backing {
            Backing::Ordered(data) => {
                let off = self.byte_offset(ChunkSpec::Block(block), 512)?;
                if off + 512 > data.len() {
                    return Err(Error::not_found("block out of range"));
                }
                Ok(data[off..off + 512].to_vec())
            }
            Backing::Nibble { .. } => {
                let (ts1, ts2) = block_to_physical_ts(block);
                let mut out = Vec::with_capacity(512);
                out.extend(self.read_sector_physical(ts1[0], ts1[1])?);
                out.extend(self.read_sector_physical(ts2[0], ts2[1])?);
                Ok(out)
            }
        }
    }

    fn read_sector_physical(&mut self, track: usize, physical_sector: usize) -> Result<Vec<u8>> {
        match &mut self.backing {
            Backing::Nibble { tracks, .. } => {
                let t = tracks.get_mut(&track).ok_or_else(|| Error::not_found("track out of range"))?;
                match t.read_sector(track as u8, physical_sector as u8) {
                    Ok(s) => Ok(s.to_vec()),
                    Err(_) => {
                        self.unreadable += 1;
                        Err(Error::io_failure("unable to access sector"))
                    }
                }
            }
            Backing::Ordered(_) => unreachable!("only called on nibble backing"),
        }
    }

    pub fn write_block(&mut self, block: usize, buf: &[u8]) -> Result<()> {
        self.ensure_open_for_write()?;
        if !self.writable {
            return Err(Error::io_failure("chunk provider is not writable"));
        }
        match &mut self.backing {
            Backing::Ordered(data) => {
                let off = self.byte_offset(ChunkSpec::Block(block), 512)?;
                if off + 512 > data.len() {
                    return Err(Error::not_found("block out of range"));
                }
                data[off..off + 512].copy_from_slice(&buf[..512]);
                Ok(())
            }
            Backing::Nibble { .. } => {
                let (ts1, ts2) = block_to_physical_ts(block);
                let t0 = tracks_get(self, ts1[0])?;
                let mut a = [0u8; 256];
                a.copy_from_slice(&buf[..256]);
                t0.write_sector(ts1[0] as u8, ts1[1] as u8, &a).map_err(|_| Error::io_failure("unable to write sector"))?;
                let t1 = tracks_get(self, ts2[0])?;
                let mut b = [0u8; 256];
                b.copy_from_slice(&buf[256..512]);
                t1.write_sector(ts2[0] as u8, ts2[1] as u8, &b).map_err(|_| Error::io_failure("unable to write sector"))
            }
        }
    }

    /// Probe whether a given sector is currently readable and whether the
    /// provider would accept a write to it.
    pub fn test_sector(&mut self, track: usize, sector: usize) -> (bool, bool) {
        let readable = self.read_sector(track, sector).is_ok();
        let writable = self.writable && self.access_level == AccessLevel::Open;
        (readable, writable)
    }

    pub fn byte_capacity(&self) -> usize {
        match &self.backing {
            Backing::Ordered(data) => data.len(),
            Backing::Nibble { tracks, sectors_per_track } => tracks.len() * sectors_per_track * 256,
        }
    }

    /// The raw ordered bytes backing this provider, for the analyzer (C8)
    /// to re-wrap under a different candidate order. `None` for
    /// nibble-encoded media, which carries a fixed physical order.
    pub fn ordered_bytes(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Ordered(data) => Some(data),
            Backing::Nibble { .. } => None,
        }
    }
}

/// Helper to route a mutable-borrow-of-self requirement around the
/// `Backing::Nibble` arm without fighting the borrow checker over double
/// mutable access in `write_block`.
fn tracks_get(provider: &mut ChunkProvider, track: usize) -> Result<&mut NibbleTrack> {
    match &mut provider.backing {
        Backing::Nibble { tracks, .. } => tracks.get_mut(&track).ok_or_else(|| Error::not_found("track out of range")),
        Backing::Ordered(_) => unreachable!("only called on nibble backing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_sector_round_trip() {
        let mut prov = ChunkProvider::new_ordered(vec![0u8; 35 * 16 * 256], Order::DosSector, true);
        let payload = vec![7u8; 256];
        prov.write_sector(1, 3, &payload).unwrap();
        let read = prov.read_sector(1, 3).unwrap();
        assert_eq!(read, payload);
    }

    #[test]
    fn block_round_trip() {
        let mut prov = ChunkProvider::new_ordered(vec![0u8; 280 * 512], Order::ProdosBlock, true);
        let payload = vec![9u8; 512];
        prov.write_block(5, &payload).unwrap();
        assert_eq!(prov.read_block(5).unwrap(), payload);
    }

    #[test]
    fn read_only_rejects_write() {
        let mut prov = ChunkProvider::new_ordered(vec![0u8; 512], Order::ProdosBlock, true);
        prov.set_access_level(AccessLevel::ReadOnly);
        assert!(prov.write_block(0, &vec![1u8; 512]).is_err());
    }

    #[test]
    fn unknown_order_is_illegal_for_sector_access() {
        let mut prov = ChunkProvider::new_ordered(vec![0u8; 35 * 16 * 256], Order::Unknown, true);
        assert!(prov.read_sector(0, 0).is_err());
    }
}
