//! Unadorned sector image support.
//!
//! No header at all: just the sectors, concatenated in whatever order the
//! caller says to believe (spec.md §6: "size determines geometry"). The
//! only thing recognition can check is that the byte count is a whole
//! number of 256-byte sectors divisible into a plausible track count, or a
//! whole number of 512-byte blocks in range for ProDOS.

use crate::chunk::{ChunkProvider, Order};
use crate::error::Result;
use crate::notes::Notes;

use super::{new_image, DiskImage, ImageMeta, Kind};

const SECTOR_SIZE: usize = 256;
const BLOCK_SIZE: usize = 512;
const MIN_BLOCKS: usize = 280;
const MAX_BLOCKS: usize = 65535;
const SECTORS_PER_TRACK_525: usize = 16;
const SECTORS_PER_TRACK_D13: usize = 13;

/// True if `len` could plausibly be an unadorned disk image under any
/// supported geometry: 13- or 16-sector 5.25" tracks, or a ProDOS-ordered
/// block count in `[MIN_BLOCKS, MAX_BLOCKS]`.
pub fn plausible_size(len: usize) -> bool {
    if len % BLOCK_SIZE == 0 {
        let blocks = len / BLOCK_SIZE;
        if (MIN_BLOCKS..=MAX_BLOCKS).contains(&blocks) {
            return true;
        }
    }
    if len % SECTOR_SIZE == 0 {
        let sectors = len / SECTOR_SIZE;
        if sectors % SECTORS_PER_TRACK_525 == 0 || sectors % SECTORS_PER_TRACK_D13 == 0 {
            return true;
        }
    }
    false
}

pub fn open(bytes: &[u8], order_hint: Order) -> Result<DiskImage> {
    let mut notes = Notes::new();
    let order = if order_hint == Order::Unknown {
        notes.warn("unadorned image opened without a sector-order hint; left unresolved for the analyzer");
        order_hint
    } else {
        order_hint
    };
    let provider = ChunkProvider::new_ordered(bytes.to_vec(), order, true);
    let meta = ImageMeta::default();
    Ok(new_image(Kind::Unadorned, provider, meta, notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos33_140k_is_plausible() {
        assert!(plausible_size(35 * 16 * 256));
    }

    #[test]
    fn prodos_800k_is_plausible() {
        assert!(plausible_size(1600 * 512));
    }

    #[test]
    fn arbitrary_size_is_not_plausible() {
        assert!(!plausible_size(12345));
    }

    #[test]
    fn open_without_hint_notes_unresolved_order() {
        let image = open(&vec![0u8; 35 * 16 * 256], Order::Unknown).unwrap();
        assert_eq!(image.provider().order(), Order::Unknown);
        assert!(!image.notes.is_empty());
    }
}
