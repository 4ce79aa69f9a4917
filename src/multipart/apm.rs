//! Apple Partition Map (APM) support.
//!
//! Block 0 is an optional driver descriptor; partition map entries start
//! at block 1, one 512-byte entry per partition, each self-describing how
//! many map blocks follow (`pmMapBlkCnt`) so the map can be walked without
//! knowing the partition count up front. Every field is big-endian, as on
//! the 68k Macs this format originated on.

use super::{MultiPart, Partition, Scheme, BLOCK_SIZE};
use crate::error::{Error, Result};

const SIGNATURE: [u8; 2] = [0x50, 0x4d]; // "PM"

pub fn is_apm(bytes: &[u8]) -> bool {
    bytes.len() >= 2 * BLOCK_SIZE && bytes[BLOCK_SIZE..BLOCK_SIZE + 2] == SIGNATURE
}

pub fn open(bytes: &[u8]) -> Result<MultiPart> {
    if !is_apm(bytes) {
        return Err(Error::format("not an Apple Partition Map device"));
    }
    let u32be = |o: usize| u32::from_be_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]) as usize;

    let map_block_count = u32be(BLOCK_SIZE + 4);
    let mut partitions = Vec::new();
    for i in 0..map_block_count {
        let base = (1 + i) * BLOCK_SIZE;
        if base + BLOCK_SIZE > bytes.len() || bytes[base..base + 2] != SIGNATURE {
            break;
        }
        let start_block = u32be(base + 8);
        let block_count = u32be(base + 12);
        let name = String::from_utf8_lossy(&bytes[base + 16..base + 48]).trim_end_matches('\0').to_string();
        let partition_type = String::from_utf8_lossy(&bytes[base + 48..base + 80]).trim_end_matches('\0').to_string();
        partitions.push(Partition {
            name: if name.is_empty() { None } else { Some(name) },
            partition_type: if partition_type.is_empty() { None } else { Some(partition_type) },
            start_block,
            block_count,
        });
    }
    if partitions.is_empty() {
        return Err(Error::format("Apple Partition Map had no usable entries"));
    }
    Ok(MultiPart::new(Scheme::Apm, partitions, bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(map_count: u32, start: u32, count: u32, name: &str, typ: &str) -> Vec<u8> {
        let mut e = vec![0u8; BLOCK_SIZE];
        e[0..2].copy_from_slice(&SIGNATURE);
        e[4..8].copy_from_slice(&map_count.to_be_bytes());
        e[8..12].copy_from_slice(&start.to_be_bytes());
        e[12..16].copy_from_slice(&count.to_be_bytes());
        e[16..16 + name.len()].copy_from_slice(name.as_bytes());
        e[48..48 + typ.len()].copy_from_slice(typ.as_bytes());
        e
    }

    #[test]
    fn parses_single_partition_map() {
        let mut bytes = vec![0u8; BLOCK_SIZE]; // block 0: driver descriptor, unused here
        bytes.extend(make_entry(1, 1, 800, "ProDOS", "Apple_PRODOS"));
        assert!(is_apm(&bytes));
        let mp = open(&bytes).unwrap();
        assert_eq!(mp.partitions().len(), 1);
        assert_eq!(mp.partitions()[0].name.as_deref(), Some("ProDOS"));
        let provider = mp.open_partition(0).unwrap();
        assert_eq!(provider.byte_capacity(), 800 * BLOCK_SIZE);
    }

    #[test]
    fn rejects_missing_signature() {
        let bytes = vec![0u8; 2 * BLOCK_SIZE];
        assert!(!is_apm(&bytes));
    }
}
