//! Focus/MicroDrive hard-disk partition table support.
//!
//! Block 0 carries a fixed-count table of up to 8 partition entries (name,
//! start block, block count); unused slots are zeroed. There is no magic
//! number of its own, so recognition leans on internal consistency: at
//! least one non-zero entry, and every entry's extent fitting inside the
//! device.

use super::{MultiPart, Partition, Scheme, BLOCK_SIZE};
use crate::error::{Error, Result};

const MAX_ENTRIES: usize = 8;
const ENTRY_LEN: usize = 32;
const NAME_LEN: usize = 24;

fn entry_at(bytes: &[u8], i: usize) -> Option<(String, usize, usize)> {
    let base = i * ENTRY_LEN;
    if base + ENTRY_LEN > bytes.len() {
        return None;
    }
    let start = u32::from_be_bytes([bytes[base + 24], bytes[base + 25], bytes[base + 26], bytes[base + 27]]) as usize;
    let count = u32::from_be_bytes([bytes[base + 28], bytes[base + 29], bytes[base + 30], bytes[base + 31]]) as usize;
    if start == 0 && count == 0 {
        return None;
    }
    let name = String::from_utf8_lossy(&bytes[base..base + NAME_LEN]).trim_end_matches('\0').to_string();
    Some((name, start, count))
}

pub fn is_microdrive(bytes: &[u8]) -> bool {
    if bytes.len() < BLOCK_SIZE {
        return false;
    }
    let table = &bytes[0..BLOCK_SIZE];
    let mut any = false;
    for i in 0..MAX_ENTRIES {
        if let Some((_, start, count)) = entry_at(table, i) {
            any = true;
            let end_block = start.saturating_add(count);
            if end_block * BLOCK_SIZE > bytes.len() {
                return false;
            }
        }
    }
    any
}

pub fn open(bytes: &[u8]) -> Result<MultiPart> {
    if !is_microdrive(bytes) {
        return Err(Error::format("not a MicroDrive partition table"));
    }
    let table = &bytes[0..BLOCK_SIZE];
    let mut partitions = Vec::new();
    for i in 0..MAX_ENTRIES {
        if let Some((name, start, count)) = entry_at(table, i) {
            partitions.push(Partition {
                name: if name.is_empty() { None } else { Some(name) },
                partition_type: None,
                start_block: start,
                block_count: count,
            });
        }
    }
    Ok(MultiPart::new(Scheme::MicroDrive, partitions, bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table(entries: &[(&str, u32, u32)]) -> Vec<u8> {
        let mut table = vec![0u8; BLOCK_SIZE];
        for (i, (name, start, count)) in entries.iter().enumerate() {
            let base = i * ENTRY_LEN;
            table[base..base + name.len()].copy_from_slice(name.as_bytes());
            table[base + 24..base + 28].copy_from_slice(&start.to_be_bytes());
            table[base + 28..base + 32].copy_from_slice(&count.to_be_bytes());
        }
        table
    }

    #[test]
    fn parses_two_partitions() {
        let mut bytes = make_table(&[("VOL1", 1, 400), ("VOL2", 401, 400)]);
        bytes.extend(vec![0u8; 801 * BLOCK_SIZE]);
        assert!(is_microdrive(&bytes));
        let mp = open(&bytes).unwrap();
        assert_eq!(mp.partitions().len(), 2);
        assert_eq!(mp.partitions()[1].start_block, 401);
    }

    #[test]
    fn rejects_all_zero_table() {
        let bytes = vec![0u8; BLOCK_SIZE];
        assert!(!is_microdrive(&bytes));
    }
}
