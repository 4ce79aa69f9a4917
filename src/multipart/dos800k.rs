//! DOS-800K hybrid support.
//!
//! A handful of ProDOS-ordered 800K 3.5" images pack two independent 400K
//! DOS 3.3 volumes side by side instead of one ProDOS volume, so that a
//! DOS-only machine can see either half as its own disk. There is no
//! header to key off of: recognition is purely "the file is exactly
//! 1600 ProDOS blocks", and opening it always yields exactly two
//! fixed-size, fixed-position partitions.

use super::{MultiPart, Partition, Scheme, BLOCK_SIZE};
use crate::error::{Error, Result};

const HALF_BLOCKS: usize = 800;
const TOTAL_BLOCKS: usize = 2 * HALF_BLOCKS;

pub fn is_dos800k(bytes: &[u8]) -> bool {
    bytes.len() == TOTAL_BLOCKS * BLOCK_SIZE
}

pub fn open(bytes: &[u8]) -> Result<MultiPart> {
    if !is_dos800k(bytes) {
        return Err(Error::format("not an 800K DOS hybrid image"));
    }
    let partitions = vec![
        Partition { name: Some("side A".to_string()), partition_type: None, start_block: 0, block_count: HALF_BLOCKS },
        Partition { name: Some("side B".to_string()), partition_type: None, start_block: HALF_BLOCKS, block_count: HALF_BLOCKS },
    ];
    Ok(MultiPart::new(Scheme::Dos800k, partitions, bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_two_400k_halves() {
        let bytes = vec![0u8; TOTAL_BLOCKS * BLOCK_SIZE];
        assert!(is_dos800k(&bytes));
        let mp = open(&bytes).unwrap();
        assert_eq!(mp.partitions().len(), 2);
        let a = mp.open_partition(0).unwrap();
        let b = mp.open_partition(1).unwrap();
        assert_eq!(a.byte_capacity(), HALF_BLOCKS * BLOCK_SIZE);
        assert_eq!(b.byte_capacity(), HALF_BLOCKS * BLOCK_SIZE);
    }

    #[test]
    fn rejects_wrong_size() {
        let bytes = vec![0u8; 1234];
        assert!(!is_dos800k(&bytes));
    }
}
