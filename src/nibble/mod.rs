//! C2 — Nibble codec.
//!
//! GCR encode/decode plus the address/data field framing used by 5.25" and
//! 3.5" Apple disks. [`CodecDescriptor`] is the configurable part named in
//! spec.md §4.2: prolog/epilog bytes, checksum seeds, and which checks to
//! run. A custom codec can override any of these -- the standard test
//! codec below (`s_d5aa97`) exercises exactly that override path.

pub mod gcr;
pub mod track;

pub use track::{CircularBitBuffer, NibbleTrack};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid byte while decoding a nibble field")]
    InvalidByte,
    #[error("bad checksum found in a sector")]
    BadChecksum,
    #[error("could not find bit pattern")]
    BitPatternNotFound,
    #[error("track mismatch in address field")]
    TrackMismatch,
    #[error("sector not found on track")]
    SectorNotFound,
}

/// Which bit-width nibblization a data field uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Encoding {
    /// 6-and-2 GCR, used by DOS 3.3/ProDOS 5.25" and all 3.5" disks.
    Enc62,
    /// 5-and-3 GCR, used by the older DOS 3.2 13-sector format.
    Enc53,
}

/// Fully describes how to find and validate a sector's address and data
/// fields on a nibble track. Field names follow spec.md §4.2 exactly.
#[derive(Clone, Debug)]
pub struct CodecDescriptor {
    pub address_prolog: [u8; 3],
    pub address_epilog: [u8; 3],
    pub data_prolog: [u8; 3],
    pub data_epilog: [u8; 3],
    pub addr_epilog_read_count: usize,
    pub data_epilog_read_count: usize,
    pub addr_checksum_seed: u8,
    pub data_checksum_seed: u8,
    pub do_test_addr_track: bool,
    pub do_test_addr_checksum: bool,
    pub do_test_data_checksum: bool,
    pub encoding: Encoding,
}

impl CodecDescriptor {
    /// The standard Apple DOS 3.3 / ProDOS 5.25" 6-and-2 codec.
    pub fn standard_62() -> Self {
        Self {
            address_prolog: [0xd5, 0xaa, 0x96],
            address_epilog: [0xde, 0xaa, 0xeb],
            data_prolog: [0xd5, 0xaa, 0xad],
            data_epilog: [0xde, 0xaa, 0xeb],
            addr_epilog_read_count: 2,
            data_epilog_read_count: 2,
            addr_checksum_seed: 0x00,
            data_checksum_seed: 0x00,
            do_test_addr_track: true,
            do_test_addr_checksum: true,
            do_test_data_checksum: true,
            encoding: Encoding::Enc62,
        }
    }

    /// Non-standard test codec used to exercise the override path: prolog
    /// `D5 AA 97` / epilog `DE AA EB`, checksum seed 0xff for the address
    /// field and 0x3f for the data field (spec.md §4.2).
    pub fn test_s_d5aa97() -> Self {
        Self {
            address_prolog: [0xd5, 0xaa, 0x97],
            address_epilog: [0xde, 0xaa, 0xeb],
            data_prolog: [0xd5, 0xaa, 0x97],
            data_epilog: [0xde, 0xaa, 0xeb],
            addr_epilog_read_count: 2,
            data_epilog_read_count: 2,
            addr_checksum_seed: 0xff,
            data_checksum_seed: 0x3f,
            do_test_addr_track: true,
            do_test_addr_checksum: true,
            do_test_data_checksum: true,
            encoding: Encoding::Enc62,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_distinct() {
        let std_codec = CodecDescriptor::standard_62();
        let test_codec = CodecDescriptor::test_s_d5aa97();
        assert_ne!(std_codec.address_prolog, test_codec.address_prolog);
        assert_ne!(std_codec.addr_checksum_seed, test_codec.addr_checksum_seed);
    }
}
