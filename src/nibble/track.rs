//! Circular bit buffer and the nibble track model built on top of it.
//!
//! A real floppy track has no beginning or end; reading past the last bit
//! wraps back to the first. `CircularBitBuffer` models that with a
//! `bit_vec::BitVec` and a soft-latch read cursor, following the shape of
//! `a2kit`'s `img::disk525::TrackBits` (itself adapted from CiderPress).
//! `NibbleTrack` adds the address/data field search used to locate a given
//! `(track, sector)` by latch-sequence scan (spec.md §4.2).

use bit_vec::BitVec;

use super::gcr::{decode_44, decode_sector_62, encode_44, encode_sector_62};
use super::{CodecDescriptor, Encoding, Error};

/// A track's raw bit stream, addressable modulo its length -- i.e. a
/// circular buffer of bits rather than bytes.
#[derive(Clone)]
pub struct CircularBitBuffer {
    bits: BitVec,
    read_ptr: usize,
}

impl CircularBitBuffer {
    pub fn new(bits: BitVec) -> Self {
        assert!(!bits.is_empty(), "a track must have at least one bit");
        Self { bits, read_ptr: 0 }
    }

    pub fn from_bytes(bytes: &[u8], bit_count: usize) -> Self {
        let mut bits = BitVec::from_bytes(bytes);
        bits.truncate(bit_count);
        Self::new(bits)
    }

    pub fn bit_count(&self) -> usize {
        self.bits.len()
    }

    pub fn reset(&mut self) {
        self.read_ptr = 0;
    }

    fn next_bit(&mut self) -> bool {
        let b = self.bits[self.read_ptr];
        self.read_ptr = (self.read_ptr + 1) % self.bits.len();
        b
    }

    /// Read `n` bytes via the soft latch.
    fn read_latched(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_latch_byte_full());
        }
        out
    }

    /// Full soft-latch byte read: skip leading zero bits, then accumulate
    /// exactly 8 bits starting from the first 1-bit.
    fn read_latch_byte_full(&mut self) -> u8 {
        let mut bit = self.next_bit();
        while !bit {
            bit = self.next_bit();
        }
        let mut byte: u8 = 1;
        for _ in 0..7 {
            byte = (byte << 1) | (self.next_bit() as u8);
        }
        byte
    }

    /// Scan forward (circularly, at most one full revolution) until `pattern`
    /// is matched byte-for-byte through the soft latch.
    pub fn find_byte_pattern(&mut self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() {
            return Some(0);
        }
        let mut matched = 0usize;
        for tries in 0..self.bits.len() {
            let byte = self.read_latch_byte_full();
            if byte == pattern[matched] {
                matched += 1;
            } else {
                matched = 0;
                if byte == pattern[0] {
                    matched = 1;
                }
            }
            if matched == pattern.len() {
                return Some(tries + 1);
            }
        }
        None
    }

    pub fn write_bits(&mut self, bits: &BitVec) {
        for b in bits.iter() {
            let pos = self.read_ptr;
            self.bits.set(pos, b);
            self.read_ptr = (self.read_ptr + 1) % self.bits.len();
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let mut bv = BitVec::from_bytes(bytes);
        // from_bytes always yields a multiple of 8 bits, which is what we want
        bv.truncate(bytes.len() * 8);
        self.write_bits(&bv);
    }
}

/// A single physical track: raw bits plus the codec used to interpret it.
#[derive(Clone)]
pub struct NibbleTrack {
    pub bits: CircularBitBuffer,
    pub codec: CodecDescriptor,
    unreadable: usize,
}

impl NibbleTrack {
    pub fn new(bits: CircularBitBuffer, codec: CodecDescriptor) -> Self {
        Self { bits, codec, unreadable: 0 }
    }

    pub fn unreadable_count(&self) -> usize {
        self.unreadable
    }

    /// Locate the address field for `(track, sector)`, returning the
    /// encoded volume number on success. Tries at most 32 revolutions'
    /// worth of address fields, mirroring `a2kit`'s `find_sector_data`.
    fn seek_address(&mut self, track: u8, sector: u8) -> Result<u8, Error> {
        for _attempt in 0..32 {
            self.bits.find_byte_pattern(&self.codec.address_prolog).ok_or(Error::BitPatternNotFound)?;
            let raw = self.bits.read_latched(8);
            let vol = decode_44([raw[0], raw[1]]);
            let got_track = decode_44([raw[2], raw[3]]);
            let got_sector = decode_44([raw[4], raw[5]]);
            let chksum = decode_44([raw[6], raw[7]]);
            let check = self.codec.addr_checksum_seed ^ vol ^ got_track ^ got_sector ^ chksum;
            if self.codec.do_test_addr_track && got_track != track {
                continue;
            }
            if self.codec.do_test_addr_checksum && check != 0 {
                continue;
            }
            let epilog = &self.codec.address_epilog[..self.codec.addr_epilog_read_count];
            if self.bits.find_byte_pattern(epilog).is_none() {
                continue;
            }
            if got_sector != sector {
                continue;
            }
            return Ok(vol);
        }
        Err(Error::SectorNotFound)
    }

    /// Read and decode the 256-byte sector at `(track, sector)`.
    pub fn read_sector(&mut self, track: u8, sector: u8) -> Result<[u8; 256], Error> {
        self.seek_address(track, sector)?;
        self.bits.find_byte_pattern(&self.codec.data_prolog).ok_or(Error::BitPatternNotFound)?;
        match self.codec.encoding {
            Encoding::Enc62 => {
                let raw = self.bits.read_latched(343);
                let arr: [u8; 343] = raw.try_into().map_err(|_| Error::InvalidByte)?;
                match decode_sector_62(&arr, self.codec.data_checksum_seed) {
                    Ok(s) => Ok(s),
                    Err(e) => {
                        self.unreadable += 1;
                        Err(e)
                    }
                }
            }
            Encoding::Enc53 => {
                // 5-and-3 decode is not needed by any in-scope format beyond
                // DOS 3.2, which this crate treats read-mostly; report
                // unreadable rather than guess at a lossy reconstruction.
                self.unreadable += 1;
                Err(Error::InvalidByte)
            }
        }
    }

    /// Re-encode a single sector's data field in place, without disturbing
    /// any other bits on the track (spec.md §4.1: "a write re-encodes only
    /// the affected sector").
    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8; 256]) -> Result<(), Error> {
        self.seek_address(track, sector)?;
        self.bits.find_byte_pattern(&self.codec.data_prolog).ok_or(Error::BitPatternNotFound)?;
        let encoded = encode_sector_62(data, self.codec.data_checksum_seed);
        self.bits.write_bytes(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_blank_track(codec: CodecDescriptor, vol: u8, track: u8) -> NibbleTrack {
        // Build a track with sync gaps and 16 valid sectors, following
        // a2kit's `create_track`.
        let mut bits = BitVec::new();
        let push_sync = |bits: &mut BitVec, n: usize| {
            for _ in 0..n {
                for b in [true, true, true, true, true, true, true, true, false, false] {
                    bits.push(b);
                }
            }
        };
        let push_bytes = |bits: &mut BitVec, bytes: &[u8]| {
            for byte in bytes {
                for i in (0..8).rev() {
                    bits.push((byte >> i) & 1 != 0);
                }
            }
        };
        push_sync(&mut bits, 40);
        for sector in 0..16u8 {
            push_bytes(&mut bits, &codec.address_prolog);
            push_bytes(&mut bits, &encode_44(vol));
            push_bytes(&mut bits, &encode_44(track));
            push_bytes(&mut bits, &encode_44(sector));
            let chk = codec.addr_checksum_seed ^ vol ^ track ^ sector;
            push_bytes(&mut bits, &encode_44(chk));
            push_bytes(&mut bits, &codec.address_epilog);
            push_sync(&mut bits, 6);
            push_bytes(&mut bits, &codec.data_prolog);
            let zeros = [0u8; 256];
            push_bytes(&mut bits, &encode_sector_62(&zeros, codec.data_checksum_seed));
            push_bytes(&mut bits, &codec.data_epilog);
            push_sync(&mut bits, 10);
        }
        let len = bits.len();
        let buf = CircularBitBuffer::new({
            let mut b = bits;
            // pad to byte boundary
            while b.len() % 8 != 0 {
                b.push(false);
            }
            b.truncate(len.max(b.len()));
            b
        });
        NibbleTrack::new(buf, codec)
    }

    #[test]
    fn read_back_blank_sector() {
        let codec = CodecDescriptor::standard_62();
        let mut track = make_blank_track(codec, 254, 0);
        let data = track.read_sector(0, 5).unwrap();
        assert_eq!(data, [0u8; 256]);
    }

    #[test]
    fn write_then_read_sector() {
        let codec = CodecDescriptor::standard_62();
        let mut track = make_blank_track(codec, 254, 3);
        let mut payload = [0u8; 256];
        payload[0] = 0xaa;
        payload[255] = 0x55;
        track.write_sector(3, 2, &payload).unwrap();
        let readback = track.read_sector(3, 2).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn custom_codec_override() {
        let codec = CodecDescriptor::test_s_d5aa97();
        let mut track = make_blank_track(codec, 1, 1);
        let data = track.read_sector(1, 0).unwrap();
        assert_eq!(data, [0u8; 256]);
    }
}
