//! WOZ1/WOZ2 container support.
//!
//! A WOZ file is a 12-byte header (magic, `0xFF`, `LF CR LF`, CRC-32 over
//! everything that follows) followed by a chunked body: `INFO`/`TMAP`/`TRKS`
//! and an optional `META`. `TMAP` maps each quarter-track to a `TRKS` index
//! (`0xFF` meaning the quarter-track is unused); `TRKS` holds the actual bit
//! streams, one per distinct physical track. WOZ1 stores each track as a
//! fixed 6646-byte record; WOZ2 stores an 8-byte descriptor (starting block,
//! block count, bit count) pointing into a shared block-aligned bit pool.
//!
//! Scope here is 5.25" (35-track, 16-sector, 6-and-2) disks only -- the same
//! scope `NibbleTrack`/`CodecDescriptor` support. 3.5" WOZ (disk35 tag bytes,
//! `disk35`-style bit-cell timing) is out of scope for this crate.

use std::collections::HashMap;

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::nibble::{CircularBitBuffer, CodecDescriptor, NibbleTrack};
use crate::notes::Notes;

use super::{new_image, DiskImage, ImageMeta, Kind};

const INFO_ID: u32 = 0x4f464e49;
const TMAP_ID: u32 = 0x50414d54;
const TRKS_ID: u32 = 0x534b5254;
const META_ID: u32 = 0x4154454d;

const WOZ1_TRACK_BYTE_CAPACITY: usize = 6646;

pub fn is_woz1(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..8] == b"WOZ1\xff\x0a\x0d\x0a"
}

pub fn is_woz2(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..8] == b"WOZ2\xff\x0a\x0d\x0a"
}

/// The subset of `INFO` chunk fields callers might want to inspect or
/// round-trip.
#[derive(Clone, Debug, Default)]
pub struct WozInfo {
    pub version: u8,
    pub disk_type: u8,
    pub write_protected: bool,
    pub synchronized: bool,
    pub cleaned: bool,
    pub creator: String,
    pub disk_sides: u8,
}

struct Chunks {
    info: Option<Vec<u8>>,
    tmap: Option<Vec<u8>>,
    trks: Option<Vec<u8>>,
    meta: Option<Vec<u8>>,
}

fn split_chunks(body: &[u8]) -> Chunks {
    let mut out = Chunks { info: None, tmap: None, trks: None, meta: None };
    let mut ptr = 0usize;
    while ptr + 8 <= body.len() {
        let id = u32::from_le_bytes([body[ptr], body[ptr + 1], body[ptr + 2], body[ptr + 3]]);
        let size = u32::from_le_bytes([body[ptr + 4], body[ptr + 5], body[ptr + 6], body[ptr + 7]]) as usize;
        let data_start = ptr + 8;
        let data_end = data_start + size;
        if data_end > body.len() {
            break;
        }
        let data = body[data_start..data_end].to_vec();
        match id {
            INFO_ID => out.info = Some(data),
            TMAP_ID => out.tmap = Some(data),
            TRKS_ID => out.trks = Some(data),
            META_ID => out.meta = Some(data),
            _ => {}
        }
        ptr = data_end;
    }
    out
}

fn parse_info(chunk: &[u8]) -> WozInfo {
    let creator = if chunk.len() >= 44 {
        String::from_utf8_lossy(&chunk[7..39]).trim_end().to_string()
    } else {
        String::new()
    };
    WozInfo {
        version: chunk.first().copied().unwrap_or(0),
        disk_type: chunk.get(1).copied().unwrap_or(1),
        write_protected: chunk.get(2).copied().unwrap_or(0) != 0,
        synchronized: chunk.get(3).copied().unwrap_or(0) != 0,
        cleaned: chunk.get(4).copied().unwrap_or(0) != 0,
        creator,
        disk_sides: chunk.get(39).copied().unwrap_or(1),
    }
}

fn parse_meta(chunk: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(chunk);
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, '\t');
            let key = parts.next()?.to_string();
            let val = parts.next().unwrap_or("").to_string();
            if key.is_empty() {
                None
            } else {
                Some((key, val))
            }
        })
        .collect()
}

/// Parse a WOZ1 `TRKS` chunk: a flat array of fixed 6656-byte track
/// records, one per `TMAP` slot that is actually in use.
fn tracks_woz1(trks: &[u8], tmap: &[u8]) -> HashMap<usize, NibbleTrack> {
    const RECORD_LEN: usize = WOZ1_TRACK_BYTE_CAPACITY + 2 + 2 + 2 + 1 + 1 + 2;
    let mut tracks = HashMap::new();
    let codec = CodecDescriptor::standard_62();
    for track in 0..35usize {
        let slot = tmap.get(track * 4).copied().unwrap_or(0xff);
        if slot == 0xff {
            continue;
        }
        let base = slot as usize * RECORD_LEN;
        if base + RECORD_LEN > trks.len() {
            continue;
        }
        let bits = &trks[base..base + WOZ1_TRACK_BYTE_CAPACITY];
        let bit_count = u16::from_le_bytes([
            trks[base + WOZ1_TRACK_BYTE_CAPACITY + 2],
            trks[base + WOZ1_TRACK_BYTE_CAPACITY + 3],
        ]) as usize;
        let buf = CircularBitBuffer::from_bytes(bits, bit_count);
        tracks.insert(track, NibbleTrack::new(buf, codec.clone()));
    }
    tracks
}

/// Parse a WOZ2 `TRKS` chunk: 160 8-byte descriptors followed by a block
/// pool, each descriptor naming the starting 512-byte block and length of
/// its track's bits within that pool.
fn tracks_woz2(trks: &[u8], tmap: &[u8]) -> HashMap<usize, NibbleTrack> {
    let mut tracks = HashMap::new();
    let codec = CodecDescriptor::standard_62();
    let descriptors = &trks[..1280.min(trks.len())];
    for track in 0..35usize {
        let slot = tmap.get(track * 4).copied().unwrap_or(0xff);
        if slot == 0xff {
            continue;
        }
        let desc_off = slot as usize * 8;
        if desc_off + 8 > descriptors.len() {
            continue;
        }
        let starting_block = u16::from_le_bytes([descriptors[desc_off], descriptors[desc_off + 1]]) as usize;
        let block_count = u16::from_le_bytes([descriptors[desc_off + 2], descriptors[desc_off + 3]]) as usize;
        let bit_count = u32::from_le_bytes([
            descriptors[desc_off + 4],
            descriptors[desc_off + 5],
            descriptors[desc_off + 6],
            descriptors[desc_off + 7],
        ]) as usize;
        // Block 0 of the pool starts right after the 1280-byte descriptor table.
        let begin = starting_block * 512 - 1280;
        let end = begin + block_count * 512;
        if end > trks.len() || begin > end {
            continue;
        }
        let buf = CircularBitBuffer::from_bytes(&trks[begin..end], bit_count);
        tracks.insert(track, NibbleTrack::new(buf, codec.clone()));
    }
    tracks
}

pub fn open(bytes: &[u8], kind: Kind) -> Result<DiskImage> {
    if bytes.len() < 12 {
        return Err(Error::format("WOZ file too short for header"));
    }
    let header_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let body = &bytes[12..];
    let computed_crc = crc32fast::hash(body);
    let mut notes = Notes::new();
    let mut dubious = false;
    if header_crc != 0 && header_crc != computed_crc {
        notes.warn("WOZ CRC-32 mismatch; image marked dubious and read-only");
        dubious = true;
    }

    let chunks = split_chunks(body);
    let info_chunk = chunks.info.ok_or_else(|| Error::format("WOZ file has no INFO chunk"))?;
    let tmap_chunk = chunks.tmap.ok_or_else(|| Error::format("WOZ file has no TMAP chunk"))?;
    let trks_chunk = chunks.trks.ok_or_else(|| Error::format("WOZ file has no TRKS chunk"))?;

    let info = parse_info(&info_chunk);
    if info.write_protected {
        notes.info("WOZ image is marked write-protected by its creator");
    }

    let tracks = match kind {
        Kind::Woz1 => tracks_woz1(&trks_chunk, &tmap_chunk),
        Kind::Woz2 => tracks_woz2(&trks_chunk, &tmap_chunk),
        _ => unreachable!("woz::open called with a non-WOZ kind"),
    };
    if tracks.is_empty() {
        return Err(Error::format("WOZ file had no usable tracks"));
    }

    let provider = ChunkProvider::new_nibble(tracks, 16, !dubious);
    let meta_pairs = chunks.meta.map(|m| parse_meta(&m));

    let image_meta = ImageMeta {
        woz_info: Some(info),
        woz_meta: meta_pairs,
        dubious,
        ..Default::default()
    };
    let mut image = new_image(kind, provider, image_meta, notes);
    if dubious {
        image.provider_mut().set_access_level(crate::chunk::AccessLevel::ReadOnly);
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    /// Build a minimal, single-track WOZ1 image: one valid quarter-track
    /// slot in `TMAP`, one blank (all-zero data) sector-bearing `TRKS`
    /// record built the same way `nibble::track`'s test helper does.
    fn make_woz1(track: u8, vol: u8) -> Vec<u8> {
        let codec = CodecDescriptor::standard_62();
        let mut bits = bit_vec::BitVec::new();
        let push_bytes = |bits: &mut bit_vec::BitVec, bytes: &[u8]| {
            for byte in bytes {
                for i in (0..8).rev() {
                    bits.push((byte >> i) & 1 != 0);
                }
            }
        };
        push_bytes(&mut bits, &codec.address_prolog);
        push_bytes(&mut bits, &crate::nibble::gcr::encode_44(vol));
        push_bytes(&mut bits, &crate::nibble::gcr::encode_44(track));
        push_bytes(&mut bits, &crate::nibble::gcr::encode_44(0));
        let chk = codec.addr_checksum_seed ^ vol ^ track ^ 0;
        push_bytes(&mut bits, &crate::nibble::gcr::encode_44(chk));
        push_bytes(&mut bits, &codec.address_epilog);
        push_bytes(&mut bits, &codec.data_prolog);
        push_bytes(&mut bits, &crate::nibble::gcr::encode_sector_62(&[0u8; 256], codec.data_checksum_seed));
        push_bytes(&mut bits, &codec.data_epilog);
        let bit_count = bits.len();
        while bits.len() % 8 != 0 {
            bits.push(false);
        }
        let mut record = bits.to_bytes();
        record.resize(WOZ1_TRACK_BYTE_CAPACITY, 0);
        record.extend_from_slice(&(record.len() as u16).to_le_bytes()); // bytes_used (approx)
        record.extend_from_slice(&(bit_count as u16).to_le_bytes());
        record.extend_from_slice(&[0u8; 2]); // splice_point
        record.push(0); // splice_nib
        record.push(0); // splice_bit_count
        record.extend_from_slice(&[0u8; 2]); // pad

        let mut tmap = vec![0xffu8; 160];
        tmap[track as usize * 4] = 0;

        let info = {
            let mut i = vec![0u8; 60];
            i[0] = 1; // version
            i[1] = 1; // disk_type: 5.25"
            i
        };

        let mut body = Vec::new();
        body.extend(chunk(INFO_ID, &info));
        body.extend(chunk(TMAP_ID, &tmap));
        body.extend(chunk(TRKS_ID, &record));

        let mut out = Vec::new();
        out.extend_from_slice(b"WOZ1\xff\x0a\x0d\x0a");
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend(body);
        out
    }

    #[test]
    fn recognizes_woz1_magic() {
        let bytes = make_woz1(0, 254);
        assert!(is_woz1(&bytes));
        assert!(!is_woz2(&bytes));
    }

    #[test]
    fn open_reads_back_blank_sector() {
        let bytes = make_woz1(2, 254);
        let mut image = open(&bytes, Kind::Woz1).unwrap();
        assert!(!image.meta.dubious);
        let sector = image.provider_mut().read_sector(2, 0).unwrap();
        assert_eq!(sector, vec![0u8; 256]);
    }

    #[test]
    fn corrupted_crc_marks_image_dubious_and_read_only() {
        let mut bytes = make_woz1(1, 254);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let image = open(&bytes, Kind::Woz1).unwrap();
        assert!(image.meta.dubious);
        assert_eq!(image.provider().access_level(), crate::chunk::AccessLevel::ReadOnly);
    }

    #[test]
    fn meta_chunk_round_trips_key_value_pairs() {
        let pairs = parse_meta(b"language\tEnglish\nrequires_ram\t64K\n");
        assert_eq!(pairs, vec![
            ("language".to_string(), "English".to_string()),
            ("requires_ram".to_string(), "64K".to_string()),
        ]);
    }
}
