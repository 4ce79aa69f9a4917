//! DiskCopy 4.2 container support.
//!
//! An 84-byte big-endian header: a Pascal string disk name, data/tag fork
//! sizes, data/tag checksums, a format byte pair, and a two-byte magic
//! (`0x0100`) identifying the file as DiskCopy 4.2 rather than some later
//! NDIF/DART variant. The data fork that follows is a flat ProDOS-ordered
//! block image; the tag fork (used only by 3.5" GCR images to carry sector
//! tag bytes) is read but not reinterpreted here.

use crate::chunk::{ChunkProvider, Order};
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{new_image, DiskImage, ImageMeta, Kind};

const HEADER_LEN: usize = 84;
const MAGIC: u16 = 0x0100;

pub fn is_diskcopy42(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_LEN {
        return false;
    }
    let name_len = bytes[0] as usize;
    if name_len > 63 {
        return false;
    }
    let magic = u16::from_be_bytes([bytes[82], bytes[83]]);
    magic == MAGIC
}

#[derive(Clone, Debug, Default)]
pub struct DiskCopyHeader {
    pub disk_name: String,
    pub data_size: u32,
    pub tag_size: u32,
    pub data_checksum: u32,
    pub tag_checksum: u32,
    pub disk_format: u8,
    pub format_byte: u8,
}

fn parse_header(bytes: &[u8]) -> Result<DiskCopyHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::format("DiskCopy header too short"));
    }
    let name_len = bytes[0] as usize;
    if name_len > 63 {
        return Err(Error::format("DiskCopy disk name length out of range"));
    }
    let disk_name = String::from_utf8_lossy(&bytes[1..1 + name_len]).to_string();
    let u32be = |o: usize| u32::from_be_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    Ok(DiskCopyHeader {
        disk_name,
        data_size: u32be(64),
        tag_size: u32be(68),
        data_checksum: u32be(72),
        tag_checksum: u32be(76),
        disk_format: bytes[80],
        format_byte: bytes[81],
    })
}

pub fn open(bytes: &[u8]) -> Result<DiskImage> {
    let header = parse_header(bytes)?;
    let start = HEADER_LEN;
    let end = start.checked_add(header.data_size as usize).ok_or_else(|| Error::format("DiskCopy data size overflows"))?;
    if end > bytes.len() {
        return Err(Error::format("DiskCopy data fork runs past end of file"));
    }
    let payload = bytes[start..end].to_vec();

    let mut notes = Notes::new();
    let mut dubious = false;
    if header.tag_size > 0 {
        notes.warn("DiskCopy tag fork is present but not interpreted by this crate");
        dubious = true;
    }

    let provider = ChunkProvider::new_ordered(payload, Order::ProdosBlock, !dubious);
    let meta = ImageMeta { diskcopy_header: Some(header), dubious, ..Default::default() };
    Ok(new_image(Kind::DiskCopy42, provider, meta, notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_image(name: &str, data: &[u8], tag_size: u32) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[0] = name.len() as u8;
        h[1..1 + name.len()].copy_from_slice(name.as_bytes());
        h[64..68].copy_from_slice(&(data.len() as u32).to_be_bytes());
        h[68..72].copy_from_slice(&tag_size.to_be_bytes());
        h[82..84].copy_from_slice(&MAGIC.to_be_bytes());
        h.extend_from_slice(data);
        h
    }

    #[test]
    fn recognizes_magic() {
        let bytes = make_image("disk", &[0u8; 512], 0);
        assert!(is_diskcopy42(&bytes));
    }

    #[test]
    fn parses_name_and_sizes() {
        let bytes = make_image("boot disk", &[7u8; 512], 0);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.disk_name, "boot disk");
        assert_eq!(header.data_size, 512);
    }

    #[test]
    fn tag_fork_marks_image_dubious() {
        let bytes = make_image("disk", &[0u8; 512], 12);
        let image = open(&bytes).unwrap();
        assert!(image.meta.dubious);
        assert!(!image.provider().writable());
    }
}
