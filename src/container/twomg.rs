//! 2MG (`2IMG`) container support.
//!
//! A fixed 64-byte little-endian header (`header_len` is nominally 64 but is
//! honored if larger) names the wrapped image's format -- DOS-ordered,
//! ProDOS-ordered, or raw nibble -- plus optional comment/creator trailers.
//! This crate only wraps the DOS- and ProDOS-ordered cases; a `img_fmt` of
//! `2` (nibble) is rejected since the chunk layer's nibble backing is built
//! from WOZ tracks, not a bare NIB dump.

use crate::chunk::{ChunkProvider, Order};
use crate::error::{Error, Result};
use crate::notes::Notes;

use super::{new_image, DiskImage, ImageMeta, Kind};

const HEADER_LEN: usize = 64;

pub fn is_2mg(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN && &bytes[0..4] == b"2IMG"
}

#[derive(Clone, Debug, Default)]
pub struct TwoMgHeader {
    pub creator_id: [u8; 4],
    pub version: u16,
    pub img_fmt: u32,
    pub flags: u32,
    pub blocks: u32,
    pub data_offset: u32,
    pub data_len: u32,
    pub comment_offset: u32,
    pub comment_len: u32,
    pub creator_offset: u32,
    pub creator_len: u32,
}

fn parse_header(bytes: &[u8]) -> Result<TwoMgHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::format("2MG header too short"));
    }
    let u16le = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
    let u32le = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    Ok(TwoMgHeader {
        creator_id: [bytes[4], bytes[5], bytes[6], bytes[7]],
        version: u16le(10),
        img_fmt: u32le(12),
        flags: u32le(16),
        blocks: u32le(20),
        data_offset: u32le(24),
        data_len: u32le(28),
        comment_offset: u32le(32),
        comment_len: u32le(36),
        creator_offset: u32le(40),
        creator_len: u32le(44),
    })
}

/// Determine the sector order the wrapped payload should be interpreted
/// with, from `img_fmt` alone (0 = DOS order, 1 = ProDOS order).
pub fn peek_order(bytes: &[u8]) -> Result<Order> {
    let header = parse_header(bytes)?;
    match header.img_fmt {
        0 => Ok(Order::DosSector),
        1 => Ok(Order::ProdosBlock),
        2 => Err(Error::format("2MG nibble image format is not supported")),
        other => Err(Error::format(format!("2MG unrecognized img_fmt {other}"))),
    }
}

pub fn open(bytes: &[u8]) -> Result<DiskImage> {
    let header = parse_header(bytes)?;
    let order = peek_order(bytes)?;
    let start = header.data_offset as usize;
    let len = header.data_len as usize;
    let end = start.checked_add(len).ok_or_else(|| Error::format("2MG data region overflows"))?;
    if end > bytes.len() {
        return Err(Error::format("2MG data region runs past end of file"));
    }
    let payload = bytes[start..end].to_vec();
    let mut notes = Notes::new();
    let write_protected = header.flags & 0x8000_0000 != 0;
    if write_protected {
        notes.info("2MG header marks the disk write-protected");
    }
    let provider = ChunkProvider::new_ordered(payload, order, !write_protected);
    let meta = ImageMeta { twomg_header: Some(header), ..Default::default() };
    Ok(new_image(Kind::TwoMg, provider, meta, notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(img_fmt: u32, data_len: u32, flags: u32) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[0..4].copy_from_slice(b"2IMG");
        h[4..8].copy_from_slice(b"ORCH");
        h[10..12].copy_from_slice(&1u16.to_le_bytes());
        h[12..16].copy_from_slice(&img_fmt.to_le_bytes());
        h[16..20].copy_from_slice(&flags.to_le_bytes());
        h[24..28].copy_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        h[28..32].copy_from_slice(&data_len.to_le_bytes());
        h
    }

    #[test]
    fn recognizes_magic() {
        let bytes = make_header(1, 512, 0);
        assert!(is_2mg(&bytes));
    }

    #[test]
    fn img_fmt_selects_order() {
        let mut bytes = make_header(0, 512, 0);
        bytes.extend(vec![0u8; 512]);
        assert_eq!(peek_order(&bytes).unwrap(), Order::DosSector);

        let mut bytes = make_header(1, 512, 0);
        bytes.extend(vec![0u8; 512]);
        assert_eq!(peek_order(&bytes).unwrap(), Order::ProdosBlock);
    }

    #[test]
    fn write_protected_flag_locks_the_provider() {
        let mut bytes = make_header(1, 512, 0x8000_0000);
        bytes.extend(vec![0u8; 512]);
        let image = open(&bytes).unwrap();
        assert!(!image.provider().writable());
    }
}
