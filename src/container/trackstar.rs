//! Trackstar container support.
//!
//! A Trackstar `.app` image is a short embedded text description followed
//! by one fixed-length padded record per physical track, each holding a raw
//! 6-and-2 nibble stream with no further wrapper. Unlike WOZ there is no
//! magic number or checksum to key off of, so recognition falls back to a
//! filename-extension hint or a plausible-size check; this crate treats the
//! format read-only and marks every opened image dubious, reflecting that
//! lower confidence.

use crate::chunk::ChunkProvider;
use crate::error::{Error, Result};
use crate::nibble::{CircularBitBuffer, CodecDescriptor, NibbleTrack};
use crate::notes::Notes;

use super::{new_image, DiskImage, ImageMeta, Kind};

const DESCRIPTION_LEN: usize = 0x80;
const TRACK_LEN: usize = 6384;
const MIN_TRACKS: usize = 35;
const MAX_TRACKS: usize = 40;

pub fn is_trackstar(bytes: &[u8]) -> bool {
    if bytes.len() <= DESCRIPTION_LEN {
        return false;
    }
    let remainder = bytes.len() - DESCRIPTION_LEN;
    if remainder % TRACK_LEN != 0 {
        return false;
    }
    let tracks = remainder / TRACK_LEN;
    (MIN_TRACKS..=MAX_TRACKS).contains(&tracks)
}

pub fn open(bytes: &[u8]) -> Result<DiskImage> {
    if bytes.len() <= DESCRIPTION_LEN {
        return Err(Error::format("Trackstar file too short for its description header"));
    }
    let remainder = bytes.len() - DESCRIPTION_LEN;
    if remainder % TRACK_LEN != 0 {
        return Err(Error::format("Trackstar file size is not a whole number of tracks"));
    }
    let num_tracks = remainder / TRACK_LEN;

    let mut notes = Notes::new();
    let description = String::from_utf8_lossy(&bytes[..DESCRIPTION_LEN]).trim_end_matches('\0').trim().to_string();
    if !description.is_empty() {
        notes.info(format!("Trackstar description: {description}"));
    }
    notes.warn("Trackstar support is read-only and does not verify track framing");

    let codec = CodecDescriptor::standard_62();
    let mut tracks = std::collections::HashMap::new();
    for t in 0..num_tracks {
        let start = DESCRIPTION_LEN + t * TRACK_LEN;
        let raw = &bytes[start..start + TRACK_LEN];
        let buf = CircularBitBuffer::from_bytes(raw, TRACK_LEN * 8);
        tracks.insert(t, NibbleTrack::new(buf, codec.clone()));
    }

    let provider = ChunkProvider::new_nibble(tracks, 16, false);
    let meta = ImageMeta { dubious: true, ..Default::default() };
    Ok(new_image(Kind::Trackstar, provider, meta, notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_image(num_tracks: usize, description: &str) -> Vec<u8> {
        let mut out = vec![0u8; DESCRIPTION_LEN];
        out[..description.len()].copy_from_slice(description.as_bytes());
        out.extend(vec![0u8; num_tracks * TRACK_LEN]);
        out
    }

    #[test]
    fn recognizes_plausible_track_count() {
        let bytes = make_image(35, "test image");
        assert!(is_trackstar(&bytes));
    }

    #[test]
    fn rejects_size_outside_track_range() {
        let bytes = make_image(2, "too few tracks");
        assert!(!is_trackstar(&bytes));
    }

    #[test]
    fn open_carries_description_into_notes_and_marks_dubious() {
        let bytes = make_image(35, "demo disk");
        let image = open(&bytes).unwrap();
        assert!(image.meta.dubious);
        assert!(image.notes.all().iter().any(|n| n.message.contains("demo disk")));
    }
}
