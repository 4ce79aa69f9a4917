//! C4 — Container recognition.
//!
//! Detects and wraps the on-disk container formats named in spec.md §6:
//! unadorned sector dumps, WOZ1/WOZ2, 2MG, DiskCopy 4.2, and Trackstar.
//! Detection never consults the filename beyond an optional extension
//! hint (spec.md §4.5: the analyzer passes a `filename_hint`); the magic
//! bytes and size are authoritative.

pub mod diskcopy;
pub mod trackstar;
pub mod twomg;
pub mod unadorned;
pub mod woz;

use crate::chunk::{ChunkProvider, Order};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::multipart::MultiPart;
use crate::notes::Notes;

/// What the analyzer (C8) bound a [`DiskImage`]'s chunk provider to.
/// Spec.md §3 "Disk image" invariant: at most one binding per image.
pub enum Contents {
    FileSystem(Box<dyn FileSystem>),
    MultiPart(MultiPart),
    Empty,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Kind {
    Unadorned,
    Woz1,
    Woz2,
    TwoMg,
    DiskCopy42,
    Trackstar,
}

/// A disk image: the byte stream plus whatever container metadata was
/// recognized, and the chunk provider it exposes to higher layers.
pub struct DiskImage {
    pub kind: Kind,
    pub notes: Notes,
    pub meta: ImageMeta,
    provider: ChunkProvider,
    contents: Contents,
}

/// Metadata pulled out of a container header, kept around for callers that
/// want to inspect/round-trip it (WOZ INFO/META text, 2MG header fields).
#[derive(Clone, Debug, Default)]
pub struct ImageMeta {
    pub woz_info: Option<woz::WozInfo>,
    pub woz_meta: Option<Vec<(String, String)>>,
    pub twomg_header: Option<twomg::TwoMgHeader>,
    pub diskcopy_header: Option<diskcopy::DiskCopyHeader>,
    /// set when a WOZ CRC mismatch or similar structural fault was found;
    /// the image stays analyzable but is read-only and flagged dubious.
    pub dubious: bool,
}

impl DiskImage {
    pub fn provider(&self) -> &ChunkProvider {
        &self.provider
    }
    pub fn provider_mut(&mut self) -> &mut ChunkProvider {
        &mut self.provider
    }
    pub fn into_provider(self) -> ChunkProvider {
        self.provider
    }

    pub fn contents(&self) -> &Contents {
        &self.contents
    }
    pub fn contents_mut(&mut self) -> &mut Contents {
        &mut self.contents
    }

    /// Bind the analyzer's chosen filesystem or multi-partition wrapper to
    /// this image. Fails if something is already bound (spec.md §3 "at
    /// most one contents binding").
    pub fn bind_contents(&mut self, contents: Contents) -> Result<()> {
        if !matches!(self.contents, Contents::Empty) {
            return Err(Error::arg("disk image already has contents bound"));
        }
        self.contents = contents;
        Ok(())
    }

    fn new(kind: Kind, provider: ChunkProvider, meta: ImageMeta, notes: Notes) -> Self {
        Self { kind, notes, meta, provider, contents: Contents::Empty }
    }
}

/// Classify a byte buffer by magic and size, per spec.md §4.5
/// `analyze(stream, filename_hint) -> (kind, order_hint)`.
pub fn recognize(bytes: &[u8], filename_hint: Option<&str>) -> Result<(Kind, Order)> {
    if woz::is_woz1(bytes) {
        return Ok((Kind::Woz1, Order::Physical));
    }
    if woz::is_woz2(bytes) {
        return Ok((Kind::Woz2, Order::Physical));
    }
    if twomg::is_2mg(bytes) {
        let order = twomg::peek_order(bytes)?;
        return Ok((Kind::TwoMg, order));
    }
    if diskcopy::is_diskcopy42(bytes) {
        return Ok((Kind::DiskCopy42, Order::ProdosBlock));
    }
    if let Some(hint) = filename_hint {
        if hint.to_ascii_lowercase().ends_with(".app") || trackstar::is_trackstar(bytes) {
            return Ok((Kind::Trackstar, Order::Physical));
        }
    }
    if unadorned::plausible_size(bytes.len()) {
        let order = match filename_hint {
            Some(h) if h.to_ascii_lowercase().ends_with(".po") => Order::ProdosBlock,
            Some(h) if h.to_ascii_lowercase().ends_with(".do") || h.to_ascii_lowercase().ends_with(".dsk") => Order::DosSector,
            Some(h) if h.to_ascii_lowercase().ends_with(".d13") => Order::DosSector,
            _ => Order::Unknown,
        };
        return Ok((Kind::Unadorned, order));
    }
    Err(Error::format("container magic and size did not match any known format"))
}

/// Construct a [`DiskImage`] of the given `kind` from raw bytes, per
/// spec.md §4.5 `prepare_disk_image(stream, kind)`.
pub fn prepare_disk_image(bytes: &[u8], kind: Kind, order_hint: Order) -> Result<DiskImage> {
    match kind {
        Kind::Unadorned => unadorned::open(bytes, order_hint),
        Kind::Woz1 | Kind::Woz2 => woz::open(bytes, kind),
        Kind::TwoMg => twomg::open(bytes),
        Kind::DiskCopy42 => diskcopy::open(bytes),
        Kind::Trackstar => trackstar::open(bytes),
    }
}

pub(crate) fn new_image(kind: Kind, provider: ChunkProvider, meta: ImageMeta, notes: Notes) -> DiskImage {
    DiskImage::new(kind, provider, meta, notes)
}
