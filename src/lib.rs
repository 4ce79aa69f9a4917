//! # `orchard`
//!
//! A library for reading, analyzing, creating, and modifying vintage
//! personal-computer disk images and file archives, with emphasis on
//! the Apple II and early Macintosh worlds.
//!
//! ## Architecture
//!
//! The stack is built around four layers, leaf to root:
//! * [`stream`] / [`nibble`] / [`chunk`] decode a raw byte stream (or a
//!   WOZ-style bit stream) down to addressable 256 B sectors and 512 B
//!   blocks, translating between logical and physical sector order.
//! * [`container`] recognizes the file wrapper a disk image arrived in
//!   (unadorned, WOZ1/2, 2MG, DiskCopy 4.2, Trackstar) and produces a
//!   [`container::DiskImage`] over a [`chunk::ChunkProvider`].
//! * [`multipart`] splits a container that holds more than one volume
//!   (APM, MicroDrive, DOS-800K hybrid) into independent partitions.
//! * [`fs`] imposes a filesystem on a chunk provider -- DOS 3.x, ProDOS,
//!   HFS, MFS, Pascal, CP/M, RDOS, Gutenberg -- and [`archive`] imposes
//!   a transactional record store on a plain byte stream -- NuFX, ZIP,
//!   AppleSingle/AppleDouble, Binary II, AppleLink ACU.
//!
//! [`analyzer`] is the glue: given raw bytes it classifies the
//! container, probes sector order against every filesystem engine, and
//! binds whichever candidate scans with the fewest [`notes::Notes`].
//!
//! ## File Systems
//!
//! As of this writing `orchard` supports
//! * DOS 3.2/3.3
//! * ProDOS
//! * HFS and MFS
//! * Apple Pascal
//! * CP/M 2/3
//! * RDOS and Gutenberg (SSI/DOS-3.3-adjacent formats)
//!
//! ## Disk Images
//!
//! In order to manipulate tracks and sectors, `orchard` must understand
//! the way the track data is packed into a disk image. As of this
//! writing `orchard` supports
//! * Unadorned sector dumps (DSK/D13/DO/PO)
//! * WOZ (1 and 2)
//! * 2MG
//! * DiskCopy 4.2
//! * Trackstar
//!
//! ## Archives
//!
//! `orchard` reads and writes NuFX (ShrinkIt), ZIP, AppleSingle,
//! AppleDouble, and Binary II, and reads AppleLink ACU.

pub mod analyzer;
pub mod archive;
pub mod chunk;
pub mod container;
pub mod error;
pub mod fs;
pub mod grinder;
pub mod hooks;
pub mod multipart;
pub mod nibble;
pub mod notes;
pub mod stream;

pub use error::{Error, Result};
pub use hooks::AppHook;

/// Known file extensions the analyzer will consult as an order hint,
/// mirroring the teacher crate's `KNOWN_FILE_EXTENSIONS` list.
pub const KNOWN_FILE_EXTENSIONS: &str = "2mg,2img,dsk,d13,do,po,woz,nib,img,app,shk,sdk,bxy,bny,zip,as,image";

/// Recognize and bind a raw byte stream in one call: classify the
/// container, construct the [`container::DiskImage`], then hand it to
/// the analyzer to bind a filesystem or multi-partition wrapper.
/// `filename_hint` narrows both container detection (Trackstar's
/// `.app` extension) and sector-order resolution (`.po`/`.do`).
pub fn open_disk_image(
    bytes: &[u8],
    filename_hint: Option<&str>,
    deep_scan: bool,
) -> Result<container::DiskImage> {
    let (kind, order_hint) = container::recognize(bytes, filename_hint)?;
    let mut disk = container::prepare_disk_image(bytes, kind, order_hint)?;
    analyzer::analyze_disk(&mut disk, order_hint, deep_scan)?;
    Ok(disk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_disk_image_rejects_a_size_no_container_recognizes() {
        let bytes = vec![0u8; 12345];
        assert!(open_disk_image(&bytes, None, false).is_err());
    }

    #[test]
    fn known_file_extensions_covers_every_container_and_archive_suffix() {
        for ext in ["dsk", "woz", "2mg", "po", "shk", "zip"] {
            assert!(KNOWN_FILE_EXTENSIONS.split(',').any(|e| e == ext));
        }
    }
}
