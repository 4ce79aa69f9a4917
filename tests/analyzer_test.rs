//! End-to-end container-recognition-through-filesystem-bind scenarios,
//! driven through the crate's public `open_disk_image` entry point rather
//! than `analyzer::analyze_disk` directly.

use orchard::chunk::{ChunkProvider, Order};
use orchard::container::Contents;
use orchard::fs::dos3x::Dos3x;
use orchard::fs::prodos::Prodos;
use orchard::fs::{CreateMode, FileSystem};

#[test]
fn a_dsk_extension_resolves_dos_sector_order_and_binds_dos33() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 35 * 16 * 256], Order::DosSector, true);
    let mut fs = Dos3x::new(provider);
    fs.format("", 254, false).unwrap();
    let bytes = fs.provider().ordered_bytes().unwrap().to_vec();

    let disk = orchard::open_disk_image(&bytes, Some("game.dsk"), false).unwrap();
    match disk.contents() {
        Contents::FileSystem(inner) => assert_eq!(inner.kind(), orchard::fs::FsKind::Dos3x),
        _ => panic!("expected a bound filesystem"),
    }
}

#[test]
fn a_po_extension_resolves_prodos_block_order_and_binds_prodos() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 280 * 512], Order::ProdosBlock, true);
    let mut fs = Prodos::new(provider, 280);
    fs.format("MY.DISK", 280, false).unwrap();
    fs.create_file(fs.get_vol_dir(), "A", CreateMode::File).unwrap();
    let bytes = fs.provider().ordered_bytes().unwrap().to_vec();

    let disk = orchard::open_disk_image(&bytes, Some("image.po"), false).unwrap();
    match disk.contents() {
        Contents::FileSystem(inner) => assert_eq!(inner.kind(), orchard::fs::FsKind::ProDos),
        _ => panic!("expected a bound filesystem"),
    }
}

#[test]
fn unhinted_dos_sector_image_is_still_recovered_by_order_probing() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 35 * 16 * 256], Order::DosSector, true);
    let mut fs = Dos3x::new(provider);
    fs.format("", 254, false).unwrap();
    let bytes = fs.provider().ordered_bytes().unwrap().to_vec();

    let disk = orchard::open_disk_image(&bytes, None, false).unwrap();
    assert!(matches!(disk.contents(), Contents::FileSystem(_)));
}
