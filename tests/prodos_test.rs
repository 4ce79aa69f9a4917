//! ProDOS scenarios, including the sparse-file law (spec.md §8).

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::prodos::Prodos;
use orchard::fs::{AccessMode, CreateMode, FileSystem, ForkKind};

fn blank(blocks: u16) -> Prodos {
    let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * 512], Order::ProdosBlock, true);
    let mut fs = Prodos::new(provider, blocks);
    fs.format("MY.DISK", blocks, false).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs
}

#[test]
fn round_trip_seedling_file() {
    let mut fs = blank(280);
    let id = fs.create_file(fs.get_vol_dir(), "SMALL", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(b"seedling data").unwrap();
    fs.close_file(handle).unwrap();

    fs.prepare_file_access(true).unwrap();
    assert!(!fs.notes().has_errors());
    let found = fs.find_file_entry(fs.get_vol_dir(), "small").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 13];
    handle.read(&mut buf);
    assert_eq!(&buf, b"seedling data");
}

#[test]
fn sapling_file_spans_multiple_blocks() {
    let mut fs = blank(280);
    let id = fs.create_file(fs.get_vol_dir(), "BIGGER", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    let payload = vec![0x42u8; 2000];
    handle.write(&payload).unwrap();
    fs.close_file(handle).unwrap();

    let found = fs.find_file_entry(fs.get_vol_dir(), "bigger").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 2000];
    handle.read(&mut buf);
    assert_eq!(buf, payload);
}

#[test]
fn subdirectory_create_and_nest_file() {
    let mut fs = blank(280);
    let dir = fs.create_file(fs.get_vol_dir(), "SUBDIR", CreateMode::Directory).unwrap();
    let id = fs.create_file(dir, "NESTED", CreateMode::File).unwrap();
    let found = fs.find_file_entry(dir, "nested").unwrap();
    assert_eq!(found, id);
}

#[test]
fn invalid_names_are_rejected() {
    let mut fs = blank(280);
    assert!(fs.create_file(fs.get_vol_dir(), "has space", CreateMode::File).is_err());
    assert!(fs.create_file(fs.get_vol_dir(), "VALIDNAME", CreateMode::File).is_ok());
}

#[test]
fn allocation_conservation_after_delete() {
    let mut fs = blank(280);
    let before = fs.free_space();
    let id = fs.create_file(fs.get_vol_dir(), "TEMP", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(&vec![7u8; 3000]).unwrap();
    fs.close_file(handle).unwrap();
    assert!(fs.free_space() < before);
    fs.delete_file(id).unwrap();
    assert_eq!(fs.free_space(), before);
}
