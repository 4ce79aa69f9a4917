//! Pascal filesystem scenarios, including defragmentation (spec.md §8
//! scenario 5).

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::pascal::Pascal;
use orchard::fs::{AccessMode, CreateMode, FileSystem, ForkKind};

const BLOCK: usize = 512;

fn blank(blocks: u16) -> Pascal {
    let provider = ChunkProvider::new_ordered(vec![0u8; blocks as usize * BLOCK], Order::ProdosBlock, true);
    let mut fs = Pascal::new(provider, blocks);
    fs.format("MYVOL", 0, false).unwrap();
    fs.prepare_file_access(false).unwrap();
    fs
}

fn write_blocks(fs: &mut Pascal, name: &str, blocks: usize) {
    let id = fs.create_file(fs.get_vol_dir(), name, CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(&vec![0x11u8; blocks * BLOCK]).unwrap();
    fs.close_file(handle).unwrap();
}

#[test]
fn round_trip_create_write_read() {
    let mut fs = blank(280);
    let id = fs.create_file(fs.get_vol_dir(), "HELLO.TEXT", CreateMode::File).unwrap();
    let mut handle = fs.open_file(id, AccessMode::ReadWrite, ForkKind::Data).unwrap();
    handle.write(b"pascal says hi").unwrap();
    fs.close_file(handle).unwrap();

    fs.prepare_file_access(true).unwrap();
    let found = fs.find_file_entry(fs.get_vol_dir(), "hello.text").unwrap();
    let mut handle = fs.open_file(found, AccessMode::ReadOnly, ForkKind::Data).unwrap();
    let mut buf = vec![0u8; 14];
    handle.read(&mut buf);
    assert_eq!(&buf, b"pascal says hi");
}

#[test]
fn defragment_reclaims_space_for_a_new_file() {
    let mut fs = blank(280);
    write_blocks(&mut fs, "A", 8);
    write_blocks(&mut fs, "B", 10);
    write_blocks(&mut fs, "C", 12);
    write_blocks(&mut fs, "D", 14);
    write_blocks(&mut fs, "E", 14);

    let a = fs.find_file_entry(fs.get_vol_dir(), "A").unwrap();
    let c = fs.find_file_entry(fs.get_vol_dir(), "C").unwrap();
    fs.delete_file(a).unwrap();
    fs.delete_file(c).unwrap();

    let free_before = fs.free_space();
    fs.defragment().unwrap();
    assert_eq!(fs.free_space(), free_before);

    write_blocks(&mut fs, "NEWFILE", 20);
    assert!(fs.find_file_entry(fs.get_vol_dir(), "NEWFILE").is_ok());
}

#[test]
fn oversized_volume_name_is_rejected() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 280 * BLOCK], Order::ProdosBlock, true);
    let mut fs = Pascal::new(provider, 280);
    assert!(fs.format("WAYTOOLONGNAME", 0, false).is_err());
}
