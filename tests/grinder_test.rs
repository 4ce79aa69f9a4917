//! Stress-harness scenarios across more than one engine; the unit tests
//! inside `grinder.rs` itself only exercise DOS 3.3.

use orchard::chunk::{ChunkProvider, Order};
use orchard::fs::prodos::Prodos;
use orchard::fs::pascal::Pascal;
use orchard::fs::FileSystem;
use orchard::grinder::{grind_filesystem, GrinderConfig};

#[test]
fn grinding_prodos_conserves_free_space() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 280 * 512], Order::ProdosBlock, true);
    let mut fs = Prodos::new(provider, 280);
    fs.format("GRINDER", 280, false).unwrap();
    fs.prepare_file_access(false).unwrap();

    let config = GrinderConfig { iterations: 80, seed: 99, max_file_len: 2000 };
    let report = grind_filesystem(&mut fs, &config).unwrap();

    assert!(report.files_created > 0);
    assert!(report.free_space_conserved);
}

#[test]
fn grinding_pascal_conserves_free_space() {
    let provider = ChunkProvider::new_ordered(vec![0u8; 280 * 512], Order::ProdosBlock, true);
    let mut fs = Pascal::new(provider, 280);
    fs.format("GRINDVOL", 0, false).unwrap();
    fs.prepare_file_access(false).unwrap();

    let config = GrinderConfig { iterations: 50, seed: 123, max_file_len: 1500 };
    let report = grind_filesystem(&mut fs, &config).unwrap();

    assert!(report.files_created > 0);
    assert!(report.free_space_conserved);
}

#[test]
fn default_config_is_bounded_and_deterministic() {
    let config = GrinderConfig::default();
    assert!(config.iterations > 0);
    assert_ne!(config.seed, 0);
}
