//! Scan a tree, change a file, and check only the affected entry moves.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use blocksync_core::record::unix_now_secs;
use blocksync_core::{
    ChangeEvent, ChangeOp, Engine, EventHandler, FingerprintRecord, TreeConfig, record_name,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const BLOCK: usize = 8192;

fn engine(dir: &TempDir) -> Engine {
    let config = TreeConfig::load(dir.path())
        .unwrap()
        .with_block_size(BLOCK)
        .with_workers(4);
    Engine::new(config).unwrap()
}

fn load(engine: &Engine, path: &Path) -> FingerprintRecord {
    let config = engine.config();
    FingerprintRecord::load(config.metadata_dir(), path, config.encoding()).unwrap()
}

fn block_digests(data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(BLOCK)
        .map(|chunk| Sha256::digest(chunk).to_vec())
        .collect()
}

/// Overwrite a record's header so a later refresh is observable
fn zero_header(engine: &Engine, path: &Path) {
    let record = engine
        .config()
        .metadata_dir()
        .join(record_name(path));
    let mut file = OpenOptions::new().write(true).open(record).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&0u64.to_le_bytes()).unwrap();
}

#[test]
fn test_scan_then_routed_append_rewrites_last_entry_only() {
    let dir = TempDir::new().unwrap();
    let a_data: Vec<u8> = (0..20_001u32).map(|i| (i % 251) as u8).collect();
    let b_data: Vec<u8> = (0..4000u32).map(|i| (i % 13) as u8).collect();
    fs::write(dir.path().join("a.bin"), &a_data).unwrap();
    fs::write(dir.path().join("b.bin"), &b_data).unwrap();

    let engine = engine(&dir);
    let a = engine.config().root().join("a.bin");
    let b = engine.config().root().join("b.bin");

    let before = unix_now_secs();
    let summary = engine.scan().unwrap();
    assert_eq!(summary.files_processed, 2);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(summary.blocks_written, 4);

    let a_record = load(&engine, &a);
    let b_record = load(&engine, &b);
    assert_eq!(a_record.entries, block_digests(&a_data));
    assert_eq!(b_record.entries, block_digests(&b_data));
    assert_eq!(a_record.len(), 3);
    assert_eq!(b_record.len(), 1);
    assert!(a_record.updated_at >= before);
    assert!(a_record.updated_at <= unix_now_secs());

    zero_header(&engine, &a);
    let b_bytes = fs::read(engine.processor().record_path(&b)).unwrap();

    let mut appended = a_data.clone();
    appended.extend_from_slice(b"0123456789");
    fs::write(&a, &appended).unwrap();

    engine
        .router()
        .handle(&ChangeEvent::new(&a, ChangeOp::Write))
        .unwrap();

    let updated = load(&engine, &a);
    assert_eq!(updated.len(), 3);
    assert_eq!(updated.entries[..2], a_record.entries[..2]);
    assert_ne!(updated.entries[2], a_record.entries[2]);
    assert_eq!(updated.entries, block_digests(&appended));
    assert!(updated.updated_at >= before);

    assert_eq!(fs::read(engine.processor().record_path(&b)).unwrap(), b_bytes);
}

#[test]
fn test_rescan_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub/c.bin"), vec![7u8; 3 * BLOCK]).unwrap();

    let engine = engine(&dir);
    let first = engine.scan().unwrap();
    assert_eq!(first.blocks_written, 3);

    let c = engine.config().root().join("sub/c.bin");
    let bytes = fs::read(engine.processor().record_path(&c)).unwrap();

    let second = engine.scan().unwrap();
    assert_eq!(second.files_processed, 1);
    assert_eq!(second.blocks_written, 0);
    assert_eq!(fs::read(engine.processor().record_path(&c)).unwrap(), bytes);
}

#[test]
fn test_watch_updates_records_live() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    engine.scan().unwrap();

    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let handle = engine.watch(started_tx).unwrap();
    started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let nested = engine.config().root().join("nested");
    fs::create_dir(&nested).unwrap();
    let path = nested.join("live.bin");
    let data = vec![3u8; BLOCK + 1];
    fs::write(&path, &data).unwrap();

    let record_path = engine.processor().record_path(&path);
    let expected = block_digests(&data);
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut matched = false;
    while Instant::now() < deadline {
        let config = engine.config();
        if record_path.exists()
            && FingerprintRecord::load(config.metadata_dir(), &path, config.encoding())
                .is_ok_and(|record| record.entries == expected)
        {
            matched = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    handle.stop().unwrap();
    assert!(matched, "record for {} never caught up", path.display());
}
