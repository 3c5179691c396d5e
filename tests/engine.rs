use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tempfile::TempDir;
use triekv::{Config, KeyClass, StorageEngine, StorageError, Topology};

const HEX: &[u8] = b"0123456789abcdef";

fn random_hex(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

fn init_hex_store(root: &Path) -> Topology {
    let topology = Topology::new(vec![2, 2], KeyClass::hex()).unwrap();
    StorageEngine::init(root, &topology).unwrap();
    topology
}

#[test]
fn test_hundred_random_keys() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());
    let mut rng = StdRng::seed_from_u64(0x7213);

    let mut expected = BTreeMap::new();
    {
        let config = Config::new(temp_dir.path().to_path_buf()).with_shard_cache_size(8);
        let mut engine = StorageEngine::open(config, topology.clone()).unwrap();
        while expected.len() < 100 {
            let key = random_hex(&mut rng, 12);
            let len = 1 + rng.gen_range(0..40);
            let value = random_hex(&mut rng, len).into_bytes();
            engine.put(&key, &value).unwrap();
            expected.insert(key, value);
        }
        // overwrite a few so the last write has to win
        let rewrites: Vec<String> = expected.keys().step_by(10).cloned().collect();
        for key in rewrites {
            let value = format!("rewritten {}", key).into_bytes();
            engine.put(&key, &value).unwrap();
            expected.insert(key, value);
        }
        engine.close().unwrap();
    }

    let config = Config::new(temp_dir.path().to_path_buf()).with_readonly(true);
    let mut engine = StorageEngine::open(config, topology).unwrap();
    let keys: Vec<String> = engine.keys().collect::<triekv::Result<_>>().unwrap();
    assert_eq!(keys.len(), 100);
    assert_eq!(keys.iter().collect::<HashSet<_>>().len(), 100);

    for key in keys {
        assert_eq!(engine.get(&key).unwrap().as_ref(), expected.get(&key));
    }
    assert_eq!(engine.len().unwrap(), 100);
}

#[test]
fn test_shards_land_in_word_directories() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());

    let mut engine = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), topology).unwrap();
    engine.put("12345678", b"value").unwrap();
    engine.close().unwrap();

    assert!(temp_dir.path().join("12").join("34.idx").is_file());
    assert!(temp_dir.path().join("12").join("34.dat").is_file());
}

#[test]
fn test_topology_must_match() {
    let temp_dir = TempDir::new().unwrap();
    init_hex_store(temp_dir.path());

    let other = Topology::new(vec![4], KeyClass::hex()).unwrap();
    let result = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), other);
    assert!(matches!(result, Err(StorageError::TopologyMismatch(_))));

    let fresh = TempDir::new().unwrap();
    let result = StorageEngine::open_existing(Config::new(fresh.path().to_path_buf()));
    assert!(matches!(result, Err(StorageError::NotInitialized { .. })));
}

#[test]
fn test_invalid_input_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());
    let mut engine = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), topology).unwrap();

    assert!(matches!(engine.put("XYZ12345", b"v"), Err(StorageError::InvalidKey { .. })));
    assert!(matches!(engine.put("abc", b"v"), Err(StorageError::InvalidKey { .. })));
    assert!(matches!(engine.get("ab-cd"), Err(StorageError::InvalidKey { .. })));
    assert!(matches!(engine.put("abcd01", b""), Err(StorageError::EmptyValue)));
    assert_eq!(engine.len().unwrap(), 0);
}

#[test]
fn test_trim_across_shards() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());
    let mut engine = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), topology).unwrap();

    for key in ["aaaa01", "aaaa02", "aabb01", "ab0001", "ff0001"] {
        engine.put(key, key.as_bytes()).unwrap();
    }

    let mut keys: Vec<String> = engine.keys().collect::<triekv::Result<_>>().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["aaaa01", "aaaa02", "aabb01", "ab0001", "ff0001"]);

    // within one shard
    assert_eq!(engine.trim("aaaa02").unwrap(), 1);
    // across every shard starting with "aa"
    assert_eq!(engine.trim("aa").unwrap(), 2);
    assert_eq!(engine.get("aaaa01").unwrap(), None);
    assert_eq!(engine.get("aabb01").unwrap(), None);

    let mut keys: Vec<String> = engine.keys().collect::<triekv::Result<_>>().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["ab0001", "ff0001"]);
    assert_eq!(engine.trim("").unwrap(), 2);
    assert_eq!(engine.len().unwrap(), 0);
}

#[test]
fn test_value_cache_serves_repeated_reads() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());
    let mut engine = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), topology).unwrap();

    engine.put("abcd01", b"cached").unwrap();
    for _ in 0..5 {
        assert_eq!(engine.get("abcd01").unwrap(), Some(b"cached".to_vec()));
    }
    assert_eq!(engine.get("abcd02").unwrap(), None);

    let report = engine.metrics().report();
    assert_eq!(report.cache_hits, 5);
    assert_eq!(report.cache_misses, 1);
}

#[test]
fn test_force_gc_keeps_values() {
    let temp_dir = TempDir::new().unwrap();
    let topology = init_hex_store(temp_dir.path());
    let mut engine = StorageEngine::open(Config::new(temp_dir.path().to_path_buf()), topology.clone()).unwrap();

    for n in 0..20u32 {
        engine.put(&format!("abcd{:04x}", n), format!("v{}", n).as_bytes()).unwrap();
    }
    for n in 0..10u32 {
        engine.delete(&format!("abcd{:04x}", n)).unwrap();
    }
    assert_eq!(engine.force_gc().unwrap(), 1);
    engine.close().unwrap();

    let config = Config::new(temp_dir.path().to_path_buf()).with_readonly(true);
    let mut engine = StorageEngine::open(config, topology).unwrap();
    assert_eq!(engine.len().unwrap(), 10);
    for n in 10..20u32 {
        let value = engine.get(&format!("abcd{:04x}", n)).unwrap();
        assert_eq!(value, Some(format!("v{}", n).into_bytes()));
    }
}
