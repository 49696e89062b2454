//! The key-value contract the node depends on

use crate::config::BLOCKCHAIN_ENGINE_NAME;
use crate::engine::{StatsSnapshot, StorageEngine};
use crate::metering::StatsSource;
use crate::StoreError;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// Minimal key-value store
///
/// Callers hold a `Box<dyn KeyValueStore>` so the engine underneath can be
/// replaced without touching them.
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite a value
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Read a value; a missing key is `Ok(None)`, never an error
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError>;

    /// Release the store; every later call fails
    fn close(&self) -> Result<(), StoreError>;
}

/// [`KeyValueStore`] over the LSM engine
pub struct LsmKv {
    engine: StorageEngine,
}

impl LsmKv {
    pub fn new(engine: StorageEngine) -> Self {
        Self { engine }
    }
}

impl KeyValueStore for LsmKv {
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.engine.set(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.engine.get(key)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.engine.close()
    }
}

impl StatsSource for LsmKv {
    fn stats_snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        self.engine.stats_snapshot()
    }
}

/// Open chain storage at `path`, tuned from the process environment
pub fn open_blockchain_storage(path: impl AsRef<Path>) -> Result<Box<dyn KeyValueStore>, StoreError> {
    let engine = StorageEngine::open_from_env(path, BLOCKCHAIN_ENGINE_NAME)?;
    Ok(Box::new(LsmKv::new(engine)))
}

/// Chain storage plus a statistics view of the same store
///
/// Hosts that report engine health use the second handle; everything else
/// goes through the key-value contract.
pub fn open_blockchain_storage_with_stats(
    path: impl AsRef<Path>,
) -> Result<(Arc<dyn KeyValueStore>, Arc<dyn StatsSource>), StoreError> {
    let engine = StorageEngine::open_from_env(path, BLOCKCHAIN_ENGINE_NAME)?;
    let store = Arc::new(LsmKv::new(engine));
    let kv: Arc<dyn KeyValueStore> = store.clone();
    let stats: Arc<dyn StatsSource> = store;
    Ok((kv, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::EngineOptions;
    use crate::Error;
    use std::thread;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Box<dyn KeyValueStore> {
        let engine =
            StorageEngine::open(dir.path(), BLOCKCHAIN_ENGINE_NAME, &EngineOptions::default())
                .unwrap();
        Box::new(LsmKv::new(engine))
    }

    #[test]
    fn test_set_get_overwrite() {
        let dir = TempDir::new().unwrap();
        let kv = store(&dir);

        kv.set(b"block:1", b"header-1").unwrap();
        kv.set(b"block:2", b"header-2").unwrap();
        kv.set(b"block:1", b"header-1b").unwrap();
        kv.set(b"block:1", b"header-1b").unwrap();

        assert_eq!(kv.get(b"block:1").unwrap(), Some(Bytes::from("header-1b")));
        assert_eq!(kv.get(b"block:2").unwrap(), Some(Bytes::from("header-2")));
        assert_eq!(kv.get(b"block:3").unwrap(), None);

        kv.close().unwrap();
    }

    #[test]
    fn test_binary_keys() {
        let dir = TempDir::new().unwrap();
        let kv = store(&dir);

        let key = [0u8, 255, 0, 1];
        let value = vec![0u8; 4096];
        kv.set(&key, &value).unwrap();
        assert_eq!(kv.get(&key).unwrap().as_deref(), Some(&value[..]));
        assert_eq!(kv.get(&key[..3]).unwrap(), None);

        kv.close().unwrap();
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();

        let kv = store(&dir);
        for i in 0..100u32 {
            kv.set(&i.to_be_bytes(), format!("value{i}").as_bytes()).unwrap();
        }
        kv.close().unwrap();

        let kv = store(&dir);
        for i in 0..100u32 {
            assert_eq!(
                kv.get(&i.to_be_bytes()).unwrap(),
                Some(Bytes::from(format!("value{i}")))
            );
        }
        kv.close().unwrap();
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let dir = TempDir::new().unwrap();
        let kv = store(&dir);
        kv.close().unwrap();

        assert!(kv.get(b"k").unwrap_err().is_closed());
        assert!(kv.set(b"k", b"v").unwrap_err().is_closed());
        assert!(matches!(kv.close(), Err(StoreError::Close(Error::Closed))));
    }

    #[test]
    fn test_concurrent_set_get() {
        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KeyValueStore> = Arc::from(store(&dir));

        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let kv = Arc::clone(&kv);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let key = [&[t][..], &i.to_be_bytes()[..]].concat();
                        kv.set(&key, &key).unwrap();
                        assert_eq!(kv.get(&key).unwrap().as_deref(), Some(&key[..]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            kv.get(&[3, 0, 0, 0, 199]).unwrap().as_deref(),
            Some(&[3u8, 0, 0, 0, 199][..])
        );
        kv.close().unwrap();
    }

    #[test]
    fn test_open_blockchain_storage() {
        let dir = TempDir::new().unwrap();
        let kv = open_blockchain_storage(dir.path()).unwrap();
        kv.set(b"genesis", b"0x00").unwrap();
        assert_eq!(kv.get(b"genesis").unwrap(), Some(Bytes::from("0x00")));
        kv.close().unwrap();

        let err = match open_blockchain_storage(dir.path().join("missing\0path")) {
            Ok(_) => panic!("opened an invalid path"),
            Err(e) => e,
        };
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[test]
    fn test_stats_view_shares_the_store() {
        let dir = TempDir::new().unwrap();
        let (kv, stats) = open_blockchain_storage_with_stats(dir.path()).unwrap();

        let before = stats.stats_snapshot().unwrap();
        kv.set(b"height", b"42").unwrap();
        let after = stats.stats_snapshot().unwrap();
        assert!(after.io_write_bytes > before.io_write_bytes);

        kv.close().unwrap();
        assert!(stats.stats_snapshot().unwrap_err().is_closed());
    }
}
