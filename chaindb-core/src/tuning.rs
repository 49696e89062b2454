//! Engine tuning from environment-style configuration
//!
//! Two knobs are recognised, both optional:
//!
//! | Variable | Effect |
//! |---|---|
//! | `LEVELDB_FORCE_FILE_DESCRIPTOR_DIVISOR` | raise the fd limit, cache `limit / divisor` open tables |
//! | `LEVELDB_CACHE_SIZE_MB` | block cache of `mb / 2` MiB, write buffer of `mb / 4` MiB |
//!
//! Bloom filters (10 bits per key) and disabled seek compaction are fixed.

use crate::config::{self, MIB};
use crate::limits::{LimitNegotiator, ProcessLimits};
use crate::storage::Options;
use crate::ResourceLimitError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Divides the negotiated fd limit into the open table cache capacity
pub const FD_DIVISOR_ENV: &str = "LEVELDB_FORCE_FILE_DESCRIPTOR_DIVISOR";

/// Total cache budget in MiB, split between block cache and write buffer
pub const CACHE_SIZE_ENV: &str = "LEVELDB_CACHE_SIZE_MB";

/// Resolved engine options; `None` keeps the engine default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub open_files_cache_capacity: Option<usize>,
    pub bloom_filter_bits: usize,
    pub disable_seek_compaction: bool,
    pub block_cache_capacity_bytes: Option<usize>,
    pub write_buffer_bytes: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            open_files_cache_capacity: None,
            bloom_filter_bits: config::BLOOM_BITS_PER_KEY,
            disable_seek_compaction: true,
            block_cache_capacity_bytes: None,
            write_buffer_bytes: None,
        }
    }
}

impl EngineOptions {
    /// Database options with these overrides applied
    ///
    /// A zero table cache, block cache or write buffer falls back to the
    /// default.
    pub fn to_options(&self) -> Options {
        let defaults = Options::default();
        Options {
            open_files_cache_capacity: self
                .open_files_cache_capacity
                .filter(|n| *n > 0)
                .unwrap_or(defaults.open_files_cache_capacity),
            block_cache_capacity: self
                .block_cache_capacity_bytes
                .filter(|n| *n > 0)
                .unwrap_or(defaults.block_cache_capacity),
            write_buffer_size: self
                .write_buffer_bytes
                .filter(|n| *n > 0)
                .unwrap_or(defaults.write_buffer_size),
            bloom_bits_per_key: self.bloom_filter_bits,
            disable_seek_compaction: self.disable_seek_compaction,
            ..defaults
        }
    }
}

/// Tunables parsed from the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TuningConfig {
    pub open_files_divisor: Option<u64>,
    pub cache_size_mb: Option<usize>,
}

impl TuningConfig {
    /// Read the tunables from the process environment
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = [FD_DIVISOR_ENV, CACHE_SIZE_ENV]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self::from_map(&vars)
    }

    /// Parse the tunables; unparsable values are ignored
    pub fn from_map(env: &HashMap<String, String>) -> Self {
        let open_files_divisor = parse::<u64>(env, FD_DIVISOR_ENV).filter(|divisor| {
            if *divisor == 0 {
                warn!(key = FD_DIVISOR_ENV, "ignoring zero divisor");
            }
            *divisor > 0
        });

        Self {
            open_files_divisor,
            cache_size_mb: parse::<usize>(env, CACHE_SIZE_ENV),
        }
    }
}

fn parse<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env.get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring unparsable tuning value");
            None
        }
    }
}

/// Turns tunables into [`EngineOptions`]
#[derive(Clone)]
pub struct EngineConfigResolver {
    negotiator: Arc<dyn LimitNegotiator>,
}

impl Default for EngineConfigResolver {
    fn default() -> Self {
        Self::new(Arc::new(ProcessLimits))
    }
}

impl EngineConfigResolver {
    pub fn new(negotiator: Arc<dyn LimitNegotiator>) -> Self {
        Self { negotiator }
    }

    /// Resolve options from an environment-style mapping
    pub fn resolve(&self, env: &HashMap<String, String>) -> Result<EngineOptions, ResourceLimitError> {
        self.resolve_config(&TuningConfig::from_map(env))
    }

    /// Resolve options from parsed tunables
    ///
    /// Never touches the database; only the fd limit negotiation has side
    /// effects, and its failure aborts resolution.
    pub fn resolve_config(&self, tuning: &TuningConfig) -> Result<EngineOptions, ResourceLimitError> {
        let mut options = EngineOptions::default();

        if let Some(divisor) = tuning.open_files_divisor {
            let limit = self.negotiator.raise_fd_limit()?;
            let capacity = (limit / divisor) as usize;
            info!(limit, leveldb_cache = capacity, "forcing FD limit");
            options.open_files_cache_capacity = Some(capacity);
        }

        let sizes = tuning.cache_size_mb.and_then(|mb| {
            let sizes = (mb / 2).checked_mul(MIB).zip((mb / 4).checked_mul(MIB));
            if sizes.is_none() {
                warn!(key = CACHE_SIZE_ENV, cache_size_mb = mb, "ignoring oversized cache size");
            }
            sizes.map(|(block_cache, write_buffer)| (mb, block_cache, write_buffer))
        });

        if let Some((mb, block_cache, write_buffer)) = sizes {
            info!(
                cache_size_mb = mb,
                block_cache_bytes = block_cache,
                write_buffer_bytes = write_buffer,
                "setting leveldb cache size"
            );
            options.block_cache_capacity_bytes = Some(block_cache);
            options.write_buffer_bytes = Some(write_buffer);
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::FixedLimit;

    struct FailingLimit;

    impl LimitNegotiator for FailingLimit {
        fn raise_fd_limit(&self) -> Result<u64, ResourceLimitError> {
            Err(ResourceLimitError::Raise(std::io::Error::from_raw_os_error(1)))
        }
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolver(limit: u64) -> EngineConfigResolver {
        EngineConfigResolver::new(Arc::new(FixedLimit(limit)))
    }

    #[test]
    fn test_defaults_without_tunables() {
        let options = resolver(4096).resolve(&HashMap::new()).unwrap();
        assert_eq!(options, EngineOptions::default());
        assert_eq!(options.bloom_filter_bits, 10);
        assert!(options.disable_seek_compaction);
    }

    #[test]
    fn test_cache_size_split() {
        let options = resolver(4096)
            .resolve(&env(&[(CACHE_SIZE_ENV, "100")]))
            .unwrap();
        assert_eq!(options.block_cache_capacity_bytes, Some(50 * MIB));
        assert_eq!(options.write_buffer_bytes, Some(25 * MIB));
        assert_eq!(options.open_files_cache_capacity, None);
    }

    #[test]
    fn test_cache_size_truncates() {
        let options = resolver(4096).resolve(&env(&[(CACHE_SIZE_ENV, "7")])).unwrap();
        assert_eq!(options.block_cache_capacity_bytes, Some(3 * MIB));
        assert_eq!(options.write_buffer_bytes, Some(MIB));
    }

    #[test]
    fn test_fd_divisor() {
        let options = resolver(4096)
            .resolve(&env(&[(FD_DIVISOR_ENV, "2")]))
            .unwrap();
        assert_eq!(options.open_files_cache_capacity, Some(2048));
    }

    #[test]
    fn test_invalid_values_ignored() {
        let options = resolver(4096)
            .resolve(&env(&[(FD_DIVISOR_ENV, "0"), (CACHE_SIZE_ENV, "lots")]))
            .unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn test_limit_failure_aborts() {
        let resolver = EngineConfigResolver::new(Arc::new(FailingLimit));
        let result = resolver.resolve(&env(&[(FD_DIVISOR_ENV, "2")]));
        assert!(matches!(result, Err(ResourceLimitError::Raise(_))));

        // Without the divisor the negotiator is never consulted
        assert!(resolver.resolve(&env(&[(CACHE_SIZE_ENV, "8")])).is_ok());
    }

    #[test]
    fn test_to_options_applies_overrides() {
        let options = EngineOptions {
            open_files_cache_capacity: Some(64),
            write_buffer_bytes: Some(MIB),
            ..Default::default()
        }
        .to_options();

        assert_eq!(options.open_files_cache_capacity, 64);
        assert_eq!(options.write_buffer_size, MIB);
        assert_eq!(options.block_cache_capacity, config::DEFAULT_BLOCK_CACHE_CAPACITY);
        assert!(options.disable_seek_compaction);

        let tiny = EngineOptions {
            write_buffer_bytes: Some(0),
            ..Default::default()
        }
        .to_options();
        assert_eq!(tiny.write_buffer_size, config::DEFAULT_WRITE_BUFFER_SIZE);
    }

    #[test]
    fn test_oversized_cache_size_ignored() {
        let options = resolver(4096)
            .resolve(&env(&[(CACHE_SIZE_ENV, "99999999999999")]))
            .unwrap();
        assert_eq!(options.block_cache_capacity_bytes, None);
        assert_eq!(options.write_buffer_bytes, None);

        let max = usize::MAX.to_string();
        let options = resolver(4096).resolve(&env(&[(CACHE_SIZE_ENV, &max)])).unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn test_tiny_cache_size_keeps_engine_defaults() {
        let options = resolver(4096).resolve(&env(&[(CACHE_SIZE_ENV, "1")])).unwrap();
        assert_eq!(options.block_cache_capacity_bytes, Some(0));
        assert_eq!(options.write_buffer_bytes, Some(0));

        let engine = options.to_options();
        assert_eq!(engine.block_cache_capacity, config::DEFAULT_BLOCK_CACHE_CAPACITY);
        assert_eq!(engine.write_buffer_size, config::DEFAULT_WRITE_BUFFER_SIZE);
    }
}
