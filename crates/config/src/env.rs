use thiserror::Error;

use crate::{CompressionType, Options, SyncPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Options {
    /// Defaults overlaid with the `SHALE_*` process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut opts = Options::default();
        opts.apply_env(|key| std::env::var(key).ok())?;
        Ok(opts)
    }

    /// Overlays settings found through `lookup` onto `self`. Unset keys keep
    /// their current value; unparsable values are rejected.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kb) = parse_num::<usize>(&lookup, "SHALE_WRITE_BUFFER_KB")? {
            if kb == 0 {
                return Err(invalid("SHALE_WRITE_BUFFER_KB", "0", "must be > 0"));
            }
            self.cf.write_buffer_size = kb * 1024;
        }
        if let Some(raw) = lookup("SHALE_WAL_SYNC") {
            self.wal_sync = match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "always" => SyncPolicy::Always,
                "false" | "0" | "manual" => SyncPolicy::Manual,
                _ => return Err(invalid("SHALE_WAL_SYNC", &raw, "expected true or false")),
            };
        }
        if let Some(n) = parse_num::<usize>(&lookup, "SHALE_L0_TRIGGER")? {
            if n == 0 {
                self.cf.disable_auto_compactions = true;
            } else {
                self.cf.level0_file_num_compaction_trigger = n;
            }
        }
        if let Some(n) = parse_num::<usize>(&lookup, "SHALE_MAX_BACKGROUND_JOBS")? {
            self.set_max_background_jobs(n);
        }
        if let Some(kb) = parse_num::<usize>(&lookup, "SHALE_BLOCK_CACHE_KB")? {
            self.block_cache_capacity = kb * 1024;
        }
        if let Some(raw) = lookup("SHALE_COMPRESSION") {
            self.cf.table.compression = match raw.trim().to_ascii_lowercase().as_str() {
                "none" => CompressionType::None,
                "lz4" => CompressionType::Lz4,
                "zstd" => CompressionType::Zstd,
                _ => return Err(invalid("SHALE_COMPRESSION", &raw, "expected none, lz4 or zstd")),
            };
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw, "not a number")),
    }
}

fn invalid(key: &'static str, value: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason,
    }
}
