use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024; // 1 MiB
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Config for chunk transfer
/// Local & Tunnel use different values for optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Per-attempt timeout, 0 disables it
    pub request_timeout_secs: u64,
    /// Treat a multi-file batch as all-or-nothing
    pub atomic: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            request_timeout_secs: 30,
            atomic: false,
        }
    }
}

impl TransferConfig {
    pub fn tunnel() -> Self {
        Self {
            concurrency: 2,
            ..Self::default()
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// How far past the next unflushed chunk a download may fetch. Bounds the
    /// plaintext held for reordering to this many chunks.
    pub fn reorder_window(&self) -> usize {
        self.concurrency.max(1).saturating_mul(2)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Layered config: defaults, then config.toml, then CHUNKDROP_* env vars
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(TransferConfig::default()));

        match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = default_config_path() {
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        let config: TransferConfig = figment
            .merge(Env::prefixed("CHUNKDROP_"))
            .extract()
            .context("invalid transfer configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        let frame = self.chunk_size.checked_add(crate::crypto::TAG_LEN as u64);
        if !frame.is_some_and(|len| len <= u32::MAX as u64) {
            anyhow::bail!("chunk_size must fit in a u32 frame length");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chunkdrop")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
