use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::wal::WalConfig;

/// Ledger configuration, usually loaded from a TOML file.
///
/// ```toml
/// data_dir = "/var/lib/tel"
/// lock_timeout_ms = 5000
///
/// [wal]
/// sync_mode = "every_write"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory holding one WAL segment per scope. `None` keeps the ledger
    /// in memory.
    pub data_dir: Option<PathBuf>,
    /// Bounded wait for a scope's append lock.
    pub lock_timeout_ms: u64,
    pub wal: WalConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            lock_timeout_ms: 5_000,
            wal: WalConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, LedgerError> {
        let config: Self = toml::from_str(s).map_err(|e| LedgerError::Config(e.to_string()))?;
        if config.lock_timeout_ms == 0 {
            return Err(LedgerError::Config("lock_timeout_ms must be positive".into()));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
