//! Runtime configuration for the journal, loaded from the environment.
//!
//! Follows the `sem_os_server` convention of reading settings via
//! `std::env::var` with documented defaults rather than introducing a
//! config-file format the core has no other use for.

use std::path::PathBuf;

const DEFAULT_JOURNAL_PATH: &str = "./msgswitch.journal";
const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// `MSGSWITCH_JOURNAL_PATH`    — path to the append-only journal file.
/// `MSGSWITCH_MAX_RECORD_BYTES` — largest encoded `Op` the codec will accept.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    pub journal_path: PathBuf,
    pub max_record_bytes: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from(DEFAULT_JOURNAL_PATH),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

impl SwitchConfig {
    /// Reads `MSGSWITCH_JOURNAL_PATH` and `MSGSWITCH_MAX_RECORD_BYTES`,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let journal_path = std::env::var("MSGSWITCH_JOURNAL_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.journal_path);
        let max_record_bytes = std::env::var("MSGSWITCH_MAX_RECORD_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_record_bytes);
        Self {
            journal_path,
            max_record_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        std::env::remove_var("MSGSWITCH_JOURNAL_PATH");
        std::env::remove_var("MSGSWITCH_MAX_RECORD_BYTES");
        let cfg = SwitchConfig::from_env();
        assert_eq!(cfg.journal_path, PathBuf::from(DEFAULT_JOURNAL_PATH));
        assert_eq!(cfg.max_record_bytes, DEFAULT_MAX_RECORD_BYTES);
    }
}
