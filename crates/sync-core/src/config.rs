/// Environment variable holding the preload count.
pub const PRELOAD_NOTES_COUNT: &str = "PRELOAD_NOTES_COUNT";

/// Number of most recently updated notes fetched eagerly on startup.
pub const DEFAULT_PRELOAD_COUNT: usize = 10;

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How many notes to fetch during initialization (the rest load on demand)
    pub preload_count: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            preload_count: DEFAULT_PRELOAD_COUNT,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `PRELOAD_NOTES_COUNT`: notes to preload (default 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(PRELOAD_NOTES_COUNT) {
            config.preload_count = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: PRELOAD_NOTES_COUNT,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn with_preload_count(mut self, preload_count: usize) -> Self {
        self.preload_count = preload_count;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = SyncConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.preload_count, 10);
    }

    #[test]
    fn test_reads_preload_count() {
        let config = SyncConfig::from_lookup(|key| {
            (key == PRELOAD_NOTES_COUNT).then(|| " 25 ".to_string())
        })
        .unwrap();
        assert_eq!(config.preload_count, 25);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = SyncConfig::from_lookup(|_| Some("lots".into())).unwrap_err();
        assert!(err.to_string().contains("PRELOAD_NOTES_COUNT"));
    }
}
