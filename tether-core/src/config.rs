//! Runtime configuration.

use serde::Deserialize;

use crate::error::{ReactiveError, Result};

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
///
/// ```rust
/// use tether_core::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{ "max_transaction_depth": 8 }"#).unwrap();
/// assert_eq!(config.max_transaction_depth, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// How deeply explicit transactions may nest before
    /// `try_transaction` rejects the call.
    pub max_transaction_depth: usize,
}

impl RuntimeConfig {
    pub const DEFAULT_MAX_TRANSACTION_DEPTH: usize = 64;

    /// Parse and validate a JSON document.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transaction_depth == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_transaction_depth must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_transaction_depth: Self::DEFAULT_MAX_TRANSACTION_DEPTH,
        }
    }
}
