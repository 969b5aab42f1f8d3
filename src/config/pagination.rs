use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Upper bound on any listing page, whatever the configuration says.
pub const HARD_MAX_LIMIT: i64 = 100;

/// Page size bounds shared by every listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Page size used when the caller doesn't ask for one.
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Largest page size a caller may request.
    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl PaginationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_limit < 1 || self.max_limit > HARD_MAX_LIMIT {
            return Err(ConfigError::Validation(format!(
                "pagination.max_limit must be between 1 and {}, got {}",
                HARD_MAX_LIMIT, self.max_limit
            )));
        }
        if self.default_limit < 1 || self.default_limit > self.max_limit {
            return Err(ConfigError::Validation(format!(
                "pagination.default_limit must be between 1 and max_limit ({}), got {}",
                self.max_limit, self.default_limit
            )));
        }
        Ok(())
    }
}

fn default_limit() -> i64 {
    50
}

fn default_max_limit() -> i64 {
    HARD_MAX_LIMIT
}
