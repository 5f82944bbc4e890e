use crate::error::{ReconcilerError, Result};
use log::warn;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const MAX_ATTEMPTS_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Extraction attempts per (file, statement kind), always within `1..=5`.
    pub max_attempts: usize,
    /// Default absolute tolerance, in the statement's own units.
    pub tolerance: u64,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            tolerance: 0,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
        }
    }
}

impl EngineConfig {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let max_attempts = match get("OCR_MAX_RETRIES") {
            None => 1,
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) => n.clamp(1, MAX_ATTEMPTS_LIMIT as i64) as usize,
                Err(_) => {
                    warn!("OCR_MAX_RETRIES='{}' is not an integer, using 1", raw);
                    1
                }
            },
        };

        let tolerance = match get("VALIDATION_TOLERANCE") {
            None => 0,
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                warn!("VALIDATION_TOLERANCE='{}' is not a non-negative integer, using 0", raw);
                0
            }),
        };

        Self {
            max_attempts,
            tolerance,
            model: get("GENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: get("GOOGLE_API_KEY").or_else(|| get("GENAI_API_KEY")),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = clamp_attempts(max_attempts);
        self
    }

    pub fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ReconcilerError::Config("Missing GOOGLE_API_KEY/GENAI_API_KEY".to_string())
        })
    }
}

pub fn clamp_attempts(max_attempts: usize) -> usize {
    max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT)
}
