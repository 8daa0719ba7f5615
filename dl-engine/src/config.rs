use serde::{Deserialize, Serialize};

pub const DEFAULT_BLOCK_WORDS: usize = 256;
pub const MIN_BLOCK_WORDS: usize = 32;
pub const DEFAULT_MAX_NESTING: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListConfig {
    /// Words per storage block.
    pub block_words: usize,
    /// Move single-block lists into the shared pool when they are published.
    pub small_lists: bool,
    /// Deepest nested list call that still executes.
    pub max_nesting: usize,
    pub max_blocks_per_list: Option<usize>,
    pub unpack_alignment: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            block_words: DEFAULT_BLOCK_WORDS,
            small_lists: true,
            max_nesting: DEFAULT_MAX_NESTING,
            max_blocks_per_list: None,
            unpack_alignment: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(message) => write!(f, "failed to read config: {message}"),
            ConfigError::Parse(message) => write!(f, "invalid config json: {message}"),
            ConfigError::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ListConfig {
    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: ListConfig =
            serde_json::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let source =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io(format!("{path}: {err}")))?;
        Self::from_json_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_words < MIN_BLOCK_WORDS {
            return Err(ConfigError::Invalid("block_words must be at least 32"));
        }
        if self.block_words > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid("block_words must fit in 16 bits"));
        }
        if self.max_nesting == 0 {
            return Err(ConfigError::Invalid("max_nesting must be positive"));
        }
        if self.max_blocks_per_list == Some(0) {
            return Err(ConfigError::Invalid("max_blocks_per_list must be positive"));
        }
        if !matches!(self.unpack_alignment, 1 | 2 | 4 | 8) {
            return Err(ConfigError::Invalid("unpack_alignment must be 1, 2, 4 or 8"));
        }
        Ok(())
    }
}
