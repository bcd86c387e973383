//! Error type for configuration loading and value parsing

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for hwx-common operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem error while writing configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file exists but could not be read
    #[error("Read TOML failed for {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse TOML failed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialize TOML failed: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// A name that matches no known variant, e.g. `--mode fastest`
    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_value_names_the_kind() {
        let err = Error::UnknownValue {
            kind: "chain mode",
            value: "fastest".to_string(),
        };
        assert_eq!(err.to_string(), "unknown chain mode: fastest");
    }
}
