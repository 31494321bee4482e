//! Configuration loading
//!
//! Configurations are JSON documents. Loading parses and validates; a
//! document that fails either step is rejected as a whole.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::errors::{ConfigError, ConfigResult};
use super::types::ClusterConfig;

impl ClusterConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(data: &str) -> ConfigResult<Self> {
        let config: ClusterConfig =
            serde_json::from_str(data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json(&data)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl FromStr for ClusterConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_json(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RedundancyModel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const DOC: &str = r#"{
        "groups": [{ "name": "sg", "model": "two_n" }],
        "units": [
            { "name": "su-1", "group": "sg", "node": "n1", "rank": 1 },
            { "name": "su-2", "group": "sg", "node": "n2", "rank": 2 }
        ],
        "instances": [{ "name": "si-1", "group": "sg", "rank": 1 }]
    }"#;

    #[test]
    fn test_parse_with_defaults() {
        let config: ClusterConfig = DOC.parse().unwrap();
        assert_eq!(config.groups[0].model, RedundancyModel::TwoN);
        assert_eq!(config.settings.max_settle_rounds, 64);
        assert_eq!(config.instances[0].preferred(RedundancyModel::TwoN), (1, 1));
        assert_eq!(config.instances[0].preferred(RedundancyModel::NWayActive), (1, 0));
        assert!(config.dependencies.is_empty());
        assert!(!config.groups[0].auto_adjust);
    }

    #[test]
    fn test_parse_auto_adjust() {
        let doc = DOC.replace(r#""model": "two_n""#, r#""model": "two_n", "auto_adjust": true"#);
        let config: ClusterConfig = doc.parse().unwrap();
        assert!(config.groups[0].auto_adjust);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = ClusterConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();
        let config = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.units.len(), 2);

        let err = ClusterConfig::from_file(file.path().with_extension("missing")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
