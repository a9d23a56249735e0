//! Session configuration.
//!
//! A flat key/value store read once when a session is built. Values arrive
//! already resolved from a JSON file, the command line, or code; the session
//! engine only ever reads them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Supported configuration value types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    StringArray(Vec<String>),
}

impl ConfigValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Strings follow the 5250 convention: "0", "no", "off" and "false" are false,
    /// anything else is true.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            ConfigValue::Integer(i) => Some(*i != 0),
            ConfigValue::String(s) => {
                let s = s.trim().to_ascii_lowercase();
                Some(!matches!(s.as_str(), "0" | "no" | "off" | "false"))
            }
            ConfigValue::StringArray(_) => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&Vec<String>> {
        match self {
            ConfigValue::StringArray(arr) => Some(arr),
            _ => None,
        }
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Boolean(value)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(value: Vec<String>) -> Self {
        ConfigValue::StringArray(value)
    }
}

/// Key/value session configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    properties: BTreeMap<String, ConfigValue>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.properties.get(key)
    }

    /// Get configuration property as string
    pub fn get_string_property(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(|v| match v {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Integer(i) => Some(i.to_string()),
            ConfigValue::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
            ConfigValue::StringArray(_) => None,
        })
    }

    /// Get configuration property as string with default
    pub fn get_string_property_or(&self, key: &str, default: &str) -> String {
        self.get_string_property(key).unwrap_or_else(|| default.to_string())
    }

    /// Get configuration property as integer
    pub fn get_int_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(|v| v.as_integer())
    }

    /// Get configuration property as integer with default
    pub fn get_int_property_or(&self, key: &str, default: i64) -> i64 {
        self.get_int_property(key).unwrap_or(default)
    }

    /// Get configuration property as boolean; an unset key is false
    pub fn get_boolean_property(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(|v| v.as_boolean())
            .unwrap_or(false)
    }

    pub fn get_string_array_property(&self, key: &str) -> Option<&Vec<String>> {
        self.properties.get(key).and_then(|v| v.as_string_array())
    }

    /// A required string value, or `MissingRequired`
    pub fn require_string(&self, key: &str) -> ConfigResult<String> {
        self.get_string_property(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired { parameter: key.to_string() })
    }

    pub fn set_property<T: Into<ConfigValue>>(&mut self, key: &str, value: T) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn remove_property(&mut self, key: &str) -> Option<ConfigValue> {
        self.properties.remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Iterate properties in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every `prefix.key` entry to `key`, overwriting what is there.
    ///
    /// This is how a named session block (`myhost.env.USER`) becomes the
    /// active configuration.
    pub fn promote(&mut self, prefix: &str) {
        let dotted = format!("{prefix}.");
        let promoted: Vec<(String, ConfigValue)> = self
            .properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&dotted)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        for (key, value) in promoted {
            debug!("promoting {prefix}.{key}");
            self.properties.insert(key, value);
        }
    }

    /// Apply command-line style arguments.
    ///
    /// `+opt` sets `opt` true, `-opt` sets it false, `key=value` sets a string
    /// and a bare word names the host. When the bare word also names a session
    /// block it is promoted.
    pub fn parse_args<I, S>(&mut self, args: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            let arg = arg.as_ref();
            if let Some(opt) = arg.strip_prefix('+') {
                self.set_property(opt, true);
            } else if let Some(opt) = arg.strip_prefix('-') {
                if opt.is_empty() {
                    return Err(ConfigError::InvalidParameter {
                        parameter: arg.to_string(),
                        value: String::new(),
                        reason: "empty option name".to_string(),
                    });
                }
                self.set_property(opt, false);
            } else if let Some((key, value)) = arg.split_once('=') {
                if key.is_empty() {
                    return Err(ConfigError::InvalidParameter {
                        parameter: arg.to_string(),
                        value: value.to_string(),
                        reason: "empty key".to_string(),
                    });
                }
                self.set_property(key, value);
            } else {
                let has_block = self
                    .properties
                    .keys()
                    .any(|k| k.starts_with(&format!("{arg}.")));
                if has_block {
                    self.promote(arg);
                }
                if !has_block || !self.has_property("host") {
                    self.set_property("host", arg);
                }
            }
        }
        Ok(())
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.properties)
    }

    /// Merge properties from JSON
    pub fn from_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let loaded: BTreeMap<String, ConfigValue> = serde_json::from_str(json)?;
        self.properties.extend(loaded);
        Ok(())
    }

    /// Merge a JSON file into this configuration
    pub fn load_file(&mut self, path: &Path) -> ConfigResult<()> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        self.from_json(&text).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    pub fn save_file(&self, path: &Path) -> ConfigResult<()> {
        let to_err = |e: String| ConfigError::FileError {
            path: path.display().to_string(),
            error: e,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| to_err(e.to_string()))?;
            }
        }
        let json = self.to_json().map_err(|e| to_err(e.to_string()))?;
        fs::write(path, json).map_err(|e| to_err(e.to_string()))
    }
}

/// Default config file location.
///
/// `TN5250_CONFIG` wins, then the platform config directory, then
/// `./session.json`.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("TN5250_CONFIG") {
        return PathBuf::from(p);
    }
    dirs::config_dir()
        .map(|base| base.join("tn5250").join("session.json"))
        .unwrap_or_else(|| PathBuf::from("session.json"))
}

/// Load the default config file if present; otherwise an empty configuration.
pub fn load_default_config() -> SessionConfig {
    let mut config = SessionConfig::new();
    let path = default_config_path();
    if path.exists() {
        if let Err(e) = config.load_file(&path) {
            warn!("ignoring configuration file: {e}");
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_boolean_convention() {
        let mut cfg = SessionConfig::new();
        assert!(!cfg.get_boolean_property("underscores"));
        for off in ["0", "no", "OFF", "false"] {
            cfg.set_property("underscores", off);
            assert!(!cfg.get_boolean_property("underscores"), "{off}");
        }
        cfg.set_property("underscores", "yes");
        assert!(cfg.get_boolean_property("underscores"));
        cfg.set_property("underscores", true);
        assert!(cfg.get_boolean_property("underscores"));
    }

    #[test]
    fn test_parse_args() {
        let mut cfg = SessionConfig::new();
        cfg.parse_args(["+underscores", "-enhanced", "env.TERM=IBM-3477-FC", "as400.example.com"])
            .unwrap();
        assert!(cfg.get_boolean_property("underscores"));
        assert!(!cfg.get_boolean_property("enhanced"));
        assert!(cfg.has_property("enhanced"));
        assert_eq!(cfg.get_string_property("env.TERM").as_deref(), Some("IBM-3477-FC"));
        assert_eq!(cfg.get_string_property("host").as_deref(), Some("as400.example.com"));
    }

    #[test]
    fn test_parse_args_promotes_session_block() {
        let mut cfg = SessionConfig::new();
        cfg.set_property("prod.host", "prod.example.com");
        cfg.set_property("prod.env.USER", "QSECOFR");
        cfg.parse_args(["prod"]).unwrap();
        assert_eq!(cfg.get_string_property("host").as_deref(), Some("prod.example.com"));
        assert_eq!(cfg.get_string_property("env.USER").as_deref(), Some("QSECOFR"));
    }

    #[test]
    fn test_parse_args_rejects_empty_key() {
        let mut cfg = SessionConfig::new();
        assert!(cfg.parse_args(["=x"]).is_err());
        assert!(cfg.parse_args(["-"]).is_err());
    }

    #[test]
    fn test_require_string() {
        let mut cfg = SessionConfig::new();
        match cfg.require_string("host") {
            Err(ConfigError::MissingRequired { parameter }) => assert_eq!(parameter, "host"),
            other => panic!("unexpected {other:?}"),
        }
        cfg.set_property("host", "h");
        assert_eq!(cfg.require_string("host").unwrap(), "h");
    }

    #[test]
    fn test_int_from_string() {
        let mut cfg = SessionConfig::new();
        cfg.set_property("width", "132");
        assert_eq!(cfg.get_int_property_or("width", 80), 132);
        assert_eq!(cfg.get_int_property_or("height", 24), 24);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let mut cfg = SessionConfig::new();
        cfg.set_property("host", "h");
        cfg.set_property("underscores", true);
        cfg.set_property("width", 132i64);
        cfg.save_file(&path).unwrap();

        let mut loaded = SessionConfig::new();
        loaded.load_file(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = SessionConfig::new().load_file(&path).unwrap_err();
        assert!(err.to_string().contains("absent.json"));
    }
}
